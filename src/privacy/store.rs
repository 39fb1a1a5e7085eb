//! Encrypted key-value store.
//!
//! In-memory, process-lifetime cache of ciphertext blobs. Entries outlive
//! monitoring sessions but not the process; durable storage is a caller
//! concern. Plaintext never rests in the map — values are encrypted on
//! `store` and only decrypted on an explicit `retrieve`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::lock_unpoisoned;
use crate::privacy::{EncryptionCodec, Payload};

/// Storage key convention: `<kind>_<timestamp_ms>` with the timestamp
/// zero-padded so lexicographic key order is chronological order.
pub fn storage_key(kind: &str, timestamp_ms: u64) -> String {
    format!("{}_{:013}", kind, timestamp_ms)
}

pub struct SecureStore {
    codec: EncryptionCodec,
    entries: Mutex<BTreeMap<String, String>>,
}

impl SecureStore {
    pub fn new(codec: EncryptionCodec) -> Self {
        Self {
            codec,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// The codec backing this store, for callers that need to encrypt
    /// payloads which never enter the map (e.g. frame exports).
    pub fn codec(&self) -> &EncryptionCodec {
        &self.codec
    }

    /// Encrypt and insert. Returns false (and stores nothing) when
    /// encryption fails — a broken encoding is never written.
    pub fn store(&self, key: &str, payload: &Payload) -> bool {
        match self.codec.encrypt(payload) {
            Ok(blob) => {
                lock_unpoisoned(&self.entries).insert(key.to_string(), blob);
                true
            }
            Err(err) => {
                log::error!("secure store: encrypt failed for '{}': {}", key, err);
                false
            }
        }
    }

    /// Retrieve and decrypt. Returns `None` both when the key is absent and
    /// when decryption fails; callers needing to distinguish the two can
    /// check `list_keys` first. Decrypt failures are logged for diagnostics.
    pub fn retrieve(&self, key: &str, as_structured: bool) -> Option<Payload> {
        let blob = lock_unpoisoned(&self.entries).get(key).cloned()?;
        match self.codec.decrypt(&blob, as_structured) {
            Ok(payload) => Some(payload),
            Err(err) => {
                log::debug!("secure store: decrypt failed for '{}': {}", key, err);
                None
            }
        }
    }

    /// Raw ciphertext blob for a key, without decrypting.
    pub fn ciphertext(&self, key: &str) -> Option<String> {
        lock_unpoisoned(&self.entries).get(key).cloned()
    }

    pub fn delete(&self, key: &str) -> bool {
        lock_unpoisoned(&self.entries).remove(key).is_some()
    }

    /// All keys in lexicographic (= chronological, per convention) order.
    pub fn list_keys(&self) -> Vec<String> {
        lock_unpoisoned(&self.entries).keys().cloned().collect()
    }

    /// Keys with the given kind prefix, chronological order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        lock_unpoisoned(&self.entries)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.entries).is_empty()
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> SecureStore {
        SecureStore::new(EncryptionCodec::from_password("store-test"))
    }

    #[test]
    fn store_and_retrieve_structured_value() {
        let store = test_store();
        let value = json!({"intensity": 7.5, "regions": 2});
        assert!(store.store("movement_0000000000001", &Payload::Structured(value.clone())));
        assert_eq!(
            store.retrieve("movement_0000000000001", true),
            Some(Payload::Structured(value))
        );
    }

    #[test]
    fn absent_and_corrupt_entries_both_read_as_none() {
        let store = test_store();
        assert_eq!(store.retrieve("missing", true), None);

        // An entry encrypted under a different key decrypts to None, but its
        // key is still listed.
        let foreign = EncryptionCodec::from_password("someone-else");
        let blob = foreign.encrypt(&Payload::Binary(b"x".to_vec())).unwrap();
        lock_unpoisoned(&store.entries).insert("corrupt".to_string(), blob);
        assert_eq!(store.retrieve("corrupt", false), None);
        assert!(store.list_keys().contains(&"corrupt".to_string()));
    }

    #[test]
    fn ciphertext_is_not_plaintext() {
        let store = test_store();
        store.store("k", &Payload::Binary(b"visible secret".to_vec()));
        let blob = store.ciphertext("k").unwrap();
        assert!(!blob.contains("visible secret"));
        assert!(!blob.is_empty());
    }

    #[test]
    fn delete_reports_presence() {
        let store = test_store();
        store.store("k", &Payload::Binary(vec![1, 2, 3]));
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert!(store.is_empty());
    }

    #[test]
    fn keys_sort_chronologically_with_padded_timestamps() {
        let store = test_store();
        for ts in [5u64, 123456789012, 42] {
            store.store(&storage_key("movement", ts), &Payload::Binary(vec![0]));
        }
        store.store(&storage_key("analysis", 7), &Payload::Binary(vec![0]));

        let keys = store.keys_with_prefix("movement_");
        assert_eq!(
            keys,
            vec![
                storage_key("movement", 5),
                storage_key("movement", 42),
                storage_key("movement", 123456789012),
            ]
        );
    }
}
