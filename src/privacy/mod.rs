//! Privacy layer: password-derived authenticated encryption.
//!
//! Every artifact the pipeline persists (movement events, analysis records,
//! encrypted frame exports) passes through `EncryptionCodec` before it
//! reaches the store. The codec fails closed: it never emits a blob it could
//! not round-trip, and decryption detects tampering or wrong-key use instead
//! of returning corrupted plaintext.

mod store;

pub use store::{storage_key, SecureStore};

use anyhow::{anyhow, Result};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand::RngCore;
use serde_json::Value;
use zeroize::Zeroize;

pub const AEAD_ALG: &str = "chacha20poly1305";
pub const KDF_ALG: &str = "pbkdf2-hmac-sha256";
pub const KDF_ITERATIONS: u32 = 100_000;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Fixed key-derivation salt shared across deployments.
///
/// Observed behavior of the source system: every installation stretches the
/// operator passphrase against this same salt, so identical passphrases
/// derive identical keys everywhere. Deployments that need installation-
/// specific keys should derive with `derive_key_with_salt` instead.
const FIXED_KDF_SALT: &[u8] = b"sentinel_core_kdf_salt_v1";

/// Payload accepted by the codec: structured JSON or raw binary.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Structured(Value),
    Binary(Vec<u8>),
}

impl Payload {
    /// The AAD binds each blob to its payload kind, so a structured blob
    /// cannot be opened as binary (or vice versa) even with the right key.
    fn aad(&self) -> &'static [u8] {
        match self {
            Payload::Structured(_) => b"sentinel:structured",
            Payload::Binary(_) => b"sentinel:binary",
        }
    }
}

/// Symmetric codec over a password-derived (or operator-supplied) key.
pub struct EncryptionCodec {
    key: [u8; 32],
}

impl EncryptionCodec {
    /// Stretch a passphrase into a key with the fixed deployment salt.
    pub fn from_password(password: &str) -> Self {
        Self {
            key: derive_key(password),
        }
    }

    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Restore a codec from a previously exported hex key.
    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key.trim())?;
        if bytes.len() != 32 {
            return Err(anyhow!("codec key must be 32 bytes, got {}", bytes.len()));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    /// Export the key as hex. Handle with care: anyone holding this string
    /// can decrypt every stored artifact.
    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    /// Encrypt a payload into an opaque hex blob: nonce || tag || ciphertext.
    pub fn encrypt(&self, payload: &Payload) -> Result<String> {
        let mut clear = match payload {
            Payload::Structured(value) => serde_json::to_vec(value)?,
            Payload::Binary(bytes) => bytes.clone(),
        };

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let tag: [u8; TAG_LEN] = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), payload.aad(), &mut clear)
            .map_err(|_| anyhow!("encryption failed"))?
            .into();

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + clear.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&clear);
        Ok(hex::encode(out))
    }

    /// Decrypt a blob produced by `encrypt`. Tampered ciphertext, a wrong
    /// key, or a payload-kind mismatch all yield an error, never garbage.
    pub fn decrypt(&self, blob: &str, as_structured: bool) -> Result<Payload> {
        let bytes = hex::decode(blob.trim()).map_err(|_| anyhow!("malformed ciphertext blob"))?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(anyhow!("ciphertext blob truncated"));
        }
        let (nonce, rest) = bytes.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let aad: &[u8] = if as_structured {
            b"sentinel:structured"
        } else {
            b"sentinel:binary"
        };

        let mut clear = ciphertext.to_vec();
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                aad,
                &mut clear,
                Tag::from_slice(tag),
            )
            .map_err(|_| anyhow!("decryption failed (wrong key or tampered data)"))?;

        if as_structured {
            let value = serde_json::from_slice(&clear)
                .map_err(|e| anyhow!("decrypted blob is not valid JSON: {}", e))?;
            Ok(Payload::Structured(value))
        } else {
            Ok(Payload::Binary(clear))
        }
    }
}

impl Drop for EncryptionCodec {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Derive a 32-byte key from a passphrase with the fixed deployment salt.
pub fn derive_key(password: &str) -> [u8; 32] {
    derive_key_with_salt(password, FIXED_KDF_SALT)
}

/// Derive a 32-byte key from a passphrase and an explicit salt.
pub fn derive_key_with_salt(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_derivation_is_deterministic() {
        assert_eq!(derive_key("passphrase"), derive_key("passphrase"));
        assert_ne!(derive_key("passphrase"), derive_key("other"));
    }

    #[test]
    fn structured_roundtrip_is_bit_exact() {
        let codec = EncryptionCodec::from_password("test-secret");
        let value = json!({
            "regions": 3,
            "intensity": 4.25,
            "nested": {"flag": true, "list": [1, 2, 3]}
        });
        let blob = codec.encrypt(&Payload::Structured(value.clone())).unwrap();
        let decrypted = codec.decrypt(&blob, true).unwrap();
        assert_eq!(decrypted, Payload::Structured(value));
    }

    #[test]
    fn binary_roundtrip_is_bit_exact() {
        let codec = EncryptionCodec::from_password("test-secret");
        let bytes: Vec<u8> = (0..=255).cycle().take(4096).collect();
        let blob = codec.encrypt(&Payload::Binary(bytes.clone())).unwrap();
        let decrypted = codec.decrypt(&blob, false).unwrap();
        assert_eq!(decrypted, Payload::Binary(bytes));
    }

    #[test]
    fn wrong_password_never_yields_plaintext() {
        let codec = EncryptionCodec::from_password("correct-password");
        let blob = codec
            .encrypt(&Payload::Binary(b"sensitive".to_vec()))
            .unwrap();

        let other = EncryptionCodec::from_password("wrong-password");
        assert!(other.decrypt(&blob, false).is_err());
    }

    #[test]
    fn tampered_blob_is_rejected() {
        let codec = EncryptionCodec::from_password("test-secret");
        let blob = codec
            .encrypt(&Payload::Binary(b"sensitive".to_vec()))
            .unwrap();

        let mut tampered = blob.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(codec.decrypt(&tampered, false).is_err());
    }

    #[test]
    fn payload_kind_is_bound_into_the_blob() {
        let codec = EncryptionCodec::from_password("test-secret");
        let blob = codec
            .encrypt(&Payload::Structured(json!({"a": 1})))
            .unwrap();
        // Opening a structured blob as binary fails the AEAD check.
        assert!(codec.decrypt(&blob, false).is_err());
    }

    #[test]
    fn hex_key_export_restores_the_codec() {
        let codec = EncryptionCodec::from_password("test-secret");
        let blob = codec.encrypt(&Payload::Binary(b"data".to_vec())).unwrap();

        let restored = EncryptionCodec::from_hex_key(&codec.key_hex()).unwrap();
        assert_eq!(
            restored.decrypt(&blob, false).unwrap(),
            Payload::Binary(b"data".to_vec())
        );
    }
}
