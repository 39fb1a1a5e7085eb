use sentinel_core::{storage_key, EncryptionCodec, Payload, SecureStore};
use serde_json::json;

#[test]
fn structured_values_roundtrip_bit_exact() {
    let codec = EncryptionCodec::from_password("integration-secret");
    let value = json!({
        "timestamp_ms": 1722000000000u64,
        "regions": [
            {"x": 10, "y": 20, "width": 100, "height": 80, "area": 6400},
            {"x": 300, "y": 40, "width": 50, "height": 60, "area": 2100}
        ],
        "intensity": 4.27,
        "transcript": "door opened",
        "unicode": "日本語 / émoji 🚪"
    });
    let blob = codec.encrypt(&Payload::Structured(value.clone())).unwrap();
    assert_eq!(
        codec.decrypt(&blob, true).unwrap(),
        Payload::Structured(value)
    );
}

#[test]
fn large_binary_payloads_roundtrip_bit_exact() {
    let codec = EncryptionCodec::from_password("integration-secret");
    // A megabyte of non-trivial bytes, roughly a JPEG-sized payload.
    let bytes: Vec<u8> = (0..1_048_576u32)
        .map(|i| (i.wrapping_mul(2654435761) >> 24) as u8)
        .collect();
    let blob = codec.encrypt(&Payload::Binary(bytes.clone())).unwrap();
    assert_eq!(
        codec.decrypt(&blob, false).unwrap(),
        Payload::Binary(bytes)
    );
}

#[test]
fn wrong_password_is_a_distinguishable_failure() {
    let codec = EncryptionCodec::from_password("right-password");
    let blob = codec
        .encrypt(&Payload::Binary(b"private artifact".to_vec()))
        .unwrap();

    let wrong = EncryptionCodec::from_password("wrong-password");
    let err = wrong.decrypt(&blob, false).unwrap_err();
    assert!(err.to_string().contains("decryption failed"));
}

#[test]
fn store_hides_decrypt_failures_behind_none() {
    let store = SecureStore::new(EncryptionCodec::from_password("store-password"));
    let key = storage_key("movement", 1722000000000);
    assert!(store.store(&key, &Payload::Structured(json!({"intensity": 1.5}))));

    // Same entry read through a store with a different passphrase: the key
    // is listed, but retrieval reads as absent.
    let other = SecureStore::new(EncryptionCodec::from_password("other-password"));
    let ciphertext = store.ciphertext(&key).unwrap();
    assert!(other.retrieve(&key, true).is_none());

    // And the ciphertext itself cannot be opened by the other codec.
    assert!(other.codec().decrypt(&ciphertext, true).is_err());

    // The owning store still round-trips.
    assert_eq!(
        store.retrieve(&key, true),
        Some(Payload::Structured(json!({"intensity": 1.5})))
    );
}

#[test]
fn delete_and_list_follow_store_contract() {
    let store = SecureStore::new(EncryptionCodec::from_password("store-password"));
    for ts in [3u64, 1, 2] {
        store.store(&storage_key("analysis", ts), &Payload::Binary(vec![ts as u8]));
    }
    assert_eq!(store.len(), 3);
    assert_eq!(
        store.list_keys(),
        vec![
            storage_key("analysis", 1),
            storage_key("analysis", 2),
            storage_key("analysis", 3),
        ]
    );
    assert!(store.delete(&storage_key("analysis", 2)));
    assert!(!store.delete(&storage_key("analysis", 2)));
    assert_eq!(store.len(), 2);
    assert!(store.retrieve(&storage_key("analysis", 2), false).is_none());
}
