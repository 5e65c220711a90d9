//! Integration tests for the PKCS#12 backend
//!
//! `fixtures/keystore.p12` was written by `keytool` (store password
//! `changeit`). It holds AES secret keys for the fixed aliases and three day
//! keys, plus an X25519 `register-key` private key entry.
#![cfg(feature = "pkcs12")]

use std::path::PathBuf;
use tracekeep_keystore::{KeyMaterialStore, KeyStoreError, KeystoreSettings, KeystoreType};

const PASSWORD: &str = "changeit";

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/keystore.p12")
}

#[test]
fn test_keytool_keystore_serves_every_purpose() {
    let store = KeyMaterialStore::init(&KeystoreSettings::pkcs12(PASSWORD, fixture())).unwrap();

    assert_eq!(
        store.hsm_cache_status(),
        vec!["federation-key", "key-encryption-key", "register-key"]
    );
    assert_eq!(store.federation_key().unwrap().len(), 32);
    assert_eq!(store.key_for_encrypting_client_keys().unwrap().len(), 32);
    assert_eq!(store.get_entry("server-key-20200602").unwrap().len(), 24);

    let pair = store.server_key_pair().unwrap();
    assert_eq!(
        hex::encode(pair.public_bytes()),
        "b901499cc398da2d13c2b6af63a10ed7738ab581be8494fd82c971754f553d7b"
    );
    assert_eq!(store.provider().keystore_type, KeystoreType::Pkcs12);
}

#[test]
fn test_wrong_store_password_fails_init() {
    let result = KeyMaterialStore::init(&KeystoreSettings::pkcs12("not-changeit", fixture()));
    assert!(matches!(result, Err(KeyStoreError::Init(_))));
}

#[test]
fn test_reload_keeps_the_keys_in_use() {
    let settings = KeystoreSettings::pkcs12(PASSWORD, fixture());
    let store = KeyMaterialStore::init(&settings).unwrap();
    let day_key = store.get_entry("server-key-20200601").unwrap().fingerprint();

    assert!(store.reload_hsm(&settings));
    assert!(store
        .hsm_cache_status()
        .contains(&"server-key-20200601".to_string()));
    assert_eq!(
        store.get_entry("server-key-20200601").unwrap().fingerprint(),
        day_key
    );
}
