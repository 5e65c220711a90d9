//! PKCS#12 keystore file, as written by `keytool -storetype PKCS12`.
//!
//! Secret key entries serve the symmetric keys. A private key entry holding an
//! X25519 key serves the exchange key pair. Certificate entries are skipped.

use p12_keystore::{KeyStore, KeyStoreEntry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracekeep_core::KeystoreType;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::backend::{CryptoProvider, KeystoreBackend};
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::material::{ExchangeKeyPair, KeyEntry, KeyMaterial};

/// `PrivateKeyInfo` header of an X25519 key (RFC 8410), followed by the
/// 32 key bytes.
const X25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x04, 0x22, 0x04, 0x20,
];

enum StoredEntry {
    Secret(Zeroizing<Vec<u8>>),
    /// PKCS#8 DER.
    PrivateKey(Zeroizing<Vec<u8>>),
}

/// Decrypted contents of a PKCS#12 file.
pub struct Pkcs12Keystore {
    path: PathBuf,
    entries: BTreeMap<String, StoredEntry>,
}

impl Pkcs12Keystore {
    /// Read and decrypt the file; a wrong password fails the MAC check here.
    pub fn open(path: &Path, password: &str) -> KeyStoreResult<Self> {
        let data = std::fs::read(path)
            .map_err(|e| KeyStoreError::Init(format!("{}: {}", path.display(), e)))?;
        let keystore = KeyStore::from_pkcs12(&data, password)
            .map_err(|e| KeyStoreError::Init(format!("{}: {}", path.display(), e)))?;

        let mut entries = BTreeMap::new();
        for (alias, entry) in keystore.entries() {
            let stored = match entry {
                KeyStoreEntry::Secret(secret) => {
                    StoredEntry::Secret(Zeroizing::new(secret.key().to_vec()))
                }
                KeyStoreEntry::PrivateKeyChain(chain) => {
                    StoredEntry::PrivateKey(Zeroizing::new(chain.key().to_vec()))
                }
                _ => {
                    debug!(alias = %alias, "Skipping certificate entry");
                    continue;
                }
            };
            entries.insert(alias.to_string(), stored);
        }

        info!(path = %path.display(), entries = entries.len(), "PKCS#12 keystore opened");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }
}

fn decode_x25519(alias: &str, der: &[u8]) -> KeyStoreResult<ExchangeKeyPair> {
    let secret: [u8; 32] = der
        .strip_prefix(&X25519_PKCS8_PREFIX)
        .and_then(|key| key.try_into().ok())
        .ok_or_else(|| KeyStoreError::InvalidKeyMaterial {
            alias: alias.to_string(),
            reason: "expected an X25519 PKCS#8 private key".to_string(),
        })?;
    Ok(ExchangeKeyPair::from_secret_bytes(secret))
}

impl KeystoreBackend for Pkcs12Keystore {
    fn provider(&self) -> CryptoProvider {
        CryptoProvider::new(
            KeystoreType::Pkcs12,
            format!("pkcs12:{}", self.path.display()),
        )
    }

    fn contains_alias(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    fn aliases(&self) -> KeyStoreResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn load_entry(&self, alias: &str) -> KeyStoreResult<Option<KeyEntry>> {
        match self.entries.get(alias) {
            None => Ok(None),
            Some(StoredEntry::Secret(bytes)) => {
                Ok(Some(KeyEntry::Secret(KeyMaterial::new(bytes.to_vec()))))
            }
            Some(StoredEntry::PrivateKey(der)) => {
                Ok(Some(KeyEntry::KeyPair(decode_x25519(alias, der)?)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x25519_private_key_is_decoded() {
        let der = hex::decode(
            "302e020100300506032b656e04220420\
             208a613bf691b941bff145b7aae5835673f975b0d3ad6ae030897c917ad12872",
        )
        .unwrap();
        let pair = decode_x25519("register-key", &der).unwrap();
        assert_eq!(
            hex::encode(pair.public_bytes()),
            "b901499cc398da2d13c2b6af63a10ed7738ab581be8494fd82c971754f553d7b"
        );
    }

    #[test]
    fn test_other_private_keys_are_invalid_material() {
        // Ed25519 key: same layout, different algorithm identifier.
        let der = hex::decode(
            "302e020100300506032b657004220420\
             208a613bf691b941bff145b7aae5835673f975b0d3ad6ae030897c917ad12872",
        )
        .unwrap();
        assert!(matches!(
            decode_x25519("register-key", &der),
            Err(KeyStoreError::InvalidKeyMaterial { .. })
        ));
        assert!(decode_x25519("register-key", &der[..20]).is_err());
    }
}
