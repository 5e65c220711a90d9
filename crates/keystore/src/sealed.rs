//! Password-sealed keystore file.
//!
//! The file is a JSON document. The password is stretched with Argon2id into
//! a 256-bit key and every entry is sealed with ChaCha20-Poly1305, the alias
//! being the associated data so entries cannot be swapped between aliases.
//! A sealed verifier lets a wrong password fail at open time. Entries stay
//! sealed in memory and are opened one at a time on request.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::NaiveDate;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracekeep_core::KeystoreType;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::alias::{KeyAlias, KeyPurpose};
use crate::backend::{CryptoProvider, KeystoreBackend};
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::keygen::KeyGenStrategy;
use crate::material::{ExchangeKeyPair, KeyEntry, KeyMaterial};

pub const SEALED_FORMAT_VERSION: u32 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const VERIFIER_AAD: &[u8] = b"tracekeep-keystore-verifier";
const VERIFIER_PLAINTEXT: &[u8] = b"tracekeep sealed keystore v1";

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19_456,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KdfSection {
    salt: String,
    #[serde(flatten)]
    params: KdfParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedBlob {
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum EntryKind {
    Secret,
    KeyPair,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEntry {
    alias: String,
    kind: EntryKind,
    #[serde(flatten)]
    blob: SealedBlob,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedFile {
    version: u32,
    kdf: KdfSection,
    verifier: SealedBlob,
    entries: Vec<SealedEntry>,
}

fn derive_cipher(
    password: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<ChaCha20Poly1305, String> {
    let params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| format!("invalid kdf parameters: {}", e))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| format!("key derivation failed: {}", e))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..])))
}

fn seal(cipher: &ChaCha20Poly1305, msg: &[u8], aad: &[u8]) -> Result<SealedBlob, String> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg, aad })
        .map_err(|_| "encryption failed".to_string())?;
    Ok(SealedBlob {
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
    })
}

fn open_blob(
    cipher: &ChaCha20Poly1305,
    blob: &SealedBlob,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, String> {
    let nonce = hex::decode(&blob.nonce).map_err(|e| format!("bad nonce: {}", e))?;
    if nonce.len() != NONCE_LEN {
        return Err(format!("bad nonce length {}", nonce.len()));
    }
    let ciphertext =
        hex::decode(&blob.ciphertext).map_err(|e| format!("bad ciphertext: {}", e))?;
    cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad,
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| "authentication failed".to_string())
}

/// An opened sealed keystore file.
pub struct SealedKeystore {
    path: PathBuf,
    cipher: ChaCha20Poly1305,
    entries: BTreeMap<String, SealedEntry>,
}

impl SealedKeystore {
    /// Read and unlock the file. Every failure, including a wrong password,
    /// is an `Init` error.
    pub fn open(path: &Path, password: &str) -> KeyStoreResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KeyStoreError::Init(format!("{}: {}", path.display(), e)))?;
        let file: SealedFile = serde_json::from_str(&content)
            .map_err(|e| {
                KeyStoreError::Init(format!("{}: malformed keystore: {}", path.display(), e))
            })?;

        if file.version != SEALED_FORMAT_VERSION {
            return Err(KeyStoreError::Init(format!(
                "{}: unsupported keystore version {}",
                path.display(),
                file.version
            )));
        }

        let salt = hex::decode(&file.kdf.salt)
            .map_err(|e| KeyStoreError::Init(format!("{}: bad salt: {}", path.display(), e)))?;
        let cipher =
            derive_cipher(password, &salt, file.kdf.params).map_err(KeyStoreError::Init)?;

        let verifier = open_blob(&cipher, &file.verifier, VERIFIER_AAD).map_err(|_| {
            KeyStoreError::Init(format!(
                "{}: wrong password or corrupted keystore",
                path.display()
            ))
        })?;
        if verifier.as_slice() != VERIFIER_PLAINTEXT {
            return Err(KeyStoreError::Init(format!(
                "{}: keystore verifier mismatch",
                path.display()
            )));
        }

        let mut entries = BTreeMap::new();
        for entry in file.entries {
            if entries.contains_key(&entry.alias) {
                return Err(KeyStoreError::Init(format!(
                    "{}: duplicate alias '{}'",
                    path.display(),
                    entry.alias
                )));
            }
            entries.insert(entry.alias.clone(), entry);
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            "Sealed keystore opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            cipher,
            entries,
        })
    }
}

impl KeystoreBackend for SealedKeystore {
    fn provider(&self) -> CryptoProvider {
        CryptoProvider::new(
            KeystoreType::Sealed,
            format!("sealed-keystore:{}", self.path.display()),
        )
    }

    fn contains_alias(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    fn aliases(&self) -> KeyStoreResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn load_entry(&self, alias: &str) -> KeyStoreResult<Option<KeyEntry>> {
        let Some(entry) = self.entries.get(alias) else {
            return Ok(None);
        };

        let plaintext = open_blob(&self.cipher, &entry.blob, alias.as_bytes()).map_err(|reason| {
            KeyStoreError::InvalidKeyMaterial {
                alias: alias.to_string(),
                reason,
            }
        })?;
        debug!(alias, kind = ?entry.kind, "Unsealed keystore entry");

        match entry.kind {
            EntryKind::Secret => Ok(Some(KeyEntry::Secret(KeyMaterial::new(plaintext.to_vec())))),
            EntryKind::KeyPair => {
                let secret: [u8; 32] = plaintext.as_slice().try_into().map_err(|_| {
                    KeyStoreError::InvalidKeyMaterial {
                        alias: alias.to_string(),
                        reason: format!("expected 32 secret bytes, got {}", plaintext.len()),
                    }
                })?;
                let pair = ExchangeKeyPair::from_secret_bytes(secret);
                if let Some(public) = &entry.public_key {
                    if *public != hex::encode(pair.public_bytes()) {
                        return Err(KeyStoreError::InvalidKeyMaterial {
                            alias: alias.to_string(),
                            reason: "public key does not match the sealed secret".to_string(),
                        });
                    }
                }
                Ok(Some(KeyEntry::KeyPair(pair)))
            }
        }
    }
}

/// Builds a sealed keystore file.
pub struct SealedKeystoreWriter {
    password: Zeroizing<String>,
    kdf: KdfParams,
    entries: BTreeMap<String, KeyEntry>,
}

impl SealedKeystoreWriter {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            kdf: KdfParams::default(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Add or replace the entry stored under `alias`.
    pub fn insert(&mut self, alias: impl AsRef<str>, entry: KeyEntry) -> &mut Self {
        self.entries.insert(alias.as_ref().to_string(), entry);
        self
    }

    /// Generate a fresh entry for `alias` with the strategy of its purpose.
    pub fn generate(&mut self, alias: &KeyAlias) -> KeyStoreResult<&mut Self> {
        let purpose = alias.purpose().ok_or_else(|| KeyStoreError::InvalidKeyMaterial {
            alias: alias.to_string(),
            reason: "alias has no known purpose".to_string(),
        })?;
        let entry = KeyGenStrategy::for_purpose(purpose).generate(&mut OsRng);
        Ok(self.insert(alias, entry))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Seal every entry and write the file, replacing any previous one.
    pub fn write_to(&self, path: &Path) -> KeyStoreResult<()> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let cipher =
            derive_cipher(&self.password, &salt, self.kdf).map_err(KeyStoreError::Backend)?;

        let verifier =
            seal(&cipher, VERIFIER_PLAINTEXT, VERIFIER_AAD).map_err(KeyStoreError::Backend)?;
        let mut entries = Vec::with_capacity(self.entries.len());
        for (alias, entry) in &self.entries {
            let (kind, blob, public_key) = match entry {
                KeyEntry::Secret(material) => (
                    EntryKind::Secret,
                    seal(&cipher, material.as_bytes(), alias.as_bytes()),
                    None,
                ),
                KeyEntry::KeyPair(pair) => (
                    EntryKind::KeyPair,
                    seal(&cipher, &pair.secret_bytes()[..], alias.as_bytes()),
                    Some(hex::encode(pair.public_bytes())),
                ),
            };
            entries.push(SealedEntry {
                alias: alias.clone(),
                kind,
                blob: blob.map_err(KeyStoreError::Backend)?,
                public_key,
            });
        }

        let file = SealedFile {
            version: SEALED_FORMAT_VERSION,
            kdf: KdfSection {
                salt: hex::encode(salt),
                params: self.kdf,
            },
            verifier,
            entries,
        };

        // Write next to the target and rename, so a concurrent reload never
        // reads a partial file.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        std::fs::rename(&tmp, path)?;

        info!(path = %path.display(), entries = file.entries.len(), "Sealed keystore written");
        Ok(())
    }
}

/// Write a keystore holding the fixed keys plus day keys for `days`
/// consecutive days starting at `from`. Returns the aliases written.
pub fn provision_keystore(
    path: &Path,
    password: &str,
    from: NaiveDate,
    days: u32,
    kdf: KdfParams,
) -> KeyStoreResult<Vec<KeyAlias>> {
    let mut writer = SealedKeystoreWriter::new(password).with_kdf(kdf);
    let mut written = Vec::new();

    for purpose in [
        KeyPurpose::Federation,
        KeyPurpose::ClientKeyEncryption,
        KeyPurpose::ServerExchange,
    ] {
        if let Some(alias) = KeyAlias::fixed(purpose) {
            writer.generate(&alias)?;
            written.push(alias);
        }
    }

    for date in from.iter_days().take(days as usize) {
        let alias = KeyAlias::server_key(date);
        writer.generate(&alias)?;
        written.push(alias);
    }

    writer.write_to(path)?;
    Ok(written)
}
