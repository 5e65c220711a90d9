//! Keystore backends.
//!
//! A backend is one opened session on the key material: a PKCS#11 token, a
//! PKCS#12 file or a sealed keystore file. Backends are immutable once opened; picking up newly
//! provisioned keys means opening a new backend.

use std::fmt;
use std::path::{Path, PathBuf};
use tracekeep_core::{KeystoreConfig, KeystoreType};
use zeroize::Zeroizing;

use crate::error::{KeyStoreError, KeyStoreResult};
use crate::material::KeyEntry;
use crate::sealed::SealedKeystore;

/// Arguments needed to open a keystore.
#[derive(Clone)]
pub struct KeystoreSettings {
    pub password: Zeroizing<String>,
    /// Engine configuration (PKCS#11 module settings).
    pub config_source: Option<PathBuf>,
    pub keystore_type: KeystoreType,
    /// Keystore resource (sealed or PKCS#12 keystore file).
    pub resource: Option<PathBuf>,
}

impl KeystoreSettings {
    pub fn new(
        password: impl Into<String>,
        config_source: Option<PathBuf>,
        keystore_type: KeystoreType,
        resource: Option<PathBuf>,
    ) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            config_source,
            keystore_type,
            resource,
        }
    }

    /// Settings for a sealed keystore file.
    pub fn sealed(password: impl Into<String>, resource: impl Into<PathBuf>) -> Self {
        Self::new(password, None, KeystoreType::Sealed, Some(resource.into()))
    }

    /// Settings for a PKCS#12 keystore file.
    pub fn pkcs12(password: impl Into<String>, resource: impl Into<PathBuf>) -> Self {
        Self::new(password, None, KeystoreType::Pkcs12, Some(resource.into()))
    }

    /// Build settings from the `[keystore]` section, resolving the password.
    pub fn from_config(config: &KeystoreConfig) -> KeyStoreResult<Self> {
        let password = config
            .resolve_password()
            .map_err(|e| KeyStoreError::Init(e.to_string()))?;
        Ok(Self::new(
            password,
            config.config_source.clone(),
            config.keystore_type,
            config.resource.clone(),
        ))
    }

    pub(crate) fn validate(&self) -> KeyStoreResult<()> {
        if self.password.is_empty() {
            return Err(KeyStoreError::Init("password must not be empty".to_string()));
        }
        match self.keystore_type {
            KeystoreType::Pkcs11 if self.config_source.is_none() => Err(KeyStoreError::Init(
                "pkcs11 keystore requires a configuration source".to_string(),
            )),
            KeystoreType::Sealed | KeystoreType::Pkcs12 if self.resource.is_none() => Err(
                KeyStoreError::Init(format!("{} keystore requires a resource", self.keystore_type)),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for KeystoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreSettings")
            .field("password", &"<redacted>")
            .field("config_source", &self.config_source)
            .field("keystore_type", &self.keystore_type)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Cryptographic context backing a keystore, so callers pair the keys with
/// matching primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoProvider {
    pub keystore_type: KeystoreType,
    /// Backend description, e.g. the keystore file or PKCS#11 module.
    pub name: String,
    /// Cipher the server day keys are meant for.
    pub server_key_cipher: &'static str,
    /// Cipher the federation key is meant for.
    pub federation_cipher: &'static str,
    pub key_agreement: &'static str,
}

impl CryptoProvider {
    pub fn new(keystore_type: KeystoreType, name: impl Into<String>) -> Self {
        Self {
            keystore_type,
            name: name.into(),
            server_key_cipher: "SKINNY-64/192",
            federation_cipher: "AES-256-GCM",
            key_agreement: "X25519",
        }
    }
}

/// An opened keystore session.
pub trait KeystoreBackend: Send + Sync {
    fn provider(&self) -> CryptoProvider;

    /// Existence check; backend failures read as absent.
    fn contains_alias(&self, alias: &str) -> bool;

    fn aliases(&self) -> KeyStoreResult<Vec<String>>;

    /// Decode one entry, `Ok(None)` if the alias is absent.
    fn load_entry(&self, alias: &str) -> KeyStoreResult<Option<KeyEntry>>;
}

/// Open the backend described by `settings`.
pub fn open_backend(settings: &KeystoreSettings) -> KeyStoreResult<Box<dyn KeystoreBackend>> {
    settings.validate()?;
    match settings.keystore_type {
        KeystoreType::Sealed => Ok(Box::new(SealedKeystore::open(
            resource(settings)?,
            &settings.password,
        )?)),
        KeystoreType::Pkcs12 => open_pkcs12(settings),
        KeystoreType::Pkcs11 => open_pkcs11(settings),
    }
}

fn resource(settings: &KeystoreSettings) -> KeyStoreResult<&Path> {
    settings
        .resource
        .as_deref()
        .ok_or_else(|| KeyStoreError::Init("missing keystore resource".to_string()))
}

#[cfg(feature = "pkcs12")]
fn open_pkcs12(settings: &KeystoreSettings) -> KeyStoreResult<Box<dyn KeystoreBackend>> {
    Ok(Box::new(crate::pkcs12::Pkcs12Keystore::open(
        resource(settings)?,
        &settings.password,
    )?))
}

#[cfg(not(feature = "pkcs12"))]
fn open_pkcs12(_settings: &KeystoreSettings) -> KeyStoreResult<Box<dyn KeystoreBackend>> {
    Err(KeyStoreError::Init(
        "PKCS#12 support disabled (build with the pkcs12 feature)".to_string(),
    ))
}

#[cfg(feature = "hardware-hsm")]
fn open_pkcs11(settings: &KeystoreSettings) -> KeyStoreResult<Box<dyn KeystoreBackend>> {
    let config = settings
        .config_source
        .as_deref()
        .ok_or_else(|| KeyStoreError::Init("missing pkcs11 configuration".to_string()))?;
    Ok(Box::new(crate::pkcs11::Pkcs11Keystore::open(
        config,
        &settings.password,
    )?))
}

#[cfg(not(feature = "hardware-hsm"))]
fn open_pkcs11(_settings: &KeystoreSettings) -> KeyStoreResult<Box<dyn KeystoreBackend>> {
    Err(KeyStoreError::Init(
        "PKCS#11 support disabled (build with the hardware-hsm feature)".to_string(),
    ))
}
