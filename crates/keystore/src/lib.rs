//! Key custody for Tracekeep.
//!
//! Serves the per-day server keys, the federation key, the client key
//! encryption key and the server exchange key pair out of a PKCS#11 token, a
//! PKCS#12 file or a sealed keystore file, behind a cache that can be reloaded
//! while in use.

pub mod alias;
pub mod backend;
pub mod deriver;
pub mod error;
pub mod keygen;
pub mod material;
#[cfg(feature = "hardware-hsm")]
pub mod pkcs11;
#[cfg(feature = "pkcs12")]
pub mod pkcs12;
pub mod sealed;
pub mod store;

pub use alias::{missing_server_key_days, KeyAlias, KeyPurpose};
pub use backend::{open_backend, CryptoProvider, KeystoreBackend, KeystoreSettings};
pub use deriver::EpochKeyDeriver;
pub use error::{KeyStoreError, KeyStoreResult};
pub use keygen::KeyGenStrategy;
pub use material::{ExchangeKeyPair, KeyEntry, KeyMaterial};
pub use sealed::{provision_keystore, KdfParams, SealedKeystore, SealedKeystoreWriter};
pub use store::{KeyMaterialStore, MAX_PREWARM_DAYS};
pub use tracekeep_core::KeystoreType;
