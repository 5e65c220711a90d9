//! Error types for key custody operations.

use thiserror::Error;

/// Errors that can occur while opening, reading or reloading a keystore.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The backing store could not be opened. Nothing can be served until a
    /// new store is initialized.
    #[error("Keystore initialization failed: {0}")]
    Init(String),

    /// No entry for the alias in the cache or the backend.
    #[error("Key not found: {alias}")]
    KeyNotFound { alias: String },

    /// Reload failed; the previous cache generation is still in use.
    #[error("Keystore reload failed: {0}")]
    ReloadFailed(String),

    /// The backend failed while serving a request.
    #[error("Keystore backend error: {0}")]
    Backend(String),

    /// The entry exists but cannot be used as requested.
    #[error("Invalid key material for '{alias}': {reason}")]
    InvalidKeyMaterial { alias: String, reason: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyStoreError {
    pub fn key_not_found(alias: impl Into<String>) -> Self {
        KeyStoreError::KeyNotFound {
            alias: alias.into(),
        }
    }
}

/// Result type for keystore operations.
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;
