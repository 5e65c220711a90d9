//! Key generation strategies used when provisioning a keystore.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::alias::KeyPurpose;
use crate::material::{ExchangeKeyPair, KeyEntry, KeyMaterial};

/// Server day keys are 192-bit.
pub const SERVER_DAY_KEY_LEN: usize = 24;
pub const FEDERATION_KEY_LEN: usize = 32;
pub const CLIENT_KEK_LEN: usize = 32;

/// How to create the material for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGenStrategy {
    /// Uniformly random symmetric key of `length` bytes.
    Symmetric { length: usize },
    /// X25519 static key pair.
    X25519,
}

impl KeyGenStrategy {
    pub fn for_purpose(purpose: KeyPurpose) -> Self {
        match purpose {
            KeyPurpose::ServerDayKey => KeyGenStrategy::Symmetric {
                length: SERVER_DAY_KEY_LEN,
            },
            KeyPurpose::Federation => KeyGenStrategy::Symmetric {
                length: FEDERATION_KEY_LEN,
            },
            KeyPurpose::ClientKeyEncryption => KeyGenStrategy::Symmetric {
                length: CLIENT_KEK_LEN,
            },
            KeyPurpose::ServerExchange => KeyGenStrategy::X25519,
        }
    }

    pub fn generate<R: RngCore + CryptoRng>(&self, rng: &mut R) -> KeyEntry {
        match *self {
            KeyGenStrategy::Symmetric { length } => {
                let mut bytes = vec![0u8; length];
                rng.fill_bytes(&mut bytes);
                KeyEntry::Secret(KeyMaterial::new(bytes))
            }
            KeyGenStrategy::X25519 => {
                let mut secret = Zeroizing::new([0u8; 32]);
                rng.fill_bytes(secret.as_mut());
                KeyEntry::KeyPair(ExchangeKeyPair::from_secret_bytes(*secret))
            }
        }
    }
}
