//! Decoded key entries.
//!
//! Secret bytes are zeroized on drop and never printed; `Debug` output and
//! logs only carry a BLAKE3-derived fingerprint.

use std::fmt;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

const FINGERPRINT_CONTEXT: &str = "tracekeep 2020-06-01 key fingerprint v1";

/// Raw symmetric key bytes.
pub struct KeyMaterial {
    bytes: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Short one-way identifier, safe to log.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.bytes)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// One decoded keystore entry.
#[derive(Debug)]
pub enum KeyEntry {
    Secret(KeyMaterial),
    KeyPair(ExchangeKeyPair),
}

impl KeyEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            KeyEntry::Secret(_) => "secret",
            KeyEntry::KeyPair(_) => "key pair",
        }
    }

    pub fn fingerprint(&self) -> String {
        match self {
            KeyEntry::Secret(material) => material.fingerprint(),
            KeyEntry::KeyPair(pair) => pair.fingerprint(),
        }
    }
}

/// Server X25519 key pair used for key agreement with clients.
pub struct ExchangeKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl ExchangeKeyPair {
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn diffie_hellman(&self, peer_public: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(peer_public)
    }

    pub(crate) fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(self.public.as_bytes())
    }
}

impl fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish()
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let digest = blake3::derive_key(FINGERPRINT_CONTEXT, bytes);
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_does_not_leak_key_bytes() {
        let material = KeyMaterial::new(vec![0xAB; 24]);
        let printed = format!("{:?}", material);
        assert!(!printed.contains("abab"));
        assert!(printed.contains("len: 24"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = KeyMaterial::new(vec![1; 32]);
        let b = KeyMaterial::new(vec![2; 32]);
        assert_eq!(a.fingerprint(), KeyMaterial::new(vec![1; 32]).fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_key_agreement_is_symmetric() {
        let server = ExchangeKeyPair::from_secret_bytes([7; 32]);
        let client = ExchangeKeyPair::from_secret_bytes([9; 32]);

        let server_side = server.diffie_hellman(&client.public_key());
        let client_side = client.diffie_hellman(&server.public_key());
        assert_eq!(server_side.as_bytes(), client_side.as_bytes());
    }
}
