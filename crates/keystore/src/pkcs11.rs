//! PKCS#11 hardware token backend.
//!
//! The engine configuration is a small TOML file naming the module and slot:
//!
//! ```toml
//! [pkcs11]
//! library = "/usr/lib/softhsm/libsofthsm2.so"
//! slot = 0
//! ```
//!
//! The keystore password is the user PIN. Keys are looked up by `CKA_LABEL`.

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error, RvError};
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};
use tracekeep_core::KeystoreType;
use tracing::{error, info};

use crate::backend::{CryptoProvider, KeystoreBackend};
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::material::{ExchangeKeyPair, KeyEntry, KeyMaterial};

#[derive(Debug, Deserialize)]
struct EngineConfig {
    pkcs11: ModuleConfig,
}

#[derive(Debug, Deserialize)]
struct ModuleConfig {
    library: PathBuf,
    /// Slot id; the first slot holding a token when absent.
    #[serde(default)]
    slot: Option<u64>,
}

/// Initialized contexts by module path, kept for the life of the process.
///
/// `C_Initialize` may run only once per module, and dropping the last handle
/// on a context runs `C_Finalize` under every session still open on it.
/// Reloads therefore open new sessions on the context created at init.
static CONTEXTS: OnceLock<Mutex<HashMap<PathBuf, Pkcs11>>> = OnceLock::new();

fn shared_context(library: &Path) -> KeyStoreResult<Pkcs11> {
    let contexts = CONTEXTS.get_or_init(Default::default);
    shared_in(contexts, library, || {
        let context = Pkcs11::new(library).map_err(|e| init_error(library, "load module", e))?;
        context
            .initialize(CInitializeArgs::OsThreads)
            .map_err(|e| init_error(library, "initialize", e))?;
        info!(library = %library.display(), "PKCS#11 module initialized");
        Ok(context)
    })
}

fn shared_in<T: Clone>(
    registry: &Mutex<HashMap<PathBuf, T>>,
    library: &Path,
    load: impl FnOnce() -> KeyStoreResult<T>,
) -> KeyStoreResult<T> {
    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(context) = registry.get(library) {
        return Ok(context.clone());
    }
    let context = load()?;
    registry.insert(library.to_path_buf(), context.clone());
    Ok(context)
}

/// Logged-in read-only session on a token.
pub struct Pkcs11Keystore {
    library: PathBuf,
    _context: Pkcs11,
    session: Mutex<Session>,
}

impl Pkcs11Keystore {
    pub fn open(config_source: &Path, pin: &str) -> KeyStoreResult<Self> {
        let content = std::fs::read_to_string(config_source)
            .map_err(|e| KeyStoreError::Init(format!("{}: {}", config_source.display(), e)))?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| KeyStoreError::Init(format!("{}: {}", config_source.display(), e)))?;
        let module = config.pkcs11;

        let context = shared_context(&module.library)?;

        let slot = select_slot(&context, module.slot)
            .map_err(|e| KeyStoreError::Init(format!("{}: {}", module.library.display(), e)))?;
        let session = context
            .open_ro_session(slot)
            .map_err(|e| init_error(&module.library, "open session", e))?;
        match session.login(UserType::User, Some(&AuthPin::new(pin.to_string()))) {
            // Login state is shared by every session of the context.
            Ok(()) | Err(Error::Pkcs11(RvError::UserAlreadyLoggedIn, ..)) => {}
            Err(e) => return Err(init_error(&module.library, "login", e)),
        }

        info!(
            library = %module.library.display(),
            slot = slot.id(),
            "PKCS#11 session opened"
        );
        Ok(Self {
            library: module.library,
            _context: context,
            session: Mutex::new(session),
        })
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&Session) -> cryptoki::error::Result<T>,
    ) -> KeyStoreResult<T> {
        let session = self
            .session
            .lock()
            .map_err(|_| KeyStoreError::Backend("PKCS#11 session lock poisoned".to_string()))?;
        f(&session).map_err(|e| {
            error!(library = %self.library.display(), "PKCS#11 call failed: {}", e);
            KeyStoreError::Backend(e.to_string())
        })
    }

    fn find_by_label(&self, alias: &str) -> KeyStoreResult<Option<ObjectHandle>> {
        let handles = self.with_session(|session| {
            session.find_objects(&[Attribute::Label(alias.as_bytes().to_vec())])
        })?;
        Ok(handles.into_iter().next())
    }
}

fn init_error(library: &Path, step: &str, e: Error) -> KeyStoreError {
    KeyStoreError::Init(format!("{}: {} failed: {}", library.display(), step, e))
}

fn select_slot(context: &Pkcs11, wanted: Option<u64>) -> Result<Slot, String> {
    let slots = context
        .get_slots_with_token()
        .map_err(|e| format!("listing slots failed: {}", e))?;
    match wanted {
        Some(id) => slots
            .into_iter()
            .find(|slot| slot.id() == id)
            .ok_or_else(|| format!("no token in slot {}", id)),
        None => slots
            .into_iter()
            .next()
            .ok_or_else(|| "no slot with a token".to_string()),
    }
}

impl KeystoreBackend for Pkcs11Keystore {
    fn provider(&self) -> CryptoProvider {
        CryptoProvider::new(
            KeystoreType::Pkcs11,
            format!("pkcs11:{}", self.library.display()),
        )
    }

    fn contains_alias(&self, alias: &str) -> bool {
        matches!(self.find_by_label(alias), Ok(Some(_)))
    }

    fn aliases(&self) -> KeyStoreResult<Vec<String>> {
        self.with_session(|session| {
            let mut labels = Vec::new();
            for handle in session.find_objects(&[])? {
                for attribute in session.get_attributes(handle, &[AttributeType::Label])? {
                    if let Attribute::Label(label) = attribute {
                        labels.push(String::from_utf8_lossy(&label).into_owned());
                    }
                }
            }
            labels.sort();
            labels.dedup();
            Ok(labels)
        })
    }

    fn load_entry(&self, alias: &str) -> KeyStoreResult<Option<KeyEntry>> {
        let Some(handle) = self.find_by_label(alias)? else {
            return Ok(None);
        };
        let attributes = self.with_session(|session| {
            session.get_attributes(handle, &[AttributeType::Class, AttributeType::Value])
        })?;

        let mut class = None;
        let mut value = None;
        for attribute in attributes {
            match attribute {
                Attribute::Class(c) => class = Some(c),
                Attribute::Value(v) => value = Some(v),
                _ => {}
            }
        }

        let invalid = |reason: &str| KeyStoreError::InvalidKeyMaterial {
            alias: alias.to_string(),
            reason: reason.to_string(),
        };
        let value = value.ok_or_else(|| invalid("value not extractable"))?;

        match class {
            Some(ObjectClass::PRIVATE_KEY) => {
                let secret: [u8; 32] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| invalid("expected a 32-byte X25519 private key"))?;
                Ok(Some(KeyEntry::KeyPair(ExchangeKeyPair::from_secret_bytes(
                    secret,
                ))))
            }
            Some(ObjectClass::SECRET_KEY) => Ok(Some(KeyEntry::Secret(KeyMaterial::new(value)))),
            _ => Err(invalid("unsupported object class")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_module_is_loaded_once_per_library() {
        let registry = Mutex::new(HashMap::new());
        let loads = Cell::new(0);
        let load = |value: u32| {
            loads.set(loads.get() + 1);
            Ok(value)
        };

        let softhsm = Path::new("/usr/lib/softhsm/libsofthsm2.so");
        assert_eq!(shared_in(&registry, softhsm, || load(1)).unwrap(), 1);
        assert_eq!(shared_in(&registry, softhsm, || load(2)).unwrap(), 1);
        assert_eq!(loads.get(), 1);

        let other = Path::new("/opt/vendor/libpkcs11.so");
        assert_eq!(shared_in(&registry, other, || load(3)).unwrap(), 3);
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let registry: Mutex<HashMap<PathBuf, u32>> = Mutex::new(HashMap::new());
        let library = Path::new("/usr/lib/softhsm/libsofthsm2.so");

        let failed = shared_in(&registry, library, || {
            Err(KeyStoreError::Init("module missing".to_string()))
        });
        assert!(matches!(failed, Err(KeyStoreError::Init(_))));
        assert_eq!(shared_in(&registry, library, || Ok(7)).unwrap(), 7);
    }
}
