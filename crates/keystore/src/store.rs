//! Cached access to the key material held by a keystore backend.
//!
//! The store owns one [`CacheGeneration`] at a time: the opened backend plus
//! the entries decoded from it so far. Readers take a short read lock to clone
//! the current generation's `Arc` and work on that snapshot. A reload builds
//! the next generation off to the side and swaps it in only once it is fully
//! usable, so a failed reload never disturbs what is being served.

use chrono::{Days, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracekeep_core::{EpochClock, EpochId};
use tracing::{debug, error, info, warn};

use crate::alias::{missing_server_key_days, KeyAlias, SERVER_KEY_PREFIX};
use crate::backend::{open_backend, CryptoProvider, KeystoreBackend, KeystoreSettings};
use crate::error::{KeyStoreError, KeyStoreResult};
use crate::material::{ExchangeKeyPair, KeyEntry, KeyMaterial};

/// Upper bound on the day keys cached in each direction by prewarm.
///
/// Day keys provisioned further ahead or behind stay in the backend and are
/// decoded on first use, so they are absent from `hsm_cache_status` until
/// then.
pub const MAX_PREWARM_DAYS: u64 = 32;

#[derive(Clone)]
enum CachedEntry {
    Secret(Arc<KeyMaterial>),
    KeyPair(Arc<ExchangeKeyPair>),
}

impl From<KeyEntry> for CachedEntry {
    fn from(entry: KeyEntry) -> Self {
        match entry {
            KeyEntry::Secret(material) => CachedEntry::Secret(Arc::new(material)),
            KeyEntry::KeyPair(pair) => CachedEntry::KeyPair(Arc::new(pair)),
        }
    }
}

/// One backend session and the entries decoded from it.
struct CacheGeneration {
    backend: Box<dyn KeystoreBackend>,
    provider: CryptoProvider,
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl CacheGeneration {
    fn new(backend: Box<dyn KeystoreBackend>) -> Self {
        let provider = backend.provider();
        Self {
            backend,
            provider,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, alias: &str) -> Option<CachedEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .cloned()
    }

    fn contains(&self, alias: &str) -> bool {
        self.cached(alias).is_some() || self.backend.contains_alias(alias)
    }

    /// Serve from the cache, falling back to the backend and caching the
    /// decoded entry.
    fn load(&self, alias: &str) -> KeyStoreResult<CachedEntry> {
        if let Some(entry) = self.cached(alias) {
            return Ok(entry);
        }

        let entry = match self.backend.load_entry(alias) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(alias, "Keystore does not contain key");
                return Err(KeyStoreError::key_not_found(alias));
            }
            Err(e) => {
                error!(alias, "Unable to load key: {}", e);
                return Err(e);
            }
        };
        debug!(alias, kind = entry.kind(), fingerprint = %entry.fingerprint(), "Caching key");

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // A concurrent fill may have won; keep the first decoded entry.
        Ok(entries
            .entry(alias.to_string())
            .or_insert_with(|| entry.into())
            .clone())
    }

    fn secret(&self, alias: &str) -> KeyStoreResult<Arc<KeyMaterial>> {
        match self.load(alias)? {
            CachedEntry::Secret(material) => Ok(material),
            CachedEntry::KeyPair(_) => Err(KeyStoreError::InvalidKeyMaterial {
                alias: alias.to_string(),
                reason: "expected a secret key, found a key pair".to_string(),
            }),
        }
    }

    fn key_pair(&self, alias: &str) -> KeyStoreResult<Arc<ExchangeKeyPair>> {
        match self.load(alias)? {
            CachedEntry::KeyPair(pair) => Ok(pair),
            CachedEntry::Secret(_) => Err(KeyStoreError::InvalidKeyMaterial {
                alias: alias.to_string(),
                reason: "expected a key pair, found a secret key".to_string(),
            }),
        }
    }

    fn cached_aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        aliases.sort();
        aliases
    }

    fn report_day_key_gaps(&self) {
        let aliases = match self.backend.aliases() {
            Ok(aliases) => aliases,
            Err(e) => {
                warn!("Unable to list keystore aliases: {}", e);
                return;
            }
        };
        let day_keys = aliases
            .iter()
            .filter(|alias| alias.starts_with(SERVER_KEY_PREFIX))
            .count();
        let missing = missing_server_key_days(aliases.iter().map(String::as_str));
        if missing.is_empty() {
            info!(day_keys, "Server day keys are contiguous");
        } else {
            for day in &missing {
                warn!(%day, "No server key provisioned for day");
            }
        }
    }

    /// Cache the fixed keys and the day keys around `today`.
    fn prewarm(&self, today: NaiveDate) -> usize {
        info!(%today, "Pre-warming cache");
        let mut warmed = 0;

        for alias in [
            KeyAlias::federation(),
            KeyAlias::client_kek(),
            KeyAlias::server_exchange(),
        ] {
            if self.backend.contains_alias(alias.as_str()) && self.load(alias.as_str()).is_ok() {
                warmed += 1;
            }
        }

        let forward = (0..MAX_PREWARM_DAYS).map_while(|n| today.checked_add_days(Days::new(n)));
        warmed += self.prewarm_days(forward);
        let backward =
            (1..=MAX_PREWARM_DAYS).map_while(|n| today.checked_sub_days(Days::new(n)));
        warmed += self.prewarm_days(backward);

        info!(warmed, "Cache pre-warmed");
        warmed
    }

    /// Cache consecutive day keys, stopping at the first one missing.
    fn prewarm_days(&self, dates: impl Iterator<Item = NaiveDate>) -> usize {
        let mut warmed = 0;
        for date in dates {
            let alias = KeyAlias::server_key(date);
            if !self.backend.contains_alias(alias.as_str()) || self.load(alias.as_str()).is_err() {
                break;
            }
            warmed += 1;
        }
        warmed
    }
}

/// Thread-safe cache in front of the keystore backend.
///
/// Only obtainable through [`KeyMaterialStore::init`] or
/// [`KeyMaterialStore::from_backend`], so every instance is backed by an
/// opened keystore.
pub struct KeyMaterialStore {
    current: RwLock<Arc<CacheGeneration>>,
    reload_lock: Mutex<()>,
}

impl KeyMaterialStore {
    /// Open the keystore described by `settings` and prewarm the cache.
    pub fn init(settings: &KeystoreSettings) -> KeyStoreResult<Self> {
        info!(
            keystore_type = %settings.keystore_type,
            "Initializing keystore"
        );
        let backend = open_backend(settings).map_err(|e| {
            error!("Keystore initialization failed: {}", e);
            e
        })?;
        Ok(Self::from_backend(backend))
    }

    /// Wrap an already opened backend.
    pub fn from_backend(backend: Box<dyn KeystoreBackend>) -> Self {
        Self::from_backend_at(backend, Utc::now().date_naive())
    }

    pub(crate) fn from_backend_at(backend: Box<dyn KeystoreBackend>, today: NaiveDate) -> Self {
        let generation = CacheGeneration::new(backend);
        generation.report_day_key_gaps();
        generation.prewarm(today);
        info!(provider = %generation.provider.name, "Keystore ready");
        Self {
            current: RwLock::new(Arc::new(generation)),
            reload_lock: Mutex::new(()),
        }
    }

    fn current(&self) -> Arc<CacheGeneration> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Whether the alias is cached or present in the backend.
    pub fn contains(&self, alias: &str) -> bool {
        self.current().contains(alias)
    }

    /// Secret key stored under `alias`.
    pub fn get_entry(&self, alias: &str) -> KeyStoreResult<Arc<KeyMaterial>> {
        self.current().secret(alias)
    }

    /// Day key for the day of `epoch_id`, or the day before it when
    /// `take_previous_days_key` is set.
    pub fn server_key(
        &self,
        epoch_id: EpochId,
        clock: &EpochClock,
        take_previous_days_key: bool,
    ) -> KeyStoreResult<Arc<KeyMaterial>> {
        let mut day = clock.day_of_epoch(epoch_id);
        if take_previous_days_key {
            day -= 1;
        }
        let alias = day_key_alias(clock, day)?;
        self.current().secret(alias.as_str())
    }

    /// `nb_days` consecutive day keys ending at the day of `epoch_id`, oldest
    /// first. Fails if any of them is missing.
    pub fn server_keys(
        &self,
        epoch_id: EpochId,
        clock: &EpochClock,
        nb_days: u32,
    ) -> KeyStoreResult<Vec<Arc<KeyMaterial>>> {
        let generation = self.current();
        let last_day = clock.day_of_epoch(epoch_id);
        let first_day = last_day - i64::from(nb_days) + 1;

        (first_day..=last_day)
            .map(|day| {
                let alias = day_key_alias(clock, day)?;
                generation.secret(alias.as_str())
            })
            .collect()
    }

    pub fn federation_key(&self) -> KeyStoreResult<Arc<KeyMaterial>> {
        self.current().secret(KeyAlias::federation().as_str())
    }

    pub fn key_for_encrypting_client_keys(&self) -> KeyStoreResult<Arc<KeyMaterial>> {
        self.current().secret(KeyAlias::client_kek().as_str())
    }

    /// Server key pair, `None` if it is absent or unusable.
    pub fn server_key_pair(&self) -> Option<Arc<ExchangeKeyPair>> {
        match self.current().key_pair(KeyAlias::server_exchange().as_str()) {
            Ok(pair) => Some(pair),
            Err(e) => {
                error!("Unable to retrieve the server key pair: {}", e);
                None
            }
        }
    }

    pub fn provider(&self) -> CryptoProvider {
        self.current().provider.clone()
    }

    /// Reopen the backend and swap in a fresh cache generation. Returns
    /// `false` and keeps serving the previous generation on failure.
    pub fn reload_hsm(&self, settings: &KeystoreSettings) -> bool {
        match self.try_reload(settings) {
            Ok(()) => true,
            Err(e) => {
                error!("Could not reload keystore: {}", e);
                false
            }
        }
    }

    pub fn try_reload(&self, settings: &KeystoreSettings) -> KeyStoreResult<()> {
        self.reload_with(|| open_backend(settings), Utc::now().date_naive())
    }

    /// Swap in a generation built on `backend`, carrying over every cached
    /// alias the new backend still holds.
    pub fn reload_from_backend(&self, backend: Box<dyn KeystoreBackend>) -> KeyStoreResult<()> {
        self.reload_with(|| Ok(backend), Utc::now().date_naive())
    }

    /// Open the next backend and swap it in. The reload lock is held from the
    /// open through the swap, so reloads apply in the order they take it.
    pub(crate) fn reload_with<F>(&self, open: F, today: NaiveDate) -> KeyStoreResult<()>
    where
        F: FnOnce() -> KeyStoreResult<Box<dyn KeystoreBackend>>,
    {
        let _reload = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        info!("Keystore reload requested");
        let backend = open().map_err(|e| KeyStoreError::ReloadFailed(e.to_string()))?;
        self.swap_in(backend, today)
    }

    /// Caller holds the reload lock.
    fn swap_in(&self, backend: Box<dyn KeystoreBackend>, today: NaiveDate) -> KeyStoreResult<()> {
        let next = CacheGeneration::new(backend);
        let previous = self.current();

        let mut carried = 0;
        for alias in previous.cached_aliases() {
            if !next.backend.contains_alias(&alias) {
                info!(alias = %alias, "Dropping key no longer in keystore");
                continue;
            }
            next.load(&alias).map_err(|e| {
                KeyStoreError::ReloadFailed(format!("re-reading '{}' failed: {}", alias, e))
            })?;
            carried += 1;
        }

        next.report_day_key_gaps();
        next.prewarm(today);

        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        info!(carried, provider = %self.provider().name, "Keystore reload successful");
        Ok(())
    }

    /// Sorted aliases resident in the current cache generation.
    pub fn hsm_cache_status(&self) -> Vec<String> {
        let aliases = self.current().cached_aliases();
        if aliases.is_empty() {
            warn!("Keystore cache status yielded 0 keys");
        } else {
            info!(keys = aliases.len(), "Keystore cache status");
        }
        aliases
    }
}

fn day_key_alias(clock: &EpochClock, day: i64) -> KeyStoreResult<KeyAlias> {
    KeyAlias::server_key_for_day(clock, day)
        .ok_or_else(|| KeyStoreError::key_not_found(format!("{}day-{}", SERVER_KEY_PREFIX, day)))
}
