//! Epoch to key resolution.

use std::sync::Arc;
use tracekeep_core::{CoreResult, EpochClock, EpochConfig, EpochId};

use crate::alias::KeyAlias;
use crate::error::KeyStoreResult;
use crate::material::KeyMaterial;
use crate::store::KeyMaterialStore;

/// Picks the day key valid at an epoch.
///
/// Clients may still present identifiers built with yesterday's key right
/// after midnight. Asking for the previous day's key is therefore honoured
/// only during the first `previous_day_tolerance_epochs` epochs of a day;
/// later in the day the current day's key is returned.
#[derive(Clone)]
pub struct EpochKeyDeriver {
    store: Arc<KeyMaterialStore>,
    clock: EpochClock,
    previous_day_tolerance_epochs: u32,
}

impl EpochKeyDeriver {
    pub fn new(
        store: Arc<KeyMaterialStore>,
        clock: EpochClock,
        previous_day_tolerance_epochs: u32,
    ) -> Self {
        Self {
            store,
            clock,
            previous_day_tolerance_epochs,
        }
    }

    pub fn from_config(store: Arc<KeyMaterialStore>, config: &EpochConfig) -> CoreResult<Self> {
        Ok(Self::new(
            store,
            config.clock()?,
            config.previous_day_tolerance_epochs,
        ))
    }

    pub fn clock(&self) -> &EpochClock {
        &self.clock
    }

    pub fn store(&self) -> &Arc<KeyMaterialStore> {
        &self.store
    }

    fn use_previous_day(&self, epoch_id: EpochId, take_previous_days_key: bool) -> bool {
        take_previous_days_key
            && self.clock.epoch_in_day(epoch_id) < self.previous_day_tolerance_epochs
    }

    /// Alias `key_for_epoch` would read, without touching the store. `None`
    /// when the day falls outside the calendar.
    pub fn alias_for_epoch(
        &self,
        epoch_id: EpochId,
        take_previous_days_key: bool,
    ) -> Option<KeyAlias> {
        let mut day = self.clock.day_of_epoch(epoch_id);
        if self.use_previous_day(epoch_id, take_previous_days_key) {
            day -= 1;
        }
        KeyAlias::server_key_for_day(&self.clock, day)
    }

    pub fn key_for_epoch(
        &self,
        epoch_id: EpochId,
        take_previous_days_key: bool,
    ) -> KeyStoreResult<Arc<KeyMaterial>> {
        self.store.server_key(
            epoch_id,
            &self.clock,
            self.use_previous_day(epoch_id, take_previous_days_key),
        )
    }

    /// `nb_days` day keys ending at the day of `epoch_id`, oldest first.
    pub fn keys_for_range(
        &self,
        epoch_id: EpochId,
        nb_days: u32,
    ) -> KeyStoreResult<Vec<Arc<KeyMaterial>>> {
        self.store.server_keys(epoch_id, &self.clock, nb_days)
    }
}
