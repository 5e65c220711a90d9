//! Core functionality for the Tracekeep key custody and scoring services.
//!
//! This crate provides the configuration model, epoch arithmetic, logging
//! setup and error types shared across the Tracekeep workspace.

pub mod config;
pub mod epoch;
pub mod error;
pub mod logging;

pub use config::{
    Config, EpochConfig, KeystoreConfig, KeystoreType, LogFormat, LoggingConfig, ProximityConfig,
    ReloadConfig, RuleSetConfig, ScoringConfig, KEYSTORE_PASSWORD_ENV,
};
pub use epoch::{EpochClock, EpochId, DEFAULT_EPOCHS_PER_DAY, DEFAULT_EPOCH_DURATION_SECS};
pub use error::{CoreError, CoreResult};
