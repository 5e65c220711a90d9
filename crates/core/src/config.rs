//! Configuration management for Tracekeep.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::epoch::{EpochClock, DEFAULT_EPOCHS_PER_DAY, DEFAULT_EPOCH_DURATION_SECS};
use crate::error::{CoreError, CoreResult};

/// Environment variable overriding `keystore.password`.
pub const KEYSTORE_PASSWORD_ENV: &str = "TRACEKEEP_KEYSTORE_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub epoch: EpochConfig,
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            default_filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochConfig {
    /// Service start date; epoch 0 begins at midnight UTC of this day.
    pub service_time_start: NaiveDate,
    #[serde(default = "default_epoch_duration_secs")]
    pub epoch_duration_secs: u32,
    #[serde(default = "default_epochs_per_day")]
    pub epochs_per_day: u32,
    /// Number of leading epochs of a day during which a caller asking for the
    /// previous day's key gets it.
    #[serde(default = "default_previous_day_tolerance")]
    pub previous_day_tolerance_epochs: u32,
}

impl EpochConfig {
    pub fn clock(&self) -> CoreResult<EpochClock> {
        EpochClock::new(
            self.service_time_start,
            self.epoch_duration_secs,
            self.epochs_per_day,
        )
    }
}

/// Kind of backing store holding the key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeystoreType {
    /// Hardware token reached through a PKCS#11 module.
    Pkcs11,
    /// Password-sealed keystore file.
    Sealed,
    /// PKCS#12 keystore file.
    Pkcs12,
}

impl std::fmt::Display for KeystoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeystoreType::Pkcs11 => write!(f, "pkcs11"),
            KeystoreType::Sealed => write!(f, "sealed"),
            KeystoreType::Pkcs12 => write!(f, "pkcs12"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreConfig {
    #[serde(rename = "type")]
    pub keystore_type: KeystoreType,
    /// Keystore password or token PIN. Prefer the environment variable.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Engine configuration (PKCS#11 module settings).
    #[serde(default)]
    pub config_source: Option<PathBuf>,
    /// Keystore resource (sealed or PKCS#12 keystore file).
    #[serde(default)]
    pub resource: Option<PathBuf>,
}

impl KeystoreConfig {
    /// Password from `TRACEKEEP_KEYSTORE_PASSWORD`, falling back to the file.
    pub fn resolve_password(&self) -> CoreResult<String> {
        match std::env::var(KEYSTORE_PASSWORD_ENV) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => self.password.clone().filter(|p| !p.is_empty()).ok_or_else(|| {
                CoreError::Config(format!(
                    "keystore password missing: set {} or keystore.password",
                    KEYSTORE_PASSWORD_ENV
                ))
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReloadConfig {
    /// Period of the background keystore reload, `0` disables it.
    #[serde(default)]
    pub interval_secs: u64,
}

/// Optional scoring sections; an absent section means the matching rule
/// index is not built.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScoringConfig {
    #[serde(default)]
    pub risk: Option<RuleSetConfig>,
    #[serde(default)]
    pub exposure_time: Option<RuleSetConfig>,
    #[serde(default)]
    pub proximity: Option<ProximityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetConfig {
    /// Rules in compact form, e.g. `"3,*,*,3,1,3.0,2.0"`.
    pub rules: Vec<String>,
    #[serde(default = "default_true")]
    pub require_default_rule: bool,
}

/// Aggregation of a user's proximity contact scores into one risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProximityConfig {
    /// Weight of the summed contact scores in `1 - exp(-r0 * sum)`.
    #[serde(default = "default_r0")]
    pub r0: f64,
    /// Aggregated risk at or above which the user is notified.
    pub risk_threshold: f64,
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            CoreError::Config(reason) => {
                CoreError::Config(format!("{}: {}", path.as_ref().display(), reason))
            }
            other => other,
        })?;
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> CoreResult<()> {
        self.epoch.clock()?;
        if self.epoch.previous_day_tolerance_epochs > self.epoch.epochs_per_day {
            return Err(CoreError::Config(format!(
                "previous_day_tolerance_epochs ({}) exceeds epochs_per_day ({})",
                self.epoch.previous_day_tolerance_epochs, self.epoch.epochs_per_day
            )));
        }
        match self.keystore.keystore_type {
            KeystoreType::Pkcs11 if self.keystore.config_source.is_none() => Err(
                CoreError::Config("pkcs11 keystore requires keystore.config_source".to_string()),
            ),
            KeystoreType::Sealed | KeystoreType::Pkcs12 if self.keystore.resource.is_none() => {
                Err(CoreError::Config(format!(
                    "{} keystore requires keystore.resource",
                    self.keystore.keystore_type
                )))
            }
            _ => Ok(()),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_epoch_duration_secs() -> u32 {
    DEFAULT_EPOCH_DURATION_SECS
}

fn default_epochs_per_day() -> u32 {
    DEFAULT_EPOCHS_PER_DAY
}

fn default_previous_day_tolerance() -> u32 {
    1
}

fn default_r0() -> f64 {
    0.0071
}

fn default_true() -> bool {
    true
}
