//! Composition root: keystore, epoch deriver and scoring indexes.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracekeep_core::{Config, ScoringConfig};
use tracekeep_keystore::{EpochKeyDeriver, KeyMaterialStore, KeystoreSettings};
use tracekeep_scoring::{ExposureTimeRule, ProximityRule, RiskRule, ScoringRuleIndex};
use tracing::{info, warn};

pub struct Scoring {
    pub risk: Option<ScoringRuleIndex<RiskRule>>,
    pub exposure_time: Option<ScoringRuleIndex<ExposureTimeRule>>,
    pub proximity: Option<ProximityRule>,
}

impl Scoring {
    /// Build the configured rule indexes; absent sections stay `None`.
    pub fn from_config(config: &ScoringConfig) -> Result<Self> {
        let risk = config
            .risk
            .as_ref()
            .map(ScoringRuleIndex::<RiskRule>::from_config)
            .transpose()
            .context("invalid [scoring.risk] rules")?;
        let exposure_time = config
            .exposure_time
            .as_ref()
            .map(ScoringRuleIndex::<ExposureTimeRule>::from_config)
            .transpose()
            .context("invalid [scoring.exposure_time] rules")?;
        let proximity = config
            .proximity
            .as_ref()
            .map(ProximityRule::from_config)
            .transpose()
            .context("invalid [scoring.proximity] parameters")?;

        let scoring = Self {
            risk,
            exposure_time,
            proximity,
        };
        let (risk_rules, exposure_time_rules) = scoring.rule_counts();
        info!(
            risk_rules,
            exposure_time_rules,
            proximity = scoring.proximity.is_some(),
            "Scoring rules loaded"
        );
        Ok(scoring)
    }

    /// Number of risk and exposure-time rules, `0` for an absent section.
    pub fn rule_counts(&self) -> (usize, usize) {
        (
            self.risk.as_ref().map_or(0, |index| index.len()),
            self.exposure_time.as_ref().map_or(0, |index| index.len()),
        )
    }

    pub fn resolve(&self, venue_type: u32, category1: u32, category2: u32) -> ResolvedRules {
        ResolvedRules {
            risk: self.risk.as_ref().map(|index| {
                index
                    .resolve(venue_type, category1, category2)
                    .cloned()
                    .map_err(|e| e.to_string())
            }),
            exposure_time: self.exposure_time.as_ref().map(|index| {
                index
                    .resolve(venue_type, category1, category2)
                    .cloned()
                    .map_err(|e| e.to_string())
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResolvedRules {
    pub risk: Option<Result<RiskRule, String>>,
    pub exposure_time: Option<Result<ExposureTimeRule, String>>,
}

pub struct Node {
    config: Config,
    settings: KeystoreSettings,
    store: Arc<KeyMaterialStore>,
    deriver: EpochKeyDeriver,
    scoring: Scoring,
}

impl Node {
    pub fn build(config: Config) -> Result<Self> {
        let settings =
            KeystoreSettings::from_config(&config.keystore).context("keystore settings")?;
        let store = Arc::new(KeyMaterialStore::init(&settings).context("opening keystore")?);
        let deriver = EpochKeyDeriver::from_config(Arc::clone(&store), &config.epoch)
            .context("epoch configuration")?;
        let scoring = Scoring::from_config(&config.scoring)?;

        Ok(Self {
            config,
            settings,
            store,
            deriver,
            scoring,
        })
    }

    pub fn store(&self) -> &Arc<KeyMaterialStore> {
        &self.store
    }

    /// Check that the key of the current epoch can be served.
    pub fn check_current_key(&self) {
        let Some(epoch) = self.deriver.clock().current_epoch() else {
            warn!("Service start is in the future; no current epoch");
            return;
        };
        match self.deriver.key_for_epoch(epoch, false) {
            Ok(key) => info!(
                epoch,
                fingerprint = %key.fingerprint(),
                "Current server key available"
            ),
            Err(e) => warn!(epoch, "Current server key unavailable: {}", e),
        }
    }

    pub fn reload(&self) -> bool {
        self.store.reload_hsm(&self.settings)
    }

    /// Reload the keystore every `reload.interval_secs` until Ctrl-C.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        self.check_current_key();
        let (risk_rules, exposure_time_rules) = self.scoring.rule_counts();
        info!(
            cached = ?self.store.hsm_cache_status(),
            risk_rules,
            exposure_time_rules,
            proximity = self.scoring.proximity.is_some(),
            "Node started"
        );

        let interval_secs = self.config.reload.interval_secs;
        if interval_secs == 0 {
            info!("Periodic keystore reload disabled");
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            return Ok(());
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick completes immediately; the store was just opened.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let node = Arc::clone(&self);
                    let reloaded = tokio::task::spawn_blocking(move || node.reload()).await?;
                    if reloaded {
                        self.check_current_key();
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracekeep_core::{ProximityConfig, RuleSetConfig};

    fn rules(raw: &[&str]) -> Option<RuleSetConfig> {
        Some(RuleSetConfig {
            rules: raw.iter().map(|r| r.to_string()).collect(),
            require_default_rule: true,
        })
    }

    #[test]
    fn test_absent_sections_build_no_index() {
        let scoring = Scoring::from_config(&ScoringConfig::default()).unwrap();
        assert!(scoring.risk.is_none());
        assert!(scoring.exposure_time.is_none());
        assert!(scoring.proximity.is_none());
        assert_eq!(scoring.rule_counts(), (0, 0));

        let resolved = scoring.resolve(1, 1, 1);
        assert!(resolved.risk.is_none());
        assert!(resolved.exposure_time.is_none());
    }

    #[test]
    fn test_resolve_reports_each_domain() {
        let scoring = Scoring::from_config(&ScoringConfig {
            risk: rules(&["*,*,*,3,1,3.0,2.0", "1,2,*,2,1,3.0,2.0"]),
            exposure_time: None,
            proximity: None,
        })
        .unwrap();

        let resolved = scoring.resolve(1, 2, 9);
        let risk = resolved.risk.unwrap().unwrap();
        assert_eq!(risk.cluster_threshold_backward, 2);
        assert!(resolved.exposure_time.is_none());
    }

    #[test]
    fn test_node_opens_and_reloads_sealed_keystore() {
        let dir = tempfile::TempDir::new().unwrap();
        let keystore = dir.path().join("keystore.json");
        let today = chrono::Utc::now().date_naive();
        tracekeep_keystore::provision_keystore(
            &keystore,
            "node-pin",
            today,
            1,
            tracekeep_keystore::KdfParams {
                m_cost: 64,
                t_cost: 1,
                p_cost: 1,
            },
        )
        .unwrap();

        let config = Config::from_toml_str(&format!(
            r#"
            [epoch]
            service_time_start = "2020-06-01"

            [keystore]
            type = "sealed"
            password = "node-pin"
            resource = "{}"

            [scoring.risk]
            rules = ["*,*,*,3,1,3.0,2.0"]
            "#,
            keystore.display()
        ))
        .unwrap();

        let node = Node::build(config).unwrap();
        assert_eq!(node.store().hsm_cache_status().len(), 4);
        assert_eq!(node.scoring.rule_counts(), (1, 0));
        assert!(node.reload());
        node.check_current_key();
    }

    #[test]
    fn test_missing_default_rule_is_rejected() {
        let result = Scoring::from_config(&ScoringConfig {
            risk: None,
            exposure_time: rules(&["1,*,*,3,3,3,3"]),
            proximity: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_proximity_parameters_are_validated() {
        let scoring = Scoring::from_config(&ScoringConfig {
            proximity: Some(ProximityConfig {
                r0: 0.0071,
                risk_threshold: 0.1,
            }),
            ..ScoringConfig::default()
        })
        .unwrap();
        assert_eq!(scoring.proximity.unwrap().risk_threshold, 0.1);

        let result = Scoring::from_config(&ScoringConfig {
            proximity: Some(ProximityConfig {
                r0: 0.0071,
                risk_threshold: 2.0,
            }),
            ..ScoringConfig::default()
        });
        assert!(result.is_err());
    }
}
