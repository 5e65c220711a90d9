//! Per-user aggregation of proximity contact scores.
//!
//! Every contact a user had during an epoch leaves a score. The scores
//! recorded since the user was last notified are summed and mapped onto
//! `[0, 1)` as `1 - exp(-r0 * sum)`; the user is at risk once that value
//! reaches the configured threshold.

use serde::{Deserialize, Serialize};
use tracekeep_core::{EpochId, ProximityConfig};
use tracing::info;

use crate::engine::RiskVerdict;
use crate::error::{ScoringError, ScoringResult};

/// Contact scores recorded during one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochExposure {
    pub epoch_id: EpochId,
    pub scores: Vec<f64>,
}

impl EpochExposure {
    pub fn new(epoch_id: EpochId, scores: Vec<f64>) -> Self {
        Self { epoch_id, scores }
    }

    pub fn total(&self) -> f64 {
        self.scores.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProximityRule {
    pub r0: f64,
    pub risk_threshold: f64,
}

impl ProximityRule {
    /// `r0` must be a non-negative number and `risk_threshold` lie in
    /// `(0, 1]`.
    pub fn new(r0: f64, risk_threshold: f64) -> ScoringResult<Self> {
        if !r0.is_finite() || r0 < 0.0 {
            return Err(ScoringError::InvalidRuleConfiguration(format!(
                "r0 must be a non-negative number, got {}",
                r0
            )));
        }
        if !(risk_threshold > 0.0 && risk_threshold <= 1.0) {
            return Err(ScoringError::InvalidRuleConfiguration(format!(
                "risk_threshold must lie in (0, 1], got {}",
                risk_threshold
            )));
        }
        Ok(Self { r0, risk_threshold })
    }

    pub fn from_config(config: &ProximityConfig) -> ScoringResult<Self> {
        Self::new(config.r0, config.risk_threshold)
    }

    pub fn aggregate(&self, scores: impl IntoIterator<Item = f64>) -> f64 {
        let sum: f64 = scores.into_iter().sum();
        1.0 - (-self.r0 * sum).exp()
    }

    /// Aggregate the exposures of epochs after `latest_risk_epoch`, or all of
    /// them when the user was never notified.
    pub fn evaluate(
        &self,
        exposures: &[EpochExposure],
        latest_risk_epoch: Option<EpochId>,
    ) -> RiskVerdict {
        let recent: Vec<&EpochExposure> = exposures
            .iter()
            .filter(|exposure| latest_risk_epoch.map_or(true, |latest| exposure.epoch_id > latest))
            .collect();

        let total_risk = self.aggregate(recent.iter().map(|exposure| exposure.total()));
        let last_contact_epoch = recent.iter().map(|exposure| exposure.epoch_id).max();
        let at_risk = total_risk >= self.risk_threshold;
        if at_risk {
            info!(
                ?latest_risk_epoch,
                total_risk,
                risk_threshold = self.risk_threshold,
                "Risk detected"
            );
        }

        RiskVerdict::Proximity {
            total_risk,
            last_contact_epoch,
            at_risk,
        }
    }
}
