//! Turning exposure aggregates into risk verdicts.

use serde::{Deserialize, Serialize};
use tracekeep_core::EpochId;
use tracing::debug;

use crate::error::ScoringResult;
use crate::index::ScoringRuleIndex;
use crate::proximity::{EpochExposure, ProximityRule};
use crate::rule::{Direction, ExposureTimeRule, RiskRule, RuleKey};

/// Exposure counts observed for one person or venue visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExposureAggregate {
    pub backward: u64,
    pub forward: u64,
    #[serde(default)]
    pub staff: bool,
}

impl ExposureAggregate {
    pub fn new(backward: u64, forward: u64) -> Self {
        Self {
            backward,
            forward,
            staff: false,
        }
    }

    pub fn staff(mut self) -> Self {
        self.staff = true;
        self
    }

    pub fn count(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Backward => self.backward,
            Direction::Forward => self.forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskVerdict {
    Cluster {
        backward: bool,
        forward: bool,
        /// Highest risk level among the detected clusters, `0.0` if none.
        risk_level: f32,
    },
    ExposureTime {
        backward_slots: u32,
        forward_slots: u32,
        score: f64,
    },
    /// Aggregated proximity contacts of one user.
    Proximity {
        total_risk: f64,
        /// Latest epoch that contributed, `None` if none did.
        last_contact_epoch: Option<EpochId>,
        at_risk: bool,
    },
}

impl RiskVerdict {
    pub fn is_at_risk(&self) -> bool {
        match self {
            RiskVerdict::Cluster {
                backward, forward, ..
            } => *backward || *forward,
            RiskVerdict::ExposureTime { score, .. } => *score > 0.0,
            RiskVerdict::Proximity { at_risk, .. } => *at_risk,
        }
    }
}

/// A rule that knows its venue key and how to score an aggregate.
pub trait ScoringStrategy {
    fn key(&self) -> &RuleKey;

    fn score(&self, aggregate: &ExposureAggregate) -> RiskVerdict;
}

impl ScoringStrategy for RiskRule {
    fn key(&self) -> &RuleKey {
        &self.key
    }

    fn score(&self, aggregate: &ExposureAggregate) -> RiskVerdict {
        let is_cluster = |direction| {
            aggregate.count(direction) >= u64::from(self.cluster_threshold(direction))
        };
        let backward = is_cluster(Direction::Backward);
        let forward = is_cluster(Direction::Forward);

        let mut risk_level = 0.0f32;
        if backward {
            risk_level = risk_level.max(self.risk_level_backward);
        }
        if forward {
            risk_level = risk_level.max(self.risk_level_forward);
        }

        RiskVerdict::Cluster {
            backward,
            forward,
            risk_level,
        }
    }
}

impl ScoringStrategy for ExposureTimeRule {
    fn key(&self) -> &RuleKey {
        &self.key
    }

    fn score(&self, aggregate: &ExposureAggregate) -> RiskVerdict {
        let backward_slots = self.exposure_time(aggregate.staff, Direction::Backward);
        let forward_slots = self.exposure_time(aggregate.staff, Direction::Forward);
        let score = aggregate.backward as f64 * f64::from(backward_slots)
            + aggregate.forward as f64 * f64::from(forward_slots);

        RiskVerdict::ExposureTime {
            backward_slots,
            forward_slots,
            score,
        }
    }
}

/// Stateless scorer; every call is deterministic and side-effect free.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScoringEngine;

impl RiskScoringEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn score<R: ScoringStrategy>(
        &self,
        aggregate: &ExposureAggregate,
        rule: &R,
    ) -> RiskVerdict {
        let verdict = rule.score(aggregate);
        debug!(rule = %rule.key(), ?aggregate, ?verdict, "Scored exposure aggregate");
        verdict
    }

    /// Resolve the rule for a venue, then score with it.
    pub fn score_venue<R: ScoringStrategy>(
        &self,
        index: &ScoringRuleIndex<R>,
        venue_type: u32,
        category1: u32,
        category2: u32,
        aggregate: &ExposureAggregate,
    ) -> ScoringResult<RiskVerdict> {
        let rule = index.resolve(venue_type, category1, category2)?;
        Ok(self.score(aggregate, rule))
    }

    /// Aggregate a user's proximity exposures since `latest_risk_epoch`.
    pub fn score_proximity(
        &self,
        rule: &ProximityRule,
        exposures: &[EpochExposure],
        latest_risk_epoch: Option<EpochId>,
    ) -> RiskVerdict {
        let verdict = rule.evaluate(exposures, latest_risk_epoch);
        debug!(epochs = exposures.len(), ?verdict, "Scored proximity exposures");
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn risk_rule() -> RiskRule {
        "1,*,*,3,1,3.0,2.0".parse().unwrap()
    }

    #[test]
    fn test_no_cluster_below_thresholds() {
        let verdict = RiskScoringEngine::new().score(&ExposureAggregate::new(2, 0), &risk_rule());
        assert_eq!(
            verdict,
            RiskVerdict::Cluster {
                backward: false,
                forward: false,
                risk_level: 0.0
            }
        );
        assert!(!verdict.is_at_risk());
    }

    #[test]
    fn test_threshold_is_inclusive_and_highest_level_wins() {
        let engine = RiskScoringEngine::new();
        assert_eq!(
            engine.score(&ExposureAggregate::new(0, 1), &risk_rule()),
            RiskVerdict::Cluster {
                backward: false,
                forward: true,
                risk_level: 2.0
            }
        );
        assert_eq!(
            engine.score(&ExposureAggregate::new(3, 1), &risk_rule()),
            RiskVerdict::Cluster {
                backward: true,
                forward: true,
                risk_level: 3.0
            }
        );
    }

    #[test]
    fn test_exposure_time_uses_staff_durations() {
        let rule: ExposureTimeRule = "1,*,*,3,2,6,5".parse().unwrap();
        let engine = RiskScoringEngine::new();

        assert_eq!(
            engine.score(&ExposureAggregate::new(2, 1), &rule),
            RiskVerdict::ExposureTime {
                backward_slots: 3,
                forward_slots: 2,
                score: 8.0
            }
        );
        assert_eq!(
            engine.score(&ExposureAggregate::new(2, 1).staff(), &rule),
            RiskVerdict::ExposureTime {
                backward_slots: 6,
                forward_slots: 5,
                score: 17.0
            }
        );
    }

    #[test]
    fn test_score_proximity_reports_aggregate() {
        let rule = ProximityRule::new(0.0071, 0.1).unwrap();
        let exposures = vec![
            EpochExposure::new(10, vec![12.0, 8.0]),
            EpochExposure::new(11, vec![5.0]),
        ];
        let verdict = RiskScoringEngine::new().score_proximity(&rule, &exposures, None);

        assert!(verdict.is_at_risk());
        let json = serde_json::to_value(verdict).unwrap();
        assert_eq!(json["kind"], "proximity");
        assert_eq!(json["last_contact_epoch"], 11);
    }

    #[test]
    fn test_score_venue_resolves_first() {
        let index = ScoringRuleIndex::new(vec![
            "*,*,*,10,10,1.0,1.0".parse::<RiskRule>().unwrap(),
            risk_rule(),
        ])
        .unwrap();
        let engine = RiskScoringEngine::new();
        let aggregate = ExposureAggregate::new(3, 0);

        assert!(engine
            .score_venue(&index, 1, 4, 4, &aggregate)
            .unwrap()
            .is_at_risk());
        assert!(!engine
            .score_venue(&index, 2, 4, 4, &aggregate)
            .unwrap()
            .is_at_risk());
    }
}
