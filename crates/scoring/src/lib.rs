//! Rule-based risk scoring for Tracekeep.
//!
//! Venue rules are keyed by `(venue_type, category1, category2)` with
//! wildcards; [`ScoringRuleIndex`] resolves the most specific rule for a venue
//! and [`RiskScoringEngine`] applies it to an exposure aggregate. Proximity
//! contacts are scored per user by a [`ProximityRule`].

pub mod cluster;
pub mod engine;
pub mod error;
pub mod index;
pub mod proximity;
pub mod rule;

pub use cluster::{period_max_slot, ClusterDetector, ClusterPeriod, ExposedVisit, ExposureWindow};
pub use engine::{ExposureAggregate, RiskScoringEngine, RiskVerdict, ScoringStrategy};
pub use error::{ScoringError, ScoringResult};
pub use index::ScoringRuleIndex;
pub use proximity::{EpochExposure, ProximityRule};
pub use rule::{Direction, ExposureTimeRule, RiskRule, RuleField, RuleKey};
