//! Error types for rule resolution and scoring.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    /// No rule, not even a default one, applies to the venue.
    #[error("No scoring rule for venue {venue_type}/{category1}/{category2}")]
    NoMatchingRule {
        venue_type: u32,
        category1: u32,
        category2: u32,
    },

    /// The rule set violates a load-time constraint.
    #[error("Invalid rule configuration: {0}")]
    InvalidRuleConfiguration(String),

    /// A rule could not be parsed from its compact form.
    #[error("Invalid rule: {0}")]
    Parse(String),
}

pub type ScoringResult<T> = Result<T, ScoringError>;
