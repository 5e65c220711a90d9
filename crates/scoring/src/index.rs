//! Rule lookup by venue signature.

use std::collections::HashSet;
use std::str::FromStr;
use tracekeep_core::RuleSetConfig;
use tracing::{debug, warn};

use crate::engine::ScoringStrategy;
use crate::error::{ScoringError, ScoringResult};
use crate::rule::RuleKey;

/// Validated, immutable set of rules of one kind.
///
/// Resolution picks, among the rules compatible with a venue, the full match
/// if there is one. Otherwise a concrete `category1` outranks a concrete
/// `category2` and any venue-specific rule outranks the default rule. Among
/// equally specific rules the earliest declared one wins.
#[derive(Debug, Clone)]
pub struct ScoringRuleIndex<R> {
    rules: Vec<R>,
}

/// Specificity of a compatible, non-full-match rule.
fn rank(key: &RuleKey) -> (bool, bool, bool) {
    (
        !key.category1.is_wildcard(),
        !key.category2.is_wildcard(),
        !key.is_default(),
    )
}

impl<R: ScoringStrategy> ScoringRuleIndex<R> {
    /// Build an index, rejecting duplicate signatures and wildcarded venue
    /// types outside the default rule.
    pub fn new(rules: Vec<R>) -> ScoringResult<Self> {
        let mut seen = HashSet::with_capacity(rules.len());
        for rule in &rules {
            let key = rule.key();
            if key.venue_type.is_wildcard() && !key.is_default() {
                return Err(ScoringError::InvalidRuleConfiguration(format!(
                    "rule {}: a wildcard venue type is only allowed on the default rule",
                    key
                )));
            }
            if !seen.insert(*key) {
                return Err(ScoringError::InvalidRuleConfiguration(format!(
                    "rule {} is declared more than once",
                    key
                )));
            }
        }

        let index = Self { rules };
        if index.default_rule().is_none() {
            warn!("Scoring rules have no default rule; unmatched venues will not resolve");
        }
        Ok(index)
    }

    pub fn rules(&self) -> &[R] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn default_rule(&self) -> Option<&R> {
        self.rules.iter().find(|rule| rule.key().is_default())
    }

    pub fn resolve(&self, venue_type: u32, category1: u32, category2: u32) -> ScoringResult<&R> {
        let mut best: Option<(&R, (bool, bool, bool))> = None;

        for rule in &self.rules {
            let key = rule.key();
            if !key.is_compatible_with(venue_type, category1, category2) {
                continue;
            }
            if key.is_full_match() {
                debug!(rule = %key, "Resolved full match");
                return Ok(rule);
            }
            let candidate = rank(key);
            if best.map_or(true, |(_, current)| candidate > current) {
                best = Some((rule, candidate));
            }
        }

        match best {
            Some((rule, _)) => {
                debug!(venue_type, category1, category2, rule = %rule.key(), "Resolved rule");
                Ok(rule)
            }
            None => Err(ScoringError::NoMatchingRule {
                venue_type,
                category1,
                category2,
            }),
        }
    }
}

impl<R> ScoringRuleIndex<R>
where
    R: ScoringStrategy + FromStr<Err = ScoringError>,
{
    /// Parse and validate a configured rule set.
    pub fn from_config(config: &RuleSetConfig) -> ScoringResult<Self> {
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(position, raw)| {
                raw.parse::<R>().map_err(|e| match e {
                    ScoringError::Parse(reason) => {
                        ScoringError::Parse(format!("rule #{}: {}", position, reason))
                    }
                    other => other,
                })
            })
            .collect::<ScoringResult<Vec<R>>>()?;

        let index = Self::new(rules)?;
        if config.require_default_rule && index.default_rule().is_none() {
            return Err(ScoringError::InvalidRuleConfiguration(
                "exactly one default rule (*,*,*) is required".to_string(),
            ));
        }
        Ok(index)
    }
}
