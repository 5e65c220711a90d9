//! Scoring rules and their venue keys.
//!
//! A rule applies to a `(venue_type, category1, category2)` tuple where each
//! field is either a concrete value or the wildcard. In configuration the
//! wildcard is written `*` or `-1`; rules use a compact comma-separated form,
//! e.g. `3,1,*,3,1,3.0,2.0`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ScoringError, ScoringResult};

pub const WILDCARD: &str = "*";
pub const WILDCARD_VALUE: i64 = -1;

/// One field of a rule key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawField", into = "RawField")]
pub enum RuleField {
    Any,
    Value(u32),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawField {
    Number(i64),
    Text(String),
}

impl TryFrom<RawField> for RuleField {
    type Error = ScoringError;

    fn try_from(raw: RawField) -> ScoringResult<Self> {
        match raw {
            RawField::Number(n) => RuleField::from_number(n),
            RawField::Text(s) => s.parse(),
        }
    }
}

impl From<RuleField> for RawField {
    fn from(field: RuleField) -> Self {
        match field {
            RuleField::Any => RawField::Text(WILDCARD.to_string()),
            RuleField::Value(v) => RawField::Number(i64::from(v)),
        }
    }
}

impl RuleField {
    fn from_number(n: i64) -> ScoringResult<Self> {
        if n == WILDCARD_VALUE {
            return Ok(RuleField::Any);
        }
        u32::try_from(n)
            .map(RuleField::Value)
            .map_err(|_| {
                ScoringError::Parse(format!("'{}' is neither a wildcard nor a valid value", n))
            })
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, RuleField::Any)
    }

    pub fn matches(&self, value: u32) -> bool {
        match self {
            RuleField::Any => true,
            RuleField::Value(v) => *v == value,
        }
    }
}

impl FromStr for RuleField {
    type Err = ScoringError;

    fn from_str(s: &str) -> ScoringResult<Self> {
        let s = s.trim();
        if s == WILDCARD {
            return Ok(RuleField::Any);
        }
        let n: i64 = s
            .parse()
            .map_err(|_| {
                ScoringError::Parse(format!("'{}' is neither a wildcard nor a number", s))
            })?;
        RuleField::from_number(n)
    }
}

impl fmt::Display for RuleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleField::Any => f.write_str(WILDCARD),
            RuleField::Value(v) => write!(f, "{}", v),
        }
    }
}

/// Venue signature a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleKey {
    pub venue_type: RuleField,
    pub category1: RuleField,
    pub category2: RuleField,
}

impl RuleKey {
    pub const DEFAULT: RuleKey = RuleKey {
        venue_type: RuleField::Any,
        category1: RuleField::Any,
        category2: RuleField::Any,
    };

    pub fn new(venue_type: RuleField, category1: RuleField, category2: RuleField) -> Self {
        Self {
            venue_type,
            category1,
            category2,
        }
    }

    /// All three fields wildcarded.
    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }

    /// No wildcard at all.
    pub fn is_full_match(&self) -> bool {
        self.wildcard_count() == 0
    }

    pub fn wildcard_count(&self) -> usize {
        [self.venue_type, self.category1, self.category2]
            .iter()
            .filter(|field| field.is_wildcard())
            .count()
    }

    pub fn is_compatible_with(&self, venue_type: u32, category1: u32, category2: u32) -> bool {
        self.venue_type.matches(venue_type)
            && self.category1.matches(category1)
            && self.category2.matches(category2)
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.venue_type, self.category1, self.category2)
    }
}

/// Direction of an exposure relative to the contaminating visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Exposed before the contaminating visit.
    Backward,
    /// Exposed after it.
    Forward,
}

/// Cluster thresholds and risk levels for a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    #[serde(flatten)]
    pub key: RuleKey,
    pub cluster_threshold_backward: u32,
    pub cluster_threshold_forward: u32,
    pub risk_level_backward: f32,
    pub risk_level_forward: f32,
}

impl RiskRule {
    pub fn cluster_threshold(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Backward => self.cluster_threshold_backward,
            Direction::Forward => self.cluster_threshold_forward,
        }
    }

    pub fn risk_level(&self, direction: Direction) -> f32 {
        match direction {
            Direction::Backward => self.risk_level_backward,
            Direction::Forward => self.risk_level_forward,
        }
    }
}

/// Exposure durations, in slots, for visitors and staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureTimeRule {
    #[serde(flatten)]
    pub key: RuleKey,
    pub exposure_time_backward: u32,
    pub exposure_time_forward: u32,
    pub exposure_time_staff_backward: u32,
    pub exposure_time_staff_forward: u32,
}

impl ExposureTimeRule {
    pub fn exposure_time(&self, staff: bool, direction: Direction) -> u32 {
        match (staff, direction) {
            (false, Direction::Backward) => self.exposure_time_backward,
            (false, Direction::Forward) => self.exposure_time_forward,
            (true, Direction::Backward) => self.exposure_time_staff_backward,
            (true, Direction::Forward) => self.exposure_time_staff_forward,
        }
    }
}

const COMPACT_FIELDS: usize = 7;

fn split_compact(s: &str) -> ScoringResult<(RuleKey, Vec<&str>)> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != COMPACT_FIELDS {
        return Err(ScoringError::Parse(format!(
            "'{}': expected {} comma-separated fields, got {}",
            s,
            COMPACT_FIELDS,
            parts.len()
        )));
    }
    let key = RuleKey::new(parts[0].parse()?, parts[1].parse()?, parts[2].parse()?);
    Ok((key, parts[3..].to_vec()))
}

fn parse_param<T: FromStr>(rule: &str, name: &str, value: &str) -> ScoringResult<T> {
    value
        .parse()
        .map_err(|_| ScoringError::Parse(format!("'{}': invalid {} '{}'", rule, name, value)))
}

fn parse_risk_level(rule: &str, name: &str, value: &str) -> ScoringResult<f32> {
    let level: f32 = parse_param(rule, name, value)?;
    if !level.is_finite() || level < 0.0 {
        return Err(ScoringError::Parse(format!(
            "'{}': {} must be a non-negative number",
            rule, name
        )));
    }
    Ok(level)
}

/// `type,cat1,cat2,thresholdBackward,thresholdForward,riskBackward,riskForward`
impl FromStr for RiskRule {
    type Err = ScoringError;

    fn from_str(s: &str) -> ScoringResult<Self> {
        let (key, params) = split_compact(s)?;
        Ok(Self {
            key,
            cluster_threshold_backward: parse_param(s, "backward threshold", params[0])?,
            cluster_threshold_forward: parse_param(s, "forward threshold", params[1])?,
            risk_level_backward: parse_risk_level(s, "backward risk level", params[2])?,
            risk_level_forward: parse_risk_level(s, "forward risk level", params[3])?,
        })
    }
}

/// `type,cat1,cat2,exposureBackward,exposureForward,staffBackward,staffForward`
impl FromStr for ExposureTimeRule {
    type Err = ScoringError;

    fn from_str(s: &str) -> ScoringResult<Self> {
        let (key, params) = split_compact(s)?;
        Ok(Self {
            key,
            exposure_time_backward: parse_param(s, "backward exposure time", params[0])?,
            exposure_time_forward: parse_param(s, "forward exposure time", params[1])?,
            exposure_time_staff_backward: parse_param(
                s,
                "staff backward exposure time",
                params[2],
            )?,
            exposure_time_staff_forward: parse_param(s, "staff forward exposure time", params[3])?,
        })
    }
}
