//! Rule resolution tests
//!
//! Covers the documented venue rule vectors plus property checks:
//! - Resolution is deterministic
//! - A full match always wins
//! - The resolved rule is the most specific compatible one

use proptest::prelude::*;
use std::collections::HashSet;
use tracekeep_core::RuleSetConfig;
use tracekeep_scoring::{
    ExposureAggregate, ExposureTimeRule, RiskRule, RiskScoringEngine, RiskVerdict, RuleField,
    RuleKey, ScoringRuleIndex,
};

fn risk_index(raw: &[&str]) -> ScoringRuleIndex<RiskRule> {
    ScoringRuleIndex::from_config(&RuleSetConfig {
        rules: raw.iter().map(|r| r.to_string()).collect(),
        require_default_rule: true,
    })
    .unwrap()
}

fn position(index: &ScoringRuleIndex<RiskRule>, resolved: &RiskRule) -> usize {
    index
        .rules()
        .iter()
        .position(|rule| std::ptr::eq(rule, resolved))
        .unwrap()
}

#[test]
fn test_venue_rule_vectors() {
    let index = risk_index(&[
        "*,*,*,3,1,3.0,2.0",
        "1,1,1,3,1,3.0,2.0",
        "1,2,3,3,1,3.0,2.0",
        "3,*,*,3,1,3.0,2.0",
        "3,1,*,3,1,3.0,2.0",
        "3,*,2,3,1,3.0,2.0",
        "3,*,3,3,1,3.0,2.0",
        "3,1,2,3,1,3.0,2.0",
    ]);

    let cases = [
        ((2, 1, 1), 0),
        ((1, 1, 1), 1),
        ((1, 2, 3), 2),
        ((3, 2, 1), 3),
        ((3, 1, 5), 4),
        ((3, 2, 2), 5),
        ((3, 1, 2), 7),
        ((3, 1, 3), 4),
    ];
    for ((venue_type, category1, category2), expected) in cases {
        let resolved = index.resolve(venue_type, category1, category2).unwrap();
        assert_eq!(
            position(&index, resolved),
            expected,
            "venue ({}, {}, {})",
            venue_type,
            category1,
            category2
        );
    }
}

#[test]
fn test_specificity_scenario() {
    let index = risk_index(&[
        "*,*,*,1,1,0.0,0.0",
        "1,*,*,1,1,1.0,1.0",
        "1,2,*,1,1,2.0,2.0",
        "1,2,3,1,1,3.0,3.0",
    ]);

    let level = |t, c1, c2| index.resolve(t, c1, c2).unwrap().risk_level_backward;
    assert_eq!(level(1, 2, 3), 3.0);
    assert_eq!(level(1, 2, 4), 2.0);
    assert_eq!(level(1, 5, 3), 1.0);
    assert_eq!(level(2, 2, 3), 0.0);
}

#[test]
fn test_exposure_time_rules_from_config() {
    let index: ScoringRuleIndex<ExposureTimeRule> = ScoringRuleIndex::from_config(&RuleSetConfig {
        rules: vec!["*,*,*,3,3,3,3".to_string(), "4,1,*,2,2,6,6".to_string()],
        require_default_rule: true,
    })
    .unwrap();
    let engine = RiskScoringEngine::new();

    let verdict = engine
        .score_venue(&index, 4, 1, 9, &ExposureAggregate::new(1, 1).staff())
        .unwrap();
    assert_eq!(
        verdict,
        RiskVerdict::ExposureTime {
            backward_slots: 6,
            forward_slots: 6,
            score: 12.0
        }
    );
}

fn field(max: u32) -> impl Strategy<Value = RuleField> {
    prop_oneof![
        1 => Just(RuleField::Any),
        3 => (0..max).prop_map(RuleField::Value),
    ]
}

fn rule_set() -> impl Strategy<Value = Vec<RiskRule>> {
    prop::collection::vec((1..4u32, field(3), field(3), 0..5u32), 0..24).prop_map(|specs| {
        let mut seen = HashSet::new();
        let mut rules = vec![RiskRule {
            key: RuleKey::DEFAULT,
            cluster_threshold_backward: 1,
            cluster_threshold_forward: 1,
            risk_level_backward: 0.0,
            risk_level_forward: 0.0,
        }];
        seen.insert(RuleKey::DEFAULT);
        for (venue_type, category1, category2, threshold) in specs {
            let key = RuleKey::new(RuleField::Value(venue_type), category1, category2);
            if seen.insert(key) {
                rules.push(RiskRule {
                    key,
                    cluster_threshold_backward: threshold,
                    cluster_threshold_forward: threshold,
                    risk_level_backward: 1.0,
                    risk_level_forward: 1.0,
                });
            }
        }
        rules
    })
}

fn specificity(key: &RuleKey) -> (bool, bool, bool) {
    (
        !key.category1.is_wildcard(),
        !key.category2.is_wildcard(),
        !key.is_default(),
    )
}

proptest! {
    #[test]
    fn resolution_is_deterministic(
        rules in rule_set(),
        t in 0..5u32,
        c1 in 0..4u32,
        c2 in 0..4u32,
    ) {
        let index = ScoringRuleIndex::new(rules).unwrap();
        let first = index.resolve(t, c1, c2).unwrap();
        let second = index.resolve(t, c1, c2).unwrap();
        prop_assert!(std::ptr::eq(first, second));
        prop_assert!(first.key.is_compatible_with(t, c1, c2));
    }

    #[test]
    fn full_match_always_wins(rules in rule_set(), t in 1..4u32, c1 in 0..3u32, c2 in 0..3u32) {
        let index = ScoringRuleIndex::new(rules).unwrap();
        let full = RuleKey::new(RuleField::Value(t), RuleField::Value(c1), RuleField::Value(c2));
        let resolved = index.resolve(t, c1, c2).unwrap();
        if index.rules().iter().any(|rule| rule.key == full) {
            prop_assert_eq!(resolved.key, full);
        } else {
            prop_assert!(!resolved.key.is_full_match());
        }
    }

    #[test]
    fn resolved_rule_is_most_specific(
        rules in rule_set(),
        t in 1..4u32,
        c1 in 0..3u32,
        c2 in 0..3u32,
    ) {
        let index = ScoringRuleIndex::new(rules).unwrap();
        let resolved = index.resolve(t, c1, c2).unwrap();
        if !resolved.key.is_full_match() {
            let best = specificity(&resolved.key);
            for rule in index.rules().iter().filter(|r| r.key.is_compatible_with(t, c1, c2)) {
                prop_assert!(specificity(&rule.key) <= best);
            }
        }
    }
}
