//! Venue cluster detection and exposure windows.
//!
//! Visits are bucketed per venue into periods, each split into fixed slots.
//! A slot whose exposed-visit count reaches a rule threshold is part of a
//! cluster; consecutive such slots of one period form a single
//! [`ClusterPeriod`].

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::debug;

use crate::rule::{Direction, RiskRule};

/// Period duration meaning "unbounded".
pub const UNBOUNDED_PERIOD_HOURS: u32 = 255;

const SECONDS_PER_HOUR: u64 = 3_600;

/// Exposed-visit counts of one venue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposedVisit {
    /// Start of the period, in seconds.
    pub period_start: u64,
    pub time_slot: u32,
    pub backward_visits: u64,
    pub forward_visits: u64,
}

impl ExposedVisit {
    pub fn count(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Backward => self.backward_visits,
            Direction::Forward => self.forward_visits,
        }
    }
}

/// Contiguous run of cluster slots within one period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterPeriod {
    pub direction: Direction,
    pub period_start: u64,
    pub first_time_slot: u32,
    pub last_time_slot: u32,
    pub risk_level: f32,
}

impl ClusterPeriod {
    fn start(direction: Direction, visit: &ExposedVisit, risk_level: f32) -> Self {
        Self {
            direction,
            period_start: visit.period_start,
            first_time_slot: visit.time_slot,
            last_time_slot: visit.time_slot,
            risk_level,
        }
    }

    /// Whether `visit` is the slot right after this cluster.
    fn continues_with(&self, visit: &ExposedVisit) -> bool {
        self.period_start == visit.period_start
            && u64::from(visit.time_slot) == u64::from(self.last_time_slot) + 1
    }

    pub fn slot_count(&self) -> u32 {
        self.last_time_slot - self.first_time_slot + 1
    }

    /// Offset of the first slot from the period start, in seconds.
    pub fn start_offset_secs(&self, slot_duration_secs: u32) -> u64 {
        u64::from(self.first_time_slot) * u64::from(slot_duration_secs)
    }

    pub fn duration_secs(&self, slot_duration_secs: u32) -> u64 {
        u64::from(self.slot_count()) * u64::from(slot_duration_secs)
    }
}

/// Finds cluster periods in the exposed visits of one venue.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterDetector;

impl ClusterDetector {
    pub fn new() -> Self {
        Self
    }

    /// Backward and forward clusters of a venue, each direction in
    /// chronological order.
    pub fn detect(&self, visits: &[ExposedVisit], rule: &RiskRule) -> Vec<ClusterPeriod> {
        let mut sorted = visits.to_vec();
        sorted.sort_by_key(|visit| (visit.period_start, visit.time_slot));

        let mut periods = Vec::new();
        for direction in [Direction::Backward, Direction::Forward] {
            let threshold = u64::from(rule.cluster_threshold(direction));
            let risk_level = rule.risk_level(direction);
            let mut current: Option<ClusterPeriod> = None;

            for visit in &sorted {
                if visit.count(direction) < threshold {
                    periods.extend(current.take());
                    continue;
                }
                match current.as_mut() {
                    Some(period) if period.continues_with(visit) => {
                        period.last_time_slot = visit.time_slot;
                    }
                    _ => {
                        periods.extend(current.replace(ClusterPeriod::start(
                            direction, visit, risk_level,
                        )));
                    }
                }
            }
            periods.extend(current);
        }

        debug!(
            visits = visits.len(),
            clusters = periods.len(),
            rule = %rule.key,
            "Cluster detection done"
        );
        periods
    }
}

/// Slots of a period during which a visitor counts as exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureWindow {
    pub first_slot: u32,
    pub last_slot: u32,
}

impl ExposureWindow {
    /// `exposure_slots` on each side of the scan slot, clamped to
    /// `[0, period_max_slot]`.
    pub fn around(scan_slot: u32, exposure_slots: u32, period_max_slot: u32) -> Self {
        Self {
            first_slot: scan_slot.saturating_sub(exposure_slots),
            last_slot: scan_slot.saturating_add(exposure_slots).min(period_max_slot),
        }
    }

    pub fn slots(&self) -> RangeInclusive<u32> {
        self.first_slot..=self.last_slot
    }

    pub fn contains(&self, slot: u32) -> bool {
        self.slots().contains(&slot)
    }
}

/// Last zero-based slot of a period lasting `period_hours`.
pub fn period_max_slot(period_hours: u32, slot_duration_secs: u32) -> u32 {
    if period_hours == UNBOUNDED_PERIOD_HOURS || slot_duration_secs == 0 {
        return u32::MAX;
    }
    let slots = u64::from(period_hours) * SECONDS_PER_HOUR / u64::from(slot_duration_secs);
    u32::try_from(slots.saturating_sub(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(period_start: u64, time_slot: u32, backward: u64, forward: u64) -> ExposedVisit {
        ExposedVisit {
            period_start,
            time_slot,
            backward_visits: backward,
            forward_visits: forward,
        }
    }

    fn rule() -> RiskRule {
        "1,*,*,3,1,3.0,2.0".parse().unwrap()
    }

    #[test]
    fn test_contiguous_slots_form_one_cluster() {
        let visits = [
            visit(0, 6, 3, 0),
            visit(0, 4, 3, 0),
            visit(0, 5, 4, 0),
            visit(0, 7, 1, 0),
        ];
        let periods = ClusterDetector::new().detect(&visits, &rule());

        assert_eq!(
            periods,
            vec![ClusterPeriod {
                direction: Direction::Backward,
                period_start: 0,
                first_time_slot: 4,
                last_time_slot: 6,
                risk_level: 3.0,
            }]
        );
        assert_eq!(periods[0].duration_secs(1800), 3 * 1800);
        assert_eq!(periods[0].start_offset_secs(1800), 4 * 1800);
    }

    #[test]
    fn test_gap_or_new_period_splits_clusters() {
        let visits = [
            visit(0, 1, 0, 1),
            visit(0, 3, 0, 2),
            visit(3600, 4, 0, 1),
            visit(3600, 5, 0, 1),
        ];
        let periods = ClusterDetector::new().detect(&visits, &rule());
        let slots: Vec<(u64, u32, u32)> = periods
            .iter()
            .map(|p| (p.period_start, p.first_time_slot, p.last_time_slot))
            .collect();

        assert_eq!(slots, vec![(0, 1, 1), (0, 3, 3), (3600, 4, 5)]);
        assert!(periods.iter().all(|p| p.direction == Direction::Forward));
        assert!(periods.iter().all(|p| p.risk_level == 2.0));
    }

    #[test]
    fn test_no_cluster_below_threshold() {
        let visits = [visit(0, 1, 2, 0), visit(0, 2, 2, 0)];
        assert!(ClusterDetector::new().detect(&visits, &rule()).is_empty());
    }

    #[test]
    fn test_exposure_window_is_clamped() {
        assert_eq!(
            ExposureWindow::around(1, 3, 23),
            ExposureWindow {
                first_slot: 0,
                last_slot: 4
            }
        );
        let window = ExposureWindow::around(22, 3, 23);
        assert_eq!(window.slots(), 19..=23);
        assert!(window.contains(23));
        assert!(!window.contains(18));
    }

    #[test]
    fn test_period_max_slot() {
        assert_eq!(period_max_slot(24, 1800), 47);
        assert_eq!(period_max_slot(1, 900), 3);
        assert_eq!(period_max_slot(UNBOUNDED_PERIOD_HOURS, 1800), u32::MAX);
    }
}
