//! Epoch arithmetic relative to the service start.
//!
//! Time is split into fixed-duration slots called *epochs*, counted from
//! midnight UTC of the service start date. Epochs tile a day exactly, so the
//! day containing an epoch is `epoch_id / epochs_per_day` and every day number
//! maps onto one calendar date.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{CoreError, CoreResult};

/// Index of a fixed-duration slot since the service start.
pub type EpochId = u32;

/// Default epoch duration (15 minutes).
pub const DEFAULT_EPOCH_DURATION_SECS: u32 = 900;

/// Default number of epochs in a day.
pub const DEFAULT_EPOCHS_PER_DAY: u32 = 96;

const SECONDS_PER_DAY: u64 = 86_400;

/// Converts between instants, epochs, day numbers and calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochClock {
    service_start: NaiveDate,
    epoch_duration_secs: u32,
    epochs_per_day: u32,
}

impl EpochClock {
    /// Create a clock, rejecting parameters whose epochs do not tile a day.
    pub fn new(
        service_start: NaiveDate,
        epoch_duration_secs: u32,
        epochs_per_day: u32,
    ) -> CoreResult<Self> {
        if epoch_duration_secs == 0 || epochs_per_day == 0 {
            return Err(CoreError::EpochClock(
                "epoch duration and epochs per day must be positive".to_string(),
            ));
        }
        let covered = u64::from(epoch_duration_secs) * u64::from(epochs_per_day);
        if covered != SECONDS_PER_DAY {
            return Err(CoreError::EpochClock(format!(
                "{} epochs of {}s cover {}s, expected {}s",
                epochs_per_day, epoch_duration_secs, covered, SECONDS_PER_DAY
            )));
        }

        Ok(Self {
            service_start,
            epoch_duration_secs,
            epochs_per_day,
        })
    }

    /// Clock with 96 epochs of 15 minutes per day.
    pub fn with_defaults(service_start: NaiveDate) -> Self {
        Self {
            service_start,
            epoch_duration_secs: DEFAULT_EPOCH_DURATION_SECS,
            epochs_per_day: DEFAULT_EPOCHS_PER_DAY,
        }
    }

    pub fn service_start(&self) -> NaiveDate {
        self.service_start
    }

    pub fn epoch_duration_secs(&self) -> u32 {
        self.epoch_duration_secs
    }

    pub fn epochs_per_day(&self) -> u32 {
        self.epochs_per_day
    }

    /// Midnight UTC of the service start date.
    pub fn service_start_instant(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.service_start.and_time(NaiveTime::default()))
    }

    /// Day number (0 for the service start date) containing `epoch_id`.
    pub fn day_of_epoch(&self, epoch_id: EpochId) -> i64 {
        i64::from(epoch_id / self.epochs_per_day)
    }

    /// Position of `epoch_id` inside its day, starting at 0.
    pub fn epoch_in_day(&self, epoch_id: EpochId) -> u32 {
        epoch_id % self.epochs_per_day
    }

    pub fn is_first_epoch_of_day(&self, epoch_id: EpochId) -> bool {
        self.epoch_in_day(epoch_id) == 0
    }

    /// Calendar date of a day number. `None` only outside chrono's range.
    pub fn date_of_day(&self, day: i64) -> Option<NaiveDate> {
        self.service_start.checked_add_signed(Duration::days(day))
    }

    pub fn date_of_epoch(&self, epoch_id: EpochId) -> Option<NaiveDate> {
        self.date_of_day(self.day_of_epoch(epoch_id))
    }

    /// Day number of a calendar date; negative before the service start.
    pub fn day_of_date(&self, date: NaiveDate) -> i64 {
        date.signed_duration_since(self.service_start).num_days()
    }

    /// Epoch containing `instant`, or `None` before the service start.
    pub fn epoch_at(&self, instant: DateTime<Utc>) -> Option<EpochId> {
        let elapsed = instant
            .signed_duration_since(self.service_start_instant())
            .num_seconds();
        if elapsed < 0 {
            return None;
        }
        EpochId::try_from(elapsed / i64::from(self.epoch_duration_secs)).ok()
    }

    pub fn current_epoch(&self) -> Option<EpochId> {
        self.epoch_at(Utc::now())
    }

    /// Instant at which `epoch_id` begins.
    pub fn epoch_start(&self, epoch_id: EpochId) -> DateTime<Utc> {
        let offset = i64::from(epoch_id) * i64::from(self.epoch_duration_secs);
        self.service_start_instant() + Duration::seconds(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> EpochClock {
        EpochClock::new(NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(), 900, 96).unwrap()
    }

    #[test]
    fn test_last_epoch_of_day_zero_and_first_of_day_one() {
        let clock = clock();
        assert_eq!(clock.day_of_epoch(95), 0);
        assert_eq!(clock.day_of_epoch(96), 1);
        assert!(clock.is_first_epoch_of_day(96));
        assert!(!clock.is_first_epoch_of_day(95));
    }

    #[test]
    fn test_dates_follow_day_numbers() {
        let clock = clock();
        assert_eq!(
            clock.date_of_epoch(96),
            NaiveDate::from_ymd_opt(2020, 6, 2)
        );
        assert_eq!(clock.date_of_day(-1), NaiveDate::from_ymd_opt(2020, 5, 31));
        assert_eq!(
            clock.day_of_date(NaiveDate::from_ymd_opt(2020, 7, 1).unwrap()),
            30
        );
    }

    #[test]
    fn test_epoch_at_instant() {
        let clock = clock();
        let start = clock.service_start_instant();
        assert_eq!(clock.epoch_at(start), Some(0));
        assert_eq!(clock.epoch_at(start + Duration::seconds(899)), Some(0));
        assert_eq!(clock.epoch_at(start + Duration::seconds(900)), Some(1));
        assert_eq!(clock.epoch_at(start - Duration::seconds(1)), None);
        assert_eq!(clock.epoch_start(96), start + Duration::days(1));
    }

    #[test]
    fn test_rejects_epochs_not_tiling_a_day() {
        let start = NaiveDate::from_ymd_opt(2020, 6, 1).unwrap();
        assert!(EpochClock::new(start, 900, 95).is_err());
        assert!(EpochClock::new(start, 0, 96).is_err());
        assert!(EpochClock::new(start, 3600, 24).is_ok());
    }
}
