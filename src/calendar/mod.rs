use crate::error::SchedulerError;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

const SECONDS_PER_HOUR: i32 = 3600;

/// Calendar arithmetic in the deployment's fixed planning offset.
///
/// Every conversion between the absolute timeline (epoch seconds, UTC) and
/// local calendar days goes through this value, so the offset is applied in
/// exactly one place and never lost across a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannerCalendar {
    offset: FixedOffset,
}

impl PlannerCalendar {
    /// Build a calendar from an integer offset in hours east of UTC.
    pub fn from_offset_hours(hours: i32) -> Result<Self, SchedulerError> {
        let offset = FixedOffset::east_opt(hours * SECONDS_PER_HOUR).ok_or_else(|| {
            SchedulerError::invalid_input(format!("timezone offset out of range: {} hours", hours))
        })?;
        Ok(PlannerCalendar { offset })
    }

    /// UTC calendar, the default when no offset is supplied.
    pub fn utc() -> Self {
        PlannerCalendar {
            offset: FixedOffset::east_opt(0).unwrap(),
        }
    }

    pub fn offset_hours(&self) -> i32 {
        self.offset.local_minus_utc() / SECONDS_PER_HOUR
    }

    /// Local midnight of `day` as an absolute instant.
    pub fn day_start(&self, day: NaiveDate) -> DateTime<FixedOffset> {
        // Midnight always exists on a fixed offset (no DST gaps).
        self.offset
            .from_local_datetime(&day.and_hms_opt(0, 0, 0).unwrap())
            .unwrap()
    }

    /// Epoch-second bounds of `day`, exclusive on the right.
    pub fn day_bounds(&self, day: NaiveDate) -> (i64, i64) {
        let start = self.day_start(day);
        (start.timestamp(), (start + Duration::days(1)).timestamp())
    }

    /// The local calendar day containing the instant `ts`.
    pub fn epoch_to_date(&self, ts: i64) -> Result<NaiveDate, SchedulerError> {
        let utc = DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| SchedulerError::invalid_input(format!("epoch out of range: {}", ts)))?;
        Ok(utc.with_timezone(&self.offset).date_naive())
    }

    /// The (year, month) pair containing the instant `ts`.
    pub fn month_of(&self, ts: i64) -> Result<(i32, u32), SchedulerError> {
        let day = self.epoch_to_date(ts)?;
        Ok((day.year(), day.month()))
    }
}

/// Inclusive day iteration from `start` through `end`.
pub fn iter_days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

/// The Monday on or before `day` (weeks are Monday-anchored).
pub fn monday_on_or_before(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

/// First and last calendar day of a month.
pub fn month_bounds(year: i32, month: u32) -> Result<(NaiveDate, NaiveDate), SchedulerError> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| SchedulerError::invalid_input(format!("invalid month: {}-{}", year, month)))?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(|| SchedulerError::invalid_input(format!("invalid month: {}-{}", year, month)))?;
    Ok((first, next_first - Duration::days(1)))
}

/// Parse an ISO-8601 (`YYYY-MM-DD`) wire date.
pub fn parse_iso_date(value: &str) -> Result<NaiveDate, SchedulerError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| SchedulerError::invalid_input(format!("invalid date '{}': {}", value, e)))
}
