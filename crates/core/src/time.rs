//! Resolves the configured sync window into concrete instants.

use crate::config::SyncTime;
use crate::error::ConfigError;
use chrono::{DateTime, Datelike, Duration, Local, LocalResult, NaiveDate, TimeZone, Timelike, Utc};

/// The only two window anchors the config format currently recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeIdentifier {
    MonthStart,
    MonthEnd,
}

impl TimeIdentifier {
    pub fn parse(identifier: &str) -> Result<Self, ConfigError> {
        match identifier {
            "MonthStart" => Ok(Self::MonthStart),
            "MonthEnd" => Ok(Self::MonthEnd),
            other => Err(ConfigError::UnknownTimeIdentifier(other.to_string())),
        }
    }
}

/// Resolves a `SyncTime` (identifier + month offset) against the current
/// local time into an absolute instant.
///
/// `MonthStart` anchors to the first of the current month at midnight
/// **local time**; `MonthEnd` anchors to the last day of the current month
/// at midnight local time. The configured offset is then applied in whole
/// months, still measured in the local calendar, before converting to UTC.
/// Anchoring in UTC instead would shift both the month boundary and the
/// midnight instant for any operator not in UTC.
pub fn resolve(sync_time: &SyncTime) -> Result<DateTime<Utc>, ConfigError> {
    resolve_from(sync_time, Local::now())
}

/// Same as [`resolve`] but takes an explicit "now" in any timezone, for
/// deterministic tests. All anchor arithmetic happens in `now`'s own
/// timezone; the result is converted to UTC only at the very end.
pub fn resolve_from<Tz>(sync_time: &SyncTime, now: DateTime<Tz>) -> Result<DateTime<Utc>, ConfigError>
where
    Tz: TimeZone,
{
    let identifier = TimeIdentifier::parse(&sync_time.identifier)?;
    let tz = now.timezone();
    let (year, month) = (now.year(), now.month());

    let anchor = match identifier {
        TimeIdentifier::MonthStart => first_of_month(&tz, year, month),
        TimeIdentifier::MonthEnd => last_day_of_month(&tz, year, month),
    };

    Ok(add_months(&tz, anchor, sync_time.offset).with_timezone(&Utc))
}

fn first_of_month<Tz: TimeZone>(tz: &Tz, year: i32, month: u32) -> DateTime<Tz> {
    local_instant(tz, year, month, 1, 0, 0, 0)
}

fn last_day_of_month<Tz: TimeZone>(tz: &Tz, year: i32, month: u32) -> DateTime<Tz> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    first_of_month(tz, next_year, next_month) - chrono::Duration::days(1)
}

fn add_months<Tz: TimeZone>(tz: &Tz, instant: DateTime<Tz>, offset: i32) -> DateTime<Tz> {
    let total_months = instant.year() * 12 + (instant.month() as i32 - 1) + offset;
    let year = total_months.div_euclid(12);
    let month = (total_months.rem_euclid(12) + 1) as u32;
    // Clamp the day-of-month: shifting "Jan 31" by one month must not panic.
    let last_day_in_target_month = last_day_of_month(tz, year, month).day();
    let day = instant.day().min(last_day_in_target_month);
    local_instant(tz, year, month, day, instant.hour(), instant.minute(), instant.second())
}

/// Builds a local instant from calendar fields, tolerating the two ways a
/// wall-clock reading can fail to map onto a single instant around a DST
/// transition: an ambiguous fall-back resolves to the earlier instant, and a
/// spring-forward gap is bridged by nudging forward in whole hours until a
/// valid instant appears (DST shifts are never more than a few hours).
fn local_instant<Tz: TimeZone>(tz: &Tz, year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Tz> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, min, sec))
        .expect("valid calendar date and time of day");

    let mut candidate = naive;
    for _ in 0..4 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => candidate += Duration::hours(1),
        }
    }
    panic!("no valid local instant within 4 hours of {naive}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syncs_at(identifier: &str, offset: i32) -> SyncTime {
        SyncTime { identifier: identifier.to_string(), offset }
    }

    #[test]
    fn month_start_resolves_to_first_of_month_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 17, 14, 30, 0).unwrap();
        let resolved = resolve_from(&syncs_at("MonthStart", 0), now).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn month_end_resolves_to_last_day_of_month_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 2, 5, 0, 0, 0).unwrap();
        let resolved = resolve_from(&syncs_at("MonthEnd", 0), now).unwrap();
        // 2026 is not a leap year, so February has 28 days.
        assert_eq!(resolved, Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn offset_shifts_by_whole_months() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let resolved = resolve_from(&syncs_at("MonthStart", 1), now).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn negative_offset_wraps_across_year_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let resolved = resolve_from(&syncs_at("MonthStart", -1), now).unwrap();
        assert_eq!(resolved, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        let now = Utc::now();
        let result = resolve_from(&syncs_at("Bogus", 0), now);
        assert!(matches!(result, Err(ConfigError::UnknownTimeIdentifier(_))));
    }

    /// A local midnight that is already the next UTC day must anchor on the
    /// local calendar date, not the UTC one.
    #[test]
    fn month_start_anchors_on_the_local_calendar_date_across_the_utc_day_boundary() {
        use chrono::FixedOffset;

        // 2026-03-01 00:30 in UTC+14 is still 2026-02-28 in UTC.
        let plus_14 = FixedOffset::east_opt(14 * 3600).unwrap();
        let now = plus_14.with_ymd_and_hms(2026, 3, 1, 0, 30, 0).unwrap();

        let resolved = resolve_from(&syncs_at("MonthStart", 0), now).unwrap();

        assert_eq!(resolved.with_timezone(&plus_14).year(), 2026);
        assert_eq!(resolved.with_timezone(&plus_14).month(), 3);
        assert_eq!(resolved.with_timezone(&plus_14).day(), 1);
        assert_eq!(resolved.with_timezone(&plus_14).hour(), 0);
        // In UTC that same local midnight falls on the previous calendar day.
        assert_eq!(resolved, Utc.with_ymd_and_hms(2026, 2, 28, 10, 0, 0).unwrap());
    }

    #[test]
    fn month_end_anchors_on_the_local_calendar_date_in_a_negative_offset_zone() {
        use chrono::FixedOffset;

        // 2026-02-28 23:00 in UTC-5 is already 2026-03-01 in UTC.
        let minus_5 = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = minus_5.with_ymd_and_hms(2026, 2, 28, 23, 0, 0).unwrap();

        let resolved = resolve_from(&syncs_at("MonthEnd", 0), now).unwrap();

        let local = resolved.with_timezone(&minus_5);
        assert_eq!((local.year(), local.month(), local.day()), (2026, 2, 28));
        assert_eq!(local.hour(), 0);
    }
}
