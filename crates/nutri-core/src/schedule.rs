//! Daily wall-clock trigger used by the job runner.

use chrono::{DateTime, NaiveTime, TimeZone, Timelike};

/// A recurring trigger at a fixed local time of day, e.g. `00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self::midnight()
    }
}

impl DailySchedule {
    #[must_use]
    pub fn new(at: NaiveTime) -> Self {
        // Sub-minute precision is dropped so the cron expression and
        // `next_after` always agree.
        let at = at.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(at);
        Self { at }
    }

    #[must_use]
    pub fn midnight() -> Self {
        Self { at: NaiveTime::MIN }
    }

    /// Parses `HH:MM` (24-hour clock).
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value is not a valid time.
    pub fn parse(raw: &str) -> Result<Self, String> {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map(Self::new)
            .map_err(|e| format!("expected HH:MM, got '{raw}': {e}"))
    }

    #[must_use]
    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// Six-field cron expression (`sec min hour day month weekday`).
    #[must_use]
    pub fn cron_expression(&self) -> String {
        format!("0 {} {} * * *", self.at.minute(), self.at.hour())
    }

    /// The first trigger instant strictly after `now`, in `now`'s time zone.
    ///
    /// Local times skipped by a DST transition fall through to the next day
    /// on which the time exists. Returns `None` only at the end of the
    /// representable calendar.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let mut day = now.date_naive();

        loop {
            if let Some(candidate) = tz
                .from_local_datetime(&day.and_time(self.at))
                .earliest()
            {
                if candidate > *now {
                    return Some(candidate);
                }
            }
            day = day.succ_opt()?;
        }
    }
}

impl std::fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at {}", self.at.format("%H:%M"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, FixedOffset, NaiveDate, Utc};

    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn parse_accepts_hh_mm() {
        let schedule = DailySchedule::parse("06:30").unwrap();
        assert_eq!(schedule.at(), NaiveTime::from_hms_opt(6, 30, 0).unwrap());
        assert_eq!(schedule.to_string(), "at 06:30");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(DailySchedule::parse("midnight").is_err());
        assert!(DailySchedule::parse("24:00").is_err());
        assert!(DailySchedule::parse("").is_err());
    }

    #[test]
    fn cron_expression_fires_once_a_day() {
        assert_eq!(DailySchedule::midnight().cron_expression(), "0 0 0 * * *");
        assert_eq!(
            DailySchedule::parse("23:05").unwrap().cron_expression(),
            "0 5 23 * * *"
        );
    }

    #[test]
    fn next_after_same_day_when_time_not_reached() {
        let schedule = DailySchedule::parse("12:00").unwrap();
        let next = schedule.next_after(&utc(2026, 3, 1, 9, 0, 0)).unwrap();
        assert_eq!(next, utc(2026, 3, 1, 12, 0, 0));
    }

    #[test]
    fn next_after_rolls_to_tomorrow_at_or_past_trigger() {
        let schedule = DailySchedule::midnight();
        assert_eq!(
            schedule.next_after(&utc(2026, 3, 1, 0, 0, 0)).unwrap(),
            utc(2026, 3, 2, 0, 0, 0)
        );
        assert_eq!(
            schedule.next_after(&utc(2026, 3, 1, 0, 0, 1)).unwrap(),
            utc(2026, 3, 2, 0, 0, 0)
        );
        assert_eq!(
            schedule.next_after(&utc(2026, 12, 31, 23, 59, 59)).unwrap(),
            utc(2027, 1, 1, 0, 0, 0)
        );
    }

    #[test]
    fn next_after_respects_offset() {
        let tz = FixedOffset::east_opt(5 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 6, 10, 23, 30, 0).unwrap();
        let next = DailySchedule::midnight().next_after(&now).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 6, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn successive_triggers_are_strictly_increasing_one_per_day() {
        let schedule = DailySchedule::midnight();
        let mut now = utc(2026, 2, 27, 15, 0, 0);
        let mut previous: Option<DateTime<Utc>> = None;

        for _ in 0..400 {
            let next = schedule.next_after(&now).unwrap();
            assert!(next > now);
            if let Some(prev) = previous {
                assert!(next > prev);
                assert_eq!(next - prev, Duration::days(1));
                assert_eq!(
                    next.date_naive(),
                    prev.date_naive().succ_opt().unwrap(),
                    "no calendar day may be skipped"
                );
            }
            previous = Some(next);
            now = next;
        }
    }

    #[test]
    fn new_truncates_seconds() {
        let t = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(4, 15, 42)
            .unwrap()
            .time();
        assert_eq!(
            DailySchedule::new(t).at(),
            NaiveTime::from_hms_opt(4, 15, 0).unwrap()
        );
    }
}
