//! Calendar arithmetic for gathering cycles.
//!
//! Everything here takes "now" as an argument so the scheduler stays the
//! only place that reads the clock.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Days of history looked back from the gathered day.
pub const LOOKBACK_DAYS: i64 = 7;

/// Hour from which "today" rather than "yesterday" is gathered.
const SAME_DAY_FROM_HOUR: u32 = 12;

/// How often the scheduler fires a gathering cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInterval {
    Hour,
    Minute,
    /// Once a day, at the start of the allowed window.
    Day,
}

impl TimeInterval {
    /// Unknown spellings fall back to [`TimeInterval::Hour`].
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "minute" => Self::Minute,
            "day" => Self::Day,
            _ => Self::Hour,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Day => "day",
        }
    }

    /// Time from `now` until the next tick.
    ///
    /// `Hour` and `Minute` tick a full period after `now`; `Day` ticks at the
    /// next occurrence of `day_at`.
    pub fn until_next_tick(&self, now: NaiveDateTime, day_at: NaiveTime) -> Duration {
        match self {
            Self::Hour => Duration::hours(1),
            Self::Minute => Duration::minutes(1),
            Self::Day => {
                let today = now.date().and_time(day_at);
                let next = if today > now {
                    today
                } else {
                    today + Duration::days(1)
                };
                next - now
            }
        }
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse `"HH:MM"`.
pub fn parse_hh_mm(raw: &str) -> Option<NaiveTime> {
    let (h, m) = raw.trim().split_once(':')?;
    NaiveTime::from_hms_opt(h.trim().parse().ok()?, m.trim().parse().ok()?, 0)
}

/// Time-of-day range in which cycles may start; wraps midnight when
/// `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl AllowedWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self::new(parse_hh_mm(start)?, parse_hh_mm(end)?))
    }

    /// Both bounds inclusive, compared at minute resolution.
    pub fn contains(&self, now: NaiveTime) -> bool {
        let now = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now);
        if self.start > self.end {
            now >= self.start || now <= self.end
        } else {
            now >= self.start && now <= self.end
        }
    }
}

impl fmt::Display for AllowedWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// The day a cycle started at `now` gathers: today from noon, else yesterday.
pub fn date_to_check(now: NaiveDateTime) -> NaiveDate {
    if now.hour() >= SAME_DAY_FROM_HOUR {
        now.date()
    } else {
        now.date() - Duration::days(1)
    }
}

/// `[date - 7 days, date + 1 day]` at midnight, the activity window for `date`.
pub fn trailing_window(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = (date - Duration::days(LOOKBACK_DAYS)).and_time(NaiveTime::MIN);
    let end = (date + Duration::days(1)).and_time(NaiveTime::MIN);
    (start, end)
}

/// Every date from `from` to `to`, inclusive. Empty when `from > to`.
pub fn days_in_range(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    from.iter_days().take_while(|d| *d <= to).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 10, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn window(start: &str, end: &str) -> AllowedWindow {
        AllowedWindow::parse(start, end).unwrap()
    }

    #[test]
    fn test_date_to_check_before_noon_is_yesterday() {
        assert_eq!(date_to_check(at(15, 7, 20)), at(14, 0, 0).date());
    }

    #[test]
    fn test_date_to_check_after_noon_is_today() {
        assert_eq!(date_to_check(at(15, 15, 34)), at(15, 0, 0).date());
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let w = window("22:00", "08:00");
        assert!(w.contains(at(15, 23, 34).time()));
        assert!(w.contains(at(15, 3, 0).time()));
        assert!(!w.contains(at(15, 14, 22).time()));
    }

    #[test]
    fn test_window_within_day() {
        let w = window("12:00", "16:00");
        assert!(w.contains(at(15, 14, 22).time()));
        assert!(w.contains(at(15, 16, 0).time()));
        assert!(!w.contains(at(16, 16, 22).time()));
    }

    #[test]
    fn test_parse_hh_mm_rejects_garbage() {
        assert_eq!(parse_hh_mm("7:05"), NaiveTime::from_hms_opt(7, 5, 0));
        assert!(parse_hh_mm("25:00").is_none());
        assert!(parse_hh_mm("noon").is_none());
    }

    #[test]
    fn test_interval_parsing_falls_back_to_hour() {
        assert_eq!(TimeInterval::parse_or_default("MINUTE"), TimeInterval::Minute);
        assert_eq!(TimeInterval::parse_or_default("day"), TimeInterval::Day);
        assert_eq!(TimeInterval::parse_or_default("weekly"), TimeInterval::Hour);
    }

    #[test]
    fn test_daily_tick_waits_for_next_start() {
        let start = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        assert_eq!(
            TimeInterval::Day.until_next_tick(at(15, 21, 0), start),
            Duration::hours(1)
        );
        assert_eq!(
            TimeInterval::Day.until_next_tick(at(15, 22, 0), start),
            Duration::hours(24)
        );
        assert_eq!(
            TimeInterval::Minute.until_next_tick(at(15, 22, 0), start),
            Duration::minutes(1)
        );
    }

    #[test]
    fn test_trailing_window_and_day_range() {
        let (start, end) = trailing_window(at(15, 0, 0).date());
        assert_eq!(start, at(8, 0, 0));
        assert_eq!(end, at(16, 0, 0));

        let days = days_in_range(at(10, 0, 0).date(), at(12, 0, 0).date());
        assert_eq!(days.len(), 3);
        assert!(days_in_range(at(12, 0, 0).date(), at(10, 0, 0).date()).is_empty());
    }
}
