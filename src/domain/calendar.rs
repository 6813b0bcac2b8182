use chrono::{DateTime, NaiveDate};

pub const UNIX_DAY: i64 = 86_400;

pub trait Clock {
    /// Current UTC time in unix seconds.
    fn now_utc(&self) -> i64;
}

/// Fixed offset between the history log's UTC keys and the local wall clock the
/// remote service expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalZone {
    offset_seconds: i64,
}

impl LocalZone {
    pub fn from_offset_minutes(minutes: i64) -> Self {
        Self {
            offset_seconds: minutes * 60,
        }
    }

    pub fn to_local(&self, utc: i64) -> i64 {
        utc + self.offset_seconds
    }

    pub fn to_utc(&self, local: i64) -> i64 {
        local - self.offset_seconds
    }
}

pub fn start_of_day(time: i64) -> i64 {
    time - time.rem_euclid(UNIX_DAY)
}

pub fn is_midnight(time: i64) -> bool {
    time.rem_euclid(UNIX_DAY) == 0
}

pub fn format_date(local: i64) -> String {
    DateTime::from_timestamp(local, 0)
        .map(|value| value.format("%Y%m%d").to_string())
        .unwrap_or_default()
}

pub fn format_hhmm(local: i64) -> String {
    DateTime::from_timestamp(local, 0)
        .map(|value| value.format("%H:%M").to_string())
        .unwrap_or_default()
}

/// `YYYYMMDD` to seconds at the start of that day.
pub fn parse_yyyymmdd(text: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(text.trim(), "%Y%m%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp())
}

/// `HH:MM[:SS]` to seconds since midnight.
pub fn parse_time_of_day(text: &str) -> Option<i64> {
    let mut parts = text.trim().split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    let seconds: i64 = match parts.next() {
        Some(raw) => raw.trim().parse().ok()?,
        None => 0,
    };

    if parts.next().is_some()
        || !(0..24).contains(&hours)
        || !(0..60).contains(&minutes)
        || !(0..60).contains(&seconds)
    {
        return None;
    }

    Some(hours * 3600 + minutes * 60 + seconds)
}
