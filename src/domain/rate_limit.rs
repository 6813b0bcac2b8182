pub const HEADER_LIMIT: &str = "X-Rate-Limit-Limit";
pub const HEADER_REMAINING: &str = "X-Rate-Limit-Remaining";
pub const HEADER_RESET: &str = "X-Rate-Limit-Reset";

/// Request budget as last reported by the service. Nothing is assumed until a
/// response carries the rate-limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimiter {
    remaining: Option<i64>,
    limit: Option<i64>,
    reset_at_utc: Option<i64>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records whichever of the three headers were present on a completed request.
    pub fn observe(&mut self, limit: Option<&str>, remaining: Option<&str>, reset: Option<&str>) {
        if let Some(value) = limit.and_then(parse_header_number) {
            self.limit = Some(value);
        }
        if let Some(value) = remaining.and_then(parse_header_number) {
            self.remaining = Some(value);
        }
        if let Some(value) = reset.and_then(parse_header_number) {
            self.reset_at_utc = Some(value);
        }
    }

    /// True while the budget is spent and the reset time has not been reached.
    pub fn must_wait(&self, now_utc: i64) -> bool {
        matches!(self.remaining, Some(remaining) if remaining <= 0)
            && now_utc < self.reset_at_utc.unwrap_or(0)
    }

    /// Marks the budget as spent after the service refused a request. Without a
    /// future reset time from the headers, waits `fallback_secs` from now.
    pub fn exhausted(&mut self, now_utc: i64, fallback_secs: i64) {
        self.remaining = Some(0);
        if self.reset_at_utc.is_none_or(|reset| reset <= now_utc) {
            self.reset_at_utc = Some(now_utc + fallback_secs);
        }
    }

    /// True once the learned reset time has passed.
    pub fn reset_passed(&self, now_utc: i64) -> bool {
        now_utc > self.reset_at_utc.unwrap_or(0)
    }

    pub fn remaining(&self) -> Option<i64> {
        self.remaining
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn reset_at_utc(&self) -> Option<i64> {
        self.reset_at_utc
    }
}

fn parse_header_number(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}
