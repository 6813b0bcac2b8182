use serde::Serialize;

/// Point-in-time snapshot from the history log. Channel values and `log_hours`
/// are cumulative since the log was created.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub unix_time: i64,
    pub log_hours: f64,
    pub channels: Vec<f64>,
}

impl LogRecord {
    pub fn channel(&self, index: usize) -> f64 {
        self.channels.get(index).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploaderStatus {
    pub running: bool,
    pub last_posted_local_time: i64,
    #[serde(rename = "lastpost")]
    pub last_posted_utc: i64,
}
