use thiserror::Error;

use crate::domain::models::LogRecord;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history log query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("history log record has malformed channel data: {0}")]
    Channels(#[from] serde_json::Error),
    #[error("history log lock poisoned")]
    LockPoisoned,
    #[error("history log is empty")]
    Empty,
    #[error("no history record at or after {0}")]
    NoRecordAtOrAfter(i64),
}

/// Time-series log keyed by UTC unix seconds.
pub trait HistoryLog {
    fn is_open(&self) -> bool;
    fn first_key(&self) -> Result<i64, HistoryError>;
    fn last_key(&self) -> Result<i64, HistoryError>;
    fn read_at_or_after(&self, key: i64) -> Result<LogRecord, HistoryError>;
}
