use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::adapters::db;
use crate::domain::history::{HistoryError, HistoryLog};
use crate::domain::models::LogRecord;

/// History log backed by the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteHistoryLog {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteHistoryLog {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, HistoryError>,
    ) -> Result<T, HistoryError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| HistoryError::LockPoisoned)?;
        op(&connection)
    }
}

impl HistoryLog for SqliteHistoryLog {
    fn is_open(&self) -> bool {
        matches!(self.with_connection(db::count_records), Ok(count) if count > 0)
    }

    fn first_key(&self) -> Result<i64, HistoryError> {
        self.with_connection(db::first_key)
    }

    fn last_key(&self) -> Result<i64, HistoryError> {
        self.with_connection(db::last_key)
    }

    fn read_at_or_after(&self, key: i64) -> Result<LogRecord, HistoryError> {
        self.with_connection(|connection| db::read_at_or_after(connection, key))
    }
}
