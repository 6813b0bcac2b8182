use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use crate::domain::history::HistoryError;
use crate::domain::models::LogRecord;

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS history_records (
    unix_time INTEGER PRIMARY KEY,
    log_hours REAL NOT NULL,
    channels TEXT NOT NULL
);
"#,
)];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::from)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

pub fn insert_record(connection: &Connection, record: &LogRecord) -> Result<(), HistoryError> {
    let channels = serde_json::to_string(&record.channels)?;
    connection.execute(
        "INSERT OR REPLACE INTO history_records (unix_time, log_hours, channels) VALUES (?1, ?2, ?3)",
        params![record.unix_time, record.log_hours, channels],
    )?;
    Ok(())
}

pub fn first_key(connection: &Connection) -> Result<i64, HistoryError> {
    let key: Option<i64> =
        connection.query_row("SELECT MIN(unix_time) FROM history_records", [], |row| {
            row.get(0)
        })?;
    key.ok_or(HistoryError::Empty)
}

pub fn last_key(connection: &Connection) -> Result<i64, HistoryError> {
    let key: Option<i64> =
        connection.query_row("SELECT MAX(unix_time) FROM history_records", [], |row| {
            row.get(0)
        })?;
    key.ok_or(HistoryError::Empty)
}

/// Nearest record at or after `key`. The returned record is stamped with the
/// requested key so callers can match it against the interval they asked for.
pub fn read_at_or_after(connection: &Connection, key: i64) -> Result<LogRecord, HistoryError> {
    let row: Option<(f64, String)> = connection
        .query_row(
            "SELECT log_hours, channels
             FROM history_records
             WHERE unix_time >= ?1
             ORDER BY unix_time ASC
             LIMIT 1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (log_hours, channels) = row.ok_or(HistoryError::NoRecordAtOrAfter(key))?;

    Ok(LogRecord {
        unix_time: key,
        log_hours,
        channels: serde_json::from_str(&channels)?,
    })
}

pub fn count_records(connection: &Connection) -> Result<i64, HistoryError> {
    let count = connection.query_row("SELECT COUNT(*) FROM history_records", [], |row| {
        row.get(0)
    })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{
        LATEST_SCHEMA_VERSION, count_records, first_key, insert_record, last_key,
        open_connection, read_at_or_after, run_migrations, schema_version,
    };
    use crate::domain::history::HistoryError;
    use crate::domain::models::LogRecord;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    fn record(unix_time: i64, log_hours: f64, channels: &[f64]) -> LogRecord {
        LogRecord {
            unix_time,
            log_hours,
            channels: channels.to_vec(),
        }
    }

    #[test]
    fn migrates_fresh_database_to_latest_version() {
        let db_path = temp_db_path("fresh.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        run_migrations(&mut connection).expect("migrations should succeed");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, LATEST_SCHEMA_VERSION);

        let table_exists: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='history_records'",
                [],
                |row| row.get(0),
            )
            .expect("history table check should work");
        assert_eq!(table_exists, 1);
    }

    #[test]
    fn keeps_existing_records_when_migrations_rerun() {
        let db_path = temp_db_path("rerun.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        run_migrations(&mut connection).expect("first migration run should succeed");
        insert_record(&connection, &record(1_000, 1.0, &[5.0]))
            .expect("insert should succeed");
        run_migrations(&mut connection).expect("second migration run should succeed");

        assert_eq!(count_records(&connection).expect("count should succeed"), 1);
    }

    #[test]
    fn empty_log_has_no_keys() {
        let db_path = temp_db_path("empty.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("migrations should succeed");

        assert!(matches!(first_key(&connection), Err(HistoryError::Empty)));
        assert!(matches!(last_key(&connection), Err(HistoryError::Empty)));
    }

    #[test]
    fn reads_nearest_record_at_or_after_key() {
        let db_path = temp_db_path("nearest.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("migrations should succeed");

        insert_record(&connection, &record(1_000, 1.0, &[10.0, 2.5]))
            .expect("insert should succeed");
        insert_record(&connection, &record(1_300, 1.25, &[20.0, 5.0]))
            .expect("insert should succeed");

        assert_eq!(first_key(&connection).expect("first key"), 1_000);
        assert_eq!(last_key(&connection).expect("last key"), 1_300);

        let exact = read_at_or_after(&connection, 1_000).expect("record should exist");
        assert_eq!(exact, record(1_000, 1.0, &[10.0, 2.5]));

        let later = read_at_or_after(&connection, 1_100).expect("record should exist");
        assert_eq!(later.unix_time, 1_100);
        assert_eq!(later.log_hours, 1.25);
        assert_eq!(later.channels, vec![20.0, 5.0]);

        assert!(matches!(
            read_at_or_after(&connection, 1_301),
            Err(HistoryError::NoRecordAtOrAfter(1_301))
        ));
    }

    #[test]
    fn rejects_malformed_channel_payload() {
        let db_path = temp_db_path("malformed.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("migrations should succeed");
        connection
            .execute(
                "INSERT INTO history_records (unix_time, log_hours, channels) VALUES (?1, ?2, ?3)",
                rusqlite::params![1_000_i64, 1.0_f64, "not json"],
            )
            .expect("raw insert should succeed");

        assert!(matches!(
            read_at_or_after(&connection, 1_000),
            Err(HistoryError::Channels(_))
        ));
    }
}
