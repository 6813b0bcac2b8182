use std::path::Path;

use chrono::Utc;
use pvoutput_uploader::adapters::db::{
    count_records, insert_record, open_connection, run_migrations, schema_version,
};
use pvoutput_uploader::domain::models::LogRecord;

const DEFAULT_INTERVAL_SECS: i64 = 60;

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to create history db: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut path = if cfg!(windows) {
        ".\\data\\history.db".to_string()
    } else {
        "./data/history.db".to_string()
    };
    let mut force = false;
    let mut seed_hours: i64 = 0;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--path" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--path requires a value".to_string());
                };
                path = value.clone();
                index += 2;
            }
            "--seed-hours" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--seed-hours requires a value".to_string());
                };
                seed_hours = value
                    .parse()
                    .map_err(|_| format!("--seed-hours must be a whole number: {value}"))?;
                index += 2;
            }
            "--force" => {
                force = true;
                index += 1;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    let path_ref = Path::new(&path);
    if let Some(parent) = path_ref.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }

    if force && path_ref.exists() {
        std::fs::remove_file(path_ref)
            .map_err(|error| format!("failed to remove existing db file: {error}"))?;
    }

    let mut connection = open_connection(&path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;
    let version = schema_version(&connection).map_err(|error| error.to_string())?;

    if seed_hours > 0 {
        let now = Utc::now().timestamp();
        let end = now - now % DEFAULT_INTERVAL_SECS;
        let start = end - seed_hours * 3_600;

        for unix_time in (start..=end).step_by(DEFAULT_INTERVAL_SECS as usize) {
            let record = synthetic_record(start, unix_time);
            insert_record(&connection, &record).map_err(|error| error.to_string())?;
        }
    }
    let records = count_records(&connection).map_err(|error| error.to_string())?;

    println!("created/updated history db at: {path}");
    println!("schema version: {version}");
    println!("records: {records}");
    Ok(())
}

/// Cumulative watt-hours for a flat 2 kW producer, 800 W consumer and 240 V mains.
fn synthetic_record(start: i64, unix_time: i64) -> LogRecord {
    let log_hours = (unix_time - start) as f64 / 3_600.0;
    LogRecord {
        unix_time,
        log_hours,
        channels: vec![2_000.0 * log_hours, 800.0 * log_hours, 240.0 * log_hours],
    }
}

fn print_help() {
    println!("create_history_db");
    println!();
    println!("Usage:");
    println!("  cargo run --bin create_history_db -- [--path <file>] [--seed-hours <n>] [--force]");
    println!();
    println!("Options:");
    println!("  --path <file>       target sqlite file (default: ./data/history.db)");
    println!("  --seed-hours <n>    append one synthetic record per minute for the last n hours");
    println!("  --force             delete existing file before creating");
}
