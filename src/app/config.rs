use std::time::Duration;

use crate::app::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service_config_path: String,
    pub history_db_path: String,
    pub base_url: String,
    pub http_bind: String,
    pub utc_offset_minutes: i64,
    pub http_timeout_secs: u64,
    pub http_max_concurrent: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_config_path = lookup("PVOUTPUT_CONFIG_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::config("PVOUTPUT_CONFIG_PATH is required"))?;

        let http_max_concurrent = parse_or_default(&lookup, "HTTP_MAX_CONCURRENT", 2_usize)?;
        if http_max_concurrent == 0 {
            return Err(AppError::config("HTTP_MAX_CONCURRENT must be at least 1"));
        }

        Ok(Self {
            service_config_path,
            history_db_path: text_or_default(
                &lookup,
                "HISTORY_DB_PATH",
                "/var/lib/iotawatt/history.db",
            ),
            base_url: text_or_default(&lookup, "PVOUTPUT_BASE_URL", "http://pvoutput.org"),
            http_bind: text_or_default(&lookup, "HTTP_BIND", "0.0.0.0:8080"),
            utc_offset_minutes: parse_or_default(&lookup, "UTC_OFFSET_MINUTES", 0_i64)?,
            http_timeout_secs: parse_or_default(&lookup, "HTTP_TIMEOUT_SECS", 3_u64)?,
            http_max_concurrent,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn text_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
