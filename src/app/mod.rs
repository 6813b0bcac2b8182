mod config;
mod error;
mod logging;
pub mod runtime;
pub mod scheduler;
pub mod services;
pub mod uploader;

pub use config::AppConfig;
pub use error::AppError;

fn bootstrap() -> Result<AppConfig, AppError> {
    logging::init()?;

    let config = AppConfig::from_env()?;

    tracing::info!(
        service_config_path = %config.service_config_path,
        history_db_path = %config.history_db_path,
        base_url = %config.base_url,
        http_bind = %config.http_bind,
        utc_offset_minutes = config.utc_offset_minutes,
        http_timeout_secs = config.http_timeout_secs,
        http_max_concurrent = config.http_max_concurrent,
        "application bootstrap initialized"
    );

    Ok(config)
}

/// Uploader plus the HTTP control API.
pub fn run() -> Result<(), AppError> {
    runtime::run(bootstrap()?)
}

/// Uploader only, driven by the service configuration file.
pub fn run_service() -> Result<(), AppError> {
    runtime::run_service(bootstrap()?)
}
