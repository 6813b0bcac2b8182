pub mod batch;
pub mod calendar;
pub mod history;
pub mod models;
pub mod output_scripts;
pub mod pv_response;
pub mod rate_limit;
pub mod service_config;
