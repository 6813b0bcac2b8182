pub mod api;
pub mod db;
pub mod http_exchange;
pub mod transport;
