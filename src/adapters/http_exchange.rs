use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

use crate::adapters::transport::{ReadyState, Transport, TransportError};
use crate::domain::pv_response::ParsedResponse;
use crate::domain::rate_limit::{HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const HEADER_API_KEY: &str = "X-Pvoutput-Apikey";
const HEADER_SYSTEM_ID: &str = "X-Pvoutput-SystemId";
const HEADER_RATE_OPT_IN: &str = "X-Rate-Limit";
const HEADER_CONTENT_TYPE: &str = "Content-type";

/// Counting pool capping simultaneous outbound HTTP exchanges across the process.
#[derive(Debug, Clone)]
pub struct HttpPermits {
    available: Arc<AtomicUsize>,
}

impl HttpPermits {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            available: Arc::new(AtomicUsize::new(max_concurrent)),
        }
    }

    pub fn try_reserve(&self) -> Option<HttpPermit> {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|_| HttpPermit {
                pool: Arc::clone(&self.available),
            })
    }

    pub fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }
}

/// Returned to the pool when dropped.
#[derive(Debug)]
pub struct HttpPermit {
    pool: Arc<AtomicUsize>,
}

impl Drop for HttpPermit {
    fn drop(&mut self) {
        self.pool.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Error)]
pub enum BeginError {
    #[error("no outbound http permit available")]
    PermitUnavailable,
    #[error("failed to open request: {0}")]
    OpenFailed(#[source] TransportError),
}

#[derive(Debug, Clone, Copy)]
pub struct ExchangeRequest<'a> {
    pub path: &'a str,
    pub content_type: &'a str,
    pub api_key: &'a str,
    pub system_id: &'a str,
    pub body: &'a str,
}

/// Raw result of one finished exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: Option<u16>,
    pub body: String,
    pub limit: Option<String>,
    pub remaining: Option<String>,
    pub reset: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpOutcome {
    Ok,
    HttpFailure,
    RateLimit,
    LoadInProgress,
    DateInFuture,
    DateTooOld,
    MoonPowered,
    NoStatus,
}

/// Maps a completed exchange to an outcome; `None` means the response is not one
/// the service is known to send.
pub fn classify(status: Option<u16>, response: &ParsedResponse) -> Option<HttpOutcome> {
    match status {
        None => Some(HttpOutcome::HttpFailure),
        Some(200) => Some(HttpOutcome::Ok),
        Some(403)
            if response.contains("Exceeded") && response.contains("requests per hour") =>
        {
            Some(HttpOutcome::RateLimit)
        }
        Some(400) => [
            ("Load in progress", HttpOutcome::LoadInProgress),
            ("Date is in the future", HttpOutcome::DateInFuture),
            ("Date is older than", HttpOutcome::DateTooOld),
            ("Moon powered", HttpOutcome::MoonPowered),
            ("No status", HttpOutcome::NoStatus),
        ]
        .into_iter()
        .find(|(needle, _)| response.contains(needle))
        .map(|(_, outcome)| outcome),
        Some(_) => None,
    }
}

/// Drives one POST at a time against `{base_url}/service/r2/{path}`, holding an
/// outbound permit for as long as the request is in flight.
pub struct HttpExchange<T> {
    transport: T,
    permits: HttpPermits,
    base_url: String,
    in_flight: Option<HttpPermit>,
}

impl<T: Transport> HttpExchange<T> {
    pub fn new(transport: T, permits: HttpPermits, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            permits,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            in_flight: None,
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/service/r2/{}", self.base_url, path)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn begin(&mut self, request: &ExchangeRequest<'_>) -> Result<(), BeginError> {
        let permit = self
            .permits
            .try_reserve()
            .ok_or(BeginError::PermitUnavailable)?;

        let url = self.url_for(request.path);
        // The permit is dropped here on failure.
        self.transport
            .open("POST", &url)
            .map_err(BeginError::OpenFailed)?;

        self.transport.set_header(HEADER_API_KEY, request.api_key);
        self.transport.set_header(HEADER_SYSTEM_ID, request.system_id);
        self.transport.set_header(HEADER_RATE_OPT_IN, "1");
        self.transport
            .set_header(HEADER_CONTENT_TYPE, request.content_type);

        let body = (!request.body.is_empty()).then(|| request.body.to_string());
        self.transport.send(body);

        self.in_flight = Some(permit);
        Ok(())
    }

    /// `None` while the transport is still working.
    pub fn poll(&mut self) -> Option<Completion> {
        if self.transport.ready_state() != ReadyState::Done {
            return None;
        }
        self.in_flight = None;

        Some(Completion {
            status: self.transport.status_code(),
            limit: self.transport.response_header(HEADER_LIMIT),
            remaining: self.transport.response_header(HEADER_REMAINING),
            reset: self.transport.response_header(HEADER_RESET),
            body: self.transport.read_body(),
        })
    }

    /// Forgets any in-flight exchange and returns its permit.
    pub fn release(&mut self) {
        self.in_flight = None;
    }
}
