use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("invalid request url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported http method {0}")]
    InvalidMethod(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyState {
    #[default]
    Idle,
    Opened,
    Sent,
    Done,
}

/// Request/response contract of the underlying HTTP transport. `send` must return
/// immediately; completion is observed by polling `ready_state`.
pub trait Transport {
    fn open(&mut self, method: &str, url: &str) -> Result<(), TransportError>;
    fn set_header(&mut self, name: &str, value: &str);
    fn send(&mut self, body: Option<String>);
    fn ready_state(&mut self) -> ReadyState;
    /// `None` when the exchange failed below HTTP (connect, TLS, timeout).
    fn status_code(&self) -> Option<u16>;
    fn response_header(&self, name: &str) -> Option<String>;
    fn read_body(&mut self) -> String;
}

#[derive(Debug)]
struct ExchangeResult {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: String,
}

#[derive(Debug)]
struct PreparedRequest {
    method: Method,
    url: reqwest::Url,
    headers: Vec<(String, String)>,
}

/// Runs each exchange on a short-lived worker thread with a blocking reqwest client
/// and hands the result back through a channel.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
    prepared: Option<PreparedRequest>,
    in_flight: Option<Receiver<ExchangeResult>>,
    result: Option<ExchangeResult>,
    state: ReadyState,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            client,
            prepared: None,
            in_flight: None,
            result: None,
            state: ReadyState::Idle,
        })
    }
}

impl Transport for ReqwestTransport {
    fn open(&mut self, method: &str, url: &str) -> Result<(), TransportError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| TransportError::InvalidMethod(method.to_string()))?;
        let url = reqwest::Url::parse(url).map_err(|error| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: error.to_string(),
        })?;

        self.prepared = Some(PreparedRequest {
            method,
            url,
            headers: Vec::new(),
        });
        self.in_flight = None;
        self.result = None;
        self.state = ReadyState::Opened;
        Ok(())
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if let Some(prepared) = self.prepared.as_mut() {
            prepared.headers.push((name.to_string(), value.to_string()));
        }
    }

    fn send(&mut self, body: Option<String>) {
        let Some(prepared) = self.prepared.take() else {
            tracing::warn!("http send without an opened request");
            return;
        };

        let mut builder = self.client.request(prepared.method, prepared.url);
        for (name, value) in &prepared.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let (sender, receiver) = mpsc::channel();
        std::thread::spawn(move || {
            let result = match builder.send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let headers = response
                        .headers()
                        .iter()
                        .map(|(name, value)| {
                            (
                                name.as_str().to_string(),
                                String::from_utf8_lossy(value.as_bytes()).into_owned(),
                            )
                        })
                        .collect();
                    let body = response.text().unwrap_or_default();
                    ExchangeResult {
                        status: Some(status),
                        headers,
                        body,
                    }
                }
                Err(error) => {
                    tracing::debug!(error = %error, "http exchange failed");
                    ExchangeResult {
                        status: None,
                        headers: Vec::new(),
                        body: String::new(),
                    }
                }
            };
            let _ = sender.send(result);
        });

        self.in_flight = Some(receiver);
        self.state = ReadyState::Sent;
    }

    fn ready_state(&mut self) -> ReadyState {
        if let Some(receiver) = self.in_flight.as_ref() {
            match receiver.try_recv() {
                Ok(result) => {
                    self.result = Some(result);
                    self.in_flight = None;
                    self.state = ReadyState::Done;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.in_flight = None;
                    self.state = ReadyState::Done;
                }
            }
        }
        self.state
    }

    fn status_code(&self) -> Option<u16> {
        self.result.as_ref().and_then(|result| result.status)
    }

    fn response_header(&self, name: &str) -> Option<String> {
        self.result.as_ref().and_then(|result| {
            result
                .headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        })
    }

    fn read_body(&mut self) -> String {
        self.result
            .as_mut()
            .map(|result| std::mem::take(&mut result.body))
            .unwrap_or_default()
    }
}
