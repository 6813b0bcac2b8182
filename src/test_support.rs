use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::adapters::transport::{ReadyState, Transport, TransportError};
use crate::domain::calendar::Clock;
use crate::domain::history::{HistoryError, HistoryLog};
use crate::domain::models::LogRecord;

pub fn record(unix_time: i64, log_hours: f64, channels: &[f64]) -> LogRecord {
    LogRecord {
        unix_time,
        log_hours,
        channels: channels.to_vec(),
    }
}

/// History log over an in-memory vector; clones share the same records.
#[derive(Debug, Clone)]
pub struct MemoryHistoryLog {
    records: Rc<RefCell<Vec<LogRecord>>>,
    reads: Rc<Cell<usize>>,
    open: Rc<Cell<bool>>,
}

impl MemoryHistoryLog {
    pub fn new(mut records: Vec<LogRecord>) -> Self {
        records.sort_by_key(|record| record.unix_time);
        Self {
            records: Rc::new(RefCell::new(records)),
            reads: Rc::new(Cell::new(0)),
            open: Rc::new(Cell::new(true)),
        }
    }

    pub fn push(&self, record: LogRecord) {
        let mut records = self.records.borrow_mut();
        records.push(record);
        records.sort_by_key(|record| record.unix_time);
    }

    pub fn set_open(&self, open: bool) {
        self.open.set(open);
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl HistoryLog for MemoryHistoryLog {
    fn is_open(&self) -> bool {
        self.open.get()
    }

    fn first_key(&self) -> Result<i64, HistoryError> {
        self.records
            .borrow()
            .first()
            .map(|record| record.unix_time)
            .ok_or(HistoryError::Empty)
    }

    fn last_key(&self) -> Result<i64, HistoryError> {
        self.records
            .borrow()
            .last()
            .map(|record| record.unix_time)
            .ok_or(HistoryError::Empty)
    }

    fn read_at_or_after(&self, key: i64) -> Result<LogRecord, HistoryError> {
        self.reads.set(self.reads.get() + 1);
        self.records
            .borrow()
            .iter()
            .find(|record| record.unix_time >= key)
            .map(|record| LogRecord {
                unix_time: key,
                ..record.clone()
            })
            .ok_or(HistoryError::NoRecordAtOrAfter(key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CannedResponse {
    pub status: Option<u16>,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl CannedResponse {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(code: u16, body: &str) -> Self {
        Self {
            status: Some(code),
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn failure() -> Self {
        Self {
            status: None,
            body: String::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn path(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or("")
    }
}

/// Transport answering from a queue of canned responses. A send with nothing
/// queued stays pending forever. Clones share queue and request log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    responses: Rc<RefCell<VecDeque<CannedResponse>>>,
    requests: Rc<RefCell<Vec<RecordedRequest>>>,
    fail_open: Rc<Cell<bool>>,
    pending: Option<RecordedRequest>,
    current: Option<CannedResponse>,
    state: ReadyState,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<CannedResponse>) -> Self {
        Self {
            responses: Rc::new(RefCell::new(responses.into())),
            ..Self::default()
        }
    }

    pub fn never_completes() -> Self {
        Self::default()
    }

    pub fn failing_open() -> Self {
        let transport = Self::default();
        transport.fail_open.set(true);
        transport
    }

    pub fn push(&self, response: CannedResponse) {
        self.responses.borrow_mut().push_back(response);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.set(fail);
    }

    pub fn requests(&self) -> Rc<RefCell<Vec<RecordedRequest>>> {
        Rc::clone(&self.requests)
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self, method: &str, url: &str) -> Result<(), TransportError> {
        if self.fail_open.get() {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                reason: "scripted open failure".to_string(),
            });
        }
        self.pending = Some(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
        });
        self.current = None;
        self.state = ReadyState::Opened;
        Ok(())
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if let Some(pending) = self.pending.as_mut() {
            pending.headers.push((name.to_string(), value.to_string()));
        }
    }

    fn send(&mut self, body: Option<String>) {
        if let Some(mut pending) = self.pending.take() {
            pending.body = body;
            self.requests.borrow_mut().push(pending);
        }
        self.state = ReadyState::Sent;
    }

    fn ready_state(&mut self) -> ReadyState {
        if self.state == ReadyState::Sent
            && let Some(response) = self.responses.borrow_mut().pop_front()
        {
            self.current = Some(response);
            self.state = ReadyState::Done;
        }
        self.state
    }

    fn status_code(&self) -> Option<u16> {
        self.current.as_ref().and_then(|response| response.status)
    }

    fn response_header(&self, name: &str) -> Option<String> {
        self.current.as_ref().and_then(|response| {
            response
                .headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        })
    }

    fn read_body(&mut self) -> String {
        self.current
            .as_mut()
            .map(|response| std::mem::take(&mut response.body))
            .unwrap_or_default()
    }
}

/// Clock whose time is set by the test; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now: Rc<Cell<i64>>,
}

impl FakeClock {
    pub fn new(now_utc: i64) -> Self {
        Self {
            now: Rc::new(Cell::new(now_utc)),
        }
    }

    pub fn set(&self, now_utc: i64) {
        self.now.set(now_utc);
    }
}

impl Clock for FakeClock {
    fn now_utc(&self) -> i64 {
        self.now.get()
    }
}
