use crate::adapters::http_exchange::{
    BeginError, ExchangeRequest, FORM_CONTENT_TYPE, HttpExchange, HttpOutcome, classify,
};
use crate::adapters::transport::Transport;
use crate::app::scheduler::Reschedule;
use crate::domain::batch::{BatchBuffer, DayBase, MetricRow, PostingWindow, RecordPair};
use crate::domain::calendar::{
    Clock, LocalZone, UNIX_DAY, format_date, format_hhmm, is_midnight, start_of_day,
};
use crate::domain::history::{HistoryError, HistoryLog};
use crate::domain::models::UploaderStatus;
use crate::domain::pv_response::ParsedResponse;
use crate::domain::rate_limit::RateLimiter;
use crate::domain::service_config::{ServiceConfig, ServiceConfigDocument};

const DEFAULT_INTERVAL_SECS: i64 = 300;
const HISTORY_RETRY_SECS: i64 = 10;
const OPEN_RETRY_SECS: i64 = 10;
const STATUS_RETRY_SECS: i64 = 2;
const TRANSPORT_RETRY_SECS: i64 = 1;
const LOAD_IN_PROGRESS_RETRY_SECS: i64 = 30;
const LIMIT_POLL_SECS: i64 = 5;
const RATE_LIMIT_BACKOFF_SECS: i64 = 300;
const CAUGHT_UP_POLL_SECS: i64 = 1;
const STOPPED_POLL_SECS: i64 = 1;
const DIAGNOSTIC_EXCERPT: usize = 40;

const PATH_GET_SYSTEM: &str = "getsystem.jsp";
const PATH_GET_STATUS: &str = "getstatus.jsp";
const PATH_ADD_BATCH_STATUS: &str = "addbatchstatus.jsp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initialize,
    GetSystemService,
    CheckSystemService,
    GetStatus,
    GotStatus,
    UploadStatus,
    CheckUploadStatus,
    HttpPost,
    HttpWait,
    LimitWait,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    pub stop: bool,
    pub restart: bool,
    pub end: bool,
    pub started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRequest {
    path: &'static str,
    on_complete: UploadState,
}

/// The upload session. Every call to [`Uploader::step`] performs one state's work
/// and returns when it wants to run again.
pub struct Uploader<L, T, C> {
    history: L,
    exchange: HttpExchange<T>,
    clock: C,
    zone: LocalZone,
    state: UploadState,
    lifecycle: Lifecycle,
    halted: bool,
    ended: bool,
    revision: Option<i64>,
    config: ServiceConfig,
    interval: i64,
    donator: bool,
    last_posted: i64,
    last_requested: i64,
    day_base: DayBase,
    rate: RateLimiter,
    batch: BatchBuffer,
    records: RecordPair,
    pending: Option<PendingRequest>,
    response: Option<ParsedResponse>,
    outcome: Option<HttpOutcome>,
}

impl<L, T, C> Uploader<L, T, C>
where
    L: HistoryLog,
    T: Transport,
    C: Clock,
{
    pub fn new(history: L, exchange: HttpExchange<T>, clock: C, zone: LocalZone) -> Self {
        Self {
            history,
            exchange,
            clock,
            zone,
            state: UploadState::Initialize,
            lifecycle: Lifecycle::default(),
            halted: false,
            ended: false,
            revision: None,
            config: ServiceConfig::default(),
            interval: DEFAULT_INTERVAL_SECS,
            donator: false,
            last_posted: 0,
            last_requested: 0,
            day_base: DayBase::default(),
            rate: RateLimiter::new(),
            batch: BatchBuffer::default(),
            records: RecordPair::default(),
            pending: None,
            response: None,
            outcome: None,
        }
    }

    pub fn step(&mut self) -> Reschedule {
        if self.halted || self.ended {
            return Reschedule::Never;
        }

        match self.state {
            UploadState::Initialize => self.initialize(),
            UploadState::GetSystemService => self.get_system_service(),
            UploadState::CheckSystemService => self.check_system_service(),
            UploadState::GetStatus => self.get_status(),
            UploadState::GotStatus => self.got_status(),
            UploadState::UploadStatus => self.upload_status(),
            UploadState::CheckUploadStatus => self.check_upload_status(),
            UploadState::HttpPost => self.http_post(),
            UploadState::HttpWait => self.http_wait(),
            UploadState::LimitWait => self.limit_wait(),
            UploadState::Stopped => self.stopped(),
        }
    }

    /// Takes effect at the top of the upload loop; does not clear a pending restart.
    pub fn stop(&mut self) {
        self.lifecycle.stop = true;
    }

    pub fn restart(&mut self) {
        if self.halted {
            self.revive();
        } else if self.state == UploadState::Stopped {
            self.lifecycle.restart = true;
        } else {
            self.lifecycle.stop = false;
            self.lifecycle.restart = false;
        }
    }

    pub fn end(&mut self) {
        self.lifecycle.end = true;
        if self.halted {
            self.halted = false;
            self.state = UploadState::Stopped;
        }
    }

    /// Applies a JSON service configuration. An unchanged revision is accepted
    /// without touching any state.
    pub fn apply_config(&mut self, json: &str) -> bool {
        let document = match ServiceConfigDocument::parse(json) {
            Ok(document) => document,
            Err(error) => {
                tracing::warn!(error = %error, "service configuration rejected");
                return false;
            }
        };

        if self.revision == Some(document.revision) {
            return true;
        }

        match ServiceConfig::from_document(document) {
            Ok(config) => {
                self.apply(config);
                true
            }
            Err(error) => {
                tracing::warn!(error = %error, "service configuration rejected");
                false
            }
        }
    }

    pub fn apply(&mut self, config: ServiceConfig) {
        if self.revision == Some(config.revision) {
            return;
        }

        tracing::info!(
            revision = config.revision,
            reload = config.reload,
            stop = config.stop,
            outputs = config.scripts.len(),
            "service configuration applied"
        );

        self.revision = Some(config.revision);
        if config.reload && self.lifecycle.started {
            self.lifecycle.restart = true;
        }
        self.lifecycle.stop = config.stop;
        self.lifecycle.started = true;
        if self.halted && !config.stop {
            self.revive();
        }
        self.config = config;
    }

    pub fn status(&self) -> UploaderStatus {
        UploaderStatus {
            running: self.lifecycle.started
                && self.state != UploadState::Stopped
                && !self.halted
                && !self.ended,
            last_posted_local_time: self.last_posted,
            last_posted_utc: self.zone.to_utc(self.last_posted),
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn revision(&self) -> Option<i64> {
        self.revision
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn is_donator(&self) -> bool {
        self.donator
    }

    pub fn last_posted(&self) -> i64 {
        self.last_posted
    }

    pub fn last_requested(&self) -> i64 {
        self.last_requested
    }

    pub fn batch_rows(&self) -> usize {
        self.batch.rows()
    }

    fn initialize(&mut self) -> Reschedule {
        if !self.history.is_open() {
            return self.after(HISTORY_RETRY_SECS);
        }
        tracing::info!("uploader started");
        self.lifecycle.started = true;
        self.state = UploadState::GetSystemService;
        Reschedule::Now
    }

    fn get_system_service(&mut self) -> Reschedule {
        self.batch.replace_body("donations=1");
        self.queue_post(PATH_GET_SYSTEM, UploadState::CheckSystemService)
    }

    fn check_system_service(&mut self) -> Reschedule {
        match self.outcome {
            Some(HttpOutcome::Ok) => {
                let response = self.take_response();
                let reported = response.integer(0, 15);
                let interval = reported
                    .checked_mul(60)
                    .filter(|seconds| (1..=UNIX_DAY).contains(seconds));
                if let Some(interval) = interval {
                    self.interval = interval;
                } else {
                    tracing::warn!(
                        reported_minutes = reported,
                        fallback = DEFAULT_INTERVAL_SECS,
                        "service reported no status interval"
                    );
                    self.interval = DEFAULT_INTERVAL_SECS;
                }
                self.donator = response.integer(2, 0) != 0;

                tracing::info!(
                    system = response.string(0, 0),
                    interval_minutes = self.interval / 60,
                    donator = self.donator,
                    "system service discovered"
                );
                self.state = UploadState::GetStatus;
                Reschedule::Now
            }
            Some(HttpOutcome::LoadInProgress | HttpOutcome::RateLimit | HttpOutcome::HttpFailure) => {
                self.state = UploadState::GetSystemService;
                Reschedule::Now
            }
            _ => self.halt("getsystem"),
        }
    }

    fn get_status(&mut self) -> Reschedule {
        self.batch.clear();
        self.queue_post(PATH_GET_STATUS, UploadState::GotStatus)
    }

    fn got_status(&mut self) -> Reschedule {
        let server_last_post = match self.outcome {
            Some(HttpOutcome::LoadInProgress | HttpOutcome::RateLimit | HttpOutcome::HttpFailure) => {
                self.state = UploadState::GetStatus;
                return self.after(STATUS_RETRY_SECS);
            }
            Some(HttpOutcome::NoStatus) => None,
            Some(HttpOutcome::Ok) => self
                .response
                .as_ref()
                .and_then(|response| response.date_time(0, 0, 1)),
            _ => return self.halt("getstatus"),
        };

        let first_key = match self.history.first_key() {
            Ok(key) => key,
            Err(error) => {
                tracing::warn!(error = %error, "history log unavailable for posting start");
                return self.after(HISTORY_RETRY_SECS);
            }
        };

        let start = PostingWindow {
            server_last_post,
            now_local: self.zone.to_local(self.clock.now_utc()),
            first_key_local: self.zone.to_local(first_key),
            interval: self.interval,
            donator: self.donator,
            reload: self.config.reload,
            begin_posting: self.config.begin_posting,
        }
        .start();

        let first = start + self.interval;
        tracing::info!(
            reload = self.config.reload,
            date = %format_date(first),
            time = %format_hhmm(first),
            "status upload beginning"
        );

        self.response = None;
        self.batch.clear();
        self.last_posted = start;
        self.last_requested = start;
        self.state = UploadState::UploadStatus;
        Reschedule::Now
    }

    fn upload_status(&mut self) -> Reschedule {
        if self.lifecycle.stop || self.lifecycle.end {
            self.release_transient();
            self.state = UploadState::Stopped;
            return Reschedule::Now;
        }
        if self.lifecycle.restart {
            self.lifecycle.restart = false;
            self.state = UploadState::GetSystemService;
            return Reschedule::Now;
        }

        if !self.day_base.covers(self.last_requested) {
            let day_start = start_of_day(self.last_requested);
            match self.history.read_at_or_after(self.zone.to_utc(day_start)) {
                Ok(midnight) => {
                    self.day_base = DayBase::from_record(&self.config.scripts, &midnight, day_start);
                }
                Err(error) => return self.history_unavailable(error),
            }
        }

        let last_key_local = match self.history.last_key() {
            Ok(key) => self.zone.to_local(key),
            Err(error) => return self.history_unavailable(error),
        };
        let next = self.last_requested + self.interval;
        let caught_up = next > last_key_local;

        if self
            .batch
            .should_flush(self.donator, caught_up, is_midnight(self.last_requested))
        {
            self.records.release();
            self.batch.close_rows();
            return self.queue_post(PATH_ADD_BATCH_STATUS, UploadState::CheckUploadStatus);
        }

        if caught_up {
            self.records.release();
            return self.after(CAUGHT_UP_POLL_SECS);
        }

        let (old, new) = match self.records.bracket(
            &self.history,
            self.zone.to_utc(self.last_requested),
            self.zone.to_utc(next),
        ) {
            Ok(pair) => pair,
            Err(error) => {
                tracing::warn!(error = %error, "history log read failed");
                return Reschedule::At(self.clock.now_utc() + HISTORY_RETRY_SECS);
            }
        };

        let elapsed_hours = new.log_hours - old.log_hours;
        if elapsed_hours == 0.0 {
            self.last_requested = next;
            if self.batch.rows() == 0 {
                self.last_posted = self.last_requested;
            }
            return Reschedule::Now;
        }

        let row = MetricRow::compute(&self.config.scripts, old, new, elapsed_hours, &self.day_base);
        self.batch.push_row(&row, self.last_requested, self.donator);
        self.last_requested = next;
        Reschedule::Now
    }

    fn check_upload_status(&mut self) -> Reschedule {
        match self.outcome {
            Some(HttpOutcome::Ok) => {
                self.last_posted = self.last_requested;
            }
            Some(
                outcome @ (HttpOutcome::DateTooOld
                | HttpOutcome::DateInFuture
                | HttpOutcome::MoonPowered
                | HttpOutcome::NoStatus),
            ) => {
                tracing::warn!(
                    ?outcome,
                    through = %format_hhmm(self.last_requested),
                    "batch rejected by service, skipping"
                );
                self.last_posted = self.last_requested;
            }
            Some(HttpOutcome::LoadInProgress | HttpOutcome::RateLimit | HttpOutcome::HttpFailure) => {
                self.last_requested = self.last_posted;
                self.batch.clear();
            }
            None => return self.halt("addbatchstatus"),
        }

        self.response = None;
        self.state = UploadState::UploadStatus;
        Reschedule::Now
    }

    fn http_post(&mut self) -> Reschedule {
        let now = self.clock.now_utc();
        if self.rate.must_wait(now) {
            self.log_rate_limit();
            self.state = UploadState::LimitWait;
            return Reschedule::Now;
        }

        let Some(pending) = self.pending else {
            tracing::error!("http post without a queued request");
            return self.halt("post");
        };

        let request = ExchangeRequest {
            path: pending.path,
            content_type: FORM_CONTENT_TYPE,
            api_key: &self.config.api_key,
            system_id: &self.config.system_id,
            body: self.batch.body(),
        };

        match self.exchange.begin(&request) {
            Ok(()) => {
                self.batch.clear_body();
                self.state = UploadState::HttpWait;
                Reschedule::Now
            }
            Err(BeginError::PermitUnavailable) => Reschedule::Now,
            Err(error @ BeginError::OpenFailed(_)) => {
                tracing::warn!(error = %error, path = pending.path, "http request not opened");
                Reschedule::At(now + OPEN_RETRY_SECS)
            }
        }
    }

    fn http_wait(&mut self) -> Reschedule {
        let Some(completion) = self.exchange.poll() else {
            return Reschedule::Now;
        };

        if let Some(pending) = self.pending {
            self.state = pending.on_complete;
        }
        self.rate.observe(
            completion.limit.as_deref(),
            completion.remaining.as_deref(),
            completion.reset.as_deref(),
        );

        let response = ParsedResponse::new(completion.body);
        self.outcome = classify(completion.status, &response);
        self.response = Some(response);

        match self.outcome {
            Some(HttpOutcome::HttpFailure) => {
                tracing::warn!(state = ?self.state, "http exchange failed");
                self.after(TRANSPORT_RETRY_SECS)
            }
            Some(HttpOutcome::LoadInProgress) => {
                tracing::warn!("service load in progress");
                self.after(LOAD_IN_PROGRESS_RETRY_SECS)
            }
            Some(HttpOutcome::RateLimit) => {
                self.rate.exhausted(self.clock.now_utc(), RATE_LIMIT_BACKOFF_SECS);
                self.log_rate_limit();
                Reschedule::Now
            }
            Some(_) => Reschedule::Now,
            None => {
                tracing::error!(status = ?completion.status, "unrecognized http response");
                self.halt("response")
            }
        }
    }

    fn limit_wait(&mut self) -> Reschedule {
        let now = self.clock.now_utc();
        if self.rate.reset_passed(now) {
            self.state = UploadState::HttpPost;
            return Reschedule::Now;
        }
        Reschedule::At(now + LIMIT_POLL_SECS)
    }

    fn stopped(&mut self) -> Reschedule {
        if self.lifecycle.end {
            tracing::info!("uploader ended");
            self.release_transient();
            self.ended = true;
            return Reschedule::Never;
        }
        if self.lifecycle.restart {
            tracing::info!("uploader restarting");
            self.lifecycle.restart = false;
            self.lifecycle.stop = false;
            self.state = UploadState::GetSystemService;
            return Reschedule::Now;
        }
        if self.lifecycle.stop {
            return self.after(STOPPED_POLL_SECS);
        }
        self.state = UploadState::UploadStatus;
        Reschedule::Now
    }

    fn queue_post(&mut self, path: &'static str, on_complete: UploadState) -> Reschedule {
        self.pending = Some(PendingRequest { path, on_complete });
        self.state = UploadState::HttpPost;
        Reschedule::Now
    }

    fn take_response(&mut self) -> ParsedResponse {
        self.response
            .take()
            .unwrap_or_else(|| ParsedResponse::new(""))
    }

    fn history_unavailable(&self, error: HistoryError) -> Reschedule {
        tracing::warn!(error = %error, "history log read failed");
        self.after(HISTORY_RETRY_SECS)
    }

    fn log_rate_limit(&self) {
        let reset_local = self.zone.to_local(self.rate.reset_at_utc().unwrap_or(0));
        tracing::warn!(
            remaining = ?self.rate.remaining(),
            limit = ?self.rate.limit(),
            until = %format_hhmm(reset_local),
            "transaction rate limit exceeded, waiting"
        );
    }

    fn halt(&mut self, context: &str) -> Reschedule {
        let excerpt = self
            .response
            .as_ref()
            .map(|response| response.peek(DIAGNOSTIC_EXCERPT).to_string())
            .unwrap_or_default();
        tracing::error!(
            context,
            state = ?self.state,
            response = %excerpt,
            "unrecognized http completion, uploader halted"
        );
        self.release_transient();
        self.halted = true;
        Reschedule::Never
    }

    fn revive(&mut self) {
        tracing::info!("halted uploader re-armed");
        self.halted = false;
        self.state = UploadState::Stopped;
        self.lifecycle.restart = true;
    }

    fn release_transient(&mut self) {
        self.records.release();
        self.exchange.release();
        self.pending = None;
        self.response = None;
    }

    fn after(&self, seconds: i64) -> Reschedule {
        Reschedule::At(self.clock.now_utc() + seconds)
    }
}
