use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use actix_cors::Cors;
use chrono::Utc;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::http_exchange::{HttpExchange, HttpPermits};
use crate::adapters::transport::{ReqwestTransport, Transport, TransportError};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::scheduler::{Reschedule, Scheduler, Task};
use crate::app::services::SqliteHistoryLog;
use crate::app::uploader::Uploader;
use crate::domain::calendar::{Clock, LocalZone};
use crate::domain::history::HistoryLog;
use crate::domain::models::UploaderStatus;

const SCHEDULER_TICK: Duration = Duration::from_millis(50);
const COMMAND_POLL_SECS: i64 = 1;
const CONFIG_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> i64 {
        Utc::now().timestamp()
    }
}

#[derive(Debug)]
pub enum UploadCommand {
    ApplyConfig { json: String, reply: Sender<bool> },
    Stop,
    Restart,
    End,
}

/// Thread-safe front door to the upload task.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    commands: Sender<UploadCommand>,
    status: Arc<Mutex<UploaderStatus>>,
}

impl ServiceHandle {
    /// Queues a configuration; the receiver yields whether it was applied.
    pub fn submit_config(&self, json: &str) -> Receiver<bool> {
        let (reply, answer) = mpsc::channel();
        let command = UploadCommand::ApplyConfig {
            json: json.to_string(),
            reply,
        };
        if self.commands.send(command).is_err() {
            tracing::warn!("upload task is gone, configuration dropped");
        }
        answer
    }

    pub fn apply_config(&self, json: &str) -> bool {
        self.submit_config(json)
            .recv_timeout(CONFIG_REPLY_TIMEOUT)
            .unwrap_or(false)
    }

    pub fn stop(&self) {
        self.send(UploadCommand::Stop);
    }

    pub fn restart(&self) {
        self.send(UploadCommand::Restart);
    }

    pub fn end(&self) {
        self.send(UploadCommand::End);
    }

    pub fn status(&self) -> UploaderStatus {
        self.status
            .lock()
            .map(|status| *status)
            .unwrap_or_default()
    }

    fn send(&self, command: UploadCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("upload task is gone, command dropped");
        }
    }
}

/// Scheduler task owning the single uploader slot. Commands are drained at the
/// start of every step so the uploader is only touched from here.
pub struct UploadTask<L, T, C, F> {
    slot: Option<Uploader<L, T, C>>,
    uploader_due: i64,
    make_uploader: F,
    commands: Receiver<UploadCommand>,
    status: Arc<Mutex<UploaderStatus>>,
    clock: C,
}

pub fn upload_task<L, T, C, F>(make_uploader: F, clock: C) -> (UploadTask<L, T, C, F>, ServiceHandle)
where
    L: HistoryLog,
    T: Transport,
    C: Clock,
    F: FnMut() -> Result<Uploader<L, T, C>, TransportError>,
{
    let (handle, commands, status) = service_channel();

    let task = UploadTask {
        slot: None,
        uploader_due: 0,
        make_uploader,
        commands,
        status,
        clock,
    };

    (task, handle)
}

/// Handle plus the receiving ends the owner of the uploader services.
pub(crate) fn service_channel() -> (
    ServiceHandle,
    Receiver<UploadCommand>,
    Arc<Mutex<UploaderStatus>>,
) {
    let (sender, receiver) = mpsc::channel();
    let status = Arc::new(Mutex::new(UploaderStatus::default()));
    let handle = ServiceHandle {
        commands: sender,
        status: Arc::clone(&status),
    };
    (handle, receiver, status)
}

impl<L, T, C, F> UploadTask<L, T, C, F>
where
    L: HistoryLog,
    T: Transport,
    C: Clock,
    F: FnMut() -> Result<Uploader<L, T, C>, TransportError>,
{
    pub fn uploader(&self) -> Option<&Uploader<L, T, C>> {
        self.slot.as_ref()
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let was_halted = self.slot.as_ref().is_some_and(Uploader::is_halted);

            match command {
                UploadCommand::ApplyConfig { json, reply } => {
                    let applied = self.apply_config(&json);
                    let _ = reply.send(applied);
                }
                UploadCommand::Stop => self.with_uploader("stop", Uploader::stop),
                UploadCommand::Restart => self.with_uploader("restart", Uploader::restart),
                UploadCommand::End => self.with_uploader("end", Uploader::end),
            }

            if was_halted && self.slot.as_ref().is_some_and(|uploader| !uploader.is_halted()) {
                self.uploader_due = self.clock.now_utc();
            }
        }
    }

    fn apply_config(&mut self, json: &str) -> bool {
        if let Some(uploader) = self.slot.as_mut() {
            return uploader.apply_config(json);
        }

        let mut uploader = match (self.make_uploader)() {
            Ok(uploader) => uploader,
            Err(error) => {
                tracing::warn!(error = %error, "uploader could not be created");
                return false;
            }
        };
        if !uploader.apply_config(json) {
            return false;
        }

        tracing::info!("uploader created");
        self.slot = Some(uploader);
        self.uploader_due = self.clock.now_utc();
        true
    }

    fn with_uploader(&mut self, command: &str, op: impl FnOnce(&mut Uploader<L, T, C>)) {
        match self.slot.as_mut() {
            Some(uploader) => op(uploader),
            None => tracing::debug!(command, "no uploader configured, command ignored"),
        }
    }

    fn publish_status(&self) {
        let snapshot = self
            .slot
            .as_ref()
            .map(Uploader::status)
            .unwrap_or_default();
        if let Ok(mut status) = self.status.lock() {
            *status = snapshot;
        }
    }
}

impl<L, T, C, F> Task for UploadTask<L, T, C, F>
where
    L: HistoryLog,
    T: Transport,
    C: Clock,
    F: FnMut() -> Result<Uploader<L, T, C>, TransportError>,
{
    fn name(&self) -> &str {
        "pvoutput"
    }

    fn step(&mut self) -> Reschedule {
        self.drain_commands();

        let now = self.clock.now_utc();
        if let Some(uploader) = self.slot.as_mut()
            && self.uploader_due <= now
        {
            self.uploader_due = match uploader.step() {
                Reschedule::Now => now,
                Reschedule::At(due) => due,
                Reschedule::Never => i64::MAX,
            };
            if uploader.is_ended() {
                tracing::info!("uploader released");
                self.slot = None;
            }
        }

        self.publish_status();

        let now = self.clock.now_utc();
        let due = if self.slot.is_some() {
            self.uploader_due.min(now + COMMAND_POLL_SECS)
        } else {
            now + COMMAND_POLL_SECS
        };
        if due <= now {
            Reschedule::Now
        } else {
            Reschedule::At(due)
        }
    }
}

pub fn start_scheduler<Tk>(task: Tk, stop_flag: Arc<AtomicBool>) -> Result<JoinHandle<()>, AppError>
where
    Tk: Task + Send + 'static,
{
    std::thread::Builder::new()
        .name("uploader".to_string())
        .spawn(move || {
            let mut scheduler = Scheduler::new(SystemClock, SCHEDULER_TICK);
            scheduler.register(Box::new(task));
            scheduler.run(stop_flag);
        })
        .map_err(AppError::runtime)
}

fn open_history(config: &AppConfig) -> Result<SqliteHistoryLog, AppError> {
    let mut connection = open_connection(&config.history_db_path).map_err(AppError::database_init)?;
    run_migrations(&mut connection).map_err(AppError::database_init)?;
    Ok(SqliteHistoryLog::new(Arc::new(Mutex::new(connection))))
}

fn read_service_config(config: &AppConfig) -> Result<String, AppError> {
    std::fs::read_to_string(&config.service_config_path).map_err(|error| {
        AppError::config(format!(
            "cannot read {}: {error}",
            config.service_config_path
        ))
    })
}

fn spawn_upload_task(
    config: &AppConfig,
    history: SqliteHistoryLog,
    stop_flag: Arc<AtomicBool>,
) -> Result<(ServiceHandle, JoinHandle<()>), AppError> {
    let permits = HttpPermits::new(config.http_max_concurrent);
    let zone = LocalZone::from_offset_minutes(config.utc_offset_minutes);
    let base_url = config.base_url.clone();
    let timeout = config.http_timeout();

    let make_uploader = move || -> Result<Uploader<_, _, _>, TransportError> {
        let transport = ReqwestTransport::new(timeout)?;
        let exchange = HttpExchange::new(transport, permits.clone(), base_url.clone());
        Ok(Uploader::new(history.clone(), exchange, SystemClock, zone))
    };

    let (task, handle) = upload_task(make_uploader, SystemClock);
    let worker = start_scheduler(task, stop_flag)?;
    Ok((handle, worker))
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let history = open_history(&config)?;
    let service_json = read_service_config(&config)?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let (handle, worker) = spawn_upload_task(&config, history, Arc::clone(&stop_flag))?;

    if !handle.apply_config(&service_json) {
        tracing::warn!(
            path = %config.service_config_path,
            "startup service configuration not applied; waiting for POST /config"
        );
    }

    let api_state = ApiState {
        service: handle.clone(),
    };

    tracing::info!(bind = %config.http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(Cors::permissive())
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)?
        .run()
        .await
    });

    stop_flag.store(true, Ordering::Relaxed);
    if worker.join().is_err() {
        return Err(AppError::runtime("uploader thread panicked"));
    }

    server_result.map_err(AppError::runtime)
}

pub fn run_service(config: AppConfig) -> Result<(), AppError> {
    let history = open_history(&config)?;
    let service_json = read_service_config(&config)?;

    let stop_flag = Arc::new(AtomicBool::new(false));
    let (handle, worker) = spawn_upload_task(&config, history, Arc::clone(&stop_flag))?;

    if !handle.apply_config(&service_json) {
        stop_flag.store(true, Ordering::Relaxed);
        let _ = worker.join();
        return Err(AppError::config(format!(
            "service configuration in {} was rejected",
            config.service_config_path
        )));
    }

    tracing::info!(path = %config.service_config_path, "headless uploader running");

    worker
        .join()
        .map_err(|_| AppError::runtime("uploader thread panicked"))
}
