//! Asynchronous audit log pipeline.
//!
//! Producers hand finished [`LogEntry`] values to [`AuditLogger::log`], which
//! only pushes onto an unbounded channel. A single writer task appends each
//! entry as one JSON line to `<log_dir>/<YYYY-MM-DD>/requests.jsonl`. When an
//! [`Archiver`] is configured a second task periodically uploads completed
//! days.
//!
//! Lifecycle: `Stopped -> Running -> Draining -> Stopped`. [`AuditLogger::stop`]
//! cancels both tasks and then writes out whatever is still queued before it
//! returns.

use super::archive::{run_archive_loop, Archiver};
use super::entry::LogEntry;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const LOG_FILE_NAME: &str = "requests.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
    Draining,
}

/// Path of the day-partition file for `date` (`YYYY-MM-DD`).
pub fn log_file_path(log_dir: &Path, date: &str) -> PathBuf {
    log_dir.join(date).join(LOG_FILE_NAME)
}

pub struct AuditLogger {
    log_dir: PathBuf,
    tx: mpsc::UnboundedSender<LogEntry>,
    inner: Mutex<Inner>,
    archiver: Option<Arc<Archiver>>,
    archive_interval: Duration,
}

struct Inner {
    state: PipelineState,
    /// Parked here whenever the writer task is not running.
    rx: Option<mpsc::UnboundedReceiver<LogEntry>>,
    tasks: Option<RunningTasks>,
}

struct RunningTasks {
    shutdown: CancellationToken,
    writer: JoinHandle<mpsc::UnboundedReceiver<LogEntry>>,
    archiver: Option<JoinHandle<()>>,
}

impl AuditLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            log_dir: log_dir.into(),
            tx,
            inner: Mutex::new(Inner {
                state: PipelineState::Stopped,
                rx: Some(rx),
                tasks: None,
            }),
            archiver: None,
            archive_interval: Duration::from_secs(300),
        }
    }

    /// Enable periodic archival of completed days.
    pub fn with_archiver(mut self, archiver: Archiver, interval: Duration) -> Self {
        self.archiver = Some(Arc::new(archiver));
        self.archive_interval = interval;
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn has_archiver(&self) -> bool {
        self.archiver.is_some()
    }

    pub async fn state(&self) -> PipelineState {
        self.inner.lock().await.state
    }

    /// Spawn the writer task, plus the archival task if configured.
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != PipelineState::Stopped {
            warn!(state = ?inner.state, "Audit logger already started");
            return;
        }
        let Some(rx) = inner.rx.take() else {
            error!("Audit log queue is unavailable, logger not started");
            return;
        };

        let shutdown = CancellationToken::new();
        let writer = tokio::spawn(writer_loop(self.log_dir.clone(), rx, shutdown.clone()));
        let archiver = self.archiver.clone().map(|archiver| {
            info!(
                destination = %archiver.destination(),
                interval_secs = self.archive_interval.as_secs(),
                "Starting log archival task"
            );
            tokio::spawn(run_archive_loop(
                archiver,
                self.archive_interval,
                shutdown.clone(),
            ))
        });

        inner.tasks = Some(RunningTasks {
            shutdown,
            writer,
            archiver,
        });
        inner.state = PipelineState::Running;
        info!(log_dir = %self.log_dir.display(), "Audit logger started");
    }

    /// Queue an entry for writing. Never waits on disk.
    pub fn log(&self, entry: LogEntry) {
        if let Err(e) = self.tx.send(entry) {
            error!(request_id = %e.0.id, "Audit log queue closed, dropping entry");
        }
    }

    /// Cancel the background tasks, then write every entry still queued.
    pub async fn stop(&self) {
        let tasks = {
            let mut inner = self.inner.lock().await;
            if inner.state != PipelineState::Running {
                debug!(state = ?inner.state, "Audit logger not running, nothing to stop");
                return;
            }
            inner.state = PipelineState::Draining;
            inner.tasks.take()
        };
        let Some(tasks) = tasks else {
            self.inner.lock().await.state = PipelineState::Stopped;
            return;
        };

        tasks.shutdown.cancel();

        if let Some(handle) = tasks.archiver {
            if let Err(e) = handle.await {
                error!("Archival task ended abnormally: {}", e);
            }
        }

        let rx = match tasks.writer.await {
            Ok(rx) => Some(rx),
            Err(e) => {
                error!("Audit log writer ended abnormally: {}", e);
                None
            }
        };

        let mut inner = self.inner.lock().await;
        if let Some(mut rx) = rx {
            let mut drained = 0usize;
            while let Ok(entry) = rx.try_recv() {
                write_entry(&self.log_dir, &entry).await;
                drained += 1;
            }
            if drained > 0 {
                info!(drained, "Flushed queued audit entries on shutdown");
            }
            inner.rx = Some(rx);
        }
        inner.state = PipelineState::Stopped;
        info!("Audit logger stopped");
    }
}

async fn writer_loop(
    log_dir: PathBuf,
    mut rx: mpsc::UnboundedReceiver<LogEntry>,
    shutdown: CancellationToken,
) -> mpsc::UnboundedReceiver<LogEntry> {
    loop {
        // Cancellation is only observed while idle, never mid-append.
        let entry = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            entry = rx.recv() => entry,
        };
        match entry {
            Some(entry) => write_entry(&log_dir, &entry).await,
            None => break,
        }
    }
    rx
}

async fn write_entry(log_dir: &Path, entry: &LogEntry) {
    match append_entry(log_dir, entry).await {
        Ok(path) => debug!(request_id = %entry.id, file = %path.display(), "Wrote audit entry"),
        Err(e) => error!(request_id = %entry.id, "Failed to write audit entry: {}", e),
    }
}

async fn append_entry(log_dir: &Path, entry: &LogEntry) -> Result<PathBuf> {
    let date = entry.date();
    let dir = log_dir.join(&date);
    tokio::fs::create_dir_all(&dir).await?;

    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');

    let path = log_file_path(log_dir, &date);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;

    Ok(path)
}
