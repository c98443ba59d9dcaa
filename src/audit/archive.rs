//! Periodic upload of completed day-partitions to object storage.
//!
//! Every cycle re-uploads every completed day still present under the log
//! directory. Overwriting an object that was already uploaded is expected;
//! there is no per-file completion tracking.

use super::pipeline::LOG_FILE_NAME;
use crate::error::ArchiveError;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Destination for archived log files.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Upload the file at `path` under `key`, replacing any existing object.
    async fn upload(&self, path: &Path, key: &str) -> Result<(), ArchiveError>;

    /// Human-readable destination, e.g. `s3://bucket`.
    fn destination(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub uploaded: usize,
    pub failed: usize,
}

pub struct Archiver {
    log_dir: PathBuf,
    prefix: String,
    store: Arc<dyn ArchiveStore>,
}

impl Archiver {
    pub fn new(
        log_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        store: Arc<dyn ArchiveStore>,
    ) -> Self {
        Self {
            log_dir: log_dir.into(),
            prefix: prefix.into(),
            store,
        }
    }

    pub fn destination(&self) -> String {
        self.store.destination()
    }

    /// `{prefix}/{date}/requests.jsonl`, or `{date}/requests.jsonl` with an
    /// empty prefix.
    pub fn object_key(&self, date: NaiveDate) -> String {
        let date = date.format(DATE_FORMAT);
        match self.prefix.trim_matches('/') {
            "" => format!("{date}/{LOG_FILE_NAME}"),
            prefix => format!("{prefix}/{date}/{LOG_FILE_NAME}"),
        }
    }

    /// Upload every day-partition strictly older than `today`.
    ///
    /// A failed upload is reported and counted; the remaining days are still
    /// attempted. Only failing to scan the log directory is an error.
    pub async fn upload_completed_logs(
        &self,
        today: NaiveDate,
    ) -> Result<ArchiveReport, ArchiveError> {
        let mut report = ArchiveReport::default();
        let completed = self.completed_days(today).await?;

        for (date, file) in completed {
            let key = self.object_key(date);
            match self.store.upload(&file, &key).await {
                Ok(()) => {
                    info!(
                        file = %file.display(),
                        destination = %self.store.destination(),
                        key = %key,
                        "Archived log file"
                    );
                    report.uploaded += 1;
                }
                Err(e) => {
                    error!(file = %file.display(), key = %key, "Log archival failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn completed_days(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<(NaiveDate, PathBuf)>, ArchiveError> {
        if !tokio::fs::try_exists(&self.log_dir).await? {
            return Ok(Vec::new());
        }

        let mut days = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.log_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(date) = entry.file_name().to_str().and_then(parse_partition) else {
                continue;
            };
            if date >= today {
                continue;
            }
            let file = entry.path().join(LOG_FILE_NAME);
            if tokio::fs::try_exists(&file).await? {
                days.push((date, file));
            }
        }

        days.sort();
        Ok(days)
    }
}

fn parse_partition(name: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(name, DATE_FORMAT).ok()?;
    (date.format(DATE_FORMAT).to_string() == name).then_some(date)
}

pub(crate) async fn run_archive_loop(
    archiver: Arc<Archiver>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = async {
                tokio::time::sleep(interval).await;
                run_cycle(&archiver).await;
            } => {}
        }
    }
    debug!("Archival task stopped");
}

async fn run_cycle(archiver: &Archiver) {
    let today = Utc::now().date_naive();
    match archiver.upload_completed_logs(today).await {
        Ok(report) => debug!(
            uploaded = report.uploaded,
            failed = report.failed,
            "Archival cycle finished"
        ),
        Err(e) => error!("Archival cycle failed: {}", e),
    }
}
