use crate::audit::{Archiver, AuditLogger, S3ArchiveStore};
use crate::config::Config;
use crate::error::{ProxyError, Result};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared components for request handling. Built once at startup and passed
/// to the server; nothing here is process-global.
pub struct AppState {
    pub config: Config,
    pub client: reqwest::Client,
    pub audit: Arc<AuditLogger>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: Config,
        audit: Arc<AuditLogger>,
    ) -> Result<(Arc<Self>, broadcast::Receiver<()>)> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        let client = build_upstream_client(&config)?;

        let state = Arc::new(Self {
            config,
            client,
            audit,
            shutdown_tx,
        });

        Ok((state, shutdown_rx))
    }

    /// Upstream URL for an inbound path and optional raw query string.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let base = self.config.anthropic_api_base.trim_end_matches('/');
        match query {
            Some(query) if !query.is_empty() => format!("{base}{path}?{query}"),
            _ => format!("{base}{path}"),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Connection pool shared by every relayed request. Redirects are followed
/// and compressed responses are decoded.
pub fn build_upstream_client(config: &Config) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .pool_idle_timeout(config.pool_idle_timeout())
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(ProxyError::Upstream)
}

/// The audit logger for `config`, archiving to S3 when a bucket is set.
pub async fn audit_logger_from_config(config: &Config) -> AuditLogger {
    let logger = AuditLogger::new(config.log_dir.clone());
    match config.archive_bucket() {
        Some(bucket) => {
            let store = S3ArchiveStore::from_env(bucket).await;
            let archiver = Archiver::new(
                config.log_dir.clone(),
                config.s3_prefix.clone(),
                Arc::new(store),
            );
            logger.with_archiver(archiver, config.archive_interval())
        }
        None => logger,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_base(base: &str) -> Arc<AppState> {
        let config = Config {
            anthropic_api_base: base.to_string(),
            ..Config::default()
        };
        let audit = Arc::new(AuditLogger::new(std::env::temp_dir()));
        AppState::new(config, audit).unwrap().0
    }

    #[test]
    fn test_upstream_url() {
        let state = state_with_base("https://api.anthropic.com/");
        assert_eq!(
            state.upstream_url("/v1/messages", None),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            state.upstream_url("/v1/models", Some("limit=5")),
            "https://api.anthropic.com/v1/models?limit=5"
        );
        assert_eq!(
            state.upstream_url("/v1/models", Some("")),
            "https://api.anthropic.com/v1/models"
        );
    }

    #[test]
    fn test_upstream_url_keeps_base_path() {
        let state = state_with_base("http://gateway.internal/anthropic");
        assert_eq!(
            state.upstream_url("/v1/messages", None),
            "http://gateway.internal/anthropic/v1/messages"
        );
    }

    #[tokio::test]
    async fn test_shutdown_notifies_subscribers() {
        let state = state_with_base("https://api.anthropic.com");
        let mut rx = state.shutdown_tx.subscribe();
        state.shutdown();
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_audit_logger_without_bucket_has_no_archival() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            log_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let logger = audit_logger_from_config(&config).await;
        assert_eq!(logger.log_dir(), dir.path());
        assert!(!logger.has_archiver());
    }
}
