use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Proxy configuration.
///
/// Field names double as the environment variable names (`ANTHROPIC_API_BASE`,
/// `PROXY_PORT`, `LOG_DIR`, ...), so every field has a default and the proxy
/// runs with no configuration at all.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_api_base")]
    pub anthropic_api_base: String,
    #[serde(default = "default_proxy_host")]
    pub proxy_host: String,
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Empty disables archival.
    #[serde(default)]
    pub s3_bucket: String,
    #[serde(default = "default_s3_prefix")]
    pub s3_prefix: String,
    #[serde(default = "default_read_timeout")]
    pub upstream_read_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub upstream_connect_timeout: u64,
    #[serde(default = "default_pool_idle_timeout")]
    pub upstream_pool_idle_timeout: u64,
    #[serde(default = "default_archive_interval")]
    pub archive_interval: u64,
}

fn default_api_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_proxy_host() -> String {
    "0.0.0.0".to_string()
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_s3_prefix() -> String {
    "claude-proxy-logs".to_string()
}

fn default_read_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_archive_interval() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_base: default_api_base(),
            proxy_host: default_proxy_host(),
            proxy_port: default_proxy_port(),
            log_dir: default_log_dir(),
            s3_bucket: String::new(),
            s3_prefix: default_s3_prefix(),
            upstream_read_timeout: default_read_timeout(),
            upstream_connect_timeout: default_connect_timeout(),
            upstream_pool_idle_timeout: default_pool_idle_timeout(),
            archive_interval: default_archive_interval(),
        }
    }
}

impl Config {
    pub fn archive_bucket(&self) -> Option<&str> {
        let bucket = self.s3_bucket.trim();
        (!bucket.is_empty()).then_some(bucket)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_read_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_pool_idle_timeout)
    }

    pub fn archive_interval(&self) -> Duration {
        Duration::from_secs(self.archive_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.anthropic_api_base, "https://api.anthropic.com");
        assert_eq!(config.proxy_port, 8080);
        assert_eq!(config.log_dir, PathBuf::from("./logs"));
        assert_eq!(config.s3_prefix, "claude-proxy-logs");
        assert_eq!(config.read_timeout(), Duration::from_secs(300));
        assert_eq!(config.archive_interval(), Duration::from_secs(300));
        assert!(config.archive_bucket().is_none());
    }

    #[test]
    fn test_blank_bucket_disables_archival() {
        let config = Config {
            s3_bucket: "   ".to_string(),
            ..Config::default()
        };
        assert!(config.archive_bucket().is_none());

        let config = Config {
            s3_bucket: "audit-logs".to_string(),
            ..Config::default()
        };
        assert_eq!(config.archive_bucket(), Some("audit-logs"));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"proxy_port": 9090}"#).unwrap();
        assert_eq!(config.proxy_port, 9090);
        assert_eq!(config.proxy_host, "0.0.0.0");
        assert_eq!(config.upstream_connect_timeout, 10);
    }
}
