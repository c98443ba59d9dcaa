use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use std::path::Path;

/// Environment variables read on top of any config file.
const ENV_KEYS: &[&str] = &[
    "ANTHROPIC_API_BASE",
    "PROXY_HOST",
    "PROXY_PORT",
    "LOG_DIR",
    "S3_BUCKET",
    "S3_PREFIX",
    "UPSTREAM_READ_TIMEOUT",
    "UPSTREAM_CONNECT_TIMEOUT",
    "UPSTREAM_POOL_IDLE_TIMEOUT",
    "ARCHIVE_INTERVAL",
];

fn env_provider() -> Env {
    Env::raw().only(ENV_KEYS)
}

pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file("claude-log-proxy.toml"))
        .merge(Json::file("claude-log-proxy.json"))
        .merge(Yaml::file("claude-log-proxy.yaml"))
        .merge(Yaml::file("claude-log-proxy.yml"))
        .merge(env_provider())
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    let config: Config = figment
        .merge(env_provider())
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let base = url::Url::parse(&config.anthropic_api_base).map_err(|e| {
        ConfigError::Validation(format!(
            "Invalid upstream base URL '{}': {}",
            config.anthropic_api_base, e
        ))
    })?;
    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Upstream base URL must be http or https, got '{}'",
            base.scheme()
        ))
        .into());
    }

    if config.proxy_port == 0 {
        return Err(ConfigError::Validation("Proxy port must be greater than 0".into()).into());
    }

    let timeouts = [
        ("UPSTREAM_READ_TIMEOUT", config.upstream_read_timeout),
        ("UPSTREAM_CONNECT_TIMEOUT", config.upstream_connect_timeout),
        ("UPSTREAM_POOL_IDLE_TIMEOUT", config.upstream_pool_idle_timeout),
        ("ARCHIVE_INTERVAL", config.archive_interval),
    ];
    for (name, value) in timeouts {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{name} must be greater than 0")).into());
        }
    }

    Ok(())
}
