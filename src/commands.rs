use crate::config::Config;
use crate::error::Result;
use tracing::info;

const PROBE_FILE_NAME: &str = ".write-check";

/// Validate `config` and confirm the audit log directory is writable.
pub async fn run_config_check(config: Config) -> Result<()> {
    info!("Checking configuration...");

    crate::config::validate(&config)?;
    info!("✓ Configuration is valid");
    info!("  Upstream: {}", config.anthropic_api_base);
    info!("  Listen: {}", config.bind_address());
    match config.archive_bucket() {
        Some(bucket) => info!(
            "  Archive: s3://{}/{} every {:?}",
            bucket,
            config.s3_prefix,
            config.archive_interval()
        ),
        None => info!("  Archive: disabled"),
    }

    info!("Checking log directory {}", config.log_dir.display());
    tokio::fs::create_dir_all(&config.log_dir).await?;
    let probe = config.log_dir.join(PROBE_FILE_NAME);
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    info!("✓ Log directory is writable");

    info!("✓ All checks passed");
    Ok(())
}
