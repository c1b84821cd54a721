// projectbackup/src/credentials/mod.rs
use anyhow::{Context, Result};

use crate::backup::resolve_backup_path;
use crate::config::AppConfig;
use crate::platform::PlatformApi;
use crate::storage::{ScopedReadCredentials, StorageBackend};

/// Public entry point for the `generate-read-credentials` action.
///
/// Mints a new backup ID, initializes its location and returns credentials
/// that can only read it. Logs nothing above DEBUG: stdout carries the JSON
/// result alone.
pub async fn run_credentials_flow(
    app_config: &AppConfig,
    platform: &dyn PlatformApi,
    backend: &StorageBackend,
) -> Result<ScopedReadCredentials> {
    let backup_id = platform.generate_id().await.context("Failed to generate backup ID")?;
    if let Some(ignored) = &app_config.backup_id {
        tracing::debug!(ignored = %ignored, "Configured backupId is not used for new credentials");
    }
    tracing::debug!(backup_id = %backup_id, "Issuing read credentials");

    let path = resolve_backup_path(app_config, platform, &backup_id, backend.region()).await?;
    let credentials = backend.issue_read_credentials(&backup_id, &path).await?;
    Ok(credentials)
}
