// projectbackup/src/backup/logic.rs
use anyhow::{Context, Result};

use super::export::{ExportOptions, export_project};
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::platform::PlatformApi;
use crate::storage::StorageBackend;
use crate::storage::path::{BackupPath, guard_region};

/// Where the backup with `backup_id` lives.
///
/// With managed credentials the path is derived from the token's project and
/// must sit in the backend's region; otherwise the configured path is used.
pub async fn resolve_backup_path(
    config: &AppConfig,
    platform: &dyn PlatformApi,
    backup_id: &str,
    backend_region: Option<&str>,
) -> Result<BackupPath> {
    if config.is_user_defined_credentials {
        let path = config
            .backup_path
            .as_deref()
            .ok_or_else(|| AppError::missing_parameter("backupPath"))?;
        return Ok(BackupPath::user_defined(path));
    }

    let region = backend_region.ok_or_else(|| AppError::missing_parameter("region"))?;
    let token = platform
        .verify_token()
        .await
        .context("Failed to verify Storage API token")?;
    guard_region(region, &token.owner.id, &token.owner.region)?;

    Ok(BackupPath::resolve(backup_id, &token.owner.region, &token.owner.id))
}

/// Runs a backup: resolve the path, make sure it is initialized, export the project.
pub async fn perform_backup_orchestration(
    config: &AppConfig,
    platform: &dyn PlatformApi,
    backend: &StorageBackend,
) -> Result<()> {
    let backup_id = config.backup_id.as_deref().unwrap_or_default();
    let path = resolve_backup_path(config, platform, backup_id, backend.region()).await?;
    tracing::debug!(path = path.as_str(), "Backup path resolved");

    let mut handle = backend.ensure_backup_location(&path).await?;

    let options = ExportOptions {
        structure_only: config.export_structure_only,
        include_versions: config.include_versions,
    };
    export_project(platform, &mut handle, options).await
}
