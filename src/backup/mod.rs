// projectbackup/src/backup/mod.rs
mod export;
mod logic;

use anyhow::Result;

use crate::config::AppConfig;
use crate::platform::PlatformApi;
use crate::storage::StorageBackend;

pub use logic::resolve_backup_path;

/// Public entry point for the `run` action.
pub async fn run_backup_flow(
    app_config: &AppConfig,
    platform: &dyn PlatformApi,
    backend: &StorageBackend,
) -> Result<()> {
    logic::perform_backup_orchestration(app_config, platform, backend).await
}
