//! Project Backup Tool
//!
//! Exports a project into S3, Azure Blob Storage or Google Cloud Storage and
//! issues read-only credentials for retrieving the export.

// projectbackup/src/main.rs
mod backup;
mod config;
mod credentials;
mod errors;
mod platform;
mod storage;
mod utils;

use anyhow::{Context, Result};
use config::{Action, AppConfig};
use platform::StorageApiClient;
use std::process::ExitCode;
use storage::StorageBackend;
use utils::setting::RuntimeEnv;

/// Main entry point for the backup tool
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    utils::logging::init();

    match run_app().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let (code, message) = errors::classify(&e);
            match message {
                Some(message) => eprintln!("{}", message),
                None => eprintln!("❌ Error: {:?}", e),
            }
            ExitCode::from(code)
        }
    }
}

async fn run_app() -> Result<()> {
    let env = RuntimeEnv::from_env()?;
    let config_path = env.config_path();
    let app_config = AppConfig::load_from_json(&config_path)
        .with_context(|| format!("Failed to load application configuration from {}", config_path.display()))?;
    tracing::debug!(
        action = ?app_config.action,
        backend = %app_config.storage_backend_type(),
        user_defined = app_config.is_user_defined_credentials,
        "Configuration loaded"
    );

    let platform = StorageApiClient::from_env(&env)?;
    let backend = StorageBackend::create(&app_config).await?;

    match app_config.action {
        Action::Run => {
            backup::run_backup_flow(&app_config, &platform, &backend)
                .await
                .context("Backup process failed")?;
            tracing::info!("Backup completed successfully");
        }
        Action::GenerateReadCredentials => {
            let credentials = credentials::run_credentials_flow(&app_config, &platform, &backend)
                .await
                .context("Failed to generate read credentials")?;
            let output = serde_json::to_string(&credentials).context("Failed to serialize credentials")?;
            println!("{}", output);
        }
    }
    Ok(())
}
