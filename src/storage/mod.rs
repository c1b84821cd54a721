// projectbackup/src/storage/mod.rs
//! Storage backends a project backup can be staged in.
//!
//! Every backend offers the same two operations: make sure the backup
//! destination exists ([`StorageBackend::ensure_backup_location`]) and mint
//! short-lived read-only credentials scoped to one backup
//! ([`StorageBackend::issue_read_credentials`]).

pub mod azure;
pub mod gcs;
pub mod path;
pub mod s3;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::{AppConfig, BackendCredentials};
use self::azure::{AzureBackupHandle, AzureBlobBackend};
use self::gcs::{GcsBackend, GcsBackupHandle};
use self::path::BackupPath;
use self::s3::{S3Backend, S3BackupHandle};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The destination is missing and may not be created here.
    #[error("{0}")]
    NotFound(String),

    /// The backend refused the credentials or the operation.
    #[error("{0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Transport(anyhow::Error),
}

impl StorageError {
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        StorageError::Transport(err.into())
    }

    pub fn is_user_facing(&self) -> bool {
        !matches!(self, StorageError::Transport(_))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Settings shared by every backend, fixed when the backend is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendOptions {
    /// The caller brought their own storage account and destination.
    pub user_defined_credentials: bool,
    pub credentials_expiration_hours: u32,
}

impl BackendOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        BackendOptions {
            user_defined_credentials: config.is_user_defined_credentials,
            credentials_expiration_hours: config.credentials_expiration_hours,
        }
    }

    pub fn credentials_lifetime_secs(&self) -> i64 {
        i64::from(self.credentials_expiration_hours) * 3600
    }
}

/// What to do when the backup destination does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingDestination {
    Proceed,
    Create,
    Reject,
}

/// Under managed credentials a destination is only ever initialized by
/// `generate-read-credentials`, so a missing one means a wrong backup ID.
pub fn on_missing_destination(exists: bool, user_defined_credentials: bool) -> MissingDestination {
    match (exists, user_defined_credentials) {
        (true, _) => MissingDestination::Proceed,
        (false, true) => MissingDestination::Create,
        (false, false) => MissingDestination::Reject,
    }
}

/// Temporary read-only access to one backup, in the shape callers consume.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScopedReadCredentials {
    #[serde(rename_all = "camelCase")]
    S3 {
        backup_id: String,
        backup_uri: String,
        region: String,
        credentials: S3TemporaryCredentials,
    },
    #[serde(rename_all = "camelCase")]
    Azure {
        backup_id: String,
        region: Option<String>,
        container: String,
        credentials: AzureSasCredentials,
    },
    #[serde(rename_all = "camelCase")]
    Gcs {
        project_id: String,
        bucket: String,
        backup_uri: String,
        credentials: GcsAccessToken,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct S3TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureSasCredentials {
    pub connection_string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsAccessToken {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

/// Sink the project exporter writes backup artifacts into.
///
/// Keys are relative to the backup path.
#[async_trait]
pub trait BackupWriter: Send {
    async fn put_object(&mut self, key: &str, body: Vec<u8>) -> StorageResult<()>;

    /// Called once after the last object has been written.
    async fn finish(&mut self) -> StorageResult<()>;
}

pub enum StorageBackend {
    S3(S3Backend),
    Azure(AzureBlobBackend),
    Gcs(GcsBackend),
}

impl StorageBackend {
    /// Builds the one backend the configuration selected.
    pub async fn create(config: &AppConfig) -> anyhow::Result<Self> {
        let options = BackendOptions::from_config(config);
        let backend = match &config.storage {
            BackendCredentials::S3(credentials) => {
                StorageBackend::S3(S3Backend::new(credentials.clone(), options).await)
            }
            BackendCredentials::Azure(credentials) => {
                StorageBackend::Azure(AzureBlobBackend::new(credentials.clone(), options)?)
            }
            BackendCredentials::Gcs(credentials) => {
                StorageBackend::Gcs(GcsBackend::new(credentials.clone(), options).await?)
            }
        };
        tracing::debug!(
            backend = %config.storage_backend_type(),
            region = config.storage.region().unwrap_or("-"),
            "Storage backend initialized"
        );
        Ok(backend)
    }

    /// Region the backend's data lives in, if configured.
    pub fn region(&self) -> Option<&str> {
        match self {
            StorageBackend::S3(b) => Some(b.region()),
            StorageBackend::Azure(b) => b.region(),
            StorageBackend::Gcs(b) => Some(b.region()),
        }
    }

    pub async fn ensure_backup_location(&self, path: &BackupPath) -> StorageResult<BackupHandle> {
        match self {
            StorageBackend::S3(b) => b.ensure_backup_location(path).await.map(BackupHandle::S3),
            StorageBackend::Azure(b) => b.ensure_backup_location(path).await.map(BackupHandle::Azure),
            StorageBackend::Gcs(b) => b.ensure_backup_location(path).await.map(BackupHandle::Gcs),
        }
    }

    pub async fn issue_read_credentials(
        &self,
        backup_id: &str,
        path: &BackupPath,
    ) -> StorageResult<ScopedReadCredentials> {
        match self {
            StorageBackend::S3(b) => b.issue_read_credentials(backup_id, path).await,
            StorageBackend::Azure(b) => b.issue_read_credentials(backup_id, path).await,
            StorageBackend::Gcs(b) => b.issue_read_credentials(backup_id, path).await,
        }
    }
}

/// An initialized backup destination, bound to its client and path.
pub enum BackupHandle {
    S3(S3BackupHandle),
    Azure(AzureBackupHandle),
    Gcs(GcsBackupHandle),
}

#[async_trait]
impl BackupWriter for BackupHandle {
    async fn put_object(&mut self, key: &str, body: Vec<u8>) -> StorageResult<()> {
        match self {
            BackupHandle::S3(h) => h.put_object(key, body).await,
            BackupHandle::Azure(h) => h.put_object(key, body).await,
            BackupHandle::Gcs(h) => h.put_object(key, body).await,
        }
    }

    async fn finish(&mut self) -> StorageResult<()> {
        match self {
            BackupHandle::S3(_) | BackupHandle::Azure(_) => Ok(()),
            BackupHandle::Gcs(h) => h.finish().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_destination_policy() {
        assert_eq!(on_missing_destination(true, false), MissingDestination::Proceed);
        assert_eq!(on_missing_destination(true, true), MissingDestination::Proceed);
        assert_eq!(on_missing_destination(false, true), MissingDestination::Create);
        assert_eq!(on_missing_destination(false, false), MissingDestination::Reject);
    }

    #[test]
    fn test_credentials_output_shapes() -> anyhow::Result<()> {
        let s3 = ScopedReadCredentials::S3 {
            backup_id: "42".to_string(),
            backup_uri: "https://bucket.s3.eu-central-1.amazonaws.com/data-takeout/eu-central-1/1/42/".to_string(),
            region: "eu-central-1".to_string(),
            credentials: S3TemporaryCredentials {
                access_key_id: "AKIA".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: "token".to_string(),
                expiration: "2026-10-20T12:00:00Z".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&s3)?,
            json!({
                "backupId": "42",
                "backupUri": "https://bucket.s3.eu-central-1.amazonaws.com/data-takeout/eu-central-1/1/42/",
                "region": "eu-central-1",
                "credentials": {
                    "accessKeyId": "AKIA",
                    "secretAccessKey": "secret",
                    "sessionToken": "token",
                    "expiration": "2026-10-20T12:00:00Z"
                }
            })
        );

        let azure = ScopedReadCredentials::Azure {
            backup_id: "42".to_string(),
            region: Some("westeurope".to_string()),
            container: "data-takeout-westeurope-1-42".to_string(),
            credentials: AzureSasCredentials {
                connection_string: "BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=sv=x".to_string(),
            },
        };
        let value = serde_json::to_value(&azure)?;
        assert_eq!(value["container"], "data-takeout-westeurope-1-42");
        assert!(value["credentials"]["connectionString"].is_string());

        let gcs = ScopedReadCredentials::Gcs {
            project_id: "my-project".to_string(),
            bucket: "bucket".to_string(),
            backup_uri: "data-takeout/us-east1/1/42/".to_string(),
            credentials: GcsAccessToken {
                access_token: "ya29".to_string(),
                expires_in: 3599,
                token_type: "Bearer".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&gcs)?,
            json!({
                "projectId": "my-project",
                "bucket": "bucket",
                "backupUri": "data-takeout/us-east1/1/42/",
                "credentials": {"accessToken": "ya29", "expiresIn": 3599, "tokenType": "Bearer"}
            })
        );
        Ok(())
    }

    #[test]
    fn test_storage_error_classes() {
        assert!(StorageError::NotFound("x".to_string()).is_user_facing());
        assert!(StorageError::PermissionDenied("x".to_string()).is_user_facing());
        assert!(!StorageError::transport(anyhow::anyhow!("boom")).is_user_facing());
    }
}
