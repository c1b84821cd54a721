// projectbackup/src/storage/azure.rs
//! Azure Blob Storage backend; every backup lives in a container of its own.
use std::time::Duration;

use azure_core::error::HttpError;
use azure_core::{ExponentialRetryOptions, RetryOptions, StatusCode};
use azure_storage::shared_access_signature::service_sas::BlobSasPermissions;
use azure_storage::shared_access_signature::{SasProtocol, SasToken};
use azure_storage::{CloudLocation, StorageCredentials};
use azure_storage_blobs::prelude::{BlobServiceClient, ClientBuilder, ContainerClient};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use regex::Regex;
use time::OffsetDateTime;

use super::path::BackupPath;
use super::{
    AzureSasCredentials, BackendOptions, MissingDestination, ScopedReadCredentials, StorageError,
    StorageResult, on_missing_destination,
};
use crate::config::AzureCredentials;
use crate::errors::AppError;

/// Lowercase letters, digits and single dashes; 3 to 63 characters.
const CONTAINER_NAME_PATTERN: &str = r"^[a-z0-9](?:-?[a-z0-9])*$";

/// Attempts per request, the first one included.
const MAX_ATTEMPTS: u32 = 20;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(600);

pub struct AzureBlobBackend {
    client: BlobServiceClient,
    credentials: AzureCredentials,
    options: BackendOptions,
}

impl AzureBlobBackend {
    pub fn new(credentials: AzureCredentials, options: BackendOptions) -> anyhow::Result<Self> {
        let location = CloudLocation::Public {
            account: credentials.account_name.clone(),
        };
        Self::with_location(credentials, location, options)
    }

    /// Backend bound to an explicit blob endpoint.
    pub fn with_location(
        credentials: AzureCredentials,
        location: CloudLocation,
        options: BackendOptions,
    ) -> anyhow::Result<Self> {
        let account_key = credentials.account_key.trim().to_string();
        STANDARD
            .decode(&account_key)
            .map_err(|_| AppError::user("Azure account key is not valid base64."))?;

        let storage_credentials = StorageCredentials::access_key(credentials.account_name.clone(), account_key);
        let client = ClientBuilder::with_location(location, storage_credentials)
            .retry(retry_options())
            .blob_service_client();

        Ok(AzureBlobBackend {
            client,
            credentials,
            options,
        })
    }

    pub fn region(&self) -> Option<&str> {
        self.credentials.region.as_deref()
    }

    pub async fn ensure_backup_location(&self, path: &BackupPath) -> StorageResult<AzureBackupHandle> {
        let container = path.container_name();
        validate_container_name(&container)?;
        let container_client = self.client.container_client(&container);

        let exists = container_client
            .exists()
            .await
            .map_err(|err| rejection(err, &format!("Failed to check container \"{}\"", container)))?;
        match on_missing_destination(exists, self.options.user_defined_credentials) {
            MissingDestination::Proceed => {}
            MissingDestination::Create => {
                tracing::info!("Creating container \"{}\"", container);
                create_container(&container_client).await?;
            }
            MissingDestination::Reject => {
                return Err(StorageError::NotFound(format!(
                    "The specified container \"{}\" does not exist.",
                    container
                )));
            }
        }

        Ok(AzureBackupHandle {
            container: container_client,
        })
    }

    pub async fn issue_read_credentials(
        &self,
        backup_id: &str,
        path: &BackupPath,
    ) -> StorageResult<ScopedReadCredentials> {
        let container = path.container_name();
        validate_container_name(&container)?;
        let container_client = self.client.container_client(&container);
        create_container(&container_client).await?;

        let starts_on = OffsetDateTime::now_utc();
        let expires_on = starts_on + time::Duration::seconds(self.options.credentials_lifetime_secs());
        let permissions = BlobSasPermissions {
            read: true,
            list: true,
            ..Default::default()
        };
        let sas = container_client
            .shared_access_signature(permissions, expires_on)
            .await
            .map_err(|err| rejection(err, "Failed to sign the container SAS"))?
            .start(starts_on)
            .protocol(SasProtocol::Https);
        let token = sas
            .token()
            .map_err(|err| rejection(err, "Failed to sign the container SAS"))?;

        Ok(ScopedReadCredentials::Azure {
            backup_id: backup_id.to_string(),
            region: self.credentials.region.clone(),
            credentials: AzureSasCredentials {
                connection_string: connection_string(&self.credentials.account_name, &token),
            },
            container,
        })
    }
}

/// Destination of a `run` on Azure; the container is the backup root.
pub struct AzureBackupHandle {
    container: ContainerClient,
}

impl AzureBackupHandle {
    pub async fn put_object(&self, key: &str, body: Vec<u8>) -> StorageResult<()> {
        self.container
            .blob_client(key)
            .put_block_blob(Bytes::from(body))
            .await
            .map_err(|err| {
                rejection(
                    err,
                    &format!("Failed to upload blob \"{}/{}\"", self.container.container_name(), key),
                )
            })?;
        Ok(())
    }
}

fn retry_options() -> RetryOptions {
    RetryOptions::exponential(
        ExponentialRetryOptions::default()
            .max_retries(MAX_ATTEMPTS - 1)
            .initial_delay(INITIAL_RETRY_DELAY)
            .max_delay(MAX_RETRY_DELAY)
            .max_total_elapsed(MAX_RETRY_ELAPSED),
    )
}

/// Creates the container; one that already exists is left as is.
async fn create_container(container: &ContainerClient) -> StorageResult<()> {
    match container.create().await {
        Ok(_) => Ok(()),
        Err(err) if has_status(&err, StatusCode::Conflict) => Ok(()),
        Err(err) => Err(rejection(
            err,
            &format!("Failed to create container \"{}\"", container.container_name()),
        )),
    }
}

pub fn connection_string(account_name: &str, sas_token: &str) -> String {
    format!(
        "BlobEndpoint=https://{}.blob.core.windows.net;SharedAccessSignature={}",
        account_name, sas_token
    )
}

fn validate_container_name(container: &str) -> StorageResult<()> {
    let pattern = Regex::new(CONTAINER_NAME_PATTERN).map_err(StorageError::transport)?;
    if (3..=63).contains(&container.len()) && pattern.is_match(container) {
        return Ok(());
    }
    Err(StorageError::NotFound(format!(
        "Container name \"{}\" is not valid. Use lowercase letters, digits and single dashes (3 to 63 characters).",
        container
    )))
}

fn has_status(err: &azure_core::Error, status: StatusCode) -> bool {
    err.as_http_error().is_some_and(|http| http.status() == status)
}

fn rejection(err: azure_core::Error, context: &str) -> StorageError {
    if let Some(http) = err.as_http_error() {
        if matches!(http.status(), StatusCode::Forbidden | StatusCode::Unauthorized) {
            return StorageError::PermissionDenied(denied_message(http));
        }
    }
    StorageError::transport(anyhow::Error::new(err).context(context.to_string()))
}

fn denied_message(http: &HttpError) -> String {
    match http.error_code() {
        Some(code) => format!("Azure Blob Storage rejected the request: {}", code),
        None => format!("Azure Blob Storage rejected the request: HTTP {}", http.status()),
    }
}
