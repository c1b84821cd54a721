// projectbackup/src/storage/gcs/mod.rs
pub mod auth;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::Error as ApiError;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::sign::{SignedURLMethod, SignedURLOptions};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde::Serialize;

use self::auth::{STS_TOKEN_URL, ServiceAccountKey, downscope, service_account_token};
use super::path::BackupPath;
use super::{
    BackendOptions, GcsAccessToken, MissingDestination, ScopedReadCredentials, StorageError,
    StorageResult, on_missing_destination,
};
use crate::config::GcsCredentials;
use crate::errors::AppError;

pub const SIGNED_URLS_FILE: &str = "signedUrls.json";
/// Longest validity a V4 signature accepts (7 days).
pub const SIGNED_URL_LIFETIME: Duration = Duration::from_secs(604_800);

pub struct GcsBackend {
    client: Client,
    store: Arc<dyn ObjectStore>,
    key: ServiceAccountKey,
    http: reqwest::Client,
    credentials: GcsCredentials,
    options: BackendOptions,
}

impl GcsBackend {
    pub async fn new(credentials: GcsCredentials, options: BackendOptions) -> anyhow::Result<Self> {
        let key = ServiceAccountKey::parse(&credentials.json_key)?;
        let credentials_file = CredentialsFile::new_from_str(&credentials.json_key)
            .await
            .map_err(|e| AppError::user(format!("GCS service account key is not valid: {}", e)))?;
        let config = ClientConfig::default()
            .with_credentials(credentials_file)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create GCS client: {}", e))?;

        let store = GoogleCloudStorageBuilder::new()
            .with_service_account_key(credentials.json_key.clone())
            .with_bucket_name(credentials.bucket.clone())
            .build()
            .context("Failed to create GCS object store")?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::from_parts(
            Client::new(config),
            Arc::new(store),
            key,
            http,
            credentials,
            options,
        ))
    }

    fn from_parts(
        client: Client,
        store: Arc<dyn ObjectStore>,
        key: ServiceAccountKey,
        http: reqwest::Client,
        credentials: GcsCredentials,
        options: BackendOptions,
    ) -> Self {
        GcsBackend {
            client,
            store,
            key,
            http,
            credentials,
            options,
        }
    }

    pub fn region(&self) -> &str {
        &self.credentials.region
    }

    pub async fn ensure_backup_location(&self, path: &BackupPath) -> StorageResult<GcsBackupHandle> {
        let initialized = self.has_objects_under(path.as_str()).await?;

        match on_missing_destination(initialized, self.options.user_defined_credentials) {
            MissingDestination::Proceed => {}
            // Prefixes come into existence with their first object.
            MissingDestination::Create => {}
            MissingDestination::Reject => {
                return Err(StorageError::NotFound(match path.backup_id() {
                    Some(id) => format!("Backup with ID \"{}\" was not initialized for this project", id),
                    None => format!(
                        "Backup path \"{}\" does not exist in the bucket \"{}\".",
                        path.as_str(),
                        self.credentials.bucket
                    ),
                }));
            }
        }

        Ok(GcsBackupHandle {
            client: self.client.clone(),
            store: Arc::clone(&self.store),
            bucket: self.credentials.bucket.clone(),
            path: path.clone(),
            generate_signed_urls: !self.options.user_defined_credentials,
            written: Vec::new(),
        })
    }

    pub async fn issue_read_credentials(
        &self,
        _backup_id: &str,
        path: &BackupPath,
    ) -> StorageResult<ScopedReadCredentials> {
        if !self.options.user_defined_credentials {
            self.put_marker(path.as_str()).await?;
        }

        let token = service_account_token(&self.credentials.json_key).await?;
        let scoped = downscope(&self.http, STS_TOKEN_URL, &token, &self.credentials.bucket, path.as_str()).await?;

        Ok(ScopedReadCredentials::Gcs {
            project_id: self.key.project_id.clone(),
            bucket: self.credentials.bucket.clone(),
            backup_uri: path.as_str().to_string(),
            credentials: GcsAccessToken {
                access_token: scoped.access_token,
                expires_in: scoped.expires_in,
                token_type: scoped.token_type,
            },
        })
    }

    /// Whether anything, the initialization marker included, is stored under `prefix`.
    ///
    /// A missing bucket is reported as such in every mode.
    async fn has_objects_under(&self, prefix: &str) -> StorageResult<bool> {
        let request = ListObjectsRequest {
            bucket: self.credentials.bucket.clone(),
            prefix: Some(prefix.to_string()),
            max_results: Some(1),
            ..Default::default()
        };

        match self.client.list_objects(&request).await {
            Ok(response) => Ok(response.items.is_some_and(|items| !items.is_empty())),
            Err(err) if status_of(&err) == Some(404) => Err(StorageError::NotFound(format!(
                "The specified bucket \"{}\" does not exist.",
                self.credentials.bucket
            ))),
            Err(err) => Err(classify_api_failure(
                err,
                &format!("Failed to list gs://{}/{}", self.credentials.bucket, prefix),
            )),
        }
    }

    // Zero-byte object marking an initialized backup; putting it twice is harmless.
    async fn put_marker(&self, key: &str) -> StorageResult<()> {
        let request = UploadObjectRequest {
            bucket: self.credentials.bucket.clone(),
            ..Default::default()
        };
        let upload_type = UploadType::Simple(Media::new(key.to_string()));
        self.client
            .upload_object(&request, Vec::<u8>::new(), &upload_type)
            .await
            .map_err(|err| {
                classify_api_failure(err, &format!("Failed to upload gs://{}/{}", self.credentials.bucket, key))
            })?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct SignedUrlEntry {
    pub name: String,
    pub url: String,
}

/// Destination of a `run` on GCS.
pub struct GcsBackupHandle {
    client: Client,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    path: BackupPath,
    generate_signed_urls: bool,
    written: Vec<String>,
}

impl GcsBackupHandle {
    pub async fn put_object(&mut self, key: &str, body: Vec<u8>) -> StorageResult<()> {
        self.upload(&self.path.object_key(key), body).await?;
        self.written.push(key.to_string());
        Ok(())
    }

    /// Writes the signed URL manifest when the backup is read through a downscoped token.
    pub async fn finish(&mut self) -> StorageResult<()> {
        if !self.generate_signed_urls {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(self.written.len());
        for name in &self.written {
            let options = SignedURLOptions {
                method: SignedURLMethod::GET,
                expires: SIGNED_URL_LIFETIME,
                ..Default::default()
            };
            let url = self
                .client
                .signed_url(&self.bucket, &self.path.object_key(name), None, None, options)
                .await
                .map_err(|e| {
                    StorageError::transport(anyhow::Error::new(e).context(format!("Failed to sign URL of {}", name)))
                })?;
            entries.push(SignedUrlEntry {
                name: name.clone(),
                url,
            });
        }

        tracing::info!("Writing {} signed URLs", entries.len());
        let body = serde_json::to_vec(&entries).map_err(StorageError::transport)?;
        self.upload(&self.path.object_key(SIGNED_URLS_FILE), body).await
    }

    async fn upload(&self, object: &str, body: Vec<u8>) -> StorageResult<()> {
        self.store
            .put(&ObjectPath::from(object), PutPayload::from(body))
            .await
            .map_err(|err| classify_store_failure(err, &format!("Failed to upload gs://{}/{}", self.bucket, object)))?;
        Ok(())
    }
}

fn status_of(err: &ApiError) -> Option<u16> {
    match err {
        ApiError::Response(response) => u16::try_from(response.code).ok(),
        ApiError::HttpClient(err) => err.status().map(|s| s.as_u16()),
        _ => None,
    }
}

fn classify_api_failure(err: ApiError, context: &str) -> StorageError {
    if matches!(status_of(&err), Some(401) | Some(403)) {
        let message = match &err {
            ApiError::Response(response) => response.message.clone(),
            other => other.to_string(),
        };
        return StorageError::PermissionDenied(message);
    }
    StorageError::transport(anyhow::Error::new(err).context(context.to_string()))
}

fn classify_store_failure(err: object_store::Error, context: &str) -> StorageError {
    if matches!(
        err,
        object_store::Error::PermissionDenied { .. } | object_store::Error::Unauthenticated { .. }
    ) {
        return StorageError::PermissionDenied(err.to_string());
    }
    StorageError::transport(anyhow::Error::new(err).context(context.to_string()))
}
