// projectbackup/src/storage/s3.rs
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_sts as sts;
use aws_sdk_sts::primitives::DateTimeFormat;
use s3::config::Region;
use s3::primitives::ByteStream;
use serde_json::{Value, json};

use super::path::BackupPath;
use super::{
    BackendOptions, MissingDestination, S3TemporaryCredentials, ScopedReadCredentials, StorageError,
    StorageResult, on_missing_destination,
};
use crate::config::S3Credentials;

const FEDERATION_TOKEN_NAME: &str = "GetProjectBackupFile";

// Error codes that mean the configured credentials are wrong or not allowed.
const DENIED_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
];

pub struct S3Backend {
    client: s3::Client,
    sts: sts::Client,
    credentials: S3Credentials,
    options: BackendOptions,
}

impl S3Backend {
    pub async fn new(credentials: S3Credentials, options: BackendOptions) -> Self {
        Self::with_endpoint(credentials, options, None).await
    }

    /// Backend talking to `endpoint_url` instead of AWS; such endpoints are addressed path-style.
    pub async fn with_endpoint(
        credentials: S3Credentials,
        options: BackendOptions,
        endpoint_url: Option<&str>,
    ) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &credentials.access_key_id,
                &credentials.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ));
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint_url.is_some())
            .build();

        S3Backend {
            client: s3::Client::from_conf(s3_config),
            sts: sts::Client::new(&sdk_config),
            credentials,
            options,
        }
    }

    pub fn region(&self) -> &str {
        &self.credentials.region
    }

    pub async fn ensure_backup_location(&self, path: &BackupPath) -> StorageResult<S3BackupHandle> {
        let exists = self.marker_exists(path.as_str()).await?;

        match on_missing_destination(exists, self.options.user_defined_credentials) {
            MissingDestination::Proceed => {}
            MissingDestination::Create => {
                tracing::info!("Creating backup folder \"{}\"", path.as_str());
                self.put_marker(path.as_str()).await?;
            }
            MissingDestination::Reject => {
                return Err(StorageError::NotFound(match path.backup_id() {
                    Some(id) => format!("Backup with ID \"{}\" was not initialized for this project", id),
                    None => format!(
                        "Backup path \"{}\" not found in the bucket \"{}\".",
                        path.as_str(),
                        self.credentials.bucket
                    ),
                }));
            }
        }

        Ok(S3BackupHandle {
            client: self.client.clone(),
            bucket: self.credentials.bucket.clone(),
            path: path.clone(),
        })
    }

    pub async fn issue_read_credentials(
        &self,
        backup_id: &str,
        path: &BackupPath,
    ) -> StorageResult<ScopedReadCredentials> {
        self.put_marker(path.as_str()).await?;

        let policy = read_only_policy(&self.credentials.bucket, path.as_str());
        let duration_secs = i32::try_from(self.options.credentials_lifetime_secs())
            .map_err(StorageError::transport)?;

        let token = self
            .sts
            .get_federation_token()
            .name(FEDERATION_TOKEN_NAME)
            .duration_seconds(duration_secs)
            .policy(policy.to_string())
            .send()
            .await
            .map_err(|err| {
                let status = err.raw_response().map(|r| r.status().as_u16());
                let code = err.code().map(str::to_string);
                let message = err.message().map(str::to_string);
                classify_failure(status, code.as_deref(), message, err, "Failed to get federation token")
            })?;

        let credentials = token.credentials().ok_or_else(|| {
            StorageError::transport(anyhow::anyhow!("STS response did not contain any credentials"))
        })?;
        let expiration = credentials
            .expiration()
            .fmt(DateTimeFormat::DateTime)
            .map_err(StorageError::transport)?;

        Ok(ScopedReadCredentials::S3 {
            backup_id: backup_id.to_string(),
            backup_uri: object_url(&self.credentials.bucket, &self.credentials.region, path.as_str()),
            region: self.credentials.region.clone(),
            credentials: S3TemporaryCredentials {
                access_key_id: credentials.access_key_id().to_string(),
                secret_access_key: credentials.secret_access_key().to_string(),
                session_token: credentials.session_token().to_string(),
                expiration,
            },
        })
    }

    async fn marker_exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.credentials.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    return Ok(false);
                }
                let status = err.raw_response().map(|r| r.status().as_u16());
                if status == Some(404) {
                    return Ok(false);
                }
                let code = err.code().map(str::to_string);
                let message = err.message().map(str::to_string);
                Err(classify_failure(
                    status,
                    code.as_deref(),
                    message,
                    err,
                    &format!("Failed to check s3://{}/{}", self.credentials.bucket, key),
                ))
            }
        }
    }

    // Zero-byte object marking an initialized backup; putting it twice is harmless.
    async fn put_marker(&self, key: &str) -> StorageResult<()> {
        put_object(&self.client, &self.credentials.bucket, key, Vec::new()).await
    }
}

/// Destination of a `run` on S3.
pub struct S3BackupHandle {
    client: s3::Client,
    bucket: String,
    path: BackupPath,
}

impl S3BackupHandle {
    pub async fn put_object(&self, key: &str, body: Vec<u8>) -> StorageResult<()> {
        put_object(&self.client, &self.bucket, &self.path.object_key(key), body).await
    }
}

async fn put_object(client: &s3::Client, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .send()
        .await
        .map_err(|err| {
            let status = err.raw_response().map(|r| r.status().as_u16());
            let code = err.code().map(str::to_string);
            let message = err.message().map(str::to_string);
            classify_failure(
                status,
                code.as_deref(),
                message,
                err,
                &format!("Failed to upload s3://{}/{}", bucket, key),
            )
        })?;
    Ok(())
}

fn classify_failure<E>(
    status: Option<u16>,
    code: Option<&str>,
    message: Option<String>,
    err: E,
    context: &str,
) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let denied = status == Some(403) || code.is_some_and(|c| DENIED_ERROR_CODES.contains(&c));
    if denied {
        return StorageError::PermissionDenied(
            message.unwrap_or_else(|| format!("{}: access denied", context)),
        );
    }
    StorageError::Transport(anyhow::Error::new(err).context(context.to_string()))
}

/// Inline IAM policy limiting a federation token to reading one backup.
///
/// `s3:ListBucket` is needed as well: bulk loaders such as `COPY` list the
/// prefix before fetching even a single object.
pub fn read_only_policy(bucket: &str, path: &str) -> Value {
    json!({
        "Statement": [
            {
                "Effect": "Allow",
                "Action": "s3:GetObject",
                "Resource": [format!("arn:aws:s3:::{}/{}*", bucket, path)],
            },
            {
                "Effect": "Allow",
                "Action": "s3:ListBucket",
                "Resource": [format!("arn:aws:s3:::{}", bucket)],
                "Condition": {
                    "StringLike": {
                        "s3:prefix": [format!("{}*", path)],
                    },
                },
            },
        ],
    })
}

pub fn object_url(bucket: &str, region: &str, key: &str) -> String {
    format!(
        "https://{}.s3.{}.amazonaws.com/{}",
        bucket,
        region,
        crate::utils::encode_uri_path(key)
    )
}
