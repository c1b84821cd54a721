// projectbackup/src/platform/client.rs
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use aws_sdk_s3 as s3;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use s3::config::Region;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Component, FileInfo, FileSlice, PlatformApi, Table, TokenInfo};
use crate::errors::AppError;
use crate::utils::encode_uri_component;
use crate::utils::setting::RuntimeEnv;

const PAGE_SIZE: usize = 100;
const JOB_TIMEOUT: Duration = Duration::from_secs(3600);
const JOB_POLL_MAX_DELAY: Duration = Duration::from_secs(20);

/// Storage API v2 client.
pub struct StorageApiClient {
    client: Client,
    base_url: String,
    token: String,
    run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ticket {
    #[serde(deserialize_with = "super::id_as_string")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct Job {
    #[serde(deserialize_with = "super::id_as_string")]
    id: String,
    status: String,
    #[serde(default)]
    results: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Job {
    fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "success" | "error" | "cancelled" | "terminated")
    }

    fn exported_file_id(&self) -> Option<String> {
        let file_id = &self.results.as_ref()?["file"]["id"];
        match file_id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Download details of a file, including its short-lived provider credentials.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FileDownload {
    url: String,
    #[serde(default)]
    is_sliced: bool,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    credentials: Option<AwsFileCredentials>,
    #[serde(default)]
    abs_credentials: Option<AbsFileCredentials>,
    #[serde(default)]
    gcs_credentials: Option<GcsFileCredentials>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsFileCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
}

#[derive(Debug, Deserialize)]
struct AbsFileCredentials {
    #[serde(rename = "SASConnectionString")]
    sas_connection_string: String,
}

#[derive(Debug, Deserialize)]
struct GcsFileCredentials {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SlicedManifest {
    entries: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    url: String,
}

impl StorageApiClient {
    pub fn new(base_url: &str, token: &str, run_id: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            run_id,
        })
    }

    pub fn from_env(env: &RuntimeEnv) -> Result<Self> {
        Self::new(&env.storage_api_url, &env.storage_api_token, env.run_id.clone())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v2/storage/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self
            .client
            .request(method, url)
            .header("X-StorageApi-Token", &self.token);
        if let Some(run_id) = &self.run_id {
            request = request.header("X-KBC-RunId", run_id);
        }
        request
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request: {}", what))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = api_error_message(&error_text);
            // A refused token is the caller's to fix.
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(AppError::user(format!("Storage API rejected the token: {}", message)).into());
            }
            return Err(AppError::Platform(format!("{} ({}): {}", what, status, message)).into());
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response of {}", what))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let mut request = self.request(Method::GET, path);
        if !query.is_empty() {
            request = request.query(query);
        }
        self.send(request, &format!("GET {}", path)).await
    }

    async fn get_paginated<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let page: Vec<T> = self
                .get(path, &[("limit", PAGE_SIZE.to_string()), ("offset", offset.to_string())])
                .await?;
            let count = page.len();
            items.extend(page);
            if count < PAGE_SIZE {
                return Ok(items);
            }
            offset += count;
        }
    }

    async fn wait_for_job(&self, job_id: &str) -> Result<Job> {
        let started = Instant::now();
        let mut delay = Duration::from_secs(1);
        loop {
            let job: Job = self.get(&format!("jobs/{}", job_id), &[]).await?;
            if job.is_finished() {
                return Ok(job);
            }
            if started.elapsed() > JOB_TIMEOUT {
                return Err(AppError::Platform(format!(
                    "Job {} did not finish within {} seconds",
                    job.id,
                    JOB_TIMEOUT.as_secs()
                ))
                .into());
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(JOB_POLL_MAX_DELAY);
        }
    }

    async fn file_download(&self, file_id: &str) -> Result<FileDownload> {
        self.get(
            &format!("files/{}", encode_uri_component(file_id)),
            &[("federationToken", "1".to_string())],
        )
        .await
    }

    /// A file as the list of its slices (one entry for unsliced files).
    async fn slices_of(&self, file_id: &str) -> Result<Vec<FileSlice>> {
        let file = self.file_download(file_id).await?;
        if !file.is_sliced {
            return Ok(vec![FileSlice::presigned(file.url)]);
        }

        let manifest: SlicedManifest = serde_json::from_slice(&self.fetch_url(&file.url).await?)
            .with_context(|| format!("Invalid slice manifest of file {}", file_id))?;
        let access = Arc::new(file);
        Ok(manifest
            .entries
            .into_iter()
            .map(|entry| FileSlice {
                url: entry.url,
                access: Some(Arc::clone(&access)),
            })
            .collect())
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to download file")?
            .error_for_status()
            .context("File download was rejected")?;
        Ok(response.bytes().await.context("Failed to read file content")?.to_vec())
    }

    async fn fetch_with_credentials(&self, file: &FileDownload, slice_url: &str) -> Result<Vec<u8>> {
        match file.provider.as_deref().unwrap_or("aws") {
            "aws" => {
                let credentials = file
                    .credentials
                    .as_ref()
                    .context("Sliced file is missing its AWS credentials")?;
                let region = file.region.clone().unwrap_or_else(|| "us-east-1".to_string());
                download_s3_slice(credentials, &region, slice_url).await
            }
            "azure" => {
                let credentials = file
                    .abs_credentials
                    .as_ref()
                    .context("Sliced file is missing its Azure credentials")?;
                let url = azure_slice_url(slice_url, &credentials.sas_connection_string)?;
                self.fetch_url(&url).await
            }
            "gcp" => {
                let credentials = file
                    .gcs_credentials
                    .as_ref()
                    .context("Sliced file is missing its GCS credentials")?;
                let url = gcs_slice_url(slice_url)?;
                let response = self
                    .client
                    .get(url)
                    .bearer_auth(&credentials.access_token)
                    .send()
                    .await
                    .context("Failed to download slice")?
                    .error_for_status()
                    .context("Slice download was rejected")?;
                Ok(response.bytes().await?.to_vec())
            }
            other => anyhow::bail!("Unsupported file provider \"{}\"", other),
        }
    }
}

/// Parses an S3 URI (s3://bucket/key) into bucket and key.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, String)> {
    let uri = url::Url::parse(s3_uri).with_context(|| format!("Invalid S3 URI format: {}", s3_uri))?;
    if uri.scheme() != "s3" {
        return Err(anyhow::anyhow!("S3 URI must start with s3://"));
    }
    let bucket = uri.host_str().context("S3 URI missing bucket name")?.to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(anyhow::anyhow!("S3 URI missing key (object path)"));
    }
    Ok((bucket, key))
}

async fn download_s3_slice(credentials: &AwsFileCredentials, region: &str, slice_url: &str) -> Result<Vec<u8>> {
    let (bucket, key) = parse_s3_uri(slice_url)?;

    let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(s3::config::Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            Some(credentials.session_token.clone()),
            None, // expiry
            "StorageApiFile", // provider_name
        ))
        .load()
        .await;
    let client = s3::Client::new(&sdk_config);

    let mut object = client
        .get_object()
        .bucket(&bucket)
        .key(&key)
        .send()
        .await
        .with_context(|| format!("Failed to get object s3://{}/{}", bucket, key))?;

    let mut content = Vec::new();
    while let Some(chunk) = object
        .body
        .try_next()
        .await
        .with_context(|| format!("Failed to read s3://{}/{}", bucket, key))?
    {
        content.extend_from_slice(&chunk);
    }
    Ok(content)
}

/// `azure://{account}.blob.core.windows.net/{container}/{blob}` plus the SAS of the connection string.
fn azure_slice_url(slice_url: &str, connection_string: &str) -> Result<String> {
    let location = slice_url
        .strip_prefix("azure://")
        .with_context(|| format!("Invalid Azure slice URL: {}", slice_url))?;
    let sas = connection_string
        .split(';')
        .find_map(|part| part.strip_prefix("SharedAccessSignature="))
        .context("Azure connection string has no SharedAccessSignature")?;
    Ok(format!("https://{}?{}", location, sas))
}

/// `gs://{bucket}/{object}` as a JSON API media URL.
fn gcs_slice_url(slice_url: &str) -> Result<String> {
    let location = slice_url
        .strip_prefix("gs://")
        .with_context(|| format!("Invalid GCS slice URL: {}", slice_url))?;
    let (bucket, object) = location
        .split_once('/')
        .with_context(|| format!("GCS slice URL has no object: {}", slice_url))?;
    Ok(format!(
        "https://storage.googleapis.com/storage/v1/b/{}/o/{}?alt=media",
        encode_uri_component(bucket),
        encode_uri_component(object)
    ))
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait::async_trait]
impl PlatformApi for StorageApiClient {
    async fn verify_token(&self) -> Result<TokenInfo> {
        self.get("tokens/verify", &[]).await
    }

    async fn generate_id(&self) -> Result<String> {
        let ticket: Ticket = self
            .send(self.request(Method::POST, "tickets"), "POST tickets")
            .await?;
        Ok(ticket.id)
    }

    async fn list_buckets(&self) -> Result<Vec<Value>> {
        self.get("buckets", &[("include", "attributes,metadata".to_string())])
            .await
    }

    async fn list_tables(&self) -> Result<Vec<Table>> {
        self.get(
            "tables",
            &[("include", "attributes,columns,buckets,metadata,columnMetadata".to_string())],
        )
        .await
    }

    async fn export_table(&self, table_id: &str) -> Result<Vec<FileSlice>> {
        let path = format!("tables/{}/export-async", encode_uri_component(table_id));
        let job: Job = self
            .send(
                self.request(Method::POST, &path).form(&[("gzip", "1")]),
                &format!("POST {}", path),
            )
            .await?;

        let job = self.wait_for_job(&job.id).await?;
        if job.status != "success" {
            let reason = job
                .error
                .as_ref()
                .and_then(|e| e["message"].as_str())
                .unwrap_or("unknown error");
            return Err(AppError::Platform(format!("Export of table {} failed: {}", table_id, reason)).into());
        }

        let file_id = job
            .exported_file_id()
            .with_context(|| format!("Export job {} did not produce a file", job.id))?;
        self.slices_of(&file_id).await
    }

    async fn list_components(&self) -> Result<Vec<Component>> {
        self.get("components", &[("include", "configuration,rows,state".to_string())])
            .await
    }

    async fn list_configuration_versions(
        &self,
        component_id: &str,
        configuration_id: &str,
    ) -> Result<Vec<Value>> {
        self.get_paginated(&format!(
            "components/{}/configs/{}/versions",
            encode_uri_component(component_id),
            encode_uri_component(configuration_id)
        ))
        .await
    }

    async fn list_permanent_files(&self) -> Result<Vec<FileInfo>> {
        let files: Vec<FileInfo> = self.get_paginated("files").await?;
        Ok(files.into_iter().filter(|f| !f.is_expiring).collect())
    }

    async fn file_slices(&self, file: &FileInfo) -> Result<Vec<FileSlice>> {
        self.slices_of(&file.id).await
    }

    async fn fetch_slice(&self, slice: &FileSlice) -> Result<Vec<u8>> {
        match &slice.access {
            Some(file) => self.fetch_with_credentials(file, &slice.url).await,
            None => self.fetch_url(&slice.url).await,
        }
    }
}
