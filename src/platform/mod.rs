// projectbackup/src/platform/mod.rs
//! Access to the project being backed up.
pub mod client;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub use self::client::StorageApiClient;

/// Project the Storage API token belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub owner: TokenOwner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenOwner {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Table {
    /// `in.c-main.orders` lives in bucket `in.c-main`.
    pub fn bucket_id(&self) -> &str {
        self.id
            .strip_suffix(&self.name)
            .and_then(|b| b.strip_suffix('.'))
            .unwrap_or_else(|| self.id.rsplit_once('.').map(|(b, _)| b).unwrap_or(&self.id))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_expiring: bool,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// One downloadable piece of a platform file.
///
/// Unsliced files have a single slice behind a presigned URL; sliced files
/// carry the provider credentials needed to read each slice.
#[derive(Clone)]
pub struct FileSlice {
    pub url: String,
    access: Option<Arc<client::FileDownload>>,
}

impl FileSlice {
    pub fn presigned(url: impl Into<String>) -> Self {
        FileSlice {
            url: url.into(),
            access: None,
        }
    }
}

impl fmt::Debug for FileSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSlice")
            .field("url", &self.url)
            .field("with_credentials", &self.access.is_some())
            .finish()
    }
}

/// The platform accepts numeric IDs in some places and strings in others.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected an ID, got {}", other))),
    }
}

/// Operations the backup needs from the data platform.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn verify_token(&self) -> anyhow::Result<TokenInfo>;

    /// Fresh unique ID, used as the ID of a new backup.
    async fn generate_id(&self) -> anyhow::Result<String>;

    async fn list_buckets(&self) -> anyhow::Result<Vec<Value>>;

    async fn list_tables(&self) -> anyhow::Result<Vec<Table>>;

    /// Exports one table; returns its gzipped CSV slices, in order.
    async fn export_table(&self, table_id: &str) -> anyhow::Result<Vec<FileSlice>>;

    async fn list_components(&self) -> anyhow::Result<Vec<Component>>;

    async fn list_configuration_versions(
        &self,
        component_id: &str,
        configuration_id: &str,
    ) -> anyhow::Result<Vec<Value>>;

    /// Files that do not expire.
    async fn list_permanent_files(&self) -> anyhow::Result<Vec<FileInfo>>;

    async fn file_slices(&self, file: &FileInfo) -> anyhow::Result<Vec<FileSlice>>;

    /// Content of one slice. Slices are fetched one at a time so a backup
    /// never holds more than one of them in memory.
    async fn fetch_slice(&self, slice: &FileSlice) -> anyhow::Result<Vec<u8>>;
}
