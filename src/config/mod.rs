// projectbackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::errors::AppError;

pub const DEFAULT_CREDENTIALS_EXPIRATION_HOURS: u32 = 36;
// STS GetFederationToken refuses anything longer.
pub const MAX_CREDENTIALS_EXPIRATION_HOURS: u32 = 36;

// Structs for deserializing config.json
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    #[default]
    Run,
    GenerateReadCredentials,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    #[serde(default)]
    pub action: Action,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub image_parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    S3,
    Abs,
    Gcs,
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "s3" | "aws" => Ok(BackendKind::S3),
            "abs" | "azure" => Ok(BackendKind::Abs),
            "gcs" => Ok(BackendKind::Gcs),
            other => Err(AppError::user(format!(
                "Unknown storage backend type \"{}\".",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::S3 => "s3",
            BackendKind::Abs => "abs",
            BackendKind::Gcs => "gcs",
        };
        f.write_str(name)
    }
}

// Application's internal configuration structs
#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AzureCredentials {
    pub account_name: String,
    pub account_key: String,
    /// Optional when the caller brings their own account.
    pub region: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct GcsCredentials {
    /// Service account key, as the JSON string it was configured with.
    pub json_key: String,
    pub bucket: String,
    pub region: String,
}

/// Connection parameters for exactly one storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCredentials {
    S3(S3Credentials),
    Azure(AzureCredentials),
    Gcs(GcsCredentials),
}

impl BackendCredentials {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendCredentials::S3(_) => BackendKind::S3,
            BackendCredentials::Azure(_) => BackendKind::Abs,
            BackendCredentials::Gcs(_) => BackendKind::Gcs,
        }
    }

    pub fn region(&self) -> Option<&str> {
        match self {
            BackendCredentials::S3(c) => Some(&c.region),
            BackendCredentials::Azure(c) => c.region.as_deref(),
            BackendCredentials::Gcs(c) => Some(&c.region),
        }
    }
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("account_name", &self.account_name)
            .field("account_key", &"***")
            .field("region", &self.region)
            .finish()
    }
}

impl fmt::Debug for GcsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsCredentials")
            .field("json_key", &"***")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub action: Action,
    pub backup_id: Option<String>,
    /// Caller-chosen destination; only set for user-defined credentials.
    pub backup_path: Option<String>,
    pub export_structure_only: bool,
    pub include_versions: bool,
    pub credentials_expiration_hours: u32,
    pub storage: BackendCredentials,
    pub is_user_defined_credentials: bool,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).map_err(|e| {
            AppError::Config(format!(
                "Failed to parse config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;

        Ok(Self::from_raw(raw_json_config)?)
    }

    /// Validates the raw config and selects which parameter block owns the storage credentials.
    pub fn from_raw(raw: RawJsonConfig) -> std::result::Result<Self, AppError> {
        let is_user_defined_credentials = string_value(&raw.parameters, "storageBackendType").is_some();
        let credentials_parameters = if is_user_defined_credentials {
            &raw.parameters
        } else {
            &raw.image_parameters
        };

        let kind: BackendKind = string_value(credentials_parameters, "storageBackendType")
            .ok_or_else(|| AppError::missing_parameter("storageBackendType"))?
            .parse()?;

        let backup_id = string_value(&raw.parameters, "backupId");
        if raw.action == Action::Run && !is_user_defined_credentials && backup_id.is_none() {
            return Err(AppError::missing_parameter("backupId"));
        }

        let storage = parse_credentials(kind, credentials_parameters, is_user_defined_credentials)?;

        let backup_path = if is_user_defined_credentials {
            let path = string_value(&raw.parameters, "backupPath");
            Some(match kind {
                BackendKind::S3 => normalize_s3_path(path.as_deref().unwrap_or("")),
                BackendKind::Gcs => normalize_gcs_path(path.as_deref().unwrap_or("")),
                BackendKind::Abs => path.ok_or_else(|| AppError::missing_parameter("backupPath"))?,
            })
        } else {
            None
        };

        Ok(AppConfig {
            action: raw.action,
            backup_id,
            backup_path,
            export_structure_only: bool_value(&raw.parameters, "exportStructureOnly")?,
            include_versions: bool_value(&raw.parameters, "includeVersions")?,
            credentials_expiration_hours: expiration_hours(&raw)?,
            storage,
            is_user_defined_credentials,
        })
    }

    pub fn storage_backend_type(&self) -> BackendKind {
        self.storage.kind()
    }
}

fn parse_credentials(
    kind: BackendKind,
    params: &Map<String, Value>,
    is_user_defined_credentials: bool,
) -> std::result::Result<BackendCredentials, AppError> {
    let credentials = match kind {
        BackendKind::S3 => BackendCredentials::S3(S3Credentials {
            access_key_id: required(params, "access_key_id")?,
            secret_access_key: required(params, "#secret_access_key")?,
            region: required(params, "region")?,
            bucket: required(params, "#bucket")?,
        }),
        BackendKind::Abs => BackendCredentials::Azure(AzureCredentials {
            account_name: required(params, "accountName")?,
            account_key: required(params, "#accountKey")?,
            // The region guard needs it; a self-supplied account may omit it.
            region: if is_user_defined_credentials {
                string_value(params, "region")
            } else {
                Some(required(params, "region")?)
            },
        }),
        BackendKind::Gcs => BackendCredentials::Gcs(GcsCredentials {
            json_key: required(params, "#jsonKey")?,
            bucket: required(params, "#bucket")?,
            region: required(params, "region")?,
        }),
    };
    Ok(credentials)
}

fn expiration_hours(raw: &RawJsonConfig) -> std::result::Result<u32, AppError> {
    let value = raw
        .parameters
        .get("credentialsExpirationHours")
        .or_else(|| raw.image_parameters.get("credentialsExpirationHours"));

    let hours = match value {
        None | Some(Value::Null) => return Ok(DEFAULT_CREDENTIALS_EXPIRATION_HOURS),
        Some(v) => v.as_u64().ok_or_else(|| {
            AppError::Config(format!(
                "Parameter \"credentialsExpirationHours\" must be a positive integer, got {}.",
                v
            ))
        })?,
    };

    if hours == 0 || hours > MAX_CREDENTIALS_EXPIRATION_HOURS as u64 {
        return Err(AppError::Config(format!(
            "Parameter \"credentialsExpirationHours\" must be between 1 and {}, got {}.",
            MAX_CREDENTIALS_EXPIRATION_HOURS, hours
        )));
    }
    Ok(hours as u32)
}

/// Non-empty string (or number) value of a parameter.
fn string_value(params: &Map<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required(params: &Map<String, Value>, key: &str) -> std::result::Result<String, AppError> {
    string_value(params, key).ok_or_else(|| AppError::missing_parameter(key))
}

fn bool_value(params: &Map<String, Value>, key: &str) -> std::result::Result<bool, AppError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(AppError::Config(format!(
            "Parameter \"{}\" must be a boolean, got {}.",
            key, other
        ))),
    }
}

fn normalize_s3_path(path: &str) -> String {
    if path.is_empty() {
        ".".to_string()
    } else {
        format!("{}/", path.trim_end_matches('/'))
    }
}

fn normalize_gcs_path(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{}/", path.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn parse(value: Value) -> std::result::Result<AppConfig, AppError> {
        let raw: RawJsonConfig = serde_json::from_value(value).expect("raw config");
        AppConfig::from_raw(raw)
    }

    fn expect_error(value: Value, message: &str) {
        match parse(value) {
            Ok(config) => panic!("expected error {:?}, got {:?}", message, config),
            Err(e) => assert_eq!(e.to_string(), message),
        }
    }

    #[test]
    fn test_s3_managed_config() -> anyhow::Result<()> {
        let config = parse(json!({
            "action": "run",
            "parameters": {"backupId": 123456},
            "image_parameters": {
                "storageBackendType": "s3",
                "access_key_id": "testAccessKeyId",
                "#secret_access_key": "testAccessKey",
                "region": "testRegion",
                "#bucket": "testBucket"
            }
        }))?;

        assert_eq!(config.action, Action::Run);
        assert_eq!(config.backup_id.as_deref(), Some("123456"));
        assert!(!config.is_user_defined_credentials);
        assert_eq!(config.backup_path, None);
        assert!(!config.export_structure_only);
        assert!(!config.include_versions);
        assert_eq!(config.credentials_expiration_hours, DEFAULT_CREDENTIALS_EXPIRATION_HOURS);
        assert_eq!(
            config.storage,
            BackendCredentials::S3(S3Credentials {
                access_key_id: "testAccessKeyId".to_string(),
                secret_access_key: "testAccessKey".to_string(),
                region: "testRegion".to_string(),
                bucket: "testBucket".to_string(),
            })
        );
        Ok(())
    }

    #[test]
    fn test_abs_managed_config() -> anyhow::Result<()> {
        let config = parse(json!({
            "action": "run",
            "parameters": {"backupId": "123456", "includeVersions": true},
            "image_parameters": {
                "storageBackendType": "abs",
                "accountName": "testAccountName",
                "#accountKey": "testAccountKey",
                "region": "testRegion"
            }
        }))?;

        assert_eq!(config.storage_backend_type(), BackendKind::Abs);
        assert_eq!(config.storage.region(), Some("testRegion"));
        assert!(config.include_versions);
        Ok(())
    }

    #[test]
    fn test_user_defined_parameters_take_precedence() -> anyhow::Result<()> {
        let config = parse(json!({
            "action": "run",
            "parameters": {
                "storageBackendType": "s3",
                "access_key_id": "testAccessKeyId",
                "#secret_access_key": "testAccessKey",
                "region": "testRegion",
                "#bucket": "testBucket"
            },
            "image_parameters": {
                "storageBackendType": "abs",
                "accountName": "testAccountName",
                "#accountKey": "testAccountKey",
                "region": "testRegion"
            }
        }))?;

        assert_eq!(config.storage_backend_type(), BackendKind::S3);
        assert!(config.is_user_defined_credentials);
        assert_eq!(config.backup_path.as_deref(), Some("."));
        assert_eq!(config.backup_id, None);
        Ok(())
    }

    #[test]
    fn test_user_defined_abs_keeps_path() -> anyhow::Result<()> {
        let config = parse(json!({
            "action": "run",
            "parameters": {
                "backupPath": "testPath",
                "storageBackendType": "azure",
                "accountName": "testAccountName",
                "#accountKey": "testAccountKey"
            },
            "image_parameters": {
                "storageBackendType": "s3",
                "access_key_id": "testAccessKeyId",
                "#secret_access_key": "testAccessKey",
                "#bucket": "testBucket"
            }
        }))?;

        assert_eq!(config.storage_backend_type(), BackendKind::Abs);
        assert_eq!(config.backup_path.as_deref(), Some("testPath"));
        assert_eq!(config.storage.region(), None);
        Ok(())
    }

    #[test]
    fn test_s3_user_path_gets_trailing_slash() -> anyhow::Result<()> {
        let config = parse(json!({
            "action": "run",
            "parameters": {
                "storageBackendType": "aws",
                "access_key_id": "testAccessKeyId",
                "#secret_access_key": "testAccessKey",
                "region": "testRegion",
                "backupPath": "unexists/backup/folder//",
                "#bucket": "testBucket"
            }
        }))?;

        assert_eq!(config.backup_path.as_deref(), Some("unexists/backup/folder/"));
        Ok(())
    }

    #[test]
    fn test_gcs_user_path_normalized() -> anyhow::Result<()> {
        let config = parse(json!({
            "action": "generate-read-credentials",
            "parameters": {
                "storageBackendType": "gcs",
                "#jsonKey": "{}",
                "#bucket": "testBucket",
                "region": "europe-west1",
                "backupPath": "exports/project"
            }
        }))?;

        assert_eq!(config.action, Action::GenerateReadCredentials);
        assert_eq!(config.backup_path.as_deref(), Some("exports/project/"));
        Ok(())
    }

    #[test]
    fn test_missing_required_parameters() {
        expect_error(
            json!({
                "action": "run",
                "parameters": {
                    "storageBackendType": "abs",
                    "accountName": "testAccountName",
                    "#accountKey": "testAccountKey",
                    "region": "testRegion"
                },
                "image_parameters": {"storageBackendType": "abs"}
            }),
            "Missing required parameter \"backupPath\".",
        );
        expect_error(
            json!({
                "action": "run",
                "parameters": {
                    "backupPath": "testBackupPath",
                    "storageBackendType": "abs",
                    "#accountKey": "testAccountKey"
                }
            }),
            "Missing required parameter \"accountName\".",
        );
        expect_error(
            json!({
                "action": "run",
                "parameters": {
                    "storageBackendType": "s3",
                    "access_key_id": "testAccessKeyId",
                    "region": "testRegion",
                    "#bucket": "testBucket"
                }
            }),
            "Missing required parameter \"#secret_access_key\".",
        );
        expect_error(
            json!({
                "action": "run",
                "parameters": {
                    "backupId": "testBackupId",
                    "storageBackendType": "gcs",
                    "#jsonKey": "testJsonKey",
                    "#bucket": "testBucket"
                }
            }),
            "Missing required parameter \"region\".",
        );
        expect_error(
            json!({
                "action": "run",
                "parameters": {},
                "image_parameters": {
                    "storageBackendType": "s3",
                    "access_key_id": "testAccessKeyId",
                    "#secret_access_key": "testAccessKey",
                    "region": "testRegion",
                    "#bucket": "testBucket"
                }
            }),
            "Missing required parameter \"backupId\".",
        );
        expect_error(
            json!({
                "action": "run",
                "parameters": {"backupId": "1"},
                "image_parameters": {
                    "storageBackendType": "abs",
                    "accountName": "testAccountName",
                    "#accountKey": "testAccountKey"
                }
            }),
            "Missing required parameter \"region\".",
        );
    }

    #[test]
    fn test_credentials_action_does_not_need_backup_id() -> anyhow::Result<()> {
        let config = parse(json!({
            "action": "generate-read-credentials",
            "image_parameters": {
                "storageBackendType": "gcs",
                "#jsonKey": "{}",
                "#bucket": "testBucket",
                "region": "europe-west1",
                "credentialsExpirationHours": 24
            }
        }))?;
        assert_eq!(config.backup_id, None);
        assert_eq!(config.credentials_expiration_hours, 24);
        Ok(())
    }

    #[test]
    fn test_unknown_backend_and_bad_expiration() {
        expect_error(
            json!({
                "parameters": {"backupId": "1"},
                "image_parameters": {"storageBackendType": "ftp"}
            }),
            "Unknown storage backend type \"ftp\".",
        );
        expect_error(
            json!({
                "action": "generate-read-credentials",
                "image_parameters": {
                    "storageBackendType": "abs",
                    "accountName": "a",
                    "#accountKey": "b",
                    "region": "c",
                    "credentialsExpirationHours": 48
                }
            }),
            "Parameter \"credentialsExpirationHours\" must be between 1 and 36, got 48.",
        );
    }

    #[test]
    fn test_secrets_are_not_debug_printed() -> anyhow::Result<()> {
        let config = parse(json!({
            "action": "generate-read-credentials",
            "image_parameters": {
                "storageBackendType": "abs",
                "accountName": "account",
                "#accountKey": "super-secret-key",
                "region": "westeurope"
            }
        }))?;
        assert!(!format!("{:?}", config).contains("super-secret-key"));
        Ok(())
    }

    #[test]
    fn test_load_from_json_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        let mut file = fs::File::create(&path)?;
        write!(
            file,
            "{}",
            json!({
                "action": "run",
                "parameters": {"backupId": "77", "exportStructureOnly": true},
                "image_parameters": {
                    "storageBackendType": "gcs",
                    "#jsonKey": "{}",
                    "#bucket": "bucket",
                    "region": "us-east1"
                }
            })
        )?;

        let config = AppConfig::load_from_json(&path)?;
        assert!(config.export_structure_only);
        assert_eq!(config.storage_backend_type(), BackendKind::Gcs);

        fs::write(&path, "{not json")?;
        let err = AppConfig::load_from_json(&path).unwrap_err();
        assert!(err.downcast_ref::<AppError>().is_some());
        Ok(())
    }
}
