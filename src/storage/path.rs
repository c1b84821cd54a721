// projectbackup/src/storage/path.rs
use crate::errors::AppError;

pub const BACKUP_ROOT: &str = "data-takeout";

/// Location of one backup inside a bucket (S3/GCS) or storage account (Azure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPath {
    prefix: String,
    backup_id: Option<String>,
}

impl BackupPath {
    /// Path of a managed backup: `data-takeout/{region}/{projectId}/{backupId}/`.
    pub fn resolve(backup_id: &str, region: &str, project_id: &str) -> Self {
        BackupPath {
            prefix: format!("{}/{}/{}/{}/", BACKUP_ROOT, region, project_id, backup_id),
            backup_id: Some(backup_id.to_string()),
        }
    }

    /// Path the caller chose together with their own storage credentials.
    pub fn user_defined(path: impl Into<String>) -> Self {
        BackupPath {
            prefix: path.into(),
            backup_id: None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    pub fn backup_id(&self) -> Option<&str> {
        self.backup_id.as_deref()
    }

    /// Full object key for an artifact stored under this path.
    pub fn object_key(&self, relative: &str) -> String {
        match self.prefix.as_str() {
            "" | "." => relative.to_string(),
            p if p.ends_with('/') => format!("{}{}", p, relative),
            p => format!("{}/{}", p, relative),
        }
    }

    /// Azure container derived from the path; containers cannot contain `/`.
    pub fn container_name(&self) -> String {
        fold_container_name(&self.prefix)
    }
}

pub fn fold_container_name(path: &str) -> String {
    path.replace('/', "-").trim_end_matches('-').to_string()
}

/// Refuses to stage a backup of a project that lives in another region than the backend.
///
/// Credentials minted in one region must never be scoped to data of another.
pub fn guard_region(configured_region: &str, project_id: &str, project_region: &str) -> Result<(), AppError> {
    if configured_region != project_region {
        return Err(AppError::user(format!(
            "Project with ID \"{}\" is not located in {} region (project region: {})",
            project_id, configured_region, project_region
        )));
    }
    Ok(())
}
