// projectbackup/src/errors.rs
use thiserror::Error;

use crate::storage::StorageError;

/// Errors the process reports on its own terms.
///
/// Backend failures travel as [`StorageError`]; anything else is a plain
/// `anyhow::Error` and treated as an internal failure by `main`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Expected failure the caller can fix (bad backup ID, wrong credentials, ...).
    #[error("{0}")]
    User(String),

    #[error("{0}")]
    Config(String),

    #[error("Storage API request failed: {0}")]
    Platform(String),
}

impl AppError {
    pub fn user(message: impl Into<String>) -> Self {
        AppError::User(message.into())
    }

    pub fn missing_parameter(name: &str) -> Self {
        AppError::Config(format!("Missing required parameter \"{}\".", name))
    }

    /// Whether the error is caused by the caller rather than by this tool.
    pub fn is_user_facing(&self) -> bool {
        match self {
            AppError::User(_) | AppError::Config(_) => true,
            AppError::Platform(_) => false,
        }
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_user_facing() { 1 } else { 2 }
    }
}

/// Picks the process exit code for an error bubbling out of `run_app`.
///
/// Returns the user-facing message for exit code 1, `None` for internal errors.
pub fn classify(err: &anyhow::Error) -> (u8, Option<String>) {
    if let Some(app) = err.downcast_ref::<AppError>() {
        if app.is_user_facing() {
            return (app.exit_code(), Some(app.to_string()));
        }
        return (app.exit_code(), None);
    }
    if let Some(storage) = err.downcast_ref::<StorageError>() {
        if storage.is_user_facing() {
            return (1, Some(storage.to_string()));
        }
    }
    (2, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_user_error_survives_context() {
        let err: anyhow::Error = Err::<(), _>(AppError::user("Backup is broken"))
            .context("Backup process failed")
            .unwrap_err();
        let (code, message) = classify(&err);
        assert_eq!(code, 1);
        assert_eq!(message.as_deref(), Some("Backup is broken"));
    }

    #[test]
    fn test_permission_denied_is_user_facing() {
        let err = anyhow::Error::from(StorageError::PermissionDenied(
            "The AWS Access Key Id you provided does not exist in our records.".to_string(),
        ));
        let (code, message) = classify(&err);
        assert_eq!(code, 1);
        assert_eq!(
            message.as_deref(),
            Some("The AWS Access Key Id you provided does not exist in our records.")
        );
    }

    #[test]
    fn test_transport_error_is_internal() {
        let err = anyhow::Error::from(StorageError::Transport(anyhow::anyhow!("connection reset")));
        let (code, message) = classify(&err);
        assert_eq!(code, 2);
        assert!(message.is_none());

        let (code, _) = classify(&anyhow::anyhow!("something odd"));
        assert_eq!(code, 2);
    }

    #[test]
    fn test_storage_error_survives_context() {
        let err: anyhow::Error = Err::<(), _>(StorageError::NotFound(
            "The specified container \"backups\" does not exist.".to_string(),
        ))
        .context("Backup process failed")
        .unwrap_err();
        assert_eq!(classify(&err).0, 1);

        let platform = anyhow::Error::from(AppError::Platform("HTTP 500".to_string()));
        assert_eq!(classify(&platform), (2, None));
    }

    #[test]
    fn test_missing_parameter_message() {
        let err = AppError::missing_parameter("#bucket");
        assert_eq!(err.to_string(), "Missing required parameter \"#bucket\".");
        assert!(err.is_user_facing());
    }
}
