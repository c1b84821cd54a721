// projectbackup/src/utils/setting.rs
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "/data";

/// Everything the process takes from its environment.
///
/// This is the only place that reads environment variables; the rest of the
/// crate receives an already-built `RuntimeEnv`.
#[derive(Clone)]
pub struct RuntimeEnv {
    pub data_dir: PathBuf,
    pub storage_api_url: String,
    pub storage_api_token: String,
    pub run_id: Option<String>,
}

impl RuntimeEnv {
    pub fn from_env() -> Result<Self> {
        let data_dir = env::var("KBC_DATADIR")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let storage_api_url = env::var("KBC_URL").context("KBC_URL must be set")?;
        let storage_api_token = env::var("KBC_TOKEN").context("KBC_TOKEN must be set")?;
        let run_id = env::var("KBC_RUNID").ok().filter(|s| !s.is_empty());

        Ok(RuntimeEnv {
            data_dir: PathBuf::from(data_dir),
            storage_api_url,
            storage_api_token,
            run_id,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }
}

impl std::fmt::Debug for RuntimeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeEnv")
            .field("data_dir", &self.data_dir)
            .field("storage_api_url", &self.storage_api_url)
            .field("storage_api_token", &"***")
            .field("run_id", &self.run_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_and_redacted_debug() {
        let runtime = RuntimeEnv {
            data_dir: PathBuf::from("/tmp/run-42"),
            storage_api_url: "https://connection.keboola.com".to_string(),
            storage_api_token: "secret-token".to_string(),
            run_id: Some("42".to_string()),
        };
        assert_eq!(runtime.config_path(), PathBuf::from("/tmp/run-42/config.json"));
        assert!(!format!("{:?}", runtime).contains("secret-token"));
    }
}
