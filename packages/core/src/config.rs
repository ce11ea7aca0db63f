//! Repository configuration
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding [`PagesConfig::db_path`]
pub const ENV_DB_PATH: &str = "PAGESTORE_DB_PATH";
/// Environment variable overriding [`PagesConfig::files_path`]
pub const ENV_FILES_PATH: &str = "PAGESTORE_FILES_PATH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a page repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesConfig {
    /// Database file
    pub db_path: PathBuf,

    /// Root of filesystem-backed page assets (one directory per page id)
    pub files_path: Option<PathBuf>,

    /// Id of the root page
    pub root_id: i64,

    /// Id of the trash page
    pub trash_id: i64,

    /// Template names used when seeding root and trash
    pub root_template: String,
    pub trash_template: String,

    /// Role the root template must grant access to
    pub guest_role: String,

    /// Attempts at finding a free sibling name before giving up
    pub max_name_attempts: usize,

    /// Reconnect attempts after a lost connection
    pub connection_retries: usize,

    /// Children cloned per batch during recursive clone
    pub clone_batch_size: usize,

    /// Leaf pages removed per batch when emptying the trash
    pub empty_trash_batch_size: usize,

    /// Time allowed for each empty-trash batch
    pub empty_trash_time_budget_secs: u64,

    /// Active language; adds a component to selector cache signatures
    pub language_id: Option<i64>,

    /// User recorded as creator/modifier of writes
    pub default_user_id: i64,

    /// Output formatting state given to loaded pages
    pub output_formatting: bool,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("pages.db"),
            files_path: None,
            root_id: 1,
            trash_id: 7,
            root_template: "home".to_string(),
            trash_template: "admin".to_string(),
            guest_role: "guest".to_string(),
            max_name_attempts: 100,
            connection_retries: 3,
            clone_batch_size: 200,
            empty_trash_batch_size: 100,
            empty_trash_time_budget_secs: 30,
            language_id: None,
            default_user_id: 41,
            output_formatting: false,
        }
    }
}

impl PagesConfig {
    /// Default configuration for the database at `db_path`
    pub fn for_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file, apply environment overrides and validate
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PagesConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_env_overrides();
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Apply `PAGESTORE_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.db_path = PathBuf::from(db_path);
        }
        if let Some(files_path) = lookup(ENV_FILES_PATH).filter(|v| !v.is_empty()) {
            self.files_path = Some(PathBuf::from(files_path));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.db_path.as_os_str().is_empty() {
            return Err("db_path cannot be empty".to_string());
        }

        if self.root_id <= 0 || self.trash_id <= 0 {
            return Err("root_id and trash_id must be positive".to_string());
        }

        if self.root_id == self.trash_id {
            return Err("root_id and trash_id must differ".to_string());
        }

        if self.max_name_attempts == 0 {
            return Err("max_name_attempts must be greater than 0".to_string());
        }

        if self.clone_batch_size == 0 || self.empty_trash_batch_size == 0 {
            return Err("batch sizes must be greater than 0".to_string());
        }

        if self.empty_trash_time_budget_secs == 0 {
            return Err("empty_trash_time_budget_secs must be greater than 0".to_string());
        }

        if self.guest_role.is_empty() {
            return Err("guest_role cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = PagesConfig::default();
        assert_eq!(config.root_id, 1);
        assert_eq!(config.trash_id, 7);
        assert_eq!(config.max_name_attempts, 100);
        assert_eq!(config.connection_retries, 3);
        assert_eq!(config.clone_batch_size, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PagesConfig::default();

        config.trash_id = config.root_id;
        assert!(config.validate().is_err());

        config.trash_id = 7;
        config.max_name_attempts = 0;
        assert!(config.validate().is_err());

        config.max_name_attempts = 100;
        config.clone_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PagesConfig::default();
        config.apply_overrides_from(|key| match key {
            ENV_DB_PATH => Some("/tmp/site.db".to_string()),
            ENV_FILES_PATH => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.db_path, PathBuf::from("/tmp/site.db"));
        assert_eq!(config.files_path, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pages.json");
        std::fs::write(&path, r#"{"trash_id": 9, "language_id": 2}"#).unwrap();

        let config = PagesConfig::from_json_file(&path).unwrap();
        assert_eq!(config.trash_id, 9);
        assert_eq!(config.language_id, Some(2));
        assert_eq!(config.root_template, "home");
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();

        let err = PagesConfig::from_json_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
