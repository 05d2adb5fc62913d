//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/zotmd/config.toml)
//! 3. Environment variables (ZOTMD_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::remote::RetryPolicy;

/// Environment variable prefix
const ENV_PREFIX: &str = "ZOTMD";

/// What happens to the file of an item that disappeared remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionBehavior {
    /// Relocate into the quarantine directory and keep the record flagged removed
    #[default]
    Move,
    /// Unlink the file and purge the record
    Delete,
}

impl FromStr for DeletionBehavior {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "move" => Ok(DeletionBehavior::Move),
            "delete" => Ok(DeletionBehavior::Delete),
            other => bail!("Invalid deletion behavior '{}'. Use 'move' or 'delete'.", other),
        }
    }
}

impl fmt::Display for DeletionBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionBehavior::Move => write!(f, "move"),
            DeletionBehavior::Delete => write!(f, "delete"),
        }
    }
}

/// Kind of Zotero library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryType {
    #[default]
    User,
    Group,
}

impl LibraryType {
    /// URL path segment for the Web API
    pub fn url_segment(&self) -> &'static str {
        match self {
            LibraryType::User => "users",
            LibraryType::Group => "groups",
        }
    }
}

impl FromStr for LibraryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(LibraryType::User),
            "group" => Ok(LibraryType::Group),
            other => bail!("Invalid library type '{}'. Use 'user' or 'group'.", other),
        }
    }
}

impl fmt::Display for LibraryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryType::User => write!(f, "user"),
            LibraryType::Group => write!(f, "group"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Zotero library ID (numeric user or group ID)
    #[serde(default)]
    pub library_id: String,

    #[serde(default)]
    pub library_type: LibraryType,

    /// Zotero Web API key
    #[serde(default)]
    pub api_key: String,

    /// Directory receiving the markdown files
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub deletion_behavior: DeletionBehavior,

    /// Directory for the state database and run lock
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Explicit state database path (defaults to `<data_dir>/zotmd.db`)
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Quarantine subdirectory of the output directory
    #[serde(default = "default_quarantine_dir")]
    pub quarantine_dir: String,

    /// Attempts per remote call, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Library version gap above which an incremental run becomes full
    #[serde(default = "default_full_sync_threshold")]
    pub full_sync_threshold: i64,

    /// API requests allowed per minute before throttling
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_id: String::new(),
            library_type: LibraryType::default(),
            api_key: String::new(),
            output_dir: None,
            deletion_behavior: DeletionBehavior::default(),
            data_dir: default_data_dir(),
            db_path: None,
            quarantine_dir: default_quarantine_dir(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            full_sync_threshold: default_full_sync_threshold(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (ZOTMD_LIBRARY_ID, ZOTMD_API_KEY, ...)
    /// 2. Config file (~/.config/zotmd/config.toml or ZOTMD_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        let var = |name: &str| std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok();

        if let Some(val) = var("LIBRARY_ID") {
            self.library_id = val;
        }
        if let Some(val) = var("API_KEY") {
            self.api_key = val;
        }
        if let Some(val) = var("LIBRARY_TYPE") {
            self.library_type = val.parse().context("ZOTMD_LIBRARY_TYPE")?;
        }
        if let Some(val) = var("OUTPUT_DIR") {
            self.output_dir = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
        if let Some(val) = var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }
        if let Some(val) = var("DELETION_BEHAVIOR") {
            self.deletion_behavior = val.parse().context("ZOTMD_DELETION_BEHAVIOR")?;
        }
        Ok(())
    }

    /// Check that everything needed for a sync is present
    pub fn validate(&self) -> Result<()> {
        if self.library_id.trim().is_empty() {
            bail!("library_id is not set. Run `zotmd config set library_id <id>` or set ZOTMD_LIBRARY_ID.");
        }
        if !self.library_id.trim().chars().all(|c| c.is_ascii_digit()) {
            bail!("library_id must be numeric, got '{}'", self.library_id);
        }
        if self.api_key.trim().is_empty() {
            bail!("api_key is not set. Run `zotmd config set api_key <key>` or set ZOTMD_API_KEY.");
        }
        if self.output_dir.is_none() {
            bail!("output_dir is not set. Run `zotmd config set output_dir <path>` or set ZOTMD_OUTPUT_DIR.");
        }
        let quarantine = Path::new(&self.quarantine_dir);
        if self.quarantine_dir.is_empty()
            || quarantine.is_absolute()
            || quarantine
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            bail!(
                "quarantine_dir must be a plain relative directory name, got '{}'",
                self.quarantine_dir
            );
        }
        if self.retry_attempts == 0 {
            bail!("retry_attempts must be at least 1");
        }
        if self.full_sync_threshold < 0 {
            bail!("full_sync_threshold must not be negative");
        }
        Ok(())
    }

    /// Set a config value by key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "library_id" => self.library_id = value.trim().to_string(),
            "library_type" => self.library_type = value.parse()?,
            "api_key" => self.api_key = value.trim().to_string(),
            "output_dir" => self.output_dir = Some(expand_home(value)),
            "deletion_behavior" => self.deletion_behavior = value.parse()?,
            "data_dir" => self.data_dir = expand_home(value),
            "db_path" => {
                self.db_path = if value.is_empty() {
                    None
                } else {
                    Some(expand_home(value))
                }
            }
            "quarantine_dir" => self.quarantine_dir = value.to_string(),
            "retry_attempts" => {
                self.retry_attempts = value.parse().context("retry_attempts must be a number")?
            }
            "full_sync_threshold" => {
                self.full_sync_threshold = value
                    .parse()
                    .context("full_sync_threshold must be a number")?
            }
            "requests_per_minute" => {
                self.requests_per_minute = value
                    .parse()
                    .context("requests_per_minute must be a number")?
            }
            _ => bail!(
                "Unknown config key: '{}'. Valid keys: library_id, library_type, api_key, \
                 output_dir, deletion_behavior, data_dir, db_path, quarantine_dir, \
                 retry_attempts, full_sync_threshold, requests_per_minute",
                key
            ),
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with ZOTMD_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zotmd")
            .join("config.toml")
    }

    /// Path to the state database
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("zotmd.db"))
    }

    /// Path to the run lock file
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("zotmd.lock")
    }

    /// Retry schedule for remote calls
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// API key with everything but the last four characters hidden
    pub fn mask_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }
}

/// Mask all but the last four characters
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return "(not set)".to_string();
    }
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(value)),
        None => PathBuf::from(value),
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("zotmd")
}

fn default_quarantine_dir() -> String {
    "removed".to_string()
}

fn default_retry_attempts() -> u32 {
    4
}

fn default_retry_initial_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_full_sync_threshold() -> i64 {
    1_000
}

fn default_requests_per_minute() -> u32 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "ZOTMD_LIBRARY_ID",
        "ZOTMD_API_KEY",
        "ZOTMD_LIBRARY_TYPE",
        "ZOTMD_OUTPUT_DIR",
        "ZOTMD_DATA_DIR",
        "ZOTMD_DELETION_BEHAVIOR",
    ];

    fn valid() -> Config {
        Config {
            library_id: "123456".to_string(),
            api_key: "abcdefghijkl".to_string(),
            output_dir: Some(PathBuf::from("/notes/zotero")),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.deletion_behavior, DeletionBehavior::Move);
        assert_eq!(config.library_type, LibraryType::User);
        assert_eq!(config.quarantine_dir, "removed");
        assert_eq!(config.full_sync_threshold, 1000);
        assert!(config.data_dir.ends_with("zotmd"));
    }

    #[test]
    fn test_file_paths() {
        let mut config = Config {
            data_dir: PathBuf::from("/data/zotmd"),
            ..Default::default()
        };
        assert_eq!(config.db_path(), PathBuf::from("/data/zotmd/zotmd.db"));
        assert_eq!(config.lock_path(), PathBuf::from("/data/zotmd/zotmd.lock"));

        config.db_path = Some(PathBuf::from("/elsewhere/state.db"));
        assert_eq!(config.db_path(), PathBuf::from("/elsewhere/state.db"));
        assert_eq!(config.lock_path(), PathBuf::from("/data/zotmd/zotmd.lock"));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("ZOTMD_LIBRARY_ID", "42");
        env::set_var("ZOTMD_API_KEY", "secret");
        env::set_var("ZOTMD_LIBRARY_TYPE", "group");
        env::set_var("ZOTMD_OUTPUT_DIR", "/tmp/zotmd-out");
        env::set_var("ZOTMD_DELETION_BEHAVIOR", "delete");

        let config = Config::load_from_str("library_id = \"7\"").unwrap();
        assert_eq!(config.library_id, "42");
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.library_type, LibraryType::Group);
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/zotmd-out")));
        assert_eq!(config.deletion_behavior, DeletionBehavior::Delete);
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let _guard = EnvGuard::new(ENV_VARS);

        env::set_var("ZOTMD_DELETION_BEHAVIOR", "shred");
        assert!(Config::load_from_str("").is_err());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            library_id = "123"
            api_key = "key"
            output_dir = "/notes"
            deletion_behavior = "delete"
            retry_attempts = 2
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.library_id, "123");
        assert_eq!(config.output_dir, Some(PathBuf::from("/notes")));
        assert_eq!(config.deletion_behavior, DeletionBehavior::Delete);
        assert_eq!(config.retry().max_attempts, 2);
        assert_eq!(config.requests_per_minute, 120);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config::load_from_path(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(config.library_id.is_empty());
        assert!(config.output_dir.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("zotmd").join("config.toml");

        let config = valid();
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.library_id = "abc".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.output_dir = None;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.quarantine_dir = "../outside".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set() {
        let mut config = Config::default();
        config.set("library_id", " 99 ").unwrap();
        config.set("deletion_behavior", "delete").unwrap();
        config.set("library_type", "group").unwrap();
        config.set("full_sync_threshold", "50").unwrap();

        assert_eq!(config.library_id, "99");
        assert_eq!(config.deletion_behavior, DeletionBehavior::Delete);
        assert_eq!(config.library_type, LibraryType::Group);
        assert_eq!(config.full_sync_threshold, 50);

        assert!(config.set("deletion_behavior", "burn").is_err());
        assert!(config.set("unknown", "x").is_err());
    }

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_secret(""), "(not set)");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret("abcdefgh"), "****efgh");
    }
}
