//! Courier configuration file handling
//!
//! Configuration is TOML and lives next to the queue database by default
//! (`~/.local/share/courier/config.toml`). A commented default file is
//! written the first time the service runs without one.
//!
//! Durations are human-readable strings (`"60s"`, `"500ms"`, `"1h"`) parsed
//! with `humantime` when the runtime settings are built.

use courier::delivery::RetryPolicy;
use courier::dispatch::DispatchConfig;
use courier::retry::RetrySchedule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_FILE: &str = "tech.log";
const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8081";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid duration for {field} '{value}': {source}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        source: humantime::DurationError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierConfig {
    pub store: StoreConfig,

    #[serde(default)]
    pub dispatch: DispatchSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database holding the `messages` table
    pub path: PathBuf,

    /// How long a write waits on a locked database before reporting a conflict
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_update_queue_capacity")]
    pub update_queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_unknown_peer_retries")]
    pub max_unknown_peer_retries: u32,

    #[serde(default = "default_max_cool_down_retries")]
    pub max_cool_down_retries: u32,

    /// A single cool-down longer than this fails the job
    #[serde(default = "default_max_cool_down")]
    pub max_cool_down: String,

    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    #[serde(default = "default_conflict_backoff")]
    pub conflict_backoff: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Directory the gateway keeps per-account session files in
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSourceKind {
    /// `API_ID_<account>` / `API_HASH_<account>` environment variables
    #[default]
    Env,
    /// `accounts` table in the queue database
    AccountsTable,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub source: CredentialSourceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file name
    #[serde(default = "default_log_file")]
    pub file: String,

    /// Directory for the log file (defaults to the data directory)
    pub directory: Option<PathBuf>,
}

fn default_busy_timeout() -> String {
    "5s".to_string()
}

fn default_poll_interval() -> String {
    "60s".to_string()
}

fn default_update_queue_capacity() -> usize {
    64
}

fn default_max_unknown_peer_retries() -> u32 {
    1
}

fn default_max_cool_down_retries() -> u32 {
    5
}

fn default_max_cool_down() -> String {
    "1h".to_string()
}

fn default_max_conflict_retries() -> u32 {
    10
}

fn default_conflict_backoff() -> String {
    "500ms".to_string()
}

fn default_gateway_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

fn default_session_dir() -> PathBuf {
    default_data_dir().join("sessions")
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_log_file() -> String {
    DEFAULT_LOG_FILE.to_string()
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            update_queue_capacity: default_update_queue_capacity(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_unknown_peer_retries: default_max_unknown_peer_retries(),
            max_cool_down_retries: default_max_cool_down_retries(),
            max_cool_down: default_max_cool_down(),
            max_conflict_retries: default_max_conflict_retries(),
            conflict_backoff: default_conflict_backoff(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            request_timeout: default_request_timeout(),
            session_dir: default_session_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            directory: None,
        }
    }
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|source| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
        source,
    })
}

impl CourierConfig {
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            store: StoreConfig {
                path: store_path,
                busy_timeout: default_busy_timeout(),
            },
            dispatch: DispatchSection::default(),
            retry: RetrySection::default(),
            platform: PlatformConfig::default(),
            credentials: CredentialsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(store_path: &Path) -> String {
        format!(
            r#"# Courier configuration

[store]
# SQLite database with the messages table
path = "{store_path}"

# Wait this long on a locked database before treating the write as a conflict
busy_timeout = "5s"

[dispatch]
# Sleep between polling cycles
poll_interval = "60s"

# Pending status updates buffered for the writer task
update_queue_capacity = 64

[retry]
# Contact registrations per message before an unknown recipient fails the job
max_unknown_peer_retries = 1

# Platform cool-downs honoured per message
max_cool_down_retries = 5

# A single cool-down longer than this fails the job
max_cool_down = "1h"

# Retries when session or queue storage is locked by another session
max_conflict_retries = 10
conflict_backoff = "500ms"

[platform]
# Messaging gateway endpoint
gateway_url = "{gateway_url}"
request_timeout = "30s"

# Per-account session files, one per sender
# session_dir = "/var/lib/courier/sessions"

[credentials]
# "env": API_ID_<account> / API_HASH_<account> variables (a .env file is honoured)
# "accounts_table": accounts(phone, api_id, api_hash) in the store database
source = "env"

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG overrides)
level = "info"

# Log file name, written next to the database unless directory is set
file = "tech.log"
# directory = "/var/log/courier"
"#,
            store_path = store_path.display(),
            gateway_url = DEFAULT_GATEWAY_URL,
        )
    }

    pub fn create_default(config_path: &Path, store_path: &Path) -> Result<(), ConfigError> {
        write_file(config_path, &Self::generate_default_toml(store_path))
    }

    pub fn busy_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("store.busy_timeout", &self.store.busy_timeout)
    }

    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("platform.request_timeout", &self.platform.request_timeout)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy {
            max_unknown_peer_retries: self.retry.max_unknown_peer_retries,
            max_cool_down_retries: self.retry.max_cool_down_retries,
            max_cool_down: parse_duration("retry.max_cool_down", &self.retry.max_cool_down)?,
            conflict: RetrySchedule::fixed(
                self.retry.max_conflict_retries,
                parse_duration("retry.conflict_backoff", &self.retry.conflict_backoff)?,
            ),
        })
    }

    pub fn dispatch_config(&self) -> Result<DispatchConfig, ConfigError> {
        Ok(DispatchConfig {
            poll_interval: parse_duration("dispatch.poll_interval", &self.dispatch.poll_interval)?,
            update_queue_capacity: self.dispatch.update_queue_capacity,
        })
    }

    /// Directory the log file goes in
    pub fn log_directory(&self) -> PathBuf {
        self.logging.directory.clone().unwrap_or_else(|| {
            self.store
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(default_data_dir)
        })
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, contents).map_err(write_err)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
}

/// Default queue database: `~/.local/share/courier/messages.db`
pub fn default_store_path() -> PathBuf {
    default_data_dir().join("messages.db")
}

/// Config file adjacent to the database
pub fn default_config_path(store_path: &Path) -> PathBuf {
    store_path
        .parent()
        .unwrap_or(store_path)
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CourierConfig::new(PathBuf::from("/data/courier/messages.db"));

        assert_eq!(config.retry_policy().unwrap(), RetryPolicy::default());
        assert_eq!(config.dispatch_config().unwrap(), DispatchConfig::default());
        assert_eq!(config.busy_timeout().unwrap(), Duration::from_secs(5));
        assert_eq!(config.credentials.source, CredentialSourceKind::Env);
        assert_eq!(config.logging.file, "tech.log");
    }

    #[test]
    fn test_serialized_config_loads() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = CourierConfig::new(PathBuf::from("/data/courier/messages.db"));
        config.credentials.source = CredentialSourceKind::AccountsTable;
        fs::write(&config_path, toml::to_string_pretty(&config).unwrap()).unwrap();

        assert_eq!(CourierConfig::load(&config_path).unwrap(), config);
    }

    #[test]
    fn test_create_default_config_matches_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");
        let store_path = temp_dir.path().join("messages.db");

        CourierConfig::create_default(&config_path, &store_path).unwrap();
        let config = CourierConfig::load(&config_path).unwrap();

        assert_eq!(config.store.path, store_path);
        assert_eq!(config.retry_policy().unwrap(), RetryPolicy::default());
        assert_eq!(config.dispatch_config().unwrap(), DispatchConfig::default());
        assert_eq!(config.platform.gateway_url, DEFAULT_GATEWAY_URL);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[store]\npath = \"/tmp/messages.db\"\n").unwrap();

        let config = CourierConfig::load(&config_path).unwrap();

        assert_eq!(config.dispatch.update_queue_capacity, 64);
        assert_eq!(config.retry.max_conflict_retries, 10);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.log_directory(), PathBuf::from("/tmp"));
    }

    #[test]
    fn test_custom_retry_section() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[store]
path = "/tmp/messages.db"

[retry]
max_cool_down_retries = 2
max_cool_down = "10m"
max_conflict_retries = 3
conflict_backoff = "2s"

[credentials]
source = "accounts_table"
"#,
        )
        .unwrap();

        let config = CourierConfig::load(&config_path).unwrap();
        let policy = config.retry_policy().unwrap();

        assert_eq!(policy.max_cool_down_retries, 2);
        assert_eq!(policy.max_cool_down, Duration::from_secs(600));
        assert_eq!(
            policy.conflict,
            RetrySchedule::fixed(3, Duration::from_secs(2))
        );
        assert_eq!(config.credentials.source, CredentialSourceKind::AccountsTable);
    }

    #[test]
    fn test_invalid_duration_is_reported() {
        let mut config = CourierConfig::new(PathBuf::from("/tmp/messages.db"));
        config.dispatch.poll_interval = "soon".into();

        let err = config.dispatch_config().unwrap_err();
        assert!(err.to_string().contains("dispatch.poll_interval"));
    }

    #[test]
    fn test_missing_store_section_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[logging]\nlevel = \"debug\"\n").unwrap();

        assert!(matches!(
            CourierConfig::load(&config_path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_default_config_path() {
        let store_path = PathBuf::from("/data/courier/messages.db");
        assert_eq!(
            default_config_path(&store_path),
            PathBuf::from("/data/courier/config.toml")
        );
    }
}
