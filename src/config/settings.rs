//! The JSON configuration file: typed structs, defaults, validation, and
//! the template written by `--setup`.

use crate::constants::{
    DEFAULT_FULL_SYNC_MINUTES, DEFAULT_LOGS, DEFAULT_MAX_STATS, DEFAULT_MAX_WAIT_LOCKED_SECS,
    DEFAULT_SSH_PORT, DEFAULT_WEB_SERVER_HOST, DEFAULT_WEB_SERVER_PORT,
    WARNING_MAX_TIME_FILE_OPEN_SECS,
};
use regex::Regex;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub hostname: String,
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
    #[serde(default = "default_logs")]
    pub logs: String,
    #[serde(default = "default_control_host")]
    pub control_server_host: String,
    #[serde(default = "default_control_port")]
    pub control_server_port: u16,
    #[serde(default = "default_secret")]
    pub control_server_secret: String,
    #[serde(default = "default_max_stats")]
    pub max_stats: usize,
    #[serde(rename = "SENTRY_DSN", default)]
    pub sentry_dsn: Option<String>,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub path: String,
    /// `user@host`.
    pub destination: String,
    pub destination_path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Raw rsync option string.
    #[serde(default)]
    pub options: String,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Subset of the inotify event names; open and close-write are always
    /// monitored regardless.
    pub events: Vec<String>,
    pub event_queue_limit: usize,
    #[serde(default = "default_max_wait_locked")]
    pub max_wait_locked: u64,
    #[serde(default = "default_warning_file_open_time")]
    pub warning_file_open_time: u64,
    #[serde(default)]
    pub extensions_to_ignore: Vec<String>,
    #[serde(default)]
    pub files_to_exclude: Vec<String>,
    #[serde(default)]
    pub pre_sync_commands_local: Vec<String>,
    #[serde(default)]
    pub post_sync_commands_local: Vec<String>,
    #[serde(default)]
    pub pre_sync_commands_remote: Vec<String>,
    #[serde(default)]
    pub post_sync_commands_remote: Vec<String>,
    #[serde(default)]
    pub pre_sync_commands_checkexit_local: Vec<String>,
    #[serde(default)]
    pub post_sync_commands_checkexit_local: Vec<String>,
    #[serde(default)]
    pub pre_sync_commands_checkexit_remote: Vec<String>,
    #[serde(default)]
    pub post_sync_commands_checkexit_remote: Vec<String>,
    #[serde(default)]
    pub notify_file_locks: bool,
    #[serde(default)]
    pub use_global_server_lock: bool,
    #[serde(default)]
    pub remote_hostname: Option<String>,
    #[serde(default)]
    pub control_server_host: Option<String>,
    #[serde(default = "default_control_port")]
    pub control_server_port: u16,
    #[serde(default)]
    pub control_server_secret: Option<String>,
    #[serde(default)]
    pub control_server_lock: bool,
    /// Minutes between scheduled full syncs.
    #[serde(default = "default_full_sync_interval")]
    pub full_sync_interval: u64,
}

fn default_loglevel() -> String {
    "INFO".to_string()
}
fn default_logs() -> String {
    DEFAULT_LOGS.to_string()
}
fn default_control_host() -> String {
    DEFAULT_WEB_SERVER_HOST.to_string()
}
fn default_control_port() -> u16 {
    DEFAULT_WEB_SERVER_PORT
}
fn default_secret() -> String {
    "secret".to_string()
}
fn default_max_stats() -> usize {
    DEFAULT_MAX_STATS
}
fn default_true() -> bool {
    true
}
fn default_ssh_user() -> String {
    "root".to_string()
}
fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}
fn default_max_wait_locked() -> u64 {
    DEFAULT_MAX_WAIT_LOCKED_SECS
}
fn default_warning_file_open_time() -> u64 {
    WARNING_MAX_TIME_FILE_OPEN_SECS
}
fn default_full_sync_interval() -> u64 {
    DEFAULT_FULL_SYNC_MINUTES
}

/// Fatal configuration problems, each with its process exit code.
#[derive(Debug)]
pub enum ConfigError {
    NotFound(String),
    Parse(String),
    HostnameMismatch { configured: String, actual: String },
    InvalidDestination(String),
    Setup(String),
}

impl ConfigError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Parse(_) => 2,
            _ => 1,
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(path) => {
                write!(f, "Configuration file not found: {}", path)
            }
            ConfigError::Parse(e) => write!(f, "Error loading configuration: {}", e),
            ConfigError::HostnameMismatch { configured, actual } => write!(
                f,
                "Hostname mismatch: {} in configuration file does not match {}",
                configured, actual
            ),
            ConfigError::InvalidDestination(reason) => {
                write!(f, "Invalid destination: {}", reason)
            }
            ConfigError::Setup(reason) => write!(f, "Setup failed: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and parse the configuration file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// The configured hostname must match the machine we run on; refusing to
/// start beats silently pushing another host's data.
pub fn validate_hostname(config: &Config) -> Result<(), ConfigError> {
    let actual = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    if config.hostname != actual {
        return Err(ConfigError::HostnameMismatch {
            configured: config.hostname.clone(),
            actual,
        });
    }
    Ok(())
}

/// Structural checks on one destination entry.
pub fn validate_destination(dest: &DestinationConfig) -> Result<(), ConfigError> {
    let form = Regex::new(r"^[^@\s]+@[^@\s]+$").expect("destination form pattern");
    if !form.is_match(&dest.destination) {
        return Err(ConfigError::InvalidDestination(format!(
            "destination '{}' is not of the form user@host",
            dest.destination
        )));
    }
    if dest.event_queue_limit == 0 {
        return Err(ConfigError::InvalidDestination(format!(
            "event_queue_limit for '{}' must be positive",
            dest.destination
        )));
    }
    Ok(())
}

/// Template written by `--setup` / `--setupfolder`.
pub const CONFIG_TEMPLATE: &str = r#"{
    "hostname": "CHANGE_ME",
    "loglevel": "INFO",
    "logs": "/var/log/fsrsync.log",
    "control_server_host": "127.0.0.1",
    "control_server_port": 8080,
    "control_server_secret": "secret",
    "max_stats": 10,
    "destinations": [
        {
            "path": "/srv/data",
            "destination": "root@backup01",
            "destination_path": "/srv/backup",
            "options": "-az",
            "events": ["IN_CLOSE_WRITE", "IN_CREATE", "IN_MODIFY", "IN_DELETE"],
            "event_queue_limit": 100,
            "max_wait_locked": 60,
            "full_sync_interval": 60
        }
    ]
}
"#;

/// Write the template into `dir` unless a config already exists there.
pub fn write_template(dir: &Path) -> Result<std::path::PathBuf, ConfigError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| ConfigError::Setup(format!("cannot create {}: {}", dir.display(), e)))?;
    let target = dir.join("config.json");
    if !target.exists() {
        std::fs::write(&target, CONFIG_TEMPLATE)
            .map_err(|e| ConfigError::Setup(format!("cannot write {}: {}", target.display(), e)))?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_destination() -> serde_json::Value {
        json!({
            "path": "/srv/data",
            "destination": "root@backup01",
            "destination_path": "/srv/backup",
            "events": ["IN_CLOSE_WRITE"],
            "event_queue_limit": 100
        })
    }

    #[test]
    fn defaults_are_applied() {
        let config: Config = serde_json::from_value(json!({
            "hostname": "host-a",
            "destinations": [minimal_destination()]
        }))
        .unwrap();
        assert_eq!(config.loglevel, "INFO");
        assert_eq!(config.logs, "/var/log/fsrsync.log");
        assert_eq!(config.control_server_port, 8080);
        assert_eq!(config.max_stats, 10);

        let dest = &config.destinations[0];
        assert!(dest.enabled);
        assert_eq!(dest.ssh_user, "root");
        assert_eq!(dest.ssh_port, 22);
        assert_eq!(dest.max_wait_locked, 60);
        assert_eq!(dest.warning_file_open_time, 86400);
        assert_eq!(dest.full_sync_interval, 60);
        assert!(!dest.use_global_server_lock);
    }

    #[test]
    fn sentry_dsn_is_accepted() {
        let config: Config = serde_json::from_value(json!({
            "hostname": "host-a",
            "SENTRY_DSN": "https://k@sentry.example.com/7"
        }))
        .unwrap();
        assert_eq!(
            config.sentry_dsn.as_deref(),
            Some("https://k@sentry.example.com/7")
        );
    }

    #[test]
    fn destination_form_is_checked() {
        let mut dest: DestinationConfig =
            serde_json::from_value(minimal_destination()).unwrap();
        assert!(validate_destination(&dest).is_ok());

        dest.destination = "just-a-host".to_string();
        let err = validate_destination(&dest).unwrap_err();
        assert_eq!(err.exit_code(), 1);

        dest.destination = "user@host@extra".to_string();
        assert!(validate_destination(&dest).is_err());
    }

    #[test]
    fn zero_queue_limit_is_rejected() {
        let mut dest: DestinationConfig =
            serde_json::from_value(minimal_destination()).unwrap();
        dest.event_queue_limit = 0;
        assert!(validate_destination(&dest).is_err());
    }

    #[test]
    fn missing_file_and_bad_json_use_distinct_exit_codes() {
        let missing = load_config(Path::new("/fsrsync/definitely/missing.json")).unwrap_err();
        assert_eq!(missing.exit_code(), 1);

        let mut bad = std::env::temp_dir();
        bad.push(format!("fsrsync_badcfg_{}.json", std::process::id()));
        std::fs::write(&bad, "{ not json").unwrap();
        let parse = load_config(&bad).unwrap_err();
        assert_eq!(parse.exit_code(), 2);
        let _ = std::fs::remove_file(&bad);
    }

    #[test]
    fn hostname_gate_compares_against_the_machine() {
        let mismatch: Config = serde_json::from_value(json!({
            "hostname": "definitely-not-this-machine"
        }))
        .unwrap();
        let err = validate_hostname(&mismatch).unwrap_err();
        assert_eq!(err.exit_code(), 1);

        let actual = nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let matching: Config =
            serde_json::from_value(json!({"hostname": actual})).unwrap();
        assert!(validate_hostname(&matching).is_ok());
    }

    #[test]
    fn template_parses_and_roundtrips() {
        let config: Config = serde_json::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.destinations.len(), 1);
        assert!(validate_destination(&config.destinations[0]).is_ok());
    }

    #[test]
    fn write_template_respects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_template(dir.path()).unwrap();
        assert!(target.exists());

        std::fs::write(&target, "{\"hostname\": \"kept\"}").unwrap();
        let target2 = write_template(dir.path()).unwrap();
        let content = std::fs::read_to_string(&target2).unwrap();
        assert!(content.contains("kept"));
    }
}
