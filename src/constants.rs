//! Shared timing and default-value constants.

use std::time::Duration;

pub const WAIT_30_SEC: Duration = Duration::from_secs(30);
pub const WAIT_60_SEC: Duration = Duration::from_secs(60);
pub const WAIT_1H: Duration = Duration::from_secs(3600);

/// Sleep between full-sync scheduler passes.
pub const CHECK_THREADS_SLEEP_SECS: u64 = 300;
/// Minutes between full syncs when a destination does not configure one.
pub const DEFAULT_FULL_SYNC_MINUTES: u64 = 60;
/// Statistics ring length when the config does not set `max_stats`.
pub const DEFAULT_MAX_STATS: usize = 10;
/// Exclude-everything sentinel appended when an include list is present.
pub const EXCLUDE_ALL: &str = "*";

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);
pub const SSH_COMMAND_TIMEOUT: Duration = Duration::from_secs(1000);

/// Seconds a file may stay open before the classifier logs a warning.
pub const WARNING_MAX_TIME_FILE_OPEN_SECS: u64 = 86400;
/// Seconds an open file is excluded from regular syncs before eviction.
pub const DEFAULT_MAX_WAIT_LOCKED_SECS: u64 = 60;
/// Seconds a server lock survives without a release.
pub const DEFAULT_MAX_LOCK_TIME: Duration = Duration::from_secs(1800);

pub const DEFAULT_WEB_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_WEB_SERVER_PORT: u16 = 8080;
pub const DEFAULT_SSH_PORT: u16 = 22;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/fsrsync/config.json";
pub const DEFAULT_LOGS: &str = "/var/log/fsrsync.log";
pub const MAX_LOG_SIZE: u64 = 100 * 1024 * 1024;

/// Idle poll interval of the inotify pump thread.
pub const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Coalescing window applied after the first event of a batch.
pub const EVENT_READ_DELAY: Duration = Duration::from_millis(100);
/// Bound of the raw-event channel; oldest events are dropped on overflow.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
