//! Runtime state for one configured transfer target.

use crate::config::DestinationConfig;
use crate::core::stats::{SyncStats, push_bounded};
use crate::err::Result;
use crate::fs::FileRegistries;
use crate::fs::util::fix_path_slashes;
use crate::sync::rsync::{HookSet, RsyncManager, RsyncSettings};
use crate::utilities::AsyncLogger;
use crate::web::client::WebClient;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

pub struct Destination {
    /// Local source directory, canonical with trailing slash.
    pub path: String,
    /// `user@host`.
    pub remote_endpoint: String,
    pub remote_path: String,
    pub event_queue_limit: usize,
    pub max_wait_locked: Duration,
    pub warning_file_open_time: Duration,
    pub extensions_to_ignore: Vec<String>,
    pub files_to_exclude: Vec<String>,
    /// Configured event names; open and close-write are forced at watch
    /// installation regardless of this list.
    pub events: Vec<String>,
    pub notify_file_locks: bool,
    pub use_global_server_lock: bool,
    pub remote_hostname: Option<String>,
    pub full_sync_interval: Duration,
    pub rsync: RsyncManager,
    pub web_client: WebClient,
    /// True while a worker is inside this destination's sync critical
    /// section. Observed-true means "skip this cycle".
    pub locked_on_sync: AtomicBool,
    pub last_full_sync: Mutex<Option<DateTime<Utc>>>,
    statistics: Mutex<VecDeque<SyncStats>>,
    max_stats: usize,
}

impl Destination {
    pub fn from_config(
        cfg: &DestinationConfig,
        max_stats: usize,
        logger: AsyncLogger,
    ) -> Result<Self> {
        let path = fix_path_slashes(&cfg.path);
        let destination_path = fix_path_slashes(&cfg.destination_path);

        let hooks = HookSet {
            pre_local: cfg.pre_sync_commands_local.clone(),
            pre_local_checkexit: cfg.pre_sync_commands_checkexit_local.clone(),
            pre_remote: cfg.pre_sync_commands_remote.clone(),
            pre_remote_checkexit: cfg.pre_sync_commands_checkexit_remote.clone(),
            post_local: cfg.post_sync_commands_local.clone(),
            post_local_checkexit: cfg.post_sync_commands_checkexit_local.clone(),
            post_remote: cfg.post_sync_commands_remote.clone(),
            post_remote_checkexit: cfg.post_sync_commands_checkexit_remote.clone(),
        };

        let rsync = RsyncManager::new(
            RsyncSettings {
                destination: cfg.destination.clone(),
                destination_path,
                path: path.clone(),
                options: cfg.options.clone(),
                ssh_key: cfg.ssh_key.clone(),
                ssh_port: Some(cfg.ssh_port),
                hooks,
            },
            logger.clone(),
        );

        let web_client = WebClient::new(
            cfg.control_server_host.as_deref().unwrap_or(""),
            cfg.control_server_port,
            cfg.control_server_secret.as_deref().unwrap_or("secret"),
            logger,
        )?;

        Ok(Self {
            path,
            remote_endpoint: cfg.destination.clone(),
            remote_path: cfg.destination_path.clone(),
            event_queue_limit: cfg.event_queue_limit,
            max_wait_locked: Duration::from_secs(cfg.max_wait_locked),
            warning_file_open_time: Duration::from_secs(cfg.warning_file_open_time),
            extensions_to_ignore: cfg.extensions_to_ignore.clone(),
            files_to_exclude: cfg.files_to_exclude.clone(),
            events: cfg.events.clone(),
            notify_file_locks: cfg.notify_file_locks,
            use_global_server_lock: cfg.use_global_server_lock,
            remote_hostname: cfg.remote_hostname.clone(),
            full_sync_interval: Duration::from_secs(cfg.full_sync_interval * 60),
            rsync,
            web_client,
            locked_on_sync: AtomicBool::new(false),
            last_full_sync: Mutex::new(None),
            statistics: Mutex::new(VecDeque::new()),
            max_stats,
        })
    }

    pub fn last_full_sync_string(&self) -> Option<String> {
        self.last_full_sync
            .lock()
            .unwrap()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    pub fn mark_full_sync_now(&self) {
        *self.last_full_sync.lock().unwrap() = Some(Utc::now());
    }

    /// Full sync is due when one never ran or the interval elapsed.
    pub fn full_sync_due(&self) -> bool {
        match *self.last_full_sync.lock().unwrap() {
            None => true,
            Some(last) => {
                let elapsed = Utc::now().signed_duration_since(last);
                elapsed.num_seconds() >= self.full_sync_interval.as_secs() as i64
            }
        }
    }

    /// Record one sync attempt, snapshotting pending work under this
    /// destination's prefix.
    pub fn record_statistics(
        &self,
        registries: &FileRegistries,
        result: bool,
        notification_result: Option<bool>,
        hooks_ok: Option<bool>,
        log_type: &str,
    ) {
        let regular = registries.list_regular_for_prefix(&self.path);
        let immediate = registries.list_immediate_for_prefix(&self.path);
        let entry = SyncStats::new(
            &self.path,
            &regular,
            &immediate,
            self.event_queue_limit,
            self.last_full_sync_string(),
            result,
            notification_result,
            hooks_ok,
            log_type,
        );
        push_bounded(&mut self.statistics.lock().unwrap(), entry, self.max_stats);
    }

    pub fn statistics_snapshot(&self) -> Vec<SyncStats> {
        self.statistics.lock().unwrap().iter().cloned().collect()
    }
}
