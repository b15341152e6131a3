//! The orchestrator: owns shared state, classifies raw events, and fans
//! out destination workers once per event cycle.

use crate::config::{Config, ConfigError};
use crate::core::destination::Destination;
use crate::core::locks::ServerLockCoordinator;
use crate::core::worker;
use crate::err::Result;
use crate::fs::util::{fix_path_slashes, validate_path};
use crate::fs::{FileRegistries, FilesystemMonitor, MonitorHandle};
use crate::utilities::AsyncLogger;
use nix::sys::inotify::AddWatchFlags;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;

/// A successfully shipped record awaiting removal from the registries.
/// Deleting with the sync start time as cutoff spares records that arrived
/// while the transfer ran.
pub struct PendingDelete {
    pub path: String,
    pub synced_at: Instant,
}

/// State shared between the event loop, the destination workers, the
/// full-sync scheduler and the control plane.
pub struct SharedState {
    pub hostname: String,
    pub control_host: String,
    pub control_port: u16,
    pub control_secret: String,
    pub logger: AsyncLogger,
    pub registries: FileRegistries,
    pub coordinator: ServerLockCoordinator,
    pub destinations: Vec<Arc<Destination>>,
    pub pending_deletes: Mutex<Vec<PendingDelete>>,
}

pub struct SyncApplication {
    pub shared: Arc<SharedState>,
    /// Present unless the application was set up in full-sync mode.
    handle: Option<MonitorHandle>,
}

impl SyncApplication {
    /// Build destinations and install watches. Invalid destination forms
    /// are fatal; a missing source path only skips that destination.
    pub fn setup(
        config: &Config,
        logger: AsyncLogger,
        full_sync: bool,
    ) -> std::result::Result<Self, ConfigError> {
        let mut monitor = if full_sync {
            None
        } else {
            Some(
                FilesystemMonitor::new(logger.clone())
                    .map_err(|e| ConfigError::Setup(e.to_string()))?,
            )
        };

        let mut destinations: Vec<Arc<Destination>> = Vec::new();
        for dest_config in &config.destinations {
            if !dest_config.enabled {
                logger.debug(format!(
                    "Destination {} is disabled. Skipping...",
                    dest_config.destination
                ));
                continue;
            }
            crate::config::validate_destination(dest_config)?;

            let path = fix_path_slashes(&dest_config.path);
            if !validate_path(&path) {
                logger.error(format!("Invalid path: {}, skipping destination...", path));
                continue;
            }
            if destinations
                .iter()
                .any(|d| d.path == path && d.remote_endpoint == dest_config.destination)
            {
                logger.error(format!(
                    "Destination path {} already exists in another destination. Skipping...",
                    path
                ));
                continue;
            }

            logger.info(format!("Setting up destination: {}", path));
            let dest = Destination::from_config(dest_config, config.max_stats, logger.clone())
                .map_err(|e| ConfigError::Setup(e.to_string()))?;

            if let Some(monitor) = monitor.as_mut() {
                if let Err(e) = monitor.add_watch(&dest.path, &dest.events) {
                    logger.error(format!(
                        "Could not watch {}: {}, skipping destination...",
                        dest.path, e
                    ));
                    continue;
                }
            }
            destinations.push(Arc::new(dest));
        }

        let shared = Arc::new(SharedState {
            hostname: config.hostname.clone(),
            control_host: config.control_server_host.clone(),
            control_port: config.control_server_port,
            control_secret: config.control_server_secret.clone(),
            logger: logger.clone(),
            registries: FileRegistries::new(),
            coordinator: ServerLockCoordinator::new(logger),
            destinations,
            pending_deletes: Mutex::new(Vec::new()),
        });

        Ok(Self {
            shared,
            handle: monitor.map(FilesystemMonitor::start),
        })
    }

    /// One full-tree rsync per destination, sequentially; the `--fullsync`
    /// one-shot mode.
    pub async fn run_full_sync_once(&self) {
        for dest in &self.shared.destinations {
            self.shared.logger.debug(format!(
                "Running full sync for destination: {}",
                dest.remote_endpoint
            ));
            let (rsync_ok, hooks_ok) = dest
                .rsync
                .run(Some(dest.files_to_exclude.clone()), None)
                .await;
            dest.record_statistics(
                &self.shared.registries,
                rsync_ok,
                None,
                Some(hooks_ok),
                "full",
            );
        }
    }

    /// Apply the classification table to one raw event.
    ///
    /// Ordering matters: CREATE is handled before OPEN so a file created
    /// and opened within one aggregated read ends up in the immediate set.
    pub fn classify_event(&self, base: &str, mask: AddWatchFlags, name: Option<&str>) {
        let registries = &self.shared.registries;
        let logger = &self.shared.logger;

        let full_path = match name {
            Some(n) if !n.is_empty() => fix_path_slashes(&format!("{}/{}", base, n)),
            _ => fix_path_slashes(base),
        };

        const MODIFY_FAMILY: AddWatchFlags = AddWatchFlags::IN_ACCESS
            .union(AddWatchFlags::IN_MODIFY)
            .union(AddWatchFlags::IN_DELETE)
            .union(AddWatchFlags::IN_MOVED_FROM)
            .union(AddWatchFlags::IN_MOVED_TO)
            .union(AddWatchFlags::IN_MOVE_SELF)
            .union(AddWatchFlags::IN_DELETE_SELF)
            .union(AddWatchFlags::IN_ATTRIB);

        if mask.intersects(MODIFY_FAMILY.union(AddWatchFlags::IN_CLOSE_NOWRITE)) {
            logger.info(format!("Event detected: {:?} on {}", mask, full_path));
        }

        if mask.contains(AddWatchFlags::IN_CREATE) {
            logger.debug(format!(
                "File created: {}, added to immediate sync",
                full_path
            ));
            registries.add_immediate(&full_path);
        }

        if mask.contains(AddWatchFlags::IN_OPEN) && !mask.contains(AddWatchFlags::IN_ISDIR) {
            logger.debug(format!("File opened: {}", full_path));
            registries.add_open(&full_path);
        }

        let mut closed_open_file = false;
        if mask.intersects(AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_CLOSE_NOWRITE)
            && registries.open_contains(&full_path)
        {
            logger.debug(format!("File closed: {}", full_path));
            registries.remove_open(&full_path);
            registries.add_immediate(&full_path);
            closed_open_file = true;
        }

        let regular_worthy = mask.intersects(MODIFY_FAMILY)
            || (mask.contains(AddWatchFlags::IN_CLOSE_NOWRITE) && !closed_open_file);
        if regular_worthy {
            logger.debug(format!("File modified: {}", full_path));
            registries.add_regular(&full_path);
        }

        self.warn_files_open_too_long();
        registries.sweep_closed(logger);
    }

    fn warn_files_open_too_long(&self) {
        for dest in &self.shared.destinations {
            for record in self
                .shared
                .registries
                .list_open_for_prefix(&dest.path)
            {
                if record.first_seen.elapsed() > dest.warning_file_open_time {
                    self.shared.logger.warning(format!(
                        "File {} has been open for too long",
                        record.path
                    ));
                }
            }
        }
    }

    /// Delete shipped records queued by the workers. The cutoff keeps
    /// anything that arrived after the sync started.
    fn drain_pending_deletes(&self) {
        let drained: Vec<PendingDelete> =
            std::mem::take(&mut *self.shared.pending_deletes.lock().unwrap());
        for delete in drained {
            self.shared
                .registries
                .delete_immediate(&delete.path, Some(delete.synced_at));
            self.shared
                .registries
                .delete_regular(&delete.path, Some(delete.synced_at));
        }
    }

    /// The event loop: classify, fan out one worker per destination with
    /// pending work, join them all, then drain the delete queue. Worker
    /// fan-out is capped at one task per destination per cycle.
    pub async fn run(mut self) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Err(crate::fsrsync_error!(
                Internal,
                "Event loop started without a filesystem monitor"
            )
            .into());
        };

        loop {
            let raw = match handle.rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    self.shared.logger.warning(format!(
                        "Event channel overflowed, {} events dropped",
                        skipped
                    ));
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Some(base) = handle.resolve(&raw.wd) else {
                self.shared
                    .logger
                    .warning(format!("Dropping event for unknown watch id {:?}", raw.wd));
                continue;
            };
            self.classify_event(base, raw.mask, raw.name.as_deref());

            let pending_immediate = self.shared.registries.immediate_len();
            let pending_regular = self.shared.registries.regular_len();
            self.shared.logger.debug(format!(
                "Pending immediate sync files: {}, pending regular sync files: {}",
                pending_immediate, pending_regular
            ));
            if pending_immediate == 0 && pending_regular == 0 {
                continue;
            }

            let mut workers = JoinSet::new();
            for dest in &self.shared.destinations {
                if !dest.locked_on_sync.load(std::sync::atomic::Ordering::Acquire) {
                    workers.spawn(worker::manage_destination_event(
                        self.shared.clone(),
                        dest.clone(),
                    ));
                }
            }
            while workers.join_next().await.is_some() {}

            self.drain_pending_deletes();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::path::{Path, PathBuf};

    struct TempDirGuard(PathBuf);
    impl TempDirGuard {
        fn new(prefix: &str) -> Self {
            let mut p = std::env::temp_dir();
            let ts = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            p.push(format!("{}_{}_{}", prefix, std::process::id(), ts));
            fs::create_dir_all(&p).unwrap();
            TempDirGuard(p)
        }
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn app_for(tmp: &TempDirGuard, queue_limit: usize) -> SyncApplication {
        let config: Config = serde_json::from_value(json!({
            "hostname": "test-host",
            "destinations": [{
                "path": tmp.path().to_str().unwrap(),
                "destination": "root@backup01",
                "destination_path": "/srv/backup",
                "events": ["IN_CLOSE_WRITE", "IN_CREATE", "IN_MODIFY"],
                "event_queue_limit": queue_limit
            }]
        }))
        .unwrap();
        SyncApplication::setup(&config, AsyncLogger::disabled(), false).unwrap()
    }

    fn full_path(tmp: &TempDirGuard, name: &str) -> String {
        format!("{}/{}", tmp.path().to_str().unwrap(), name)
    }

    #[tokio::test]
    async fn create_goes_to_immediate() {
        let tmp = TempDirGuard::new("fsrsync_classify_create");
        let app = app_for(&tmp, 1000);
        let base = tmp.path().to_str().unwrap();

        app.classify_event(base, AddWatchFlags::IN_CREATE, Some("a.txt"));
        let pending = app.shared.registries.list_immediate();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path, full_path(&tmp, "a.txt"));
        assert_eq!(app.shared.registries.regular_len(), 0);
    }

    #[tokio::test]
    async fn open_directory_is_not_tracked() {
        let tmp = TempDirGuard::new("fsrsync_classify_dir");
        let app = app_for(&tmp, 1000);
        let base = tmp.path().to_str().unwrap();

        app.classify_event(
            base,
            AddWatchFlags::IN_OPEN | AddWatchFlags::IN_ISDIR,
            None,
        );
        assert!(app.shared.registries.list_open().is_empty());
    }

    #[tokio::test]
    async fn create_and_open_in_one_event_lands_in_immediate() {
        let tmp = TempDirGuard::new("fsrsync_classify_create_open");
        let app = app_for(&tmp, 1000);
        let base = tmp.path().to_str().unwrap();
        // Keep the file really open so the post-classify probe does not
        // evict the open record.
        let file_path = tmp.path().join("burst.txt");
        let _held = fs::File::create(&file_path).unwrap();

        app.classify_event(
            base,
            AddWatchFlags::IN_CREATE | AddWatchFlags::IN_OPEN,
            Some("burst.txt"),
        );
        assert_eq!(app.shared.registries.immediate_len(), 1);
        assert!(app
            .shared
            .registries
            .open_contains(file_path.to_str().unwrap()));
    }

    #[tokio::test]
    async fn close_write_moves_open_file_to_immediate() {
        let tmp = TempDirGuard::new("fsrsync_classify_close");
        let app = app_for(&tmp, 1000);
        let base = tmp.path().to_str().unwrap();
        let file_path = tmp.path().join("w.txt");
        let held = fs::File::create(&file_path).unwrap();

        app.classify_event(base, AddWatchFlags::IN_OPEN, Some("w.txt"));
        assert!(app
            .shared
            .registries
            .open_contains(file_path.to_str().unwrap()));

        drop(held);
        app.classify_event(base, AddWatchFlags::IN_CLOSE_WRITE, Some("w.txt"));
        assert!(!app
            .shared
            .registries
            .open_contains(file_path.to_str().unwrap()));
        assert_eq!(app.shared.registries.immediate_len(), 1);
        // Close of a tracked-open file is immediate, not regular.
        assert_eq!(app.shared.registries.regular_len(), 0);
    }

    #[tokio::test]
    async fn close_nowrite_without_open_is_regular() {
        let tmp = TempDirGuard::new("fsrsync_classify_nowrite");
        let app = app_for(&tmp, 1000);
        let base = tmp.path().to_str().unwrap();

        app.classify_event(base, AddWatchFlags::IN_CLOSE_NOWRITE, Some("r.txt"));
        assert_eq!(app.shared.registries.regular_len(), 1);
        assert_eq!(app.shared.registries.immediate_len(), 0);
    }

    #[tokio::test]
    async fn modify_family_goes_to_regular() {
        let tmp = TempDirGuard::new("fsrsync_classify_modify");
        let app = app_for(&tmp, 1000);
        let base = tmp.path().to_str().unwrap();

        app.classify_event(base, AddWatchFlags::IN_MODIFY, Some("m.txt"));
        app.classify_event(base, AddWatchFlags::IN_ATTRIB, Some("m.txt"));
        app.classify_event(base, AddWatchFlags::IN_DELETE, Some("gone.txt"));
        assert_eq!(app.shared.registries.regular_len(), 2);
    }

    #[tokio::test]
    async fn missing_source_path_skips_destination() {
        let config: Config = serde_json::from_value(json!({
            "hostname": "test-host",
            "destinations": [{
                "path": "/fsrsync/not/a/real/dir",
                "destination": "root@backup01",
                "destination_path": "/srv/backup",
                "events": ["IN_CLOSE_WRITE"],
                "event_queue_limit": 4
            }]
        }))
        .unwrap();
        let app = SyncApplication::setup(&config, AsyncLogger::disabled(), false).unwrap();
        assert!(app.shared.destinations.is_empty());
    }

    #[tokio::test]
    async fn duplicate_destinations_are_rejected() {
        let tmp = TempDirGuard::new("fsrsync_dup_dest");
        let dest = json!({
            "path": tmp.path().to_str().unwrap(),
            "destination": "root@backup01",
            "destination_path": "/srv/backup",
            "events": ["IN_CLOSE_WRITE"],
            "event_queue_limit": 4
        });
        let config: Config = serde_json::from_value(json!({
            "hostname": "test-host",
            "destinations": [dest.clone(), dest]
        }))
        .unwrap();
        let app = SyncApplication::setup(&config, AsyncLogger::disabled(), false).unwrap();
        assert_eq!(app.shared.destinations.len(), 1);
    }

    #[tokio::test]
    async fn invalid_destination_form_is_fatal() {
        let tmp = TempDirGuard::new("fsrsync_bad_form");
        let config: Config = serde_json::from_value(json!({
            "hostname": "test-host",
            "destinations": [{
                "path": tmp.path().to_str().unwrap(),
                "destination": "no-user-part",
                "destination_path": "/srv/backup",
                "events": ["IN_CLOSE_WRITE"],
                "event_queue_limit": 4
            }]
        }))
        .unwrap();
        let err = SyncApplication::setup(&config, AsyncLogger::disabled(), false)
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 1);
    }
}
