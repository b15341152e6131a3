//! The inotify event source.
//!
//! One kernel handle carries a watch per destination path. A dedicated
//! pump thread reads events (non-blocking handle, ~1 s idle poll), applies
//! a short coalescing window so bursts arrive together, and publishes raw
//! events into a bounded broadcast channel. Under overflow the channel
//! drops its oldest entries; the receiver sees a lag count and the
//! full-sync scheduler restores consistency eventually.

use crate::constants::{EVENT_CHANNEL_CAPACITY, EVENT_POLL_INTERVAL, EVENT_READ_DELAY};
use crate::err::Result;
use crate::fsrsync_error_with_source;
use crate::utilities::AsyncLogger;
use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use std::path::Path;
use std::thread;
use tokio::sync::broadcast;

/// A kernel event as read from the handle. The watch-id to base-path
/// mapping stays with the monitor; consumers resolve through it.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub wd: WatchDescriptor,
    pub mask: AddWatchFlags,
    pub name: Option<String>,
}

/// Translate configured event names into a watch mask. Unknown names are
/// reported back so the caller can log them.
pub fn mask_from_names(names: &[String]) -> (AddWatchFlags, Vec<String>) {
    let mut mask = AddWatchFlags::empty();
    let mut unknown = Vec::new();
    for name in names {
        match name.as_str() {
            "IN_ACCESS" => mask |= AddWatchFlags::IN_ACCESS,
            "IN_CREATE" => mask |= AddWatchFlags::IN_CREATE,
            "IN_MODIFY" => mask |= AddWatchFlags::IN_MODIFY,
            "IN_DELETE" => mask |= AddWatchFlags::IN_DELETE,
            "IN_MOVED_FROM" => mask |= AddWatchFlags::IN_MOVED_FROM,
            "IN_MOVED_TO" => mask |= AddWatchFlags::IN_MOVED_TO,
            "IN_MOVE_SELF" => mask |= AddWatchFlags::IN_MOVE_SELF,
            "IN_DELETE_SELF" => mask |= AddWatchFlags::IN_DELETE_SELF,
            "IN_OPEN" => mask |= AddWatchFlags::IN_OPEN,
            "IN_ATTRIB" => mask |= AddWatchFlags::IN_ATTRIB,
            "IN_CLOSE_NOWRITE" => mask |= AddWatchFlags::IN_CLOSE_NOWRITE,
            "IN_CLOSE_WRITE" => mask |= AddWatchFlags::IN_CLOSE_WRITE,
            "IN_ISDIR" => mask |= AddWatchFlags::IN_ISDIR,
            other => unknown.push(other.to_string()),
        }
    }
    (mask, unknown)
}

pub struct FilesystemMonitor {
    inotify: Inotify,
    watches: Vec<(WatchDescriptor, String)>,
    logger: AsyncLogger,
}

impl FilesystemMonitor {
    pub fn new(logger: AsyncLogger) -> Result<Self> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK)
            .map_err(|e| fsrsync_error_with_source!(Watch, e, "Failed to open inotify handle"))?;
        Ok(Self {
            inotify,
            watches: Vec::new(),
            logger,
        })
    }

    /// Attach a watch for `path` with a mask built from `events`. Open and
    /// close-write are always monitored regardless of configuration; the
    /// open-file tracking depends on them.
    pub fn add_watch(&mut self, path: &str, events: &[String]) -> Result<()> {
        let (mut mask, unknown) = mask_from_names(events);
        for name in unknown {
            self.logger
                .warning(format!("Ignoring unknown event name '{}' for {}", name, path));
        }
        mask |= AddWatchFlags::IN_OPEN | AddWatchFlags::IN_CLOSE_WRITE;

        let wd = self
            .inotify
            .add_watch(Path::new(path), mask)
            .map_err(|e| fsrsync_error_with_source!(Watch, e, "Failed to watch path '{}'", path))?;
        self.watches.push((wd, path.to_string()));
        self.logger
            .info(format!("Monitoring {} for events: {:?}", path, events));
        Ok(())
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Consume the monitor and start the pump thread. The returned handle
    /// owns the watch-id mapping and the event receiver.
    pub fn start(self) -> MonitorHandle {
        let (tx, rx) = broadcast::channel::<RawEvent>(EVENT_CHANNEL_CAPACITY);
        let watches = self.watches.clone();
        let inotify = self.inotify;
        let logger = self.logger;

        let pump = thread::spawn(move || {
            loop {
                match inotify.read_events() {
                    Ok(first) => {
                        // Let contiguous events of the same burst land in
                        // one batch before draining once more.
                        thread::sleep(EVENT_READ_DELAY);
                        let mut batch = first;
                        if let Ok(more) = inotify.read_events() {
                            batch.extend(more);
                        }
                        for event in batch {
                            if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                                logger.warning(
                                    "Kernel event queue overflowed; some events were lost"
                                        .to_string(),
                                );
                                continue;
                            }
                            let raw = RawEvent {
                                wd: event.wd,
                                mask: event.mask,
                                name: event
                                    .name
                                    .map(|n| n.to_string_lossy().into_owned()),
                            };
                            if tx.send(raw).is_err() {
                                // No receivers left; the orchestrator is gone.
                                return;
                            }
                        }
                    }
                    Err(Errno::EAGAIN) => thread::sleep(EVENT_POLL_INTERVAL),
                    Err(e) => {
                        logger.error(format!("Filesystem watcher error: {}", e));
                        thread::sleep(EVENT_POLL_INTERVAL);
                    }
                }
            }
        });

        MonitorHandle {
            watches,
            rx,
            _pump: pump,
        }
    }
}

pub struct MonitorHandle {
    watches: Vec<(WatchDescriptor, String)>,
    pub rx: broadcast::Receiver<RawEvent>,
    _pump: thread::JoinHandle<()>,
}

impl MonitorHandle {
    /// Base path for a watch id; `None` for ids this process never
    /// registered (stale or foreign events, logged and dropped upstream).
    pub fn resolve(&self, wd: &WatchDescriptor) -> Option<&str> {
        self.watches
            .iter()
            .find(|(known, _)| known == wd)
            .map(|(_, path)| path.as_str())
    }
}
