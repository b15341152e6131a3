//! The three per-path file registries: open, immediate-sync, regular-sync.
//!
//! Each set is keyed by absolute path and guarded by its own mutex. The
//! event loop adds records, the destination workers delete them after a
//! sync, and the control plane reads snapshots. Every iteration works on a
//! snapshot; no lock is held across I/O.

use crate::fs::file::FileRecord;
use crate::fs::util::is_file_open;
use crate::utilities::AsyncLogger;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct FileRegistries {
    open: Mutex<HashMap<String, FileRecord>>,
    immediate: Mutex<HashMap<String, FileRecord>>,
    regular: Mutex<HashMap<String, FileRecord>>,
}

/// Insert keeping the existing record (and its `first_seen`) on collision.
fn dedup_insert(set: &mut HashMap<String, FileRecord>, record: FileRecord) -> bool {
    if set.contains_key(&record.path) {
        return false;
    }
    set.insert(record.path.clone(), record);
    true
}

fn delete_path(
    set: &mut HashMap<String, FileRecord>,
    path: &str,
    up_to_time: Option<Instant>,
) -> bool {
    let matches = match (set.get(path), up_to_time) {
        (Some(_), None) => true,
        (Some(record), Some(cutoff)) => record.first_seen < cutoff,
        (None, _) => false,
    };
    if matches {
        set.remove(path);
    }
    matches
}

fn delete_prefix(
    set: &mut HashMap<String, FileRecord>,
    prefix: &str,
    up_to_time: Option<Instant>,
) -> usize {
    let doomed: Vec<String> = set
        .values()
        .filter(|r| r.path.starts_with(prefix))
        .filter(|r| match up_to_time {
            None => true,
            Some(cutoff) => r.first_seen < cutoff,
        })
        .map(|r| r.path.clone())
        .collect();
    for path in &doomed {
        set.remove(path);
    }
    doomed.len()
}

fn list_prefix(set: &HashMap<String, FileRecord>, prefix: &str) -> Vec<FileRecord> {
    set.values()
        .filter(|r| r.path.starts_with(prefix))
        .cloned()
        .collect()
}

impl FileRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    // --- open set -------------------------------------------------------

    /// Returns false (and keeps the existing record) if the path is
    /// already tracked as open.
    pub fn add_open(&self, path: &str) -> bool {
        dedup_insert(&mut self.open.lock().unwrap(), FileRecord::new(path))
    }

    pub fn remove_open(&self, path: &str) -> bool {
        self.open.lock().unwrap().remove(path).is_some()
    }

    pub fn clear_open(&self) {
        self.open.lock().unwrap().clear();
    }

    pub fn open_contains(&self, path: &str) -> bool {
        self.open.lock().unwrap().contains_key(path)
    }

    pub fn list_open(&self) -> Vec<FileRecord> {
        self.open.lock().unwrap().values().cloned().collect()
    }

    pub fn list_open_for_prefix(&self, prefix: &str) -> Vec<FileRecord> {
        list_prefix(&self.open.lock().unwrap(), prefix)
    }

    /// Drop open records under `prefix` that have been open longer than
    /// `max_wait`; return the remainder, the definitive exclude candidates
    /// for a regular sync.
    pub fn evict_expired_open(&self, prefix: &str, max_wait: Duration) -> Vec<FileRecord> {
        let mut open = self.open.lock().unwrap();
        let expired: Vec<String> = open
            .values()
            .filter(|r| r.path.starts_with(prefix) && r.first_seen.elapsed() > max_wait)
            .map(|r| r.path.clone())
            .collect();
        for path in &expired {
            open.remove(path);
        }
        open.values()
            .filter(|r| r.path.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Verify against the OS that `path` is really open; records for files
    /// no longer held by any process are quietly dropped. Returns whether
    /// the file is still open.
    pub fn probe_open(&self, path: &str) -> bool {
        if !self.open_contains(path) {
            return false;
        }
        if is_file_open(path) {
            return true;
        }
        self.remove_open(path);
        false
    }

    /// Probe the whole open set, dropping records for closed files.
    pub fn sweep_closed(&self, logger: &AsyncLogger) {
        let snapshot = self.list_open();
        for record in snapshot {
            if !is_file_open(&record.path) {
                if self.remove_open(&record.path) {
                    logger.debug(format!(
                        "File {} removed from locked files, it is no longer open",
                        record.path
                    ));
                }
            }
        }
    }

    // --- immediate set --------------------------------------------------

    pub fn add_immediate(&self, path: &str) -> bool {
        dedup_insert(&mut self.immediate.lock().unwrap(), FileRecord::new(path))
    }

    pub fn delete_immediate(&self, path: &str, up_to_time: Option<Instant>) -> bool {
        delete_path(&mut self.immediate.lock().unwrap(), path, up_to_time)
    }

    pub fn delete_immediate_for_prefix(&self, prefix: &str, up_to_time: Option<Instant>) -> usize {
        delete_prefix(&mut self.immediate.lock().unwrap(), prefix, up_to_time)
    }

    pub fn list_immediate(&self) -> Vec<FileRecord> {
        self.immediate.lock().unwrap().values().cloned().collect()
    }

    pub fn list_immediate_for_prefix(&self, prefix: &str) -> Vec<FileRecord> {
        list_prefix(&self.immediate.lock().unwrap(), prefix)
    }

    pub fn immediate_len(&self) -> usize {
        self.immediate.lock().unwrap().len()
    }

    pub fn mark_immediate_synced(&self, path: &str, synced_time: Instant) {
        if let Some(record) = self.immediate.lock().unwrap().get_mut(path) {
            record.synced_successfully = true;
            record.synced_time = Some(synced_time);
        }
    }

    // --- regular set ----------------------------------------------------

    pub fn add_regular(&self, path: &str) -> bool {
        dedup_insert(&mut self.regular.lock().unwrap(), FileRecord::new(path))
    }

    pub fn delete_regular(&self, path: &str, up_to_time: Option<Instant>) -> bool {
        delete_path(&mut self.regular.lock().unwrap(), path, up_to_time)
    }

    pub fn delete_regular_for_prefix(&self, prefix: &str, up_to_time: Option<Instant>) -> usize {
        delete_prefix(&mut self.regular.lock().unwrap(), prefix, up_to_time)
    }

    pub fn list_regular(&self) -> Vec<FileRecord> {
        self.regular.lock().unwrap().values().cloned().collect()
    }

    pub fn list_regular_for_prefix(&self, prefix: &str) -> Vec<FileRecord> {
        list_prefix(&self.regular.lock().unwrap(), prefix)
    }

    pub fn regular_len(&self) -> usize {
        self.regular.lock().unwrap().len()
    }

    pub fn mark_regular_synced(&self, path: &str, synced_time: Instant) {
        if let Some(record) = self.regular.lock().unwrap().get_mut(path) {
            record.synced_successfully = true;
            record.synced_time = Some(synced_time);
        }
    }

    // --- cross-set operations -------------------------------------------

    /// Drop pending entries (all three sets) under `prefix`; the admin
    /// delete endpoint.
    pub fn delete_all_for_prefix(&self, prefix: &str) {
        delete_prefix(&mut self.immediate.lock().unwrap(), prefix, None);
        delete_prefix(&mut self.regular.lock().unwrap(), prefix, None);
        delete_prefix(&mut self.open.lock().unwrap(), prefix, None);
    }

    /// Remove pending records under `prefix` whose extension is in the
    /// ignore set. Returns how many records were dropped.
    pub fn prune_extensions(&self, prefix: &str, ignored: &[String]) -> usize {
        if ignored.is_empty() {
            return 0;
        }
        let mut dropped = 0;
        for set in [&self.immediate, &self.regular] {
            let mut guard = set.lock().unwrap();
            let doomed: Vec<String> = guard
                .values()
                .filter(|r| r.path.starts_with(prefix))
                .filter(|r| {
                    r.extension
                        .as_deref()
                        .map(|ext| ignored.iter().any(|i| i == ext))
                        .unwrap_or(false)
                })
                .map(|r| r.path.clone())
                .collect();
            dropped += doomed.len();
            for path in doomed {
                guard.remove(&path);
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn re_adding_preserves_first_seen() {
        let reg = FileRegistries::new();
        assert!(reg.add_regular("/src/a"));
        let first = reg.list_regular()[0].first_seen;
        std::thread::sleep(Duration::from_millis(5));
        assert!(!reg.add_regular("/src/a"));
        assert_eq!(reg.regular_len(), 1);
        assert_eq!(reg.list_regular()[0].first_seen, first);
    }

    #[test]
    fn delete_with_cutoff_spares_later_arrivals() {
        let reg = FileRegistries::new();
        reg.add_immediate("/src/early");
        std::thread::sleep(Duration::from_millis(5));
        let cutoff = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        reg.add_immediate("/src/late");

        assert!(reg.delete_immediate("/src/early", Some(cutoff)));
        assert!(!reg.delete_immediate("/src/late", Some(cutoff)));
        let remaining = reg.list_immediate();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path, "/src/late");
    }

    #[test]
    fn prefix_deletion_with_cutoff() {
        let reg = FileRegistries::new();
        reg.add_regular("/src/a");
        reg.add_regular("/other/b");
        std::thread::sleep(Duration::from_millis(5));
        let cutoff = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        reg.add_regular("/src/during");

        assert_eq!(reg.delete_regular_for_prefix("/src/", Some(cutoff)), 1);
        let paths: Vec<String> = reg.list_regular().into_iter().map(|r| r.path).collect();
        assert!(paths.contains(&"/other/b".to_string()));
        assert!(paths.contains(&"/src/during".to_string()));
    }

    #[test]
    fn evict_expired_open_returns_remainder() {
        let reg = FileRegistries::new();
        reg.add_open("/src/old");
        std::thread::sleep(Duration::from_millis(30));
        reg.add_open("/src/fresh");
        reg.add_open("/elsewhere/ignored");

        let remaining = reg.evict_expired_open("/src/", Duration::from_millis(20));
        let paths: Vec<String> = remaining.into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/src/fresh".to_string()]);
        // The expired record is gone, the out-of-prefix one untouched.
        assert!(!reg.open_contains("/src/old"));
        assert!(reg.open_contains("/elsewhere/ignored"));
    }

    #[test]
    fn zero_max_wait_evicts_every_open_file() {
        let reg = FileRegistries::new();
        reg.add_open("/src/a");
        reg.add_open("/src/b");
        std::thread::sleep(Duration::from_millis(2));
        let remaining = reg.evict_expired_open("/src/", Duration::from_secs(0));
        assert!(remaining.is_empty());
        assert!(reg.list_open().is_empty());
    }

    #[test]
    fn probe_open_drops_closed_files() {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "fsrsync_probe_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let path_str = path.to_str().unwrap().to_string();
        let mut handle = fs::File::create(&path).unwrap();
        handle.write_all(b"x").unwrap();

        let reg = FileRegistries::new();
        reg.add_open(&path_str);
        assert!(reg.probe_open(&path_str));

        drop(handle);
        assert!(!reg.probe_open(&path_str));
        assert!(!reg.open_contains(&path_str));
        let _ = fs::remove_file(PathBuf::from(path_str));
    }

    #[test]
    fn prune_extensions_only_touches_prefix() {
        let reg = FileRegistries::new();
        reg.add_immediate("/src/keep.txt");
        reg.add_immediate("/src/drop.tmp");
        reg.add_regular("/src/drop2.tmp");
        reg.add_regular("/other/stays.tmp");

        let dropped = reg.prune_extensions("/src/", &["tmp".to_string()]);
        assert_eq!(dropped, 2);
        assert_eq!(reg.immediate_len(), 1);
        let regular: Vec<String> = reg.list_regular().into_iter().map(|r| r.path).collect();
        assert_eq!(regular, vec!["/other/stays.tmp".to_string()]);
    }

    #[test]
    fn mark_synced_sets_flags_in_place() {
        let reg = FileRegistries::new();
        reg.add_immediate("/src/a");
        let t = Instant::now();
        reg.mark_immediate_synced("/src/a", t);
        let record = &reg.list_immediate()[0];
        assert!(record.synced_successfully);
        assert_eq!(record.synced_time, Some(t));
    }
}
