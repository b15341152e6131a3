//! The per-path record tracked by the sync registries.

use serde::Serialize;
use std::hash::{Hash, Hasher};
use std::time::Instant;

/// One tracked file. Identity is the absolute path: equality and hashing
/// ignore every other field, so a registry holds at most one record per
/// path no matter how its bookkeeping fields differ.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    /// Suffix after the final `.`, if any.
    pub extension: Option<String>,
    /// Monotonic admission time, used for age and `up_to_time` comparisons.
    pub first_seen: Instant,
    pub synced_time: Option<Instant>,
    pub synced_successfully: bool,
}

impl FileRecord {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .filter(|ext| !ext.contains('/'));
        Self {
            path,
            extension,
            first_seen: Instant::now(),
            synced_time: None,
            synced_successfully: false,
        }
    }

    /// Seconds since the record was admitted.
    pub fn age_seconds(&self) -> u64 {
        self.first_seen.elapsed().as_secs()
    }

    /// Snapshot used by the control-plane endpoints.
    pub fn view(&self) -> FileRecordView {
        FileRecordView {
            path: self.path.clone(),
            extension: self.extension.clone(),
            age_seconds: self.age_seconds(),
            synced_successfully: self.synced_successfully,
        }
    }
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for FileRecord {}

impl Hash for FileRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Wire shape of a record on the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecordView {
    pub path: String,
    pub extension: Option<String>,
    pub age_seconds: u64,
    pub synced_successfully: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(record: &FileRecord) -> u64 {
        let mut h = DefaultHasher::new();
        record.hash(&mut h);
        h.finish()
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(
            FileRecord::new("/src/archive.tar.gz").extension.as_deref(),
            Some("gz")
        );
        assert_eq!(FileRecord::new("/src/Makefile").extension, None);
        // A dot in a parent directory is not an extension.
        assert_eq!(FileRecord::new("/src/v1.2/readme").extension, None);
    }

    #[test]
    fn identity_is_path_only() {
        let a = FileRecord::new("/src/a");
        let mut b = FileRecord::new("/src/a");
        b.synced_successfully = true;
        b.synced_time = Some(Instant::now());
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, FileRecord::new("/src/other"));
    }
}
