//! Per-destination sync statistics: one entry per attempt, kept in a
//! bounded ring.

use crate::fs::FileRecord;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub path: String,
    pub regular_sync_files: Vec<String>,
    pub immediate_sync_files: Vec<String>,
    pub regular_sync_files_count: usize,
    pub immediate_sync_files_count: usize,
    pub event_queue_limit: usize,
    pub event_count: usize,
    pub last_sync: String,
    pub last_full_sync: Option<String>,
    pub result: bool,
    pub notification_result: Option<bool>,
    pub hooks_ok: Option<bool>,
    pub log_type: String,
}

impl SyncStats {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: &str,
        regular: &[FileRecord],
        immediate: &[FileRecord],
        event_queue_limit: usize,
        last_full_sync: Option<String>,
        result: bool,
        notification_result: Option<bool>,
        hooks_ok: Option<bool>,
        log_type: &str,
    ) -> Self {
        Self {
            path: path.to_string(),
            regular_sync_files: regular.iter().map(|r| r.path.clone()).collect(),
            immediate_sync_files: immediate.iter().map(|r| r.path.clone()).collect(),
            regular_sync_files_count: regular.len(),
            immediate_sync_files_count: immediate.len(),
            event_queue_limit,
            event_count: regular.len() + immediate.len(),
            last_sync: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            last_full_sync,
            result,
            notification_result,
            hooks_ok,
            log_type: log_type.to_string(),
        }
    }
}

/// Push into the ring, dropping the oldest entry once `max_stats` is
/// reached.
pub fn push_bounded(ring: &mut VecDeque<SyncStats>, entry: SyncStats, max_stats: usize) {
    while ring.len() >= max_stats.max(1) {
        ring.pop_front();
    }
    ring.push_back(entry);
}
