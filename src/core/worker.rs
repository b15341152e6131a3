//! The per-destination sync worker.
//!
//! One worker runs per destination per event cycle. It serializes syncs
//! through the destination's `locked_on_sync` latch, coordinates with peer
//! hosts through the server-lock pair (local registry + peer control
//! plane), ships the immediate set, ships the regular set once the queue
//! limit is reached, and queues successfully shipped records for deletion.

use crate::constants::{EXCLUDE_ALL, WAIT_1H, WAIT_30_SEC};
use crate::core::app::{PendingDelete, SharedState};
use crate::core::destination::Destination;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

/// Acquire the global server lock as a pair: on the peer's control plane
/// and in the local coordinator. Both must succeed.
async fn acquire_server_lock_pair(shared: &SharedState, dest: &Destination) -> bool {
    let Some(remote) = dest.remote_hostname.as_deref() else {
        shared.logger.error(format!(
            "Destination {} uses the global server lock but has no remote_hostname",
            dest.remote_endpoint
        ));
        return false;
    };
    let remote_ok = dest
        .web_client
        .add_to_global_server_lock(remote, &shared.hostname)
        .await;
    let local_ok = shared.coordinator.acquire(remote, &shared.hostname);
    shared.logger.debug(format!(
        "Added destination {} to global server locks. Result: RDST: {} and LDST: {}",
        remote, remote_ok, local_ok
    ));
    remote_ok && local_ok
}

/// Mirror of acquisition; failures are logged but not retried here.
async fn release_server_lock_pair(shared: &SharedState, dest: &Destination) -> bool {
    let Some(remote) = dest.remote_hostname.as_deref() else {
        return false;
    };
    let remote_ok = dest
        .web_client
        .remove_from_global_server_lock(remote, &shared.hostname)
        .await;
    let local_ok = shared.coordinator.release(remote, &shared.hostname);
    shared.logger.debug(format!(
        "Removed destination {} from global server locks. Result: RDST: {} and LDST: {}",
        remote, remote_ok, local_ok
    ));
    remote_ok && local_ok
}

/// Ship the immediate set for this destination, if any. Returns the rsync
/// result, or `None` when there was nothing to ship.
async fn immediate_phase(
    shared: &SharedState,
    dest: &Destination,
    notification: Option<bool>,
    t_start: Instant,
) -> Option<bool> {
    let pending = shared.registries.list_immediate_for_prefix(&dest.path);
    if pending.is_empty() {
        return None;
    }
    shared.logger.info(format!(
        "Immediate sync files detected for destination {}. Running rsync...",
        dest.remote_endpoint
    ));

    let include: Vec<String> = pending.iter().map(|r| r.path.clone()).collect();
    let mut exclude = dest.files_to_exclude.clone();
    exclude.push(EXCLUDE_ALL.to_string());

    let (rsync_ok, hooks_ok) = dest.rsync.run(Some(exclude), Some(include.clone())).await;
    if rsync_ok {
        shared.logger.info(format!(
            "Rsync completed successfully for destination {}",
            dest.remote_endpoint
        ));
        let mut deletes = shared.pending_deletes.lock().unwrap();
        for path in include {
            shared.registries.mark_immediate_synced(&path, t_start);
            deletes.push(PendingDelete {
                path,
                synced_at: t_start,
            });
        }
    } else {
        shared.logger.error(format!(
            "Rsync failed for destination {}, not clearing pending files...",
            dest.remote_endpoint
        ));
    }
    dest.record_statistics(
        &shared.registries,
        rsync_ok,
        notification,
        Some(hooks_ok),
        "immediate",
    );
    Some(rsync_ok)
}

/// Ship the regular set once the queue limit is reached. Open files still
/// inside their wait window are excluded; expired ones have just been
/// evicted and ship like everything else.
async fn regular_phase(
    shared: &SharedState,
    dest: &Destination,
    notification: Option<bool>,
    t_start: Instant,
) -> Option<bool> {
    let pending = shared.registries.list_regular_for_prefix(&dest.path);
    // Admission control: below the queue limit the batch does not ship.
    if pending.len() < dest.event_queue_limit {
        return None;
    }
    let still_open = shared
        .registries
        .evict_expired_open(&dest.path, dest.max_wait_locked);
    shared.logger.debug(format!(
        "Event queue limit reached for destination {}. Running rsync...",
        dest.remote_endpoint
    ));

    let include: Vec<String> = pending.iter().map(|r| r.path.clone()).collect();
    let mut exclude = dest.files_to_exclude.clone();
    exclude.extend(still_open.iter().map(|r| r.path.clone()));
    exclude.push(EXCLUDE_ALL.to_string());
    let excluded_open: Vec<String> = still_open.iter().map(|r| r.path.clone()).collect();

    let (rsync_ok, hooks_ok) = dest.rsync.run(Some(exclude), Some(include.clone())).await;
    if rsync_ok {
        shared.logger.info(format!(
            "Rsync completed successfully for destination {}",
            dest.remote_endpoint
        ));
        let mut deletes = shared.pending_deletes.lock().unwrap();
        for path in include {
            // Paths held back by the exclude list stay pending for the
            // next cycle.
            if excluded_open.contains(&path) {
                continue;
            }
            shared.registries.mark_regular_synced(&path, t_start);
            deletes.push(PendingDelete {
                path,
                synced_at: t_start,
            });
        }
    } else {
        shared.logger.error(format!(
            "Rsync failed for destination {}, not clearing pending files...",
            dest.remote_endpoint
        ));
    }
    dest.record_statistics(
        &shared.registries,
        rsync_ok,
        notification,
        Some(hooks_ok),
        "regular",
    );
    Some(rsync_ok)
}

/// One worker pass for one destination. See the module docs for the
/// sequencing; every early return leaves the registries intact for a later
/// cycle.
pub async fn manage_destination_event(shared: Arc<SharedState>, dest: Arc<Destination>) {
    if dest.locked_on_sync.load(Ordering::Acquire) {
        shared.logger.debug(format!(
            "Destination {} is locked. Sleeping 30 seconds until lock is clear...",
            dest.remote_endpoint
        ));
        tokio::time::sleep(WAIT_30_SEC).await;
        return;
    }

    // Wait out a foreign holder of this destination's remote; give up
    // after an hour and leave everything pending.
    if let Some(remote) = dest.remote_hostname.as_deref() {
        let mut waited = std::time::Duration::ZERO;
        while shared.coordinator.locked_by_other(remote, &shared.hostname) {
            if waited >= WAIT_1H {
                shared.logger.error(format!(
                    "Destination {} has been locked for too long. Skipping...",
                    dest.remote_endpoint
                ));
                return;
            }
            shared.logger.debug(format!(
                "Destination {} is locked. Waiting...",
                dest.remote_endpoint
            ));
            tokio::time::sleep(WAIT_30_SEC).await;
            waited += WAIT_30_SEC;
        }
    }

    let mut notification: Option<bool> = None;
    if dest.use_global_server_lock {
        let ok = acquire_server_lock_pair(&shared, &dest).await;
        notification = Some(ok);
        if !ok {
            shared.logger.error(format!(
                "Could not add destination {} to global server locks. Skipping sync...",
                dest.remote_endpoint
            ));
            // Label the skipped cycle by the phase that was about to run.
            let log_type = if shared
                .registries
                .list_immediate_for_prefix(&dest.path)
                .is_empty()
            {
                "regular"
            } else {
                "immediate"
            };
            dest.record_statistics(&shared.registries, false, notification, None, log_type);
            return;
        }
    }

    if dest.notify_file_locks {
        let open: Vec<String> = shared
            .registries
            .list_open_for_prefix(&dest.path)
            .into_iter()
            .map(|r| r.path)
            .collect();
        if !open.is_empty() && !dest.web_client.add_locked_files(&open).await {
            shared.logger.debug(format!(
                "Could not mirror open files to peer for {}",
                dest.remote_endpoint
            ));
        }
    }

    let dropped = shared
        .registries
        .prune_extensions(&dest.path, &dest.extensions_to_ignore);
    if dropped > 0 {
        shared.logger.debug(format!(
            "Dropped {} pending files with ignored extensions for {}",
            dropped, dest.remote_endpoint
        ));
    }

    if dest.locked_on_sync.swap(true, Ordering::AcqRel) {
        // Lost the race to another worker for the same destination.
        return;
    }
    let t_start = Instant::now();

    let immediate_ok = immediate_phase(&shared, &dest, notification, t_start).await;
    let regular_ok = regular_phase(&shared, &dest, notification, t_start).await;

    // Post-hoc sweep, per phase that actually shipped: everything under
    // the prefix that predates the sync is gone, arrivals during the sync
    // stay. A failed or skipped phase keeps its registry for retry.
    if immediate_ok == Some(true) {
        shared
            .registries
            .delete_immediate_for_prefix(&dest.path, Some(t_start));
    }
    if regular_ok == Some(true) {
        shared
            .registries
            .delete_regular_for_prefix(&dest.path, Some(t_start));
    }

    if dest.use_global_server_lock {
        release_server_lock_pair(&shared, &dest).await;
    }
    if dest.notify_file_locks {
        let open: Vec<String> = shared
            .registries
            .list_open_for_prefix(&dest.path)
            .into_iter()
            .map(|r| r.path)
            .collect();
        if !open.is_empty() {
            let _ = dest.web_client.remove_locked_files(&open).await;
        }
    }

    dest.locked_on_sync.store(false, Ordering::Release);
}
