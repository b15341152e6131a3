//! The full-sync scheduler: a periodic job that sweeps the lock
//! coordinator and runs a whole-tree rsync for every destination whose
//! interval elapsed (or that never had one).

use crate::constants::CHECK_THREADS_SLEEP_SECS;
use crate::core::app::SharedState;
use crate::core::destination::Destination;
use crate::core::jobs::{JobHandle, launch_periodic_job};
use crate::err::Result;
use std::sync::Arc;

async fn release_server_lock_pair(shared: &SharedState, dest: &Destination) {
    let Some(remote) = dest.remote_hostname.as_deref() else {
        return;
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
}

/// One scheduler pass over every destination.
pub async fn full_sync_pass(shared: Arc<SharedState>) -> Result<()> {
    shared.logger.debug("Checking global server locks...".to_string());
    shared.coordinator.sweep();

    shared
        .logger
        .debug("Checking locations that need full sync...".to_string());
    for dest in &shared.destinations {
        if dest.full_sync_due() {
            shared.logger.debug(format!(
                "Location {} is due for a full sync. Running full sync...",
                dest.path
            ));
            let (rsync_ok, hooks_ok) = dest
                .rsync
                .run(Some(dest.files_to_exclude.clone()), None)
                .await;
            dest.mark_full_sync_now();
            dest.record_statistics(
                &shared.registries,
                rsync_ok,
                None,
                Some(hooks_ok),
                "full",
            );
        }
        // A crashed worker must not leave the remote locked forever.
        if dest.use_global_server_lock {
            release_server_lock_pair(&shared, dest).await;
        }
    }
    Ok(())
}

/// Launch the scheduler as a periodic background job.
pub fn start_full_sync_scheduler(shared: Arc<SharedState>) -> JobHandle {
    let logger = shared.logger.clone();
    launch_periodic_job(
        "Full-sync scheduler",
        move || {
            let shared = shared.clone();
            async move { full_sync_pass(shared).await }
        },
        CHECK_THREADS_SLEEP_SECS,
        logger,
    )
}
