//! Cross-host push serialization: the server-lock coordinator.
//!
//! Each entry names a remote host and records who holds the push lock on
//! it. Locks expire after `max_lock_time` so a crashed peer cannot wedge a
//! remote forever; expiry clears the lock but the entry remains.

use crate::constants::DEFAULT_MAX_LOCK_TIME;
use crate::utilities::AsyncLogger;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ServerLock {
    pub locked: bool,
    pub locked_by: String,
    pub locked_at: Option<Instant>,
    pub max_lock_time: Duration,
    pub created: DateTime<Utc>,
}

impl ServerLock {
    fn new(max_lock_time: Duration) -> Self {
        Self {
            locked: false,
            locked_by: String::new(),
            locked_at: None,
            max_lock_time,
            created: Utc::now(),
        }
    }

    fn expired(&self) -> bool {
        match self.locked_at {
            Some(at) => at.elapsed() >= self.max_lock_time,
            None => true,
        }
    }

    /// Locked right now, expiry taken into account.
    fn held(&self) -> bool {
        self.locked && !self.expired()
    }
}

/// Control-plane snapshot of one lock entry.
#[derive(Debug, Clone, Serialize)]
pub struct ServerLockView {
    pub server: String,
    pub locked: bool,
    pub locked_by: String,
    pub held_for_seconds: Option<u64>,
}

#[derive(Debug)]
pub struct ServerLockCoordinator {
    locks: Mutex<HashMap<String, ServerLock>>,
    max_lock_time: Duration,
    logger: AsyncLogger,
}

impl ServerLockCoordinator {
    pub fn new(logger: AsyncLogger) -> Self {
        Self::with_max_lock_time(DEFAULT_MAX_LOCK_TIME, logger)
    }

    pub fn with_max_lock_time(max_lock_time: Duration, logger: AsyncLogger) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            max_lock_time,
            logger,
        }
    }

    /// Whether `host` is locked, consulting expiry.
    pub fn check(&self, host: &str) -> bool {
        self.locks
            .lock()
            .unwrap()
            .get(host)
            .map(|lock| lock.held())
            .unwrap_or(false)
    }

    /// Whether `host` is locked by someone other than `me`.
    pub fn locked_by_other(&self, host: &str, me: &str) -> bool {
        self.locks
            .lock()
            .unwrap()
            .get(host)
            .map(|lock| lock.held() && lock.locked_by != me)
            .unwrap_or(false)
    }

    /// Take (or refresh) the lock on `host` for owner `by`. Refused while
    /// a different owner holds an unexpired lock.
    pub fn acquire(&self, host: &str, by: &str) -> bool {
        let mut locks = self.locks.lock().unwrap();
        let lock = locks
            .entry(host.to_string())
            .or_insert_with(|| ServerLock::new(self.max_lock_time));
        if lock.held() && lock.locked_by != by {
            self.logger.info(format!(
                "Server {} is already locked by {}",
                host, lock.locked_by
            ));
            return false;
        }
        lock.locked = true;
        lock.locked_by = by.to_string();
        lock.locked_at = Some(Instant::now());
        self.logger
            .info(format!("Lock for server {} acquired by {}", host, by));
        true
    }

    /// Release `host` if `by` owns it. Releasing an unheld lock is a
    /// successful no-op; a foreign owner is refused.
    pub fn release(&self, host: &str, by: &str) -> bool {
        let mut locks = self.locks.lock().unwrap();
        let Some(lock) = locks.get_mut(host) else {
            return true;
        };
        if !lock.held() {
            lock.locked = false;
            lock.locked_at = None;
            return true;
        }
        if lock.locked_by != by {
            self.logger.info(format!(
                "Lock for server {} has not been removed, owner is {}",
                host, lock.locked_by
            ));
            return false;
        }
        lock.locked = false;
        lock.locked_by.clear();
        lock.locked_at = None;
        self.logger
            .info(format!("Lock for server {} released by {}", host, by));
        true
    }

    /// Clear expired locks. Entries stay around; only the held state goes.
    pub fn sweep(&self) {
        let mut locks = self.locks.lock().unwrap();
        for (host, lock) in locks.iter_mut() {
            if lock.locked && lock.expired() {
                lock.locked = false;
                lock.locked_at = None;
                self.logger
                    .info(format!("Lock for server {} has expired", host));
            }
        }
    }

    pub fn snapshot(&self) -> Vec<ServerLockView> {
        self.locks
            .lock()
            .unwrap()
            .iter()
            .map(|(host, lock)| ServerLockView {
                server: host.clone(),
                locked: lock.held(),
                locked_by: lock.locked_by.clone(),
                held_for_seconds: lock
                    .locked_at
                    .filter(|_| lock.held())
                    .map(|at| at.elapsed().as_secs()),
            })
            .collect()
    }
}
