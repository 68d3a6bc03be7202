// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Per-Service Serialization
//!
//! Operations on one service UUID run one at a time; different UUIDs never
//! contend. Background installs do not hold the lock but are tracked in a
//! separate in-flight set so conflicting requests can be refused, and so a
//! delete can tell a running install to stop early.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::domain::service::ServiceId;

#[derive(Default)]
pub struct TenantLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    installs: Arc<DashMap<String, CancellationToken>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn acquire(&self, id: &ServiceId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of `id` if nobody holds or waits on it.
    pub fn prune(&self, id: &ServiceId) {
        self.locks
            .remove_if(id.as_str(), |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn is_installing(&self, id: &ServiceId) -> bool {
        self.installs.contains_key(id.as_str())
    }

    /// Mark `id` as installing. Returns `None` if an install is already in flight.
    pub fn begin_install(&self, id: &ServiceId) -> Option<InstallGuard> {
        let token = CancellationToken::new();
        match self.installs.entry(id.as_str().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Some(InstallGuard {
                    installs: self.installs.clone(),
                    key: id.as_str().to_string(),
                    token,
                })
            }
        }
    }

    /// Signal a running install of `id` to stop at its next checkpoint.
    pub fn abort_install(&self, id: &ServiceId) -> bool {
        match self.installs.get(id.as_str()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.len()
    }
}

/// Membership in the in-flight install set; released on drop.
pub struct InstallGuard {
    installs: Arc<DashMap<String, CancellationToken>>,
    key: String,
    token: CancellationToken,
}

impl InstallGuard {
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for InstallGuard {
    fn drop(&mut self) {
        self.installs.remove(&self.key);
    }
}
