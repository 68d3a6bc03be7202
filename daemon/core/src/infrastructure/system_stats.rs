// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Host resource sampling for the heartbeat.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

use crate::domain::control_plane::NodeStats;

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Keeps one `System` alive so CPU usage is a delta between consecutive samples.
pub struct SystemSampler {
    sys: Mutex<System>,
    data_root: PathBuf,
}

impl SystemSampler {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            sys: Mutex::new(sys),
            data_root: data_root.into(),
        }
    }

    pub fn sample(&self) -> NodeStats {
        let mut sys = self.sys.lock();
        sys.refresh_cpu_all();
        sys.refresh_memory();

        NodeStats {
            cpu: f64::from(sys.global_cpu_usage()),
            ram: sys.used_memory() as f64 / BYTES_PER_MB,
            ram_total: sys.total_memory() as f64 / BYTES_PER_MB,
            disk_free: disk_free(&self.data_root),
        }
    }
}

/// Free space of the mount holding `path` (longest matching mount point).
fn disk_free(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}
