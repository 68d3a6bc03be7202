// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Shared fixtures: in-memory container runtime and control plane fakes.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use atlas_daemon_core::application::file_manager::FileManager;
use atlas_daemon_core::application::installer::{Installer, InstallerSettings};
use atlas_daemon_core::application::lifecycle::{LifecycleSettings, ServerLifecycleService};
use atlas_daemon_core::application::status_reporter::StatusReporter;
use atlas_daemon_core::application::tenant_locks::TenantLocks;
use atlas_daemon_core::domain::control_plane::{
    ControlPlane, ControlPlaneError, HeartbeatReport, SftpValidation, StatusUpdate,
};
use atlas_daemon_core::domain::node_config::NodeToken;
use atlas_daemon_core::domain::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, EventStream, LogOptions, LogStream,
    RuntimeError, RuntimeEvent, StatsSample, WaitCondition,
};
use atlas_daemon_core::domain::service::{ResourceLimits, ServiceId, ServiceStatus};
use atlas_daemon_core::infrastructure::script_template_engine::ScriptTemplateEngine;
use atlas_daemon_core::infrastructure::storage::TenantStorage;
use atlas_daemon_core::presentation::AppState;

pub const UUID: &str = "550e8400-e29b-41d4-a716-446655440000";
pub const TOKEN: &str = "test-node-token";

pub fn service_id() -> ServiceId {
    ServiceId::parse(UUID).unwrap()
}

// ============================================================================
// Fake runtime
// ============================================================================

#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<String>>,
    containers: Mutex<HashMap<String, ContainerState>>,
    specs: Mutex<HashMap<String, ContainerSpec>>,
    wait_code: Mutex<i64>,
    log_lines: Mutex<Vec<String>>,
    stats_delay: Mutex<Option<Duration>>,
    stats_sample: Mutex<StatsSample>,
    wait_gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
    event_streams: Mutex<VecDeque<Vec<Result<RuntimeEvent, RuntimeError>>>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_wait_code(&self, code: i64) {
        *self.wait_code.lock() = code;
    }

    pub fn set_log_lines(&self, lines: &[&str]) {
        *self.log_lines.lock() = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn set_stats(&self, sample: StatsSample) {
        *self.stats_sample.lock() = sample;
    }

    pub fn set_stats_delay(&self, delay: Duration) {
        *self.stats_delay.lock() = Some(delay);
    }

    /// Block `wait_container` until [`FakeRuntime::release_wait`] is called.
    pub fn hold_wait(&self) {
        *self.wait_gate.lock() = Some(Arc::new(tokio::sync::Notify::new()));
    }

    pub fn release_wait(&self) {
        if let Some(gate) = self.wait_gate.lock().as_ref() {
            gate.notify_one();
        }
    }

    /// Queue the items of the next event subscription. Each subscription
    /// stays open after its items; with nothing queued it never yields.
    pub fn push_event_stream(&self, items: Vec<Result<RuntimeEvent, RuntimeError>>) {
        self.event_streams.lock().push_back(items);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls.lock().iter().any(|c| c.starts_with(prefix))
    }

    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.specs.lock().get(name).cloned()
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.containers.lock().contains_key(name)
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn with_container<F>(&self, name: &str, f: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(&mut ContainerState),
    {
        match self.containers.lock().get_mut(name) {
            Some(state) => {
                f(state);
                Ok(())
            }
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(format!("pull:{}", image));
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(format!("create:{}", spec.name));
        let mut containers = self.containers.lock();
        if containers.contains_key(&spec.name) {
            return Err(RuntimeError::Conflict(spec.name.clone()));
        }
        containers.insert(
            spec.name.clone(),
            ContainerState {
                status: "created".to_string(),
                running: false,
                exit_code: None,
            },
        );
        self.specs.lock().insert(spec.name.clone(), spec.clone());
        Ok(format!("id-{}", spec.name))
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(format!("start:{}", name));
        self.with_container(name, |s| {
            s.status = "running".to_string();
            s.running = true;
        })
    }

    async fn stop_container(&self, name: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.record(format!("stop:{}", name));
        self.with_container(name, |s| {
            s.status = "exited".to_string();
            s.running = false;
        })
    }

    async fn restart_container(&self, name: &str, _grace: Duration) -> Result<(), RuntimeError> {
        self.record(format!("restart:{}", name));
        self.with_container(name, |s| {
            s.status = "running".to_string();
            s.running = true;
        })
    }

    async fn kill_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(format!("kill:{}", name));
        self.with_container(name, |s| {
            s.status = "exited".to_string();
            s.running = false;
            s.exit_code = Some(137);
        })
    }

    async fn remove_container(&self, name: &str, _remove_volumes: bool) -> Result<(), RuntimeError> {
        self.record(format!("remove:{}", name));
        match self.containers.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn update_resources(&self, name: &str, limits: &ResourceLimits) -> Result<(), RuntimeError> {
        self.record(format!("update:{}:{}", name, limits.memory_mb));
        self.with_container(name, |_| {})
    }

    async fn inspect_state(&self, name: &str) -> Result<Option<ContainerState>, RuntimeError> {
        Ok(self.containers.lock().get(name).cloned())
    }

    async fn stats(&self, name: &str) -> Result<StatsSample, RuntimeError> {
        let delay = *self.stats_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.has_container(name) {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        Ok(*self.stats_sample.lock())
    }

    async fn wait_container(&self, name: &str, condition: WaitCondition) -> Result<i64, RuntimeError> {
        self.record(format!("wait:{}:{}", name, condition.as_str()));
        let gate = self.wait_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(*self.wait_code.lock())
    }

    async fn send_stdin(&self, name: &str, line: &str) -> Result<(), RuntimeError> {
        self.record(format!("stdin:{}:{}", name, line));
        self.with_container(name, |_| {})
    }

    fn logs(&self, _name: &str, _options: LogOptions) -> LogStream {
        let lines: Vec<Result<String, RuntimeError>> =
            self.log_lines.lock().iter().cloned().map(Ok).collect();
        futures::stream::iter(lines).boxed()
    }

    fn events(&self) -> EventStream {
        self.record("events".to_string());
        let items = self.event_streams.lock().pop_front().unwrap_or_default();
        futures::stream::iter(items)
            .chain(futures::stream::pending())
            .boxed()
    }
}

// ============================================================================
// Fake control plane
// ============================================================================

#[derive(Default)]
pub struct FakeControlPlane {
    statuses: Mutex<Vec<(String, StatusUpdate)>>,
    heartbeats: Mutex<Vec<HeartbeatReport>>,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses_for(&self, id: &str) -> Vec<StatusUpdate> {
        self.statuses
            .lock()
            .iter()
            .filter(|(uuid, _)| uuid == id)
            .map(|(_, update)| update.clone())
            .collect()
    }

    pub fn has_status(&self, id: &str, status: ServiceStatus) -> bool {
        self.statuses_for(id).iter().any(|u| u.status == status)
    }

    pub fn total_pushes(&self) -> usize {
        self.statuses.lock().len()
    }

    /// Poll until `status` was pushed for `id` or `timeout` elapses.
    pub async fn wait_for_status(&self, id: &str, status: ServiceStatus, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.has_status(id, status) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.has_status(id, status)
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn notify_status(
        &self,
        id: &ServiceId,
        update: &StatusUpdate,
    ) -> Result<(), ControlPlaneError> {
        self.statuses
            .lock()
            .push((id.as_str().to_string(), update.clone()));
        Ok(())
    }

    async fn heartbeat(&self, report: &HeartbeatReport) -> Result<(), ControlPlaneError> {
        self.heartbeats.lock().push(report.clone());
        Ok(())
    }

    async fn validate_sftp(
        &self,
        _username: &str,
        _password: &str,
    ) -> Result<SftpValidation, ControlPlaneError> {
        Ok(SftpValidation::default())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub tmp: TempDir,
    pub runtime: Arc<FakeRuntime>,
    pub control_plane: Arc<FakeControlPlane>,
    pub storage: Arc<TenantStorage>,
    pub lifecycle: Arc<ServerLifecycleService>,
    pub state: Arc<AppState>,
}

impl Harness {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        // Chown to ourselves so ownership changes succeed without root
        let meta = std::fs::metadata(tmp.path()).unwrap();
        let (uid, gid) = (meta.uid(), meta.gid());

        let runtime = FakeRuntime::new();
        let control_plane = FakeControlPlane::new();
        let storage = Arc::new(TenantStorage::new(tmp.path().join("volumes")).unwrap());
        let templates = ScriptTemplateEngine::new("/home/container");
        let reporter = StatusReporter::new(control_plane.clone());
        let locks = Arc::new(TenantLocks::new());

        let installer = Arc::new(Installer::new(
            runtime.clone(),
            storage.clone(),
            templates.clone(),
            reporter.clone(),
            InstallerSettings {
                owner_uid: uid,
                owner_gid: gid,
                mount_path: "/mnt/server".to_string(),
            },
        ));

        let lifecycle = Arc::new(ServerLifecycleService::new(
            runtime.clone(),
            storage.clone(),
            installer,
            reporter,
            templates,
            locks,
            LifecycleSettings {
                core_url: "http://localhost:8080".to_string(),
                node_token: NodeToken::new(TOKEN),
                container_data_path: "/home/container".to_string(),
                default_install_image: "ghcr.io/pterodactyl/installers:alpine".to_string(),
                stop_grace: Duration::from_secs(1),
                stats_timeout: Duration::from_millis(200),
                reinstall_preserve: vec!["start.sh".to_string(), "steamcmd".to_string()],
                owner_uid: uid,
                owner_gid: gid,
            },
        ));

        let state = Arc::new(AppState {
            lifecycle: lifecycle.clone(),
            files: Arc::new(FileManager::new(storage.sandbox().clone())),
            node_token: NodeToken::new(TOKEN),
        });

        Self {
            tmp,
            runtime,
            control_plane,
            storage,
            lifecycle,
            state,
        }
    }

    pub fn tenant_dir(&self) -> std::path::PathBuf {
        self.storage.tenant_dir(&service_id())
    }
}
