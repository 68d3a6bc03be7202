// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Server Lifecycle Application Service
//!
//! Orchestrates create/update/power/reinstall/delete for services on this
//! node, coordinating:
//! - Container runtime: image pull, container create and power actions
//! - Script templates: `start.sh` regeneration
//! - Installer: detached background installs
//! - Status reporter: optimistic status pushes to the control plane
//!
//! State per service: `installing → offline → starting → running →
//! stopping → offline`, with `installation_failed` as the error state.
//! Transitions driven by the engine (`running`, `offline`) come from the
//! event monitor; this service only pushes the intended transient state.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::installer::Installer;
use crate::application::status_reporter::StatusReporter;
use crate::application::tenant_locks::TenantLocks;
use crate::domain::install::{InstallState, START_SCRIPT};
use crate::domain::node_config::NodeToken;
use crate::domain::runtime::{
    BindMount, ContainerRuntime, ContainerSpec, ContainerState, LogOptions, LogStream,
    ResourceSnapshot, RuntimeError,
};
use crate::domain::service::{
    CreateServiceSpec, Environment, InstallPlan, PowerAction, ScriptRefresh, ServiceId,
    ServiceStatus, UpdateServiceSpec,
};
use crate::infrastructure::script_template_engine::{ScriptTemplateEngine, StartScriptContext};
use crate::infrastructure::storage::{StorageError, TenantStorage};

/// Lines of history replayed when a console attaches.
pub const CONSOLE_TAIL_LINES: usize = 500;

const DOCKER_HOST_ALIAS: &str = "host.docker.internal";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Server not found: {0}")]
    NotFound(String),

    #[error("Server {0} is currently installing")]
    Installing(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Runtime error: {0}")]
    Runtime(RuntimeError),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<RuntimeError> for LifecycleError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NotFound(name) => LifecycleError::NotFound(name),
            RuntimeError::Conflict(msg) => LifecycleError::Conflict(msg),
            other => LifecycleError::Runtime(other),
        }
    }
}

impl From<StorageError> for LifecycleError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => LifecycleError::NotFound(id),
            other => LifecycleError::Storage(other),
        }
    }
}

// ============================================================================
// Settings and views
// ============================================================================

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Control plane URL as seen from the host.
    pub core_url: String,
    pub node_token: NodeToken,
    pub container_data_path: String,
    pub default_install_image: String,
    pub stop_grace: Duration,
    pub stats_timeout: Duration,
    pub reinstall_preserve: Vec<String>,
    pub owner_uid: u32,
    pub owner_gid: u32,
}

/// Pollable view of one service on this node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerStatusReport {
    pub uuid: String,
    /// Engine status (`running`, `exited`, ...) or `missing`.
    pub container: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    pub install: InstallState,
    pub installing: bool,
    pub disk_bytes: u64,
}

/// Rewrite a loopback control plane URL so containers reach the host.
pub fn container_core_url(core_url: &str) -> String {
    match url::Url::parse(core_url) {
        Ok(mut url) => {
            if matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"))
                && url.set_host(Some(DOCKER_HOST_ALIAS)).is_ok()
            {
                url.as_str().trim_end_matches('/').to_string()
            } else {
                core_url.to_string()
            }
        }
        Err(_) => core_url.to_string(),
    }
}

// ============================================================================
// Service
// ============================================================================

pub struct ServerLifecycleService {
    runtime: Arc<dyn ContainerRuntime>,
    storage: Arc<TenantStorage>,
    installer: Arc<Installer>,
    reporter: StatusReporter,
    templates: ScriptTemplateEngine,
    locks: Arc<TenantLocks>,
    settings: LifecycleSettings,
}

impl ServerLifecycleService {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        storage: Arc<TenantStorage>,
        installer: Arc<Installer>,
        reporter: StatusReporter,
        templates: ScriptTemplateEngine,
        locks: Arc<TenantLocks>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            runtime,
            storage,
            installer,
            reporter,
            templates,
            locks,
            settings,
        }
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<TenantStorage> {
        &self.storage
    }

    fn ensure_not_installing(&self, id: &ServiceId) -> Result<(), LifecycleError> {
        if self.locks.is_installing(id) {
            return Err(LifecycleError::Installing(id.to_string()));
        }
        Ok(())
    }

    fn container_env(&self, spec: &CreateServiceSpec) -> Vec<String> {
        let mut reserved = Environment::new();
        reserved.insert("STARTUP", format!("bash {}", START_SCRIPT));
        reserved.insert("SERVER_MEMORY", spec.limits.memory_mb.to_string());
        reserved.insert("SERVER_PORT", spec.port.to_string());
        reserved.insert("SERVER_UUID", spec.id.as_str());
        reserved.insert("CORE_URL", container_core_url(&self.settings.core_url));
        reserved.insert("NODE_TOKEN", self.settings.node_token.expose());
        spec.environment.merged_with(&reserved).to_env_pairs()
    }

    fn container_spec(&self, spec: &CreateServiceSpec) -> ContainerSpec {
        ContainerSpec {
            name: spec.id.as_str().to_string(),
            image: spec.image.clone(),
            env: self.container_env(spec),
            cmd: None,
            working_dir: None,
            tty: true,
            open_stdin: true,
            mounts: vec![BindMount {
                source: self.storage.tenant_dir(&spec.id),
                target: self.settings.container_data_path.clone(),
            }],
            port: Some(spec.port),
            limits: Some(spec.limits),
            auto_remove: false,
            extra_hosts: vec![format!("{}:host-gateway", DOCKER_HOST_ALIAS)],
        }
    }

    async fn write_start_script(
        &self,
        id: &ServiceId,
        startup_command: &str,
        environment: &Environment,
        port: u16,
        memory_mb: u64,
    ) -> Result<(), LifecycleError> {
        let ctx = StartScriptContext {
            startup_command,
            variables: environment,
            port,
            memory_mb,
        };
        let script = self.templates.render_start_script(&ctx);
        self.storage.write_script(id, START_SCRIPT, &script).await?;
        debug!(service = %id, "Rendered start script");
        Ok(())
    }

    fn spawn_install(&self, id: &ServiceId, plan: InstallPlan) -> Result<(), LifecycleError> {
        let guard = self
            .locks
            .begin_install(id)
            .ok_or_else(|| LifecycleError::Installing(id.to_string()))?;
        let installer = self.installer.clone();
        let id = id.clone();
        tokio::spawn(async move {
            installer.run(id, plan, guard).await;
        });
        Ok(())
    }

    /// Provision a new service. Returns the engine container id.
    pub async fn create(&self, spec: CreateServiceSpec) -> Result<String, LifecycleError> {
        let id = spec.id.clone();
        self.ensure_not_installing(&id)?;
        let _lock = self.locks.acquire(&id).await;
        self.ensure_not_installing(&id)?;

        // Leave an existing tenant's files untouched
        if self.runtime.inspect_state(id.as_str()).await?.is_some() {
            return Err(LifecycleError::Conflict(format!("Server {} already exists", id)));
        }

        info!(service = %id, image = %spec.image, "Creating server");
        self.reporter.push_status(&id, ServiceStatus::Installing);

        self.runtime.pull_image(&spec.image).await?;

        self.storage.ensure_tenant_dir(&id).await?;
        if let Err(e) = self
            .storage
            .set_owner(&id, self.settings.owner_uid, self.settings.owner_gid)
            .await
        {
            warn!(service = %id, error = %e, "Failed to set data directory ownership");
        }
        self.write_start_script(
            &id,
            &spec.startup_command,
            &spec.environment,
            spec.port,
            spec.limits.memory_mb,
        )
        .await?;

        let container_id = self.runtime.create_container(&self.container_spec(&spec)).await?;

        match spec.install {
            Some(plan) => {
                info!(service = %id, image = %plan.image, "Scheduling install");
                self.spawn_install(&id, plan)?;
            }
            None => {
                self.runtime.start_container(id.as_str()).await?;
                info!(service = %id, "Server started without install");
            }
        }

        Ok(container_id)
    }

    /// Apply live limits and regenerate `start.sh`. The image is not swapped.
    pub async fn update(&self, id: &ServiceId, spec: UpdateServiceSpec) -> Result<(), LifecycleError> {
        let _lock = self.locks.acquire(id).await;

        if let Err(e) = self.runtime.update_resources(id.as_str(), &spec.limits).await {
            warn!(service = %id, error = %e, "Live resource update failed");
        }

        if let Some(image) = spec.image.as_deref().filter(|i| !i.is_empty()) {
            debug!(service = %id, image = %image, "Image change applies on next reinstall");
        }

        if let Some(command) = spec.startup_command.as_deref().filter(|c| !c.trim().is_empty()) {
            self.write_start_script(
                id,
                command,
                &spec.environment,
                spec.port,
                spec.limits.memory_mb,
            )
            .await?;
        }

        info!(service = %id, "Server updated");
        Ok(())
    }

    pub async fn power(
        &self,
        id: &ServiceId,
        action: PowerAction,
        refresh: Option<ScriptRefresh>,
    ) -> Result<(), LifecycleError> {
        if matches!(action, PowerAction::Start | PowerAction::Restart) {
            self.ensure_not_installing(id)?;
        }
        let _lock = self.locks.acquire(id).await;

        if let Some(refresh) = refresh.filter(|r| !r.startup_command.trim().is_empty()) {
            self.write_start_script(
                id,
                &refresh.startup_command,
                &refresh.environment,
                refresh.port,
                refresh.memory_mb,
            )
            .await?;
        }

        self.reporter.push_status(id, action.intended_status());
        info!(service = %id, action = action.as_str(), "Power action");

        let grace = self.settings.stop_grace;
        match action {
            PowerAction::Start => self.runtime.start_container(id.as_str()).await?,
            PowerAction::Stop => self.runtime.stop_container(id.as_str(), grace).await?,
            PowerAction::Restart => self.runtime.restart_container(id.as_str(), grace).await?,
            PowerAction::Kill => self.runtime.kill_container(id.as_str()).await?,
        }
        Ok(())
    }

    /// Stop, wipe everything outside the preserve list, then install again.
    pub async fn reinstall(&self, id: &ServiceId, plan: InstallPlan) -> Result<(), LifecycleError> {
        self.ensure_not_installing(id)?;
        let _lock = self.locks.acquire(id).await;
        self.ensure_not_installing(id)?;

        match self
            .runtime
            .stop_container(id.as_str(), self.settings.stop_grace)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(service = %id, error = %e, "Failed to stop server before reinstall"),
        }

        let removed = self
            .storage
            .wipe_except(id, &self.settings.reinstall_preserve)
            .await?;
        info!(service = %id, removed, "Wiped data directory for reinstall");

        self.reporter.push_status(id, ServiceStatus::Installing);
        self.spawn_install(id, plan)
    }

    /// Remove container and data. Best effort; always succeeds.
    pub async fn delete(&self, id: &ServiceId) -> Result<(), LifecycleError> {
        if self.locks.abort_install(id) {
            info!(service = %id, "Aborting in-flight install for delete");
        }

        {
            let _lock = self.locks.acquire(id).await;

            for name in [id.as_str().to_string(), id.installer_container_name()] {
                match self.runtime.remove_container(&name, true).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => debug!(container = %name, "Container already gone"),
                    Err(e) => warn!(container = %name, error = %e, "Failed to remove container"),
                }
            }

            if let Err(e) = self.storage.remove_tenant(id).await {
                warn!(service = %id, error = %e, "Failed to remove data directory");
            }
        }

        self.locks.prune(id);
        info!(service = %id, "Server deleted");
        Ok(())
    }

    pub async fn send_command(&self, id: &ServiceId, command: &str) -> Result<(), LifecycleError> {
        if command.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "Command must not be empty".to_string(),
            ));
        }
        self.runtime.send_stdin(id.as_str(), command).await?;
        debug!(service = %id, "Command sent");
        Ok(())
    }

    /// Single stats sample; a stalled engine yields a zeroed snapshot.
    pub async fn stats(&self, id: &ServiceId) -> Result<ResourceSnapshot, LifecycleError> {
        match tokio::time::timeout(self.settings.stats_timeout, self.runtime.stats(id.as_str())).await {
            Ok(Ok(sample)) => Ok(ResourceSnapshot::from_sample(&sample)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(service = %id, timeout = ?self.settings.stats_timeout, "Stats timed out");
                Ok(ResourceSnapshot::default())
            }
        }
    }

    /// Followed log stream with recent history, for the console socket.
    pub async fn console(&self, id: &ServiceId) -> Result<LogStream, LifecycleError> {
        if self.runtime.inspect_state(id.as_str()).await?.is_none() {
            return Err(LifecycleError::NotFound(id.to_string()));
        }
        Ok(self.runtime.logs(
            id.as_str(),
            LogOptions {
                follow: true,
                timestamps: true,
                tail: Some(CONSOLE_TAIL_LINES),
            },
        ))
    }

    pub async fn server_status(&self, id: &ServiceId) -> Result<ServerStatusReport, LifecycleError> {
        let state: Option<ContainerState> = self.runtime.inspect_state(id.as_str()).await?;
        let has_data = self.storage.exists(id);
        if state.is_none() && !has_data {
            return Err(LifecycleError::NotFound(id.to_string()));
        }

        let (container, running, exit_code) = match state {
            Some(s) => (s.status, s.running, s.exit_code),
            None => ("missing".to_string(), false, None),
        };
        Ok(ServerStatusReport {
            uuid: id.to_string(),
            container,
            running,
            exit_code,
            install: self.storage.install_state(id).await,
            installing: self.locks.is_installing(id),
            disk_bytes: self.storage.usage_bytes(id).await,
        })
    }
}
