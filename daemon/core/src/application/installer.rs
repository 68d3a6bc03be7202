// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Installer Application Service
//!
//! Runs a service's install script in a one-shot container
//! named `install-<uuid>` with the data directory mounted at the install
//! path. The container is removed once its exit code has been read. The
//! outcome is persisted as a sentinel file and pushed upstream.
//!
//! Stages reported while running:
//! - `pulling_image` (10%)
//! - `preparing_volume` (25%)
//! - `running_script` (50%)

use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::application::status_reporter::StatusReporter;
use crate::application::tenant_locks::InstallGuard;
use crate::domain::control_plane::StatusUpdate;
use crate::domain::install::{InstallError, InstallStage, INSTALL_SCRIPT};
use crate::domain::runtime::{
    BindMount, ContainerRuntime, ContainerSpec, LogOptions, WaitCondition,
};
use crate::domain::service::{Environment, InstallPlan, ServiceId, ServiceStatus};
use crate::infrastructure::script_template_engine::ScriptTemplateEngine;
use crate::infrastructure::storage::TenantStorage;

/// Target for forwarded installer container output.
pub const INSTALLER_LOG_TARGET: &str = "atlas::installer";

#[derive(Debug, Clone)]
pub struct InstallerSettings {
    pub owner_uid: u32,
    pub owner_gid: u32,
    /// Where the data directory is mounted inside the installer container.
    pub mount_path: String,
}

pub struct Installer {
    runtime: Arc<dyn ContainerRuntime>,
    storage: Arc<TenantStorage>,
    templates: ScriptTemplateEngine,
    reporter: StatusReporter,
    settings: InstallerSettings,
}

/// `#!/bin/bash` scripts run under bash; anything else under POSIX sh.
pub fn select_shell(script: &str) -> &'static str {
    if script.trim_start().starts_with("#!/bin/bash") {
        "/bin/bash"
    } else {
        "/bin/sh"
    }
}

impl Installer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        storage: Arc<TenantStorage>,
        templates: ScriptTemplateEngine,
        reporter: StatusReporter,
        settings: InstallerSettings,
    ) -> Self {
        Self {
            runtime,
            storage,
            templates,
            reporter,
            settings,
        }
    }

    /// Run the install, record the sentinel and report the final status.
    ///
    /// Holds `guard` for the whole run so the service counts as installing.
    pub async fn run(&self, id: ServiceId, plan: InstallPlan, guard: InstallGuard) {
        let mut result = self.install(&id, &plan, &guard).await;
        // A delete during the script stage surfaces as a wait or exit error
        if guard.is_aborted() {
            result = Err(InstallError::Aborted);
        }

        if matches!(result, Err(InstallError::Aborted)) {
            info!(service = %id, "Install aborted, service was deleted");
            // A stage may have recreated the directory after delete removed it
            if let Err(e) = self.storage.remove_tenant(&id).await {
                warn!(service = %id, error = %e, "Failed to clean up after aborted install");
            }
            return;
        }

        match self.storage.record_install_outcome(&id, result.as_ref().map(|_| ())).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(service = %id, "Data directory removed during install, outcome not recorded");
                return;
            }
            Err(e) => error!(service = %id, error = %e, "Failed to write install sentinel"),
        }

        let status = match &result {
            Ok(()) => {
                info!(service = %id, "Install completed");
                ServiceStatus::Offline
            }
            Err(e) => {
                error!(service = %id, error = %e, "Install failed");
                ServiceStatus::InstallationFailed
            }
        };
        self.reporter
            .push_now(&id, &StatusUpdate::new(status))
            .await;
    }

    async fn stage(&self, id: &ServiceId, stage: InstallStage) {
        info!(service = %id, stage = stage.as_str(), "Install stage");
        let update = StatusUpdate::new(ServiceStatus::Installing)
            .with_stage(stage.as_str(), stage.progress());
        self.reporter.push_now(id, &update).await;
    }

    pub async fn install(
        &self,
        id: &ServiceId,
        plan: &InstallPlan,
        guard: &InstallGuard,
    ) -> Result<(), InstallError> {
        self.stage(id, InstallStage::PullingImage).await;
        self.runtime
            .pull_image(&plan.image)
            .await
            .map_err(|e| InstallError::ImagePull {
                image: plan.image.clone(),
                message: e.to_string(),
            })?;

        if guard.is_aborted() {
            return Err(InstallError::Aborted);
        }

        self.stage(id, InstallStage::PreparingVolume).await;
        let data_dir = self
            .storage
            .ensure_tenant_dir(id)
            .await
            .map_err(|e| InstallError::DataDirectory(e.to_string()))?;
        self.storage
            .set_owner(id, self.settings.owner_uid, self.settings.owner_gid)
            .await
            .map_err(|e| InstallError::Ownership {
                uid: self.settings.owner_uid,
                gid: self.settings.owner_gid,
                message: e.to_string(),
            })?;

        let script = self
            .templates
            .render_install_script(&plan.script, &plan.environment);
        self.storage
            .write_script(id, INSTALL_SCRIPT, &script)
            .await
            .map_err(|e| InstallError::DataDirectory(e.to_string()))?;

        if guard.is_aborted() {
            return Err(InstallError::Aborted);
        }

        self.stage(id, InstallStage::RunningScript).await;
        let spec = self.container_spec(id, plan, &script, data_dir);
        let result = self.run_container(id, &spec).await;

        // The exit code is read before removal, so the engine never auto-removes
        match self.runtime.remove_container(&spec.name, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(service = %id, error = %e, "Failed to remove installer container"),
        }

        match result? {
            0 => Ok(()),
            code => Err(InstallError::NonZeroExit(code)),
        }
    }

    fn container_spec(
        &self,
        id: &ServiceId,
        plan: &InstallPlan,
        script: &str,
        data_dir: PathBuf,
    ) -> ContainerSpec {
        let mut injected = Environment::new();
        injected.insert("SERVER_UUID", id.as_str());
        injected.insert("mnt_server", self.settings.mount_path.clone());
        let env = plan.environment.merged_with(&injected);

        ContainerSpec {
            name: id.installer_container_name(),
            image: plan.image.clone(),
            env: env.to_env_pairs(),
            cmd: Some(vec![
                select_shell(script).to_string(),
                "-c".to_string(),
                script.to_string(),
            ]),
            working_dir: Some(self.settings.mount_path.clone()),
            tty: false,
            open_stdin: false,
            mounts: vec![BindMount {
                source: data_dir,
                target: self.settings.mount_path.clone(),
            }],
            port: None,
            limits: None,
            auto_remove: false,
            extra_hosts: Vec::new(),
        }
    }

    /// Create, start, forward logs and return the exit code. The caller
    /// removes the container.
    async fn run_container(&self, id: &ServiceId, spec: &ContainerSpec) -> Result<i64, InstallError> {
        // Leftover from a crashed daemon would make the name conflict
        if let Err(e) = self.runtime.remove_container(&spec.name, true).await {
            if !e.is_not_found() {
                warn!(service = %id, error = %e, "Failed to clear stale installer container");
            }
        }

        self.runtime
            .create_container(spec)
            .await
            .map_err(|e| InstallError::Runtime(e.to_string()))?;

        self.runtime
            .start_container(&spec.name)
            .await
            .map_err(|e| InstallError::Runtime(e.to_string()))?;

        let mut logs = self.runtime.logs(
            &spec.name,
            LogOptions {
                follow: true,
                timestamps: false,
                tail: None,
            },
        );
        while let Some(line) = logs.next().await {
            match line {
                Ok(line) => info!(target: INSTALLER_LOG_TARGET, service = %id, "{}", line),
                Err(e) => {
                    warn!(service = %id, error = %e, "Installer log stream ended");
                    break;
                }
            }
        }

        // Returns at once for a container that already exited
        self.runtime
            .wait_container(&spec.name, WaitCondition::NotRunning)
            .await
            .map_err(|e| InstallError::Wait(e.to_string()))
    }
}
