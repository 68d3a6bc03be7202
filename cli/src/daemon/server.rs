// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Daemon process: service wiring, background tasks and the HTTP server

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use atlas_daemon_core::{
    application::{
        file_manager::FileManager,
        installer::{Installer, InstallerSettings},
        lifecycle::{LifecycleSettings, ServerLifecycleService},
        monitor::{EventMonitor, Heartbeat, MonitorHealthState},
        status_reporter::StatusReporter,
        tenant_locks::TenantLocks,
    },
    domain::{
        control_plane::ControlPlane, node_config::NodeConfigManifest, runtime::ContainerRuntime,
        sftp_auth::SftpAuthenticator,
    },
    infrastructure::{
        script_template_engine::ScriptTemplateEngine, sftp::SftpGateway,
        system_stats::SystemSampler, DockerRuntime, HttpControlPlane, TenantStorage,
    },
    presentation::{app, AppState},
};

/// How long background tasks get to finish after the HTTP server stops.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Command line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
}

pub async fn start_daemon(mut config: NodeConfigManifest, overrides: RunOverrides) -> Result<()> {
    if let Some(port) = overrides.port {
        config.spec.api.port = port;
    }
    if let Some(host) = overrides.host {
        config.spec.api.bind_addr = host;
    }

    config
        .validate()
        .context("Configuration validation failed")?;

    let spec = &config.spec;
    info!(
        node = %config.metadata.name,
        version = env!("CARGO_PKG_VERSION"),
        "Atlas daemon starting"
    );

    // Infrastructure
    let docker = DockerRuntime::new(spec.runtime.docker_socket_path.clone())
        .context("Failed to initialize Docker client")?;
    if let Err(e) = docker.ping().await {
        warn!(error = %e, "Docker engine is not responding yet; continuing");
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);

    let control_plane: Arc<dyn ControlPlane> = Arc::new(
        HttpControlPlane::new(
            spec.control_plane.url.clone(),
            spec.node_token.clone(),
            Duration::from_secs(spec.control_plane.request_timeout_secs),
        )
        .context("Failed to build control plane client")?,
    );

    let storage = Arc::new(
        TenantStorage::new(spec.storage.data_root.clone())
            .context("Failed to initialize data root")?,
    );
    info!(data_root = %storage.data_root().display(), "Storage ready");

    // Application services
    let templates = ScriptTemplateEngine::new(spec.runtime.container_data_path.clone());
    let reporter = StatusReporter::new(control_plane.clone());
    let locks = Arc::new(TenantLocks::new());

    let installer = Arc::new(Installer::new(
        runtime.clone(),
        storage.clone(),
        templates.clone(),
        reporter.clone(),
        InstallerSettings {
            owner_uid: spec.storage.owner_uid,
            owner_gid: spec.storage.owner_gid,
            mount_path: spec.runtime.install_mount_path.clone(),
        },
    ));

    let lifecycle = Arc::new(ServerLifecycleService::new(
        runtime.clone(),
        storage.clone(),
        installer,
        reporter.clone(),
        templates,
        locks,
        LifecycleSettings {
            core_url: spec.control_plane.url.clone(),
            node_token: spec.node_token.clone(),
            container_data_path: spec.runtime.container_data_path.clone(),
            default_install_image: spec.runtime.default_install_image.clone(),
            stop_grace: spec.runtime.stop_grace(),
            stats_timeout: spec.runtime.stats_timeout(),
            reinstall_preserve: spec.storage.reinstall_preserve.clone(),
            owner_uid: spec.storage.owner_uid,
            owner_gid: spec.storage.owner_gid,
        },
    ));

    let files = Arc::new(FileManager::new(storage.sandbox().clone()));

    // Background tasks
    let shutdown = CancellationToken::new();
    let health = MonitorHealthState::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let monitor = EventMonitor::new(runtime.clone(), reporter, health.clone());
    tasks.push(tokio::spawn(monitor.run(shutdown.clone())));

    let heartbeat = Heartbeat::new(
        control_plane.clone(),
        Arc::new(SystemSampler::new(storage.data_root())),
        health,
        Duration::from_secs(spec.heartbeat.interval_secs),
    );
    tasks.push(tokio::spawn(heartbeat.run(shutdown.clone())));

    if spec.sftp.enabled {
        let authenticator = Arc::new(SftpAuthenticator::standard(
            control_plane.clone(),
            storage.sandbox().clone(),
            spec.node_token.clone(),
        ));
        let gateway = SftpGateway::new(authenticator, storage.sandbox().clone());
        let bind_addr = spec.sftp.bind_addr.clone();
        let port = spec.sftp.port;
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = gateway.serve(&bind_addr, port, token).await {
                error!(error = %e, "SFTP gateway stopped");
            }
        }));
    } else {
        info!("SFTP gateway disabled");
    }

    // HTTP API
    let state = Arc::new(AppState {
        lifecycle,
        files,
        node_token: spec.node_token.clone(),
    });
    let router = app(state, &spec.api.cors_allowed_origins);

    let addr = format!("{}:{}", spec.api.bind_addr, spec.api.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP API listening on {}", addr);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("HTTP server failed");

    shutdown.cancel();
    let drain = join_tasks(tasks);
    if tokio::time::timeout(TASK_DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("Background tasks did not stop in time");
    }

    info!("Daemon shutting down");

    served
}

async fn join_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            if e.is_panic() {
                error!(error = %e, "Background task panicked");
            }
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
        _ = shutdown.cancelled() => {},
    }

    shutdown.cancel();
}
