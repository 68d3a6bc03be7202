// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Docker Runtime Adapter
//!
//! [`ContainerRuntime`] over the Docker Engine API via `bollard`. One client
//! is created at startup and shared by every caller.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Translate engine-neutral container operations to Docker calls

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
    StatsOptions, StopContainerOptions, UpdateContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EventMessageTypeEnum, HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::domain::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, EventStream, LineBuffer, LogOptions,
    LogStream, RuntimeError, RuntimeEvent, RuntimeEventAction, StatsSample, WaitCondition,
};
use crate::domain::service::ResourceLimits;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(socket_path: Option<String>) -> Result<Self, RuntimeError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = socket_path {
            Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                RuntimeError::Engine(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Engine(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - Current user not in 'docker' group",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }
}

/// Map engine errors onto the runtime taxonomy.
fn engine_error(name: &str, error: bollard::errors::Error) -> RuntimeError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(format!("{}: {}", name, message)),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict(format!("{}: {}", name, message)),
        other => RuntimeError::Engine(format!("{}: {}", name, other)),
    }
}

/// 304 from start/stop means the container already is in the requested state.
fn not_modified_is_ok(name: &str, result: Result<(), bollard::errors::Error>) -> Result<(), RuntimeError> {
    match result {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(e) => Err(engine_error(name, e)),
    }
}

fn grace_secs(grace: Duration) -> i64 {
    grace.as_secs().min(i64::MAX as u64) as i64
}

fn build_config(spec: &ContainerSpec) -> Config<String> {
    let mounts = spec
        .mounts
        .iter()
        .map(|m| Mount {
            target: Some(m.target.clone()),
            source: Some(m.source.to_string_lossy().into_owned()),
            typ: Some(MountTypeEnum::BIND),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    if let Some(port) = spec.port {
        for proto in ["tcp", "udp"] {
            let key = format!("{}/{}", port, proto);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.to_string()),
                }]),
            );
        }
    }

    let (memory, nano_cpus) = match spec.limits {
        Some(limits) => (
            Some(limits.memory_bytes()).filter(|m| *m > 0),
            Some(limits.nano_cpus()).filter(|n| *n > 0),
        ),
        None => (None, None),
    };

    let host_config = HostConfig {
        mounts: Some(mounts),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        auto_remove: Some(spec.auto_remove),
        extra_hosts: (!spec.extra_hosts.is_empty()).then(|| spec.extra_hosts.clone()),
        memory,
        nano_cpus,
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        cmd: spec.cmd.clone(),
        working_dir: spec.working_dir.clone(),
        tty: Some(spec.tty),
        open_stdin: Some(spec.open_stdin),
        attach_stdin: Some(spec.open_stdin),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Engine(format!(
                "Cannot connect to Docker daemon: {}\n\n\
                 Docker healthcheck failed. Ensure Docker is running:\n\
                 - sudo systemctl start docker\n\n\
                 Verify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image = %image, "Pulling image");
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    debug!(
                        image = %image,
                        status = progress.status.as_deref().unwrap_or(""),
                        progress = progress.progress.as_deref().unwrap_or(""),
                        "Pull progress"
                    );
                }
                Err(e) => {
                    return Err(RuntimeError::ImagePull {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let res = self
            .docker
            .create_container(Some(options), build_config(spec))
            .await
            .map_err(|e| engine_error(&spec.name, e))?;

        for warning in &res.warnings {
            tracing::warn!(container = %spec.name, warning = %warning, "Engine warning on create");
        }
        info!(container = %spec.name, id = %res.id, "Created container");
        Ok(res.id)
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        not_modified_is_ok(
            name,
            self.docker
                .start_container(name, None::<StartContainerOptions<String>>)
                .await,
        )
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: grace_secs(grace),
        };
        not_modified_is_ok(name, self.docker.stop_container(name, Some(options)).await)
    }

    async fn restart_container(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        let options = RestartContainerOptions {
            t: grace_secs(grace) as isize,
        };
        self.docker
            .restart_container(name, Some(options))
            .await
            .map_err(|e| engine_error(name, e))
    }

    async fn kill_container(&self, name: &str) -> Result<(), RuntimeError> {
        let options = KillContainerOptions { signal: "SIGKILL" };
        self.docker
            .kill_container(name, Some(options))
            .await
            .map_err(|e| engine_error(name, e))
    }

    async fn remove_container(&self, name: &str, remove_volumes: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            v: remove_volumes,
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| engine_error(name, e))?;
        info!(container = %name, "Removed container");
        Ok(())
    }

    async fn update_resources(&self, name: &str, limits: &ResourceLimits) -> Result<(), RuntimeError> {
        let options = UpdateContainerOptions::<String> {
            memory: Some(limits.memory_bytes()).filter(|m| *m > 0),
            nano_cpus: Some(limits.nano_cpus()).filter(|n| *n > 0),
            ..Default::default()
        };
        self.docker
            .update_container(name, options)
            .await
            .map_err(|e| engine_error(name, e))
    }

    async fn inspect_state(&self, name: &str) -> Result<Option<ContainerState>, RuntimeError> {
        match self.docker.inspect_container(name, None).await {
            Ok(inspect) => {
                let state = inspect.state.unwrap_or_default();
                Ok(Some(ContainerState {
                    status: state
                        .status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    running: state.running.unwrap_or(false),
                    exit_code: state.exit_code,
                }))
            }
            Err(e) => match engine_error(name, e) {
                RuntimeError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn stats(&self, name: &str) -> Result<StatsSample, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(name, Some(options));
        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => return Err(engine_error(name, e)),
            None => return Err(RuntimeError::Engine(format!("{}: empty stats stream", name))),
        };

        let memory_cache = match stats.memory_stats.stats {
            Some(bollard::container::MemoryStatsStats::V1(v1)) => v1.cache,
            Some(bollard::container::MemoryStatsStats::V2(v2)) => v2.file,
            None => 0,
        };
        let (rx_bytes, tx_bytes) = stats
            .networks
            .as_ref()
            .map(|networks| {
                networks.values().fold((0u64, 0u64), |(rx, tx), n| {
                    (rx.saturating_add(n.rx_bytes), tx.saturating_add(n.tx_bytes))
                })
            })
            .unwrap_or((0, 0));

        Ok(StatsSample {
            cpu_total: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_cache,
            rx_bytes,
            tx_bytes,
        })
    }

    async fn wait_container(&self, name: &str, condition: WaitCondition) -> Result<i64, RuntimeError> {
        let options = WaitContainerOptions {
            condition: condition.as_str(),
        };
        let mut stream = self.docker.wait_container(name, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard surfaces non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(engine_error(name, e)),
            None => Err(RuntimeError::Engine(format!("{}: wait stream ended without a result", name))),
        }
    }

    async fn send_stdin(&self, name: &str, line: &str) -> Result<(), RuntimeError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let mut attached = self
            .docker
            .attach_container(name, Some(options))
            .await
            .map_err(|e| engine_error(name, e))?;

        let mut payload = line.trim_end_matches(['\r', '\n']).to_string();
        payload.push('\n');

        let write = async {
            attached.input.write_all(payload.as_bytes()).await?;
            attached.input.flush().await?;
            attached.input.shutdown().await
        };
        write
            .await
            .map_err(|e| RuntimeError::Engine(format!("{}: stdin write failed: {}", name, e)))
    }

    fn logs(&self, name: &str, options: LogOptions) -> LogStream {
        let docker = self.docker.clone();
        let name = name.to_string();
        let tail = options
            .tail
            .map(|t| t.to_string())
            .unwrap_or_else(|| "all".to_string());

        Box::pin(async_stream::stream! {
            let opts = LogsOptions::<String> {
                follow: options.follow,
                stdout: true,
                stderr: true,
                timestamps: options.timestamps,
                tail,
                ..Default::default()
            };
            let mut stream = docker.logs(&name, Some(opts));
            let mut buffer = LineBuffer::new();

            while let Some(item) = stream.next().await {
                match item {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => {
                        for line in buffer.push(&message) {
                            yield Ok(line);
                        }
                    }
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => {
                        yield Err(engine_error(&name, e));
                        return;
                    }
                }
            }

            if let Some(rest) = buffer.finish() {
                yield Ok(rest);
            }
        })
    }

    fn events(&self) -> EventStream {
        let docker = self.docker.clone();

        Box::pin(async_stream::stream! {
            let mut filters = HashMap::new();
            filters.insert("type".to_string(), vec!["container".to_string()]);
            let options = EventsOptions::<String> {
                filters,
                ..Default::default()
            };
            let mut stream = docker.events(Some(options));

            while let Some(item) = stream.next().await {
                match item {
                    Ok(message) => {
                        if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
                            continue;
                        }
                        let Some(action) = message.action.as_deref() else {
                            continue;
                        };
                        let Some(actor) = message.actor.as_ref() else {
                            continue;
                        };
                        let container = actor
                            .attributes
                            .as_ref()
                            .and_then(|a| a.get("name").cloned())
                            .or_else(|| actor.id.clone());
                        if let Some(container) = container {
                            yield Ok(RuntimeEvent {
                                container,
                                action: RuntimeEventAction::from(action),
                            });
                        }
                    }
                    Err(e) => {
                        yield Err(RuntimeError::Engine(format!("event stream: {}", e)));
                        return;
                    }
                }
            }
        })
    }
}
