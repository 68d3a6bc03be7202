// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Background Monitors
//!
//! Two long-lived tasks run for the daemon's whole lifetime:
//!
//! - [`EventMonitor`] follows container engine events and pushes `running` /
//!   `offline` for tenant containers. A broken stream is reconnected with
//!   exponential backoff; while disconnected the monitor reports degraded.
//! - [`Heartbeat`] posts node resource stats and monitor health on a fixed
//!   interval. A failed post is logged; the next tick is the retry.

use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::status_reporter::StatusReporter;
use crate::domain::control_plane::{
    ControlPlane, HeartbeatReport, MonitorHealth, NodeHealth, NodeStats,
};
use crate::domain::runtime::{ContainerRuntime, RuntimeEvent, RuntimeEventAction};
use crate::domain::service::{ServiceId, ServiceStatus, INSTALLER_CONTAINER_PREFIX};
use crate::infrastructure::system_stats::SystemSampler;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Shared health flag of the event monitor, read by the heartbeat.
#[derive(Debug, Clone, Default)]
pub struct MonitorHealthState {
    healthy: Arc<AtomicBool>,
}

impl MonitorHealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn current(&self) -> MonitorHealth {
        if self.healthy.load(Ordering::Relaxed) {
            MonitorHealth::Healthy
        } else {
            MonitorHealth::Degraded
        }
    }
}

/// Map an engine event to the status it implies, if it concerns a tenant.
pub fn status_for_event(event: &RuntimeEvent) -> Option<(ServiceId, ServiceStatus)> {
    let name = event.container.trim_start_matches('/');
    if name.starts_with(INSTALLER_CONTAINER_PREFIX) {
        return None;
    }
    let status = match event.action {
        RuntimeEventAction::Start => ServiceStatus::Running,
        RuntimeEventAction::Die | RuntimeEventAction::Stop => ServiceStatus::Offline,
        RuntimeEventAction::Other(_) => return None,
    };
    // Containers not named by a service UUID are not ours
    let id = ServiceId::parse(name).ok()?;
    Some((id, status))
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

pub struct EventMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    reporter: StatusReporter,
    health: MonitorHealthState,
}

impl EventMonitor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        reporter: StatusReporter,
        health: MonitorHealthState,
    ) -> Self {
        Self {
            runtime,
            reporter,
            health,
        }
    }

    /// Follow engine events until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let received_any = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.follow() => received,
            };

            self.health.set_healthy(false);
            if received_any {
                backoff = INITIAL_BACKOFF;
            }
            error!(
                retry_in_secs = backoff.as_secs(),
                "Container event stream lost; status updates suspended until reconnect"
            );

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff);
        }

        info!("Event monitor stopped");
    }

    /// One subscription. Returns whether any event arrived before it ended.
    async fn follow(&self) -> bool {
        if let Err(e) = self.runtime.ping().await {
            warn!(error = %e, "Container engine unreachable");
            return false;
        }

        let mut events = self.runtime.events();
        self.health.set_healthy(true);
        info!("Subscribed to container events");

        let mut received_any = false;
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    received_any = true;
                    self.handle(&event);
                }
                Err(e) => {
                    warn!(error = %e, "Container event stream error");
                    break;
                }
            }
        }
        received_any
    }

    fn handle(&self, event: &RuntimeEvent) {
        match status_for_event(event) {
            Some((id, status)) => {
                debug!(service = %id, status = %status, "Container event");
                self.reporter.push_status(&id, status);
            }
            None => debug!(container = %event.container, action = ?event.action, "Ignoring event"),
        }
    }
}

pub struct Heartbeat {
    control_plane: Arc<dyn ControlPlane>,
    sampler: Arc<SystemSampler>,
    health: MonitorHealthState,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        sampler: Arc<SystemSampler>,
        health: MonitorHealthState,
        interval: Duration,
    ) -> Self {
        Self {
            control_plane,
            sampler,
            health,
            interval,
        }
    }

    pub fn build_report(&self, stats: NodeStats) -> HeartbeatReport {
        HeartbeatReport {
            stats,
            health: NodeHealth {
                event_monitor: self.health.current(),
            },
        }
    }

    /// Sample and send one heartbeat.
    pub async fn beat(&self) {
        let sampler = self.sampler.clone();
        let stats = match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "System sampling failed");
                NodeStats::default()
            }
        };

        let report = self.build_report(stats);
        if let Err(e) = self.control_plane.heartbeat(&report).await {
            warn!(error = %e, "Heartbeat failed");
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.beat().await,
            }
        }
        info!("Heartbeat stopped");
    }
}
