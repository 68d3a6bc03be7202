// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Event monitor reconnect loop against a scripted event stream.

mod common;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use atlas_daemon_core::application::monitor::{EventMonitor, MonitorHealthState};
use atlas_daemon_core::application::status_reporter::StatusReporter;
use atlas_daemon_core::domain::control_plane::MonitorHealth;
use atlas_daemon_core::domain::runtime::{RuntimeError, RuntimeEvent, RuntimeEventAction};
use atlas_daemon_core::domain::service::ServiceStatus;
use common::{FakeControlPlane, FakeRuntime, UUID};

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for_health(health: &MonitorHealthState, expected: MonitorHealth) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if health.current() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_broken_stream_degrades_then_recovers() {
    let runtime = FakeRuntime::new();
    let control_plane = FakeControlPlane::new();
    let health = MonitorHealthState::new();

    runtime.push_event_stream(vec![Err(RuntimeError::Engine("event socket closed".into()))]);
    runtime.push_event_stream(vec![Ok(RuntimeEvent {
        container: format!("/{}", UUID),
        action: RuntimeEventAction::Start,
    })]);

    let monitor = EventMonitor::new(
        runtime.clone(),
        StatusReporter::new(control_plane.clone()),
        health.clone(),
    );
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(monitor.run(shutdown.clone()));

    // First subscription fails at once; the retry waits out the backoff
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(health.current(), MonitorHealth::Degraded);
    assert_eq!(runtime.calls().iter().filter(|c| *c == "events").count(), 1);

    assert!(wait_for_health(&health, MonitorHealth::Healthy).await);
    assert!(
        control_plane
            .wait_for_status(UUID, ServiceStatus::Running, WAIT)
            .await
    );
    assert_eq!(runtime.calls().iter().filter(|c| *c == "events").count(), 2);

    shutdown.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_installer_events_are_not_reported() {
    let runtime = FakeRuntime::new();
    let control_plane = FakeControlPlane::new();
    let health = MonitorHealthState::new();

    runtime.push_event_stream(vec![
        Ok(RuntimeEvent {
            container: format!("/install-{}", UUID),
            action: RuntimeEventAction::Die,
        }),
        Ok(RuntimeEvent {
            container: format!("/{}", UUID),
            action: RuntimeEventAction::Die,
        }),
    ]);

    let monitor = EventMonitor::new(
        runtime.clone(),
        StatusReporter::new(control_plane.clone()),
        health.clone(),
    );
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(monitor.run(shutdown.clone()));

    assert!(
        control_plane
            .wait_for_status(UUID, ServiceStatus::Offline, WAIT)
            .await
    );
    assert_eq!(control_plane.total_pushes(), 1);
    assert_eq!(health.current(), MonitorHealth::Healthy);

    shutdown.cancel();
    tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
}
