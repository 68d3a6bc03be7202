// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator behaviour against the in-memory runtime.

mod common;

use std::time::Duration;

use atlas_daemon_core::application::lifecycle::LifecycleError;
use atlas_daemon_core::domain::install::{InstallState, INSTALLED_MARKER, INSTALL_FAILED_MARKER};
use atlas_daemon_core::domain::runtime::{ContainerRuntime, StatsSample};
use atlas_daemon_core::domain::service::{
    CreateServiceSpec, Environment, InstallPlan, PowerAction, ResourceLimits, ServiceStatus,
    UpdateServiceSpec,
};
use common::{service_id, Harness, UUID};

const WAIT: Duration = Duration::from_secs(5);

fn create_spec(install: Option<InstallPlan>) -> CreateServiceSpec {
    CreateServiceSpec {
        id: service_id(),
        limits: ResourceLimits {
            memory_mb: 1024,
            disk_mb: 10_000,
            cpu_percent: 100,
        },
        port: 25565,
        image: "ghcr.io/pterodactyl/yolks:java_17".to_string(),
        startup_command: "java -Xmx{{SERVER_MEMORY}}M -jar server.jar".to_string(),
        environment: [("SERVER_JARFILE", "server.jar")].into_iter().collect(),
        install,
    }
}

fn plan(script: &str) -> InstallPlan {
    InstallPlan {
        image: "ghcr.io/pterodactyl/installers:alpine".to_string(),
        script: script.to_string(),
        environment: Environment::new(),
    }
}

fn update_spec(memory_mb: u64) -> UpdateServiceSpec {
    UpdateServiceSpec {
        limits: ResourceLimits {
            memory_mb,
            disk_mb: 10_000,
            cpu_percent: 200,
        },
        port: 25570,
        image: None,
        startup_command: Some("java -jar {{SERVER_JARFILE}}".to_string()),
        environment: [("SERVER_JARFILE", "paper.jar")].into_iter().collect(),
    }
}

async fn wait_until_called(h: &Harness, prefix: &str) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if h.runtime.called(prefix) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} was never called", prefix);
}

async fn wait_until_not_installing(h: &Harness) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        let report = h.lifecycle.server_status(&service_id()).await.unwrap();
        if !report.installing {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("install did not finish");
}

#[tokio::test]
async fn test_create_without_script_starts_directly() {
    let h = Harness::new();

    let container_id = h.lifecycle.create(create_spec(None)).await.unwrap();
    assert_eq!(container_id, format!("id-{}", UUID));

    assert!(h.runtime.called(&format!("start:{}", UUID)));
    assert!(!h.runtime.called("create:install-"));
    assert!(h.tenant_dir().join("start.sh").exists());
    assert!(!h.tenant_dir().join(INSTALLED_MARKER).exists());

    let spec = h.runtime.spec(UUID).unwrap();
    assert!(spec.tty && spec.open_stdin);
    assert_eq!(spec.port, Some(25565));
    assert!(spec.env.contains(&"CORE_URL=http://host.docker.internal:8080".to_string()));
    assert!(spec.env.contains(&"SERVER_MEMORY=1024".to_string()));
    assert!(spec.env.contains(&"STARTUP=bash start.sh".to_string()));
    assert!(spec.env.contains(&"SERVER_JARFILE=server.jar".to_string()));
}

#[tokio::test]
async fn test_successful_install_writes_marker_and_reports_offline() {
    let h = Harness::new();
    h.runtime.set_log_lines(&["Downloading server.jar", "Done"]);

    h.lifecycle
        .create(create_spec(Some(plan("#!/bin/bash\necho {{SERVER_UUID}}"))))
        .await
        .unwrap();

    assert!(
        h.control_plane
            .wait_for_status(UUID, ServiceStatus::Offline, WAIT)
            .await
    );
    wait_until_not_installing(&h).await;

    let marker = std::fs::read_to_string(h.tenant_dir().join(INSTALLED_MARKER)).unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(marker.trim()).is_ok());
    assert!(!h.tenant_dir().join(INSTALL_FAILED_MARKER).exists());
    assert!(h.tenant_dir().join("install.sh").exists());

    let installer = format!("install-{}", UUID);
    let calls = h.runtime.calls();
    let waited = calls
        .iter()
        .position(|c| c == &format!("wait:{}:not-running", installer))
        .unwrap();
    let removed = calls
        .iter()
        .rposition(|c| c == &format!("remove:{}", installer))
        .unwrap();
    assert!(waited < removed);
    assert!(!h.runtime.has_container(&installer));
    assert!(!h.runtime.called(&format!("start:{}", UUID)));

    let spec = h.runtime.spec(&installer).unwrap();
    assert_eq!(spec.cmd.as_ref().unwrap()[0], "/bin/bash");
    assert_eq!(spec.working_dir.as_deref(), Some("/mnt/server"));
    assert!(!spec.auto_remove);

    let stages: Vec<_> = h
        .control_plane
        .statuses_for(UUID)
        .into_iter()
        .filter_map(|u| u.stage)
        .collect();
    assert_eq!(stages, vec!["pulling_image", "preparing_volume", "running_script"]);
}

#[tokio::test]
async fn test_failed_install_writes_failure_marker() {
    let h = Harness::new();
    h.runtime.set_wait_code(2);

    h.lifecycle
        .create(create_spec(Some(plan("exit 2"))))
        .await
        .unwrap();

    assert!(
        h.control_plane
            .wait_for_status(UUID, ServiceStatus::InstallationFailed, WAIT)
            .await
    );
    wait_until_not_installing(&h).await;

    let marker = std::fs::read_to_string(h.tenant_dir().join(INSTALL_FAILED_MARKER)).unwrap();
    assert!(!marker.trim().is_empty());
    assert!(!h.tenant_dir().join(INSTALLED_MARKER).exists());

    let report = h.lifecycle.server_status(&service_id()).await.unwrap();
    assert!(matches!(report.install, InstallState::Failed { .. }));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();

    h.lifecycle.delete(&service_id()).await.unwrap();
    assert!(!h.tenant_dir().exists());
    assert!(!h.runtime.has_container(UUID));

    h.lifecycle.delete(&service_id()).await.unwrap();

    let never_created =
        atlas_daemon_core::domain::service::ServiceId::parse("650e8400-e29b-41d4-a716-446655440000")
            .unwrap();
    h.lifecycle.delete(&never_created).await.unwrap();
}

#[tokio::test]
async fn test_reinstall_preserves_allow_list() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();

    let dir = h.tenant_dir();
    std::fs::create_dir_all(dir.join("steamcmd")).unwrap();
    std::fs::write(dir.join("steamcmd/steamcmd.sh"), "x").unwrap();
    std::fs::create_dir_all(dir.join("world")).unwrap();
    std::fs::write(dir.join("server.properties"), "motd=hi").unwrap();

    h.lifecycle
        .reinstall(&service_id(), plan("echo reinstall"))
        .await
        .unwrap();
    assert!(h.runtime.called(&format!("stop:{}", UUID)));

    assert!(
        h.control_plane
            .wait_for_status(UUID, ServiceStatus::Offline, WAIT)
            .await
    );
    wait_until_not_installing(&h).await;

    assert!(dir.join("start.sh").exists());
    assert!(dir.join("steamcmd/steamcmd.sh").exists());
    assert!(!dir.join("world").exists());
    assert!(!dir.join("server.properties").exists());
    assert!(dir.join(INSTALLED_MARKER).exists());
}

#[tokio::test]
async fn test_conflicting_requests_refused_while_installing() {
    let h = Harness::new();
    h.runtime.hold_wait();

    h.lifecycle
        .create(create_spec(Some(plan("sleep 60"))))
        .await
        .unwrap();
    assert!(h.lifecycle.server_status(&service_id()).await.unwrap().installing);

    assert!(matches!(
        h.lifecycle.create(create_spec(None)).await,
        Err(LifecycleError::Installing(_))
    ));
    assert!(matches!(
        h.lifecycle.power(&service_id(), PowerAction::Start, None).await,
        Err(LifecycleError::Installing(_))
    ));
    assert!(matches!(
        h.lifecycle.reinstall(&service_id(), plan("echo again")).await,
        Err(LifecycleError::Installing(_))
    ));

    h.runtime.release_wait();
    wait_until_not_installing(&h).await;
    assert!(h.tenant_dir().join(INSTALLED_MARKER).exists());
}

#[tokio::test]
async fn test_delete_during_install_leaves_no_marker() {
    let h = Harness::new();
    h.runtime.hold_wait();

    h.lifecycle
        .create(create_spec(Some(plan("sleep 60"))))
        .await
        .unwrap();
    h.lifecycle.delete(&service_id()).await.unwrap();
    h.runtime.release_wait();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!h.tenant_dir().exists());
    assert!(!h.control_plane.has_status(UUID, ServiceStatus::Offline));
}

#[tokio::test]
async fn test_delete_while_script_runs_reports_nothing() {
    let h = Harness::new();
    h.runtime.hold_wait();
    h.runtime.set_wait_code(137);

    h.lifecycle
        .create(create_spec(Some(plan("sleep 60"))))
        .await
        .unwrap();
    wait_until_called(&h, &format!("wait:install-{}", UUID)).await;

    h.lifecycle.delete(&service_id()).await.unwrap();
    // Directory reappears before the installer sees the exit code
    std::fs::create_dir_all(h.tenant_dir()).unwrap();
    h.runtime.release_wait();

    let deadline = tokio::time::Instant::now() + WAIT;
    while h.tenant_dir().exists() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.tenant_dir().exists());
    assert!(!h.tenant_dir().join(INSTALL_FAILED_MARKER).exists());
    assert!(!h.control_plane.has_status(UUID, ServiceStatus::InstallationFailed));
}

#[tokio::test]
async fn test_duplicate_create_keeps_existing_start_script() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();
    let script = h.tenant_dir().join("start.sh");
    let before = std::fs::read_to_string(&script).unwrap();

    let mut again = create_spec(None);
    again.startup_command = "./other-binary".to_string();
    assert!(matches!(
        h.lifecycle.create(again).await,
        Err(LifecycleError::Conflict(_))
    ));
    assert_eq!(std::fs::read_to_string(&script).unwrap(), before);
}

#[tokio::test]
async fn test_update_regenerates_start_script() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();

    h.lifecycle
        .update(&service_id(), update_spec(2048))
        .await
        .unwrap();

    assert!(h.runtime.called(&format!("update:{}:2048", UUID)));
    let script = std::fs::read_to_string(h.tenant_dir().join("start.sh")).unwrap();
    assert!(script.contains("Port=25570, Memory=2048MB"));
    assert!(script.contains("paper.jar"));
    assert!(!script.contains("server.jar"));
}

#[tokio::test]
async fn test_update_survives_failed_resource_update() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();
    h.runtime.remove_container(UUID, true).await.unwrap();

    h.lifecycle
        .update(&service_id(), update_spec(4096))
        .await
        .unwrap();

    assert!(h.runtime.called(&format!("update:{}:4096", UUID)));
    let script = std::fs::read_to_string(h.tenant_dir().join("start.sh")).unwrap();
    assert!(script.contains("Memory=4096MB"));
}

#[tokio::test]
async fn test_power_restart_reports_starting() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();
    h.lifecycle
        .power(&service_id(), PowerAction::Stop, None)
        .await
        .unwrap();

    h.lifecycle
        .power(&service_id(), PowerAction::Restart, None)
        .await
        .unwrap();
    assert!(
        h.control_plane
            .wait_for_status(UUID, ServiceStatus::Starting, WAIT)
            .await
    );
    assert!(h.runtime.called(&format!("restart:{}", UUID)));
    let state = h.runtime.inspect_state(UUID).await.unwrap().unwrap();
    assert!(state.running);
}

#[tokio::test]
async fn test_power_pushes_intended_status() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();

    h.lifecycle
        .power(&service_id(), PowerAction::Stop, None)
        .await
        .unwrap();
    assert!(
        h.control_plane
            .wait_for_status(UUID, ServiceStatus::Stopping, WAIT)
            .await
    );
    assert!(h.runtime.called(&format!("stop:{}", UUID)));

    h.lifecycle
        .power(&service_id(), PowerAction::Kill, None)
        .await
        .unwrap();
    assert!(h.runtime.called(&format!("kill:{}", UUID)));
}

#[tokio::test]
async fn test_power_on_missing_server_is_not_found() {
    let h = Harness::new();
    assert!(matches!(
        h.lifecycle.power(&service_id(), PowerAction::Start, None).await,
        Err(LifecycleError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_stats_snapshot_and_timeout() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();
    h.runtime.set_stats(StatsSample {
        cpu_total: 1100,
        precpu_total: 1000,
        system_cpu: 11000,
        presystem_cpu: 10000,
        online_cpus: 2,
        memory_usage: 500 * 1_048_576,
        memory_cache: 100 * 1_048_576,
        rx_bytes: 10,
        tx_bytes: 20,
    });

    let snapshot = h.lifecycle.stats(&service_id()).await.unwrap();
    assert_eq!(
        snapshot.to_json(),
        serde_json::json!({"cpu": "20.0", "memory": 400, "network": {"rx": 10, "tx": 20}})
    );

    h.runtime.set_stats_delay(Duration::from_secs(2));
    let zeroed = h.lifecycle.stats(&service_id()).await.unwrap();
    assert_eq!(
        zeroed.to_json(),
        serde_json::json!({"cpu": "0.0", "memory": 0, "network": {"rx": 0, "tx": 0}})
    );
}

#[tokio::test]
async fn test_empty_command_rejected() {
    let h = Harness::new();
    h.lifecycle.create(create_spec(None)).await.unwrap();
    assert!(matches!(
        h.lifecycle.send_command(&service_id(), "  ").await,
        Err(LifecycleError::InvalidRequest(_))
    ));
    h.lifecycle.send_command(&service_id(), "say hi").await.unwrap();
    assert!(h.runtime.called(&format!("stdin:{}:say hi", UUID)));
}
