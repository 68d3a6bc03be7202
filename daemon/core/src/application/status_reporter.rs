// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Fire-and-forget status pushes to the control plane.

use std::sync::Arc;

use crate::domain::control_plane::{ControlPlane, StatusUpdate};
use crate::domain::service::{ServiceId, ServiceStatus};

#[derive(Clone)]
pub struct StatusReporter {
    control_plane: Arc<dyn ControlPlane>,
}

impl StatusReporter {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    /// Push in the background; failures are logged only.
    pub fn push(&self, id: &ServiceId, update: StatusUpdate) {
        let reporter = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            reporter.push_now(&id, &update).await;
        });
    }

    pub fn push_status(&self, id: &ServiceId, status: ServiceStatus) {
        self.push(id, StatusUpdate::new(status));
    }

    /// Push and wait for the call to finish; failures are logged only.
    pub async fn push_now(&self, id: &ServiceId, update: &StatusUpdate) {
        if let Err(e) = self.control_plane.notify_status(id, update).await {
            tracing::warn!(service = %id, status = %update.status, error = %e, "Failed to report status");
        }
    }
}
