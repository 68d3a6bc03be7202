// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod control_plane;
pub mod runtime;
pub mod script_template_engine;
pub mod sftp;
pub mod storage;
pub mod system_stats;

pub use control_plane::HttpControlPlane;
pub use runtime::DockerRuntime;
pub use storage::TenantStorage;
