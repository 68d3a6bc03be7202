// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod file_manager;
pub mod installer;
pub mod lifecycle;
pub mod monitor;
pub mod status_reporter;
pub mod tenant_locks;
