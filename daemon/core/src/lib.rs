// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Atlas node daemon core
//!
//! Lifecycle orchestration for containerized game servers: provisioning,
//! installation, power control, sandboxed file access, console streaming and
//! SFTP, plus status reporting to the Atlas control plane.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Library root for the daemon binary

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
