// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects and ports with no I/O of their own.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Service model, sandbox, runtime and control plane ports

pub mod control_plane;
pub mod install;
pub mod node_config;
pub mod path_sanitizer;
pub mod runtime;
pub mod service;
pub mod sftp_auth;
