// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Storage
//!
//! Per-service data directories on the local filesystem.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements tenant data directory management

pub mod local;

pub use local::{StorageError, TenantStorage};
