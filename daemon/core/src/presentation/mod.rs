// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Presentation
//!
//! Node-authenticated HTTP surface consumed by the Atlas control plane.
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Routing, authentication and request/response mapping

pub mod api;
pub mod console;
pub mod error;
pub mod extract;
pub mod files;
pub mod servers;

pub use api::{app, AppState};
pub use error::ApiError;
