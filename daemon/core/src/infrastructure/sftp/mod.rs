// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! SFTP Access Gateway
//!
//! SSH server that only offers the `sftp` subsystem. Each authenticated
//! session is confined to one service's data directory.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Tenant file access over SFTP
//!
//! - `host_key`: persisted host identity
//! - `server`: russh server and password authentication
//! - `session`: chrooted SFTP request handler

pub mod host_key;
pub mod server;
pub mod session;

pub use server::SftpGateway;
