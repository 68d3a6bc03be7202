// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Atlas daemon CLI

pub mod config;
pub mod status;

pub use self::config::ConfigCommand;
