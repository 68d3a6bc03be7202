// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Script Template Engine
//!
//! Renders `start.sh` and `install.sh` for a service by substituting
//! `{{VARIABLE}}` placeholders with the service environment.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Turn egg startup/install templates into executable shell scripts
//! - **Integration:** Lifecycle service (create/update/power) and installer
//!
//! # Placeholders
//!
//! - `{{NAME}}` where NAME matches `[A-Za-z0-9_.]+`
//! - `{{SERVER_PORT}}` and `{{SERVER_MEMORY}}` always come from the service's
//!   port and memory, overriding user variables of the same name
//! - In start scripts unknown placeholders render as an empty string; in
//!   install scripts they are left untouched

use regex::{Captures, Regex};
use std::path::Path;
use std::sync::LazyLock;

use crate::domain::service::Environment;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z0-9_.]+)\}\}").expect("placeholder pattern is a valid regex")
});

/// What to do with a placeholder that has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPlaceholder {
    Empty,
    Keep,
}

/// Inputs of a start script render.
#[derive(Debug, Clone, Copy)]
pub struct StartScriptContext<'a> {
    pub startup_command: &'a str,
    pub variables: &'a Environment,
    pub port: u16,
    pub memory_mb: u64,
}

#[derive(Debug, Clone)]
pub struct ScriptTemplateEngine {
    container_data_path: String,
}

impl ScriptTemplateEngine {
    pub fn new(container_data_path: impl Into<String>) -> Self {
        Self {
            container_data_path: container_data_path.into(),
        }
    }

    /// Replace every `{{NAME}}` in `template` from `variables`.
    pub fn substitute(
        &self,
        template: &str,
        variables: &Environment,
        unknown: UnknownPlaceholder,
    ) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                let key = &caps[1];
                match variables.get(key) {
                    Some(value) => value.to_string(),
                    None => match unknown {
                        UnknownPlaceholder::Empty => String::new(),
                        UnknownPlaceholder::Keep => caps[0].to_string(),
                    },
                }
            })
            .into_owned()
    }

    /// Resolve the startup command alone, with reserved keys applied.
    pub fn resolve_command(&self, ctx: &StartScriptContext<'_>) -> String {
        let mut reserved = Environment::new();
        reserved.insert("SERVER_PORT", ctx.port.to_string());
        reserved.insert("SERVER_MEMORY", ctx.memory_mb.to_string());
        let variables = ctx.variables.merged_with(&reserved);

        self.substitute(ctx.startup_command, &variables, UnknownPlaceholder::Empty)
            .trim()
            .to_string()
    }

    /// Full wrapper script text for `start.sh`.
    pub fn render_start_script(&self, ctx: &StartScriptContext<'_>) -> String {
        let command = normalize_line_endings(&self.resolve_command(ctx));

        let script = format!(
            r#"#!/bin/bash
echo "--- Atlas Instance Wrapper ---"
echo "Working Directory: $(pwd)"
echo "Environment: Port={port}, Memory={memory}MB"
# Notify Running
curl -X POST "${{CORE_URL}}/api/v1/internal/services/${{SERVER_UUID}}/status" -H "Content-Type: application/json" -d "{{\"status\":\"running\", \"token\": \"${{NODE_TOKEN}}\"}}" > /dev/null 2>&1 &
echo "Starting Server..."
cd "{workdir}"
{command}
"#,
            port = ctx.port,
            memory = ctx.memory_mb,
            workdir = self.container_data_path,
            command = final_statement(&command),
        );

        normalize_line_endings(&script)
    }

    /// `install.sh` text: placeholders from the install environment, unknown
    /// ones kept so shell syntax survives.
    pub fn render_install_script(&self, script: &str, variables: &Environment) -> String {
        normalize_line_endings(&self.substitute(script, variables, UnknownPlaceholder::Keep))
    }
}

/// `exec` simple commands so signals reach the server process directly.
/// Compound commands stay as-is; as the last statement their exit status is
/// still the script's.
fn final_statement(command: &str) -> String {
    if command.is_empty() {
        return String::new();
    }
    let compound = ["&&", "||", ";", "|", "\n"]
        .iter()
        .any(|op| command.contains(op));
    if compound {
        command.to_string()
    } else {
        format!("exec {}", command)
    }
}

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Write `contents` to `path` with mode 0755.
pub async fn write_executable(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::write(path, contents.as_bytes()).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}
