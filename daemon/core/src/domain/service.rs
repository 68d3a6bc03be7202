// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Service Instance Domain Model
//!
//! Types describing one containerized game server ("service") as the control
//! plane sends it to this node: identity, resource limits, environment map,
//! power actions and the status vocabulary reported back upstream.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Value objects shared by the orchestrator, installer and HTTP surface

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bytes per megabyte as used by memory limits.
pub const BYTES_PER_MB: i64 = 1_048_576;

/// nanoCPU units per one "percent of a core" unit (100 => one full core).
pub const NANO_CPUS_PER_PERCENT: i64 = 10_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceModelError {
    #[error("invalid service identifier '{0}'")]
    InvalidId(String),

    #[error("Invalid action")]
    InvalidAction(String),

    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("{0} is out of range")]
    LimitOutOfRange(&'static str),
}

/// Stable identity of a service instance, shared with the control plane.
///
/// Doubles as the container name and as the data directory name, so it must
/// never contain path separators. Only canonical UUIDs are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn parse(raw: &str) -> Result<Self, ServiceModelError> {
        let trimmed = raw.trim();
        uuid::Uuid::parse_str(trimmed)
            .map(|id| Self(id.hyphenated().to_string()))
            .map_err(|_| ServiceModelError::InvalidId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Container name of the ephemeral installer for this service.
    pub fn installer_container_name(&self) -> String {
        format!("{}{}", INSTALLER_CONTAINER_PREFIX, self.0)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ServiceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ServiceId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Prefix used for installer containers. The event monitor skips these.
pub const INSTALLER_CONTAINER_PREFIX: &str = "install-";

/// Status strings understood by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Installing,
    InstallationFailed,
    Offline,
    Starting,
    Running,
    Stopping,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Installing => "installing",
            ServiceStatus::InstallationFailed => "installation_failed",
            ServiceStatus::Offline => "offline",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
    Kill,
}

impl PowerAction {
    /// Status pushed optimistically before the runtime call is issued.
    pub fn intended_status(&self) -> ServiceStatus {
        match self {
            PowerAction::Start | PowerAction::Restart => ServiceStatus::Starting,
            PowerAction::Stop => ServiceStatus::Stopping,
            PowerAction::Kill => ServiceStatus::Offline,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Restart => "restart",
            PowerAction::Kill => "kill",
        }
    }
}

impl FromStr for PowerAction {
    type Err = ServiceModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(PowerAction::Start),
            "stop" => Ok(PowerAction::Stop),
            "restart" => Ok(PowerAction::Restart),
            "kill" => Ok(PowerAction::Kill),
            other => Err(ServiceModelError::InvalidAction(other.to_string())),
        }
    }
}

/// Resource limits in control-plane units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory in MB. Zero means unlimited.
    pub memory_mb: u64,
    /// Disk in MB. Advisory only; the runtime does not enforce it.
    pub disk_mb: u64,
    /// CPU in percent of one core. Zero means unlimited.
    pub cpu_percent: u64,
}

impl ResourceLimits {
    /// Limits whose engine units fit the engine's signed fields.
    pub fn new(memory_mb: u64, disk_mb: u64, cpu_percent: u64) -> Result<Self, ServiceModelError> {
        let limits = Self {
            memory_mb,
            disk_mb,
            cpu_percent,
        };
        to_engine_units(limits.memory_mb, BYTES_PER_MB)
            .ok_or(ServiceModelError::LimitOutOfRange("memory"))?;
        to_engine_units(limits.cpu_percent, NANO_CPUS_PER_PERCENT)
            .ok_or(ServiceModelError::LimitOutOfRange("cpu"))?;
        Ok(limits)
    }

    pub fn memory_bytes(&self) -> i64 {
        to_engine_units(self.memory_mb, BYTES_PER_MB).unwrap_or(i64::MAX)
    }

    pub fn nano_cpus(&self) -> i64 {
        to_engine_units(self.cpu_percent, NANO_CPUS_PER_PERCENT).unwrap_or(i64::MAX)
    }
}

fn to_engine_units(value: u64, factor: i64) -> Option<i64> {
    i64::try_from(value).ok()?.checked_mul(factor)
}

/// String to string environment of a service.
///
/// Transported as a JSON object encoded in a string field and injected into
/// containers as `KEY=VALUE` pairs. Iteration order is sorted so that derived
/// artifacts are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON-in-a-string transport form. Empty input is an empty map.
    pub fn from_json_str(raw: &str) -> Result<Self, ServiceModelError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)
            .map_err(|e| ServiceModelError::InvalidEnvironment(e.to_string()))?;

        Ok(Self(
            map.into_iter()
                .map(|(k, v)| {
                    let value = match v {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k, value)
                })
                .collect(),
        ))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Merge `overrides` on top of `self`; keys present in both take the
    /// override value.
    pub fn merged_with(&self, overrides: &Environment) -> Environment {
        let mut merged = self.0.clone();
        for (k, v) in &overrides.0 {
            merged.insert(k.clone(), v.clone());
        }
        Environment(merged)
    }

    pub fn to_env_pairs(&self) -> Vec<String> {
        self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Everything needed to provision a new service on this node.
#[derive(Debug, Clone)]
pub struct CreateServiceSpec {
    pub id: ServiceId,
    pub limits: ResourceLimits,
    pub port: u16,
    pub image: String,
    pub startup_command: String,
    pub environment: Environment,
    pub install: Option<InstallPlan>,
}

/// Live changes for an existing service.
#[derive(Debug, Clone)]
pub struct UpdateServiceSpec {
    pub limits: ResourceLimits,
    pub port: u16,
    pub image: Option<String>,
    pub startup_command: Option<String>,
    pub environment: Environment,
}

/// Inputs for regenerating the start script before a power action.
#[derive(Debug, Clone)]
pub struct ScriptRefresh {
    pub startup_command: String,
    pub environment: Environment,
    pub port: u16,
    pub memory_mb: u64,
}

/// An install script plus the image it runs in.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub image: String,
    pub script: String,
    pub environment: Environment,
}

impl InstallPlan {
    /// Returns `None` when there is no script to run.
    pub fn from_parts(
        image: Option<&str>,
        script: &str,
        environment: Environment,
        default_image: &str,
    ) -> Option<Self> {
        if script.trim().is_empty() {
            return None;
        }
        let image = image
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .unwrap_or(default_image)
            .to_string();
        Some(Self {
            image,
            script: script.to_string(),
            environment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_id_accepts_uuid() {
        let id = ServiceId::parse("550E8400-E29B-41D4-A716-446655440000").unwrap();
        assert_eq!(id.as_str(), "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(
            id.installer_container_name(),
            "install-550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_service_id_rejects_path_like_values() {
        assert!(ServiceId::parse("../etc").is_err());
        assert!(ServiceId::parse("").is_err());
        assert!(ServiceId::parse("abc/def").is_err());
    }

    #[test]
    fn test_resource_conversions() {
        let limits = ResourceLimits {
            memory_mb: 1024,
            disk_mb: 0,
            cpu_percent: 100,
        };
        assert_eq!(limits.memory_bytes(), 1_073_741_824);
        assert_eq!(limits.nano_cpus(), 1_000_000_000);
        assert_eq!(ResourceLimits::default().nano_cpus(), 0);
    }

    #[test]
    fn test_oversized_limits_rejected() {
        assert!(matches!(
            ResourceLimits::new(u64::MAX, 0, 100),
            Err(ServiceModelError::LimitOutOfRange("memory"))
        ));
        // Fits i64 but overflows once converted to bytes
        assert!(ResourceLimits::new(1 << 60, 0, 100).is_err());
        assert!(matches!(
            ResourceLimits::new(1024, 0, u64::MAX),
            Err(ServiceModelError::LimitOutOfRange("cpu"))
        ));
        assert_eq!(
            ResourceLimits::new(1024, 500, 50).unwrap().memory_bytes(),
            1_073_741_824
        );
    }

    #[test]
    fn test_power_action_parse() {
        assert_eq!("kill".parse::<PowerAction>().unwrap(), PowerAction::Kill);
        assert_eq!(
            PowerAction::Restart.intended_status(),
            ServiceStatus::Starting
        );
        assert!("reboot".parse::<PowerAction>().is_err());
    }

    #[test]
    fn test_environment_from_json_string() {
        let env = Environment::from_json_str(r#"{"MAX_PLAYERS":"20","DEBUG":true,"SEED":42}"#)
            .unwrap();
        assert_eq!(env.get("MAX_PLAYERS"), Some("20"));
        assert_eq!(env.get("DEBUG"), Some("true"));
        assert_eq!(env.get("SEED"), Some("42"));
        assert!(Environment::from_json_str("").unwrap().is_empty());
        assert!(Environment::from_json_str("not json").is_err());
    }

    #[test]
    fn test_environment_merge_override_wins() {
        let defaults: Environment = [("A", "1"), ("B", "2")].into_iter().collect();
        let overrides: Environment = [("B", "3")].into_iter().collect();
        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.get("A"), Some("1"));
        assert_eq!(merged.get("B"), Some("3"));
        assert_eq!(merged.to_env_pairs(), vec!["A=1", "B=3"]);
    }

    #[test]
    fn test_install_plan_requires_script() {
        let none = InstallPlan::from_parts(None, "  ", Environment::new(), "img");
        assert!(none.is_none());

        let plan = InstallPlan::from_parts(Some(""), "echo hi", Environment::new(), "img").unwrap();
        assert_eq!(plan.image, "img");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ServiceStatus::InstallationFailed).unwrap();
        assert_eq!(json, "\"installation_failed\"");
    }
}
