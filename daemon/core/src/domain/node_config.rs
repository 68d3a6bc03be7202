// Copyright (c) 2026 Atlas Contributors
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for an Atlas node daemon:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Shared node token and control plane endpoint
// - HTTP API and SFTP listeners
// - Data root, ownership and reinstall preserve list
// - Container runtime defaults and timeouts
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use subtle::ConstantTimeEq;

pub const API_VERSION: &str = "atlas/v1";
pub const KIND: &str = "NodeConfig";
pub const DEFAULT_NODE_TOKEN: &str = "change-me";

/// Shared secret authenticating the control plane to this node and back.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeToken(String);

impl NodeToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Constant-time comparison against a presented token.
    pub fn matches(&self, presented: &str) -> bool {
        !self.0.is_empty() && bool::from(self.0.as_bytes().ct_eq(presented.as_bytes()))
    }
}

impl fmt::Debug for NodeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodeToken(***)")
    }
}

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "atlas/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NodeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    /// Shared secret; every inbound request must present it
    #[serde(default = "default_node_token")]
    pub node_token: NodeToken,

    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub sftp: SftpConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL of the Atlas core, e.g. "http://panel.example.com:8080"
    #[serde(default = "default_core_url")]
    pub url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_addr: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind_address")]
    pub bind_addr: String,

    #[serde(default = "default_sftp_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per service
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Owner applied to data directories before installs run
    #[serde(default = "default_owner_id")]
    pub owner_uid: u32,

    #[serde(default = "default_owner_id")]
    pub owner_gid: u32,

    /// Top-level entries kept when a service is reinstalled
    #[serde(default = "default_reinstall_preserve")]
    pub reinstall_preserve: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path to Docker socket
    /// Default: engine defaults (DOCKER_HOST or /var/run/docker.sock)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket_path: Option<String>,

    /// Image used when a create/reinstall names no install image
    #[serde(default = "default_install_image")]
    pub default_install_image: String,

    /// Grace period before stop/restart escalate to SIGKILL
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Upper bound for one stats sample
    #[serde(default = "default_stats_timeout")]
    pub stats_timeout_secs: u64,

    /// Mount point of the data directory inside server containers
    #[serde(default = "default_container_data_path")]
    pub container_data_path: String,

    /// Mount point of the data directory inside installer containers
    #[serde(default = "default_install_mount_path")]
    pub install_mount_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("pretty" or "json")
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_node_token() -> NodeToken {
    NodeToken::new(DEFAULT_NODE_TOKEN)
}

fn default_core_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8081
}

fn default_sftp_port() -> u16 {
    2022
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/var/lib/atlas/volumes")
}

fn default_owner_id() -> u32 {
    1000
}

fn default_reinstall_preserve() -> Vec<String> {
    vec!["start.sh".to_string(), "steamcmd".to_string()]
}

fn default_install_image() -> String {
    "ghcr.io/pterodactyl/installers:alpine".to_string()
}

fn default_stop_grace() -> u64 {
    10
}

fn default_stats_timeout() -> u64 {
    10
}

fn default_container_data_path() -> String {
    "/home/container".to_string()
}

fn default_install_mount_path() -> String {
    "/mnt/server".to_string()
}

fn default_heartbeat() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: default_core_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_address(),
            port: default_api_port(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: default_bind_address(),
            port: default_sftp_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            owner_uid: default_owner_id(),
            owner_gid: default_owner_id(),
            reinstall_preserve: default_reinstall_preserve(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket_path: None,
            default_install_image: default_install_image(),
            stop_grace_secs: default_stop_grace(),
            stats_timeout_secs: default_stats_timeout(),
            container_data_path: default_container_data_path(),
            install_mount_path: default_install_mount_path(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for NodeConfigSpec {
    fn default() -> Self {
        Self {
            node_token: default_node_token(),
            control_plane: ControlPlaneConfig::default(),
            api: ApiConfig::default(),
            sftp: SftpConfig::default(),
            storage: StorageConfig::default(),
            runtime: RuntimeConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "atlas-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_secs(self.stats_timeout_secs)
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Candidate locations, in precedence order
    /// 1. ATLAS_CONFIG_PATH environment variable
    /// 2. ./atlas-config.yaml (working directory)
    /// 3. ~/.atlas/config.yaml (user home)
    /// 4. /etc/atlas/config.yaml (system)
    pub fn discovery_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var("ATLAS_CONFIG_PATH") {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./atlas-config.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".atlas").join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/atlas/config.yaml"));
        paths
    }

    /// Discover configuration file using precedence order
    pub fn discover_config() -> Option<PathBuf> {
        Self::discovery_paths().into_iter().find(|p| p.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // 1. Explicit CLI path (Fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        // 2. Discovery (Env -> Cwd -> Home -> System)
        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration.
    /// Names match the variables older node installs were deployed with.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override source is injectable so tests do not touch process env.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let spec = &mut self.spec;

        if let Some(val) = lookup("PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: PORT={}", port);
                    spec.api.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for PORT: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("SFTP_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: SFTP_PORT={}", port);
                    spec.sftp.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for SFTP_PORT: '{}'. Ignoring.", val),
            }
        }

        if let Some(val) = lookup("CORE_URL").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: CORE_URL={}", val);
            spec.control_plane.url = val;
        }

        if let Some(val) = lookup("NODE_TOKEN").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: NODE_TOKEN=***");
            spec.node_token = NodeToken::new(val);
        }

        if let Some(val) = lookup("ATLAS_DATA_PATH").filter(|v| !v.is_empty()) {
            tracing::info!("Environment override: ATLAS_DATA_PATH={}", val);
            spec.storage.data_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("DOCKER_HOST") {
            if let Some(socket) = val.strip_prefix("unix://") {
                tracing::info!("Environment override: DOCKER_HOST={}", val);
                spec.runtime.docker_socket_path = Some(socket.to_string());
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;

        if spec.node_token.is_empty() {
            anyhow::bail!("spec.node_token cannot be empty");
        }
        if spec.node_token.expose() == DEFAULT_NODE_TOKEN {
            tracing::warn!("spec.node_token is the default value; set NODE_TOKEN before exposing this node");
        }

        let core_url = url::Url::parse(&spec.control_plane.url).map_err(|e| {
            anyhow::anyhow!("Invalid control_plane.url '{}': {}", spec.control_plane.url, e)
        })?;
        if !matches!(core_url.scheme(), "http" | "https") {
            anyhow::bail!(
                "control_plane.url must use http or https, got '{}'",
                core_url.scheme()
            );
        }

        if spec.api.port == 0 {
            anyhow::bail!("api.port cannot be 0");
        }
        if spec.sftp.enabled {
            if spec.sftp.port == 0 {
                anyhow::bail!("sftp.port cannot be 0");
            }
            if spec.sftp.port == spec.api.port {
                anyhow::bail!("sftp.port and api.port must differ (both {})", spec.api.port);
            }
        }

        if !spec.storage.data_root.is_absolute() {
            anyhow::bail!(
                "storage.data_root must be absolute, got {:?}",
                spec.storage.data_root
            );
        }

        if spec.runtime.default_install_image.trim().is_empty() {
            anyhow::bail!("runtime.default_install_image cannot be empty");
        }
        if spec.runtime.stats_timeout_secs == 0 {
            anyhow::bail!("runtime.stats_timeout_secs must be greater than 0");
        }
        if spec.heartbeat.interval_secs == 0 {
            anyhow::bail!("heartbeat.interval_secs must be greater than 0");
        }
        if spec.control_plane.request_timeout_secs == 0 {
            anyhow::bail!("control_plane.request_timeout_secs must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = NodeConfigManifest::default();
        assert_eq!(manifest.api_version, "atlas/v1");
        assert_eq!(manifest.kind, "NodeConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.api.port, 8081);
        assert_eq!(manifest.spec.sftp.port, 2022);
        assert_eq!(manifest.spec.heartbeat.interval_secs, 5);
        assert_eq!(
            manifest.spec.storage.reinstall_preserve,
            vec!["start.sh", "steamcmd"]
        );
    }

    #[test]
    fn test_yaml_with_partial_spec() {
        let yaml = r#"
apiVersion: atlas/v1
kind: NodeConfig
metadata:
  name: node-eu-1
spec:
  node_token: s3cret
  control_plane:
    url: https://panel.example.com
  storage:
    data_root: /srv/atlas
"#;
        let parsed = NodeConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(parsed.metadata.name, "node-eu-1");
        assert!(parsed.spec.node_token.matches("s3cret"));
        assert_eq!(parsed.spec.storage.data_root, PathBuf::from("/srv/atlas"));
        assert_eq!(parsed.spec.storage.owner_uid, 1000);
        assert_eq!(parsed.spec.runtime.stop_grace(), Duration::from_secs(10));
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let manifest = NodeConfigManifest::default();
        let yaml = serde_yaml::to_string(&manifest).unwrap();
        let parsed = NodeConfigManifest::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.spec.api.port, manifest.spec.api.port);
        assert_eq!(parsed.spec.node_token, manifest.spec.node_token);
    }

    #[test]
    fn test_env_overrides() {
        let mut manifest = NodeConfigManifest::default();
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9000"),
            ("SFTP_PORT", "not-a-port"),
            ("CORE_URL", "http://10.0.0.2:8080"),
            ("NODE_TOKEN", "abc"),
            ("ATLAS_DATA_PATH", "/data"),
            ("DOCKER_HOST", "unix:///run/docker.sock"),
        ]);
        manifest.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(manifest.spec.api.port, 9000);
        assert_eq!(manifest.spec.sftp.port, 2022);
        assert_eq!(manifest.spec.control_plane.url, "http://10.0.0.2:8080");
        assert!(manifest.spec.node_token.matches("abc"));
        assert_eq!(manifest.spec.storage.data_root, PathBuf::from("/data"));
        assert_eq!(
            manifest.spec.runtime.docker_socket_path.as_deref(),
            Some("/run/docker.sock")
        );
    }

    #[test]
    fn test_validation() {
        let mut manifest = NodeConfigManifest::default();

        // Valid default should pass
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.spec.sftp.port = manifest.spec.api.port;
        assert!(manifest.validate().is_err());
        manifest.spec.sftp.enabled = false;
        assert!(manifest.validate().is_ok());

        manifest.spec.control_plane.url = "ftp://panel".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.control_plane.url = default_core_url();

        manifest.spec.storage.data_root = PathBuf::from("relative/dir");
        assert!(manifest.validate().is_err());
        manifest.spec.storage.data_root = default_data_root();

        manifest.spec.node_token = NodeToken::new("");
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_token_matching() {
        let token = NodeToken::new("abc123");
        assert!(token.matches("abc123"));
        assert!(!token.matches("abc12"));
        assert!(!token.matches(""));
        assert!(!NodeToken::new("").matches(""));
        assert_eq!(format!("{:?}", token), "NodeToken(***)");
    }
}
