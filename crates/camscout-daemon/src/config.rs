//! Configuration loading and validation

use anyhow::Result;
use camscout_core::RegisteredDevice;
use camscout_discovery::netscan::{
    DEFAULT_CONCURRENCY, DEFAULT_MIN_PREFIX_LEN, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_RUN_DEADLINE_SECS,
};
use camscout_discovery::wsd::WSD_PORT;
use camscout_discovery::{
    clamp_min_prefix_len, DiscoveryMode, NetworkProtocol, ScanParams, ScannerConfig,
};
use camscout_mgmt::{Credentials, StaticCredentials, DEFAULT_REQUEST_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Statically configured devices
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Registry name of this service; never probed or matched
    #[serde(default = "default_control_plane")]
    pub control_plane: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            control_plane: default_control_plane(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_control_plane() -> String {
    "camscout".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub mode: DiscoveryMode,
    /// CIDR subnets to scan; empty scans the local interface networks
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_protocol")]
    pub protocol: NetworkProtocol,
    #[serde(default = "default_concurrency")]
    pub concurrency_limit: usize,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Subnets with a shorter prefix are narrowed to this length
    #[serde(default = "default_min_prefix_len")]
    pub min_prefix_len: u8,
    /// Deadline for a whole discovery run
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    #[serde(default = "default_multicast_read_timeout")]
    pub multicast_read_timeout_ms: u64,
    /// Periodic discovery interval in seconds (0 = on demand only)
    #[serde(default)]
    pub interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            subnets: Vec::new(),
            ports: default_ports(),
            protocol: default_protocol(),
            concurrency_limit: default_concurrency(),
            probe_timeout_ms: default_probe_timeout(),
            min_prefix_len: default_min_prefix_len(),
            deadline_secs: default_deadline(),
            multicast_read_timeout_ms: default_multicast_read_timeout(),
            interval_secs: 0,
        }
    }
}

fn default_ports() -> Vec<u16> {
    vec![WSD_PORT]
}

fn default_protocol() -> NetworkProtocol {
    NetworkProtocol::Udp
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_min_prefix_len() -> u8 {
    DEFAULT_MIN_PREFIX_LEN
}

fn default_deadline() -> u64 {
    DEFAULT_RUN_DEADLINE_SECS
}

fn default_multicast_read_timeout() -> u64 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Run the periodic status check
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Check interval in seconds, capped at 300
    #[serde(default = "default_status_interval")]
    pub interval_secs: u64,
    /// TCP connect timeout for the reachability tier
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Per-request timeout for management calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_status_interval(),
            probe_timeout_ms: default_probe_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_status_interval() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Credentials for authenticated management calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Per-device overrides
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceCredentialsConfig>,
}

/// Credentials for one device, matched by registry name or by endpoint
/// reference (the latter also applies while a device is being registered)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCredentialsConfig {
    pub name: Option<String>,
    pub endpoint_ref: Option<String>,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_device_port")]
    pub port: u16,
    pub endpoint_ref: Option<String>,
}

fn default_device_port() -> u16 {
    80
}

impl Config {
    /// Scan parameters for one discovery run
    pub fn to_scan_params(&self) -> ScanParams {
        ScanParams {
            subnets: self.discovery.subnets.clone(),
            concurrency_limit: self.discovery.concurrency_limit,
            probe_timeout_ms: self.discovery.probe_timeout_ms,
            ports: self.discovery.ports.clone(),
            protocol: self.discovery.protocol,
            min_prefix_len: self.discovery.min_prefix_len,
        }
    }

    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            mode: self.discovery.mode,
            control_plane: self.daemon.control_plane.clone(),
            multicast_read_timeout_ms: self.discovery.multicast_read_timeout_ms,
            status_probe_timeout_ms: self.status.probe_timeout_ms,
        }
    }

    pub fn credential_store(&self) -> StaticCredentials {
        let default = match (&self.credentials.username, &self.credentials.password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            (Some(_), None) | (None, Some(_)) => {
                warn!("Default credentials need both username and password, ignoring");
                None
            }
            (None, None) => None,
        };

        self.credentials
            .devices
            .iter()
            .fold(StaticCredentials::new(default), |store, d| {
                let credentials = Credentials::new(&d.username, &d.password);
                match (&d.name, &d.endpoint_ref) {
                    (Some(name), Some(id)) => store
                        .with_device(name, credentials.clone())
                        .with_endpoint(id, credentials),
                    (Some(name), None) => store.with_device(name, credentials),
                    (None, Some(id)) => store.with_endpoint(id, credentials),
                    (None, None) => {
                        warn!(
                            username = %d.username,
                            "Device credentials need a name or endpoint_ref, ignoring"
                        );
                        store
                    }
                }
            })
    }

    /// Registry entries for the statically configured devices
    pub fn seed_devices(&self) -> Vec<RegisteredDevice> {
        self.devices
            .iter()
            .map(|d| {
                let device = RegisteredDevice::new(&d.name, &d.address, d.port);
                match &d.endpoint_ref {
                    Some(id) => device.with_endpoint_ref(id),
                    None => device,
                }
            })
            .collect()
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.discovery.min_prefix_len = clamp_min_prefix_len(config.discovery.min_prefix_len);
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
