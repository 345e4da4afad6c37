//! Tiered connectivity classification

use camscout_core::{ConnectivityState, DeviceRegistry, RegisteredDevice, RegistryError};
use camscout_mgmt::ManagementClient;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Upper bound for the status check interval
pub const MAX_STATUS_INTERVAL: Duration = Duration::from_secs(300);

/// Clamp a requested check interval to `(0, MAX_STATUS_INTERVAL]`
pub fn clamp_interval(requested: Duration) -> Duration {
    if requested > MAX_STATUS_INTERVAL {
        warn!(
            requested_secs = requested.as_secs(),
            max_secs = MAX_STATUS_INTERVAL.as_secs(),
            "Status check interval too large, using maximum"
        );
        MAX_STATUS_INTERVAL
    } else if requested.is_zero() {
        warn!("Status check interval of zero, using 1s");
        Duration::from_secs(1)
    } else {
        requested
    }
}

/// Classifies registered devices into connectivity tiers
#[derive(Clone)]
pub struct ConnectivityClassifier {
    registry: DeviceRegistry,
    client: Arc<dyn ManagementClient>,
    control_plane: String,
    probe_timeout: Duration,
}

impl ConnectivityClassifier {
    pub fn new(
        registry: DeviceRegistry,
        client: Arc<dyn ManagementClient>,
        control_plane: impl Into<String>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            control_plane: control_plane.into(),
            probe_timeout,
        }
    }

    /// Classify every registered device except the control plane, one task
    /// per device. Returns the number of devices checked once all are done.
    pub async fn check_statuses(&self) -> usize {
        let devices: Vec<RegisteredDevice> = self
            .registry
            .devices()
            .await
            .into_iter()
            .filter(|d| d.name != self.control_plane)
            .collect();

        if devices.is_empty() {
            debug!("No devices to check");
            return 0;
        }

        let count = devices.len();
        let mut tasks = JoinSet::new();
        for device in devices {
            let classifier = self.clone();
            tasks.spawn(async move {
                let status = classifier.classify(&device).await;
                classifier.update_device_status(&device.name, status).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Status check task failed");
            }
        }

        debug!(devices = count, "Status check cycle complete");
        count
    }

    /// Strongest tier the device currently reaches
    pub async fn classify(&self, device: &RegisteredDevice) -> ConnectivityState {
        match self.client.get_capabilities(device).await {
            Ok(_) => match self.client.get_device_information(device).await {
                Ok(_) => ConnectivityState::UpWithAuth,
                Err(e) => {
                    debug!(device = %device.name, error = %e, "Authenticated call failed");
                    ConnectivityState::UpWithoutAuth
                }
            },
            Err(e) => {
                debug!(device = %device.name, error = %e, "No management session");
                if self.tcp_probe(device).await {
                    ConnectivityState::Reachable
                } else {
                    ConnectivityState::Unreachable
                }
            }
        }
    }

    async fn tcp_probe(&self, device: &RegisteredDevice) -> bool {
        let Some(addr) = device.socket_addr_string() else {
            debug!(device = %device.name, "No address to probe");
            return false;
        };
        match timeout(self.probe_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(device = %device.name, addr = %addr, error = %e, "TCP probe failed");
                false
            }
            Err(_) => {
                debug!(device = %device.name, addr = %addr, "TCP probe timed out");
                false
            }
        }
    }

    /// Write a freshly computed tier under the registry lock
    pub async fn update_device_status(&self, name: &str, status: ConnectivityState) {
        let now = Utc::now();
        let mut previous = None;
        let result = self
            .registry
            .update_with(name, |device| {
                previous = device.status();
                device.apply_status(status, now)
            })
            .await;

        match result {
            Ok(_) if previous != Some(status) => {
                info!(
                    device = %name,
                    old = previous.map(|s| s.as_str()).unwrap_or("none"),
                    new = %status,
                    "Device status changed"
                );
            }
            Ok(_) => {}
            Err(RegistryError::NotFound(_)) => {
                debug!(device = %name, "Device removed during status check");
            }
            Err(e) => warn!(device = %name, error = %e, "Failed to update device status"),
        }
    }
}
