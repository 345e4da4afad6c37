//! Application state management

use anyhow::Result;
use camscout_core::{DeviceDescriptor, DeviceRegistry, RegistryEvent};
use camscout_discovery::DiscoveryScanner;
use camscout_mgmt::{ManagementClient, OnvifClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Discovery scanner and status checker
    pub scanner: Arc<DiscoveryScanner>,
    /// Device registry shared with the scanner
    pub registry: DeviceRegistry,
    /// Configuration
    pub config: Config,
    /// Serializes discovery runs
    discovery_lock: Mutex<()>,
}

impl AppState {
    /// Create new application state with the ONVIF management client
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let credentials = Arc::new(config.credential_store());
        let client = OnvifClient::new(
            credentials,
            Duration::from_secs(config.status.request_timeout_secs),
        )?;
        Self::with_client(config, Arc::new(client)).await
    }

    pub async fn with_client(
        config: Config,
        client: Arc<dyn ManagementClient>,
    ) -> Result<Arc<Self>> {
        let registry = DeviceRegistry::new();
        for device in config.seed_devices() {
            let name = device.name.clone();
            if let Err(e) = registry.add_device(device).await {
                warn!(device = %name, error = %e, "Skipping configured device");
            }
        }
        info!(devices = registry.len().await, "Registry initialized");

        let scanner = Arc::new(DiscoveryScanner::new(
            config.to_scanner_config(),
            registry.clone(),
            client,
        ));

        Ok(Arc::new(Self {
            scanner,
            registry,
            config,
            discovery_lock: Mutex::new(()),
        }))
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Run one discovery pass with the configured parameters.
    ///
    /// A run requested while another is in progress waits for it to finish.
    pub async fn discover(&self) -> Vec<DeviceDescriptor> {
        let _guard = self.discovery_lock.lock().await;
        let params = self.config.to_scan_params();
        let deadline = Instant::now() + Duration::from_secs(self.config.discovery.deadline_secs);
        self.scanner.discover(&params, deadline).await
    }
}
