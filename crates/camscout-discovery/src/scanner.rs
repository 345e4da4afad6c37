//! Discovery scanner that combines all discovery methods

use camscout_core::{DeviceDescriptor, DeviceRegistry, RegisteredDevice, RegistryError};
use camscout_mgmt::{DeviceInformation, ManagementClient};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::multicast::MulticastDiscoverer;
use crate::netscan::{collect, ScanParams, SubnetProber};
use crate::reconcile::{dedupe_batch, DiscoveryReconciler};
use crate::status::{clamp_interval, ConnectivityClassifier};
use crate::wsd::OnvifProbeProtocol;

/// Which discovery sources contribute to a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    Netscan,
    Multicast,
    #[default]
    Both,
}

impl DiscoveryMode {
    pub fn netscan(&self) -> bool {
        matches!(self, Self::Netscan | Self::Both)
    }

    pub fn multicast(&self) -> bool {
        matches!(self, Self::Multicast | Self::Both)
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub mode: DiscoveryMode,
    /// Registry name of this service itself; never probed or matched
    pub control_plane: String,
    /// How long a multicast round collects responses
    pub multicast_read_timeout_ms: u64,
    /// TCP connect timeout used by the status check
    pub status_probe_timeout_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::Both,
            control_plane: "camscout".to_string(),
            multicast_read_timeout_ms: 3000,
            status_probe_timeout_ms: 2000,
        }
    }
}

/// Handle to the periodic status task
pub struct StatusTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl StatusTask {
    /// Ask the loop to stop and wait until it has exited
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Status task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Discovery and status orchestration over a shared registry
pub struct DiscoveryScanner {
    config: ScannerConfig,
    registry: DeviceRegistry,
    client: Arc<dyn ManagementClient>,
    prober: SubnetProber,
    multicast: MulticastDiscoverer,
    reconciler: DiscoveryReconciler,
    classifier: ConnectivityClassifier,
}

impl DiscoveryScanner {
    pub fn new(
        config: ScannerConfig,
        registry: DeviceRegistry,
        client: Arc<dyn ManagementClient>,
    ) -> Self {
        let classifier = ConnectivityClassifier::new(
            registry.clone(),
            client.clone(),
            config.control_plane.clone(),
            Duration::from_millis(config.status_probe_timeout_ms),
        );
        Self {
            prober: SubnetProber::new(Arc::new(OnvifProbeProtocol)),
            multicast: MulticastDiscoverer::new(Duration::from_millis(
                config.multicast_read_timeout_ms,
            )),
            reconciler: DiscoveryReconciler::new(config.control_plane.clone()),
            classifier,
            config,
            registry,
            client,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Run one discovery pass and register what is new.
    ///
    /// Returns the descriptors that were added to the registry. Known devices
    /// found at a new address are relocated instead.
    pub async fn discover(&self, params: &ScanParams, deadline: Instant) -> Vec<DeviceDescriptor> {
        let mode = self.config.mode;
        info!(mode = ?mode, "Discovery run started");

        let netscan = async {
            if mode.netscan() {
                collect(self.prober.execute(params, deadline)).await
            } else {
                Vec::new()
            }
        };
        let multicast = async {
            if !mode.multicast() {
                return Vec::new();
            }
            match self.multicast.discover(deadline).await {
                Ok(found) => found,
                Err(e) => {
                    error!(error = %e, "Multicast discovery failed");
                    Vec::new()
                }
            }
        };

        let (mut found, multicast_found) = tokio::join!(netscan, multicast);
        found.extend(multicast_found);
        let total = found.len();

        let snapshot = self.registry.devices().await;
        let reconciliation = self.reconciler.reconcile(dedupe_batch(found), &snapshot);

        let now = Utc::now();
        for refresh in reconciliation.refreshed {
            let address = refresh.descriptor.address.clone();
            let port = refresh.descriptor.port;
            let result = self
                .registry
                .update_with(&refresh.name, |device| {
                    device.relocate(&address, port, now);
                    true
                })
                .await;
            match result {
                Ok(_) => info!(device = %refresh.name, address = %address, port, "Device moved"),
                Err(e) => warn!(device = %refresh.name, error = %e, "Failed to relocate device"),
            }
        }

        let mut added = Vec::new();
        for descriptor in reconciliation.new_devices {
            match self.register(&descriptor).await {
                Ok(device) => {
                    info!(device = %device.name, address = %descriptor.address, "New device registered");
                    added.push(descriptor);
                }
                Err(RegistryError::AlreadyExists(name)) => {
                    debug!(device = %name, "Device name already registered, skipping")
                }
                Err(e) => warn!(error = %e, "Failed to register device"),
            }
        }

        info!(found = total, added = added.len(), "Discovery run finished");
        added
    }

    async fn register(&self, descriptor: &DeviceDescriptor) -> Result<RegisteredDevice, RegistryError> {
        // Not registered yet; credential stores match it by endpoint reference
        let mut pending = RegisteredDevice::new(
            descriptor.endpoint_ref().unwrap_or(&descriptor.address),
            &descriptor.address,
            descriptor.port,
        );
        pending.protocol.endpoint_ref = descriptor.endpoint_ref().map(str::to_string);
        let info = match self.client.get_device_information(&pending).await {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(address = %descriptor.address, error = %e, "Device information unavailable");
                None
            }
        };

        let mut device = RegisteredDevice::new(
            device_name(descriptor, info.as_ref()),
            &descriptor.address,
            descriptor.port,
        );
        device.protocol.endpoint_ref = descriptor.endpoint_ref().map(str::to_string);
        device.protocol.mac_address = descriptor.metadata.mac.clone();
        device.protocol.serial_number = info.and_then(|i| i.serial_number);
        device.protocol.last_seen = Some(Utc::now());

        self.registry.add_device(device.clone()).await?;
        Ok(device)
    }

    /// Run one classification cycle now
    pub async fn check_statuses(&self) -> usize {
        self.classifier.check_statuses().await
    }

    /// Start the periodic status check loop
    pub fn spawn_status_task(&self, interval: Duration) -> StatusTask {
        let interval = clamp_interval(interval);
        let classifier = self.classifier.clone();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Status task started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        classifier.check_statuses().await;
                    }
                }
            }
            info!("Status task stopped");
        });

        StatusTask { stop_tx, handle }
    }
}

/// Registry name for a newly discovered device
pub fn device_name(descriptor: &DeviceDescriptor, info: Option<&DeviceInformation>) -> String {
    let suffix = match descriptor.endpoint_ref() {
        Some(id) => id.to_string(),
        None => format!("{}_{}", descriptor.address, descriptor.port),
    };

    let reported = info.and_then(|i| Some((i.manufacturer.as_deref()?, i.model.as_deref()?)));
    let advertised = descriptor
        .metadata
        .name
        .as_deref()
        .zip(descriptor.metadata.hardware.as_deref());

    let name = match reported.or(advertised) {
        Some((vendor, model)) => format!("{}-{}-{}", vendor, model, suffix),
        None => format!("unknown_unknown_{}", suffix),
    };

    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
