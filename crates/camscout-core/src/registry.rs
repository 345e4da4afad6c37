//! Shared device registry
//!
//! The registry is the only mutable state shared between discovery and the
//! status checker. Every mutation goes through the registry's write lock, so
//! concurrent writers are serialized and cannot lose each other's updates.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::device::RegisteredDevice;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Device not found: {0}")]
    NotFound(String),
    #[error("Device already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid device name: {0:?}")]
    InvalidName(String),
    #[error("Endpoint reference of {name} cannot change from {old} to {new}")]
    IdentityChanged {
        name: String,
        old: String,
        new: String,
    },
}

/// Registry change notification
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    DeviceAdded(RegisteredDevice),
    DeviceUpdated(RegisteredDevice),
    DeviceRemoved(String),
}

/// Cheaply cloneable handle to the shared registry
#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, RegisteredDevice>>>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Subscribe to registry change events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of all devices, sorted by name
    pub async fn devices(&self) -> Vec<RegisteredDevice> {
        let mut devices: Vec<RegisteredDevice> =
            self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        devices
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    pub async fn get_device(&self, name: &str) -> Result<RegisteredDevice, RegistryError> {
        self.devices
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub async fn add_device(&self, device: RegisteredDevice) -> Result<(), RegistryError> {
        if device.name.trim().is_empty() {
            return Err(RegistryError::InvalidName(device.name));
        }

        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.name) {
            return Err(RegistryError::AlreadyExists(device.name));
        }

        info!(device = %device.name, address = ?device.protocol.address, "Device added to registry");
        devices.insert(device.name.clone(), device.clone());
        let _ = self.event_tx.send(RegistryEvent::DeviceAdded(device));
        Ok(())
    }

    pub async fn remove_device(&self, name: &str) -> Result<RegisteredDevice, RegistryError> {
        let mut devices = self.devices.write().await;
        match devices.remove(name) {
            Some(device) => {
                info!(device = %name, "Device removed from registry");
                let _ = self.event_tx.send(RegistryEvent::DeviceRemoved(name.to_string()));
                Ok(device)
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    /// Locked read-modify-write of a single device.
    ///
    /// `update` runs against a copy of the current device while the write
    /// lock is held and reports whether it changed anything. The copy is only
    /// stored (and an event only sent) when it did. The device name and an
    /// already-set endpoint reference may not be changed.
    ///
    /// Returns whether the device was persisted.
    pub async fn update_with<F>(&self, name: &str, update: F) -> Result<bool, RegistryError>
    where
        F: FnOnce(&mut RegisteredDevice) -> bool,
    {
        let mut devices = self.devices.write().await;
        let current = devices
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let mut candidate = current.clone();
        if !update(&mut candidate) {
            return Ok(false);
        }

        if candidate.name != current.name {
            return Err(RegistryError::InvalidName(candidate.name));
        }
        if let Some(old) = current.endpoint_ref() {
            if candidate.endpoint_ref() != Some(old) {
                return Err(RegistryError::IdentityChanged {
                    name: name.to_string(),
                    old: old.to_string(),
                    new: candidate.endpoint_ref().unwrap_or_default().to_string(),
                });
            }
        }

        debug!(device = %name, "Device updated");
        devices.insert(name.to_string(), candidate.clone());
        let _ = self.event_tx.send(RegistryEvent::DeviceUpdated(candidate));
        Ok(true)
    }
}
