//! Reconciling discovered devices against the registry

use camscout_core::{DeviceDescriptor, RegisteredDevice};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A known device seen again, possibly at a new address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh {
    /// Registry name of the known device
    pub name: String,
    pub descriptor: DeviceDescriptor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Descriptors with no matching registry entry, in discovery order
    pub new_devices: Vec<DeviceDescriptor>,
    /// Known devices whose address or port changed
    pub refreshed: Vec<Refresh>,
}

/// Splits a discovery batch into new and already-known devices, keyed on
/// the endpoint reference
#[derive(Debug, Clone)]
pub struct DiscoveryReconciler {
    control_plane: String,
}

impl DiscoveryReconciler {
    pub fn new(control_plane: impl Into<String>) -> Self {
        Self {
            control_plane: control_plane.into(),
        }
    }

    pub fn reconcile(
        &self,
        descriptors: Vec<DeviceDescriptor>,
        registry: &[RegisteredDevice],
    ) -> Reconciliation {
        let index: HashMap<&str, &RegisteredDevice> = registry
            .iter()
            .filter(|d| d.name != self.control_plane)
            .filter_map(|d| d.endpoint_ref().map(|id| (id, d)))
            .collect();

        let mut result = Reconciliation::default();
        for descriptor in descriptors {
            let known = descriptor.endpoint_ref().and_then(|id| index.get(id));
            match known {
                None => result.new_devices.push(descriptor),
                Some(device) => {
                    let moved = device.address() != Some(descriptor.address.as_str())
                        || device.port() != Some(descriptor.port);
                    if moved {
                        debug!(
                            device = %device.name,
                            address = %descriptor.address,
                            port = descriptor.port,
                            "Known device answered at a new address"
                        );
                        result.refreshed.push(Refresh {
                            name: device.name.clone(),
                            descriptor,
                        });
                    }
                }
            }
        }

        result
    }
}

/// Collapse duplicates within one batch, keeping the first occurrence.
/// Descriptors without an endpoint reference are keyed by address and port.
pub fn dedupe_batch(descriptors: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter(|d| {
            let key = match d.endpoint_ref() {
                Some(id) => format!("id:{}", id),
                None => format!("addr:{}:{}", d.address, d.port),
            };
            seen.insert(key)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, address: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            endpoint_ref: Some(id.to_string()),
            ..DeviceDescriptor::from_address(address, 80)
        }
    }

    fn registry() -> Vec<RegisteredDevice> {
        vec![
            RegisteredDevice::new("camscout", "10.0.0.1", 80).with_endpoint_ref("abc"),
            RegisteredDevice::new("cam-123", "10.0.0.10", 80).with_endpoint_ref("123"),
            RegisteredDevice::new("cam-456", "10.0.0.11", 80).with_endpoint_ref("456"),
            RegisteredDevice::new("cam-789", "10.0.0.12", 80).with_endpoint_ref("789"),
        ]
    }

    #[test]
    fn test_only_unknown_ids_are_new() {
        let batch = vec![
            descriptor("123", "10.0.0.10"),
            descriptor("456", "10.0.0.11"),
            descriptor("789", "10.0.0.12"),
            descriptor("xyz", "10.0.0.20"),
            descriptor("def", "10.0.0.21"),
        ];
        let result = DiscoveryReconciler::new("camscout").reconcile(batch, &registry());

        let ids: Vec<_> = result
            .new_devices
            .iter()
            .filter_map(|d| d.endpoint_ref())
            .collect();
        assert_eq!(ids, vec!["xyz", "def"]);
        assert!(result.refreshed.is_empty());
    }

    #[test]
    fn test_control_plane_is_not_indexed() {
        let batch = vec![descriptor("abc", "10.0.0.1")];
        let result = DiscoveryReconciler::new("camscout").reconcile(batch, &registry());
        assert_eq!(result.new_devices.len(), 1);
    }

    #[test]
    fn test_devices_without_id_never_match() {
        let registry = vec![
            RegisteredDevice::new("no-id", "10.0.0.10", 80),
            RegisteredDevice::new("empty-id", "10.0.0.11", 80).with_endpoint_ref(""),
        ];
        let batch = vec![descriptor("", "10.0.0.11"), descriptor("123", "10.0.0.10")];
        let result = DiscoveryReconciler::new("camscout").reconcile(batch, &registry);
        assert_eq!(result.new_devices.len(), 2);
    }

    #[test]
    fn test_moved_device_is_refresh_candidate() {
        let batch = vec![descriptor("456", "10.0.0.99")];
        let result = DiscoveryReconciler::new("camscout").reconcile(batch, &registry());
        assert!(result.new_devices.is_empty());
        assert_eq!(result.refreshed.len(), 1);
        assert_eq!(result.refreshed[0].name, "cam-456");
        assert_eq!(result.refreshed[0].descriptor.address, "10.0.0.99");
    }

    #[test]
    fn test_dedupe_batch_keeps_first() {
        let batch = vec![
            descriptor("123", "10.0.0.10"),
            DeviceDescriptor::from_address("10.0.0.30", 80),
            descriptor("123", "10.0.0.99"),
            DeviceDescriptor::from_address("10.0.0.30", 80),
            descriptor("456", "10.0.0.11"),
        ];
        let deduped = dedupe_batch(batch);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0].address, "10.0.0.10");
        assert_eq!(deduped[2].endpoint_ref(), Some("456"));
    }
}
