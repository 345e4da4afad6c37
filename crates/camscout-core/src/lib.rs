//! camscout core - device model and registry
//!
//! This crate provides the foundational types shared by the camscout crates:
//! - Registered devices with typed protocol properties and connectivity tiers
//! - Device descriptors parsed from WS-Discovery responses
//! - The shared device registry with serialized read-modify-write updates

pub mod descriptor;
pub mod device;
pub mod registry;

pub use descriptor::{DeviceDescriptor, VendorMetadata};
pub use device::{ConnectivityState, ProtocolProperties, RegisteredDevice};
pub use registry::{DeviceRegistry, RegistryError, RegistryEvent};
