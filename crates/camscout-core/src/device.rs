//! Registered device types tracked by the registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv6Addr;

/// Connectivity tier of a device, ordered from weakest to strongest.
///
/// Recomputed from scratch on every status cycle, so a device may move in
/// either direction between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// Nothing answers at the configured address and port
    Unreachable,
    /// A plain TCP connect succeeds but no management session can be made
    Reachable,
    /// Unauthenticated management calls succeed, authenticated ones fail
    UpWithoutAuth,
    /// Authenticated management calls succeed
    UpWithAuth,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable => "Unreachable",
            Self::Reachable => "Reachable",
            Self::UpWithoutAuth => "UpWithoutAuth",
            Self::UpWithAuth => "UpWithAuth",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol properties of a registered device.
///
/// Known keys are typed fields; anything else lands in `extra` so that
/// properties written by newer tooling survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolProperties {
    /// Host name or IPv4 address of the management endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Management port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Last computed connectivity tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConnectivityState>,
    /// When the device last answered at any tier above Unreachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// WS-Discovery endpoint reference (without the `urn:uuid:` prefix)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Unknown keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// A device known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredDevice {
    /// Unique registry key
    pub name: String,
    /// Protocol properties
    #[serde(default)]
    pub protocol: ProtocolProperties,
}

impl RegisteredDevice {
    /// Create a device with an address and port and nothing else
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            protocol: ProtocolProperties {
                address: Some(address.into()),
                port: Some(port),
                ..Default::default()
            },
        }
    }

    /// Builder-style setter for the endpoint reference
    pub fn with_endpoint_ref(mut self, endpoint_ref: impl Into<String>) -> Self {
        self.protocol.endpoint_ref = Some(endpoint_ref.into());
        self
    }

    /// Endpoint reference, treating an empty string as absent
    pub fn endpoint_ref(&self) -> Option<&str> {
        self.protocol
            .endpoint_ref
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    pub fn address(&self) -> Option<&str> {
        self.protocol.address.as_deref().filter(|a| !a.is_empty())
    }

    pub fn port(&self) -> Option<u16> {
        self.protocol.port
    }

    /// `address:port`, if both are known. IPv6 literals are bracketed so
    /// the result works both as a socket address and a URL authority.
    pub fn socket_addr_string(&self) -> Option<String> {
        match (self.address(), self.port()) {
            (Some(address), Some(port)) if address.parse::<Ipv6Addr>().is_ok() => {
                Some(format!("[{}]:{}", address, port))
            }
            (Some(address), Some(port)) => Some(format!("{}:{}", address, port)),
            _ => None,
        }
    }

    /// Stored connectivity tier, if the device has been classified yet
    pub fn status(&self) -> Option<ConnectivityState> {
        self.protocol.status
    }

    /// Record a freshly computed tier.
    ///
    /// The status is only written when it differs from the stored one, and
    /// `last_seen` is refreshed for every tier above Unreachable. Returns
    /// whether anything changed.
    pub fn apply_status(&mut self, status: ConnectivityState, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        if self.protocol.status != Some(status) {
            self.protocol.status = Some(status);
            changed = true;
        }

        if status != ConnectivityState::Unreachable {
            self.protocol.last_seen = Some(now);
            changed = true;
        }

        changed
    }

    /// Point the device at the address and port it was rediscovered at
    pub fn relocate(&mut self, address: &str, port: u16, now: DateTime<Utc>) {
        self.protocol.address = Some(address.to_string());
        self.protocol.port = Some(port);
        self.protocol.last_seen = Some(now);
    }
}
