//! Credential lookup for authenticated management calls

use camscout_core::RegisteredDevice;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Source of credentials for a device.
///
/// Devices that are still being registered have no registry name yet, so
/// stores should also match on the endpoint reference.
pub trait CredentialStore: Send + Sync {
    fn credentials_for(&self, device: &RegisteredDevice) -> Option<Credentials>;
}

/// Fixed credentials: per-device overrides with an optional fallback
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    default: Option<Credentials>,
    per_device: HashMap<String, Credentials>,
    per_endpoint: HashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new(default: Option<Credentials>) -> Self {
        Self {
            default,
            per_device: HashMap::new(),
            per_endpoint: HashMap::new(),
        }
    }

    pub fn with_device(mut self, name: impl Into<String>, credentials: Credentials) -> Self {
        self.per_device.insert(name.into(), credentials);
        self
    }

    pub fn with_endpoint(
        mut self,
        endpoint_ref: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        self.per_endpoint.insert(endpoint_ref.into(), credentials);
        self
    }
}

impl CredentialStore for StaticCredentials {
    /// Registry name first, then endpoint reference, then the default
    fn credentials_for(&self, device: &RegisteredDevice) -> Option<Credentials> {
        self.per_device
            .get(&device.name)
            .or_else(|| {
                device
                    .endpoint_ref()
                    .and_then(|id| self.per_endpoint.get(id))
            })
            .or(self.default.as_ref())
            .cloned()
    }
}
