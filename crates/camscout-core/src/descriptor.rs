//! Device descriptors produced by discovery

use serde::{Deserialize, Serialize};

/// Vendor metadata decoded from ONVIF scope URIs
/// (`onvif://www.onvif.org/<key>/<value>`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorMetadata {
    pub name: Option<String>,
    pub hardware: Option<String>,
    pub location: Option<String>,
    pub mac: Option<String>,
}

impl VendorMetadata {
    /// Decode the well-known ONVIF scope keys, ignoring everything else
    pub fn from_scopes<S: AsRef<str>>(scopes: &[S]) -> Self {
        let mut metadata = Self::default();

        for scope in scopes {
            let Some(rest) = scope.as_ref().strip_prefix("onvif://www.onvif.org/") else {
                continue;
            };
            let Some((key, value)) = rest.split_once('/') else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let value = Some(percent_decode(value));
            match key {
                "name" => metadata.name = value,
                "hardware" => metadata.hardware = value,
                "location" => metadata.location = value,
                "MAC" | "mac" => metadata.mac = value,
                _ => {}
            }
        }

        metadata
    }
}

/// A device found by a discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// WS-Discovery endpoint reference, without the `urn:uuid:` prefix.
    /// Stable across address and port changes when present.
    pub endpoint_ref: Option<String>,
    /// Host taken from the first advertised XAddr (or the probed address)
    pub address: String,
    /// Port taken from the first advertised XAddr (or the probed port)
    pub port: u16,
    /// All advertised transport addresses
    #[serde(default)]
    pub xaddrs: Vec<String>,
    /// Advertised types, e.g. `dn:NetworkVideoTransmitter`
    #[serde(default)]
    pub types: Vec<String>,
    /// Raw scope URIs
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub metadata: VendorMetadata,
}

impl DeviceDescriptor {
    /// A descriptor that only knows where a device answered
    pub fn from_address(address: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint_ref: None,
            address: address.into(),
            port,
            xaddrs: Vec::new(),
            types: Vec::new(),
            scopes: Vec::new(),
            metadata: VendorMetadata::default(),
        }
    }

    /// Endpoint reference, treating an empty string as absent
    pub fn endpoint_ref(&self) -> Option<&str> {
        self.endpoint_ref.as_deref().filter(|id| !id.is_empty())
    }
}

/// Decode `%XX` escapes; malformed escapes are kept as written
fn percent_decode(value: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(value.as_bytes())).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_from_scopes() {
        let scopes = [
            "onvif://www.onvif.org/type/video_encoder",
            "onvif://www.onvif.org/name/Front%20Door",
            "onvif://www.onvif.org/hardware/IPC-HDW",
            "onvif://www.onvif.org/location/country/japan",
            "onvif://www.onvif.org/MAC/aa:bb:cc:dd:ee:ff",
            "http://example.com/other",
        ];
        let metadata = VendorMetadata::from_scopes(&scopes);
        assert_eq!(metadata.name.as_deref(), Some("Front Door"));
        assert_eq!(metadata.hardware.as_deref(), Some("IPC-HDW"));
        assert_eq!(metadata.location.as_deref(), Some("country/japan"));
        assert_eq!(metadata.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_percent_decode_keeps_malformed_escapes() {
        assert_eq!(percent_decode("a%2"), "a%2");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a%zzb"), "a%zzb");
        assert_eq!(percent_decode("Caf%C3%A9%20Door"), "Café Door");
    }
}
