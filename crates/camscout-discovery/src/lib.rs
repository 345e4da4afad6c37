//! camscout discovery - finding cameras and tracking their connectivity
//!
//! Discovery combines two sources:
//! - Subnet probing: unicast probes to every host of the configured subnets
//! - WS-Discovery multicast: a probe round on every viable interface
//!
//! Results are reconciled against the registry by endpoint reference. A
//! periodic task classifies every registered device into a connectivity tier.

pub mod multicast;
pub mod netscan;
pub mod reconcile;
pub mod scanner;
pub mod status;
pub mod subnet;
pub mod wsd;

pub use multicast::{parse_responses, MulticastDiscoverer, MulticastResponse};
pub use netscan::{
    collect, NetworkProtocol, ProbeOutcome, ProbeProtocol, ProbeResult, ScanParams, ScanTarget,
    SubnetProber,
};
pub use reconcile::{dedupe_batch, DiscoveryReconciler, Reconciliation, Refresh};
pub use scanner::{device_name, DiscoveryMode, DiscoveryScanner, ScannerConfig, StatusTask};
pub use status::{clamp_interval, ConnectivityClassifier, MAX_STATUS_INTERVAL};
pub use subnet::{clamp_min_prefix_len, expand_targets, SubnetError};
pub use wsd::{DescriptorError, OnvifProbeProtocol};
