//! Subnet expansion and interface selection

use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::{IpNetwork, Ipv4Network};
use regex::Regex;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::netscan::{ScanParams, ScanTarget};

/// Interface names created by container and VM tooling
const VIRTUAL_INTERFACE_PATTERN: &str =
    r"(br-[a-z0-9]{12}|vmnet[0-9]+|virbr[0-9]+|vnet[0-9]+|veth[0-9a-f]{7}|docker[0-9]+)";

/// Smallest accepted prefix floor; a /16 caps one subnet at 65534 hosts
pub const MIN_PREFIX_FLOOR: u8 = 16;
pub const MAX_PREFIX_FLOOR: u8 = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubnetError {
    #[error("Invalid subnet {subnet:?}: {reason}")]
    Invalid { subnet: String, reason: String },
}

/// Parse a CIDR string and apply the prefix floor: with a floor of 24, a /16
/// becomes the /24 containing its address
pub fn parse_subnet(subnet: &str, min_prefix_len: u8) -> Result<Ipv4Network, SubnetError> {
    let network: Ipv4Network = subnet.trim().parse().map_err(|e| SubnetError::Invalid {
        subnet: subnet.to_string(),
        reason: format!("{}", e),
    })?;
    widen(network, min_prefix_len).map_err(|reason| SubnetError::Invalid {
        subnet: subnet.to_string(),
        reason,
    })
}

fn widen(network: Ipv4Network, min_prefix_len: u8) -> Result<Ipv4Network, String> {
    let network = if network.prefix() < min_prefix_len {
        Ipv4Network::new(network.ip(), min_prefix_len).map_err(|e| format!("{}", e))?
    } else {
        network
    };
    Ipv4Network::new(network.network(), network.prefix()).map_err(|e| format!("{}", e))
}

/// Usable host addresses of a network. A /31 yields both addresses and a
/// /32 its single address; otherwise network and broadcast are excluded.
pub fn host_addresses(network: Ipv4Network) -> Vec<Ipv4Addr> {
    let first = u32::from(network.network());
    let last = u32::from(network.broadcast());
    match network.prefix() {
        32 => vec![network.network()],
        31 => vec![Ipv4Addr::from(first), Ipv4Addr::from(last)],
        _ => (first + 1..last).map(Ipv4Addr::from).collect(),
    }
}

/// Clamp a configured prefix floor to `MIN_PREFIX_FLOOR..=MAX_PREFIX_FLOOR`
pub fn clamp_min_prefix_len(requested: u8) -> u8 {
    let floor = requested.clamp(MIN_PREFIX_FLOOR, MAX_PREFIX_FLOOR);
    if floor != requested {
        warn!(
            requested,
            using = floor,
            "Minimum prefix length out of range, clamping"
        );
    }
    floor
}

/// Expand the configured subnets (or the local interface subnets when none
/// are configured) into the target list: every host crossed with every port.
///
/// Malformed subnets are skipped with a warning. Hosts reachable through
/// overlapping subnets are only probed once.
pub fn expand_targets(params: &ScanParams) -> Vec<ScanTarget> {
    let min_prefix_len = clamp_min_prefix_len(params.min_prefix_len);
    let subnets = if params.subnets.is_empty() {
        interface_subnets(min_prefix_len)
    } else {
        params.subnets.clone()
    };

    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for subnet in &subnets {
        let network = match parse_subnet(subnet, min_prefix_len) {
            Ok(network) => network,
            Err(e) => {
                warn!(error = %e, "Skipping subnet");
                continue;
            }
        };

        let before = targets.len();
        for host in host_addresses(network) {
            if !seen.insert(host) {
                continue;
            }
            for &port in &params.ports {
                targets.push(ScanTarget::new(host, port, params.protocol));
            }
        }
        debug!(subnet = %network, targets = targets.len() - before, "Expanded subnet");
    }

    targets
}

fn virtual_interface_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| Regex::new(VIRTUAL_INTERFACE_PATTERN).ok())
        .as_ref()
}

/// Whether an interface name belongs to a bridge, VM or container network
pub fn is_virtual_interface(name: &str) -> bool {
    virtual_interface_regex()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Interfaces worth probing: up, not loopback, not point-to-point, not virtual
pub fn is_viable_interface(iface: &NetworkInterface) -> bool {
    iface.is_up()
        && !iface.is_loopback()
        && !iface.is_point_to_point()
        && !is_virtual_interface(&iface.name)
}

pub fn viable_interfaces() -> Vec<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .filter(is_viable_interface)
        .collect()
}

/// First IPv4 address of each viable interface
pub fn interface_ipv4_addrs() -> Vec<(String, Ipv4Addr)> {
    viable_interfaces()
        .into_iter()
        .filter_map(|iface| {
            let ip = iface.ips.iter().find_map(|ip| match ip {
                IpNetwork::V4(net) => Some(net.ip()),
                IpNetwork::V6(_) => None,
            })?;
            Some((iface.name, ip))
        })
        .collect()
}

/// CIDR strings for the IPv4 networks of every viable interface
pub fn interface_subnets(min_prefix_len: u8) -> Vec<String> {
    let mut subnets = Vec::new();
    for iface in viable_interfaces() {
        for ip in &iface.ips {
            let IpNetwork::V4(net) = ip else {
                continue;
            };
            match widen(*net, min_prefix_len) {
                Ok(network) => {
                    debug!(interface = %iface.name, subnet = %network, "Using interface subnet");
                    subnets.push(network.to_string());
                }
                Err(e) => warn!(interface = %iface.name, error = %e, "Skipping interface network"),
            }
        }
    }
    subnets
}
