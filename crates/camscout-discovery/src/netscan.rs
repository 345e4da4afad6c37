//! Subnet probing with bounded concurrency
//!
//! Targets are dispatched to a fixed number of concurrent probes. Results are
//! streamed over a channel as soon as each probe resolves. Once the run
//! deadline passes no new targets are dispatched, but probes already in
//! flight finish and still deliver their result.

use camscout_core::DeviceDescriptor;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::subnet::expand_targets;
use crate::wsd::{DescriptorError, WSD_PORT};

/// Default number of probes in flight
pub const DEFAULT_CONCURRENCY: usize = 4000;
/// Default per-probe timeout in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2000;
/// Default deadline for a whole discovery run in seconds
pub const DEFAULT_RUN_DEADLINE_SECS: u64 = 300;
/// Default prefix floor applied to configured subnets
pub const DEFAULT_MIN_PREFIX_LEN: u8 = 24;

const RESULT_CHANNEL_CAPACITY: usize = 1024;
const RECV_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProtocol {
    Tcp,
    Udp,
}

/// Parameters of one subnet scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    /// CIDR subnets to scan; empty means the subnets of the local interfaces
    pub subnets: Vec<String>,
    /// Maximum number of probes in flight
    pub concurrency_limit: usize,
    /// Per-probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    pub ports: Vec<u16>,
    pub protocol: NetworkProtocol,
    /// Subnets with a shorter prefix are narrowed to this length
    pub min_prefix_len: u8,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            subnets: Vec::new(),
            concurrency_limit: DEFAULT_CONCURRENCY,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            ports: vec![WSD_PORT],
            protocol: NetworkProtocol::Udp,
            min_prefix_len: DEFAULT_MIN_PREFIX_LEN,
        }
    }
}

impl ScanParams {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanTarget {
    pub address: Ipv4Addr,
    pub port: u16,
    pub protocol: NetworkProtocol,
}

impl ScanTarget {
    pub fn new(address: Ipv4Addr, port: u16, protocol: NetworkProtocol) -> Self {
        Self {
            address,
            port,
            protocol,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// TCP connect succeeded (empty payload) or a UDP reply arrived
    Success { payload: Vec<u8> },
    Timeout,
    Error(String),
}

/// Terminal result of probing one target
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target: ScanTarget,
    pub outcome: ProbeOutcome,
    /// Devices parsed from the reply; a single reply may describe several
    pub descriptors: Vec<DeviceDescriptor>,
}

/// Protocol-specific part of a UDP probe
pub trait ProbeProtocol: Send + Sync + 'static {
    /// Request datagram sent to the target
    fn payload(&self, target: &ScanTarget) -> Vec<u8>;

    /// Turn a reply into device descriptors
    fn parse(&self, target: &ScanTarget, raw: &[u8])
        -> Result<Vec<DeviceDescriptor>, DescriptorError>;
}

/// Probes every target of a scan with bounded concurrency
#[derive(Clone)]
pub struct SubnetProber {
    protocol: Arc<dyn ProbeProtocol>,
}

impl SubnetProber {
    pub fn new(protocol: Arc<dyn ProbeProtocol>) -> Self {
        Self { protocol }
    }

    /// Expand `params` into targets and probe them until done or `deadline`
    pub fn execute(&self, params: &ScanParams, deadline: Instant) -> mpsc::Receiver<ProbeResult> {
        let targets = expand_targets(params);
        info!(
            targets = targets.len(),
            concurrency = params.concurrency_limit,
            protocol = ?params.protocol,
            "Starting subnet scan"
        );
        self.probe_targets(
            targets,
            params.concurrency_limit,
            params.probe_timeout(),
            deadline,
        )
    }

    /// Probe an explicit target list.
    ///
    /// The returned channel closes once every dispatched probe has reported.
    pub fn probe_targets(
        &self,
        targets: Vec<ScanTarget>,
        concurrency_limit: usize,
        probe_timeout: Duration,
        deadline: Instant,
    ) -> mpsc::Receiver<ProbeResult> {
        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let protocol = self.protocol.clone();
        let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));

        tokio::spawn(async move {
            let total = targets.len();
            let mut dispatched = 0usize;
            let mut tasks = JoinSet::new();

            for target in targets {
                let permit = tokio::select! {
                    biased;
                    _ = sleep_until(deadline) => {
                        warn!(dispatched, total, "Scan deadline reached, draining in-flight probes");
                        break;
                    }
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                dispatched += 1;
                let tx = tx.clone();
                let protocol = protocol.clone();
                tasks.spawn(async move {
                    let result = probe(protocol.as_ref(), target, probe_timeout).await;
                    drop(permit);
                    let _ = tx.send(result).await;
                });
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Probe task failed");
                }
            }
            debug!(dispatched, total, "Subnet scan finished");
        });

        rx
    }
}

/// Drain a result stream, returning every descriptor found
pub async fn collect(mut results: mpsc::Receiver<ProbeResult>) -> Vec<DeviceDescriptor> {
    let mut descriptors = Vec::new();
    while let Some(result) = results.recv().await {
        for descriptor in result.descriptors {
            info!(
                target = %result.target.socket_addr(),
                address = %descriptor.address,
                port = descriptor.port,
                endpoint_ref = descriptor.endpoint_ref().unwrap_or("-"),
                "Discovered device"
            );
            descriptors.push(descriptor);
        }
    }
    descriptors
}

async fn probe(
    protocol: &dyn ProbeProtocol,
    target: ScanTarget,
    probe_timeout: Duration,
) -> ProbeResult {
    let outcome = match target.protocol {
        NetworkProtocol::Tcp => probe_tcp(target.socket_addr(), probe_timeout).await,
        NetworkProtocol::Udp => {
            let payload = protocol.payload(&target);
            probe_udp(target.socket_addr(), &payload, probe_timeout).await
        }
    };
    trace!(target = %target.socket_addr(), outcome = ?outcome, "Probe finished");

    let descriptors = match (&outcome, target.protocol) {
        (ProbeOutcome::Success { .. }, NetworkProtocol::Tcp) => {
            vec![DeviceDescriptor::from_address(
                target.address.to_string(),
                target.port,
            )]
        }
        (ProbeOutcome::Success { payload }, NetworkProtocol::Udp) => {
            match protocol.parse(&target, payload) {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    debug!(target = %target.socket_addr(), error = %e, "Dropping unparseable reply");
                    Vec::new()
                }
            }
        }
        _ => Vec::new(),
    };

    ProbeResult {
        target,
        outcome,
        descriptors,
    }
}

async fn probe_tcp(addr: SocketAddr, probe_timeout: Duration) -> ProbeOutcome {
    match timeout(probe_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => ProbeOutcome::Success {
            payload: Vec::new(),
        },
        Ok(Err(e)) => ProbeOutcome::Error(e.to_string()),
        Err(_) => ProbeOutcome::Timeout,
    }
}

async fn probe_udp(addr: SocketAddr, payload: &[u8], probe_timeout: Duration) -> ProbeOutcome {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => return ProbeOutcome::Error(e.to_string()),
    };
    if let Err(e) = socket.send_to(payload, addr).await {
        return ProbeOutcome::Error(e.to_string());
    }

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    match timeout(probe_timeout, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, _from))) => ProbeOutcome::Success {
            payload: buf[..n].to_vec(),
        },
        Ok(Err(e)) => ProbeOutcome::Error(e.to_string()),
        Err(_) => ProbeOutcome::Timeout,
    }
}
