//! WS-Discovery multicast round

use anyhow::{Context, Result};
use camscout_core::DeviceDescriptor;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::subnet::interface_ipv4_addrs;
use crate::wsd::{build_probe, new_message_id, parse_probe_matches, WSD_PORT};

/// WS-Discovery multicast group
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const MULTICAST_TTL: u32 = 2;
/// Default time to collect responses after probing
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

const RECV_BUFFER_SIZE: usize = 8192;

/// Raw response to a multicast probe
#[derive(Debug, Clone)]
pub struct MulticastResponse {
    pub source: SocketAddr,
    pub payload: Vec<u8>,
}

/// Runs one multicast probe round on every viable interface
#[derive(Debug, Clone)]
pub struct MulticastDiscoverer {
    read_timeout: Duration,
}

impl Default for MulticastDiscoverer {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

impl MulticastDiscoverer {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    /// Probe and collect raw responses until the read timeout or `deadline`,
    /// whichever comes first. Only failing to open the socket is an error.
    pub async fn run(&self, deadline: Instant) -> Result<Vec<MulticastResponse>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("Failed to open WS-Discovery socket")?;

        for (name, addr) in interface_ipv4_addrs() {
            debug!(interface = %name, ip = %addr, "Joining WS-Discovery group");
            if let Err(e) = socket.join_multicast_v4(MULTICAST_GROUP, addr) {
                warn!(interface = %name, error = %e, "Failed to join multicast group");
            }
        }
        if let Err(e) = socket.set_multicast_ttl_v4(MULTICAST_TTL) {
            error!(error = %e, "Failed to set multicast TTL");
        }
        if let Err(e) = socket.set_multicast_loop_v4(false) {
            error!(error = %e, "Failed to disable multicast loopback");
        }

        let read_deadline = deadline.min(Instant::now() + self.read_timeout);
        self.probe(&socket).await;
        Ok(listen(&socket, read_deadline).await)
    }

    /// Run a round and parse the responses, dropping unparseable ones
    pub async fn discover(&self, deadline: Instant) -> Result<Vec<DeviceDescriptor>> {
        let descriptors = parse_responses(self.run(deadline).await?);
        info!(found = descriptors.len(), "Multicast discovery finished");
        Ok(descriptors)
    }

    /// Send the scoped and unscoped probes, sharing one message id
    async fn probe(&self, socket: &UdpSocket) {
        let dest = SocketAddr::V4(SocketAddrV4::new(MULTICAST_GROUP, WSD_PORT));
        let message_id = new_message_id();
        for scoped in [true, false] {
            let probe = build_probe(&message_id, scoped);
            if let Err(e) = socket.send_to(probe.as_bytes(), dest).await {
                error!(scoped, error = %e, "Failed to send WS-Discovery probe");
            }
        }
    }
}

/// Parse a batch of responses in arrival order. A response that fails to
/// parse is logged and dropped without affecting the rest of the batch.
pub fn parse_responses(responses: Vec<MulticastResponse>) -> Vec<DeviceDescriptor> {
    let mut descriptors = Vec::new();
    for response in responses {
        match parse_probe_matches(&response.payload) {
            Ok(found) => descriptors.extend(found),
            Err(e) => {
                debug!(source = %response.source, error = %e, "Dropping malformed WS-Discovery response")
            }
        }
    }
    descriptors
}

/// Read datagrams until `deadline`. Hitting the deadline ends collection
/// silently; any other read error is logged and also ends it.
pub async fn listen(socket: &UdpSocket, deadline: Instant) -> Vec<MulticastResponse> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut responses = Vec::new();

    loop {
        match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                error!(error = %e, "Unexpected error reading WS-Discovery responses");
                break;
            }
            Ok(Ok((n, source))) => {
                debug!(source = %source, len = n, "Got WS-Discovery response");
                responses.push(MulticastResponse {
                    source,
                    payload: buf[..n].to_vec(),
                });
            }
        }
    }

    responses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsd::tests::probe_matches;

    fn response(port: u16, payload: impl Into<Vec<u8>>) -> MulticastResponse {
        MulticastResponse {
            source: SocketAddr::from(([192, 168, 1, 50], port)),
            payload: payload.into(),
        }
    }

    #[test]
    fn test_malformed_response_does_not_stop_batch() {
        let responses = vec![
            response(3702, probe_matches("first", "http://192.168.1.10/onvif/device_service")),
            response(3703, "<a><b></a>"),
            response(3704, "<Envelope><Body><Hello/></Body></Envelope>"),
            response(3705, probe_matches("second", "http://192.168.1.11:8080/onvif/device_service")),
        ];

        let descriptors = parse_responses(responses);
        let ids: Vec<_> = descriptors.iter().filter_map(|d| d.endpoint_ref()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert_eq!(descriptors[1].port, 8080);
    }

    #[tokio::test]
    async fn test_listen_collects_until_deadline() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = receiver.local_addr().unwrap();

        sender.send_to(b"first", dest).await.unwrap();
        sender.send_to(b"second", dest).await.unwrap();

        let started = Instant::now();
        let responses = listen(&receiver, started + Duration::from_millis(200)).await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].payload, b"first");
        assert_eq!(responses[1].payload, b"second");
        assert_eq!(responses[0].source, sender.local_addr().unwrap());
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_listen_silent_socket_returns_empty() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let responses = listen(&receiver, Instant::now() + Duration::from_millis(50)).await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_run_respects_earlier_deadline() {
        let discoverer = MulticastDiscoverer::new(Duration::from_secs(30));
        let started = Instant::now();
        // ends at the run deadline, not the 30 s read timeout
        let _ = discoverer.run(started + Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
