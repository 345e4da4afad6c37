//! Management RPC contract and the ONVIF device-service client

use async_trait::async_trait;
use camscout_core::RegisteredDevice;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::credentials::CredentialStore;
use crate::security::username_token_header;
use crate::transport::SoapTransport;
use crate::xml::Document;

/// Default per-request timeout for management calls
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("No credentials configured for {0}")]
    NoCredentials(String),
    #[error("Device {0} has no management address")]
    NoAddress(String),
}

impl RpcError {
    /// Whether the failure happened at the authentication step
    pub fn is_auth(&self) -> bool {
        matches!(self, RpcError::Auth(_) | RpcError::NoCredentials(_))
    }
}

/// Service endpoints advertised by a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub device_xaddr: Option<String>,
    pub media_xaddr: Option<String>,
    pub events_xaddr: Option<String>,
}

/// Identity reported by an authenticated device-information call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInformation {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_id: Option<String>,
}

/// The two management calls the rest of the system relies on
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Unauthenticated call. Success means a management session can be opened.
    async fn get_capabilities(&self, device: &RegisteredDevice) -> Result<Capabilities, RpcError>;

    /// Authenticated call using the credentials configured for the device
    async fn get_device_information(
        &self,
        device: &RegisteredDevice,
    ) -> Result<DeviceInformation, RpcError>;
}

/// ONVIF device-service client over HTTP/SOAP
pub struct OnvifClient {
    transport: SoapTransport,
    credentials: Arc<dyn CredentialStore>,
}

impl OnvifClient {
    pub fn new(credentials: Arc<dyn CredentialStore>, timeout: Duration) -> Result<Self, RpcError> {
        Ok(Self {
            transport: SoapTransport::new(timeout)?,
            credentials,
        })
    }

    fn endpoint(device: &RegisteredDevice) -> Result<String, RpcError> {
        let authority = device
            .socket_addr_string()
            .ok_or_else(|| RpcError::NoAddress(device.name.clone()))?;
        Ok(format!("http://{}{}", authority, DEVICE_SERVICE_PATH))
    }
}

#[async_trait]
impl ManagementClient for OnvifClient {
    async fn get_capabilities(&self, device: &RegisteredDevice) -> Result<Capabilities, RpcError> {
        let url = Self::endpoint(device)?;
        debug!(device = %device.name, url = %url, "GetCapabilities");

        let body = self
            .transport
            .call(
                &url,
                envelope(
                    None,
                    "<tds:GetCapabilities><tds:Category>All</tds:Category></tds:GetCapabilities>",
                ),
            )
            .await?;

        parse_capabilities(&body)
    }

    async fn get_device_information(
        &self,
        device: &RegisteredDevice,
    ) -> Result<DeviceInformation, RpcError> {
        let url = Self::endpoint(device)?;
        let credentials = self
            .credentials
            .credentials_for(device)
            .ok_or_else(|| RpcError::NoCredentials(device.name.clone()))?;
        debug!(device = %device.name, url = %url, user = %credentials.username, "GetDeviceInformation");

        let header = username_token_header(&credentials.username, &credentials.password);
        let body = self
            .transport
            .call(&url, envelope(Some(&header), "<tds:GetDeviceInformation/>"))
            .await?;

        parse_device_information(&body)
    }
}

fn envelope(header: Option<&str>, body: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:tds="http://www.onvif.org/ver10/device/wsdl">"#,
            "<s:Header>{}</s:Header>",
            "<s:Body>{}</s:Body>",
            "</s:Envelope>"
        ),
        header.unwrap_or_default(),
        body
    )
}

fn parse_document(body: &str) -> Result<Document, RpcError> {
    Document::parse(body).map_err(|e| RpcError::Protocol(format!("Malformed response: {}", e)))
}

pub(crate) fn parse_capabilities(body: &str) -> Result<Capabilities, RpcError> {
    let doc = parse_document(body)?;
    if !doc.has_element("Capabilities") {
        return Err(RpcError::Protocol("Missing Capabilities element".to_string()));
    }

    let xaddr = |service: &str| doc.text_within(service, "XAddr").map(str::to_string);
    Ok(Capabilities {
        device_xaddr: xaddr("Device"),
        media_xaddr: xaddr("Media"),
        events_xaddr: xaddr("Events"),
    })
}

pub(crate) fn parse_device_information(body: &str) -> Result<DeviceInformation, RpcError> {
    let doc = parse_document(body)?;
    if !doc.has_element("GetDeviceInformationResponse") {
        return Err(RpcError::Protocol(
            "Missing GetDeviceInformationResponse element".to_string(),
        ));
    }

    let field = |name: &str| doc.first_text(name).map(str::to_string);
    Ok(DeviceInformation {
        manufacturer: field("Manufacturer"),
        model: field("Model"),
        firmware_version: field("FirmwareVersion"),
        serial_number: field("SerialNumber"),
        hardware_id: field("HardwareId"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, StaticCredentials};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    const CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema">
  <env:Body>
    <tds:GetCapabilitiesResponse>
      <tds:Capabilities>
        <tt:Device><tt:XAddr>http://10.0.0.5/onvif/device_service</tt:XAddr></tt:Device>
        <tt:Events><tt:XAddr>http://10.0.0.5/onvif/event_service</tt:XAddr></tt:Events>
        <tt:Media><tt:XAddr>http://10.0.0.5/onvif/media_service</tt:XAddr></tt:Media>
      </tds:Capabilities>
    </tds:GetCapabilitiesResponse>
  </env:Body>
</env:Envelope>"#;

    const DEVICE_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
  <env:Body>
    <tds:GetDeviceInformationResponse>
      <tds:Manufacturer>Intel</tds:Manufacturer>
      <tds:Model>SimCamera</tds:Model>
      <tds:FirmwareVersion>2.5.1</tds:FirmwareVersion>
      <tds:SerialNumber>SN-0042</tds:SerialNumber>
      <tds:HardwareId>1.0</tds:HardwareId>
    </tds:GetDeviceInformationResponse>
  </env:Body>
</env:Envelope>"#;

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).into_owned();
            if let Some(idx) = text.find("\r\n\r\n") {
                let len = text[..idx]
                    .to_lowercase()
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().to_string()))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= idx + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Answer exactly one HTTP request with a canned response, returning the request text
    async fn serve_once(status: &'static str, body: &'static str) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/soap+xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            request
        });
        (port, handle)
    }

    fn client(credentials: StaticCredentials) -> OnvifClient {
        OnvifClient::new(Arc::new(credentials), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_get_capabilities() {
        let (port, server) = serve_once("200 OK", CAPABILITIES).await;
        let device = RegisteredDevice::new("cam", "127.0.0.1", port);

        let caps = client(StaticCredentials::default())
            .get_capabilities(&device)
            .await
            .unwrap();
        assert_eq!(
            caps.media_xaddr.as_deref(),
            Some("http://10.0.0.5/onvif/media_service")
        );
        assert_eq!(
            caps.device_xaddr.as_deref(),
            Some("http://10.0.0.5/onvif/device_service")
        );

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /onvif/device_service"));
        assert!(request.contains("GetCapabilities"));
        assert!(!request.contains("UsernameToken"));
    }

    #[tokio::test]
    async fn test_get_device_information_sends_token() {
        let (port, server) = serve_once("200 OK", DEVICE_INFO).await;
        let device = RegisteredDevice::new("cam", "127.0.0.1", port);
        let credentials = StaticCredentials::new(Some(Credentials::new("admin", "secret")));

        let info = client(credentials).get_device_information(&device).await.unwrap();
        assert_eq!(info.manufacturer.as_deref(), Some("Intel"));
        assert_eq!(info.model.as_deref(), Some("SimCamera"));
        assert_eq!(info.serial_number.as_deref(), Some("SN-0042"));

        let request = server.await.unwrap();
        assert!(request.contains("<wsse:Username>admin</wsse:Username>"));
        assert!(!request.contains("secret"));
    }

    #[tokio::test]
    async fn test_auth_fault_over_http() {
        const FAULT: &str = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><env:Fault><env:Code><env:Value>env:Sender</env:Value><env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode></env:Code><env:Reason><env:Text>Sender not Authorized</env:Text></env:Reason></env:Fault></env:Body></env:Envelope>"#;
        let (port, _server) = serve_once("400 Bad Request", FAULT).await;
        let device = RegisteredDevice::new("cam", "127.0.0.1", port);
        let credentials = StaticCredentials::new(Some(Credentials::new("admin", "wrong")));

        let err = client(credentials)
            .get_device_information(&device)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Auth(_)));
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let device = RegisteredDevice::new("cam", "127.0.0.1", 9);
        let err = client(StaticCredentials::default())
            .get_device_information(&device)
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::NoCredentials("cam".to_string()));
    }

    #[tokio::test]
    async fn test_missing_address() {
        let mut device = RegisteredDevice::new("cam", "", 80);
        device.protocol.address = None;
        let err = client(StaticCredentials::default())
            .get_capabilities(&device)
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::NoAddress("cam".to_string()));
    }

    #[test]
    fn test_endpoint_brackets_ipv6_host() {
        let v6 = RegisteredDevice::new("cam", "::1", 8000);
        assert_eq!(
            OnvifClient::endpoint(&v6).unwrap(),
            "http://[::1]:8000/onvif/device_service"
        );
        let v4 = RegisteredDevice::new("cam", "10.0.0.5", 80);
        assert_eq!(
            OnvifClient::endpoint(&v4).unwrap(),
            "http://10.0.0.5:80/onvif/device_service"
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let device = RegisteredDevice::new("cam", "127.0.0.1", port);
        let err = client(StaticCredentials::default())
            .get_capabilities(&device)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[test]
    fn test_unexpected_body_is_protocol_error() {
        assert!(matches!(
            parse_capabilities("<html><body>hello</body></html>"),
            Err(RpcError::Protocol(_))
        ));
        assert!(matches!(
            parse_device_information("<a><b></a>"),
            Err(RpcError::Protocol(_))
        ));
    }
}
