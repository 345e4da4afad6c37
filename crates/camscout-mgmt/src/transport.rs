//! Async HTTP transport for SOAP requests

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, trace};

use crate::client::RpcError;
use crate::xml::{Document, SoapFault};

const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// HTTP/SOAP transport with a per-request timeout
#[derive(Clone)]
pub struct SoapTransport {
    client: reqwest::Client,
}

impl SoapTransport {
    pub fn new(timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// POST an envelope and return the response body.
    ///
    /// Faults and HTTP errors are mapped onto `RpcError` so callers only deal
    /// with successful response bodies.
    pub async fn call(&self, url: &str, envelope: String) -> Result<String, RpcError> {
        trace!(url = %url, len = envelope.len(), "Sending SOAP request");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        debug!(url = %url, status = %status, "SOAP response received");
        classify_response(status, body)
    }
}

/// Map an HTTP status and body onto success or an `RpcError`
pub(crate) fn classify_response(status: StatusCode, body: String) -> Result<String, RpcError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RpcError::Auth(format!("HTTP {}", status.as_u16())));
    }

    // Devices answer faults with 400 or 500, sometimes 200
    if let Ok(doc) = Document::parse(&body) {
        if let Some(fault) = SoapFault::from_document(&doc) {
            return Err(if fault.is_auth_failure() {
                RpcError::Auth(fault.describe())
            } else {
                RpcError::Protocol(fault.describe())
            });
        }
    }

    if !status.is_success() {
        return Err(RpcError::Protocol(format!("HTTP {}", status.as_u16())));
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH_FAULT: &str = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><env:Fault><env:Code><env:Value>env:Sender</env:Value><env:Subcode><env:Value>ter:NotAuthorized</env:Value></env:Subcode></env:Code><env:Reason><env:Text>Sender not Authorized</env:Text></env:Reason></env:Fault></env:Body></env:Envelope>"#;
    const ACTION_FAULT: &str = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><env:Fault><env:Code><env:Value>env:Receiver</env:Value><env:Subcode><env:Value>ter:ActionNotSupported</env:Value></env:Subcode></env:Code><env:Reason><env:Text>Optional Action Not Implemented</env:Text></env:Reason></env:Fault></env:Body></env:Envelope>"#;

    #[test]
    fn test_http_unauthorized_is_auth() {
        let result = classify_response(StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(result, Err(RpcError::Auth(_))));
    }

    #[test]
    fn test_fault_mapping() {
        let result = classify_response(StatusCode::BAD_REQUEST, AUTH_FAULT.to_string());
        assert!(matches!(result, Err(RpcError::Auth(_))));

        let result = classify_response(StatusCode::INTERNAL_SERVER_ERROR, ACTION_FAULT.to_string());
        match result {
            Err(RpcError::Protocol(msg)) => assert!(msg.contains("ActionNotSupported")),
            other => panic!("unexpected {:?}", other),
        }

        // fault inside a 200 is still a fault
        let result = classify_response(StatusCode::OK, AUTH_FAULT.to_string());
        assert!(matches!(result, Err(RpcError::Auth(_))));
    }

    #[test]
    fn test_non_success_without_fault() {
        let result = classify_response(StatusCode::NOT_FOUND, "not here".to_string());
        assert_eq!(result, Err(RpcError::Protocol("HTTP 404".to_string())));
    }

    #[test]
    fn test_success_passes_body_through() {
        let result = classify_response(StatusCode::OK, "<ok/>".to_string());
        assert_eq!(result, Ok("<ok/>".to_string()));
    }
}
