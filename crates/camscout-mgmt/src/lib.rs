//! camscout mgmt - device management RPC
//!
//! The status checker and discovery only need two calls from a device:
//! an unauthenticated capability query that proves a management session can
//! be opened, and an authenticated device-information query. This crate
//! defines that contract and a reference ONVIF implementation over HTTP/SOAP.

pub mod client;
pub mod credentials;
pub mod security;
pub mod transport;
pub mod xml;

pub use client::{
    Capabilities, DeviceInformation, ManagementClient, OnvifClient, RpcError,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use credentials::{CredentialStore, Credentials, StaticCredentials};
pub use transport::SoapTransport;
