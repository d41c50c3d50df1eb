//! Network adapter trait definition

use std::time::Duration;

use thiserror::Error;
use trait_variant::make;

use crate::core::types::{AuthType, NetworkDescriptor, WifiNetwork};

/// Result type for network adapter operations
pub type WifiResult<T> = Result<T, WifiError>;

/// Errors related to Wi-Fi layer operations
#[derive(Error, Debug, Clone)]
pub enum WifiError {
    #[error("WiFi scan failed: {0}")]
    ScanFailed(String),

    #[error("WiFi is disabled")]
    WifiDisabled,

    #[error("network interface error: {0}")]
    InterfaceError(String),
}

/// A single connection request issued to the Wi-Fi layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Network SSID
    pub ssid: String,
    /// Authentication type
    pub auth_type: AuthType,
    /// Passphrase, absent for open networks
    pub password: Option<String>,
    /// Whether the access point is hidden
    pub hidden: bool,
    /// How long the Wi-Fi layer may try before reporting a timeout
    pub timeout: Duration,
}

impl ConnectRequest {
    /// Build a request from a network descriptor and a timeout
    pub fn new(network: &NetworkDescriptor, timeout: Duration) -> Self {
        Self {
            ssid: network.ssid.clone(),
            auth_type: network.auth_type,
            password: network.password.clone(),
            hidden: network.hidden,
            timeout,
        }
    }
}

/// Asynchronous outcome of a [`ConnectRequest`]
///
/// Delivered by the Wi-Fi layer through
/// [`crate::core::machine::OnboardingHandle::network_event`].
/// Every variant carries the SSID of the attempt it reports so the consumer
/// can discard outcomes of attempts it no longer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The requested connection was established
    Connected { ssid: String },
    /// The connection attempt did not complete within the request's timeout
    Timeout { ssid: String },
    /// The access point rejected the credentials
    AuthFailure { ssid: String },
}

impl NetworkEvent {
    /// SSID of the connection attempt this outcome belongs to
    pub fn ssid(&self) -> &str {
        match self {
            NetworkEvent::Connected { ssid }
            | NetworkEvent::Timeout { ssid }
            | NetworkEvent::AuthFailure { ssid } => ssid,
        }
    }
}

/// Abstraction over the host's Wi-Fi control interface
///
/// `connect` is fire-and-forget: the adapter owns the connection timeout and
/// reports exactly one [`NetworkEvent`] per request, asynchronously. The other
/// operations complete inline. Mock implementations make the state machine
/// testable without radio hardware.
#[make(Send)]
pub trait NetworkAdapter: Sync + 'static {
    /// Begin connecting to an access point
    ///
    /// The outcome (connected, timed out, authentication failure) is delivered
    /// later as a [`NetworkEvent`].
    async fn connect(&self, request: ConnectRequest);

    /// Reconnect to a known network by SSID, using stored credentials
    ///
    /// Same contract as [`NetworkAdapter::connect`]: the outcome arrives
    /// later as a [`NetworkEvent`].
    async fn reconnect(&self, ssid: &str, timeout: Duration);

    /// Drop the current connection, if any
    async fn disconnect(&self);

    /// Remove a network from the set of known networks
    async fn forget(&self, ssid: &str);

    /// Re-enable every known network after the onboarding flow pinned one
    async fn enable_all_known_networks(&self);

    /// SSID of the currently connected network, if any
    async fn current_network(&self) -> Option<String>;

    /// Scan for visible access points
    async fn scan(&self) -> WifiResult<Vec<WifiNetwork>>;
}
