//! Domain types for the onboarding workflow

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for establishing a Wi-Fi connection (20 s).
pub const DEFAULT_WIFI_CONNECTION_TIMEOUT: Duration = Duration::from_secs(20);

/// Default timeout for waiting for an announcement (25 s).
pub const DEFAULT_ANNOUNCEMENT_TIMEOUT: Duration = Duration::from_secs(25);

/// SSID prefix marking an access point as an onboardable device.
pub const ONBOARDABLE_PREFIX: &str = "AJ_";

/// SSID suffix marking an access point as an onboardable device.
pub const ONBOARDABLE_SUFFIX: &str = "_AJ";

/// Wi-Fi authentication type of a network descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Open,
    Wep,
    Wpa,
    Wpa2,
}

/// Credentials of a single Wi-Fi network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkDescriptor {
    /// Network SSID
    pub ssid: String,
    /// Authentication type
    pub auth_type: AuthType,
    /// Passphrase; required unless `auth_type` is `Open`
    pub password: Option<String>,
    /// Whether the access point is hidden (not broadcasting its SSID)
    pub hidden: bool,
}

impl NetworkDescriptor {
    /// Create a descriptor for an open (unauthenticated) network
    pub fn open(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            auth_type: AuthType::Open,
            password: None,
            hidden: false,
        }
    }

    /// Create a descriptor for a protected network
    pub fn protected(
        ssid: impl Into<String>,
        auth_type: AuthType,
        password: impl Into<String>,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            auth_type,
            password: Some(password.into()),
            hidden: false,
        }
    }

    fn check(&self, role: &'static str) -> Result<(), &'static str> {
        if self.ssid.is_empty() {
            return Err(match role {
                "onboardee" => "onboardee SSID is empty",
                _ => "target SSID is empty",
            });
        }
        if self.auth_type != AuthType::Open && self.password.as_deref().is_none_or(str::is_empty) {
            return Err(match role {
                "onboardee" => "onboardee network requires a password",
                _ => "target network requires a password",
            });
        }
        Ok(())
    }
}

/// Immutable description of a single onboarding attempt
///
/// Bundles the onboardee and target network credentials together with the
/// per-phase timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnboardingConfiguration {
    /// Credentials of the onboardee device's own access point
    pub onboardee: NetworkDescriptor,
    /// Credentials of the destination network
    pub target: NetworkDescriptor,
    /// Timeout for the Wi-Fi connection to the onboardee AP
    pub onboardee_connection_timeout: Duration,
    /// Timeout for the announcement wait on the onboardee network
    pub onboardee_announcement_timeout: Duration,
    /// Timeout for the Wi-Fi connection to the target AP
    pub target_connection_timeout: Duration,
    /// Timeout for the announcement wait on the target network
    pub target_announcement_timeout: Duration,
}

impl OnboardingConfiguration {
    /// Create a configuration with the default timeouts
    pub fn new(onboardee: NetworkDescriptor, target: NetworkDescriptor) -> Self {
        Self {
            onboardee,
            target,
            onboardee_connection_timeout: DEFAULT_WIFI_CONNECTION_TIMEOUT,
            onboardee_announcement_timeout: DEFAULT_ANNOUNCEMENT_TIMEOUT,
            target_connection_timeout: DEFAULT_WIFI_CONNECTION_TIMEOUT,
            target_announcement_timeout: DEFAULT_ANNOUNCEMENT_TIMEOUT,
        }
    }

    /// Validate the configuration invariants
    ///
    /// All four timeouts must be non-zero, both SSIDs non-empty, and a
    /// password is required unless the auth type is `Open`.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.onboardee_connection_timeout.is_zero()
            || self.onboardee_announcement_timeout.is_zero()
            || self.target_connection_timeout.is_zero()
            || self.target_announcement_timeout.is_zero()
        {
            return Err("all timeouts must be greater than zero");
        }
        self.onboardee.check("onboardee")?;
        self.target.check("target")?;
        Ok(())
    }
}

/// Description of a single offboarding attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OffboardingConfiguration {
    /// Service address of the peer on the current network
    pub service_address: String,
    /// Session port advertised by the peer
    pub port: u16,
}

impl OffboardingConfiguration {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.service_address.is_empty() {
            return Err("service address is empty");
        }
        if self.port == 0 {
            return Err("port must be non-zero");
        }
        Ok(())
    }
}

/// Represents a discovered Wi-Fi access point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WifiNetwork {
    /// Network SSID
    pub ssid: String,
    /// MAC address (BSSID)
    pub mac: String,
    /// Signal strength in dBm
    pub rssi: i16,
}

impl WifiNetwork {
    /// Whether the SSID marks the access point as an onboardable device
    pub fn is_onboardable(&self) -> bool {
        self.ssid.starts_with(ONBOARDABLE_PREFIX) || self.ssid.ends_with(ONBOARDABLE_SUFFIX)
    }
}

/// Wi-Fi scan state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
    Finished,
    Error,
}

/// Filter applied to scan results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFilter {
    /// Access points advertising as onboardable devices
    Onboardable,
    /// Access points usable as target networks
    Target,
    /// Every access point seen
    All,
}

/// Check whether a WEP password is already a valid hex key
///
/// Valid hex WEP keys are 10, 26, 32 or 58 hex digits; valid ASCII keys are
/// 5, 13, 16 or 29 characters. Returns `(valid, is_hex)`.
pub fn check_wep_password(password: &str) -> (bool, bool) {
    match password.len() {
        5 | 13 | 16 | 29 => (true, false),
        10 | 26 | 32 | 58 => {
            let hex = password.chars().all(|c| c.is_ascii_hexdigit());
            (hex, hex)
        }
        _ => (false, false),
    }
}
