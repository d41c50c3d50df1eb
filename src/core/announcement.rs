//! Announcement events and device identity extraction

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Interface name advertised by peers that support onboarding
pub const ONBOARDING_INTERFACE: &str = "org.alljoyn.Onboarding";

/// Metadata key carrying the application UUID
pub const METADATA_APP_ID: &str = "AppId";

/// Metadata key carrying the device id string
pub const METADATA_DEVICE_ID: &str = "DeviceId";

/// One advertised object with its interface names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    /// Object path
    pub path: String,
    /// Interface names implemented at that path
    pub interfaces: Vec<String>,
}

/// A discovery announcement received from a peer
///
/// Transient value produced by the discovery layer; consumed to extract the
/// [`DeviceIdentity`] and to check capability support.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnouncementEvent {
    /// Service address of the announcing peer
    pub service_address: String,
    /// Session port the peer listens on
    pub port: u16,
    /// Advertised objects and interfaces
    pub capabilities: Vec<CapabilityDescriptor>,
    /// Opaque announcement metadata
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AnnouncementEvent {
    /// Whether any advertised interface starts with the given name
    pub fn supports(&self, interface: &str) -> bool {
        self.capabilities
            .iter()
            .flat_map(|descriptor| descriptor.interfaces.iter())
            .any(|name| name.starts_with(interface))
    }
}

/// Identity of the device being onboarded
///
/// Derived once from the announcement seen on the onboardee network and used
/// to correlate it with the announcement expected later on the target network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Application UUID from the announcement metadata
    pub app_id: Uuid,
    /// Device id string from the announcement metadata
    pub device_id: String,
}

impl TryFrom<&AnnouncementEvent> for DeviceIdentity {
    type Error = &'static str;

    fn try_from(event: &AnnouncementEvent) -> Result<Self, Self::Error> {
        let app_id = event
            .metadata
            .get(METADATA_APP_ID)
            .and_then(serde_json::Value::as_str)
            .ok_or("announcement metadata is missing AppId")?
            .parse::<Uuid>()
            .map_err(|_| "announcement AppId is not a valid UUID")?;
        let device_id = event
            .metadata
            .get(METADATA_DEVICE_ID)
            .and_then(serde_json::Value::as_str)
            .ok_or("announcement metadata is missing DeviceId")?
            .to_string();
        Ok(Self { app_id, device_id })
    }
}
