use serde::{Deserialize, Deserializer, Serialize};

/// Current FlowDrop wire protocol version.
///
/// Advertised as the mDNS TXT record `v` and checked by the discoverer
/// before it trusts a resolved peer.
pub const PROTOCOL_VERSION: u32 = 0;

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Identity record of a FlowDrop device.
///
/// `id` is the sole identifier used to address a peer: it is also the mDNS
/// service-instance name under which the device is published. Optional
/// fields are omitted from the JSON encoding when absent, and an empty
/// string is treated as absent when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(deserialize_with = "empty_as_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(deserialize_with = "empty_as_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(deserialize_with = "empty_as_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(deserialize_with = "empty_as_none")]
    pub system_version: Option<String>,
}

impl DeviceInfo {
    /// A bare device identity carrying only a freshly generated id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            model: None,
            platform: None,
            system_version: None,
        }
    }

    /// Generates a 12-character lowercase hex id from 48 bits of OS
    /// randomness. Collisions between concurrent advertisers on the same LAN
    /// are not this component's concern (see spec invariants).
    pub fn generate_id() -> String {
        let bytes: [u8; 6] = rand::random();
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Manifest entry describing an offered or received file: a name and a
/// size, never a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
}

/// The `/ask` request body: a sender identity plus the manifest of files it
/// wants to send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAsk {
    pub sender: DeviceInfo,
    pub files: Vec<FileInfo>,
}

/// The `/ask` response body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AskResponse {
    pub accepted: bool,
}
