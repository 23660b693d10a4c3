use btleplug::api::BDAddr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A peripheral found during discovery
///
/// Discovery only reports what the advertisement carries; whether the device
/// actually speaks the JK protocol is established structurally at connect
/// time, when the vendor channels are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Transport-level address used to connect
    pub address: BDAddr,
    /// Received signal strength in dBm at scan time
    pub rssi: Option<i16>,
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or("(unnamed)");
        match self.rssi {
            Some(rssi) => write!(f, "{name}  address={}  rssi={rssi}", self.address),
            None => write!(f, "{name}  address={}", self.address),
        }
    }
}

/// One decoded device-info field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    /// Stable field name
    pub name: &'static str,
    /// Decoded value rendered as text
    pub value: String,
}

/// The decoded result of a device-info read
///
/// An ordered collection of named fields. The order matches the device's
/// payload layout and is stable across releases: new fields are only ever
/// appended, existing ones are never reordered, so downstream tooling can
/// parse the rendered output line by line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfoRecord {
    fields: Vec<Field>,
}

impl DeviceInfoRecord {
    /// Build a record from decoded fields
    #[must_use]
    pub const fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// All fields in payload order
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field value by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Device model designation
    #[must_use]
    pub fn model(&self) -> &str {
        self.get("model").unwrap_or_default()
    }

    /// Hardware revision string
    #[must_use]
    pub fn hardware_version(&self) -> &str {
        self.get("hardware_version").unwrap_or_default()
    }

    /// Firmware revision string
    #[must_use]
    pub fn software_version(&self) -> &str {
        self.get("software_version").unwrap_or_default()
    }

    /// User-assigned device name
    #[must_use]
    pub fn device_name(&self) -> &str {
        self.get("device_name").unwrap_or_default()
    }

    /// Pairing passcode
    #[must_use]
    pub fn device_passcode(&self) -> &str {
        self.get("device_passcode").unwrap_or_default()
    }

    /// Manufacture date as YYMMDD digits
    #[must_use]
    pub fn manufacture_date(&self) -> &str {
        self.get("manufacture_date").unwrap_or_default()
    }

    /// Factory serial number
    #[must_use]
    pub fn serial_number(&self) -> &str {
        self.get("serial_number").unwrap_or_default()
    }

    /// Protocol passcode
    #[must_use]
    pub fn protocol_passcode(&self) -> &str {
        self.get("protocol_passcode").unwrap_or_default()
    }

    /// Settings-menu passcode
    #[must_use]
    pub fn setup_passcode(&self) -> &str {
        self.get("setup_passcode").unwrap_or_default()
    }
}

impl fmt::Display for DeviceInfoRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.fields {
            writeln!(f, "{}: {}", field.name, field.value)?;
        }
        Ok(())
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport link
    Disconnected,
    /// Transport link being established
    Connecting,
    /// Link up, services not yet resolved
    Connected,
    /// Vendor write and notify channels located
    ChannelsResolved,
    /// Notifications registered, ready to send the request
    Subscribed,
    /// Command frame written, no fragment seen yet
    RequestSent,
    /// Fragments arriving, frame under construction
    AwaitingFrame,
    /// A validated frame was decoded; terminal success
    Decoded,
    /// Teardown in progress
    Disconnecting,
    /// A fatal error occurred; teardown was attempted
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::ChannelsResolved => "ChannelsResolved",
            Self::Subscribed => "Subscribed",
            Self::RequestSent => "RequestSent",
            Self::AwaitingFrame => "AwaitingFrame",
            Self::Decoded => "Decoded",
            Self::Disconnecting => "Disconnecting",
            Self::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

/// Timeout configuration for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Timeout for establishing the transport link in milliseconds
    pub connect_timeout_ms: u64,
    /// Timeout for one complete validated response in milliseconds
    pub response_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            // JK units routinely need several seconds to come out of radio
            // sleep before the link settles
            connect_timeout_ms: 20_000,
            response_timeout_ms: 8_000,
        }
    }
}
