use thiserror::Error;

use crate::types::SessionState;

/// Frame integrity failures detected by the codec or the reassembler
///
/// Each variant carries the expected and observed values so a protocol or
/// firmware mismatch can be diagnosed from the error alone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The leading magic bytes do not match the response header constant
    #[error("header mismatch: expected {expected:02X?}, got {actual:02X?}")]
    HeaderMismatch {
        /// The magic the protocol requires
        expected: [u8; 4],
        /// The magic actually received
        actual: [u8; 4],
    },

    /// The declared total length disagrees with the byte count received
    #[error("length mismatch: frame declares {declared} bytes, received {actual}")]
    LengthMismatch {
        /// Total length declared in the frame header
        declared: usize,
        /// Bytes actually accumulated
        actual: usize,
    },

    /// The trailing checksum byte does not match the modulo-256 sum
    #[error("checksum mismatch: computed {expected:#04X}, frame carries {actual:#04X}")]
    ChecksumMismatch {
        /// Sum of all preceding bytes, modulo 256
        expected: u8,
        /// Checksum byte carried in the frame
        actual: u8,
    },

    /// The first fragment was too short to contain the frame header
    #[error("first fragment of {len} bytes is too short to hold a frame header")]
    TruncatedHeader {
        /// Length of the offending fragment
        len: usize,
    },
}

/// Errors that can occur when talking to a JK BMS
#[derive(Error, Debug)]
pub enum JkError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No usable Bluetooth adapter, or the peripheral was not found
    #[error("JK BMS device not found")]
    DeviceNotFound,

    /// Transport-level link could not be established
    #[error("failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// The peripheral does not expose the expected vendor channels
    #[error("vendor channel not found: no characteristic {uuid} with {property} property")]
    ChannelNotFound {
        /// The vendor characteristic UUID that was searched for
        uuid: uuid::Uuid,
        /// The required GATT property ("notify" or "write")
        property: &'static str,
    },

    /// Device disconnected or the notification stream ended mid-exchange
    #[error("device disconnected")]
    Disconnected,

    /// No complete valid frame arrived within the allotted window
    #[error("timed out after {timeout_ms}ms waiting for a complete response")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Malformed or corrupted response frame
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The validated payload is too short for the decode table
    #[error("payload of {len} bytes is too short to decode (need {need})")]
    PayloadTooShort {
        /// Bytes available in the payload region
        len: usize,
        /// Bytes the decode table extends to
        need: usize,
    },

    /// Operation issued while the session is in an incompatible state
    #[error("invalid session state: {state}")]
    InvalidState {
        /// The state the session was in
        state: SessionState,
    },
}

/// Result type for JK BMS operations
pub type Result<T> = std::result::Result<T, JkError>;

impl JkError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected | Self::DeviceNotFound
        )
    }

    /// Check if this error may clear up on a retry
    ///
    /// Only timeouts qualify. Frame errors indicate a protocol or firmware
    /// mismatch rather than transient radio conditions and must be surfaced,
    /// not retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
