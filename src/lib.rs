#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # jkprobe
//!
//! A Rust library for reading device identity and configuration from JK
//! (Jikong) battery-management-system devices via Bluetooth Low Energy.
//!
//! JK BMS units expose a vendor-specific GATT characteristic over which a
//! small binary request/response protocol runs. This library implements one
//! transaction of that protocol: the device-info read. It sends the 0x97
//! command frame, reassembles the fragmented notification stream into a
//! complete 300-byte response, verifies the modulo-256 checksum, and decodes
//! the payload into named fields:
//!
//! - Model and device name
//! - Hardware and software version strings
//! - Manufacture date and serial number
//! - Device, protocol and setup passcodes
//!
//! The wire protocol is not publicly documented; the frame layout, command
//! and record codes, and the field offset table were reverse-engineered from
//! the vendor's mobile application and cross-checked against several
//! open-source JK integrations.
//!
//! ## Quick Start
//!
//! ```no_run
//! use jkprobe::{discover_devices, read_device_info, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // List reachable peripherals advertising the JK vendor service
//!     let devices = discover_devices(std::time::Duration::from_secs(5)).await?;
//!     let target = devices.first().ok_or("no JK BMS in range")?;
//!
//!     // One-shot transaction: connect, read, disconnect
//!     let info = read_device_info(target.address, SessionConfig::default()).await?;
//!     println!("{info}");
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport module
pub mod ble;
/// Device-info payload decoding
pub mod decode;
/// Error types and handling
pub mod error;
/// Frame encoding, validation and integrity checking
pub mod protocol;
/// Fragment-to-frame reassembly
pub mod reassembly;
/// Session lifecycle and the one-shot request transaction
pub mod session;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::{discover_devices, BleTransport};
pub use error::{FrameError, JkError, Result};
pub use session::{read_device_info, FrameTransport, Session};
pub use types::{DeviceInfoRecord, DiscoveredDevice, Field, SessionConfig, SessionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// JK BMS vendor service UUID (`0000ffe0-0000-1000-8000-00805f9b34fb`)
///
/// The short UUID 0xFFE0 expanded against the Bluetooth base UUID. All JK
/// firmware revisions observed so far advertise this service; it encloses the
/// single vendor characteristic used for both directions of the protocol.
pub const JK_SERVICE_UUID: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// JK BMS vendor characteristic UUID (`0000ffe1-0000-1000-8000-00805f9b34fb`)
///
/// The short UUID 0xFFE1 expanded against the Bluetooth base UUID. Commands
/// are written to it and responses arrive as notifications on it. Some
/// firmware revisions expose two characteristics under this one UUID, one
/// carrying the notify property and one carrying write; channel resolution
/// therefore matches on (UUID, property), not on UUID alone.
pub const JK_CHAR_UUID: uuid::Uuid =
    uuid::Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);
