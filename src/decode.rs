use crate::error::JkError;
use crate::types::{DeviceInfoRecord, Field};
use tracing::warn;

/// How the bytes of a field are turned into its rendered value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// UTF-8 text, trailing NUL padding trimmed
    Text,
    /// ASCII decimal digits, trailing NUL padding trimmed
    Digits,
    /// Opaque passcode, rendered as its literal character sequence
    Passcode,
}

/// One entry of the device-info layout table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Stable output name
    pub name: &'static str,
    /// Byte offset within the validated payload region
    pub offset: usize,
    /// Field width in bytes
    pub width: usize,
    /// Decode rule
    pub kind: FieldKind,
}

/// Revision of the layout table below
///
/// Bump whenever an offset, width or field set changes, so mismatched output
/// can be traced to a table change rather than a device difference.
pub const DEVICE_INFO_TABLE_REVISION: u32 = 1;

/// Device-info payload layout
///
/// Offsets are relative to the start of the validated payload region (header
/// and checksum already stripped). Byte ranges not covered by an entry are
/// reserved regions the device uses for uptime, power-on counters and free
/// user data; they are skipped, not surfaced. The table order is the output
/// order and is append-only.
pub const DEVICE_INFO_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "model",
        offset: 0,
        width: 16,
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "hardware_version",
        offset: 16,
        width: 8,
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "software_version",
        offset: 24,
        width: 8,
        kind: FieldKind::Text,
    },
    // 32..40 reserved: uptime seconds, power-on count
    FieldSpec {
        name: "device_name",
        offset: 40,
        width: 16,
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "device_passcode",
        offset: 56,
        width: 16,
        kind: FieldKind::Passcode,
    },
    FieldSpec {
        name: "manufacture_date",
        offset: 72,
        width: 8,
        kind: FieldKind::Digits,
    },
    FieldSpec {
        name: "serial_number",
        offset: 80,
        width: 11,
        kind: FieldKind::Digits,
    },
    FieldSpec {
        name: "protocol_passcode",
        offset: 91,
        width: 5,
        kind: FieldKind::Passcode,
    },
    // 96..112 reserved: free-form user data
    FieldSpec {
        name: "setup_passcode",
        offset: 112,
        width: 16,
        kind: FieldKind::Passcode,
    },
];

/// Bytes of payload the table extends to
pub const DEVICE_INFO_MIN_PAYLOAD: usize = 128;

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0x00)
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}

fn decode_field(spec: &FieldSpec, payload: &[u8]) -> Field {
    let raw = trim_padding(&payload[spec.offset..spec.offset + spec.width]);
    let value = String::from_utf8_lossy(raw).into_owned();

    if spec.kind == FieldKind::Digits && !raw.iter().all(u8::is_ascii_digit) {
        warn!(
            "field {} expected decimal digits, device sent {:02X?}",
            spec.name, raw
        );
    }

    Field {
        name: spec.name,
        value,
    }
}

/// Decode a validated device-info payload into named fields
///
/// Only ever called with a payload that passed frame validation in full; a
/// record is either decoded completely or not at all.
///
/// # Errors
///
/// Returns [`JkError::PayloadTooShort`] if the payload does not cover the
/// whole layout table.
pub fn decode_device_info(payload: &[u8]) -> Result<DeviceInfoRecord, JkError> {
    if payload.len() < DEVICE_INFO_MIN_PAYLOAD {
        return Err(JkError::PayloadTooShort {
            len: payload.len(),
            need: DEVICE_INFO_MIN_PAYLOAD,
        });
    }

    let fields = DEVICE_INFO_FIELDS
        .iter()
        .map(|spec| decode_field(spec, payload))
        .collect();

    Ok(DeviceInfoRecord::new(fields))
}
