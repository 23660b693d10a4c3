use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};

/// Magic bytes opening every command frame sent to the device
///
/// Extracted from captures of the vendor's mobile application. The response
/// header uses the same four bytes pairwise swapped, see [`RESP_MAGIC`].
pub const CMD_MAGIC: [u8; 4] = [0xAA, 0x55, 0x90, 0xEB];

/// Magic bytes opening every response frame sent by the device
pub const RESP_MAGIC: [u8; 4] = [0x55, 0xAA, 0xEB, 0x90];

/// Command frame size in bytes
pub const COMMAND_FRAME_SIZE: usize = 20;

/// Size of the zero-filled reserved region in a command frame
pub const COMMAND_RESERVED_SIZE: usize = 14;

/// Response frame header size: magic, record type, declared total length
pub const FRAME_HEADER_SIZE: usize = 7;

/// Smallest well-formed response frame: header plus checksum, empty payload
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE + 1;

/// Record type of a device-info response
pub const RECORD_DEVICE_INFO: u8 = 0x03;

/// Command codes understood by the BMS
///
/// The device-info read is the only transaction this crate performs; the
/// code was recovered from the vendor application's request captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    /// Request the device identity and configuration record
    DeviceInfo = 0x97,
}

impl CommandCode {
    /// Record type the device answers this command with
    #[must_use]
    pub const fn expected_record(self) -> u8 {
        match self {
            Self::DeviceInfo => RECORD_DEVICE_INFO,
        }
    }
}

/// Modulo-256 sum of all bytes
///
/// The device uses plain sum-and-truncate, not a CRC. Wraparound is part of
/// the scheme and must be preserved.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Encode an outbound command frame
///
/// Layout: 4-byte magic, 1-byte command code, 14-byte zero-filled reserved
/// region, 1-byte checksum over the preceding 19 bytes. Deterministic; the
/// same code always yields the same 20 bytes.
#[must_use]
pub fn encode_command(code: CommandCode) -> Bytes {
    let mut buf = BytesMut::with_capacity(COMMAND_FRAME_SIZE);

    buf.extend_from_slice(&CMD_MAGIC);
    buf.put_u8(code as u8);
    buf.put_bytes(0, COMMAND_RESERVED_SIZE);
    let sum = checksum(&buf);
    buf.put_u8(sum);

    buf.freeze()
}

/// Parsed response frame header
///
/// Layout: 4-byte magic, 1-byte record type, 2-byte declared total length
/// (little-endian, counting the whole frame including header and checksum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Record type byte identifying the response kind
    pub record_type: u8,
    /// Total frame length the device declares it will send
    pub declared_len: usize,
}

impl FrameHeader {
    /// Parse a header from the initial bytes of a frame
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TruncatedHeader`] if fewer than
    /// [`FRAME_HEADER_SIZE`] bytes are available and
    /// [`FrameError::HeaderMismatch`] if the magic does not match.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TruncatedHeader { len: data.len() });
        }

        if data[0..4] != RESP_MAGIC {
            let mut actual = [0u8; 4];
            actual.copy_from_slice(&data[0..4]);
            return Err(FrameError::HeaderMismatch {
                expected: RESP_MAGIC,
                actual,
            });
        }

        let declared_len = usize::from(u16::from_le_bytes([data[5], data[6]]));

        Ok(Self {
            record_type: data[4],
            declared_len,
        })
    }
}

/// A response frame that passed all integrity checks
///
/// Header and checksum are stripped; only the raw payload region and the
/// record type remain, ready for decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFrame {
    /// Record type from the frame header
    pub record_type: u8,
    /// Payload region between header and checksum
    pub payload: Bytes,
}

/// Validate a complete response frame
///
/// Checks, in order: the magic header, agreement between the declared total
/// length and the byte count received, and the trailing modulo-256 checksum.
///
/// # Errors
///
/// Returns [`FrameError::HeaderMismatch`], [`FrameError::LengthMismatch`] or
/// [`FrameError::ChecksumMismatch`] naming the expected and observed values;
/// [`FrameError::TruncatedHeader`] if the frame cannot even hold a header.
pub fn validate(frame: Bytes) -> Result<ValidatedFrame, FrameError> {
    let header = FrameHeader::parse(&frame)?;

    if frame.len() < MIN_FRAME_SIZE || header.declared_len != frame.len() {
        return Err(FrameError::LengthMismatch {
            declared: header.declared_len,
            actual: frame.len(),
        });
    }

    let expected = checksum(&frame[..frame.len() - 1]);
    let actual = frame[frame.len() - 1];
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let payload = frame.slice(FRAME_HEADER_SIZE..frame.len() - 1);

    Ok(ValidatedFrame {
        record_type: header.record_type,
        payload,
    })
}
