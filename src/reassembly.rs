use crate::error::FrameError;
use crate::protocol::{FrameHeader, RESP_MAGIC};
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

/// Accumulates transport fragments into one logical frame
///
/// The transport delivers a response as a series of small notifications in
/// transmission order. The first fragment carries the frame header, from
/// which the declared total length is read; subsequent fragments are appended
/// until exactly that many bytes have accumulated. The reassembler never
/// reorders or deduplicates — if the stream is inconsistent it rejects the
/// frame rather than mis-concatenate.
///
/// At most one frame is under construction at a time. A completed frame is
/// handed off by value; validation is the codec's job, not this type's.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: BytesMut,
    declared_len: usize,
}

impl Reassembler {
    /// Create an idle reassembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is currently under construction
    #[must_use]
    pub fn is_building(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Discard any partially built frame and return to idle
    pub fn reset(&mut self) {
        if self.is_building() {
            debug!("discarding {} partial bytes", self.buf.len());
        }
        self.buf.clear();
        self.declared_len = 0;
    }

    /// Feed one fragment; returns the complete frame once the declared
    /// length is reached
    ///
    /// A fragment beginning with the response magic while a frame is already
    /// under construction restarts reassembly at that fragment: the device
    /// has evidently started a new frame, and the stale partial one is
    /// discarded rather than mis-concatenated.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TruncatedHeader`] if the first fragment cannot
    /// hold the frame header, [`FrameError::HeaderMismatch`] if it does not
    /// open with the response magic, and [`FrameError::LengthMismatch`] if
    /// more bytes arrive than the header declared. Any error discards the
    /// partial frame and returns the reassembler to idle.
    pub fn push(&mut self, fragment: &[u8]) -> Result<Option<Bytes>, FrameError> {
        if self.is_building() && fragment.starts_with(&RESP_MAGIC) {
            warn!(
                "new frame header after {} of {} expected bytes, restarting",
                self.buf.len(),
                self.declared_len
            );
            self.reset();
        }

        if !self.is_building() {
            let header = match FrameHeader::parse(fragment) {
                Ok(header) => header,
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            };
            self.declared_len = header.declared_len;
            debug!(
                "frame start: record type {:#04X}, declared length {}",
                header.record_type, header.declared_len
            );
        }

        self.buf.extend_from_slice(fragment);

        if self.buf.len() > self.declared_len {
            let err = FrameError::LengthMismatch {
                declared: self.declared_len,
                actual: self.buf.len(),
            };
            self.reset();
            return Err(err);
        }

        if self.buf.len() == self.declared_len {
            let frame = self.buf.split().freeze();
            self.declared_len = 0;
            debug!("frame complete: {} bytes", frame.len());
            return Ok(Some(frame));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tests::build_response;
    use crate::protocol::RECORD_DEVICE_INFO;

    fn fixture_frame() -> Bytes {
        let payload: Vec<u8> = (0..292u16).map(|i| u8::try_from(i % 251).unwrap()).collect();
        build_response(RECORD_DEVICE_INFO, &payload)
    }

    #[test]
    fn test_single_fragment_frame() {
        let frame = fixture_frame();
        let mut reassembler = Reassembler::new();

        let out = reassembler.push(&frame).unwrap().unwrap();
        assert_eq!(out, frame);
        assert!(!reassembler.is_building());
    }

    #[test]
    fn test_reassembly_invariant_to_fragment_boundary() {
        let frame = fixture_frame();

        for chunk_size in [1usize, 7, 20, 182] {
            let mut reassembler = Reassembler::new();
            let mut out = None;

            for fragment in frame.chunks(chunk_size) {
                assert!(out.is_none(), "frame completed before final fragment");
                out = reassembler.push(fragment).unwrap();
            }

            assert_eq!(
                out.expect("frame should complete on the final fragment"),
                frame,
                "chunk size {chunk_size} altered the assembled bytes"
            );
        }
    }

    #[test]
    fn test_short_delivery_leaves_frame_building() {
        let frame = fixture_frame();
        let mut reassembler = Reassembler::new();

        for fragment in frame[..200].chunks(20) {
            assert!(reassembler.push(fragment).unwrap().is_none());
        }

        // The stream ended early; the session layer observes is_building and
        // rejects, it never sees a truncated frame
        assert!(reassembler.is_building());
    }

    #[test]
    fn test_first_fragment_too_short_for_header() {
        let mut reassembler = Reassembler::new();

        let err = reassembler.push(&[0x55, 0xAA, 0xEB]).unwrap_err();
        assert!(matches!(err, FrameError::TruncatedHeader { len: 3 }));
        assert!(!reassembler.is_building());
    }

    #[test]
    fn test_first_fragment_wrong_magic() {
        let mut reassembler = Reassembler::new();

        let err = reassembler
            .push(&[0xDE, 0xAD, 0xBE, 0xEF, 0x03, 0x2C, 0x01])
            .unwrap_err();
        assert!(matches!(err, FrameError::HeaderMismatch { .. }));
        assert!(!reassembler.is_building());
    }

    #[test]
    fn test_overrun_rejected() {
        let frame = fixture_frame();
        let mut reassembler = Reassembler::new();

        for fragment in frame[..280].chunks(20) {
            assert!(reassembler.push(fragment).unwrap().is_none());
        }

        // Final fragment runs 20 bytes past the declared length
        let mut overrun = frame[280..].to_vec();
        overrun.extend_from_slice(&[0x00; 20]);
        let err = reassembler.push(&overrun).unwrap_err();
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                declared: 300,
                actual: 320
            }
        ));
        assert!(!reassembler.is_building());
    }

    #[test]
    fn test_new_header_mid_frame_restarts() {
        let frame = fixture_frame();
        let mut reassembler = Reassembler::new();

        // Partial frame, then the device starts over from the beginning
        reassembler.push(&frame[..40]).unwrap();

        let mut out = None;
        for fragment in frame.chunks(20) {
            out = reassembler.push(fragment).unwrap();
        }

        assert_eq!(out.unwrap(), frame);
    }

    #[test]
    fn test_reusable_after_completion() {
        let frame = fixture_frame();
        let mut reassembler = Reassembler::new();

        for _ in 0..2 {
            let mut out = None;
            for fragment in frame.chunks(64) {
                out = reassembler.push(fragment).unwrap();
            }
            assert_eq!(out.unwrap(), frame);
        }
    }
}
