use crate::decode::decode_device_info;
use crate::error::{JkError, Result};
use crate::protocol::{self, CommandCode, ValidatedFrame};
use crate::reassembly::Reassembler;
use crate::types::{DeviceInfoRecord, SessionConfig, SessionState};
use async_trait::async_trait;
use btleplug::api::BDAddr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Automatic retries permitted after a response timeout
///
/// Transient radio conditions are common with these devices, so one retry of
/// the request is worth it. Frame integrity failures indicate a protocol or
/// firmware mismatch and are never retried.
pub const MAX_REQUEST_RETRIES: u32 = 1;

/// The transport primitives the session engine depends on
///
/// An implementation arrives connected and subscribed: commands written via
/// [`send_frame`](Self::send_frame) produce fragments on
/// [`next_fragment`](Self::next_fragment) in delivery order, at most once
/// each. [`BleTransport`](crate::ble::BleTransport) is the real
/// implementation; tests script their own.
#[async_trait]
pub trait FrameTransport: Send {
    /// Write one command frame to the vendor write channel
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Receive the next notification fragment, in arrival order
    ///
    /// Returns `Ok(None)` when the notification stream has ended, which the
    /// session treats as a disconnect.
    async fn next_fragment(&mut self) -> Result<Option<Vec<u8>>>;

    /// Unsubscribe and drop the link; must tolerate being called twice
    async fn shutdown(&mut self) -> Result<()>;
}

/// One transaction against one BMS
///
/// A session owns its transport exclusively for the duration of the exchange
/// and walks `Subscribed → RequestSent → AwaitingFrame → Decoded`, with
/// `Failed` on any fatal error. Teardown is attempted on every fatal path;
/// [`close`](Self::close) is idempotent and never raises.
///
/// The session is one-shot: after a decode or a fatal error, further
/// requests are rejected with [`JkError::InvalidState`] rather than queued.
pub struct Session<T: FrameTransport> {
    transport: T,
    reassembler: Reassembler,
    state: SessionState,
    retries_performed: u32,
    config: SessionConfig,
}

impl<T: FrameTransport> Session<T> {
    /// Wrap an established transport
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            reassembler: Reassembler::new(),
            state: SessionState::Subscribed,
            retries_performed: 0,
            config,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Number of automatic retries performed so far
    #[must_use]
    pub const fn retries_performed(&self) -> u32 {
        self.retries_performed
    }

    /// Send the device-info request and decode the response
    ///
    /// Encodes the command, writes it, awaits the fragmented response,
    /// validates the reassembled frame and decodes it. One automatic retry
    /// is performed after a timeout; a second consecutive timeout is fatal.
    /// On any fatal error the link is torn down before the error is
    /// returned, so no stale subscription or open connection is left behind.
    ///
    /// # Errors
    ///
    /// [`JkError::Timeout`] if no complete valid frame arrived within the
    /// window on either attempt, [`JkError::Frame`] if the response failed
    /// validation, [`JkError::Disconnected`] if the notification stream
    /// ended mid-frame, and [`JkError::InvalidState`] if the session has
    /// already completed or failed.
    pub async fn request_device_info(&mut self) -> Result<DeviceInfoRecord> {
        if self.state != SessionState::Subscribed {
            return Err(JkError::InvalidState { state: self.state });
        }

        loop {
            self.reassembler.reset();

            match self.attempt_request().await {
                Ok(record) => {
                    self.state = SessionState::Decoded;
                    info!("device info decoded after {} retries", self.retries_performed);
                    return Ok(record);
                }
                Err(e) if e.is_transient() && self.retries_performed < MAX_REQUEST_RETRIES => {
                    self.retries_performed += 1;
                    warn!(
                        "no response within {}ms, retry {} of {}",
                        self.config.response_timeout_ms, self.retries_performed, MAX_REQUEST_RETRIES
                    );
                }
                Err(e) => {
                    self.state = SessionState::Failed;
                    self.close().await;
                    return Err(e);
                }
            }
        }
    }

    async fn attempt_request(&mut self) -> Result<DeviceInfoRecord> {
        let command = protocol::encode_command(CommandCode::DeviceInfo);
        debug!("TX command: {:02X?}", &command[..]);

        self.state = SessionState::RequestSent;
        self.transport.send_frame(&command).await?;
        self.state = SessionState::AwaitingFrame;

        let window = Duration::from_millis(self.config.response_timeout_ms);
        let validated = timeout(window, self.receive_frame(CommandCode::DeviceInfo))
            .await
            .map_err(|_| JkError::Timeout {
                timeout_ms: self.config.response_timeout_ms,
            })??;

        decode_device_info(&validated.payload)
    }

    /// Consume fragments until a validated frame of the requested record
    /// type is complete
    async fn receive_frame(&mut self, command: CommandCode) -> Result<ValidatedFrame> {
        let expected = command.expected_record();

        loop {
            let fragment = self
                .transport
                .next_fragment()
                .await?
                .ok_or(JkError::Disconnected)?;
            debug!("RX fragment ({} bytes): {:02X?}", fragment.len(), fragment);

            if let Some(frame) = self.reassembler.push(&fragment)? {
                let validated = protocol::validate(frame)?;
                if validated.record_type == expected {
                    return Ok(validated);
                }
                debug!(
                    "ignoring record type {:#04X} while waiting for {expected:#04X}",
                    validated.record_type
                );
            }
        }
    }

    /// Unsubscribe and disconnect
    ///
    /// Idempotent: closing an already-closed session does nothing, and
    /// teardown failures are logged, never raised.
    pub async fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }

        self.state = SessionState::Disconnecting;
        self.reassembler.reset();

        if let Err(e) = self.transport.shutdown().await {
            warn!("ignoring teardown error: {e}");
        }

        self.state = SessionState::Disconnected;
    }
}

/// Read the device-info record from the BMS at the given address
///
/// The full one-shot transaction: connect, resolve the vendor channels,
/// subscribe, request, decode, disconnect. The link is released on every
/// exit path, success or failure.
///
/// # Errors
///
/// Any [`JkError`] from connection establishment
/// ([`crate::ble::BleTransport::establish`]) or from the request
/// ([`Session::request_device_info`]).
pub async fn read_device_info(address: BDAddr, config: SessionConfig) -> Result<DeviceInfoRecord> {
    let transport = crate::ble::BleTransport::establish(address, &config).await?;
    let mut session = Session::new(transport, config);

    let result = session.request_device_info().await;
    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::fixture_payload;
    use crate::error::FrameError;
    use crate::protocol::tests::build_response;
    use crate::protocol::RECORD_DEVICE_INFO;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio_test::assert_ok;

    const TEST_CONFIG: SessionConfig = SessionConfig {
        connect_timeout_ms: 1_000,
        response_timeout_ms: 50,
    };

    /// One scripted delivery on the notification stream
    enum Step {
        /// Deliver a fragment
        Fragment(Vec<u8>),
        /// Go silent long enough for the response window to lapse
        Stall,
        /// End of stream
        End,
    }

    /// Transport whose notification stream follows a fixed script
    struct ScriptedTransport {
        script: VecDeque<Step>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        shutdowns: Arc<AtomicU32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Step>) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>, Arc<AtomicU32>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let shutdowns = Arc::new(AtomicU32::new(0));
            (
                Self {
                    script: script.into(),
                    sent: sent.clone(),
                    shutdowns: shutdowns.clone(),
                },
                sent,
                shutdowns,
            )
        }
    }

    #[async_trait]
    impl FrameTransport for ScriptedTransport {
        async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        async fn next_fragment(&mut self) -> Result<Option<Vec<u8>>> {
            loop {
                match self.script.pop_front() {
                    Some(Step::Fragment(data)) => return Ok(Some(data)),
                    Some(Step::Stall) => {
                        // Far beyond the test response window; the session's
                        // timeout cancels this wait
                        tokio::time::sleep(Duration::from_millis(5_000)).await;
                    }
                    Some(Step::End) | None => return Ok(None),
                }
            }
        }

        async fn shutdown(&mut self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn device_info_frame() -> Bytes {
        build_response(RECORD_DEVICE_INFO, &fixture_payload())
    }

    fn fragmented(frame: &Bytes, chunk: usize) -> Vec<Step> {
        frame
            .chunks(chunk)
            .map(|c| Step::Fragment(c.to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn test_happy_path_across_fragments() {
        let frame = device_info_frame();
        let (transport, sent, _) = ScriptedTransport::new(fragmented(&frame, 20));
        let mut session = Session::new(transport, TEST_CONFIG);

        let record = tokio_test::assert_ok!(session.request_device_info().await);

        assert_eq!(record.model(), "JK_B2A24S15P");
        assert_eq!(record.hardware_version(), "11.XW");
        assert_eq!(record.software_version(), "11.26");
        assert_eq!(record.device_name(), "JK_B2A24S15P");
        assert_eq!(record.device_passcode(), "1234");
        assert_eq!(record.manufacture_date(), "230430");
        assert_eq!(record.protocol_passcode(), "0000");

        assert_eq!(session.state(), SessionState::Decoded);
        assert_eq!(session.retries_performed(), 0);
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(sent.lock().unwrap()[0].len(), 20);
    }

    #[tokio::test]
    async fn test_timeout_then_success_retries_once() {
        let frame = device_info_frame();
        let mut script = vec![Step::Stall];
        script.extend(fragmented(&frame, 128));
        let (transport, sent, _) = ScriptedTransport::new(script);
        let mut session = Session::new(transport, TEST_CONFIG);

        let record = session.request_device_info().await.unwrap();

        assert_eq!(record.device_name(), "JK_B2A24S15P");
        assert_eq!(session.retries_performed(), 1);
        assert_eq!(sent.lock().unwrap().len(), 2);
        assert_eq!(session.state(), SessionState::Decoded);
    }

    #[tokio::test]
    async fn test_double_timeout_is_fatal_and_tears_down() {
        let (transport, sent, shutdowns) = ScriptedTransport::new(vec![Step::Stall, Step::Stall]);
        let mut session = Session::new(transport, TEST_CONFIG);

        let err = session.request_device_info().await.unwrap_err();

        assert!(matches!(err, JkError::Timeout { timeout_ms: 50 }));
        assert_eq!(session.retries_performed(), 1);
        assert_eq!(sent.lock().unwrap().len(), 2);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flipped_checksum_not_retried() {
        let frame = device_info_frame();
        let mut corrupted = frame.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;

        let script = fragmented(&Bytes::from(corrupted), 20);
        let (transport, sent, shutdowns) = ScriptedTransport::new(script);
        let mut session = Session::new(transport, TEST_CONFIG);

        let err = session.request_device_info().await.unwrap_err();

        assert!(matches!(
            err,
            JkError::Frame(FrameError::ChecksumMismatch { .. })
        ));
        assert_eq!(session.retries_performed(), 0);
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_end_mid_frame_is_disconnect_not_truncated_decode() {
        let frame = device_info_frame();
        let mut script = fragmented(&frame.slice(..200), 20);
        script.push(Step::End);
        let (transport, _, shutdowns) = ScriptedTransport::new(script);
        let mut session = Session::new(transport, TEST_CONFIG);

        let err = session.request_device_info().await.unwrap_err();

        assert!(matches!(err, JkError::Disconnected));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_record_types_skipped() {
        let frame = device_info_frame();
        let mut script = fragmented(&build_response(0x02, &[0x00; 64]), 20);
        script.extend(fragmented(&frame, 20));
        let (transport, _, _) = ScriptedTransport::new(script);
        let mut session = Session::new(transport, TEST_CONFIG);

        let record = session.request_device_info().await.unwrap();
        assert_eq!(record.model(), "JK_B2A24S15P");
        assert_eq!(session.retries_performed(), 0);
    }

    #[tokio::test]
    async fn test_second_request_rejected() {
        let frame = device_info_frame();
        let (transport, _, _) = ScriptedTransport::new(fragmented(&frame, 64));
        let mut session = Session::new(transport, TEST_CONFIG);

        session.request_device_info().await.unwrap();

        let err = session.request_device_info().await.unwrap_err();
        assert!(matches!(
            err,
            JkError::InvalidState {
                state: SessionState::Decoded
            }
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, _, shutdowns) = ScriptedTransport::new(vec![]);
        let mut session = Session::new(transport, TEST_CONFIG);

        session.close().await;
        session.close().await;

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
