use btleplug::{
    api::{
        BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    error::{JkError, Result},
    session::FrameTransport,
    types::{DiscoveredDevice, SessionConfig},
    JK_CHAR_UUID, JK_SERVICE_UUID,
};

/// Interval between peripheral-list polls while scanning for the target
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Scan for peripherals advertising the JK vendor service
///
/// Listens for the given duration and returns whatever was seen, with the
/// advertised name and signal strength where available. No peripheral is
/// contacted; whether a device actually speaks the protocol is only
/// established when a session resolves its vendor channels.
///
/// # Errors
///
/// Returns [`JkError::DeviceNotFound`] if no Bluetooth adapter is available,
/// or [`JkError::Ble`] for other Bluetooth failures.
pub async fn discover_devices(scan_duration: Duration) -> Result<Vec<DiscoveredDevice>> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let central = adapters.into_iter().next().ok_or(JkError::DeviceNotFound)?;

    info!("scanning for JK BMS devices...");
    central
        .start_scan(ScanFilter {
            services: vec![JK_SERVICE_UUID],
        })
        .await?;

    tokio::time::sleep(scan_duration).await;

    central.stop_scan().await?;

    let mut devices = Vec::new();
    for peripheral in central.peripherals().await? {
        let properties = peripheral.properties().await?;
        let (name, rssi) = properties.map_or((None, None), |p| (p.local_name, p.rssi));
        devices.push(DiscoveredDevice {
            name,
            address: peripheral.address(),
            rssi,
        });
    }

    info!("scan complete, found {} device(s)", devices.len());
    Ok(devices)
}

/// An established BLE link to one BMS, ready for the protocol exchange
///
/// Owns the connection, the resolved vendor channels and the notification
/// forwarding task. Constructed subscribed, so the first response fragment
/// cannot be lost; consumed through the [`FrameTransport`] trait.
pub struct BleTransport {
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_char: Characteristic,
    fragments: mpsc::UnboundedReceiver<Vec<u8>>,
    forwarder: JoinHandle<()>,
    closed: bool,
}

impl BleTransport {
    /// Connect to the peripheral at `address` and prepare the channels
    ///
    /// Walks the establishment sequence: scan until the target is sighted
    /// (JK units refuse a cold connect unless a scan has recently seen
    /// them), connect within the configured timeout, discover services,
    /// resolve the vendor write and notify channels, and subscribe. The
    /// subscription is registered before any command can be written.
    ///
    /// # Errors
    ///
    /// Returns [`JkError::DeviceNotFound`] if the target never appears in
    /// the scan, [`JkError::ConnectionFailed`] on connect timeout or
    /// refusal, and [`JkError::ChannelNotFound`] if the peripheral does not
    /// expose the vendor characteristic with the required properties.
    pub async fn establish(address: BDAddr, config: &SessionConfig) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let central = adapters.into_iter().next().ok_or(JkError::DeviceNotFound)?;

        debug!("connecting to {address}");
        let peripheral = Self::locate_peripheral(&central, address, config).await?;

        timeout(
            Duration::from_millis(config.connect_timeout_ms),
            peripheral.connect(),
        )
        .await
        .map_err(|_| {
            JkError::ConnectionFailed(format!(
                "connect to {address} timed out after {}ms",
                config.connect_timeout_ms
            ))
        })?
        .map_err(|e| JkError::ConnectionFailed(e.to_string()))?;
        debug!("connected to {address}");

        peripheral.discover_services().await?;
        let (write_char, notify_char) = Self::resolve_channels(&peripheral)?;
        debug!(
            "vendor channels resolved: write={}, notify={}",
            write_char.uuid, notify_char.uuid
        );

        peripheral.subscribe(&notify_char).await?;

        let mut stream = peripheral.notifications().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let notify_uuid = notify_char.uuid;
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid == notify_uuid && tx.send(notification.value).is_err() {
                    break;
                }
            }
        });

        info!("subscribed, session transport ready for {address}");

        Ok(Self {
            peripheral,
            write_char,
            notify_char,
            fragments: rx,
            forwarder,
            closed: false,
        })
    }

    /// Scan until the target address shows up, bounded by the connect timeout
    async fn locate_peripheral(
        central: &Adapter,
        address: BDAddr,
        config: &SessionConfig,
    ) -> Result<Peripheral> {
        central
            .start_scan(ScanFilter {
                services: vec![JK_SERVICE_UUID],
            })
            .await?;

        let interval = SCAN_POLL_INTERVAL.as_millis() as u64;
        let attempts = (config.connect_timeout_ms / interval).max(1);

        for _ in 0..attempts {
            for peripheral in central.peripherals().await? {
                if peripheral.address() == address {
                    central.stop_scan().await?;
                    return Ok(peripheral);
                }
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }

        if let Err(e) = central.stop_scan().await {
            warn!("failed to stop scan: {e}");
        }
        Err(JkError::DeviceNotFound)
    }

    /// Locate the vendor write and notify channels
    ///
    /// Matches on (UUID, property): some JK firmware revisions expose two
    /// characteristics under the same vendor UUID, one carrying notify and
    /// one carrying write, so UUID alone does not identify a channel.
    fn resolve_channels(peripheral: &Peripheral) -> Result<(Characteristic, Characteristic)> {
        let characteristics = peripheral.characteristics();

        let notify_char = characteristics
            .iter()
            .find(|c| c.uuid == JK_CHAR_UUID && c.properties.contains(CharPropFlags::NOTIFY))
            .cloned()
            .ok_or(JkError::ChannelNotFound {
                uuid: JK_CHAR_UUID,
                property: "notify",
            })?;

        let write_char = characteristics
            .iter()
            .find(|c| {
                c.uuid == JK_CHAR_UUID
                    && c.properties
                        .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
            })
            .cloned()
            .ok_or(JkError::ChannelNotFound {
                uuid: JK_CHAR_UUID,
                property: "write",
            })?;

        Ok((write_char, notify_char))
    }
}

#[async_trait::async_trait]
impl FrameTransport for BleTransport {
    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let write_type = if self
            .write_char
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };

        self.peripheral
            .write(&self.write_char, frame, write_type)
            .await?;
        Ok(())
    }

    async fn next_fragment(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.fragments.recv().await)
    }

    async fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.forwarder.abort();

        if let Err(e) = self.peripheral.unsubscribe(&self.notify_char).await {
            debug!("unsubscribe during teardown failed: {e}");
        }

        if self.peripheral.is_connected().await.unwrap_or(false) {
            self.peripheral.disconnect().await?;
        }

        debug!("transport shut down");
        Ok(())
    }
}
