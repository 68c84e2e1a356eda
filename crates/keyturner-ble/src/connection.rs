//! btleplug-backed lock transport and the adapter manager that creates it

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::BleTransportConfig;
use crate::error::{BleTransportError, Result};
use crate::protocol::{
    manufacturer_data, KEYTURNER_SERVICE_UUID, PAIRING_SERVICE_UUID, REQUIRED_CHARACTERISTICS,
};
use crate::transport::{LockChannel, LockTransport, TransportEvent};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ----------------------------------------------------------------------------
// Manager
// ----------------------------------------------------------------------------

/// Manufacturer data advertised by a lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    /// Company id (LE) followed by the payload
    pub data: Vec<u8>,
}

/// Owns the BLE adapter used to find locks
pub struct BleManager {
    adapter: Adapter,
    config: BleTransportConfig,
}

impl BleManager {
    /// Open the first available adapter
    pub async fn new(config: BleTransportConfig) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|e| BleTransportError::ConnectionFailed(format!("BLE manager: {}", e)))?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleTransportError::AdapterNotAvailable)?;

        info!("BLE adapter initialized");
        Ok(Self { adapter, config })
    }

    pub fn config(&self) -> &BleTransportConfig {
        &self.config
    }

    /// Scan for devices advertising either lock service
    pub async fn start_scan(&self) -> Result<()> {
        let filter = ScanFilter {
            services: vec![KEYTURNER_SERVICE_UUID, PAIRING_SERVICE_UUID],
        };
        self.adapter.start_scan(filter).await?;
        info!("Started scanning for locks");
        Ok(())
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    /// Scan until a lock with the given address shows up
    pub async fn find_lock(&self, address: &str) -> Result<BtleplugTransport> {
        self.start_scan().await?;
        let deadline = Instant::now() + self.config.scan_timeout;

        let found = loop {
            if let Some(peripheral) = self.peripheral_by_address(address).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = self.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let peripheral = found.ok_or_else(|| BleTransportError::LockNotFound {
            id: address.to_string(),
        })?;
        debug!(lock = %address, "Found lock");
        Ok(BtleplugTransport::new(
            self.adapter.clone(),
            peripheral,
            self.config.connection_timeout,
        ))
    }

    async fn peripheral_by_address(&self, address: &str) -> Result<Option<Peripheral>> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }

    /// Forward manufacturer data advertisements until the receiver is dropped
    pub async fn advertisements(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;
        let adapter = self.adapter.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let CentralEvent::ManufacturerDataAdvertisement {
                    id,
                    manufacturer_data: entries,
                } = event
                else {
                    continue;
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let address = peripheral.address().to_string();
                for (company_id, payload) in entries {
                    let advertisement = Advertisement {
                        address: address.clone(),
                        data: manufacturer_data(company_id, &payload),
                    };
                    if tx.send(advertisement).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// Inbound events of the current connection
///
/// Only the forwarding tasks hold senders, so the queue reports closed once
/// they have all stopped or before the first connect.
#[derive(Debug)]
struct EventQueue {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl EventQueue {
    fn new() -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self { rx }
    }

    /// Start a fresh queue for a new connection, dropping stale events
    fn open(&mut self) -> mpsc::UnboundedSender<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.rx = rx;
        tx
    }

    async fn next(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    fn try_next(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }
}

/// [`LockTransport`] over a btleplug peripheral
pub struct BtleplugTransport {
    adapter: Adapter,
    peripheral: Peripheral,
    connection_timeout: Duration,
    pairing: Option<Characteristic>,
    data: Option<Characteristic>,
    events: EventQueue,
    tasks: Vec<JoinHandle<()>>,
    connected: bool,
}

impl BtleplugTransport {
    pub fn new(adapter: Adapter, peripheral: Peripheral, connection_timeout: Duration) -> Self {
        Self {
            adapter,
            peripheral,
            connection_timeout,
            pairing: None,
            data: None,
            events: EventQueue::new(),
            tasks: Vec::new(),
            connected: false,
        }
    }

    fn characteristic(&self, channel: LockChannel) -> Result<&Characteristic> {
        let found = match channel {
            LockChannel::Pairing => self.pairing.as_ref(),
            LockChannel::Data => self.data.as_ref(),
        };
        found.ok_or_else(|| BleTransportError::CharacteristicNotFound {
            characteristic: channel.characteristic_uuid().to_string(),
        })
    }

    async fn discover(&mut self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| BleTransportError::ServiceDiscoveryFailed(e.to_string()))?;

        let characteristics = self.peripheral.characteristics();
        for required in REQUIRED_CHARACTERISTICS {
            if !characteristics.iter().any(|c| c.uuid == required) {
                return Err(BleTransportError::CharacteristicNotFound {
                    characteristic: required.to_string(),
                });
            }
        }

        let find = |channel: LockChannel| {
            characteristics
                .iter()
                .find(|c| c.uuid == channel.characteristic_uuid())
                .cloned()
        };
        self.pairing = find(LockChannel::Pairing);
        self.data = find(LockChannel::Data);
        Ok(())
    }

    // Forward notifications and disconnects into the event queue
    async fn start_forwarding(&mut self) -> Result<()> {
        self.stop_forwarding();
        let event_tx = self.events.open();

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;
        let tx = event_tx.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let Some(channel) = LockChannel::from_characteristic(notification.uuid) else {
                    continue;
                };
                let event = TransportEvent::Notification {
                    channel,
                    value: notification.value,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        }));

        let mut central_events = self
            .adapter
            .events()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;
        let id = self.peripheral.id();
        let tx = event_tx;
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        let _ = tx.send(TransportEvent::Disconnected);
                        break;
                    }
                }
            }
        }));

        Ok(())
    }

    fn stop_forwarding(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}

#[async_trait]
impl LockTransport for BtleplugTransport {
    fn id(&self) -> String {
        self.peripheral.address().to_string()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<()> {
        match timeout(self.connection_timeout, self.peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(lock = %self.id(), "Failed to connect: {}", e);
                return Err(BleTransportError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                error!(lock = %self.id(), "Connection timed out");
                return Err(BleTransportError::ConnectionTimeout);
            }
        }

        self.discover().await?;
        self.start_forwarding().await?;
        self.connected = true;
        info!(lock = %self.id(), "Connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stop_forwarding();
        self.connected = false;
        self.peripheral.disconnect().await?;
        info!(lock = %self.id(), "Disconnected");
        Ok(())
    }

    async fn subscribe(&mut self, channel: LockChannel) -> Result<()> {
        let characteristic = self.characteristic(channel)?.clone();
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))
    }

    async fn unsubscribe(&mut self, channel: LockChannel) -> Result<()> {
        let characteristic = self.characteristic(channel)?.clone();
        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))
    }

    async fn write(&mut self, channel: LockChannel, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(channel)?.clone();
        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| BleTransportError::WriteFailed(e.to_string()))?;
        debug!(lock = %self.id(), ?channel, bytes = data.len(), "Wrote frame");
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.next().await;
        if event == Some(TransportEvent::Disconnected) {
            self.connected = false;
        }
        event
    }

    fn try_next_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.try_next();
        if event == Some(TransportEvent::Disconnected) {
            self.connected = false;
        }
        event
    }
}
