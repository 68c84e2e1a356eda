//! Per-lock connection actor
//!
//! [`SmartLock`] owns one transport and serializes everything that happens on
//! it: at most one pairing attempt or one command runs at a time, and every
//! inbound event is consumed by the call that is currently waiting for it.
//! Separate locks are fully independent and can be driven concurrently.
//!
//! ## Disconnects
//!
//! If the link drops while a command is unfinished and auto-reconnect is
//! enabled, the actor reconnects, re-subscribes and keeps listening for the
//! rest of the response. The request itself is not written again. A drop
//! while idle, or with auto-reconnect disabled, is surfaced to the caller.

use keyturner_core::{
    ChannelEvent, Command, CommandChannel, CommandResponse, LockAction, LockConfig, PairedConfig,
    PairingSession, PairingStep, ProgressCallback,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::BleTransportConfig;
use crate::error::{BleTransportError, Result};
use crate::monitor::{
    spawn_liveness_monitor, LivenessTracker, MonitorEvent, SharedLiveness, StateCounter,
};
use crate::transport::{LockChannel, LockTransport, TransportEvent};

/// Connection actor for one lock
pub struct SmartLock<T: LockTransport> {
    id: String,
    transport: T,
    settings: BleTransportConfig,
    unpaired: Option<LockConfig>,
    channel: Option<CommandChannel>,
    data_subscribed: bool,
    state_counter: StateCounter,
    liveness: SharedLiveness,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<MonitorEvent>>,
}

impl<T: LockTransport> SmartLock<T> {
    /// A lock that still has to be paired
    pub fn new(transport: T, settings: BleTransportConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            id: transport.id(),
            liveness: LivenessTracker::shared(settings.liveness_timeout),
            transport,
            settings,
            unpaired: None,
            channel: None,
            data_subscribed: false,
            state_counter: StateCounter::default(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// A lock paired earlier, restored from its persisted config
    pub fn with_config(transport: T, settings: BleTransportConfig, config: PairedConfig) -> Self {
        let mut lock = Self::new(transport, settings);
        lock.channel = Some(CommandChannel::new(config));
        lock
    }

    /// Pair with these credentials instead of freshly generated ones
    pub fn with_lock_config(mut self, config: LockConfig) -> Self {
        self.unpaired = Some(config);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn is_paired(&self) -> bool {
        self.channel.is_some()
    }

    /// Config to persist once paired
    pub fn paired_config(&self) -> Option<&PairedConfig> {
        self.channel.as_ref().map(CommandChannel::config)
    }

    /// Receiver for [`MonitorEvent`]s; can be taken once
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<MonitorEvent>> {
        self.events_rx.take()
    }

    /// Start the periodic liveness check for this lock
    pub fn start_monitor(&self) -> JoinHandle<()> {
        spawn_liveness_monitor(
            self.id.clone(),
            self.liveness.clone(),
            self.settings.liveness_interval,
            self.events_tx.clone(),
        )
    }

    fn emit(&self, event: MonitorEvent) {
        // Nobody listening is fine
        let _ = self.events_tx.send(event);
    }

    async fn record_activity(&self) {
        let event = self.liveness.lock().await.record_activity(Instant::now());
        if let Some(event) = event {
            info!(lock = %self.id, "Lock is responding again");
            self.emit(event);
        }
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    pub async fn connect(&mut self) -> Result<()> {
        match timeout(self.settings.connection_timeout, self.transport.connect()).await {
            Ok(result) => result?,
            Err(_) => return Err(BleTransportError::ConnectionTimeout),
        }
        self.data_subscribed = false;
        debug!(lock = %self.id, "Connected");
        self.record_activity().await;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(channel) = self.channel.as_mut() {
            channel.abort();
        }
        self.data_subscribed = false;
        self.transport.disconnect().await
    }

    async fn ensure_data_subscription(&mut self) -> Result<()> {
        if !self.data_subscribed {
            self.transport.subscribe(LockChannel::Data).await?;
            self.data_subscribed = true;
        }
        Ok(())
    }

    /// Feed advertised manufacturer data for this lock
    pub async fn update_manufacturer_data(&mut self, data: &[u8]) {
        self.record_activity().await;
        if let Some(event) = self.state_counter.update(data) {
            debug!(lock = %self.id, ?event, "State counter changed");
            self.emit(event);
        }
    }

    /// Handle events that arrived while no call was waiting
    ///
    /// A disconnect seen here is not followed by a reconnect.
    pub async fn poll_events(&mut self) {
        while let Some(event) = self.transport.try_next_event() {
            match event {
                TransportEvent::Disconnected => {
                    debug!(lock = %self.id, "Disconnected while idle");
                    self.data_subscribed = false;
                    self.emit(MonitorEvent::Disconnected);
                }
                TransportEvent::Notification { channel, value } => {
                    self.record_activity().await;
                    warn!(
                        lock = %self.id,
                        ?channel,
                        bytes = value.len(),
                        "Received data while no command is waiting for it"
                    );
                    self.emit(MonitorEvent::UnexpectedData { bytes: value.len() });
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------------

    /// Pair with the lock; returns at once if already paired
    pub async fn pair(&mut self) -> Result<&PairedConfig> {
        if self.channel.is_none() {
            self.run_pairing().await?;
        }
        self.paired_config().ok_or(BleTransportError::NotPaired)
    }

    async fn run_pairing(&mut self) -> Result<()> {
        self.poll_events().await;
        if !self.transport.is_connected() {
            return Err(BleTransportError::NotConnected);
        }

        // Kept until pairing succeeds so a retry presents the same identity
        let config = match self.unpaired.clone() {
            Some(config) => config,
            None => {
                let config = LockConfig::new(self.id.clone())?;
                self.unpaired = Some(config.clone());
                config
            }
        };
        let session = PairingSession::new(config, self.settings.pairing.clone());

        self.transport.subscribe(LockChannel::Pairing).await?;
        info!(lock = %self.id, "Pairing");
        let result = self.drive_pairing(session).await;
        self.release_pairing_channel().await;

        let config = result?;
        info!(
            lock = %self.id,
            authorization_id = config.authorization_id(),
            "Paired"
        );
        self.unpaired = None;
        self.channel = Some(CommandChannel::new(config));
        Ok(())
    }

    async fn drive_pairing(&mut self, mut session: PairingSession) -> Result<PairedConfig> {
        let request = session.start()?;
        self.transport.write(LockChannel::Pairing, &request).await?;

        loop {
            let event = self
                .transport
                .next_event()
                .await
                .ok_or(BleTransportError::EventStreamClosed)?;

            match event {
                TransportEvent::Notification {
                    channel: LockChannel::Pairing,
                    value,
                } => {
                    self.record_activity().await;
                    let step = session.handle_notification(&value)?;
                    match step {
                        PairingStep::Wait => {}
                        PairingStep::Send(bytes) => {
                            self.transport.write(LockChannel::Pairing, &bytes).await?;
                        }
                        PairingStep::Paired(config) => return Ok(*config),
                    }
                }
                TransportEvent::Notification { channel, value } => {
                    warn!(
                        lock = %self.id,
                        ?channel,
                        bytes = value.len(),
                        "Ignoring notification while pairing"
                    );
                }
                TransportEvent::Disconnected => {
                    warn!(lock = %self.id, state = %session.state(), "Disconnected while pairing");
                    self.data_subscribed = false;
                    self.emit(MonitorEvent::Disconnected);
                    return Err(BleTransportError::ConnectionLost);
                }
            }
        }
    }

    // A dropped link has already released the subscription
    async fn release_pairing_channel(&mut self) {
        if !self.transport.is_connected() {
            return;
        }
        if let Err(err) = self.transport.unsubscribe(LockChannel::Pairing).await {
            warn!(lock = %self.id, "Failed to release pairing channel: {}", err);
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Run a command to completion
    pub async fn execute(&mut self, command: Command) -> Result<CommandResponse> {
        self.run_command(command, None).await
    }

    /// Run a command, reporting intermediate lock states to `progress`
    pub async fn execute_with_progress(
        &mut self,
        command: Command,
        progress: ProgressCallback,
    ) -> Result<CommandResponse> {
        self.run_command(command, Some(progress)).await
    }

    fn channel_mut(&mut self) -> Result<&mut CommandChannel> {
        self.channel.as_mut().ok_or(BleTransportError::NotPaired)
    }

    fn abort_command(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.abort();
        }
    }

    async fn write_data(&mut self, envelope: &[u8]) -> Result<()> {
        if let Err(err) = self.transport.write(LockChannel::Data, envelope).await {
            self.abort_command();
            return Err(err);
        }
        Ok(())
    }

    async fn run_command(
        &mut self,
        command: Command,
        progress: Option<ProgressCallback>,
    ) -> Result<CommandResponse> {
        self.poll_events().await;
        if self.channel.is_none() {
            return Err(BleTransportError::NotPaired);
        }
        if !self.transport.is_connected() {
            return Err(BleTransportError::NotConnected);
        }
        self.ensure_data_subscription().await?;

        let name = command.name();
        debug!(lock = %self.id, command = name, "Executing command");
        let envelope = self.channel_mut()?.submit(command, progress)?;
        self.write_data(&envelope).await?;

        loop {
            let Some(event) = self.transport.next_event().await else {
                self.abort_command();
                return Err(BleTransportError::EventStreamClosed);
            };

            match event {
                TransportEvent::Notification {
                    channel: LockChannel::Data,
                    value,
                } => {
                    self.record_activity().await;
                    let event = self.channel_mut()?.receive(&value)?;
                    match event {
                        ChannelEvent::Pending | ChannelEvent::Progress(_) => {}
                        ChannelEvent::Send(envelope) => self.write_data(&envelope).await?,
                        ChannelEvent::Completed(response) => {
                            debug!(
                                lock = %self.id,
                                command = name,
                                success = response.success,
                                "Command finished"
                            );
                            return Ok(response);
                        }
                        ChannelEvent::Unexpected { bytes } => {
                            self.emit(MonitorEvent::UnexpectedData { bytes });
                        }
                    }
                }
                TransportEvent::Notification { channel, value } => {
                    warn!(
                        lock = %self.id,
                        ?channel,
                        bytes = value.len(),
                        "Ignoring notification outside the command channel"
                    );
                }
                TransportEvent::Disconnected => self.resume_after_disconnect().await?,
            }
        }
    }

    // Reconnect mid-command and keep listening; the request is not resent
    async fn resume_after_disconnect(&mut self) -> Result<()> {
        self.data_subscribed = false;
        self.emit(MonitorEvent::Disconnected);

        let unfinished = self.channel.as_ref().is_some_and(CommandChannel::is_busy);
        if !(unfinished && self.settings.auto_reconnect) {
            warn!(lock = %self.id, "Disconnected during command");
            self.abort_command();
            return Err(BleTransportError::ConnectionLost);
        }

        info!(lock = %self.id, "Unexpected disconnect. Trying to reconnect");
        let reconnected = match self.connect().await {
            Ok(()) => self.ensure_data_subscription().await,
            Err(err) => Err(err),
        };
        if let Err(err) = reconnected {
            self.abort_command();
            return Err(err);
        }
        self.emit(MonitorEvent::Reconnected);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Convenience Operations
    // ------------------------------------------------------------------------

    pub async fn read_lock_state(&mut self) -> Result<CommandResponse> {
        debug!(lock = %self.id, "Reading lock state");
        self.execute(Command::keyturner_states()).await
    }

    pub async fn lock_action(&mut self, action: LockAction) -> Result<CommandResponse> {
        self.execute(Command::lock_action(action)).await
    }

    pub async fn unlock(&mut self) -> Result<CommandResponse> {
        self.lock_action(LockAction::Unlock).await
    }

    pub async fn lock(&mut self) -> Result<CommandResponse> {
        self.lock_action(LockAction::Lock).await
    }

    pub async fn unlatch(&mut self) -> Result<CommandResponse> {
        self.lock_action(LockAction::Unlatch).await
    }

    pub async fn request_config(&mut self) -> Result<CommandResponse> {
        self.execute(Command::request_config()).await
    }

    pub async fn request_advanced_config(&mut self) -> Result<CommandResponse> {
        self.execute(Command::request_advanced_config()).await
    }

    /// List authorization entries; needs the lock PIN
    pub async fn request_authorizations(
        &mut self,
        pin: u16,
        offset: u16,
        count: u16,
    ) -> Result<CommandResponse> {
        self.execute(Command::request_authorizations(pin, offset, count))
            .await
    }
}
