//! Device Session
//!
//! The host-facing handle for one appliance. Combines the connection and
//! subscription managers, exposes the last known status and turns host
//! requests into protocol commands.

use crate::domain::models::{AppEvent, ConnectionState, DeviceAddress, DeviceStatus};
use crate::domain::modes::{FanLevel, OperatingMode, PresetMode};
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::protocol::{self, Command};
use crate::infrastructure::bluetooth::retry::RetryPolicy;
use crate::infrastructure::bluetooth::state::DeviceState;
use crate::infrastructure::bluetooth::subscription::SubscriptionManager;
use crate::infrastructure::bluetooth::transport::{DisconnectHandler, Transport};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub service_uuid: Uuid,
    pub status_characteristic: Uuid,
    pub command_characteristic: Uuid,
    /// Budget for reconnects and `update()`
    pub max_connect_attempts: u32,
    pub max_subscribe_attempts: u32,
    pub attempt_timeout: Option<Duration>,
    /// Reconnect and resubscribe after an unexpected disconnect
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::SERVICE_UUID,
            status_characteristic: protocol::STATUS_CHAR_UUID,
            command_characteristic: protocol::COMMAND_CHAR_UUID,
            max_connect_attempts: 10,
            max_subscribe_attempts: 10,
            attempt_timeout: Some(Duration::from_secs(30)),
            auto_reconnect: true,
        }
    }
}

/// Messages from transport callbacks to the session control loop
#[derive(Debug)]
enum SessionSignal {
    Reconnect,
}

/// At most one reconnect runs at a time. A link loss seen while one is
/// running sets `pending`, and the running reconnect goes round again.
#[derive(Default)]
struct ReconnectGuard {
    in_progress: AtomicBool,
    pending: AtomicBool,
}

impl ReconnectGuard {
    /// True if the caller now owns the reconnect; otherwise the loss is
    /// queued on the one already running.
    fn begin(&self) -> bool {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            self.pending.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Release ownership. Returns true if a loss was queued meanwhile and
    /// the caller took ownership back to handle it.
    fn finish(&self) -> bool {
        self.in_progress.store(false, Ordering::SeqCst);
        if !self.pending.swap(false, Ordering::SeqCst) {
            return false;
        }
        // a handler that fired after the release already signalled
        !self.in_progress.swap(true, Ordering::SeqCst)
    }

    fn abandon(&self) {
        self.pending.store(false, Ordering::SeqCst);
        self.in_progress.store(false, Ordering::SeqCst);
    }
}

struct SessionInner {
    config: SessionConfig,
    state: Arc<DeviceState>,
    connection: ConnectionManager,
    subscription: SubscriptionManager,
    /// Serialises connect cycles
    lifecycle: Mutex<()>,
    reconnect_guard: Arc<ReconnectGuard>,
    cancel: CancellationToken,
}

impl SessionInner {
    async fn connect_cycle(&self, connect_attempts: u32, subscribe_attempts: u32) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        if self.is_subscribed() {
            debug!("Already subscribed to {}", self.connection.address());
            return Ok(());
        }

        self.connection.connect(connect_attempts, &self.cancel).await?;
        self.subscription
            .subscribe(
                &self.connection,
                subscribe_attempts,
                connect_attempts,
                &self.cancel,
            )
            .await
    }

    fn is_subscribed(&self) -> bool {
        self.connection.is_connected()
            && self.state.connection_state() == ConnectionState::Subscribed
    }

    async fn reconnect(&self) {
        loop {
            info!("Reconnecting to {}", self.connection.address());
            let result = self
                .connect_cycle(
                    self.config.max_connect_attempts,
                    self.config.max_subscribe_attempts,
                )
                .await;

            match result {
                Ok(()) => info!("Reconnected to {}", self.connection.address()),
                Err(Error::Cancelled) => {
                    debug!("Reconnect to {} cancelled", self.connection.address());
                    self.reconnect_guard.abandon();
                    return;
                }
                Err(e) => error!("Reconnect to {} failed: {}", self.connection.address(), e),
            }

            let mut link_lost = false;
            while self.reconnect_guard.finish() {
                // a queued loss this cycle already recovered from just releases again
                if !self.is_subscribed() {
                    link_lost = true;
                    break;
                }
            }
            if !link_lost {
                return;
            }
            warn!("Link to {} lost during reconnect, retrying", self.connection.address());
        }
    }
}

/// One appliance session.
///
/// Must be created inside a Tokio runtime: construction spawns the control
/// loop that services reconnect requests. Dropping the session cancels every
/// pending retry and stops that loop; the link itself is only closed by
/// [`DeviceSession::disconnect`].
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl DeviceSession {
    pub fn new(
        address: DeviceAddress,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let state = Arc::new(DeviceState::new(event_sender));
        let reconnect_guard = Arc::new(ReconnectGuard::default());
        let cancel = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let on_disconnect = disconnect_handler(
            address.clone(),
            Arc::downgrade(&transport),
            state.clone(),
            reconnect_guard.clone(),
            config.auto_reconnect,
            signal_tx,
        );

        let connection = ConnectionManager::new(
            address.clone(),
            transport.clone(),
            state.clone(),
            RetryPolicy::connect().with_attempt_timeout(config.attempt_timeout),
            on_disconnect,
        );
        let subscription = SubscriptionManager::new(
            address,
            transport,
            state.clone(),
            config.status_characteristic,
            RetryPolicy::subscribe().with_attempt_timeout(config.attempt_timeout),
        );

        let inner = Arc::new(SessionInner {
            config,
            state,
            connection,
            subscription,
            lifecycle: Mutex::new(()),
            reconnect_guard,
            cancel: cancel.clone(),
        });

        tokio::spawn(control_loop(Arc::downgrade(&inner), signal_rx, cancel));

        Self { inner }
    }

    pub fn address(&self) -> &DeviceAddress {
        self.inner.connection.address()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Connect, then subscribe. Both phases get `max_attempts`; the first
    /// failure aborts the cycle and is returned. A no-op when already
    /// subscribed.
    pub async fn connect_and_subscribe(&self, max_attempts: u32) -> Result<()> {
        self.inner.connect_cycle(max_attempts, max_attempts).await
    }

    /// Periodic refresh: re-establish the link when it is down. Status
    /// itself arrives by notification.
    pub async fn update(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.inner
            .connect_cycle(
                self.inner.config.max_connect_attempts,
                self.inner.config.max_subscribe_attempts,
            )
            .await
    }

    pub async fn disconnect(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.connection.disconnect().await;
    }

    /// Stop pending retries and the control loop.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    // Commands

    /// Select a coarse mode. Also resets the run timer, as the appliance
    /// otherwise keeps the remaining time of the previous program.
    pub async fn set_operating_mode(&self, mode: OperatingMode) -> Result<()> {
        info!("Setting operating mode of {} to {}", self.address(), mode);
        self.send(Command::SetMode(mode.command_byte())).await?;
        self.send(Command::SetTime(protocol::MODE_CHANGE_TIMER_MINUTES))
            .await
    }

    pub async fn set_preset_mode(&self, preset: PresetMode) -> Result<()> {
        info!("Setting preset of {} to {}", self.address(), preset);
        self.send(Command::SetMode(preset.command_byte())).await
    }

    pub async fn set_fan_level(&self, level: FanLevel) -> Result<()> {
        self.set_fan_percent(level.percent()).await
    }

    pub async fn set_fan_percent(&self, percent: u32) -> Result<()> {
        info!("Setting fan of {} to {}%", self.address(), percent);
        self.send(Command::fan(percent)?).await
    }

    pub async fn set_target_temperature(&self, fahrenheit: i32) -> Result<()> {
        info!("Setting target temperature of {} to {}°F", self.address(), fahrenheit);
        self.send(Command::temperature(fahrenheit)?).await
    }

    /// Timers beyond 255 hours are clamped to 255 hours on the wire.
    pub async fn set_timer(&self, minutes: u16) -> Result<()> {
        info!("Setting timer of {} to {} minutes", self.address(), minutes);
        self.send(Command::SetTime(minutes)).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        let written = self
            .inner
            .connection
            .write(self.inner.config.command_characteristic, command)
            .await?;
        if !written {
            debug!("{} not connected, skipped {:?}", self.address(), command);
        }
        Ok(())
    }

    // Status

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Last decoded status; survives disconnects.
    pub fn status(&self) -> Option<DeviceStatus> {
        self.inner.state.status()
    }

    pub fn current_temperature(&self) -> Option<i32> {
        self.status().map(|s| s.current_temperature)
    }

    pub fn target_temperature(&self) -> Option<i32> {
        self.status().map(|s| s.target_temperature)
    }

    pub fn operating_mode(&self) -> Option<OperatingMode> {
        self.status().map(|s| s.operating_mode())
    }

    pub fn preset_mode(&self) -> Option<PresetMode> {
        self.status().map(|s| s.preset_mode)
    }

    pub fn fan_percent(&self) -> Option<u16> {
        self.status().map(|s| s.fan_percent)
    }

    pub fn fan_level(&self) -> Option<FanLevel> {
        self.status().and_then(|s| s.fan_level())
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        self.status().map(|s| s.remaining_seconds)
    }

    pub fn timer(&self) -> Option<String> {
        self.status().map(|s| s.timer)
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.status().and_then(|s| s.last_seen)
    }

    pub fn min_temperature(&self) -> i32 {
        protocol::MIN_TEMPERATURE_F
    }

    pub fn max_temperature(&self) -> i32 {
        protocol::MAX_TEMPERATURE_F
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Handler for link loss. Runs on the transport's callback thread, so it
/// only records state and hands the reconnect to the control loop.
fn disconnect_handler(
    address: DeviceAddress,
    transport: Weak<dyn Transport>,
    state: Arc<DeviceState>,
    guard: Arc<ReconnectGuard>,
    auto_reconnect: bool,
    signals: mpsc::UnboundedSender<SessionSignal>,
) -> DisconnectHandler {
    Arc::new(move || {
        // one signal per link loss
        if let Some(transport) = transport.upgrade() {
            transport.set_disconnect_handler(None);
        }
        state.set_connection_state(ConnectionState::Disconnected);

        if !auto_reconnect {
            warn!("Disconnected from {}", address);
            return;
        }
        if !guard.begin() {
            debug!("Reconnect to {} already in progress, queued another", address);
            return;
        }

        warn!("Disconnected from {}", address);
        if signals.send(SessionSignal::Reconnect).is_err() {
            debug!("Session for {} is gone, not reconnecting", address);
            guard.abandon();
        }
    })
}

async fn control_loop(
    inner: Weak<SessionInner>,
    mut signals: mpsc::UnboundedReceiver<SessionSignal>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        match signal {
            SessionSignal::Reconnect => inner.reconnect().await,
        }
    }
    debug!("Session control loop stopped");
}
