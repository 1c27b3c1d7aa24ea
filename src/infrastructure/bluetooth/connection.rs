//! BLE Connection Module
//!
//! Owns the transport link to one appliance: connect with retry, explicit
//! disconnect, and registration of the unexpected-disconnect handler.

use crate::domain::models::{ConnectionState, DeviceAddress};
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::protocol::Command;
use crate::infrastructure::bluetooth::retry::{sleep_or_cancel, RetryPolicy};
use crate::infrastructure::bluetooth::state::DeviceState;
use crate::infrastructure::bluetooth::transport::{DisconnectHandler, Transport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection handler for a single device address
pub struct ConnectionManager {
    address: DeviceAddress,
    transport: Arc<dyn Transport>,
    state: Arc<DeviceState>,
    policy: RetryPolicy,
    on_disconnect: DisconnectHandler,
}

impl ConnectionManager {
    /// `on_disconnect` is registered with the transport after every
    /// successful connect.
    pub fn new(
        address: DeviceAddress,
        transport: Arc<dyn Transport>,
        state: Arc<DeviceState>,
        policy: RetryPolicy,
        on_disconnect: DisconnectHandler,
    ) -> Self {
        Self {
            address,
            transport,
            state,
            policy,
            on_disconnect,
        }
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Connect, retrying up to `max_attempts` times.
    ///
    /// After a failed attempt the link is torn down (errors ignored) and the
    /// next attempt waits `attempt * interval`.
    pub async fn connect(&self, max_attempts: u32, cancel: &CancellationToken) -> Result<()> {
        if self.transport.is_connected() {
            self.register_disconnect_handler();
            self.state.set_connection_state(ConnectionState::Connected);
            return Ok(());
        }

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                self.state.set_connection_state(ConnectionState::Disconnected);
                return Err(Error::Cancelled);
            }

            info!(
                "Attempting to connect to {} ({}/{})",
                self.address, attempt, max_attempts
            );
            self.state.set_connection_state(ConnectionState::Connecting);

            match self
                .policy
                .run_attempt(self.transport.connect(&self.address))
                .await
            {
                Ok(()) if self.transport.is_connected() => {
                    info!("Connected to {}", self.address);
                    self.register_disconnect_handler();
                    self.state.set_connection_state(ConnectionState::Connected);
                    return Ok(());
                }
                Ok(()) => warn!("Connect to {} returned but link is down", self.address),
                Err(e) => warn!("Error connecting to {}: {:#}", self.address, e),
            }

            // Leave the transport clean for the next attempt
            if let Err(e) = self.transport.disconnect().await {
                debug!("Cleanup disconnect from {} failed: {:#}", self.address, e);
            }
            self.state.set_connection_state(ConnectionState::Disconnected);

            if attempt < max_attempts {
                let backoff = self.policy.backoff(attempt);
                warn!("Retrying {} in {} seconds", self.address, backoff.as_secs());
                if let Err(e) = sleep_or_cancel(backoff, cancel).await {
                    info!("Connect to {} cancelled", self.address);
                    return Err(e);
                }
            }
        }

        error!(
            "Failed to connect to {} after {} attempts",
            self.address, max_attempts
        );
        Err(Error::ConnectionFailed {
            address: self.address.clone(),
            attempts: max_attempts,
        })
    }

    /// Close the link. The disconnect handler is removed first so the close
    /// does not trigger a reconnect.
    pub async fn disconnect(&self) {
        self.clear_disconnect_handler();

        info!("Disconnecting from {}", self.address);
        if let Err(e) = self.transport.disconnect().await {
            error!("Error disconnecting from {}: {:#}", self.address, e);
        }
        self.state.set_connection_state(ConnectionState::Disconnected);
    }

    pub fn clear_disconnect_handler(&self) {
        self.transport.set_disconnect_handler(None);
    }

    fn register_disconnect_handler(&self) {
        self.transport
            .set_disconnect_handler(Some(self.on_disconnect.clone()));
    }

    /// Write a command if the link is up. Returns `false` when the write was
    /// skipped because the device is not connected.
    pub async fn write(&self, characteristic: Uuid, command: Command) -> Result<bool> {
        if !self.transport.is_connected() {
            debug!("Not connected to {}, dropping {:?}", self.address, command);
            return Ok(false);
        }

        let payload = command.encode();
        debug!("Writing {:02X?} to {}", payload, self.address);
        self.transport
            .write(characteristic, &payload)
            .await
            .map_err(|e| Error::WriteFailed {
                address: self.address.clone(),
                reason: format!("{:#}", e),
            })?;
        Ok(true)
    }
}
