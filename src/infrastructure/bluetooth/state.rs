//! Device state shared between the managers and the session.

use crate::domain::models::{AppEvent, ConnectionState, DeviceStatus};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// Connection state plus the last decoded status, with change events.
///
/// The status is only ever replaced as a whole, and is kept (stale) across
/// disconnects.
pub struct DeviceState {
    connection: RwLock<ConnectionState>,
    status: RwLock<Option<DeviceStatus>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl DeviceState {
    pub fn new(event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            connection: RwLock::new(ConnectionState::Disconnected),
            status: RwLock::new(None),
            event_sender,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self
            .connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(
            &mut *self
                .connection
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            state,
        );

        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
            self.send(AppEvent::ConnectionState(state));
        }
    }

    pub fn status(&self) -> Option<DeviceStatus> {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace_status(&self, status: DeviceStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = Some(status.clone());
        self.send(AppEvent::StatusUpdated(status));
    }

    pub fn report_decode_failure(&self, payload: &[u8], reason: String) {
        self.send(AppEvent::DecodeFailed {
            payload: payload.to_vec(),
            reason,
        });
    }

    fn send(&self, event: AppEvent) {
        // nobody listening is fine
        let _ = self.event_sender.send(event);
    }
}
