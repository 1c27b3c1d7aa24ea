//! Status Subscription Module
//!
//! Registers for status notifications with retry and feeds every payload
//! through the protocol decoder into the shared device state.

use crate::domain::models::{ConnectionState, DeviceAddress};
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::retry::{sleep_or_cancel, RetryPolicy};
use crate::infrastructure::bluetooth::state::DeviceState;
use crate::infrastructure::bluetooth::transport::{NotificationHandler, Transport};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct SubscriptionManager {
    address: DeviceAddress,
    transport: Arc<dyn Transport>,
    state: Arc<DeviceState>,
    characteristic: Uuid,
    policy: RetryPolicy,
}

impl SubscriptionManager {
    pub fn new(
        address: DeviceAddress,
        transport: Arc<dyn Transport>,
        state: Arc<DeviceState>,
        characteristic: Uuid,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            address,
            transport,
            state,
            characteristic,
            policy,
        }
    }

    /// Subscribe to status notifications, connecting first if needed.
    ///
    /// `connect_attempts` is the budget for that implicit connect;
    /// `max_attempts` bounds the subscribe calls, which back off by
    /// `attempt * interval`.
    pub async fn subscribe(
        &self,
        connection: &ConnectionManager,
        max_attempts: u32,
        connect_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !connection.is_connected() {
            connection.connect(connect_attempts, cancel).await?;
        }

        self.state.set_connection_state(ConnectionState::Subscribing);
        let result = self.subscribe_with_retry(max_attempts, cancel).await;

        match &result {
            Ok(()) => self.state.set_connection_state(ConnectionState::Subscribed),
            Err(_) if connection.is_connected() => {
                self.state.set_connection_state(ConnectionState::Connected)
            }
            Err(_) => self.state.set_connection_state(ConnectionState::Disconnected),
        }
        result
    }

    async fn subscribe_with_retry(&self, max_attempts: u32, cancel: &CancellationToken) -> Result<()> {
        let handler = self.notification_handler();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            info!(
                "Attempting to subscribe to notifications from {} on {}",
                self.address, self.characteristic
            );

            match self
                .policy
                .run_attempt(self.transport.subscribe(self.characteristic, handler.clone()))
                .await
            {
                Ok(()) => {
                    info!("Subscribed to {} on {}", self.address, self.characteristic);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Error subscribing to {}: {:#}", self.address, e);
                    if attempt < max_attempts {
                        let backoff = self.policy.backoff(attempt);
                        warn!("Retrying in {} seconds", backoff.as_secs());
                        sleep_or_cancel(backoff, cancel).await?;
                    }
                }
            }
        }

        error!(
            "Failed to subscribe to {} on {} after {} attempts",
            self.address, self.characteristic, max_attempts
        );
        Err(Error::SubscriptionFailed {
            address: self.address.clone(),
            characteristic: self.characteristic,
            attempts: max_attempts,
        })
    }

    fn notification_handler(&self) -> NotificationHandler {
        let state = self.state.clone();
        Arc::new(move |payload: &[u8]| handle_notification(&state, payload))
    }
}

/// Decode one payload and publish it. Undecodable payloads are dropped and
/// reported; the stored status stays as it was.
pub(crate) fn handle_notification(state: &DeviceState, payload: &[u8]) {
    match protocol::decode(payload) {
        Ok(status) => state.replace_status(status.stamped(Utc::now())),
        Err(e) => {
            warn!("Dropping status notification ({} bytes): {}", payload.len(), e);
            state.report_decode_failure(payload, e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppEvent;
    use crate::domain::modes::PresetMode;
    use crate::infrastructure::bluetooth::fake::FakeTransport;
    use crate::infrastructure::bluetooth::protocol::tests::status_payload;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        transport: Arc<FakeTransport>,
        state: Arc<DeviceState>,
        connection: ConnectionManager,
        subscription: SubscriptionManager,
        events: mpsc::UnboundedReceiver<AppEvent>,
    }

    fn fixture(transport: Arc<FakeTransport>) -> Fixture {
        let (tx, events) = mpsc::unbounded_channel();
        let state = Arc::new(DeviceState::new(tx));
        let address = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
        let connection = ConnectionManager::new(
            address.clone(),
            transport.clone(),
            state.clone(),
            RetryPolicy::connect(),
            Arc::new(|| {}),
        );
        let subscription = SubscriptionManager::new(
            address,
            transport.clone(),
            state.clone(),
            protocol::STATUS_CHAR_UUID,
            RetryPolicy::subscribe(),
        );
        Fixture {
            transport,
            state,
            connection,
            subscription,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_connects_first() {
        let f = fixture(FakeTransport::new());

        f.subscription
            .subscribe(&f.connection, 10, 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(f.transport.connect_calls(), 1);
        assert_eq!(f.transport.subscribe_calls(), 1);
        assert_eq!(f.state.connection_state(), ConnectionState::Subscribed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_retries_with_linear_backoff() {
        let f = fixture(FakeTransport::failing_subscribes(2));
        f.connection
            .connect(1, &CancellationToken::new())
            .await
            .unwrap();
        let started = tokio::time::Instant::now();

        f.subscription
            .subscribe(&f.connection, 10, 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(f.transport.subscribe_calls(), 3);
        // 3s + 6s
        assert_eq!(started.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_exhausted() {
        let f = fixture(FakeTransport::new());
        f.transport.fail_subscribes_always();

        let result = f
            .subscription
            .subscribe(&f.connection, 3, 10, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(Error::SubscriptionFailed { attempts: 3, .. })
        ));
        assert_eq!(f.transport.subscribe_calls(), 3);
        // still connected, just not subscribed
        assert_eq!(f.state.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_surfaces_connect_failure() {
        let f = fixture(FakeTransport::always_failing());

        let result = f
            .subscription
            .subscribe(&f.connection, 10, 2, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(Error::ConnectionFailed { attempts: 2, .. })
        ));
        assert_eq!(f.transport.subscribe_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_replace_status() {
        let mut f = fixture(FakeTransport::new());
        f.subscription
            .subscribe(&f.connection, 1, 1, &CancellationToken::new())
            .await
            .unwrap();

        f.transport.push_notification(&status_payload(0x00, 0x56));

        let status = f.state.status().unwrap();
        assert_eq!(status.preset_mode, PresetMode::Turbo);
        assert!(status.last_seen.is_some());

        let updated = std::iter::from_fn(|| f.events.try_recv().ok())
            .filter(|event| matches!(event, AppEvent::StatusUpdated(_)))
            .count();
        assert_eq!(updated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_notification_keeps_previous_status() {
        let mut f = fixture(FakeTransport::new());
        f.subscription
            .subscribe(&f.connection, 1, 1, &CancellationToken::new())
            .await
            .unwrap();

        f.transport.push_notification(&status_payload(0x2d, 0x50));
        let before = f.state.status().unwrap();

        f.transport.push_notification(&[0x00; 5]);
        f.transport.push_notification(&status_payload(0x00, 0x77));

        assert_eq!(f.state.status().unwrap(), before);
        assert_eq!(f.state.connection_state(), ConnectionState::Subscribed);

        let failures: Vec<Vec<u8>> = std::iter::from_fn(|| f.events.try_recv().ok())
            .filter_map(|event| match event {
                AppEvent::DecodeFailed { payload, .. } => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], vec![0x00; 5]);
    }
}
