//! Scriptable in-memory transport for tests.

use crate::domain::models::DeviceAddress;
use crate::infrastructure::bluetooth::transport::{
    DisconnectHandler, NotificationHandler, Transport,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const ALWAYS: u32 = u32::MAX;

#[derive(Default)]
pub(crate) struct FakeTransport {
    connected: AtomicBool,
    connect_failures: AtomicU32,
    subscribe_failures: AtomicU32,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    subscribe_calls: AtomicU32,
    connect_times: Mutex<Vec<Instant>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    notification_handler: Mutex<Option<NotificationHandler>>,
    disconnect_handler: Mutex<Option<DisconnectHandler>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the first `count` connects, then succeeds.
    pub(crate) fn failing_connects(count: u32) -> Arc<Self> {
        let transport = Self::default();
        transport.connect_failures.store(count, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// Fails the first `count` subscribes, then succeeds.
    pub(crate) fn failing_subscribes(count: u32) -> Arc<Self> {
        let transport = Self::default();
        transport.subscribe_failures.store(count, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub(crate) fn always_failing() -> Arc<Self> {
        Self::failing_connects(ALWAYS)
    }

    pub(crate) fn fail_subscribes_always(&self) {
        self.subscribe_failures.store(ALWAYS, Ordering::SeqCst);
    }

    pub(crate) fn allow_subscribes(&self) {
        self.subscribe_failures.store(0, Ordering::SeqCst);
    }

    pub(crate) fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Time between consecutive connect attempts.
    pub(crate) fn connect_gaps(&self) -> Vec<Duration> {
        let times = self.connect_times.lock().unwrap();
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    pub(crate) fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn has_disconnect_handler(&self) -> bool {
        self.disconnect_handler.lock().unwrap().is_some()
    }

    /// Deliver a notification as the appliance would.
    pub(crate) fn push_notification(&self, payload: &[u8]) {
        let handler = self.notification_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    /// Drop the link from the device side.
    pub(crate) fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.fire_disconnect();
    }

    /// Drop the link and deliver the disconnect `times` times through the
    /// handler captured before the first call, like a stack that queues
    /// several status callbacks for one loss.
    pub(crate) fn drop_link_repeated(&self, times: usize) {
        self.connected.store(false, Ordering::SeqCst);
        let handler = self.disconnect_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            for _ in 0..times {
                handler();
            }
        }
    }

    fn fire_disconnect(&self) {
        let handler = self.disconnect_handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining == 0 {
            return false;
        }
        if remaining != ALWAYS {
            counter.store(remaining - 1, Ordering::SeqCst);
        }
        true
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _address: &DeviceAddress) -> anyhow::Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.connect_times.lock().unwrap().push(Instant::now());

        if Self::take_failure(&self.connect_failures) {
            anyhow::bail!("simulated connect failure");
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected {
            self.fire_disconnect();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, characteristic: Uuid, payload: &[u8]) -> anyhow::Result<()> {
        if !self.is_connected() {
            anyhow::bail!("not connected");
        }
        self.writes
            .lock()
            .unwrap()
            .push((characteristic, payload.to_vec()));
        Ok(())
    }

    async fn subscribe(
        &self,
        _characteristic: Uuid,
        handler: NotificationHandler,
    ) -> anyhow::Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        if !self.is_connected() {
            anyhow::bail!("not connected");
        }
        if Self::take_failure(&self.subscribe_failures) {
            anyhow::bail!("simulated subscribe failure");
        }
        *self.notification_handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    fn set_disconnect_handler(&self, handler: Option<DisconnectHandler>) {
        *self.disconnect_handler.lock().unwrap() = handler;
    }
}
