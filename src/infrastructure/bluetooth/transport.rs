//! BLE Transport Abstraction
//!
//! The primitives a device session needs from the Bluetooth stack. One
//! transport instance serves exactly one appliance.

use crate::domain::models::DeviceAddress;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Called with the raw bytes of every notification on a subscribed characteristic.
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Called when the link drops. Implementations may also invoke it for a
/// disconnect requested through [`Transport::disconnect`], so callers clear
/// it before closing on purpose.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link to `address`. Succeeding does not guarantee that
    /// [`Transport::is_connected`] reports true.
    async fn connect(&self, address: &DeviceAddress) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    async fn write(&self, characteristic: Uuid, payload: &[u8]) -> Result<()>;

    /// Enable notifications on `characteristic` and route them to `handler`.
    async fn subscribe(&self, characteristic: Uuid, handler: NotificationHandler) -> Result<()>;

    /// Replace the disconnect handler; `None` unregisters it.
    fn set_disconnect_handler(&self, handler: Option<DisconnectHandler>);
}
