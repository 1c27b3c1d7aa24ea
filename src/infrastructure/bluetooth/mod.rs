//! Bluetooth Module
//!
//! Session management for one BedJet V3 class appliance over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     DeviceSession                        │
//! │  (Public API: status, commands, reconnect control loop)  │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌────────────┐ ┌──────────────┐ ┌──────────┐
//! │ Connection │ │ Subscription │ │ Protocol │
//! │            │ │              │ │          │
//! │ - Retry    │ │ - Retry      │ │ - UUIDs  │
//! │ - Link loss│ │ - Decode     │ │ - Commands│
//! └─────┬──────┘ └──────┬───────┘ └──────────┘
//!       └───────┬───────┘
//!               ▼
//!         ┌───────────┐
//!         │ Transport │ (WinRT on Windows)
//!         └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Status decoding and command encoding
//! - [`connection`] - Connect with retry, disconnect, link-loss handler
//! - [`subscription`] - Status notifications with retry
//! - [`session`] - Device session coordinator
//! - [`transport`] - BLE provider abstraction

pub mod connection;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod state;
pub mod subscription;
pub mod transport;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod fake;

pub use session::{DeviceSession, SessionConfig};
pub use transport::Transport;
