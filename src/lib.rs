//! Host-side session for BedJet V3 class climate appliances over BLE.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{Error, Result};
