// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-autoscan
//!
//! Time-bounded Bluetooth Low Energy discovery with per-scan
//! deduplication and automatic reconnection of known devices.
//!
//! A [`ScanSession`] drives one scan at a time over a [`RadioAdapter`].
//! Each device is reported to the [`ScanObserver`] once per scan, while
//! every parseable advertisement is handed over as a [`ScanRecord`]. When an
//! [`AutoReconnectCoordinator`] is attached, every sighting of a
//! disconnected auto-connect device triggers a single reconnect.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_autoscan::{BleDevice, BtleplugRadio, Result, ScanObserver, ScanSession};
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Printer;
//!
//! impl ScanObserver for Printer {
//!     fn on_discovered(&self, device: &Arc<BleDevice>, rssi: i16, _raw: &Bytes) {
//!         println!("Found {} at {} dBm", device, rssi);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let radio = Arc::new(BtleplugRadio::new().await?);
//!     let session = ScanSession::new(radio)?;
//!
//!     session.start(Some(Arc::new(Printer)), Duration::from_secs(10));
//!     tokio::time::sleep(Duration::from_secs(10)).await;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Hardware addresses are not exposed, so
//! devices are keyed by the platform peripheral identifier instead.
//!
//! ### Linux
//! Requires BlueZ. The user may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

pub mod ble;
pub mod config;
pub mod device;
pub mod error;
pub mod reconnect;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod session;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use error::{Error, Result};
pub use session::{ScanObserver, ScanSession, ScanSessionBuilder, ScanSink};

// Re-export commonly used types from submodules
pub use ble::platform::BtleplugRadio;
pub use ble::radio::{LeScanner, RadioAdapter, RadioState, ScanResult};
pub use ble::transport::{Transport, TransportKind};
pub use config::{ScanConfig, ScanFilter, ScanMode, ScanSettings};
pub use device::{
    normalize_address, BleDevice, ConnectionState, DefaultDeviceFactory, DeviceFactory, Discovery,
};
pub use reconnect::{AutoConnectSet, AutoReconnectCoordinator, ReconnectCapability};
pub use record::{AdvertisementParser, RecordParser, ScanRecord};
pub use registry::DeviceRegistry;
pub use scheduler::{ScanScheduler, TimerHandle};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<ScanSession>();
        let _ = std::any::TypeId::of::<ScanSink>();
        let _ = std::any::TypeId::of::<BleDevice>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<ScanRecord>();
        let _ = std::any::TypeId::of::<AutoReconnectCoordinator>();
        let _ = std::any::TypeId::of::<BtleplugRadio>();
    }

    #[test]
    fn test_default_scan_period() {
        assert_eq!(ScanConfig::default().scan_period, ScanConfig::DEFAULT_SCAN_PERIOD);
    }
}
