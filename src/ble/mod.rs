//! Radio side of scanning.
//!
//! [`radio`] describes what a platform radio offers, [`transport`] turns
//! that into begin/end commands for a session, and [`platform`] implements
//! the radio on top of btleplug.

pub mod platform;
pub mod radio;
pub mod transport;

pub use platform::BtleplugRadio;
pub use radio::{scan_failure, LeScanner, RadioAdapter, RadioState, ScanResult, RSSI_UNKNOWN};
pub use transport::{resolve_transport, Transport, TransportKind};
