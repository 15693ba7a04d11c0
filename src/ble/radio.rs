//! Radio driver capabilities.
//!
//! These traits describe what the platform radio offers. Drivers deliver
//! events back through the [`ScanSink`] they were handed on start; they may
//! do so from any thread.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{ScanFilter, ScanSettings};
use crate::session::ScanSink;

/// RSSI reported when the driver did not measure one.
pub const RSSI_UNKNOWN: i16 = 127;

/// Error codes for [`ScanSink::on_scan_failed`].
pub mod scan_failure {
    /// A scan with the same settings is already running.
    pub const ALREADY_STARTED: i32 = 1;
    /// The scanner could not be registered with the radio.
    pub const APPLICATION_REGISTRATION_FAILED: i32 = 2;
    /// Internal radio error.
    pub const INTERNAL_ERROR: i32 = 3;
    /// The radio does not support the requested scan.
    pub const FEATURE_UNSUPPORTED: i32 = 4;
}

/// Power state reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RadioState {
    /// State not yet known.
    #[default]
    Unknown,
    /// Radio is powered on.
    On,
    /// Radio is powered off.
    Off,
}

impl std::fmt::Display for RadioState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::On => write!(f, "On"),
            Self::Off => write!(f, "Off"),
        }
    }
}

/// A structured result from the modern scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Hardware address of the advertiser.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Raw advertisement bytes.
    pub scan_record: Bytes,
    /// When the advertisement was received.
    pub timestamp: DateTime<Utc>,
}

impl ScanResult {
    /// Create a result stamped with the current time.
    pub fn new(address: &str, rssi: i16, scan_record: impl Into<Bytes>) -> Self {
        Self {
            address: address.to_string(),
            rssi,
            scan_record: scan_record.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Filtered, settings-based scanner.
///
/// Results go to [`ScanSink::on_scan_result`], batches to
/// [`ScanSink::on_batch_scan_results`] and failures to
/// [`ScanSink::on_scan_failed`].
pub trait LeScanner: Send + Sync {
    /// Start scanning.
    fn start_scan(&self, filters: &[ScanFilter], settings: &ScanSettings, sink: &ScanSink);

    /// Stop the scan that was started with `sink`.
    fn stop_scan(&self, sink: &ScanSink);
}

/// The platform radio.
pub trait RadioAdapter: Send + Sync {
    /// Check if the radio is powered on.
    fn is_enabled(&self) -> bool;

    /// Check if the platform offers the filtered [`LeScanner`] API.
    fn supports_le_scanner(&self) -> bool;

    /// Get the filtered scanner. Returns `None` while the radio is off.
    fn le_scanner(&self) -> Option<Arc<dyn LeScanner>>;

    /// Combined start call of the legacy API. Results go to
    /// [`ScanSink::on_le_scan`]. Returns `false` if the radio refused.
    fn start_le_scan(&self, _sink: &ScanSink) -> bool {
        false
    }

    /// Combined stop call of the legacy API.
    fn stop_le_scan(&self, _sink: &ScanSink) {}
}
