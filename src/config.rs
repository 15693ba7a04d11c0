//! Scan configuration.
//!
//! Settings and filters are opaque to the session: they are handed to the
//! transport unchanged on every start.

use std::time::Duration;
use uuid::Uuid;

use crate::device::normalize_address;
use crate::error::{Error, Result};
use crate::record::ScanRecord;

/// Radio scan mode requested from the modern transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanMode {
    /// Lowest duty cycle.
    LowPower,
    /// Balanced latency and power.
    Balanced,
    /// Highest duty cycle, fastest discovery.
    #[default]
    LowLatency,
}

/// Settings passed to the modern transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanSettings {
    /// Requested scan mode.
    pub scan_mode: ScanMode,
    /// Delay before results are reported in batches. Zero reports each
    /// result immediately.
    pub report_delay: Duration,
}

impl ScanSettings {
    /// Settings with the given scan mode and immediate reporting.
    pub fn with_mode(scan_mode: ScanMode) -> Self {
        Self {
            scan_mode,
            report_delay: Duration::ZERO,
        }
    }
}

/// Filter criteria for the modern transport.
///
/// Every field that is set must match; a filter with no fields set matches
/// everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFilter {
    /// Hardware address.
    pub address: Option<String>,
    /// Exact advertised local name.
    pub name: Option<String>,
    /// Advertised service UUID.
    pub service_uuid: Option<Uuid>,
    /// Manufacturer company identifier.
    pub manufacturer_id: Option<u16>,
}

impl ScanFilter {
    /// Filter on a hardware address.
    pub fn by_address(address: &str) -> Self {
        Self {
            address: Some(normalize_address(address)),
            ..Default::default()
        }
    }

    /// Filter on an advertised service.
    pub fn by_service(service_uuid: Uuid) -> Self {
        Self {
            service_uuid: Some(service_uuid),
            ..Default::default()
        }
    }

    /// Check whether an advertisement satisfies this filter.
    pub fn matches(&self, address: &str, record: Option<&ScanRecord>) -> bool {
        if let Some(expected) = &self.address {
            if normalize_address(expected) != normalize_address(address) {
                return false;
            }
        }

        if let Some(name) = &self.name {
            if record.and_then(|r| r.local_name.as_ref()) != Some(name) {
                return false;
            }
        }

        if let Some(uuid) = &self.service_uuid {
            if !record.map(|r| r.advertises_service(uuid)).unwrap_or(false) {
                return false;
            }
        }

        if let Some(company_id) = self.manufacturer_id {
            if !record
                .map(|r| r.manufacturer_data.contains_key(&company_id))
                .unwrap_or(false)
            {
                return false;
            }
        }

        true
    }
}

/// Configuration for a scan session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanConfig {
    /// How long a scan runs before it stops itself.
    pub scan_period: Duration,
    /// Settings for the modern transport.
    pub settings: ScanSettings,
    /// Filters for the modern transport.
    pub filters: Vec<ScanFilter>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_period: Self::DEFAULT_SCAN_PERIOD,
            settings: ScanSettings::default(),
            filters: Vec::new(),
        }
    }
}

impl ScanConfig {
    /// Default scan period (10 seconds).
    pub const DEFAULT_SCAN_PERIOD: Duration = Duration::from_secs(10);

    /// Set the scan period.
    pub fn with_scan_period(mut self, scan_period: Duration) -> Self {
        self.scan_period = scan_period;
        self
    }

    /// Set the transport settings.
    pub fn with_settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Add a transport filter.
    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for a zero scan period or a filter
    /// with no criteria.
    pub fn validate(&self) -> Result<()> {
        if self.scan_period.is_zero() {
            return Err(Error::InvalidParameter {
                name: "scan_period".to_string(),
                value: format!("{:?}", self.scan_period),
            });
        }

        if let Some(index) = self.filters.iter().position(|f| *f == ScanFilter::default()) {
            return Err(Error::InvalidParameter {
                name: format!("filters[{}]", index),
                value: "empty filter".to_string(),
            });
        }

        Ok(())
    }
}
