//! Device handles and the device-factory boundary.
//!
//! A [`BleDevice`] is the domain handle for a peripheral seen during a scan.
//! Its identity is the normalized hardware address; everything else is
//! interior-mutable because the connection subsystem updates it from other
//! threads while a scan session is reading it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Connection state for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected to the device.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to the device.
    Connected,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connection attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Normalize a hardware address to its canonical string form.
///
/// Addresses are compared case-insensitively by the radio stack, so the
/// canonical form is trimmed and upper-cased.
///
/// # Example
///
/// ```
/// use ble_autoscan::normalize_address;
///
/// assert_eq!(normalize_address(" aa:bb:cc:dd:ee:ff "), "AA:BB:CC:DD:EE:FF");
/// ```
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// A single normalized discovery event.
///
/// Both transports reduce their payloads to this shape before the session
/// touches the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Normalized hardware address.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Raw advertisement bytes.
    pub raw: Bytes,
}

impl Discovery {
    /// Create a discovery, normalizing the address.
    pub fn new(address: &str, rssi: i16, raw: impl Into<Bytes>) -> Self {
        Self {
            address: normalize_address(address),
            rssi,
            raw: raw.into(),
        }
    }
}

/// Mutable attributes of a device.
#[derive(Debug, Default)]
struct DeviceState {
    connection_state: ConnectionState,
    auto_connect: bool,
    rssi: Option<i16>,
    raw: Bytes,
    name: Option<String>,
    last_seen: Option<DateTime<Utc>>,
}

/// Domain handle for a BLE peripheral.
#[derive(Debug)]
pub struct BleDevice {
    /// Normalized hardware address.
    address: String,
    /// Internal state.
    state: RwLock<DeviceState>,
}

impl BleDevice {
    /// Create a new, disconnected device handle.
    pub fn new(address: &str) -> Self {
        Self {
            address: normalize_address(address),
            state: RwLock::new(DeviceState::default()),
        }
    }

    /// Create a device handle with the auto-reconnect flag already set.
    pub fn with_auto_connect(address: &str) -> Self {
        let device = Self::new(address);
        device.set_auto_connect(true);
        device
    }

    /// The normalized hardware address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.read().connection_state
    }

    /// Update the connection state.
    pub fn set_connection_state(&self, new_state: ConnectionState) {
        let old_state = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.connection_state, new_state)
        };

        if old_state != new_state {
            debug!(
                "{}: connection state changed: {} -> {}",
                self.address, old_state, new_state
            );
        }
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Check if a connection attempt is in flight.
    pub fn is_connecting(&self) -> bool {
        self.connection_state().is_connecting()
    }

    /// Check if the device should be reconnected automatically.
    pub fn is_auto_connect(&self) -> bool {
        self.state.read().auto_connect
    }

    /// Set the auto-reconnect flag.
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.state.write().auto_connect = auto_connect;
    }

    /// Last seen signal strength in dBm.
    pub fn rssi(&self) -> Option<i16> {
        self.state.read().rssi
    }

    /// Last seen raw advertisement bytes.
    pub fn raw_advertisement(&self) -> Bytes {
        self.state.read().raw.clone()
    }

    /// Advertised local name, if one has been parsed.
    pub fn name(&self) -> Option<String> {
        self.state.read().name.clone()
    }

    /// Set the advertised local name.
    pub fn set_name(&self, name: impl Into<String>) {
        self.state.write().name = Some(name.into());
    }

    /// When the device was last seen by a scan.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_seen
    }

    /// Record a sighting from a discovery event.
    pub(crate) fn record_sighting(&self, discovery: &Discovery) {
        let mut state = self.state.write();
        state.rssi = Some(discovery.rssi);
        state.raw = discovery.raw.clone();
        state.last_seen = Some(Utc::now());
    }
}

impl std::fmt::Display for BleDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Converts a freshly discovered address into a domain device handle.
pub trait DeviceFactory: Send + Sync {
    /// Create a handle for `address`. `discovery` carries the metadata of the
    /// event that first saw the device.
    fn create(&self, address: &str, discovery: &Discovery) -> Arc<BleDevice>;
}

/// Factory producing plain [`BleDevice`] handles seeded from the discovery.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDeviceFactory;

impl DeviceFactory for DefaultDeviceFactory {
    fn create(&self, address: &str, discovery: &Discovery) -> Arc<BleDevice> {
        let device = BleDevice::new(address);
        device.record_sighting(discovery);
        Arc::new(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(!ConnectionState::Connected.is_connecting());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
    }

    #[test]
    fn test_address_normalization() {
        assert_eq!(normalize_address("aa:bb:cc:dd:ee:ff"), "AA:BB:CC:DD:EE:FF");
        assert_eq!(normalize_address("\tAa:00:cC:11:eE:22\n"), "AA:00:CC:11:EE:22");

        let device = BleDevice::new("de:ad:be:ef:00:01");
        assert_eq!(device.address(), "DE:AD:BE:EF:00:01");
    }

    #[test]
    fn test_default_factory_seeds_sighting() {
        let discovery = Discovery::new("aa:bb:cc:dd:ee:ff", -60, vec![0x02u8, 0x01, 0x06]);
        let device = DefaultDeviceFactory.create(&discovery.address, &discovery);

        assert_eq!(device.address(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(device.rssi(), Some(-60));
        assert_eq!(device.raw_advertisement().as_ref(), &[0x02, 0x01, 0x06]);
        assert!(device.last_seen().is_some());
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);
        assert!(!device.is_auto_connect());
    }

    #[test]
    fn test_auto_connect_flag() {
        let device = BleDevice::with_auto_connect("11:22:33:44:55:66");
        assert!(device.is_auto_connect());
        device.set_auto_connect(false);
        assert!(!device.is_auto_connect());
    }

    #[test]
    fn test_display_uses_name_when_known() {
        let device = BleDevice::new("11:22:33:44:55:66");
        assert_eq!(device.to_string(), "11:22:33:44:55:66");
        device.set_name("Heart Rate");
        assert_eq!(device.to_string(), "Heart Rate (11:22:33:44:55:66)");
    }
}
