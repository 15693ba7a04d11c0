//! Session-local device registry.
//!
//! Deduplicates discoveries by normalized address for the lifetime of one
//! scan session. Entries are only ever bulk-cleared when the session stops.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::device::{normalize_address, BleDevice, DeviceFactory, Discovery};

/// Devices discovered during the current scan session.
pub struct DeviceRegistry {
    /// Discovered devices by normalized address.
    devices: HashMap<String, Arc<BleDevice>>,
    /// Builds handles for first-time addresses.
    factory: Arc<dyn DeviceFactory>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new(factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            devices: HashMap::new(),
            factory,
        }
    }

    /// Get the handle for a discovery's address, creating it on first sight.
    ///
    /// Returns the handle and whether it was created by this call. Existing
    /// handles have their last-seen attributes refreshed.
    pub fn fetch_or_create(&mut self, discovery: &Discovery) -> (Arc<BleDevice>, bool) {
        if let Some(device) = self.devices.get(&discovery.address) {
            trace!("Already seen this session: {}", discovery.address);
            device.record_sighting(discovery);
            return (device.clone(), false);
        }

        let device = self.factory.create(&discovery.address, discovery);
        debug!("Discovered new device: {}", device);
        self.devices
            .insert(discovery.address.clone(), device.clone());
        (device, true)
    }

    /// Get a device by address, in any case.
    pub fn get(&self, address: &str) -> Option<Arc<BleDevice>> {
        self.devices.get(&normalize_address(address)).cloned()
    }

    /// All devices seen this session.
    pub fn devices(&self) -> Vec<Arc<BleDevice>> {
        self.devices.values().cloned().collect()
    }

    /// Number of devices seen this session.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device has been seen this session.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Forget every device seen this session.
    pub fn clear(&mut self) {
        debug!("Clearing {} discovered devices", self.devices.len());
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DefaultDeviceFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFactory {
        created: AtomicUsize,
    }

    impl DeviceFactory for CountingFactory {
        fn create(&self, address: &str, discovery: &Discovery) -> Arc<BleDevice> {
            self.created.fetch_add(1, Ordering::SeqCst);
            DefaultDeviceFactory.create(address, discovery)
        }
    }

    #[test]
    fn test_fetch_or_create_dedups() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
        });
        let mut registry = DeviceRegistry::new(factory.clone());

        let first = Discovery::new("aa:bb:cc:dd:ee:ff", -60, vec![1u8]);
        let second = Discovery::new("AA:BB:CC:DD:EE:FF", -55, vec![2u8]);

        let (a, is_new_a) = registry.fetch_or_create(&first);
        let (b, is_new_b) = registry.fetch_or_create(&second);

        assert!(is_new_a);
        assert!(!is_new_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);

        // last sighting wins
        assert_eq!(a.rssi(), Some(-55));
        assert_eq!(a.raw_advertisement().as_ref(), &[2]);
    }

    #[test]
    fn test_clear_forgets_devices() {
        let mut registry = DeviceRegistry::new(Arc::new(DefaultDeviceFactory));
        let discovery = Discovery::new("11:22:33:44:55:66", -70, Vec::<u8>::new());

        registry.fetch_or_create(&discovery);
        assert!(registry.get("11:22:33:44:55:66").is_some());

        registry.clear();
        assert!(registry.is_empty());

        let (_, is_new) = registry.fetch_or_create(&discovery);
        assert!(is_new);
    }

    #[test]
    fn test_distinct_addresses() {
        let mut registry = DeviceRegistry::new(Arc::new(DefaultDeviceFactory));
        for i in 0..5u8 {
            let address = format!("00:00:00:00:00:{:02X}", i);
            registry.fetch_or_create(&Discovery::new(&address, -40, Vec::<u8>::new()));
        }
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.devices().len(), 5);
    }

    #[test]
    fn test_get_normalizes_address() {
        let mut registry = DeviceRegistry::new(Arc::new(DefaultDeviceFactory));
        let (device, _) =
            registry.fetch_or_create(&Discovery::new("AA:BB:CC:DD:EE:FF", -60, vec![1u8]));

        let found = registry.get(" aa:bb:cc:dd:ee:ff ").expect("lower-case lookup");
        assert!(Arc::ptr_eq(&device, &found));
    }
}
