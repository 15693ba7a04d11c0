//! Auto-reconnect dispatch.
//!
//! The connection subsystem owns an [`AutoConnectSet`] of devices that should
//! be reconnected without user action. Every discovery is offered to the
//! [`AutoReconnectCoordinator`], which issues at most one reconnect per
//! eligible device while holding the set's lock.
//!
//! The lock is re-entrant so a [`ReconnectCapability`] may inspect or mutate
//! the set from inside `reconnect`. The `RefCell` it guards must never be
//! borrowed across a call back into the connection subsystem.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, trace};

use crate::device::{normalize_address, BleDevice};

/// Devices eligible for automatic reconnection, by normalized address.
pub type AutoConnectDevices = HashMap<String, Arc<BleDevice>>;

/// Guard returned by [`AutoConnectSet::lock`].
pub type AutoConnectGuard<'a> = ReentrantMutexGuard<'a, RefCell<AutoConnectDevices>>;

/// Shared set of auto-reconnect devices and the lock guarding their
/// connection-state transitions.
#[derive(Clone, Default)]
pub struct AutoConnectSet {
    inner: Arc<ReentrantMutex<RefCell<AutoConnectDevices>>>,
}

impl AutoConnectSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the device-state lock.
    ///
    /// Owners of device connection state should hold this while moving a
    /// device between states, so a concurrent discovery cannot dispatch a
    /// duplicate reconnect.
    pub fn lock(&self) -> AutoConnectGuard<'_> {
        self.inner.lock()
    }

    /// Add a device, replacing any device with the same address.
    pub fn insert(&self, device: Arc<BleDevice>) -> Option<Arc<BleDevice>> {
        let guard = self.lock();
        let previous = guard
            .borrow_mut()
            .insert(device.address().to_string(), device);
        previous
    }

    /// Remove a device by address.
    pub fn remove(&self, address: &str) -> Option<Arc<BleDevice>> {
        let guard = self.lock();
        let removed = guard.borrow_mut().remove(&normalize_address(address));
        removed
    }

    /// Get a device by address.
    pub fn get(&self, address: &str) -> Option<Arc<BleDevice>> {
        let guard = self.lock();
        let device = guard.borrow().get(&normalize_address(address)).cloned();
        device
    }

    /// Check if an address is in the set.
    pub fn contains(&self, address: &str) -> bool {
        self.get(address).is_some()
    }

    /// Snapshot of every device in the set.
    pub fn devices(&self) -> Vec<Arc<BleDevice>> {
        let guard = self.lock();
        let devices = guard.borrow().values().cloned().collect();
        devices
    }

    /// Number of devices in the set.
    pub fn len(&self) -> usize {
        let guard = self.lock();
        let len = guard.borrow().len();
        len
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AutoConnectSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoConnectSet")
            .field("len", &self.len())
            .finish()
    }
}

/// Starts a connection attempt to a known device.
///
/// Dispatch is fire-and-forget. Implementations are expected to move the
/// device to [`ConnectionState::Connecting`](crate::ConnectionState) before
/// returning or soon after.
#[cfg_attr(test, mockall::automock)]
pub trait ReconnectCapability: Send + Sync {
    /// Begin reconnecting to `device`.
    fn reconnect(&self, device: &Arc<BleDevice>);
}

/// Decides, per discovery, whether a known device should be reconnected.
pub struct AutoReconnectCoordinator {
    /// Devices elected for auto-reconnect.
    devices: AutoConnectSet,
    /// Connection subsystem entry point.
    reconnect: Arc<dyn ReconnectCapability>,
}

impl AutoReconnectCoordinator {
    /// Create a coordinator over a shared set.
    pub fn new(devices: AutoConnectSet, reconnect: Arc<dyn ReconnectCapability>) -> Self {
        Self { devices, reconnect }
    }

    /// The shared set this coordinator reads.
    pub fn devices(&self) -> &AutoConnectSet {
        &self.devices
    }

    /// Offer a discovered address for reconnection.
    ///
    /// Returns `true` if a reconnect was dispatched. The eligibility check
    /// and the dispatch happen under one acquisition of the device-state
    /// lock.
    pub fn on_discovered(&self, address: &str) -> bool {
        let address = normalize_address(address);
        let guard = self.devices.lock();

        let device = guard.borrow().get(&address).cloned();
        let Some(device) = device else {
            return false;
        };

        if device.is_connected() || device.is_connecting() || !device.is_auto_connect() {
            trace!(
                "Not reconnecting {}: state={}, auto_connect={}",
                device,
                device.connection_state(),
                device.is_auto_connect()
            );
            return false;
        }

        info!("Reconnecting to {}", device);
        self.reconnect.reconnect(&device);
        drop(guard);

        true
    }
}
