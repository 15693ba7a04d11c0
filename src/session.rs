//! Scan session state machine.
//!
//! A [`ScanSession`] runs one time-bounded scan at a time. Each start opens a
//! new session generation; the radio driver is handed a [`ScanSink`] tagged
//! with that generation, and anything arriving through a sink of an older
//! generation is dropped. The same tag guards the auto-stop timer, so a
//! timeout left over from an earlier scan cannot stop a newer one.
//!
//! All session state sits behind one re-entrant lock that is held for the
//! whole of each discovery step, observer callbacks included. Observers may
//! therefore call back into the session from a callback.

use bytes::Bytes;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, trace};

use crate::ble::radio::{RadioAdapter, RadioState, ScanResult};
use crate::ble::transport::{resolve_transport, Transport, TransportKind};
use crate::config::ScanConfig;
use crate::device::{BleDevice, DefaultDeviceFactory, DeviceFactory, Discovery};
use crate::error::Result;
use crate::reconnect::AutoReconnectCoordinator;
use crate::record::{AdvertisementParser, RecordParser, ScanRecord};
use crate::registry::DeviceRegistry;
use crate::scheduler::{ScanScheduler, TimerHandle};

/// Receives scan lifecycle and discovery callbacks.
///
/// Callbacks run on whichever thread delivered the event, while the session
/// lock is held.
pub trait ScanObserver: Send + Sync {
    /// Discovery was started.
    fn on_start(&self) {}

    /// Discovery was stopped, explicitly or by timeout.
    fn on_stop(&self) {}

    /// A device was seen for the first time this session.
    fn on_discovered(&self, _device: &Arc<BleDevice>, _rssi: i16, _raw: &Bytes) {}

    /// An advertisement parsed successfully. Fires for every such
    /// advertisement, including repeats from known devices.
    fn on_record_parsed(&self, _device: &Arc<BleDevice>, _record: &ScanRecord) {}

    /// The modern scanner reported a failure. The session keeps running.
    fn on_scan_failed(&self, _error_code: i32) {}
}

/// Mutable session state.
struct SessionState {
    running: bool,
    generation: u64,
    observer: Option<Arc<dyn ScanObserver>>,
    registry: DeviceRegistry,
    sink: Option<ScanSink>,
    timer: Option<TimerHandle>,
}

impl SessionState {
    fn is_current(&self, generation: u64) -> bool {
        self.running && self.generation == generation
    }
}

struct SessionInner {
    state: ReentrantMutex<RefCell<SessionState>>,
    transport: Box<dyn Transport>,
    parser: Arc<dyn RecordParser>,
    coordinator: Option<AutoReconnectCoordinator>,
    scheduler: ScanScheduler,
    config: ScanConfig,
}

impl SessionInner {
    fn start(self: &Arc<Self>, observer: Option<Arc<dyn ScanObserver>>, period: Duration) {
        let guard = self.state.lock();

        let (generation, sink, observer) = {
            let mut state = guard.borrow_mut();
            if state.running {
                debug!("Already scanning, ignoring start request");
                return;
            }

            let started = observer.clone();
            if observer.is_some() {
                state.observer = observer;
            }
            state.running = true;
            state.generation += 1;
            let generation = state.generation;

            let sink = ScanSink {
                session: Arc::downgrade(self),
                generation,
            };
            state.sink = Some(sink.clone());

            if let Some(previous) = state.timer.take() {
                previous.cancel();
            }
            let weak = Arc::downgrade(self);
            state.timer = Some(self.scheduler.schedule_once(period, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.stop_generation(Some(generation));
                }
            }));

            (generation, sink, started)
        };

        info!(
            "Starting {} BLE scan (generation {}, period {:?})",
            self.transport.kind(),
            generation,
            period
        );
        self.transport
            .begin(&self.config.filters, &self.config.settings, &sink);

        if let Some(observer) = observer {
            observer.on_start();
        }
    }

    /// Stop the running scan. With `Some(generation)`, only stop if that
    /// generation is still the running one.
    fn stop_generation(&self, expected: Option<u64>) {
        let guard = self.state.lock();

        let (generation, sink, observer) = {
            let mut state = guard.borrow_mut();
            if !state.running {
                debug!("Not scanning, ignoring stop request");
                return;
            }
            if let Some(expected) = expected {
                if expected != state.generation {
                    debug!("Ignoring stale scan timeout for generation {}", expected);
                    return;
                }
                debug!("Scan period elapsed for generation {}", expected);
            }

            state.running = false;
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            (state.generation, state.sink.take(), state.observer.clone())
        };

        info!("Stopping BLE scan (generation {})", generation);
        if let Some(sink) = sink {
            self.transport.end(&sink);
        }
        guard.borrow_mut().registry.clear();

        if let Some(observer) = observer {
            observer.on_stop();
        }
    }

    fn handle_discovery(&self, generation: u64, discovery: Discovery) {
        if discovery.address.is_empty() {
            trace!("Dropping discovery without an address");
            return;
        }

        {
            let guard = self.state.lock();

            let (device, is_new, observer) = {
                let mut state = guard.borrow_mut();
                if !state.is_current(generation) {
                    trace!(
                        "Dropping discovery of {} from stale generation {}",
                        discovery.address,
                        generation
                    );
                    return;
                }
                let (device, is_new) = state.registry.fetch_or_create(&discovery);
                (device, is_new, state.observer.clone())
            };

            if is_new {
                if let Some(observer) = &observer {
                    observer.on_discovered(&device, discovery.rssi, &discovery.raw);
                }
            }

            if let Some(record) = self.parser.parse(&discovery.raw) {
                // The observer may have stopped the scan from on_discovered.
                if guard.borrow().is_current(generation) {
                    if let Some(name) = &record.local_name {
                        device.set_name(name.as_str());
                    }
                    if let Some(observer) = &observer {
                        observer.on_record_parsed(&device, &record);
                    }
                }
            }
        }

        if let Some(coordinator) = &self.coordinator {
            coordinator.on_discovered(&discovery.address);
        }
    }

    fn handle_batch(&self, generation: u64, results: &[ScanResult]) {
        if !self.state.lock().borrow().is_current(generation) {
            return;
        }
        debug!("Received batch of {} scan results", results.len());
        for result in results {
            debug!(
                "Batch result: {} rssi={} ({} bytes)",
                result.address,
                result.rssi,
                result.scan_record.len()
            );
        }
    }

    fn handle_scan_failed(&self, generation: u64, error_code: i32) {
        error!("Scan failed, error code: {}", error_code);

        let guard = self.state.lock();
        let observer = {
            let state = guard.borrow();
            if !state.is_current(generation) {
                return;
            }
            state.observer.clone()
        };
        if let Some(observer) = observer {
            observer.on_scan_failed(error_code);
        }
    }

    fn handle_radio_state(&self, radio_state: RadioState) {
        debug!("Radio state changed: {}", radio_state);
        if radio_state == RadioState::Off {
            self.stop_generation(None);
        }
    }

    fn is_scanning(&self) -> bool {
        self.state.lock().borrow().running
    }
}

/// Handle a radio driver uses to deliver events into a scan session.
///
/// A sink belongs to one session generation. Once that scan stops, events
/// delivered through it are discarded.
#[derive(Clone)]
pub struct ScanSink {
    session: Weak<SessionInner>,
    generation: u64,
}

impl ScanSink {
    /// A sink attached to no session.
    #[cfg(test)]
    pub(crate) fn detached(generation: u64) -> Self {
        Self {
            session: Weak::new(),
            generation,
        }
    }

    /// The session generation this sink delivers into.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check if events delivered through this sink would still be accepted.
    pub fn is_active(&self) -> bool {
        let Some(inner) = self.session.upgrade() else {
            return false;
        };
        let guard = inner.state.lock();
        let active = guard.borrow().is_current(self.generation);
        active
    }

    /// Legacy API result.
    pub fn on_le_scan(&self, address: &str, rssi: i16, scan_record: &[u8]) {
        if let Some(inner) = self.session.upgrade() {
            let discovery = Discovery::new(address, rssi, Bytes::copy_from_slice(scan_record));
            inner.handle_discovery(self.generation, discovery);
        }
    }

    /// Modern API result.
    pub fn on_scan_result(&self, result: &ScanResult) {
        if let Some(inner) = self.session.upgrade() {
            let discovery = Discovery::new(&result.address, result.rssi, result.scan_record.clone());
            inner.handle_discovery(self.generation, discovery);
        }
    }

    /// Modern API batch. Logged only; each result is expected to arrive
    /// through [`ScanSink::on_scan_result`] as well.
    pub fn on_batch_scan_results(&self, results: &[ScanResult]) {
        if let Some(inner) = self.session.upgrade() {
            inner.handle_batch(self.generation, results);
        }
    }

    /// Modern API failure notification.
    pub fn on_scan_failed(&self, error_code: i32) {
        if let Some(inner) = self.session.upgrade() {
            inner.handle_scan_failed(self.generation, error_code);
        }
    }

    /// Radio power state change.
    pub fn on_radio_state(&self, state: RadioState) {
        if let Some(inner) = self.session.upgrade() {
            inner.handle_radio_state(state);
        }
    }
}

impl PartialEq for ScanSink {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation && Weak::ptr_eq(&self.session, &other.session)
    }
}

impl Eq for ScanSink {}

impl std::fmt::Debug for ScanSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSink")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Builder for [`ScanSession`].
pub struct ScanSessionBuilder {
    radio: Arc<dyn RadioAdapter>,
    config: ScanConfig,
    factory: Arc<dyn DeviceFactory>,
    parser: Arc<dyn RecordParser>,
    coordinator: Option<AutoReconnectCoordinator>,
    scheduler: Option<ScanScheduler>,
}

impl ScanSessionBuilder {
    /// Set the scan configuration.
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the factory that builds device handles.
    pub fn device_factory(mut self, factory: Arc<dyn DeviceFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Set the advertisement parser.
    pub fn record_parser(mut self, parser: Arc<dyn RecordParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Offer every discovery to an auto-reconnect coordinator.
    pub fn auto_reconnect(mut self, coordinator: AutoReconnectCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Run scan timeouts on a specific scheduler.
    pub fn scheduler(mut self, scheduler: ScanScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build the session, resolving the transport from the radio.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or if no scheduler
    /// was given and the caller is not inside a tokio runtime.
    pub fn build(self) -> Result<ScanSession> {
        self.config.validate()?;

        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => ScanScheduler::current()?,
        };

        let transport = resolve_transport(self.radio);
        info!("Using {} scan transport", transport.kind());

        let state = SessionState {
            running: false,
            generation: 0,
            observer: None,
            registry: DeviceRegistry::new(self.factory),
            sink: None,
            timer: None,
        };

        Ok(ScanSession {
            inner: Arc::new(SessionInner {
                state: ReentrantMutex::new(RefCell::new(state)),
                transport,
                parser: self.parser,
                coordinator: self.coordinator,
                scheduler,
                config: self.config,
            }),
        })
    }
}

/// A time-bounded BLE scan with per-session deduplication.
pub struct ScanSession {
    inner: Arc<SessionInner>,
}

impl ScanSession {
    /// Start building a session over `radio`.
    pub fn builder(radio: Arc<dyn RadioAdapter>) -> ScanSessionBuilder {
        ScanSessionBuilder {
            radio,
            config: ScanConfig::default(),
            factory: Arc::new(DefaultDeviceFactory),
            parser: Arc::new(AdvertisementParser),
            coordinator: None,
            scheduler: None,
        }
    }

    /// Create a session with default configuration on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeUnavailable`](crate::Error::RuntimeUnavailable)
    /// outside a tokio runtime.
    pub fn new(radio: Arc<dyn RadioAdapter>) -> Result<Self> {
        Self::builder(radio).build()
    }

    /// Start scanning for `period`.
    ///
    /// Does nothing if already scanning. A `None` observer keeps the
    /// previously registered one for discovery and stop callbacks, but
    /// `on_start` only fires on an observer passed here.
    pub fn start(&self, observer: Option<Arc<dyn ScanObserver>>, period: Duration) {
        self.inner.start(observer, period);
    }

    /// Start scanning for the configured scan period.
    pub fn start_with_default_period(&self, observer: Option<Arc<dyn ScanObserver>>) {
        self.inner.start(observer, self.inner.config.scan_period);
    }

    /// Stop scanning. Does nothing if not scanning.
    pub fn stop(&self) {
        self.inner.stop_generation(None);
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.inner.is_scanning()
    }

    /// Push a radio power state change. Powering off stops the scan.
    pub fn on_radio_state(&self, state: RadioState) {
        self.inner.handle_radio_state(state);
    }

    /// The current session generation. Zero before the first start.
    pub fn generation(&self) -> u64 {
        self.inner.state.lock().borrow().generation
    }

    /// Which transport the session resolved.
    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    /// Devices discovered by the current scan.
    pub fn discovered_devices(&self) -> Vec<Arc<BleDevice>> {
        self.inner.state.lock().borrow().registry.devices()
    }

    /// The session configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.inner.config
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.inner.stop_generation(None);
    }
}
