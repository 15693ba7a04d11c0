//! Fakes shared by the unit tests.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ble::radio::{LeScanner, RadioAdapter};
use crate::config::{ScanFilter, ScanSettings};
use crate::device::BleDevice;
use crate::record::ScanRecord;
use crate::session::{ScanObserver, ScanSink};

/// A command the fake radio received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RadioCommand {
    LegacyStart,
    LegacyStop,
    Start { filters: usize },
    Stop,
}

#[derive(Default)]
struct RadioLog {
    commands: Mutex<Vec<RadioCommand>>,
    sink: Mutex<Option<ScanSink>>,
}

struct FakeScanner {
    log: Arc<RadioLog>,
}

impl LeScanner for FakeScanner {
    fn start_scan(&self, filters: &[ScanFilter], _settings: &ScanSettings, sink: &ScanSink) {
        self.log.commands.lock().push(RadioCommand::Start {
            filters: filters.len(),
        });
        *self.log.sink.lock() = Some(sink.clone());
    }

    fn stop_scan(&self, _sink: &ScanSink) {
        self.log.commands.lock().push(RadioCommand::Stop);
    }
}

/// In-memory radio that records commands and keeps the last sink it was
/// handed, so tests can play the driver.
pub(crate) struct FakeRadio {
    modern: bool,
    enabled: AtomicBool,
    scanner_ready: AtomicBool,
    scanner_lookups: AtomicUsize,
    log: Arc<RadioLog>,
}

impl FakeRadio {
    pub(crate) fn modern() -> Arc<Self> {
        Arc::new(Self::with_api(true))
    }

    pub(crate) fn legacy() -> Arc<Self> {
        Arc::new(Self::with_api(false))
    }

    fn with_api(modern: bool) -> Self {
        Self {
            modern,
            enabled: AtomicBool::new(true),
            scanner_ready: AtomicBool::new(true),
            scanner_lookups: AtomicUsize::new(0),
            log: Arc::new(RadioLog::default()),
        }
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn set_scanner_ready(&self, ready: bool) {
        self.scanner_ready.store(ready, Ordering::SeqCst);
    }

    pub(crate) fn scanner_lookups(&self) -> usize {
        self.scanner_lookups.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> Vec<RadioCommand> {
        self.log.commands.lock().clone()
    }

    /// The sink of the most recent start.
    pub(crate) fn sink(&self) -> ScanSink {
        self.log
            .sink
            .lock()
            .clone()
            .expect("radio was never started")
    }
}

impl RadioAdapter for FakeRadio {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn supports_le_scanner(&self) -> bool {
        self.modern
    }

    fn le_scanner(&self) -> Option<Arc<dyn LeScanner>> {
        self.scanner_lookups.fetch_add(1, Ordering::SeqCst);
        if self.is_enabled() && self.scanner_ready.load(Ordering::SeqCst) {
            Some(Arc::new(FakeScanner {
                log: self.log.clone(),
            }))
        } else {
            None
        }
    }

    fn start_le_scan(&self, sink: &ScanSink) -> bool {
        self.log.commands.lock().push(RadioCommand::LegacyStart);
        *self.log.sink.lock() = Some(sink.clone());
        true
    }

    fn stop_le_scan(&self, _sink: &ScanSink) {
        self.log.commands.lock().push(RadioCommand::LegacyStop);
    }
}

/// A callback the recording observer received.
#[derive(Debug, Clone)]
pub(crate) enum ObserverEvent {
    Start,
    Stop,
    Discovered {
        device: Arc<BleDevice>,
        rssi: i16,
        raw: Bytes,
    },
    RecordParsed {
        device: Arc<BleDevice>,
        record: ScanRecord,
    },
    ScanFailed(i32),
}

/// Observer that records every callback in order.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn starts(&self) -> usize {
        self.count(|e| matches!(e, ObserverEvent::Start))
    }

    pub(crate) fn stops(&self) -> usize {
        self.count(|e| matches!(e, ObserverEvent::Stop))
    }

    /// Addresses passed to `on_discovered`, in callback order.
    pub(crate) fn discovered(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ObserverEvent::Discovered { device, .. } => Some(device.address().to_string()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn parsed(&self) -> usize {
        self.count(|e| matches!(e, ObserverEvent::RecordParsed { .. }))
    }

    fn count(&self, predicate: impl Fn(&ObserverEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl ScanObserver for RecordingObserver {
    fn on_start(&self) {
        self.events.lock().push(ObserverEvent::Start);
    }

    fn on_stop(&self) {
        self.events.lock().push(ObserverEvent::Stop);
    }

    fn on_discovered(&self, device: &Arc<BleDevice>, rssi: i16, raw: &Bytes) {
        self.events.lock().push(ObserverEvent::Discovered {
            device: device.clone(),
            rssi,
            raw: raw.clone(),
        });
    }

    fn on_record_parsed(&self, device: &Arc<BleDevice>, record: &ScanRecord) {
        self.events.lock().push(ObserverEvent::RecordParsed {
            device: device.clone(),
            record: record.clone(),
        });
    }

    fn on_scan_failed(&self, error_code: i32) {
        self.events.lock().push(ObserverEvent::ScanFailed(error_code));
    }
}

/// A parseable advertisement carrying `name` as its local name.
pub(crate) fn named_advertisement(name: &str) -> Vec<u8> {
    let mut data = vec![0x02, 0x01, 0x06, name.len() as u8 + 1, 0x09];
    data.extend_from_slice(name.as_bytes());
    data
}
