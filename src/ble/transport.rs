//! Legacy and modern discovery transports behind one interface.
//!
//! The transport is chosen once per session from the radio's capabilities.
//! The modern transport looks its scanner up again on every command until
//! the radio hands one out, since the radio may be off when the session is
//! built.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ble::radio::{LeScanner, RadioAdapter};
use crate::config::{ScanFilter, ScanSettings};
use crate::session::ScanSink;

/// Which discovery API a transport drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Combined start/stop call delivering address, RSSI and raw bytes.
    Legacy,
    /// Filtered scanner with structured, batched results.
    Modern,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Modern => write!(f, "modern"),
        }
    }
}

/// Issues begin/end discovery commands to the radio.
pub trait Transport: Send + Sync {
    /// Which API this transport drives.
    fn kind(&self) -> TransportKind;

    /// Begin discovery, delivering events to `sink`.
    fn begin(&self, filters: &[ScanFilter], settings: &ScanSettings, sink: &ScanSink);

    /// End the discovery started with `sink`.
    fn end(&self, sink: &ScanSink);
}

/// Pick the transport the radio supports.
pub fn resolve_transport(radio: Arc<dyn RadioAdapter>) -> Box<dyn Transport> {
    if radio.supports_le_scanner() {
        Box::new(ModernTransport::new(radio))
    } else {
        Box::new(LegacyTransport::new(radio))
    }
}

/// Transport over the radio's combined start/stop API.
pub struct LegacyTransport {
    radio: Arc<dyn RadioAdapter>,
}

impl LegacyTransport {
    /// Create a legacy transport.
    pub fn new(radio: Arc<dyn RadioAdapter>) -> Self {
        Self { radio }
    }
}

impl Transport for LegacyTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Legacy
    }

    fn begin(&self, filters: &[ScanFilter], _settings: &ScanSettings, sink: &ScanSink) {
        if !filters.is_empty() {
            debug!("Legacy scan ignores {} filter(s)", filters.len());
        }
        if !self.radio.start_le_scan(sink) {
            warn!("Radio refused legacy scan start");
        }
    }

    fn end(&self, sink: &ScanSink) {
        self.radio.stop_le_scan(sink);
    }
}

/// Transport over the radio's filtered scanner.
pub struct ModernTransport {
    radio: Arc<dyn RadioAdapter>,
    /// Scanner handle, resolved lazily.
    scanner: Mutex<Option<Arc<dyn LeScanner>>>,
}

impl ModernTransport {
    /// Create a modern transport, resolving the scanner if the radio has one.
    pub fn new(radio: Arc<dyn RadioAdapter>) -> Self {
        let scanner = radio.le_scanner();
        Self {
            radio,
            scanner: Mutex::new(scanner),
        }
    }

    /// Get the scanner, asking the radio again if it had none before.
    fn resolve_scanner(&self) -> Option<Arc<dyn LeScanner>> {
        let mut scanner = self.scanner.lock();
        if scanner.is_none() {
            *scanner = self.radio.le_scanner();
            if scanner.is_some() {
                debug!("Resolved LE scanner after construction");
            }
        }
        scanner.clone()
    }
}

impl Transport for ModernTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Modern
    }

    fn begin(&self, filters: &[ScanFilter], settings: &ScanSettings, sink: &ScanSink) {
        if !self.radio.is_enabled() {
            debug!("Radio disabled, dropping scan start");
            return;
        }
        match self.resolve_scanner() {
            Some(scanner) => scanner.start_scan(filters, settings, sink),
            None => debug!("No LE scanner available, dropping scan start"),
        }
    }

    fn end(&self, sink: &ScanSink) {
        if !self.radio.is_enabled() {
            debug!("Radio disabled, dropping scan stop");
            return;
        }
        match self.resolve_scanner() {
            Some(scanner) => scanner.stop_scan(sink),
            None => debug!("No LE scanner available, dropping scan stop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRadio, RadioCommand};

    #[test]
    fn test_resolve_by_capability() {
        assert_eq!(resolve_transport(FakeRadio::modern()).kind(), TransportKind::Modern);
        assert_eq!(resolve_transport(FakeRadio::legacy()).kind(), TransportKind::Legacy);
        assert_eq!(TransportKind::Legacy.to_string(), "legacy");
    }

    #[test]
    fn test_legacy_begin_and_end() {
        let radio = FakeRadio::legacy();
        let transport = LegacyTransport::new(radio.clone());
        let sink = ScanSink::detached(1);

        transport.begin(&[ScanFilter::by_address("AA:BB:CC:DD:EE:FF")], &ScanSettings::default(), &sink);
        transport.end(&sink);

        assert_eq!(
            radio.commands(),
            vec![RadioCommand::LegacyStart, RadioCommand::LegacyStop]
        );
    }

    #[test]
    fn test_modern_drops_commands_while_disabled() {
        let radio = FakeRadio::modern();
        let transport = ModernTransport::new(radio.clone());
        let sink = ScanSink::detached(1);

        radio.set_enabled(false);
        transport.begin(&[], &ScanSettings::default(), &sink);
        transport.end(&sink);
        assert!(radio.commands().is_empty());

        radio.set_enabled(true);
        transport.begin(&[], &ScanSettings::default(), &sink);
        transport.end(&sink);
        assert_eq!(
            radio.commands(),
            vec![RadioCommand::Start { filters: 0 }, RadioCommand::Stop]
        );
    }

    #[test]
    fn test_modern_resolves_scanner_lazily() {
        let radio = FakeRadio::modern();
        radio.set_scanner_ready(false);
        let transport = ModernTransport::new(radio.clone());
        assert_eq!(radio.scanner_lookups(), 1);

        let sink = ScanSink::detached(1);
        transport.begin(&[], &ScanSettings::default(), &sink);
        assert_eq!(radio.scanner_lookups(), 2);
        assert!(radio.commands().is_empty());

        radio.set_scanner_ready(true);
        transport.begin(&[], &ScanSettings::default(), &sink);
        transport.end(&sink);

        // resolved once, then reused
        assert_eq!(radio.scanner_lookups(), 3);
        assert_eq!(
            radio.commands(),
            vec![RadioCommand::Start { filters: 0 }, RadioCommand::Stop]
        );
    }
}
