//! Radio adapter backed by btleplug.
//!
//! btleplug only exposes one scanning API, so [`BtleplugRadio`] offers the
//! filtered scanner. Advertisements are rebuilt from the peripheral's
//! properties into an advertisement payload, since the platform layers do
//! not hand out the raw bytes.
//!
//! Adapter commands are asynchronous while the scanner interface is not, so
//! every start and stop runs as a task that first waits for the previous
//! command to finish.

use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, Manager as _, Peripheral as _,
    ScanFilter as PlatformScanFilter,
};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::radio::{scan_failure, LeScanner, RadioAdapter, RadioState, ScanResult, RSSI_UNKNOWN};
use crate::config::{ScanFilter, ScanSettings};
use crate::error::{Error, Result};
use crate::record::ScanRecord;
use crate::session::ScanSink;

impl From<CentralState> for RadioState {
    fn from(state: CentralState) -> Self {
        match state {
            CentralState::PoweredOn => RadioState::On,
            CentralState::PoweredOff => RadioState::Off,
            _ => RadioState::Unknown,
        }
    }
}

/// Last known adapter power state. Only `Off` disables commands.
#[derive(Debug, Clone)]
struct PowerFlag(Arc<AtomicBool>);

impl PowerFlag {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn is_on(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn apply(&self, state: RadioState) {
        self.0.store(state != RadioState::Off, Ordering::SeqCst);
    }
}

/// The first Bluetooth adapter of the host, as a [`RadioAdapter`].
pub struct BtleplugRadio {
    adapter: Adapter,
    power: PowerFlag,
    scanner: Arc<BtleplugScanner>,
    /// Task following adapter power changes for the radio's lifetime.
    watcher: JoinHandle<()>,
}

impl BtleplugRadio {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        let radio = Self::with_adapter(adapter, Handle::current());
        radio.refresh_state().await?;
        Ok(radio)
    }

    /// Wrap a specific adapter. Scan and state tasks are spawned on `runtime`.
    ///
    /// The radio is assumed powered on until [`refresh_state`](Self::refresh_state)
    /// or a state event says otherwise. Power changes are followed for as
    /// long as the radio lives, scanning or not.
    pub fn with_adapter(adapter: Adapter, runtime: Handle) -> Self {
        let power = PowerFlag::new();

        let watched = adapter.clone();
        let watch_power = power.clone();
        let watcher = runtime.spawn(async move {
            match watched.events().await {
                Ok(events) => watch_state(events, watch_power).await,
                Err(e) => warn!("Cannot follow adapter state: {}", e),
            }
        });

        let scanner = Arc::new(BtleplugScanner {
            adapter: adapter.clone(),
            power: power.clone(),
            commands: CommandQueue::new(runtime),
        });

        Self {
            adapter,
            power,
            scanner,
            watcher,
        }
    }

    /// Query the adapter's power state.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter cannot be queried.
    pub async fn refresh_state(&self) -> Result<RadioState> {
        let state = RadioState::from(self.adapter.adapter_state().await?);
        debug!("Adapter state: {}", state);
        self.power.apply(state);
        Ok(state)
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

impl RadioAdapter for BtleplugRadio {
    fn is_enabled(&self) -> bool {
        self.power.is_on()
    }

    fn supports_le_scanner(&self) -> bool {
        true
    }

    fn le_scanner(&self) -> Option<Arc<dyn LeScanner>> {
        if !self.is_enabled() {
            return None;
        }
        let scanner: Arc<dyn LeScanner> = self.scanner.clone();
        Some(scanner)
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

async fn watch_state<S>(mut events: S, power: PowerFlag)
where
    S: Stream<Item = CentralEvent> + Unpin,
{
    while let Some(event) = events.next().await {
        if let CentralEvent::StateUpdate(state) = event {
            let state = RadioState::from(state);
            debug!("Adapter state changed: {}", state);
            power.apply(state);
        }
    }
    debug!("Adapter state watch ended");
}

#[derive(Default)]
struct CommandChain {
    /// Most recent command. The next one waits for it.
    last: Option<JoinHandle<()>>,
    /// Whether `last` is a running event pump.
    pumping: bool,
}

/// Runs adapter commands one after another on a runtime.
///
/// A new command cancels a running event pump before waiting for it.
struct CommandQueue {
    runtime: Handle,
    chain: Mutex<CommandChain>,
}

impl CommandQueue {
    fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            chain: Mutex::new(CommandChain::default()),
        }
    }

    fn push<F>(&self, pump: bool, command: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut chain = self.chain.lock();

        let previous = chain.last.take();
        if chain.pumping {
            if let Some(previous) = &previous {
                previous.abort();
            }
        }

        chain.last = Some(self.runtime.spawn(async move {
            if let Some(previous) = previous {
                // Cancelled pumps finish with a JoinError; only ordering matters.
                let _ = previous.await;
            }
            command.await;
        }));
        chain.pumping = pump;
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        let chain = self.chain.get_mut();
        if chain.pumping {
            if let Some(pump) = chain.last.take() {
                pump.abort();
            }
        }
    }
}

struct BtleplugScanner {
    adapter: Adapter,
    power: PowerFlag,
    commands: CommandQueue,
}

impl LeScanner for BtleplugScanner {
    fn start_scan(&self, filters: &[ScanFilter], settings: &ScanSettings, sink: &ScanSink) {
        debug!(
            "Starting adapter scan ({:?}, {} filter(s))",
            settings.scan_mode,
            filters.len()
        );

        let adapter = self.adapter.clone();
        let power = self.power.clone();
        let filters = filters.to_vec();
        let sink = sink.clone();

        self.commands.push(true, async move {
            if let Err(e) = pump_events(adapter, filters, power, &sink).await {
                error!("Adapter scan failed: {}", e);
                sink.on_scan_failed(scan_failure::INTERNAL_ERROR);
            }
        });
    }

    fn stop_scan(&self, _sink: &ScanSink) {
        let adapter = self.adapter.clone();
        self.commands.push(false, async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop adapter scan: {}", e);
            }
        });
    }
}

/// Platform-side filter. btleplug can only filter on services, so it is
/// used only when every filter names one.
fn platform_filter(filters: &[ScanFilter]) -> PlatformScanFilter {
    let services: Vec<Uuid> = filters.iter().filter_map(|f| f.service_uuid).collect();
    if !filters.is_empty() && services.len() == filters.len() {
        PlatformScanFilter { services }
    } else {
        PlatformScanFilter::default()
    }
}

async fn pump_events(
    adapter: Adapter,
    filters: Vec<ScanFilter>,
    power: PowerFlag,
    sink: &ScanSink,
) -> Result<()> {
    // Subscribe before starting so early advertisements are not lost.
    let mut events = adapter.events().await?;
    adapter.start_scan(platform_filter(&filters)).await?;

    while let Some(event) = events.next().await {
        if !sink.is_active() {
            break;
        }

        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if let Some(result) = scan_result(&adapter, &id, &filters).await {
                    sink.on_scan_result(&result);
                }
            }
            CentralEvent::StateUpdate(state) => {
                let state = RadioState::from(state);
                power.apply(state);
                sink.on_radio_state(state);
            }
            _ => {}
        }
    }

    debug!("Scan event loop ended");
    Ok(())
}

async fn scan_result(
    adapter: &Adapter,
    id: &PeripheralId,
    filters: &[ScanFilter],
) -> Option<ScanResult> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return None;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return None,
    };

    // CoreBluetooth hides hardware addresses
    let address = if properties.address == BDAddr::default() {
        id.to_string()
    } else {
        properties.address.to_string()
    };

    let record = ScanRecord {
        service_uuids: properties.services,
        local_name: properties.local_name,
        tx_power_level: properties
            .tx_power_level
            .and_then(|level| i8::try_from(level).ok()),
        service_data: properties.service_data.into_iter().collect(),
        manufacturer_data: properties.manufacturer_data.into_iter().collect(),
        ..Default::default()
    };

    if !filters.is_empty() && !filters.iter().any(|f| f.matches(&address, Some(&record))) {
        trace!("Filtered out {}", address);
        return None;
    }

    Some(ScanResult::new(
        &address,
        properties.rssi.unwrap_or(RSSI_UNKNOWN),
        record.to_bytes(),
    ))
}
