//! Basic example: Discover nearby BLE devices for one scan period
//!
//! Run with: cargo run --example discover_devices

use ble_autoscan::{BleDevice, BtleplugRadio, Result, ScanObserver, ScanRecord, ScanSession};
use bytes::Bytes;
use std::sync::Arc;

struct PrintingObserver;

impl ScanObserver for PrintingObserver {
    fn on_start(&self) {
        println!("Scan started");
    }

    fn on_stop(&self) {
        println!("Scan stopped");
    }

    fn on_discovered(&self, device: &Arc<BleDevice>, rssi: i16, raw: &Bytes) {
        println!("\nDiscovered device:");
        println!("  Address: {}", device.address());
        println!("  RSSI: {} dBm", rssi);
        println!("  Advertisement: {} bytes", raw.len());
    }

    fn on_record_parsed(&self, device: &Arc<BleDevice>, record: &ScanRecord) {
        if let Some(name) = &record.local_name {
            println!("  {} is advertising as {:?}", device.address(), name);
        }
        for (company_id, data) in &record.manufacturer_data {
            println!(
                "  {} manufacturer 0x{:04X}: {} bytes",
                device.address(),
                company_id,
                data.len()
            );
        }
    }

    fn on_scan_failed(&self, error_code: i32) {
        println!("Scan failed with code {}", error_code);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_autoscan=debug".parse().unwrap()),
        )
        .init();

    println!("Starting BLE discovery...");

    let radio = Arc::new(BtleplugRadio::new().await?);
    let session = ScanSession::new(radio)?;
    let period = session.config().scan_period;

    session.start_with_default_period(Some(Arc::new(PrintingObserver)));

    println!("Scanning for {:?}...", period);
    println!("Press Ctrl+C to exit early.\n");

    tokio::select! {
        _ = tokio::time::sleep(period) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted!");
            session.stop();
        }
    }

    println!("\n--- Scan Complete ---");
    println!("Scanning: {}", session.is_scanning());

    Ok(())
}
