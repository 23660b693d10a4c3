use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Scanning for JK BMS devices (5s)...");

    let devices = jkprobe::discover_devices(Duration::from_secs(5)).await?;

    if devices.is_empty() {
        println!(" - no devices found - ");
        return Ok(());
    }

    for device in &devices {
        println!("{device}");
    }
    println!();
    println!("Pass one of the addresses above to the read_info example.");

    Ok(())
}
