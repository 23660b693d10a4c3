use btleplug::api::BDAddr;
use std::str::FromStr;
use tracing::{error, info};

use jkprobe::{read_device_info, SessionConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let Some(arg) = std::env::args().nth(1) else {
        eprintln!("usage: read_info <bms-address>");
        eprintln!("       run the discover example to list addresses in range");
        std::process::exit(2);
    };
    let address = BDAddr::from_str(&arg)?;

    info!("Reading device info from {address}...");

    match read_device_info(address, SessionConfig::default()).await {
        Ok(info) => {
            print!("{info}");
            Ok(())
        }
        Err(e) => {
            error!("Failed to read device info: {e}");
            Err(e.into())
        }
    }
}
