//! usb-session diagnostic tool
//!
//! Small binary exercising the session and mouse crates: list attached
//! devices (table or JSON), poll a mouse live, or reset a device picked
//! by vendor/product pair.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mouse::SyncMouse;
use session::{UsbDevice, UsbSystem, VendorProductMatcher};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "usb-session")]
#[command(author, version, about = "USB device session diagnostics")]
#[command(long_about = "
Diagnostics for synchronous USB device sessions.

EXAMPLES:
    # List attached devices
    usb-session list

    # Same listing as JSON
    usb-session list --json

    # Poll a Microsoft Basic Optical Mouse and print reports
    usb-session mouse --vendor-id 0x045e --product-id 0x00cb

    # Reset the first matching device
    usb-session reset --vendor-id 0x10cf --product-id 0x5500
")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    List {
        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Poll a USB mouse and print its reports
    Mouse {
        /// Vendor id, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_id)]
        vendor_id: u16,

        /// Product id, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_id)]
        product_id: u16,

        /// 0 for the first matching device, 1 for the second, ...
        #[arg(long, default_value_t = 0)]
        occurrence: usize,

        /// Stop after this many reports (0 = run until interrupted)
        #[arg(long, default_value_t = 0)]
        count: u64,
    },
    /// Reset a device picked by vendor/product pair
    Reset {
        /// Vendor id, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_id)]
        vendor_id: u16,

        /// Product id, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_id)]
        product_id: u16,

        /// 0 for the first matching device, 1 for the second, ...
        #[arg(long, default_value_t = 0)]
        occurrence: usize,
    },
}

fn parse_id(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("'{s}' is not a decimal or 0x-prefixed hex id"))
}

fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level).context("Failed to setup logging")?;
    info!("usb-session v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::List { json } => list_devices(json),
        Command::Mouse {
            vendor_id,
            product_id,
            occurrence,
            count,
        } => poll_mouse(vendor_id, product_id, occurrence, count),
        Command::Reset {
            vendor_id,
            product_id,
            occurrence,
        } => reset_device(vendor_id, product_id, occurrence),
    }
}

/// Setup tracing: `RUST_LOG` wins, the --log-level flag is the
/// fallback.
fn setup_logging(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    Ok(())
}

fn list_devices(json: bool) -> Result<()> {
    let system = UsbSystem::new().context("Failed to initialize USB context")?;
    let mut devices = system
        .visit_devices(|devices: &[UsbDevice]| (0..devices.len()).collect())
        .context("Device enumeration failed")?;

    let mut summaries = Vec::with_capacity(devices.len());
    for device in &mut devices {
        // Strings need an open handle; the listing still works for
        // devices we lack permission to open.
        let _ = device.open();
        summaries.push(device.summary());
        device.close();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("BUS  ADDR  VID:PID    CLASS  PRODUCT");
    for s in &summaries {
        println!(
            "{:<4} {:<5} {:04x}:{:04x}  {:<6} {}",
            s.bus,
            s.address,
            s.vendor_id,
            s.product_id,
            s.class_code,
            s.product.as_deref().unwrap_or("-"),
        );
    }
    println!("{} devices", summaries.len());
    Ok(())
}

fn poll_mouse(vendor_id: u16, product_id: u16, occurrence: usize, count: u64) -> Result<()> {
    let system = UsbSystem::new().context("Failed to initialize USB context")?;
    let mut mouse = SyncMouse::new(system, vendor_id, product_id, occurrence);
    info!("polling mouse {vendor_id:04x}:{product_id:04x}");

    let mut reports = 0u64;
    loop {
        if mouse.poll() {
            let held: Vec<usize> = (0..8).filter(|&n| mouse.button(n)).collect();
            println!(
                "x={:+4} y={:+4} wheel={:+3} buttons={:?}",
                mouse.x(),
                mouse.y(),
                mouse.wheel(),
                held,
            );
            reports += 1;
            if count != 0 && reports >= count {
                return Ok(());
            }
        } else {
            info!("mouse not available, retrying");
            std::thread::sleep(Duration::from_secs(1));
        }
    }
}

fn reset_device(vendor_id: u16, product_id: u16, occurrence: usize) -> Result<()> {
    let system = UsbSystem::new().context("Failed to initialize USB context")?;
    let mut devices = system
        .visit_devices(VendorProductMatcher::new(vendor_id, product_id, occurrence))
        .context("Device enumeration failed")?;
    let Some(mut device) = devices.pop() else {
        bail!("no device matching {vendor_id:04x}:{product_id:04x} (occurrence {occurrence})");
    };

    device.open().context("Failed to open device")?;
    device.reset_device().context("Reset failed")?;
    println!(
        "reset device {:03}:{:03}",
        device.bus_number(),
        device.device_address()
    );
    Ok(())
}
