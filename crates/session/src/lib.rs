//! Synchronous USB device sessions
//!
//! A safe, typed layer over libusb for blocking device I/O: enumerate
//! attached devices, pick the ones you care about with a selection
//! policy, open them, claim interfaces and run control, bulk and
//! interrupt transfers, with every native status code translated into
//! the [`UsbError`] taxonomy.
//!
//! The crate performs no internal threading and exposes no async
//! surface; every operation blocks the calling thread until the native
//! call completes or times out. A transfer handed to the native layer
//! cannot be cancelled from outside — a supervising thread can only
//! abandon waiting on it, never abort it.
//!
//! ```no_run
//! use std::time::Duration;
//! use session::{UsbSystem, VendorProductMatcher};
//!
//! # fn main() -> session::Result<()> {
//! let system = UsbSystem::new()?;
//! let mut devices = system.visit_devices(VendorProductMatcher::new(0x10cf, 0x5500, 0))?;
//! if let Some(device) = devices.last_mut() {
//!     device.open()?;
//!     device.claim_interface(0)?;
//!     let mut report = [0u8; 8];
//!     let n = device.interrupt_read(0x81, &mut report, Duration::from_millis(100))?;
//!     println!("{:?}", &report[..n]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod request;
pub mod selector;
pub mod system;
pub mod test_utils;

pub use descriptor::{DeviceDescriptor, DeviceSummary, Version};
pub use device::UsbDevice;
pub use error::{Result, UsbError};
pub use selector::{DeviceSelector, VendorProductMatcher};
pub use system::{DebugLevel, UsbSystem};
