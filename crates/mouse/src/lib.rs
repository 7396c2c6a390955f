//! Synchronous USB mouse driver
//!
//! A reference consumer of the `session` crate: a blocking poll loop
//! over a boot-protocol USB mouse. [`SyncMouse::poll`] hangs until the
//! mouse reports, reconnecting by itself whenever the device goes away,
//! so a driver thread is just `loop { mouse.poll(); ... }`.
//!
//! The open-claim-loop shape here (treat a timeout as "retry the same
//! read", treat any other transfer error as "device lost, rediscover")
//! is the template for any synchronous polling driver built on the
//! session layer; the shared attach sequence lives in
//! [`attach_device`].

mod attach;
mod mouse;

pub use attach::{DEFAULT_READ_TIMEOUT, attach_device};
pub use mouse::SyncMouse;
