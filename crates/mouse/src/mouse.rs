//! Boot-protocol mouse polling

use std::time::Duration;

use session::{UsbDevice, UsbError, UsbSystem};
use tracing::{info, trace};

use crate::attach::{DEFAULT_READ_TIMEOUT, attach_device};

/// Boot-protocol interrupt IN endpoint carrying mouse reports.
const REPORT_ENDPOINT: u8 = 0x81;

/// Report layout: button bitmask, then x, y and wheel as signed bytes.
const REPORT_LEN: usize = 4;

/// Blocking driver for a boot-protocol USB mouse.
///
/// State machine with two states, disconnected and connected. While
/// disconnected, every [`SyncMouse::poll`] retries the full attach
/// sequence (find the `occurrence`-th device carrying the
/// vendor/product pair, open it, detach the kernel driver, claim
/// interface 0). While connected, `poll` blocks on one interrupt read,
/// retrying the same read on timeout; any other transfer failure drops
/// the device and the next `poll` starts over from discovery.
///
/// Run it from a dedicated thread in a plain loop:
///
/// ```no_run
/// use session::UsbSystem;
/// use mouse::SyncMouse;
///
/// # fn main() -> session::Result<()> {
/// let system = UsbSystem::new()?;
/// let mut mouse = SyncMouse::new(system, 0x045e, 0x00cb, 0);
/// loop {
///     if mouse.poll() {
///         println!("x={} y={} wheel={}", mouse.x(), mouse.y(), mouse.wheel());
///     }
/// }
/// # }
/// ```
pub struct SyncMouse {
    system: UsbSystem,
    vendor_id: u16,
    product_id: u16,
    occurrence: usize,
    device: Option<UsbDevice>,
    read_timeout: Duration,
    buttons: [bool; 8],
    x: i8,
    y: i8,
    wheel: i8,
}

impl SyncMouse {
    /// Driver for the `occurrence`-th mouse (zero-based) carrying the
    /// given vendor/product pair. No I/O happens until the first poll.
    pub fn new(system: UsbSystem, vendor_id: u16, product_id: u16, occurrence: usize) -> Self {
        Self {
            system,
            vendor_id,
            product_id,
            occurrence,
            device: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            buttons: [false; 8],
            x: 0,
            y: 0,
            wheel: 0,
        }
    }

    /// Whether the last poll left the driver attached to a device.
    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    /// State of button `n` (0 = left, 1 = right, 2 = middle) in the
    /// last report.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 8 or more; the report carries eight buttons.
    pub fn button(&self, n: usize) -> bool {
        self.buttons[n]
    }

    /// Horizontal movement in the last report.
    pub fn x(&self) -> i8 {
        self.x
    }

    /// Vertical movement in the last report.
    pub fn y(&self) -> i8 {
        self.y
    }

    /// Wheel movement in the last report.
    pub fn wheel(&self) -> i8 {
        self.wheel
    }

    /// Per-attempt read timeout; `Duration::ZERO` blocks indefinitely.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    /// Block until the mouse reports, then decode the report into the
    /// accessors.
    ///
    /// Returns false when no data is available: the device is absent,
    /// attaching to it failed, or a transfer failed with something
    /// other than a timeout (in which case the device is closed and the
    /// next call rediscovers it). Timeouts are retried in place, so a
    /// connected, idle mouse keeps this call blocked rather than
    /// returning.
    pub fn poll(&mut self) -> bool {
        if self.device.is_none() {
            self.device =
                attach_device(&self.system, self.vendor_id, self.product_id, self.occurrence);
            match &self.device {
                Some(_) => info!(
                    "mouse {:04x}:{:04x} connected",
                    self.vendor_id, self.product_id
                ),
                None => return false,
            }
        }
        let Some(device) = self.device.as_mut() else {
            return false;
        };

        let mut report = [0u8; REPORT_LEN];
        loop {
            match device.interrupt_read(REPORT_ENDPOINT, &mut report, self.read_timeout) {
                Ok(_) => break,
                Err(UsbError::Timeout { .. }) => {
                    // No report inside the window; same read again.
                }
                Err(err) => {
                    info!("read failed: {err}");
                    device.close();
                    self.device = None;
                    return false;
                }
            }
        }

        for (i, button) in self.buttons.iter_mut().enumerate() {
            *button = report[0] & (1 << i) != 0;
        }
        self.x = report[1] as i8;
        self.y = report[2] as i8;
        self.wheel = report[3] as i8;
        trace!(
            "report buttons={:#04x} x={} y={} wheel={}",
            report[0], self.x, self.y, self.wheel
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libusb1_sys::constants::LIBUSB_ERROR_NO_DEVICE;
    use session::test_utils::{FakeDevice, FakeUsb, ScriptedTransfer};
    use std::sync::Arc;

    fn mouse_over(api: &Arc<FakeUsb>) -> SyncMouse {
        SyncMouse::new(UsbSystem::from_api(api.clone()), 0x045e, 0x00cb, 0)
    }

    #[test]
    fn test_poll_without_device_reports_no_data() {
        let api = FakeUsb::new();
        let mut mouse = mouse_over(&api);

        assert!(!mouse.poll());
        assert!(!mouse.is_connected());
    }

    #[test]
    fn test_poll_decodes_report() {
        let api = FakeUsb::new();
        api.add_device(
            FakeDevice::new(0x045e, 0x00cb).read(REPORT_ENDPOINT, &[0b0000_0101, 10, 0xFB, 1]),
        );
        let mut mouse = mouse_over(&api);

        assert!(mouse.poll());
        assert!(mouse.is_connected());
        assert!(mouse.button(0));
        assert!(!mouse.button(1));
        assert!(mouse.button(2));
        for n in 3..8 {
            assert!(!mouse.button(n));
        }
        assert_eq!(mouse.x(), 10);
        assert_eq!(mouse.y(), -5);
        assert_eq!(mouse.wheel(), 1);
    }

    #[test]
    fn test_poll_retries_through_timeouts() {
        let api = FakeUsb::new();
        api.add_device(
            FakeDevice::new(0x045e, 0x00cb)
                .transfer(REPORT_ENDPOINT, ScriptedTransfer::ReadTimeout(Vec::new()))
                .transfer(REPORT_ENDPOINT, ScriptedTransfer::ReadTimeout(Vec::new()))
                .read(REPORT_ENDPOINT, &[0b0000_0001, 0, 0, 0]),
        );
        let mut mouse = mouse_over(&api);

        // One poll call rides through both timeouts.
        assert!(mouse.poll());
        assert!(mouse.button(0));
    }

    #[test]
    fn test_hard_read_failure_drops_device() {
        let api = FakeUsb::new();
        api.add_device(
            FakeDevice::new(0x045e, 0x00cb)
                .transfer(REPORT_ENDPOINT, ScriptedTransfer::ReadError(LIBUSB_ERROR_NO_DEVICE)),
        );
        let mut mouse = mouse_over(&api);

        assert!(!mouse.poll());
        assert!(!mouse.is_connected());
        assert_eq!(api.close_count(0), 1);
    }

    #[test]
    fn test_reconnect_after_device_loss() {
        let api = FakeUsb::new();
        api.add_device(
            FakeDevice::new(0x045e, 0x00cb)
                .transfer(REPORT_ENDPOINT, ScriptedTransfer::ReadError(LIBUSB_ERROR_NO_DEVICE))
                .read(REPORT_ENDPOINT, &[0, 1, 1, 0]),
        );
        let mut mouse = mouse_over(&api);

        assert!(!mouse.poll());
        // The next poll runs the attach sequence again and reads.
        assert!(mouse.poll());
        assert_eq!(api.open_count(0), 2);
        assert_eq!(mouse.x(), 1);
    }

    #[test]
    fn test_read_timeout_is_configurable() {
        let api = FakeUsb::new();
        let mut mouse = mouse_over(&api);

        assert_eq!(mouse.read_timeout(), DEFAULT_READ_TIMEOUT);
        mouse.set_read_timeout(Duration::from_millis(250));
        assert_eq!(mouse.read_timeout(), Duration::from_millis(250));
    }
}
