//! Shared attach sequence for synchronous drivers

use std::time::Duration;

use session::{UsbDevice, UsbSystem, VendorProductMatcher};
use tracing::{debug, trace, warn};

/// Default per-attempt transfer timeout for polling drivers.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Find, open and claim the `occurrence`-th device matching a
/// vendor/product pair.
///
/// The sequence is enumerate, open, detach the kernel driver from
/// interface 0, claim interface 0. The detach step is best effort: a
/// failure there usually just means no kernel driver was bound, so it
/// is logged and ignored rather than propagated. This is a deliberate
/// choice and can mask a genuine permission problem; one will still
/// surface at claim or transfer time.
///
/// Returns `None` on any other failure, with nothing left open or
/// claimed (the half-attached device is dropped, which closes it and
/// releases its reference).
pub fn attach_device(
    system: &UsbSystem,
    vendor_id: u16,
    product_id: u16,
    occurrence: usize,
) -> Option<UsbDevice> {
    let selector = VendorProductMatcher::new(vendor_id, product_id, occurrence);
    let mut devices = match system.visit_devices(selector) {
        Ok(devices) => devices,
        Err(err) => {
            warn!("enumeration failed: {err}");
            return None;
        }
    };
    let mut device = devices.pop()?;

    if let Err(err) = device.open() {
        warn!("open failed: {err}");
        return None;
    }
    trace!("device opened");

    match device.detach_kernel_driver(0) {
        Ok(()) => trace!("kernel driver detached"),
        Err(err) => debug!("detach_kernel_driver failed: {err} (ignored)"),
    }

    if let Err(err) = device.claim_interface(0) {
        warn!("claim_interface failed: {err}");
        return None;
    }
    trace!("interface 0 claimed");

    Some(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libusb1_sys::constants::{LIBUSB_ERROR_ACCESS, LIBUSB_ERROR_BUSY};
    use session::test_utils::{FakeDevice, FakeUsb};

    #[test]
    fn test_attach_opens_detaches_and_claims() {
        let api = FakeUsb::new();
        api.add_device(
            FakeDevice::new(0x045e, 0x00cb)
                .driver_active(true)
                .detach_status(0),
        );
        let system = UsbSystem::from_api(api.clone());

        let device = attach_device(&system, 0x045e, 0x00cb, 0).unwrap();
        assert!(device.is_open());
        assert_eq!(api.open_count(0), 1);
        assert_eq!(api.claimed_interfaces(0), vec![0]);
    }

    #[test]
    fn test_attach_ignores_detach_failure() {
        // The default blueprint has no kernel driver bound, so detach
        // reports not-found; attach proceeds regardless.
        let api = FakeUsb::new();
        api.add_device(FakeDevice::new(0x045e, 0x00cb));
        let system = UsbSystem::from_api(api.clone());

        assert!(attach_device(&system, 0x045e, 0x00cb, 0).is_some());
        assert_eq!(api.claim_count(0), 1);
    }

    #[test]
    fn test_attach_absent_device_is_none() {
        let api = FakeUsb::new();
        let system = UsbSystem::from_api(api);

        assert!(attach_device(&system, 0x045e, 0x00cb, 0).is_none());
    }

    #[test]
    fn test_attach_open_failure_leaves_nothing_behind() {
        let api = FakeUsb::new();
        api.add_device(FakeDevice::new(0x045e, 0x00cb).open_status(LIBUSB_ERROR_ACCESS));
        let system = UsbSystem::from_api(api.clone());

        assert!(attach_device(&system, 0x045e, 0x00cb, 0).is_none());
        assert_eq!(api.live_refs(0), 0);
    }

    #[test]
    fn test_attach_claim_failure_closes_device() {
        let api = FakeUsb::new();
        api.add_device(FakeDevice::new(0x045e, 0x00cb).claim_status(LIBUSB_ERROR_BUSY));
        let system = UsbSystem::from_api(api.clone());

        assert!(attach_device(&system, 0x045e, 0x00cb, 0).is_none());
        assert_eq!(api.close_count(0), 1);
        assert_eq!(api.live_refs(0), 0);
    }
}
