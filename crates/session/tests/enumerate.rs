//! Enumeration scenarios over the scripted backend
//!
//! Run with: `cargo test -p session --test enumerate`

use libusb1_sys::constants::LIBUSB_ERROR_ACCESS;
use session::test_utils::{FakeDevice, FakeUsb};
use session::{UsbDevice, UsbError, UsbSystem, VendorProductMatcher};

#[test]
fn test_end_to_end_vendor_product_match() {
    let api = FakeUsb::new();
    api.add_device(FakeDevice::new(0x046d, 0xc077));
    api.add_device(FakeDevice::new(0x1d6b, 0x0002));
    api.add_device(FakeDevice::new(0x10cf, 0x5500));
    let system = UsbSystem::from_api(api.clone());

    let devices = system
        .visit_devices(VendorProductMatcher::new(0x10cf, 0x5500, 0))
        .unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].vendor_id(), 0x10cf);
    assert_eq!(devices[0].product_id(), 0x5500);

    // The two unselected devices were released during the pass; the
    // match keeps its reference until the caller drops it.
    assert_eq!(api.unref_count(0), 1);
    assert_eq!(api.unref_count(1), 1);
    assert_eq!(api.unref_count(2), 0);
    assert_eq!(api.free_list_calls(), 1);

    drop(devices);
    assert_eq!(api.unref_count(2), 1);
    assert_eq!(api.live_refs(2), 0);
}

#[test]
fn test_occurrence_index_selects_nth_match() {
    let api = FakeUsb::new();
    api.add_device(FakeDevice::new(0x10cf, 0x5500).address(1));
    api.add_device(FakeDevice::new(0x1d6b, 0x0002).address(2));
    api.add_device(FakeDevice::new(0x10cf, 0x5500).address(3));
    let system = UsbSystem::from_api(api.clone());

    let devices = system
        .visit_devices(VendorProductMatcher::new(0x10cf, 0x5500, 1))
        .unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_address(), 3);
    assert_eq!(api.unref_count(0), 1);
    assert_eq!(api.unref_count(2), 0);
}

#[test]
fn test_fewer_matches_than_occurrence_is_empty() {
    let api = FakeUsb::new();
    api.add_device(FakeDevice::new(0x10cf, 0x5500));
    let system = UsbSystem::from_api(api.clone());

    let devices = system
        .visit_devices(VendorProductMatcher::new(0x10cf, 0x5500, 1))
        .unwrap();

    assert!(devices.is_empty());
    // Nothing was kept, so every listed device was released.
    assert_eq!(api.unref_count(0), 1);
    assert_eq!(api.live_refs(0), 0);
    assert_eq!(api.free_list_calls(), 1);
}

#[test]
fn test_no_match_releases_everything() {
    let api = FakeUsb::new();
    api.add_device(FakeDevice::new(0x1111, 0x0001));
    api.add_device(FakeDevice::new(0x2222, 0x0002));
    let system = UsbSystem::from_api(api.clone());

    let devices = system
        .visit_devices(VendorProductMatcher::new(0x10cf, 0x5500, 0))
        .unwrap();

    assert!(devices.is_empty());
    assert_eq!(api.unref_count(0), 1);
    assert_eq!(api.unref_count(1), 1);
}

#[test]
fn test_descriptor_failure_propagates_without_leaks() {
    let api = FakeUsb::new();
    api.add_device(FakeDevice::new(0x1111, 0x0001));
    api.add_device(FakeDevice::new(0x2222, 0x0002).descriptor_status(LIBUSB_ERROR_ACCESS));
    api.add_device(FakeDevice::new(0x3333, 0x0003));
    let system = UsbSystem::from_api(api.clone());

    let result = system.visit_devices(|devices: &[UsbDevice]| (0..devices.len()).collect());
    assert_eq!(result.unwrap_err(), UsbError::Access);

    // The aborted pass released every reference the listing took,
    // wrapped or not, and freed the list exactly once.
    for index in 0..3 {
        assert_eq!(api.live_refs(index), 0, "device {index} leaked");
    }
    assert_eq!(api.free_list_calls(), 1);
}

#[test]
fn test_closure_selector_keeps_subset() {
    let api = FakeUsb::new();
    api.add_device(FakeDevice::new(0x1111, 0x0001).class_code(0x03));
    api.add_device(FakeDevice::new(0x2222, 0x0002).class_code(0x09));
    api.add_device(FakeDevice::new(0x3333, 0x0003).class_code(0x03));
    let system = UsbSystem::from_api(api.clone());

    // Keep every HID-class device, in list order.
    let devices = system
        .visit_devices(|devices: &[UsbDevice]| {
            devices
                .iter()
                .enumerate()
                .filter(|(_, d)| d.descriptor().class_code == 0x03)
                .map(|(i, _)| i)
                .collect()
        })
        .unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].vendor_id(), 0x1111);
    assert_eq!(devices[1].vendor_id(), 0x3333);
    assert_eq!(api.unref_count(1), 1);
}

#[test]
fn test_devices_outlive_repeated_enumerations() {
    let api = FakeUsb::new();
    api.add_device(FakeDevice::new(0x10cf, 0x5500));
    let system = UsbSystem::from_api(api.clone());

    let first = system
        .visit_devices(VendorProductMatcher::new(0x10cf, 0x5500, 0))
        .unwrap();
    let second = system
        .visit_devices(VendorProductMatcher::new(0x10cf, 0x5500, 0))
        .unwrap();

    // Each pass took and kept its own reference.
    assert_eq!(api.live_refs(0), 2);
    drop(first);
    assert_eq!(api.live_refs(0), 1);
    drop(second);
    assert_eq!(api.live_refs(0), 0);
    assert_eq!(api.free_list_calls(), 2);
}
