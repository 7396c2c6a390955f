//! Device selection policies
//!
//! Enumeration hands the full attached-device list to a selector and
//! keeps only what it names; everything else is released before the
//! caller sees the result. Policies work from cached descriptor fields
//! only and never perform I/O.

use crate::device::UsbDevice;

/// Policy choosing which enumerated devices to keep.
pub trait DeviceSelector {
    /// Given the full list in enumeration order, return the indices of
    /// the devices to keep, in the order the caller should receive
    /// them. Out-of-range and duplicate indices are ignored.
    fn select(&mut self, devices: &[UsbDevice]) -> Vec<usize>;
}

/// Any closure of the right shape is a selector.
impl<F> DeviceSelector for F
where
    F: FnMut(&[UsbDevice]) -> Vec<usize>,
{
    fn select(&mut self, devices: &[UsbDevice]) -> Vec<usize> {
        self(devices)
    }
}

/// Pick the Nth device carrying a given vendor/product pair.
///
/// Scans in enumeration order counting matches on `(vendor_id,
/// product_id)` and selects the `occurrence`-th match, zero-based.
/// Selects nothing when fewer matches exist, so "the second mouse" is
/// simply `occurrence: 1` plus an empty result while only one is
/// plugged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorProductMatcher {
    vendor_id: u16,
    product_id: u16,
    occurrence: usize,
}

impl VendorProductMatcher {
    pub fn new(vendor_id: u16, product_id: u16, occurrence: usize) -> Self {
        Self {
            vendor_id,
            product_id,
            occurrence,
        }
    }
}

impl DeviceSelector for VendorProductMatcher {
    fn select(&mut self, devices: &[UsbDevice]) -> Vec<usize> {
        let mut seen = 0;
        for (i, device) in devices.iter().enumerate() {
            if device.vendor_id() == self.vendor_id && device.product_id() == self.product_id {
                if seen == self.occurrence {
                    return vec![i];
                }
                seen += 1;
            }
        }
        Vec::new()
    }
}
