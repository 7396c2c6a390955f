//! Context ownership and enumeration
//!
//! [`UsbSystem`] owns the native library context and runs the
//! enumerate-select-release cycle. The context lives behind an `Arc`
//! shared with every device produced here, so native teardown happens
//! exactly once, after the system handle and all of its devices are
//! gone, and never while a transfer could still reach the context.

use std::sync::Arc;

use libusb1_sys::constants::*;
use tracing::{debug, warn};

use crate::api::libusb::LibusbApi;
use crate::api::{DeviceList, UsbApi};
use crate::device::UsbDevice;
use crate::error::{Result, UsbError};
use crate::selector::DeviceSelector;

/// Native log verbosity, applied at context creation.
///
/// The `LIBUSB_DEBUG` environment variable takes precedence over this
/// setting and disables further changes; that override happens inside
/// the native library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DebugLevel {
    #[default]
    Silent,
    Errors,
    Warnings,
    Verbose,
}

impl DebugLevel {
    fn as_native(self) -> i32 {
        match self {
            DebugLevel::Silent => 0,
            DebugLevel::Errors => 1,
            DebugLevel::Warnings => 2,
            DebugLevel::Verbose => 3,
        }
    }
}

/// Handle to one native library context.
///
/// Cheap to clone; clones share the same context. The context is torn
/// down when the last clone and the last [`UsbDevice`] derived from it
/// have been dropped.
#[derive(Clone)]
pub struct UsbSystem {
    api: Arc<dyn UsbApi>,
}

impl UsbSystem {
    /// Initialize a native context with silent logging.
    pub fn new() -> Result<Self> {
        Self::with_debug(DebugLevel::Silent)
    }

    /// Initialize a native context at the given log verbosity.
    pub fn with_debug(level: DebugLevel) -> Result<Self> {
        let api = LibusbApi::new()?;
        api.set_debug(level.as_native());
        Ok(Self {
            api: Arc::new(api),
        })
    }

    /// Build a system over an injected backend.
    ///
    /// This is the seam the test suites use to run the full
    /// enumeration and transfer machinery against a scripted fake.
    pub fn from_api(api: Arc<dyn UsbApi>) -> Self {
        Self { api }
    }

    /// Enumerate attached devices and keep the subset the selector
    /// names, in the selector's order.
    ///
    /// Every listed device is wrapped (fetching and caching its
    /// descriptor); the full list is then handed to `selector`.
    /// Unselected devices have their native references released before
    /// this returns, and the native list structure is freed exactly
    /// once on every path. Zero attached devices is an empty result,
    /// not an error.
    ///
    /// A descriptor fetch failure aborts the pass and propagates after
    /// releasing everything the pass had acquired.
    ///
    /// # Panics
    ///
    /// Panics when the native library reports memory exhaustion for the
    /// listing call itself; that condition is not recoverable at this
    /// level.
    pub fn visit_devices<S: DeviceSelector>(&self, mut selector: S) -> Result<Vec<UsbDevice>> {
        let mut list = DeviceList::default();
        let rc = self.api.device_list(&mut list);
        if rc < 0 {
            if rc == LIBUSB_ERROR_NO_MEM {
                panic!("out of memory listing USB devices");
            }
            return Err(UsbError::Other(rc));
        }

        // Wrap every reference; each wrapped device owns the reference
        // the listing took for it. On a wrap failure the wrapped
        // devices drop and the unwrapped tail is released by hand, so
        // the failure path leaks nothing.
        let refs = list.devices().to_vec();
        let mut devices = Vec::with_capacity(refs.len());
        for (i, &dev) in refs.iter().enumerate() {
            match UsbDevice::new(Arc::clone(&self.api), dev) {
                Ok(device) => devices.push(device),
                Err(err) => {
                    warn!("descriptor fetch failed during enumeration: {err}");
                    for &rest in &refs[i..] {
                        self.api.unref_device(rest);
                    }
                    drop(devices);
                    self.api.free_device_list(list, false);
                    return Err(err);
                }
            }
        }

        let chosen = selector.select(&devices);
        debug!(
            "enumerated {} devices, selector kept {}",
            devices.len(),
            chosen.len()
        );

        // Move the chosen devices out in the selector's order; whatever
        // stays behind drops here, releasing its reference.
        let mut slots: Vec<Option<UsbDevice>> = devices.into_iter().map(Some).collect();
        let mut result = Vec::with_capacity(chosen.len());
        for index in chosen {
            if let Some(slot) = slots.get_mut(index)
                && let Some(device) = slot.take()
            {
                result.push(device);
            }
        }
        drop(slots);

        self.api.free_device_list(list, false);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeDevice, FakeUsb};

    #[test]
    fn test_visit_devices_empty_list() {
        let api = FakeUsb::new();
        let system = UsbSystem::from_api(api.clone());

        let devices = system
            .visit_devices(|devices: &[UsbDevice]| (0..devices.len()).collect())
            .unwrap();
        assert!(devices.is_empty());
        assert_eq!(api.free_list_calls(), 1);
    }

    #[test]
    fn test_visit_devices_keeps_selector_order() {
        let api = FakeUsb::new();
        api.add_device(FakeDevice::new(0x1111, 0x0001));
        api.add_device(FakeDevice::new(0x2222, 0x0002));
        api.add_device(FakeDevice::new(0x3333, 0x0003));
        let system = UsbSystem::from_api(api.clone());

        let devices = system
            .visit_devices(|_: &[UsbDevice]| vec![2, 0])
            .unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].vendor_id(), 0x3333);
        assert_eq!(devices[1].vendor_id(), 0x1111);
        // The device the selector skipped was released during the pass.
        assert_eq!(api.unref_count(1), 1);
        assert_eq!(api.unref_count(0), 0);
        assert_eq!(api.unref_count(2), 0);
    }

    #[test]
    fn test_visit_devices_ignores_bogus_indices() {
        let api = FakeUsb::new();
        api.add_device(FakeDevice::new(0x1111, 0x0001));
        let system = UsbSystem::from_api(api.clone());

        let devices = system
            .visit_devices(|_: &[UsbDevice]| vec![0, 0, 17])
            .unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[test]
    #[should_panic(expected = "out of memory listing USB devices")]
    fn test_visit_devices_no_mem_is_fatal() {
        let api = FakeUsb::new();
        api.fail_device_list(LIBUSB_ERROR_NO_MEM);
        let system = UsbSystem::from_api(api);

        let _ = system.visit_devices(|_: &[UsbDevice]| Vec::new());
    }

    #[test]
    fn test_debug_level_values() {
        assert_eq!(DebugLevel::Silent.as_native(), 0);
        assert_eq!(DebugLevel::Errors.as_native(), 1);
        assert_eq!(DebugLevel::Warnings.as_native(), 2);
        assert_eq!(DebugLevel::Verbose.as_native(), 3);
    }
}
