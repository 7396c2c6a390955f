//! Real backend over `libusb1-sys`
//!
//! A thin shim: every method forwards to the corresponding native call
//! and hands the raw status back unchanged. The only logic here is
//! pointer plumbing and the context lifecycle (`libusb_init` on
//! construction, `libusb_exit` on drop).

use std::ffi::c_int;
use std::mem::MaybeUninit;
use std::ptr;

use libusb1_sys as ffi;

use super::{DeviceList, DeviceRef, OpenHandle, UsbApi};
use crate::descriptor::DeviceDescriptor;
use crate::error::{Result, UsbError};

/// Backend over the system (or vendored) libusb.
///
/// Shared behind an `Arc` by the system handle and every device derived
/// from it, so `libusb_exit` runs exactly once, after the last of them
/// is gone.
#[derive(Debug)]
pub struct LibusbApi {
    context: *mut ffi::libusb_context,
}

// libusb documents its API as fully thread-safe: any function may be
// called on any thread against the same context.
unsafe impl Send for LibusbApi {}
unsafe impl Sync for LibusbApi {}

impl LibusbApi {
    /// Initialize a fresh native context.
    pub fn new() -> Result<Self> {
        let mut context = ptr::null_mut();
        let rc = unsafe { ffi::libusb_init(&mut context) };
        if rc < 0 {
            return Err(UsbError::from_status(rc));
        }
        Ok(Self { context })
    }
}

impl Drop for LibusbApi {
    fn drop(&mut self) {
        unsafe { ffi::libusb_exit(self.context) };
    }
}

fn dev_ptr(dev: DeviceRef) -> *mut ffi::libusb_device {
    dev.0 as *mut ffi::libusb_device
}

fn handle_ptr(handle: &OpenHandle) -> *mut ffi::libusb_device_handle {
    handle.0 as *mut ffi::libusb_device_handle
}

fn convert_descriptor(raw: &ffi::libusb_device_descriptor) -> DeviceDescriptor {
    DeviceDescriptor {
        length: raw.bLength,
        descriptor_type: raw.bDescriptorType,
        usb_version: raw.bcdUSB,
        class_code: raw.bDeviceClass,
        sub_class_code: raw.bDeviceSubClass,
        protocol_code: raw.bDeviceProtocol,
        max_packet_size_0: raw.bMaxPacketSize0,
        vendor_id: raw.idVendor,
        product_id: raw.idProduct,
        device_version: raw.bcdDevice,
        manufacturer_index: raw.iManufacturer,
        product_index: raw.iProduct,
        serial_number_index: raw.iSerialNumber,
        num_configurations: raw.bNumConfigurations,
    }
}

impl UsbApi for LibusbApi {
    fn set_debug(&self, level: i32) {
        unsafe { ffi::libusb_set_debug(self.context, level) };
    }

    fn device_list(&self, out: &mut DeviceList) -> i32 {
        let mut list: *const *mut ffi::libusb_device = ptr::null();
        let n = unsafe { ffi::libusb_get_device_list(self.context, &mut list) };
        if n < 0 {
            return n as i32;
        }
        out.raw = list as usize;
        out.devices = (0..n as isize)
            .map(|i| DeviceRef(unsafe { *list.offset(i) } as usize))
            .collect();
        n as i32
    }

    fn free_device_list(&self, list: DeviceList, unref_devices: bool) {
        if list.raw == 0 {
            return;
        }
        unsafe {
            ffi::libusb_free_device_list(
                list.raw as *const *mut ffi::libusb_device,
                i32::from(unref_devices),
            )
        };
    }

    fn ref_device(&self, dev: DeviceRef) {
        unsafe { ffi::libusb_ref_device(dev_ptr(dev)) };
    }

    fn unref_device(&self, dev: DeviceRef) {
        unsafe { ffi::libusb_unref_device(dev_ptr(dev)) };
    }

    fn device_descriptor(&self, dev: DeviceRef, out: &mut DeviceDescriptor) -> i32 {
        let mut raw = MaybeUninit::<ffi::libusb_device_descriptor>::uninit();
        let rc = unsafe { ffi::libusb_get_device_descriptor(dev_ptr(dev), raw.as_mut_ptr()) };
        if rc == 0 {
            let raw = unsafe { raw.assume_init() };
            *out = convert_descriptor(&raw);
        }
        rc
    }

    fn bus_number(&self, dev: DeviceRef) -> u8 {
        unsafe { ffi::libusb_get_bus_number(dev_ptr(dev)) }
    }

    fn device_address(&self, dev: DeviceRef) -> u8 {
        unsafe { ffi::libusb_get_device_address(dev_ptr(dev)) }
    }

    fn max_iso_packet_size(&self, dev: DeviceRef, endpoint: u8) -> i32 {
        unsafe { ffi::libusb_get_max_iso_packet_size(dev_ptr(dev), endpoint) }
    }

    fn open(&self, dev: DeviceRef, out: &mut Option<OpenHandle>) -> i32 {
        let mut handle = ptr::null_mut();
        let rc = unsafe { ffi::libusb_open(dev_ptr(dev), &mut handle) };
        if rc == 0 && !handle.is_null() {
            *out = Some(OpenHandle(handle as usize));
        }
        rc
    }

    fn close(&self, handle: OpenHandle) {
        unsafe { ffi::libusb_close(handle_ptr(&handle)) };
    }

    fn configuration(&self, handle: &OpenHandle, out: &mut i32) -> i32 {
        unsafe { ffi::libusb_get_configuration(handle_ptr(handle), out) }
    }

    fn set_configuration(&self, handle: &OpenHandle, configuration: i32) -> i32 {
        unsafe { ffi::libusb_set_configuration(handle_ptr(handle), configuration) }
    }

    fn claim_interface(&self, handle: &OpenHandle, interface: i32) -> i32 {
        unsafe { ffi::libusb_claim_interface(handle_ptr(handle), interface) }
    }

    fn release_interface(&self, handle: &OpenHandle, interface: i32) -> i32 {
        unsafe { ffi::libusb_release_interface(handle_ptr(handle), interface) }
    }

    fn set_interface_alt_setting(
        &self,
        handle: &OpenHandle,
        interface: i32,
        alt_setting: i32,
    ) -> i32 {
        unsafe { ffi::libusb_set_interface_alt_setting(handle_ptr(handle), interface, alt_setting) }
    }

    fn clear_halt(&self, handle: &OpenHandle, endpoint: u8) -> i32 {
        unsafe { ffi::libusb_clear_halt(handle_ptr(handle), endpoint) }
    }

    fn reset_device(&self, handle: &OpenHandle) -> i32 {
        unsafe { ffi::libusb_reset_device(handle_ptr(handle)) }
    }

    fn kernel_driver_active(&self, handle: &OpenHandle, interface: i32) -> i32 {
        unsafe { ffi::libusb_kernel_driver_active(handle_ptr(handle), interface) }
    }

    fn detach_kernel_driver(&self, handle: &OpenHandle, interface: i32) -> i32 {
        unsafe { ffi::libusb_detach_kernel_driver(handle_ptr(handle), interface) }
    }

    fn attach_kernel_driver(&self, handle: &OpenHandle, interface: i32) -> i32 {
        unsafe { ffi::libusb_attach_kernel_driver(handle_ptr(handle), interface) }
    }

    fn string_descriptor_ascii(&self, handle: &OpenHandle, index: u8, buf: &mut [u8]) -> i32 {
        unsafe {
            ffi::libusb_get_string_descriptor_ascii(
                handle_ptr(handle),
                index,
                buf.as_mut_ptr(),
                buf.len() as c_int,
            )
        }
    }

    fn control_read(
        &self,
        handle: &OpenHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> i32 {
        unsafe {
            ffi::libusb_control_transfer(
                handle_ptr(handle),
                request_type,
                request,
                value,
                index,
                buf.as_mut_ptr(),
                buf.len() as u16,
                timeout_ms,
            )
        }
    }

    fn control_write(
        &self,
        handle: &OpenHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout_ms: u32,
    ) -> i32 {
        unsafe {
            ffi::libusb_control_transfer(
                handle_ptr(handle),
                request_type,
                request,
                value,
                index,
                // OUT direction: the native library only reads from the buffer.
                data.as_ptr() as *mut u8,
                data.len() as u16,
                timeout_ms,
            )
        }
    }

    fn bulk_read(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        buf: &mut [u8],
        transferred: &mut usize,
        timeout_ms: u32,
    ) -> i32 {
        let mut moved: c_int = 0;
        let rc = unsafe {
            ffi::libusb_bulk_transfer(
                handle_ptr(handle),
                endpoint,
                buf.as_mut_ptr(),
                buf.len() as c_int,
                &mut moved,
                timeout_ms,
            )
        };
        *transferred = moved.max(0) as usize;
        rc
    }

    fn bulk_write(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        data: &[u8],
        transferred: &mut usize,
        timeout_ms: u32,
    ) -> i32 {
        let mut moved: c_int = 0;
        let rc = unsafe {
            ffi::libusb_bulk_transfer(
                handle_ptr(handle),
                endpoint,
                data.as_ptr() as *mut u8,
                data.len() as c_int,
                &mut moved,
                timeout_ms,
            )
        };
        *transferred = moved.max(0) as usize;
        rc
    }

    fn interrupt_read(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        buf: &mut [u8],
        transferred: &mut usize,
        timeout_ms: u32,
    ) -> i32 {
        let mut moved: c_int = 0;
        let rc = unsafe {
            ffi::libusb_interrupt_transfer(
                handle_ptr(handle),
                endpoint,
                buf.as_mut_ptr(),
                buf.len() as c_int,
                &mut moved,
                timeout_ms,
            )
        };
        *transferred = moved.max(0) as usize;
        rc
    }

    fn interrupt_write(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        data: &[u8],
        transferred: &mut usize,
        timeout_ms: u32,
    ) -> i32 {
        let mut moved: c_int = 0;
        let rc = unsafe {
            ffi::libusb_interrupt_transfer(
                handle_ptr(handle),
                endpoint,
                data.as_ptr() as *mut u8,
                data.len() as c_int,
                &mut moved,
                timeout_ms,
            )
        };
        *transferred = moved.max(0) as usize;
        rc
    }
}
