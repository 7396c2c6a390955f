//! USB device sessions
//!
//! [`UsbDevice`] wraps one native device reference together with its
//! cached descriptor and, while open, the native handle. All
//! configuration and transfer operations live here, each translating
//! the raw status codes of its underlying native call into
//! [`UsbError`] values per its own documented failure set.
//!
//! Operations take `&mut self`, so the serialization the native layer
//! requires per device is enforced by the borrow checker instead of a
//! lock. Distinct devices may be driven from distinct threads.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use libusb1_sys::constants::*;
use tracing::{debug, trace};

use crate::api::{DeviceRef, OpenHandle, UsbApi};
use crate::descriptor::{DeviceDescriptor, DeviceSummary, Version};
use crate::error::{Result, UsbError};
use crate::request::Direction;

/// One attached USB device.
///
/// Owns its native device reference for the whole lifetime of the value
/// and the native open-handle between [`UsbDevice::open`] and
/// [`UsbDevice::close`]. Dropping the device closes the handle if one
/// is still present and releases the reference, so no exit path leaks a
/// native resource.
pub struct UsbDevice {
    /// Backend shared with the system handle this device came from.
    api: Arc<dyn UsbApi>,
    /// Owned native reference, released on drop.
    device: DeviceRef,
    /// Fetched once at construction, immutable afterwards.
    descriptor: DeviceDescriptor,
    /// Present only between a successful open and the next close.
    handle: Option<OpenHandle>,
}

impl UsbDevice {
    /// Wrap a native reference, fetching and caching its descriptor.
    ///
    /// On failure the caller keeps ownership of `device` and must
    /// release it; on success the new value owns it.
    pub(crate) fn new(api: Arc<dyn UsbApi>, device: DeviceRef) -> Result<Self> {
        let mut descriptor = DeviceDescriptor::default();
        let rc = api.device_descriptor(device, &mut descriptor);
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                LIBUSB_ERROR_ACCESS => UsbError::Access,
                code => UsbError::Other(code),
            });
        }

        Ok(Self {
            api,
            device,
            descriptor,
            handle: None,
        })
    }

    /// The descriptor cached at construction.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn vendor_id(&self) -> u16 {
        self.descriptor.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.descriptor.product_id
    }

    /// Bus the device is attached to.
    pub fn bus_number(&self) -> u8 {
        self.api.bus_number(self.device)
    }

    /// Address of the device on its bus.
    pub fn device_address(&self) -> u8 {
        self.api.device_address(self.device)
    }

    /// Maximum isochronous packet size for `endpoint`. Works on a
    /// closed device.
    pub fn max_iso_packet_size(&self, endpoint: u8) -> Result<usize> {
        let rc = self.api.max_iso_packet_size(self.device, endpoint);
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                code => UsbError::Other(code),
            });
        }
        Ok(rc as usize)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Open the device for configuration and transfers.
    ///
    /// Idempotent in the close-then-open sense: if the device is
    /// already open, the previous handle is closed first, so a repeated
    /// open never leaks a handle.
    ///
    /// Fails with [`UsbError::NoDevice`] if the device has been
    /// disconnected since enumeration and [`UsbError::Access`] on
    /// insufficient permissions.
    pub fn open(&mut self) -> Result<()> {
        self.close();

        let mut handle = None;
        let rc = self.api.open(self.device, &mut handle);
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_ACCESS => UsbError::Access,
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        self.handle = handle;

        debug!(
            "opened device {:03}:{:03}",
            self.bus_number(),
            self.device_address()
        );
        Ok(())
    }

    /// Close the open handle, if any. Closing a closed device is a
    /// no-op; this never fails.
    ///
    /// The native close implicitly releases interfaces still claimed
    /// through the handle.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.api.close(handle);
            debug!(
                "closed device {:03}:{:03}",
                self.bus_number(),
                self.device_address()
            );
        }
    }

    /// Claim logical ownership of interface `interface`.
    ///
    /// Claiming an interface this handle has already claimed succeeds
    /// silently. Fails with [`UsbError::NotFound`] if the interface
    /// does not exist and [`UsbError::Busy`] if another program or
    /// driver holds it.
    pub fn claim_interface(&mut self, interface: u8) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let rc = self.api.claim_interface(handle, i32::from(interface));
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                LIBUSB_ERROR_BUSY => UsbError::Busy,
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        debug!("claimed interface {interface}");
        Ok(())
    }

    /// Give up a previously claimed interface.
    pub fn release_interface(&mut self, interface: u8) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let rc = self.api.release_interface(handle, i32::from(interface));
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                LIBUSB_ERROR_BUSY => UsbError::Busy,
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        debug!("released interface {interface}");
        Ok(())
    }

    /// Currently active configuration value; 0 means unconfigured.
    pub fn configuration(&mut self) -> Result<i32> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let mut value = 0;
        let rc = self.api.configuration(handle, &mut value);
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        Ok(value)
    }

    /// Select the configuration with the given value; -1 puts the
    /// device in the unconfigured state. Blocking.
    ///
    /// Fails with [`UsbError::Busy`] while interfaces are still
    /// claimed.
    pub fn set_configuration(&mut self, configuration: i32) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let rc = self.api.set_configuration(handle, configuration);
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                LIBUSB_ERROR_BUSY => UsbError::Busy,
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        debug!("configuration set to {configuration}");
        Ok(())
    }

    /// Activate an alternate setting on a claimed interface. Blocking.
    pub fn set_interface_alt_setting(&mut self, interface: u8, alt_setting: u8) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let rc = self.api.set_interface_alt_setting(
            handle,
            i32::from(interface),
            i32::from(alt_setting),
        );
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        Ok(())
    }

    /// Clear a halt/stall condition on `endpoint`. Blocking.
    pub fn clear_halt(&mut self, endpoint: u8) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let rc = self.api.clear_halt(handle, endpoint);
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        Ok(())
    }

    /// Issue a USB port reset. Blocking, and slow.
    ///
    /// [`UsbError::NotFound`] here means the reset caused the device to
    /// re-enumerate: the handle is permanently invalid and the caller
    /// must close this device and rediscover it, not retry.
    pub fn reset_device(&mut self) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let rc = self.api.reset_device(handle);
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                code => UsbError::Other(code),
            });
        }
        debug!(
            "reset device {:03}:{:03}",
            self.bus_number(),
            self.device_address()
        );
        Ok(())
    }

    /// Whether a kernel driver is bound to `interface`.
    pub fn kernel_driver_active(&mut self, interface: u8) -> Result<bool> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        match self.api.kernel_driver_active(handle, i32::from(interface)) {
            0 => Ok(false),
            1 => Ok(true),
            LIBUSB_ERROR_NO_DEVICE => Err(UsbError::NoDevice),
            code => Err(UsbError::Other(code)),
        }
    }

    /// Unbind the kernel driver from `interface` so this process can
    /// claim it.
    ///
    /// Fails with [`UsbError::NotFound`] when no driver is bound.
    pub fn detach_kernel_driver(&mut self, interface: u8) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let rc = self.api.detach_kernel_driver(handle, i32::from(interface));
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_INVALID_PARAM => UsbError::InvalidParam,
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        debug!("detached kernel driver from interface {interface}");
        Ok(())
    }

    /// Re-bind the kernel driver to `interface`.
    ///
    /// Fails with [`UsbError::Busy`] while the interface is claimed.
    pub fn attach_kernel_driver(&mut self, interface: u8) -> Result<()> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        let rc = self.api.attach_kernel_driver(handle, i32::from(interface));
        if rc < 0 {
            return Err(match rc {
                LIBUSB_ERROR_INVALID_PARAM => UsbError::InvalidParam,
                LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
                LIBUSB_ERROR_BUSY => UsbError::Busy,
                LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
                code => UsbError::Other(code),
            });
        }
        debug!("reattached kernel driver to interface {interface}");
        Ok(())
    }

    /// Control transfer, IN direction: bit 7 of `request_type` must be
    /// set. Returns the bytes actually received, which may be fewer
    /// than `buf.len()`.
    ///
    /// A zero `timeout` waits indefinitely.
    pub fn control_read(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        if Direction::of_endpoint(request_type) != Direction::In || buf.len() > usize::from(u16::MAX)
        {
            return Err(UsbError::InvalidParam);
        }

        let rc = self
            .api
            .control_read(handle, request_type, request, value, index, buf, timeout_ms(timeout));
        trace!("control read rc={rc} request={request:#04x} value={value:#06x}");
        if rc < 0 {
            return Err(map_control_status(rc));
        }
        Ok(rc as usize)
    }

    /// Control transfer, OUT direction: bit 7 of `request_type` must be
    /// clear.
    ///
    /// The whole of `data` must go through: a success status that moved
    /// fewer bytes fails with [`UsbError::ShortTransfer`]. A zero
    /// `timeout` waits indefinitely.
    pub fn control_write(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        if Direction::of_endpoint(request_type) != Direction::Out
            || data.len() > usize::from(u16::MAX)
        {
            return Err(UsbError::InvalidParam);
        }

        let rc = self
            .api
            .control_write(handle, request_type, request, value, index, data, timeout_ms(timeout));
        trace!("control write rc={rc} request={request:#04x} value={value:#06x}");
        if rc < 0 {
            return Err(map_control_status(rc));
        }
        let transferred = rc as usize;
        if transferred != data.len() {
            return Err(UsbError::ShortTransfer {
                transferred,
                requested: data.len(),
            });
        }
        Ok(transferred)
    }

    /// Bulk transfer on an IN endpoint (`endpoint` must have bit 7
    /// set). Returns the bytes actually received; no exact-length match
    /// is required.
    ///
    /// On timeout the error carries the bytes that did arrive before
    /// the deadline. A zero `timeout` waits indefinitely.
    pub fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        if Direction::of_endpoint(endpoint) != Direction::In {
            return Err(UsbError::InvalidParam);
        }

        let mut transferred = 0;
        let rc = self
            .api
            .bulk_read(handle, endpoint, buf, &mut transferred, timeout_ms(timeout));
        trace!("bulk read rc={rc} endpoint={endpoint:#04x} transferred={transferred}");
        if rc < 0 {
            return Err(map_read_status(rc, transferred));
        }
        Ok(transferred)
    }

    /// Bulk transfer on an OUT endpoint (`endpoint` must have bit 7
    /// clear).
    ///
    /// Both failure conditions are checked: a negative status is
    /// reported even if some bytes had already moved (a timeout carries
    /// that count), and a success status that moved fewer bytes than
    /// requested fails with [`UsbError::ShortTransfer`]. A zero
    /// `timeout` waits indefinitely.
    pub fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        if Direction::of_endpoint(endpoint) != Direction::Out {
            return Err(UsbError::InvalidParam);
        }

        let mut transferred = 0;
        let rc = self
            .api
            .bulk_write(handle, endpoint, data, &mut transferred, timeout_ms(timeout));
        trace!("bulk write rc={rc} endpoint={endpoint:#04x} transferred={transferred}");
        if rc < 0 {
            return Err(map_write_status(rc, transferred));
        }
        if transferred != data.len() {
            return Err(UsbError::ShortTransfer {
                transferred,
                requested: data.len(),
            });
        }
        Ok(transferred)
    }

    /// Interrupt transfer on an IN endpoint. Same contract as
    /// [`UsbDevice::bulk_read`].
    pub fn interrupt_read(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        if Direction::of_endpoint(endpoint) != Direction::In {
            return Err(UsbError::InvalidParam);
        }

        let mut transferred = 0;
        let rc = self
            .api
            .interrupt_read(handle, endpoint, buf, &mut transferred, timeout_ms(timeout));
        trace!("interrupt read rc={rc} endpoint={endpoint:#04x} transferred={transferred}");
        if rc < 0 {
            return Err(map_read_status(rc, transferred));
        }
        Ok(transferred)
    }

    /// Interrupt transfer on an OUT endpoint. Same contract as
    /// [`UsbDevice::bulk_write`].
    pub fn interrupt_write(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        if Direction::of_endpoint(endpoint) != Direction::Out {
            return Err(UsbError::InvalidParam);
        }

        let mut transferred = 0;
        let rc = self
            .api
            .interrupt_write(handle, endpoint, data, &mut transferred, timeout_ms(timeout));
        trace!("interrupt write rc={rc} endpoint={endpoint:#04x} transferred={transferred}");
        if rc < 0 {
            return Err(map_write_status(rc, transferred));
        }
        if transferred != data.len() {
            return Err(UsbError::ShortTransfer {
                transferred,
                requested: data.len(),
            });
        }
        Ok(transferred)
    }

    /// Read string descriptor `index` in the device's first supported
    /// language.
    ///
    /// Returns `Ok(None)` when `index` is zero or the device does not
    /// provide the string; the device must be open.
    pub fn string_descriptor(&mut self, index: u8) -> Result<Option<String>> {
        let handle = self.handle.as_ref().ok_or(UsbError::InvalidParam)?;
        if index == 0 {
            return Ok(None);
        }

        // String descriptors cap at 255 bytes.
        let mut buf = [0u8; 256];
        let rc = self.api.string_descriptor_ascii(handle, index, &mut buf);
        if rc <= 0 {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&buf[..rc as usize]).into_owned(),
        ))
    }

    /// Manufacturer string, when the device provides one.
    pub fn manufacturer(&mut self) -> Result<Option<String>> {
        let index = self.descriptor.manufacturer_index;
        self.string_descriptor(index)
    }

    /// Product string, when the device provides one.
    pub fn product(&mut self) -> Result<Option<String>> {
        let index = self.descriptor.product_index;
        self.string_descriptor(index)
    }

    /// Serial number string, when the device provides one.
    pub fn serial_number(&mut self) -> Result<Option<String>> {
        let index = self.descriptor.serial_number_index;
        self.string_descriptor(index)
    }

    /// Snapshot for listings and logs. String fields are filled only
    /// when the device is open and provides them.
    pub fn summary(&mut self) -> DeviceSummary {
        let manufacturer = self.manufacturer().ok().flatten();
        let product = self.product().ok().flatten();
        let serial_number = self.serial_number().ok().flatten();

        DeviceSummary {
            bus: self.bus_number(),
            address: self.device_address(),
            vendor_id: self.descriptor.vendor_id,
            product_id: self.descriptor.product_id,
            class_code: self.descriptor.class_code,
            usb_version: Version::from_bcd(self.descriptor.usb_version).to_string(),
            device_version: Version::from_bcd(self.descriptor.device_version).to_string(),
            max_packet_size_0: self.descriptor.max_packet_size_0,
            manufacturer,
            product,
            serial_number,
        }
    }
}

impl Drop for UsbDevice {
    fn drop(&mut self) {
        self.close();
        self.api.unref_device(self.device);
    }
}

impl fmt::Debug for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbDevice")
            .field("bus", &self.bus_number())
            .field("address", &self.device_address())
            .field("vendor_id", &format_args!("{:04x}", self.descriptor.vendor_id))
            .field("product_id", &format_args!("{:04x}", self.descriptor.product_id))
            .field("open", &self.is_open())
            .finish()
    }
}

/// A zero duration maps to the native "wait indefinitely" timeout.
/// Any other duration stays bounded: sub-millisecond values round up
/// to 1 ms and anything past the native range saturates at `u32::MAX`,
/// so a caller asking for a bounded wait never gets an unbounded one.
fn timeout_ms(timeout: Duration) -> u32 {
    if timeout.is_zero() {
        return 0;
    }
    let ms = timeout.as_nanos().div_ceil(1_000_000);
    u32::try_from(ms).unwrap_or(u32::MAX)
}

fn map_control_status(code: i32) -> UsbError {
    match code {
        LIBUSB_ERROR_TIMEOUT => UsbError::Timeout { transferred: 0 },
        LIBUSB_ERROR_PIPE => UsbError::Pipe,
        LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
        code => UsbError::Other(code),
    }
}

fn map_read_status(code: i32, transferred: usize) -> UsbError {
    match code {
        LIBUSB_ERROR_TIMEOUT => UsbError::Timeout { transferred },
        LIBUSB_ERROR_PIPE => UsbError::Pipe,
        LIBUSB_ERROR_OVERFLOW => UsbError::Overflow,
        LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
        code => UsbError::Other(code),
    }
}

fn map_write_status(code: i32, transferred: usize) -> UsbError {
    match code {
        LIBUSB_ERROR_TIMEOUT => UsbError::Timeout { transferred },
        LIBUSB_ERROR_PIPE => UsbError::Pipe,
        LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
        code => UsbError::Other(code),
    }
}
