//! Native library boundary
//!
//! Every call the crate makes into libusb goes through the [`UsbApi`]
//! trait. The trait mirrors the native function set one to one and
//! traffics in raw signed status codes; translating those codes into
//! [`UsbError`](crate::UsbError) values is the job of the layers above,
//! never of an implementation.
//!
//! Two implementations exist: [`libusb::LibusbApi`] over the real
//! library, and the scripted [`FakeUsb`](crate::test_utils::FakeUsb)
//! backend used by the test suites.

pub mod libusb;

use crate::descriptor::DeviceDescriptor;

/// Opaque reference to one attached device.
///
/// Naming a device does not permit I/O; it must be opened first. The
/// native reference count behind this value is managed by whoever
/// logically owns it (one [`UsbDevice`](crate::UsbDevice) owns exactly
/// one reference and releases it on drop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRef(pub(crate) usize);

/// Handle obtained by opening a [`DeviceRef`], required for all
/// configuration and transfer calls.
///
/// Deliberately neither `Clone` nor `Copy`: ops borrow it and
/// [`UsbApi::close`] consumes it, so a closed handle cannot be reused.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct OpenHandle(pub(crate) usize);

/// One snapshot of the attached-device list.
///
/// Owns the native list structure together with the per-device
/// references the listing call took. Must be handed back to
/// [`UsbApi::free_device_list`] exactly once; references moved out to a
/// new owner beforehand survive the free when `unref_devices` is false.
#[derive(Debug, Default)]
pub struct DeviceList {
    /// Native array pointer (zero for backends without one).
    pub(crate) raw: usize,
    pub(crate) devices: Vec<DeviceRef>,
}

impl DeviceList {
    /// Device references in enumeration order.
    pub fn devices(&self) -> &[DeviceRef] {
        &self.devices
    }
}

/// The set of native entry points the crate relies on.
///
/// Method contracts are libusb's own: zero or positive return values
/// mean success (a count or a byte total where noted), negative values
/// are status codes. `transferred` out-parameters are valid regardless
/// of the returned status, which is how partial progress under timeout
/// is observed.
///
/// Implementations must be safe to call from multiple threads at once;
/// serialization of operations on a single device is the caller's
/// responsibility, not the backend's.
pub trait UsbApi: Send + Sync {
    /// Set the native log verbosity for this context (0 silent .. 3
    /// verbose). Ignored by the native library when the `LIBUSB_DEBUG`
    /// environment variable is set.
    fn set_debug(&self, level: i32);

    /// Fill `out` with the current attached-device list. Returns the
    /// device count, or a negative status if the listing itself failed.
    /// Each listed device carries one native reference owned by `out`.
    fn device_list(&self, out: &mut DeviceList) -> i32;

    /// Release the native list structure. When `unref_devices` is true,
    /// also drop the per-device references the list still holds.
    fn free_device_list(&self, list: DeviceList, unref_devices: bool);

    /// Take an additional native reference on `dev`.
    fn ref_device(&self, dev: DeviceRef);

    /// Drop one native reference on `dev`. After the last reference the
    /// native library frees the device.
    fn unref_device(&self, dev: DeviceRef);

    /// Fetch the fixed-layout device descriptor into `out`.
    fn device_descriptor(&self, dev: DeviceRef, out: &mut DeviceDescriptor) -> i32;

    /// Bus the device is attached to.
    fn bus_number(&self, dev: DeviceRef) -> u8;

    /// Address of the device on its bus.
    fn device_address(&self, dev: DeviceRef) -> u8;

    /// Maximum isochronous packet size for `endpoint`, or a negative
    /// status.
    fn max_iso_packet_size(&self, dev: DeviceRef, endpoint: u8) -> i32;

    /// Open `dev` for I/O. On success stores the new handle in `out`.
    fn open(&self, dev: DeviceRef, out: &mut Option<OpenHandle>) -> i32;

    /// Close an open handle. Infallible, like the native call.
    fn close(&self, handle: OpenHandle);

    /// Read the active configuration value into `out` (0 means
    /// unconfigured).
    fn configuration(&self, handle: &OpenHandle, out: &mut i32) -> i32;

    /// Select a configuration by value; -1 puts the device in the
    /// unconfigured state.
    fn set_configuration(&self, handle: &OpenHandle, configuration: i32) -> i32;

    fn claim_interface(&self, handle: &OpenHandle, interface: i32) -> i32;

    fn release_interface(&self, handle: &OpenHandle, interface: i32) -> i32;

    fn set_interface_alt_setting(
        &self,
        handle: &OpenHandle,
        interface: i32,
        alt_setting: i32,
    ) -> i32;

    /// Clear a halt/stall condition on `endpoint`.
    fn clear_halt(&self, handle: &OpenHandle, endpoint: u8) -> i32;

    /// Issue a USB port reset. May cause re-enumeration, in which case
    /// the native library reports `LIBUSB_ERROR_NOT_FOUND` and the
    /// handle is dead.
    fn reset_device(&self, handle: &OpenHandle) -> i32;

    /// Returns 1 if a kernel driver is bound to `interface`, 0 if not,
    /// or a negative status.
    fn kernel_driver_active(&self, handle: &OpenHandle, interface: i32) -> i32;

    fn detach_kernel_driver(&self, handle: &OpenHandle, interface: i32) -> i32;

    fn attach_kernel_driver(&self, handle: &OpenHandle, interface: i32) -> i32;

    /// Fetch string descriptor `index` in the device's first language,
    /// converted to ASCII. Returns the byte length written into `buf`
    /// (terminator excluded) or a negative status.
    fn string_descriptor_ascii(&self, handle: &OpenHandle, index: u8, buf: &mut [u8]) -> i32;

    /// Control transfer, IN direction. Returns bytes received or a
    /// negative status.
    #[allow(clippy::too_many_arguments)]
    fn control_read(
        &self,
        handle: &OpenHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> i32;

    /// Control transfer, OUT direction. Returns bytes sent or a
    /// negative status.
    #[allow(clippy::too_many_arguments)]
    fn control_write(
        &self,
        handle: &OpenHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout_ms: u32,
    ) -> i32;

    /// Bulk transfer on an IN endpoint. `transferred` receives the byte
    /// count moved so far even when the status is negative.
    fn bulk_read(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        buf: &mut [u8],
        transferred: &mut usize,
        timeout_ms: u32,
    ) -> i32;

    /// Bulk transfer on an OUT endpoint. Same `transferred` contract as
    /// [`UsbApi::bulk_read`].
    fn bulk_write(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        data: &[u8],
        transferred: &mut usize,
        timeout_ms: u32,
    ) -> i32;

    /// Interrupt transfer on an IN endpoint. Same `transferred`
    /// contract as [`UsbApi::bulk_read`].
    fn interrupt_read(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        buf: &mut [u8],
        transferred: &mut usize,
        timeout_ms: u32,
    ) -> i32;

    /// Interrupt transfer on an OUT endpoint. Same `transferred`
    /// contract as [`UsbApi::bulk_read`].
    fn interrupt_write(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        data: &[u8],
        transferred: &mut usize,
        timeout_ms: u32,
    ) -> i32;
}
