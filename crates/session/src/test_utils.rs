//! Test utilities for the session layer
//!
//! A scripted in-memory backend implementing [`UsbApi`], so the
//! enumeration, lifecycle and transfer machinery can be exercised
//! without hardware. The fake counts every native call (references
//! released, handles opened and closed, interfaces claimed, lists
//! freed) and panics loudly on misuse such as an unscripted transfer
//! or a reference count dropping below zero.
//!
//! # Example
//!
//! ```
//! use session::test_utils::{FakeDevice, FakeUsb};
//! use session::{UsbSystem, VendorProductMatcher};
//!
//! let api = FakeUsb::new();
//! api.add_device(FakeDevice::new(0x10cf, 0x5500));
//! let system = UsbSystem::from_api(api.clone());
//!
//! let devices = system
//!     .visit_devices(VendorProductMatcher::new(0x10cf, 0x5500, 0))
//!     .unwrap();
//! assert_eq!(devices.len(), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use libusb1_sys::constants::*;

use crate::api::{DeviceList, DeviceRef, OpenHandle, UsbApi};
use crate::descriptor::DeviceDescriptor;

/// Pseudo-endpoint key the fake uses for scripted IN control transfers.
pub const CONTROL_IN: u8 = 0x80;
/// Pseudo-endpoint key the fake uses for scripted OUT control transfers.
pub const CONTROL_OUT: u8 = 0x00;

/// One scripted outcome for a transfer on a given endpoint.
///
/// Queued per endpoint in script order; bulk and interrupt transfers
/// on the same endpoint share one queue, and control transfers use the
/// [`CONTROL_IN`] / [`CONTROL_OUT`] keys.
#[derive(Debug, Clone)]
pub enum ScriptedTransfer {
    /// Successful read delivering these bytes.
    ReadOk(Vec<u8>),
    /// Read that times out after delivering only this prefix.
    ReadTimeout(Vec<u8>),
    /// Read failing with a raw status code and no data.
    ReadError(i32),
    /// Write accepting every byte offered.
    WriteOk,
    /// Write reporting success despite accepting only this many bytes.
    WriteShort(usize),
    /// Write timing out after accepting this many bytes.
    WriteTimeout(usize),
    /// Write failing with a raw status code and no progress.
    WriteError(i32),
}

/// Blueprint for one scripted device, builder style.
///
/// Defaults describe a well-behaved unclassified device: descriptor
/// fetch, open and claim succeed, no kernel driver is bound (so a
/// detach reports `LIBUSB_ERROR_NOT_FOUND`, the usual case on a device
/// nothing has claimed).
#[derive(Debug, Clone)]
pub struct FakeDevice {
    vendor_id: u16,
    product_id: u16,
    bus: u8,
    address: u8,
    class_code: u8,
    manufacturer: Option<String>,
    product: Option<String>,
    serial_number: Option<String>,
    descriptor_status: i32,
    open_status: i32,
    claim_status: i32,
    detach_status: i32,
    attach_status: i32,
    reset_status: i32,
    driver_active: bool,
    scripts: Vec<(u8, ScriptedTransfer)>,
}

impl FakeDevice {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            bus: 1,
            address: 1,
            class_code: 0,
            manufacturer: None,
            product: None,
            serial_number: None,
            descriptor_status: 0,
            open_status: 0,
            claim_status: 0,
            detach_status: LIBUSB_ERROR_NOT_FOUND,
            attach_status: 0,
            reset_status: 0,
            driver_active: false,
            scripts: Vec::new(),
        }
    }

    pub fn bus(mut self, bus: u8) -> Self {
        self.bus = bus;
        self
    }

    pub fn address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn class_code(mut self, class_code: u8) -> Self {
        self.class_code = class_code;
        self
    }

    pub fn strings(mut self, manufacturer: &str, product: &str, serial_number: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self.product = Some(product.to_string());
        self.serial_number = Some(serial_number.to_string());
        self
    }

    /// Make the descriptor fetch fail, so wrapping this device during
    /// enumeration errors out.
    pub fn descriptor_status(mut self, status: i32) -> Self {
        self.descriptor_status = status;
        self
    }

    pub fn open_status(mut self, status: i32) -> Self {
        self.open_status = status;
        self
    }

    pub fn claim_status(mut self, status: i32) -> Self {
        self.claim_status = status;
        self
    }

    pub fn detach_status(mut self, status: i32) -> Self {
        self.detach_status = status;
        self
    }

    pub fn attach_status(mut self, status: i32) -> Self {
        self.attach_status = status;
        self
    }

    pub fn reset_status(mut self, status: i32) -> Self {
        self.reset_status = status;
        self
    }

    /// Pretend a kernel driver is bound to every interface.
    pub fn driver_active(mut self, active: bool) -> Self {
        self.driver_active = active;
        self
    }

    /// Queue a scripted transfer outcome for `endpoint`.
    pub fn transfer(mut self, endpoint: u8, script: ScriptedTransfer) -> Self {
        self.scripts.push((endpoint, script));
        self
    }

    /// Queue a successful read delivering `data`, shorthand for the
    /// most common script.
    pub fn read(self, endpoint: u8, data: &[u8]) -> Self {
        self.transfer(endpoint, ScriptedTransfer::ReadOk(data.to_vec()))
    }
}

#[derive(Debug)]
struct DeviceState {
    blueprint: FakeDevice,
    refs: isize,
    unrefs: usize,
    opens: usize,
    closes: usize,
    claims: usize,
    claimed: Vec<(usize, i32)>,
    configuration: i32,
    driver_active: bool,
    scripts: HashMap<u8, VecDeque<ScriptedTransfer>>,
}

impl DeviceState {
    fn new(blueprint: FakeDevice) -> Self {
        let mut scripts: HashMap<u8, VecDeque<ScriptedTransfer>> = HashMap::new();
        for (endpoint, script) in blueprint.scripts.clone() {
            scripts.entry(endpoint).or_default().push_back(script);
        }
        let driver_active = blueprint.driver_active;
        Self {
            blueprint,
            refs: 0,
            unrefs: 0,
            opens: 0,
            closes: 0,
            claims: 0,
            claimed: Vec::new(),
            configuration: 1,
            driver_active,
            scripts,
        }
    }

    fn take_script(&mut self, endpoint: u8) -> ScriptedTransfer {
        self.scripts
            .get_mut(&endpoint)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| panic!("no scripted transfer for endpoint {endpoint:#04x}"))
    }
}

#[derive(Debug, Default)]
struct FakeState {
    devices: Vec<DeviceState>,
    handles: HashMap<usize, usize>,
    next_handle: usize,
    next_list: usize,
    list_status: Option<i32>,
    free_list_calls: usize,
    debug_level: Option<i32>,
}

impl FakeState {
    fn device_index(&self, dev: DeviceRef) -> usize {
        let index = dev.0.checked_sub(1).filter(|i| *i < self.devices.len());
        index.unwrap_or_else(|| panic!("unknown device reference {:?}", dev))
    }

    fn handle_index(&self, handle: &OpenHandle) -> usize {
        *self
            .handles
            .get(&handle.0)
            .unwrap_or_else(|| panic!("operation on unknown handle {:?}", handle))
    }
}

/// Scripted in-memory [`UsbApi`] backend.
pub struct FakeUsb {
    state: Mutex<FakeState>,
}

impl FakeUsb {
    /// Fresh backend with no devices attached.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state lock poisoned")
    }

    /// Attach a scripted device. Devices enumerate in the order they
    /// were added; the returned index is how the counter accessors
    /// refer to this device.
    pub fn add_device(&self, device: FakeDevice) -> usize {
        let mut state = self.lock();
        state.devices.push(DeviceState::new(device));
        state.devices.len() - 1
    }

    /// Make the next listing calls fail with a raw status code.
    pub fn fail_device_list(&self, status: i32) {
        self.lock().list_status = Some(status);
    }

    /// How many times the native list structure has been freed.
    pub fn free_list_calls(&self) -> usize {
        self.lock().free_list_calls
    }

    /// The last verbosity handed to `set_debug`, if any.
    pub fn debug_level(&self) -> Option<i32> {
        self.lock().debug_level
    }

    /// How many times device `index` has been released.
    pub fn unref_count(&self, index: usize) -> usize {
        self.lock().devices[index].unrefs
    }

    /// Native references currently held on device `index`.
    pub fn live_refs(&self, index: usize) -> isize {
        self.lock().devices[index].refs
    }

    pub fn open_count(&self, index: usize) -> usize {
        self.lock().devices[index].opens
    }

    pub fn close_count(&self, index: usize) -> usize {
        self.lock().devices[index].closes
    }

    pub fn claim_count(&self, index: usize) -> usize {
        self.lock().devices[index].claims
    }

    /// Interfaces currently claimed on device `index`, any handle.
    pub fn claimed_interfaces(&self, index: usize) -> Vec<i32> {
        self.lock().devices[index]
            .claimed
            .iter()
            .map(|(_, interface)| *interface)
            .collect()
    }

    fn unref(state: &mut FakeState, dev: DeviceRef) {
        let index = state.device_index(dev);
        let device = &mut state.devices[index];
        device.refs -= 1;
        device.unrefs += 1;
        if device.refs < 0 {
            panic!("reference count below zero for device {index}");
        }
    }
}

impl UsbApi for FakeUsb {
    fn set_debug(&self, level: i32) {
        self.lock().debug_level = Some(level);
    }

    fn device_list(&self, out: &mut DeviceList) -> i32 {
        let mut state = self.lock();
        if let Some(status) = state.list_status {
            return status;
        }
        state.next_list += 1;
        out.raw = state.next_list;
        out.devices = (1..=state.devices.len()).map(DeviceRef).collect();
        for device in &mut state.devices {
            device.refs += 1;
        }
        state.devices.len() as i32
    }

    fn free_device_list(&self, list: DeviceList, unref_devices: bool) {
        let mut state = self.lock();
        state.free_list_calls += 1;
        if unref_devices {
            for dev in list.devices {
                Self::unref(&mut state, dev);
            }
        }
    }

    fn ref_device(&self, dev: DeviceRef) {
        let mut state = self.lock();
        let index = state.device_index(dev);
        state.devices[index].refs += 1;
    }

    fn unref_device(&self, dev: DeviceRef) {
        let mut state = self.lock();
        Self::unref(&mut state, dev);
    }

    fn device_descriptor(&self, dev: DeviceRef, out: &mut DeviceDescriptor) -> i32 {
        let state = self.lock();
        let blueprint = &state.devices[state.device_index(dev)].blueprint;
        if blueprint.descriptor_status < 0 {
            return blueprint.descriptor_status;
        }
        *out = DeviceDescriptor {
            length: 18,
            descriptor_type: 1,
            usb_version: 0x0200,
            class_code: blueprint.class_code,
            sub_class_code: 0,
            protocol_code: 0,
            max_packet_size_0: 8,
            vendor_id: blueprint.vendor_id,
            product_id: blueprint.product_id,
            device_version: 0x0100,
            manufacturer_index: if blueprint.manufacturer.is_some() { 1 } else { 0 },
            product_index: if blueprint.product.is_some() { 2 } else { 0 },
            serial_number_index: if blueprint.serial_number.is_some() { 3 } else { 0 },
            num_configurations: 1,
        };
        0
    }

    fn bus_number(&self, dev: DeviceRef) -> u8 {
        let state = self.lock();
        state.devices[state.device_index(dev)].blueprint.bus
    }

    fn device_address(&self, dev: DeviceRef) -> u8 {
        let state = self.lock();
        state.devices[state.device_index(dev)].blueprint.address
    }

    fn max_iso_packet_size(&self, _dev: DeviceRef, _endpoint: u8) -> i32 {
        64
    }

    fn open(&self, dev: DeviceRef, out: &mut Option<OpenHandle>) -> i32 {
        let mut state = self.lock();
        let index = state.device_index(dev);
        if state.devices[index].blueprint.open_status < 0 {
            return state.devices[index].blueprint.open_status;
        }
        state.next_handle += 1;
        let id = state.next_handle;
        state.handles.insert(id, index);
        state.devices[index].opens += 1;
        *out = Some(OpenHandle(id));
        0
    }

    fn close(&self, handle: OpenHandle) {
        let mut state = self.lock();
        let index = state
            .handles
            .remove(&handle.0)
            .unwrap_or_else(|| panic!("close of unknown handle {:?}", handle));
        state.devices[index].closes += 1;
        // The native close releases interfaces still claimed through
        // the handle.
        state.devices[index]
            .claimed
            .retain(|(owner, _)| *owner != handle.0);
    }

    fn configuration(&self, handle: &OpenHandle, out: &mut i32) -> i32 {
        let state = self.lock();
        *out = state.devices[state.handle_index(handle)].configuration;
        0
    }

    fn set_configuration(&self, handle: &OpenHandle, configuration: i32) -> i32 {
        let mut state = self.lock();
        let index = state.handle_index(handle);
        state.devices[index].configuration = configuration;
        0
    }

    fn claim_interface(&self, handle: &OpenHandle, interface: i32) -> i32 {
        let mut state = self.lock();
        let index = state.handle_index(handle);
        let device = &mut state.devices[index];
        if device.blueprint.claim_status < 0 {
            return device.blueprint.claim_status;
        }
        if device.claimed.contains(&(handle.0, interface)) {
            // Claiming again through the same handle is a no-op.
            return 0;
        }
        if device.claimed.iter().any(|(_, i)| *i == interface) {
            return LIBUSB_ERROR_BUSY;
        }
        device.claimed.push((handle.0, interface));
        device.claims += 1;
        0
    }

    fn release_interface(&self, handle: &OpenHandle, interface: i32) -> i32 {
        let mut state = self.lock();
        let index = state.handle_index(handle);
        let device = &mut state.devices[index];
        match device.claimed.iter().position(|c| *c == (handle.0, interface)) {
            Some(at) => {
                device.claimed.remove(at);
                0
            }
            None => LIBUSB_ERROR_NOT_FOUND,
        }
    }

    fn set_interface_alt_setting(
        &self,
        handle: &OpenHandle,
        _interface: i32,
        _alt_setting: i32,
    ) -> i32 {
        let state = self.lock();
        state.handle_index(handle);
        0
    }

    fn clear_halt(&self, handle: &OpenHandle, _endpoint: u8) -> i32 {
        let state = self.lock();
        state.handle_index(handle);
        0
    }

    fn reset_device(&self, handle: &OpenHandle) -> i32 {
        let state = self.lock();
        state.devices[state.handle_index(handle)].blueprint.reset_status
    }

    fn kernel_driver_active(&self, handle: &OpenHandle, _interface: i32) -> i32 {
        let state = self.lock();
        i32::from(state.devices[state.handle_index(handle)].driver_active)
    }

    fn detach_kernel_driver(&self, handle: &OpenHandle, _interface: i32) -> i32 {
        let mut state = self.lock();
        let index = state.handle_index(handle);
        let status = state.devices[index].blueprint.detach_status;
        if status == 0 {
            state.devices[index].driver_active = false;
        }
        status
    }

    fn attach_kernel_driver(&self, handle: &OpenHandle, _interface: i32) -> i32 {
        let mut state = self.lock();
        let index = state.handle_index(handle);
        let status = state.devices[index].blueprint.attach_status;
        if status == 0 {
            state.devices[index].driver_active = true;
        }
        status
    }

    fn string_descriptor_ascii(&self, handle: &OpenHandle, index: u8, buf: &mut [u8]) -> i32 {
        let state = self.lock();
        let blueprint = &state.devices[state.handle_index(handle)].blueprint;
        let string = match index {
            1 => blueprint.manufacturer.as_deref(),
            2 => blueprint.product.as_deref(),
            3 => blueprint.serial_number.as_deref(),
            _ => None,
        };
        match string {
            Some(s) => {
                let n = s.len().min(buf.len());
                buf[..n].copy_from_slice(&s.as_bytes()[..n]);
                n as i32
            }
            None => LIBUSB_ERROR_INVALID_PARAM,
        }
    }

    fn control_read(
        &self,
        handle: &OpenHandle,
        _request_type: u8,
        _request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> i32 {
        let mut transferred = 0;
        let rc = self.scripted_read(handle, CONTROL_IN, buf, &mut transferred);
        // Control transfers report bytes-or-status in the return value.
        if rc == 0 { transferred as i32 } else { rc }
    }

    fn control_write(
        &self,
        handle: &OpenHandle,
        _request_type: u8,
        _request: u8,
        _value: u16,
        _index: u16,
        data: &[u8],
        _timeout_ms: u32,
    ) -> i32 {
        let mut transferred = 0;
        let rc = self.scripted_write(handle, CONTROL_OUT, data, &mut transferred);
        if rc == 0 { transferred as i32 } else { rc }
    }

    fn bulk_read(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        buf: &mut [u8],
        transferred: &mut usize,
        _timeout_ms: u32,
    ) -> i32 {
        self.scripted_read(handle, endpoint, buf, transferred)
    }

    fn bulk_write(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        data: &[u8],
        transferred: &mut usize,
        _timeout_ms: u32,
    ) -> i32 {
        self.scripted_write(handle, endpoint, data, transferred)
    }

    fn interrupt_read(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        buf: &mut [u8],
        transferred: &mut usize,
        _timeout_ms: u32,
    ) -> i32 {
        self.scripted_read(handle, endpoint, buf, transferred)
    }

    fn interrupt_write(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        data: &[u8],
        transferred: &mut usize,
        _timeout_ms: u32,
    ) -> i32 {
        self.scripted_write(handle, endpoint, data, transferred)
    }
}

impl FakeUsb {
    fn scripted_read(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        buf: &mut [u8],
        transferred: &mut usize,
    ) -> i32 {
        let mut state = self.lock();
        let index = state.handle_index(handle);
        match state.devices[index].take_script(endpoint) {
            ScriptedTransfer::ReadOk(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                *transferred = n;
                0
            }
            ScriptedTransfer::ReadTimeout(partial) => {
                let n = partial.len().min(buf.len());
                buf[..n].copy_from_slice(&partial[..n]);
                *transferred = n;
                LIBUSB_ERROR_TIMEOUT
            }
            ScriptedTransfer::ReadError(code) => {
                *transferred = 0;
                code
            }
            other => panic!("write script queued on read endpoint {endpoint:#04x}: {other:?}"),
        }
    }

    fn scripted_write(
        &self,
        handle: &OpenHandle,
        endpoint: u8,
        data: &[u8],
        transferred: &mut usize,
    ) -> i32 {
        let mut state = self.lock();
        let index = state.handle_index(handle);
        match state.devices[index].take_script(endpoint) {
            ScriptedTransfer::WriteOk => {
                *transferred = data.len();
                0
            }
            ScriptedTransfer::WriteShort(accepted) => {
                *transferred = accepted.min(data.len());
                0
            }
            ScriptedTransfer::WriteTimeout(accepted) => {
                *transferred = accepted.min(data.len());
                LIBUSB_ERROR_TIMEOUT
            }
            ScriptedTransfer::WriteError(code) => {
                *transferred = 0;
                code
            }
            other => panic!("read script queued on write endpoint {endpoint:#04x}: {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_device_descriptor_fill() {
        let api = FakeUsb::new();
        api.add_device(FakeDevice::new(0x1234, 0x5678).strings("Acme", "Widget", "SN0001"));

        let mut list = DeviceList::default();
        assert_eq!(api.device_list(&mut list), 1);

        let mut descriptor = DeviceDescriptor::default();
        assert_eq!(api.device_descriptor(list.devices()[0], &mut descriptor), 0);
        assert_eq!(descriptor.vendor_id, 0x1234);
        assert_eq!(descriptor.product_id, 0x5678);
        assert_eq!(descriptor.manufacturer_index, 1);
        assert_eq!(descriptor.serial_number_index, 3);

        api.free_device_list(list, true);
        assert_eq!(api.unref_count(0), 1);
    }

    #[test]
    fn test_scripts_pop_in_order() {
        let api = FakeUsb::new();
        api.add_device(
            FakeDevice::new(0x1234, 0x5678)
                .read(0x81, &[1])
                .read(0x81, &[2]),
        );

        let mut list = DeviceList::default();
        api.device_list(&mut list);
        let mut handle = None;
        assert_eq!(api.open(list.devices()[0], &mut handle), 0);
        let handle = handle.unwrap();

        let mut buf = [0u8; 1];
        let mut transferred = 0;
        assert_eq!(api.interrupt_read(&handle, 0x81, &mut buf, &mut transferred, 0), 0);
        assert_eq!(buf[0], 1);
        assert_eq!(api.interrupt_read(&handle, 0x81, &mut buf, &mut transferred, 0), 0);
        assert_eq!(buf[0], 2);

        api.close(handle);
        api.free_device_list(list, true);
    }

    #[test]
    fn test_ref_unref_symmetry() {
        let api = FakeUsb::new();
        api.add_device(FakeDevice::new(0x1234, 0x5678));

        let mut list = DeviceList::default();
        api.device_list(&mut list);
        let dev = list.devices()[0];

        // Duplicating ownership takes a second reference; each owner
        // releases its own.
        api.ref_device(dev);
        assert_eq!(api.live_refs(0), 2);
        api.unref_device(dev);
        assert_eq!(api.live_refs(0), 1);

        api.free_device_list(list, true);
        assert_eq!(api.live_refs(0), 0);
        assert_eq!(api.unref_count(0), 2);
    }

    #[test]
    fn test_debug_level_recorded() {
        let api = FakeUsb::new();
        assert_eq!(api.debug_level(), None);
        api.set_debug(3);
        assert_eq!(api.debug_level(), Some(3));
    }

    #[test]
    #[should_panic(expected = "reference count below zero")]
    fn test_unref_below_zero_panics() {
        let api = FakeUsb::new();
        api.add_device(FakeDevice::new(0x1234, 0x5678));

        let mut list = DeviceList::default();
        api.device_list(&mut list);
        let dev = list.devices()[0];
        api.free_device_list(list, true);
        // The listing's reference is already gone.
        api.unref_device(dev);
    }
}
