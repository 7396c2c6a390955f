//! Device descriptor types
//!
//! The descriptor is the fixed-layout identity record every USB device
//! reports: spec version, class triple, vendor/product ids, release
//! number, string indices and configuration count. It is fetched once
//! per device during enumeration and cached; nothing here performs I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The standard 18-byte device descriptor, field for field.
///
/// `usb_version` and `device_version` are kept in their raw
/// binary-coded-decimal form; decode them with [`Version::from_bcd`]
/// when a human-readable release number is wanted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Size of the descriptor in bytes.
    pub length: u8,
    /// Descriptor type tag (0x01 for a device descriptor).
    pub descriptor_type: u8,
    /// USB specification release, BCD.
    pub usb_version: u16,
    /// Device class (0 means "per interface").
    pub class_code: u8,
    /// Device subclass, qualified by `class_code`.
    pub sub_class_code: u8,
    /// Device protocol, qualified by class and subclass.
    pub protocol_code: u8,
    /// Maximum packet size for endpoint 0.
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Device release number, BCD.
    pub device_version: u16,
    /// String descriptor index of the manufacturer name (0 = none).
    pub manufacturer_index: u8,
    /// String descriptor index of the product name (0 = none).
    pub product_index: u8,
    /// String descriptor index of the serial number (0 = none).
    pub serial_number_index: u8,
    /// Number of possible configurations.
    pub num_configurations: u8,
}

/// A release number decoded from its BCD form: major, minor, sub-minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u8, pub u8, pub u8);

impl Version {
    /// Decode a binary-coded-decimal release field (`0x0210` is 2.10).
    pub fn from_bcd(raw: u16) -> Self {
        Version((raw >> 8) as u8, ((raw >> 4) & 0x0F) as u8, (raw & 0x0F) as u8)
    }

    pub fn major(self) -> u8 {
        self.0
    }

    pub fn minor(self) -> u8 {
        self.1
    }

    pub fn sub_minor(self) -> u8 {
        self.2
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.0, self.1, self.2)
    }
}

/// Human-oriented snapshot of one device, built for listings and logs.
///
/// String fields are present only when the device was open at the time
/// the summary was taken and actually provides the string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub class_code: u8,
    /// USB specification release, e.g. "2.00".
    pub usb_version: String,
    /// Device release number, e.g. "1.04".
    pub device_version: String,
    pub max_packet_size_0: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_bcd() {
        assert_eq!(Version::from_bcd(0x0200), Version(2, 0, 0));
        assert_eq!(Version::from_bcd(0x0110), Version(1, 1, 0));
        assert_eq!(Version::from_bcd(0x0321), Version(3, 2, 1));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(Version::from_bcd(0x0200).to_string(), "2.00");
        assert_eq!(Version::from_bcd(0x0110).to_string(), "1.10");
        assert_eq!(Version(12, 3, 4).to_string(), "12.34");
    }

    #[test]
    fn test_descriptor_default_is_zeroed() {
        let desc = DeviceDescriptor::default();
        assert_eq!(desc.vendor_id, 0);
        assert_eq!(desc.num_configurations, 0);
    }
}
