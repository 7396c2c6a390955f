//! Control request building blocks
//!
//! A control transfer's `bmRequestType` byte packs three fields:
//! direction (bit 7), type (bits 5..6) and recipient (bits 0..4).
//! [`request_type`] composes the byte from the three enums so callers
//! never hand-assemble bit patterns.

/// Transfer direction, encoded in bit 7 of both `bmRequestType` and
/// endpoint addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// Host to device.
    Out = 0x00,
    /// Device to host.
    In = 0x80,
}

/// Mask selecting the direction bit of an endpoint address.
pub const ENDPOINT_DIR_MASK: u8 = 0x80;

impl Direction {
    /// Direction encoded in an endpoint address (`0x81` is IN, `0x01`
    /// is OUT).
    pub fn of_endpoint(endpoint: u8) -> Direction {
        if endpoint & ENDPOINT_DIR_MASK != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Request type category, bits 5..6 of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Standard = 0x00,
    Class = 0x20,
    Vendor = 0x40,
    Reserved = 0x60,
}

/// Request recipient, bits 0..4 of `bmRequestType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Recipient {
    Device = 0x00,
    Interface = 0x01,
    Endpoint = 0x02,
    Other = 0x03,
}

/// Compose a `bmRequestType` byte.
pub fn request_type(direction: Direction, request_type: RequestType, recipient: Recipient) -> u8 {
    direction as u8 | request_type as u8 | recipient as u8
}

// Standard request codes (`bRequest` values defined by the USB spec).
pub const REQUEST_GET_STATUS: u8 = 0x00;
pub const REQUEST_CLEAR_FEATURE: u8 = 0x01;
pub const REQUEST_SET_FEATURE: u8 = 0x03;
pub const REQUEST_SET_ADDRESS: u8 = 0x05;
pub const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
pub const REQUEST_SET_DESCRIPTOR: u8 = 0x07;
pub const REQUEST_GET_CONFIGURATION: u8 = 0x08;
pub const REQUEST_SET_CONFIGURATION: u8 = 0x09;
pub const REQUEST_GET_INTERFACE: u8 = 0x0A;
pub const REQUEST_SET_INTERFACE: u8 = 0x0B;
pub const REQUEST_SYNCH_FRAME: u8 = 0x0C;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_composition() {
        // Vendor request to an interface, host to device.
        assert_eq!(
            request_type(Direction::Out, RequestType::Vendor, Recipient::Interface),
            0x41
        );
        // Standard request to the device, device to host.
        assert_eq!(
            request_type(Direction::In, RequestType::Standard, Recipient::Device),
            0x80
        );
        assert_eq!(
            request_type(Direction::In, RequestType::Class, Recipient::Endpoint),
            0xA2
        );
    }

    #[test]
    fn test_endpoint_direction() {
        assert_eq!(Direction::of_endpoint(0x81), Direction::In);
        assert_eq!(Direction::of_endpoint(0x01), Direction::Out);
        assert_eq!(Direction::of_endpoint(0x02), Direction::Out);
    }
}
