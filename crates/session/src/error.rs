//! Typed USB status errors
//!
//! libusb reports failures as negative integer status codes. This module
//! translates them into one closed enum so callers match on variants
//! instead of comparing raw integers. A zero or positive status always
//! means success and never reaches [`UsbError`].

use libusb1_sys::constants::*;
use thiserror::Error;

/// Error kind for every fallible operation in this crate.
///
/// One variant per documented libusb status code, plus two conditions the
/// native library does not model: [`UsbError::ShortTransfer`] (a write
/// moved fewer bytes than requested even though the status said success)
/// and the partial byte count carried by [`UsbError::Timeout`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    /// Input/output error
    #[error("input/output error")]
    Io,

    /// Invalid parameter, or an operation that needs an open handle was
    /// called on a closed device
    #[error("invalid parameter")]
    InvalidParam,

    /// Access denied (insufficient permissions)
    #[error("access denied")]
    Access,

    /// Device has been disconnected
    #[error("no such device (disconnected?)")]
    NoDevice,

    /// Entity not found (interface, endpoint, kernel driver, ...)
    #[error("entity not found")]
    NotFound,

    /// Resource busy (interface claimed elsewhere)
    #[error("resource busy")]
    Busy,

    /// Transfer timed out; `transferred` bytes had already moved when the
    /// timeout hit, so the caller can account for partial progress
    #[error("transfer timed out ({transferred} bytes transferred)")]
    Timeout { transferred: usize },

    /// Device offered more data than the buffer could hold
    #[error("overflow")]
    Overflow,

    /// Endpoint halted or control request not supported
    #[error("pipe error")]
    Pipe,

    /// System call interrupted (perhaps due to signal)
    #[error("system call interrupted")]
    Interrupted,

    /// Native library ran out of memory
    #[error("insufficient memory")]
    NoMem,

    /// Operation not supported on this platform
    #[error("operation not supported or unimplemented on this platform")]
    NotSupported,

    /// Write completed with a success status but moved fewer bytes than
    /// requested
    #[error("short transfer: {transferred} of {requested} bytes written")]
    ShortTransfer { transferred: usize, requested: usize },

    /// Any status code outside the documented set, carried verbatim for
    /// diagnostics
    #[error("libusb error code {0}")]
    Other(i32),
}

impl UsbError {
    /// Map a raw negative status code onto the taxonomy.
    ///
    /// Every documented code maps to its own variant; anything else comes
    /// back as [`UsbError::Other`] with the original code preserved. A
    /// timeout mapped this way carries `transferred: 0`; transfer paths
    /// that know better fill in the real count themselves.
    pub fn from_status(status: i32) -> UsbError {
        match status {
            LIBUSB_ERROR_IO => UsbError::Io,
            LIBUSB_ERROR_INVALID_PARAM => UsbError::InvalidParam,
            LIBUSB_ERROR_ACCESS => UsbError::Access,
            LIBUSB_ERROR_NO_DEVICE => UsbError::NoDevice,
            LIBUSB_ERROR_NOT_FOUND => UsbError::NotFound,
            LIBUSB_ERROR_BUSY => UsbError::Busy,
            LIBUSB_ERROR_TIMEOUT => UsbError::Timeout { transferred: 0 },
            LIBUSB_ERROR_OVERFLOW => UsbError::Overflow,
            LIBUSB_ERROR_PIPE => UsbError::Pipe,
            LIBUSB_ERROR_INTERRUPTED => UsbError::Interrupted,
            LIBUSB_ERROR_NO_MEM => UsbError::NoMem,
            LIBUSB_ERROR_NOT_SUPPORTED => UsbError::NotSupported,
            code => UsbError::Other(code),
        }
    }
}

pub type Result<T> = std::result::Result<T, UsbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_known_codes() {
        assert_eq!(UsbError::from_status(-1), UsbError::Io);
        assert_eq!(UsbError::from_status(-2), UsbError::InvalidParam);
        assert_eq!(UsbError::from_status(-3), UsbError::Access);
        assert_eq!(UsbError::from_status(-4), UsbError::NoDevice);
        assert_eq!(UsbError::from_status(-5), UsbError::NotFound);
        assert_eq!(UsbError::from_status(-6), UsbError::Busy);
        assert_eq!(
            UsbError::from_status(-7),
            UsbError::Timeout { transferred: 0 }
        );
        assert_eq!(UsbError::from_status(-8), UsbError::Overflow);
        assert_eq!(UsbError::from_status(-9), UsbError::Pipe);
        assert_eq!(UsbError::from_status(-10), UsbError::Interrupted);
        assert_eq!(UsbError::from_status(-11), UsbError::NoMem);
        assert_eq!(UsbError::from_status(-12), UsbError::NotSupported);
    }

    #[test]
    fn test_from_status_preserves_unknown_codes() {
        assert_eq!(UsbError::from_status(-99), UsbError::Other(-99));
        assert_eq!(UsbError::from_status(-42), UsbError::Other(-42));
        assert_eq!(UsbError::from_status(-1000), UsbError::Other(-1000));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            UsbError::NoDevice.to_string(),
            "no such device (disconnected?)"
        );
        assert_eq!(
            UsbError::Timeout { transferred: 3 }.to_string(),
            "transfer timed out (3 bytes transferred)"
        );
        assert_eq!(
            UsbError::ShortTransfer {
                transferred: 2,
                requested: 8
            }
            .to_string(),
            "short transfer: 2 of 8 bytes written"
        );
        assert_eq!(UsbError::Other(-99).to_string(), "libusb error code -99");
    }
}
