//! Platform-level types shared by every backend
//!
//! Device addresses, the address-space model, the platform name query and
//! the Fletcher register map.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Status};

/// Platform name reported by the Alveo (OpenCL/XRT) backend
pub const ALVEO_PLATFORM_NAME: &str = "alveo";

/// Platform name reported by the software device model
pub const SIM_PLATFORM_NAME: &str = "alveo_sim";

/// Write `name` into `buf` as a NUL-terminated C string.
///
/// Truncates when `buf` is too small and never writes past `buf.len()`.
/// An empty `buf` is left untouched. Always returns [`Status::Ok`].
pub fn get_name(name: &str, buf: &mut [u8]) -> Status {
    if buf.is_empty() {
        return Status::Ok;
    }
    let bytes = name.as_bytes();
    let n = bytes.len().min(buf.len() - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf[n] = 0;
    Status::Ok
}

/// Opaque device address (`da_t`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DeviceAddress(pub u64);

impl DeviceAddress {
    pub const NULL: DeviceAddress = DeviceAddress(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one, `None` on overflow
    pub fn checked_add(self, bytes: u64) -> Option<DeviceAddress> {
        self.0.checked_add(bytes).map(DeviceAddress)
    }

    pub fn is_aligned_to(self, alignment: usize) -> bool {
        alignment != 0 && self.0 % alignment as u64 == 0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for DeviceAddress {
    fn from(addr: u64) -> Self {
        DeviceAddress(addr)
    }
}

/// How device addresses relate to host addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSpace {
    /// Device and host share one virtual address space
    Shared,
    /// Device memory is physically separate and needs explicit transfers
    #[default]
    Disjoint,
}

impl FromStr for AddressSpace {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "shared" => Ok(AddressSpace::Shared),
            "disjoint" => Ok(AddressSpace::Disjoint),
            other => Err(PlatformError::InvalidConfig(format!(
                "unknown address space '{}', expected 'shared' or 'disjoint'",
                other
            ))),
        }
    }
}

/// Result of preparing a host buffer for device access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedBuffer {
    /// Address the device uses to reach the data
    pub address: DeviceAddress,
    /// True if a device allocation was made that the caller must free
    pub allocated: bool,
}

/// Fletcher register map (register indices, not byte offsets)
pub mod regs {
    pub const REG_CONTROL: u64 = 0;
    pub const REG_STATUS: u64 = 1;
    pub const REG_RETURN0: u64 = 2;
    pub const REG_RETURN1: u64 = 3;

    /// Width of one MMIO register in bytes
    pub const REG_WIDTH: u64 = 4;

    pub const CONTROL_START: u32 = 1 << 0;
    pub const CONTROL_STOP: u32 = 1 << 1;
    pub const CONTROL_RESET: u32 = 1 << 2;

    pub const STATUS_IDLE: u32 = 1 << 0;
    pub const STATUS_BUSY: u32 = 1 << 1;
    pub const STATUS_DONE: u32 = 1 << 2;

    /// Byte offset of register `index` in a control space starting at `base`
    pub fn byte_offset(base: u64, index: u64) -> Option<u64> {
        index
            .checked_mul(REG_WIDTH)
            .and_then(|off| base.checked_add(off))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_get_name_fits() {
        let mut buf = [0xAAu8; 16];
        assert_eq!(get_name("alveo", &mut buf), Status::Ok);
        assert_eq!(&buf[..6], b"alveo\0");
        assert_eq!(buf[6], 0xAA);
    }

    #[test]
    fn test_get_name_exact_length_truncates_last_char() {
        // Room for "alve" plus the terminator only
        let mut buf = [0xAAu8; 5];
        get_name("alveo", &mut buf);
        assert_eq!(&buf, b"alve\0");
    }

    #[test]
    fn test_get_name_empty_buffer_untouched() {
        let mut buf: [u8; 0] = [];
        assert_eq!(get_name("alveo", &mut buf), Status::Ok);
    }

    #[test]
    fn test_get_name_single_byte() {
        let mut buf = [0xAAu8; 1];
        get_name("alveo", &mut buf);
        assert_eq!(buf, [0]);
    }

    proptest! {
        #[test]
        fn test_get_name_never_overruns(size in 0usize..(ALVEO_PLATFORM_NAME.len() + 10)) {
            // Canary bytes after the window must survive
            let mut storage = vec![0xAAu8; size + 8];
            let status = get_name(ALVEO_PLATFORM_NAME, &mut storage[..size]);
            prop_assert_eq!(status, Status::Ok);
            prop_assert!(storage[size..].iter().all(|&b| b == 0xAA));
            if size > 0 {
                let nul = storage[..size].iter().position(|&b| b == 0);
                prop_assert!(nul.is_some());
                let n = nul.unwrap_or(0);
                prop_assert_eq!(&storage[..n], &ALVEO_PLATFORM_NAME.as_bytes()[..n]);
            }
        }
    }

    #[test]
    fn test_device_address_helpers() {
        let addr = DeviceAddress(0x1000);
        assert!(addr.is_aligned_to(4096));
        assert!(!DeviceAddress(0x1004).is_aligned_to(4096));
        assert!(!addr.is_aligned_to(0));
        assert_eq!(addr.checked_add(0x10), Some(DeviceAddress(0x1010)));
        assert_eq!(DeviceAddress(u64::MAX).checked_add(1), None);
        assert_eq!(addr.to_string(), "0x0000000000001000");
        assert!(DeviceAddress::NULL.is_null());
    }

    #[test]
    fn test_register_byte_offset() {
        assert_eq!(regs::byte_offset(0, regs::REG_STATUS), Some(4));
        assert_eq!(regs::byte_offset(0x10000, 3), Some(0x1000C));
        assert_eq!(regs::byte_offset(0, u64::MAX), None);
    }
}
