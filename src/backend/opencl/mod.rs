//! Xilinx Alveo backend over OpenCL and the XRT HAL
//!
//! Discovery, program loading and buffer management go through `opencl3` on
//! the OpenCL runtime shipped with XRT; compute unit registers are accessed
//! through the XRT HAL. The device module is only built with the `opencl`
//! feature; the selection helpers below are plain Rust and always available.

#[cfg(feature = "opencl")]
mod device;
#[cfg(feature = "opencl")]
pub(crate) mod ffi;

#[cfg(feature = "opencl")]
pub use device::AlveoDevice;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::ALVEO_PLATFORM_NAME;

/// Whether a device named `device_name` satisfies the requested target.
///
/// With no target any device matches. Otherwise the names match when one
/// contains the other, ignoring case, so both a short fragment such as
/// `"u250"` and a full shell name select the card.
pub fn device_matches(device_name: &str, target: Option<&str>) -> bool {
    let Some(target) = target.map(str::trim).filter(|t| !t.is_empty()) else {
        return true;
    };
    let name = device_name.to_lowercase();
    let target = target.to_lowercase();
    name.contains(&target) || target.contains(&name)
}

/// Whether a platform vendor string names the requested vendor
pub fn vendor_matches(vendor: &str, wanted: &str) -> bool {
    vendor.to_lowercase().contains(&wanted.trim().to_lowercase())
}

/// Open the first candidate that accepts, trying each in order
///
/// A candidate that fails is logged and skipped. When every candidate fails
/// the last error is returned, so a rejected bitstream reports the build log
/// of the last device tried.
pub fn first_accepting<C, T, I, F>(candidates: I, mut open: F) -> PlatformResult<T>
where
    I: IntoIterator<Item = C>,
    F: FnMut(C) -> PlatformResult<T>,
{
    let mut last_err = None;
    for (position, candidate) in candidates.into_iter().enumerate() {
        match open(candidate) {
            Ok(opened) => return Ok(opened),
            Err(e) => {
                tracing::warn!(
                    "[{}] Candidate device {} refused: {}",
                    ALVEO_PLATFORM_NAME,
                    position,
                    e
                );
                last_err = Some(e);
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| PlatformError::DeviceNotFound("no candidate devices".to_string())))
}
