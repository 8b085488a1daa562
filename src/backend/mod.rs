//! Device backends
//!
//! A backend wraps one vendor toolchain behind [`DeviceBackend`]. The session
//! layer builds the platform operation vocabulary on top of these primitives,
//! so each backend only has to provide discovery, register access, raw
//! allocation and blocking transfers.

pub mod opencl;
pub mod sim;

use std::path::Path;

use crate::config::PlatformConfig;
use crate::error::{PlatformError, PlatformResult};
use crate::platform::{AddressSpace, DeviceAddress};

#[cfg(feature = "opencl")]
pub use opencl::AlveoDevice;
pub use sim::SimDevice;

/// Backend selected at build time for the C ABI
#[cfg(feature = "opencl")]
pub type DefaultBackend = opencl::AlveoDevice;

/// Backend selected at build time for the C ABI
#[cfg(not(feature = "opencl"))]
pub type DefaultBackend = sim::SimDevice;

/// Vendor seam of the platform shim
///
/// `open` acquires every vendor handle or none: on failure it must release
/// whatever it already acquired before returning the error. `close` releases
/// everything and must be safe to call more than once.
pub trait DeviceBackend: Send + Sized {
    /// Platform name reported by `getName`
    const NAME: &'static str;

    /// Discover the device and acquire all handles
    fn open(config: &PlatformConfig) -> PlatformResult<Self>;

    /// Address-space model of the opened device
    fn address_space(&self) -> AddressSpace;

    /// Read 32-bit register `index`
    fn read_register(&mut self, index: u64) -> PlatformResult<u32>;

    /// Write 32-bit register `index`
    fn write_register(&mut self, index: u64, value: u32) -> PlatformResult<()>;

    /// Allocate `size` bytes of device memory
    fn allocate(&mut self, size: usize) -> PlatformResult<DeviceAddress>;

    /// Release an allocation made by [`DeviceBackend::allocate`]
    fn free(&mut self, address: DeviceAddress) -> PlatformResult<()>;

    /// Copy `src` to device memory at `dst`; returns once the data is visible
    fn write(&mut self, dst: DeviceAddress, src: &[u8]) -> PlatformResult<()>;

    /// Copy device memory at `src` into `dst`; returns once `dst` is filled
    fn read(&mut self, src: DeviceAddress, dst: &mut [u8]) -> PlatformResult<()>;

    /// Device-visible alias of a host buffer on shared address-space devices
    ///
    /// The alias stays a valid copy target until the device closes.
    fn alias_host(&mut self, _host: &[u8]) -> PlatformResult<DeviceAddress> {
        Err(PlatformError::Unsupported("host buffer aliasing"))
    }

    /// Release every vendor handle
    fn close(&mut self) -> PlatformResult<()>;
}

/// Read a bitstream image fully into memory
pub fn load_bitstream(path: &Path) -> PlatformResult<Vec<u8>> {
    tracing::info!("Loading bitstream {}", path.display());
    let image = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PlatformError::FileNotFound(path.to_path_buf()),
        _ => PlatformError::FileReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    tracing::debug!("Bitstream {} loaded: {} bytes", path.display(), image.len());
    Ok(image)
}
