//! Alveo device: OpenCL handles, buffers and HAL register access

use std::collections::BTreeMap;
use std::ffi::c_void;
use std::path::Path;
use std::ptr;

use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_ACCELERATOR};
use opencl3::error_codes::{ClError, CL_SUCCESS};
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem, CL_MEM_READ_WRITE, CL_MIGRATE_MEM_OBJECT_CONTENT_UNDEFINED};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::CL_BLOCKING;

use super::ffi;
use super::{device_matches, first_accepting, vendor_matches};
use crate::backend::{load_bitstream, DeviceBackend};
use crate::config::PlatformConfig;
use crate::error::{PlatformError, PlatformResult};
use crate::platform::{regs, AddressSpace, DeviceAddress, ALVEO_PLATFORM_NAME};
use crate::teardown::ReleaseStack;

/// XRT HAL handle
///
/// Only used under the session's exclusive borrow.
#[derive(Debug, Clone, Copy)]
struct Handle(*mut c_void);

// SAFETY: see the type documentation.
unsafe impl Send for Handle {}

impl Handle {
    fn raw(self) -> *mut c_void {
        self.0
    }
}

/// Release closure for an owned `opencl3` object; its `Drop` does the release
fn owned<T: Send + 'static>(value: T) -> impl FnOnce() -> PlatformResult<()> + Send {
    move || {
        drop(value);
        Ok(())
    }
}

/// Command queue and the context it runs on. Fields drop in order, so the
/// queue is released before its context.
struct Channel {
    queue: CommandQueue,
    context: Context,
}

/// A device that accepted the bitstream
struct Programmed {
    device: Device,
    name: String,
    /// Program and kernel; released before the channel
    releases: ReleaseStack,
    channel: Channel,
}

struct DeviceBuffer {
    buffer: Buffer<u8>,
    size: usize,
}

/// Xilinx Alveo card opened through OpenCL and XRT
pub struct AlveoDevice {
    device: Device,
    device_name: String,
    mmio_base: u64,
    hal: Option<Handle>,
    /// Live buffers keyed by device base address
    buffers: BTreeMap<u64, DeviceBuffer>,
    /// Owns program, kernel and HAL handle
    releases: ReleaseStack,
    channel: Option<Channel>,
}

impl std::fmt::Debug for AlveoDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlveoDevice")
            .field("device_name", &self.device_name)
            .field("mmio_base", &self.mmio_base)
            .field("buffers", &self.buffers.len())
            .field("resources", &self.releases.labels())
            .finish()
    }
}

fn select_platform(vendor: &str) -> PlatformResult<Platform> {
    let platforms = get_platforms()
        .map_err(|e| PlatformError::PlatformNotFound(format!("no OpenCL platforms: {}", e)))?;

    for platform in platforms {
        let found = platform
            .vendor()
            .map_err(|e| PlatformError::PlatformNotFound(format!("platform vendor: {}", e)))?;
        tracing::debug!("[{}] Found platform vendor '{}'", ALVEO_PLATFORM_NAME, found);
        if vendor_matches(&found, vendor) {
            let name = platform.name().unwrap_or_default();
            tracing::info!("[{}] Selected platform {}", ALVEO_PLATFORM_NAME, name);
            return Ok(platform);
        }
    }
    Err(PlatformError::PlatformNotFound(format!(
        "no platform from vendor '{}'",
        vendor
    )))
}

/// Accelerator devices whose name matches `target`, in enumeration order
fn candidate_devices(
    platform: &Platform,
    target: Option<&str>,
) -> PlatformResult<Vec<(Device, String)>> {
    let ids = platform
        .get_devices(CL_DEVICE_TYPE_ACCELERATOR)
        .map_err(|e| PlatformError::DeviceNotFound(format!("no accelerator devices: {}", e)))?;

    let mut candidates = Vec::new();
    for id in ids {
        let device = Device::new(id);
        let name = device
            .name()
            .map_err(|e| PlatformError::DeviceNotFound(format!("device name: {}", e)))?;
        tracing::debug!("[{}] Found device '{}'", ALVEO_PLATFORM_NAME, name);
        if device_matches(&name, target) {
            candidates.push((device, name));
        }
    }
    if candidates.is_empty() {
        return Err(PlatformError::DeviceNotFound(format!(
            "no device matching '{}'",
            target.unwrap_or("<any>")
        )));
    }
    Ok(candidates)
}

/// Context, queue, program and kernel on one device
fn program_device(
    device: Device,
    name: String,
    image: &[u8],
    bitstream: &Path,
    kernel_name: &str,
) -> PlatformResult<Programmed> {
    let context = Context::from_device(&device)
        .map_err(|e| PlatformError::ContextCreationFailed(format!("{}: {}", name, e)))?;
    let queue = CommandQueue::create_default(&context, 0)
        .map_err(|e| PlatformError::QueueCreationFailed(format!("{}: {}", name, e)))?;
    let channel = Channel { queue, context };
    let mut releases = ReleaseStack::new();

    // The error string carries the build log when the build itself failed.
    let program = Program::create_and_build_from_binary(&channel.context, &[image], "")
        .map_err(|log| PlatformError::ProgramBuildFailed {
            reason: format!("{} rejected {}", name, bitstream.display()),
            log,
        })?;
    let kernel = Kernel::create(&program, kernel_name)
        .map_err(|e| PlatformError::KernelNotFound(format!("{} on {}: {}", kernel_name, name, e)))?;
    releases.push("program", owned(program));
    releases.push("kernel", owned(kernel));

    Ok(Programmed {
        device,
        name,
        releases,
        channel,
    })
}

fn open_hal(device_index: u32) -> PlatformResult<Handle> {
    // SAFETY: plain HAL open; a null log file name logs nowhere.
    let hal = unsafe { ffi::xclOpen(device_index, ptr::null(), ffi::XCL_QUIET) };
    if hal.is_null() {
        return Err(PlatformError::DeviceNotFound(format!(
            "xclOpen failed for device index {}",
            device_index
        )));
    }
    Ok(Handle(hal))
}

/// Buffer owning `address` and the byte offset into it, checked for `len`
fn locate(
    buffers: &mut BTreeMap<u64, DeviceBuffer>,
    address: DeviceAddress,
    len: usize,
) -> PlatformResult<(&mut Buffer<u8>, usize)> {
    let addr = address.as_u64();
    let (&base, owner) = buffers
        .range_mut(..=addr)
        .next_back()
        .ok_or(PlatformError::InvalidAddress(addr))?;
    let offset = (addr - base) as usize;
    if offset >= owner.size {
        return Err(PlatformError::InvalidAddress(addr));
    }
    if offset.checked_add(len).map_or(true, |end| end > owner.size) {
        return Err(PlatformError::TransferFailed(format!(
            "{} bytes at {} overrun the {}-byte buffer at 0x{:016X}",
            len, address, owner.size, base
        )));
    }
    Ok((&mut owner.buffer, offset))
}

impl AlveoDevice {
    /// Name of the selected card
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn channel(&self) -> PlatformResult<&Channel> {
        self.channel.as_ref().ok_or(PlatformError::NotInitialized)
    }

    fn hal(&self) -> PlatformResult<Handle> {
        self.hal.ok_or(PlatformError::NotInitialized)
    }

    fn register_byte_offset(&self, index: u64) -> PlatformResult<u64> {
        regs::byte_offset(self.mmio_base, index).ok_or_else(|| PlatformError::RegisterAccessFailed {
            offset: index,
            reason: "register byte offset overflows".to_string(),
        })
    }
}

impl DeviceBackend for AlveoDevice {
    const NAME: &'static str = ALVEO_PLATFORM_NAME;

    fn open(config: &PlatformConfig) -> PlatformResult<Self> {
        let bitstream = config.bitstream.as_ref().ok_or_else(|| {
            PlatformError::InvalidConfig("the Alveo backend needs a bitstream path".to_string())
        })?;
        if config.kernel_name.contains('\0') {
            return Err(PlatformError::InvalidConfig(
                "kernel name contains a NUL byte".to_string(),
            ));
        }

        let platform = select_platform(&config.platform_vendor)?;
        let candidates = candidate_devices(&platform, config.target_device.as_deref())?;
        let image = load_bitstream(bitstream)?;

        // Program the first device that accepts the image. Each refusal drops
        // that device's program, queue and context before the next attempt.
        let Programmed {
            device,
            name,
            mut releases,
            channel,
        } = first_accepting(candidates, |(device, name)| {
            tracing::debug!("[{}] Programming {}", Self::NAME, name);
            program_device(device, name, &image, bitstream, &config.kernel_name)
        })?;
        drop(image);
        tracing::info!("[{}] Selected device {}", Self::NAME, name);

        let hal = open_hal(config.device_index)?;
        releases.push("hal handle", move || {
            // SAFETY: handle opened above and closed once.
            unsafe { ffi::xclClose(hal.raw()) };
            Ok(())
        });

        tracing::info!(
            "[{}] Opened {} (kernel {}, resources: {:?})",
            Self::NAME,
            name,
            config.kernel_name,
            releases.labels()
        );

        Ok(AlveoDevice {
            device,
            device_name: name,
            mmio_base: config.mmio_base,
            hal: Some(hal),
            buffers: BTreeMap::new(),
            releases,
            channel: Some(channel),
        })
    }

    fn address_space(&self) -> AddressSpace {
        AddressSpace::Disjoint
    }

    fn read_register(&mut self, index: u64) -> PlatformResult<u32> {
        let hal = self.hal()?;
        let offset = self.register_byte_offset(index)?;
        let mut value = 0u32;
        // SAFETY: reads 4 bytes into `value`.
        let n = unsafe {
            ffi::xclRead(
                hal.raw(),
                ffi::XCL_ADDR_KERNEL_CTRL,
                offset,
                &mut value as *mut u32 as *mut c_void,
                regs::REG_WIDTH as usize,
            )
        };
        if n != regs::REG_WIDTH as usize {
            return Err(PlatformError::RegisterAccessFailed {
                offset: index,
                reason: format!("xclRead at byte 0x{:X} returned {}", offset, n as isize),
            });
        }
        Ok(value)
    }

    fn write_register(&mut self, index: u64, value: u32) -> PlatformResult<()> {
        let hal = self.hal()?;
        let offset = self.register_byte_offset(index)?;
        // SAFETY: writes 4 bytes from `value`.
        let n = unsafe {
            ffi::xclWrite(
                hal.raw(),
                ffi::XCL_ADDR_KERNEL_CTRL,
                offset,
                &value as *const u32 as *const c_void,
                regs::REG_WIDTH as usize,
            )
        };
        if n != regs::REG_WIDTH as usize {
            return Err(PlatformError::RegisterAccessFailed {
                offset: index,
                reason: format!("xclWrite at byte 0x{:X} returned {}", offset, n as isize),
            });
        }
        Ok(())
    }

    fn allocate(&mut self, size: usize) -> PlatformResult<DeviceAddress> {
        let channel = self.channel()?;
        let size = size.max(1);
        // SAFETY: no host pointer is attached to the buffer.
        let buffer = unsafe {
            Buffer::<u8>::create(&channel.context, CL_MEM_READ_WRITE, size, ptr::null_mut())
        }
        .map_err(|e| PlatformError::AllocationFailed(format!("{} bytes: {}", size, e)))?;

        // Buffers are backed lazily; migrate once so the device address exists.
        let mem = buffer.get();
        // SAFETY: one live buffer on a live queue.
        unsafe {
            channel
                .queue
                .enqueue_migrate_mem_object(1, &mem, CL_MIGRATE_MEM_OBJECT_CONTENT_UNDEFINED, &[])
        }
        .and_then(|_event| channel.queue.finish())
        .map_err(|e| PlatformError::AllocationFailed(format!("migrating {} bytes: {}", size, e)))?;

        let mut address = 0u64;
        // SAFETY: writes one u64 into `address`.
        let code = unsafe {
            ffi::xclGetMemObjDeviceAddress(
                mem,
                self.device.id(),
                std::mem::size_of::<u64>(),
                &mut address as *mut u64 as *mut c_void,
            )
        };
        if code != CL_SUCCESS {
            return Err(PlatformError::AllocationFailed(format!(
                "xclGetMemObjDeviceAddress: {}",
                ClError(code)
            )));
        }

        self.buffers.insert(address, DeviceBuffer { buffer, size });
        Ok(DeviceAddress(address))
    }

    fn free(&mut self, address: DeviceAddress) -> PlatformResult<()> {
        self.buffers
            .remove(&address.as_u64())
            .map(drop)
            .ok_or(PlatformError::InvalidAddress(address.as_u64()))
    }

    fn write(&mut self, dst: DeviceAddress, src: &[u8]) -> PlatformResult<()> {
        let queue = &self.channel.as_ref().ok_or(PlatformError::NotInitialized)?.queue;
        let (buffer, offset) = locate(&mut self.buffers, dst, src.len())?;
        // SAFETY: blocking write of `src.len()` bytes inside the buffer.
        unsafe { queue.enqueue_write_buffer(buffer, CL_BLOCKING, offset, src, &[]) }
            .and_then(|_event| queue.finish())
            .map_err(|e| {
                PlatformError::TransferFailed(format!("writing {} bytes to {}: {}", src.len(), dst, e))
            })
    }

    fn read(&mut self, src: DeviceAddress, dst: &mut [u8]) -> PlatformResult<()> {
        let queue = &self.channel.as_ref().ok_or(PlatformError::NotInitialized)?.queue;
        let (buffer, offset) = locate(&mut self.buffers, src, dst.len())?;
        let len = dst.len();
        // SAFETY: blocking read of `dst.len()` bytes inside the buffer.
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, offset, dst, &[]) }
            .and_then(|_event| queue.finish())
            .map_err(|e| {
                PlatformError::TransferFailed(format!("reading {} bytes from {}: {}", len, src, e))
            })
    }

    fn close(&mut self) -> PlatformResult<()> {
        if !self.buffers.is_empty() {
            tracing::debug!("[{}] Releasing {} buffers", Self::NAME, self.buffers.len());
        }
        self.buffers.clear();
        self.hal = None;
        // HAL handle, kernel, program, then queue and context.
        let released = self.releases.release_all();
        self.channel = None;
        released
    }
}

impl Drop for AlveoDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("[{}] Release on drop failed: {}", Self::NAME, e);
        }
    }
}
