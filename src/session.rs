//! Device Session
//!
//! A [`Session`] is one open connection to one accelerator device. It is
//! created by [`Session::init`] and torn down by [`Session::terminate`] or on
//! drop. Between the two it exposes the platform operation vocabulary:
//! register access, blocking host/device copies, device allocation and host
//! buffer staging.
//!
//! The session tracks every allocation it hands out so that `terminate`
//! can release them before the backend closes.

use std::collections::HashMap;
use std::thread;

use crate::backend::DeviceBackend;
use crate::config::PlatformConfig;
use crate::error::{ErrorCategory, PlatformError, PlatformResult, Status};
use crate::platform::{self, regs, AddressSpace, DeviceAddress, PreparedBuffer};

/// Device Session over backend `B`
pub struct Session<B: DeviceBackend> {
    /// `Some` while the session is Ready
    backend: Option<B>,
    config: PlatformConfig,
    /// Live allocations made through this session: address -> size
    allocations: HashMap<DeviceAddress, usize>,
    /// Outcome of the most recent operation
    last_status: Status,
    /// Category of the most recent failure
    last_error: Option<ErrorCategory>,
}

impl<B: DeviceBackend> std::fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("platform", &B::NAME)
            .field("ready", &self.is_ready())
            .field("live_allocations", &self.allocations.len())
            .field("last_status", &self.last_status)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<B: DeviceBackend> Session<B> {
    /// Open the device described by `config`
    ///
    /// Either every handle is acquired and the session is Ready, or the
    /// error is returned with nothing left behind.
    pub fn init(config: PlatformConfig) -> PlatformResult<Self> {
        config.validate()?;

        tracing::info!(
            "[{}] Initializing platform (bitstream: {}, device: {}, kernel: {})",
            B::NAME,
            config
                .bitstream
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            config.target_device.as_deref().unwrap_or("<any>"),
            config.kernel_name
        );

        let backend = B::open(&config).map_err(|e| {
            tracing::error!(
                "[{}] Platform initialization failed ({}): {}",
                B::NAME,
                e.category(),
                e
            );
            e
        })?;

        tracing::info!(
            "[{}] Platform ready ({:?} address space)",
            B::NAME,
            backend.address_space()
        );

        Ok(Session {
            backend: Some(backend),
            config,
            allocations: HashMap::new(),
            last_status: Status::Ok,
            last_error: None,
        })
    }

    /// Platform name of this backend
    pub fn name(&self) -> &'static str {
        B::NAME
    }

    /// Write the platform name NUL-terminated into `buf`
    pub fn get_name(&self, buf: &mut [u8]) -> Status {
        platform::get_name(B::NAME, buf)
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Address-space model of the open device
    pub fn address_space(&self) -> PlatformResult<AddressSpace> {
        Ok(self.ready_ref()?.address_space())
    }

    /// Status of the most recent operation
    pub fn last_status(&self) -> Status {
        self.last_status
    }

    /// Category of the most recent failed operation, kept until the next
    /// failure replaces it
    pub fn last_error(&self) -> Option<ErrorCategory> {
        self.last_error
    }

    /// Direct access to the backend for backend-specific queries
    pub fn backend(&self) -> PlatformResult<&B> {
        self.ready_ref()
    }

    /// Read the 32-bit register at register index `offset`
    pub fn read_mmio(&mut self, offset: u64) -> PlatformResult<u32> {
        self.track(|s| {
            let delay = s.config.status_poll_delay.filter(|_| offset == regs::REG_STATUS);
            let backend = s.ready_mut()?;
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            let value = backend.read_register(offset)?;
            tracing::trace!("[{}] Read register {}: 0x{:08X}", B::NAME, offset, value);
            Ok(value)
        })
    }

    /// Write `value` to the 32-bit register at register index `offset`
    pub fn write_mmio(&mut self, offset: u64, value: u32) -> PlatformResult<()> {
        self.track(|s| {
            tracing::trace!("[{}] Write register {}: 0x{:08X}", B::NAME, offset, value);
            s.ready_mut()?.write_register(offset, value)
        })
    }

    /// Copy `src` to device memory at `dst`; returns once the copy is complete
    pub fn copy_host_to_device(&mut self, src: &[u8], dst: DeviceAddress) -> PlatformResult<()> {
        self.track(|s| {
            tracing::debug!(
                "[{}] Copying {} bytes from host {:p} to device {}",
                B::NAME,
                src.len(),
                src.as_ptr(),
                dst
            );
            let backend = s.ready_mut()?;
            if src.is_empty() {
                return Ok(());
            }
            backend.write(dst, src)
        })
    }

    /// Copy device memory at `src` into `dst`; returns once `dst` is filled
    pub fn copy_device_to_host(
        &mut self,
        src: DeviceAddress,
        dst: &mut [u8],
    ) -> PlatformResult<()> {
        self.track(|s| {
            tracing::debug!(
                "[{}] Copying {} bytes from device {} to host {:p}",
                B::NAME,
                dst.len(),
                src,
                dst.as_ptr()
            );
            let backend = s.ready_mut()?;
            if dst.is_empty() {
                return Ok(());
            }
            backend.read(src, dst)
        })
    }

    /// Allocate `size` bytes of device memory
    pub fn device_malloc(&mut self, size: usize) -> PlatformResult<DeviceAddress> {
        self.track(|s| {
            let alignment = s.config.device_alignment;
            let address = s.ready_mut()?.allocate(size)?;

            if !address.is_aligned_to(alignment) {
                // Never hand out a misaligned buffer; give it back first.
                if let Err(e) = s.ready_mut()?.free(address) {
                    tracing::warn!(
                        "[{}] Failed to release misaligned {}: {}",
                        B::NAME,
                        address,
                        e
                    );
                }
                return Err(PlatformError::AllocationFailed(format!(
                    "backend returned {} which is not {}-byte aligned",
                    address, alignment
                )));
            }

            s.allocations.insert(address, size);
            tracing::debug!("[{}] Allocated {} bytes at device {}", B::NAME, size, address);
            Ok(address)
        })
    }

    /// Release an allocation made by this session
    pub fn device_free(&mut self, address: DeviceAddress) -> PlatformResult<()> {
        self.track(|s| {
            let backend = s.backend.as_mut().ok_or(PlatformError::NotInitialized)?;
            let size = s
                .allocations
                .remove(&address)
                .ok_or(PlatformError::InvalidAddress(address.as_u64()))?;
            backend.free(address)?;
            tracing::debug!("[{}] Freed {} bytes at device {}", B::NAME, size, address);
            Ok(())
        })
    }

    /// Make `host` addressable by the device
    ///
    /// On a shared address-space device the buffer is aliased in place and
    /// `allocated` is false; the alias is a valid copy target until
    /// terminate. On a disjoint device the data is copied into a new
    /// allocation that the caller must free with [`Session::device_free`].
    pub fn prepare_host_buffer(&mut self, host: &[u8]) -> PlatformResult<PreparedBuffer> {
        self.track(|s| {
            let backend = s.ready_mut()?;
            match backend.address_space() {
                AddressSpace::Shared => {
                    let address = backend.alias_host(host)?;
                    tracing::debug!(
                        "[{}] Prepared host buffer {:p} ({} bytes) in place",
                        B::NAME,
                        host.as_ptr(),
                        host.len()
                    );
                    Ok(PreparedBuffer {
                        address,
                        allocated: false,
                    })
                }
                AddressSpace::Disjoint => {
                    let address = s.stage(host)?;
                    Ok(PreparedBuffer {
                        address,
                        allocated: true,
                    })
                }
            }
        })
    }

    /// Copy `host` into a new device allocation regardless of address space
    pub fn cache_host_buffer(&mut self, host: &[u8]) -> PlatformResult<DeviceAddress> {
        self.track(|s| s.stage(host))
    }

    /// Total bytes held by live session allocations
    pub fn allocated_bytes(&self) -> usize {
        self.allocations.values().sum()
    }

    /// Number of live session allocations
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Release every handle and return to the uninitialized state
    ///
    /// Remaining allocations are freed before the backend closes. Calling
    /// this on an already terminated session is a no-op.
    pub fn terminate(&mut self) -> PlatformResult<()> {
        self.track(Self::release)
    }

    fn release(&mut self) -> PlatformResult<()> {
        let Some(mut backend) = self.backend.take() else {
            tracing::debug!("[{}] Terminate on an uninitialized session", B::NAME);
            return Ok(());
        };

        tracing::info!(
            "[{}] Terminating platform ({} live allocations)",
            B::NAME,
            self.allocations.len()
        );

        let mut first_error = None;
        for (address, size) in self.allocations.drain() {
            if let Err(e) = backend.free(address) {
                tracing::error!(
                    "[{}] Failed to free {} bytes at {} during terminate: {}",
                    B::NAME,
                    size,
                    address,
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = backend.close() {
            tracing::error!("[{}] Failed to close device: {}", B::NAME, e);
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("[{}] Platform terminated", B::NAME);
                Ok(())
            }
        }
    }

    /// Allocate and copy `host` to the device, undoing the allocation if
    /// the copy fails
    fn stage(&mut self, host: &[u8]) -> PlatformResult<DeviceAddress> {
        let address = self.device_malloc(host.len())?;
        if let Err(e) = self.copy_host_to_device(host, address) {
            if let Err(free_err) = self.device_free(address) {
                tracing::warn!(
                    "[{}] Failed to release staging buffer {}: {}",
                    B::NAME,
                    address,
                    free_err
                );
            }
            return Err(e);
        }
        tracing::debug!(
            "[{}] Staged host buffer {:p} ({} bytes) at device {}",
            B::NAME,
            host.as_ptr(),
            host.len(),
            address
        );
        Ok(address)
    }

    /// Run one operation and record its outcome
    fn track<T>(&mut self, op: impl FnOnce(&mut Self) -> PlatformResult<T>) -> PlatformResult<T> {
        let result = op(self);
        match &result {
            Ok(_) => self.last_status = Status::Ok,
            Err(e) => {
                self.last_status = Status::Error;
                self.last_error = Some(e.category());
            }
        }
        result
    }

    fn ready_ref(&self) -> PlatformResult<&B> {
        self.backend.as_ref().ok_or(PlatformError::NotInitialized)
    }

    fn ready_mut(&mut self) -> PlatformResult<&mut B> {
        self.backend.as_mut().ok_or(PlatformError::NotInitialized)
    }
}

impl<B: DeviceBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            tracing::error!("[{}] Terminate on drop failed: {}", B::NAME, e);
        }
    }
}
