//! Software device model
//!
//! Stands in for an accelerator card in simulation and emulation setups and
//! in tests. It models either address-space configuration:
//!
//! - `Disjoint`: device memory is a private arena ([`heap::DeviceHeap`]);
//!   every transfer is an explicit copy.
//! - `Shared`: device memory is aligned host memory
//!   ([`host::HostAllocations`]) and host buffers can be aliased directly.

pub mod heap;
pub mod host;
pub mod registers;

use crate::backend::{load_bitstream, DeviceBackend};
use crate::config::PlatformConfig;
use crate::error::{PlatformError, PlatformResult};
use crate::platform::{AddressSpace, DeviceAddress, SIM_PLATFORM_NAME};

use heap::DeviceHeap;
use host::HostAllocations;
use registers::RegisterFile;

#[derive(Debug)]
enum SimMemory {
    Disjoint(DeviceHeap),
    Shared(HostAllocations),
}

/// Software accelerator device
#[derive(Debug)]
pub struct SimDevice {
    registers: RegisterFile,
    memory: Option<SimMemory>,
    bitstream_bytes: usize,
}

impl SimDevice {
    /// Size of the bitstream image accepted at open, 0 if none was given
    pub fn bitstream_bytes(&self) -> usize {
        self.bitstream_bytes
    }

    /// Bytes currently allocated on the device
    pub fn allocated_bytes(&self) -> usize {
        match &self.memory {
            Some(SimMemory::Disjoint(heap)) => heap.allocated_bytes(),
            Some(SimMemory::Shared(_)) | None => 0,
        }
    }

    /// Number of live device allocations
    pub fn live_allocations(&self) -> usize {
        match &self.memory {
            Some(SimMemory::Disjoint(heap)) => heap.live_allocations(),
            Some(SimMemory::Shared(host)) => host.live_allocations(),
            None => 0,
        }
    }

    fn memory_mut(&mut self) -> PlatformResult<&mut SimMemory> {
        self.memory.as_mut().ok_or(PlatformError::NotInitialized)
    }
}

impl DeviceBackend for SimDevice {
    const NAME: &'static str = SIM_PLATFORM_NAME;

    fn open(config: &PlatformConfig) -> PlatformResult<Self> {
        tracing::info!(
            "[{}] Opening software device ({:?} address space, {} KiB, {} registers)",
            Self::NAME,
            config.address_space,
            config.sim_memory_bytes / 1024,
            config.sim_register_count
        );

        // The image is only checked for readability; nothing executes it.
        let bitstream_bytes = match &config.bitstream {
            Some(path) => load_bitstream(path)?.len(),
            None => 0,
        };

        let memory = match config.address_space {
            AddressSpace::Disjoint => SimMemory::Disjoint(DeviceHeap::new(
                config.sim_memory_bytes,
                config.device_alignment,
            )?),
            AddressSpace::Shared => {
                SimMemory::Shared(HostAllocations::new(config.device_alignment)?)
            }
        };

        Ok(SimDevice {
            registers: RegisterFile::new(config.sim_register_count),
            memory: Some(memory),
            bitstream_bytes,
        })
    }

    fn address_space(&self) -> AddressSpace {
        match &self.memory {
            Some(SimMemory::Shared(_)) => AddressSpace::Shared,
            _ => AddressSpace::Disjoint,
        }
    }

    fn read_register(&mut self, index: u64) -> PlatformResult<u32> {
        self.registers.read(index)
    }

    fn write_register(&mut self, index: u64, value: u32) -> PlatformResult<()> {
        self.registers.write(index, value)
    }

    fn allocate(&mut self, size: usize) -> PlatformResult<DeviceAddress> {
        match self.memory_mut()? {
            SimMemory::Disjoint(heap) => heap.allocate(size),
            SimMemory::Shared(host) => host.allocate(size),
        }
    }

    fn free(&mut self, address: DeviceAddress) -> PlatformResult<()> {
        match self.memory_mut()? {
            SimMemory::Disjoint(heap) => heap.free(address),
            SimMemory::Shared(host) => host.free(address),
        }
    }

    fn write(&mut self, dst: DeviceAddress, src: &[u8]) -> PlatformResult<()> {
        match self.memory_mut()? {
            SimMemory::Disjoint(heap) => heap.write(dst, src),
            SimMemory::Shared(host) => host.write(dst, src),
        }
    }

    fn read(&mut self, src: DeviceAddress, dst: &mut [u8]) -> PlatformResult<()> {
        match self.memory_mut()? {
            SimMemory::Disjoint(heap) => heap.read(src, dst),
            SimMemory::Shared(host) => host.read(src, dst),
        }
    }

    fn alias_host(&mut self, host: &[u8]) -> PlatformResult<DeviceAddress> {
        match &mut self.memory {
            Some(SimMemory::Shared(shared)) => Ok(shared.alias(host)),
            Some(SimMemory::Disjoint(_)) => {
                Err(PlatformError::Unsupported("host aliasing on a disjoint device"))
            }
            None => Err(PlatformError::NotInitialized),
        }
    }

    fn close(&mut self) -> PlatformResult<()> {
        match self.memory.take() {
            Some(SimMemory::Disjoint(mut heap)) => {
                if heap.live_allocations() > 0 {
                    tracing::warn!(
                        "[{}] Closing with {} live allocations ({} bytes)",
                        Self::NAME,
                        heap.live_allocations(),
                        heap.allocated_bytes()
                    );
                }
                heap.reset();
            }
            Some(SimMemory::Shared(mut host)) => host.release_all(),
            None => {}
        }
        tracing::debug!("[{}] Software device closed", Self::NAME);
        Ok(())
    }
}
