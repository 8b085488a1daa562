//! Host-backed allocations for the shared address-space model
//!
//! On a shared address-space device the device dereferences host virtual
//! addresses directly, so "device memory" is aligned host memory and a
//! device address is a host pointer. Caller buffers handed out in place are
//! recorded as aliases and stay addressable until the device closes.

use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::ptr;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::DeviceAddress;

/// Aligned host allocations owned by the shared-memory device model
#[derive(Debug)]
pub struct HostAllocations {
    alignment: usize,
    /// Live allocations: host address -> layout
    live: BTreeMap<u64, Layout>,
    /// Caller buffers aliased in place: host address -> length
    aliases: BTreeMap<u64, usize>,
}

// SAFETY: the maps hold plain addresses. Owned allocations are only touched
// through `&mut self`; aliased buffers are the caller's, who keeps them valid
// while the device may address them.
unsafe impl Send for HostAllocations {}

impl HostAllocations {
    pub fn new(alignment: usize) -> PlatformResult<Self> {
        if !alignment.is_power_of_two() {
            return Err(PlatformError::AllocationFailed(format!(
                "alignment must be a power of two, got {}",
                alignment
            )));
        }
        Ok(Self {
            alignment,
            live: BTreeMap::new(),
            aliases: BTreeMap::new(),
        })
    }

    /// Allocate `size` zeroed bytes aligned to the configured alignment
    pub fn allocate(&mut self, size: usize) -> PlatformResult<DeviceAddress> {
        let layout = Layout::from_size_align(size.max(1), self.alignment)
            .map_err(|e| PlatformError::AllocationFailed(e.to_string()))?;

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(PlatformError::AllocationFailed(format!(
                "host allocator returned null for {} bytes",
                size
            )));
        }

        let addr = ptr as u64;
        self.live.insert(addr, layout);
        Ok(DeviceAddress(addr))
    }

    pub fn free(&mut self, address: DeviceAddress) -> PlatformResult<()> {
        let layout = self
            .live
            .remove(&address.as_u64())
            .ok_or(PlatformError::InvalidAddress(address.as_u64()))?;
        // SAFETY: the address came from alloc_zeroed with this exact layout
        // and was just removed from the live set, so it is freed once.
        unsafe { alloc::dealloc(address.as_u64() as *mut u8, layout) };
        Ok(())
    }

    /// Make the caller's buffer addressable in place
    pub fn alias(&mut self, host: &[u8]) -> DeviceAddress {
        let addr = host.as_ptr() as u64;
        let len = self.aliases.entry(addr).or_insert(0);
        *len = (*len).max(host.len());
        DeviceAddress(addr)
    }

    pub fn write(&mut self, address: DeviceAddress, src: &[u8]) -> PlatformResult<()> {
        self.check_range(address, src.len())?;
        let dst = address.as_u64() as *mut u8;
        if ptr::eq(src.as_ptr(), dst) {
            return Ok(());
        }
        // SAFETY: the range lies inside a live allocation or a recorded
        // alias. `ptr::copy` allows `src` to overlap an aliased buffer.
        unsafe { ptr::copy(src.as_ptr(), dst, src.len()) };
        Ok(())
    }

    pub fn read(&self, address: DeviceAddress, dst: &mut [u8]) -> PlatformResult<()> {
        self.check_range(address, dst.len())?;
        let src = address.as_u64() as *const u8;
        if ptr::eq(src, dst.as_ptr()) {
            return Ok(());
        }
        // SAFETY: as in `write`.
        unsafe { ptr::copy(src, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn live_aliases(&self) -> usize {
        self.aliases.len()
    }

    /// Free every live allocation and forget every alias
    pub fn release_all(&mut self) {
        self.aliases.clear();
        for (addr, layout) in std::mem::take(&mut self.live) {
            // SAFETY: each entry is a live allocation with its own layout.
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }

    /// Allocation or alias containing `addr`: (start, size)
    fn region(&self, addr: u64) -> Option<(u64, usize)> {
        let owned = self
            .live
            .range(..=addr)
            .next_back()
            .map(|(&start, layout)| (start, layout.size()));
        let aliased = self
            .aliases
            .range(..=addr)
            .next_back()
            .map(|(&start, &len)| (start, len));
        [owned, aliased]
            .into_iter()
            .flatten()
            .find(|&(start, size)| addr < start + size as u64)
    }

    fn check_range(&self, address: DeviceAddress, len: usize) -> PlatformResult<()> {
        let addr = address.as_u64();
        let (start, size) = self
            .region(addr)
            .ok_or(PlatformError::InvalidAddress(addr))?;
        let end = addr
            .checked_add(len as u64)
            .ok_or(PlatformError::InvalidAddress(addr))?;
        if end > start + size as u64 {
            return Err(PlatformError::TransferFailed(format!(
                "{} bytes at {} overrun the {}-byte region at 0x{:016X}",
                len, address, size, start
            )));
        }
        Ok(())
    }
}

impl Drop for HostAllocations {
    fn drop(&mut self) {
        self.release_all();
    }
}
