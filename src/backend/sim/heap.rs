//! Device memory of the software device model (disjoint address space)
//!
//! One contiguous byte arena subdivided by a best-fit allocator. Free blocks
//! are kept sorted by offset and merged with their neighbours on every
//! change, so freeing an allocation restores the exact free list that
//! existed before it was made.

use std::collections::BTreeMap;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::DeviceAddress;

/// Device address of the first byte of the arena
///
/// Kept away from zero so device addresses never collide with null or with
/// small host-looking integers.
pub const HEAP_BASE: u64 = 0x1_0000_0000;

/// Free region within the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// Byte offset from arena start
    pub offset: usize,
    /// Size in bytes
    pub size: usize,
}

impl FreeBlock {
    fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    fn is_adjacent_to(&self, other: &FreeBlock) -> bool {
        self.offset + self.size == other.offset
    }
}

/// Byte arena with an aligned best-fit allocator
#[derive(Debug)]
pub struct DeviceHeap {
    memory: Vec<u8>,
    alignment: usize,
    free_blocks: Vec<FreeBlock>,
    /// Live allocations: offset -> size
    allocations: BTreeMap<usize, usize>,
    allocated: usize,
}

impl DeviceHeap {
    /// Create a zero-filled arena of `capacity` bytes
    pub fn new(capacity: usize, alignment: usize) -> PlatformResult<Self> {
        if capacity == 0 {
            return Err(PlatformError::AllocationFailed(
                "device heap capacity cannot be zero".to_string(),
            ));
        }
        if !alignment.is_power_of_two() {
            return Err(PlatformError::AllocationFailed(format!(
                "alignment must be a power of two, got {}",
                alignment
            )));
        }

        tracing::debug!(
            "DeviceHeap created: {} KiB at base 0x{:X}, alignment {}",
            capacity / 1024,
            HEAP_BASE,
            alignment
        );

        Ok(Self {
            memory: vec![0u8; capacity],
            alignment,
            free_blocks: vec![FreeBlock::new(0, capacity)],
            allocations: BTreeMap::new(),
            allocated: 0,
        })
    }

    /// Allocate `size` bytes; zero-sized requests reserve one byte so the
    /// returned address is unique
    pub fn allocate(&mut self, size: usize) -> PlatformResult<DeviceAddress> {
        let size = size.max(1);

        let best_idx = self.find_best_fit(size).ok_or_else(|| {
            PlatformError::AllocationFailed(format!(
                "insufficient device memory: need {} bytes, {} free in {} fragments",
                size,
                self.remaining_capacity(),
                self.free_blocks.len()
            ))
        })?;

        let block = self.free_blocks.remove(best_idx);
        let offset = align_up(block.offset, self.alignment);
        let padding = offset - block.offset;
        let remaining = block.size - padding - size;

        if padding > 0 {
            self.free_blocks.push(FreeBlock::new(block.offset, padding));
        }
        if remaining > 0 {
            self.free_blocks.push(FreeBlock::new(offset + size, remaining));
        }
        self.sort_free_blocks();

        self.allocations.insert(offset, size);
        self.allocated += size;

        tracing::trace!(
            "DeviceHeap allocated {} bytes at offset {} (alignment={})",
            size,
            offset,
            self.alignment
        );
        Ok(Self::address_of(offset))
    }

    /// Return an allocation to the free list
    pub fn free(&mut self, address: DeviceAddress) -> PlatformResult<()> {
        let offset = self
            .offset_of(address)
            .ok_or(PlatformError::InvalidAddress(address.as_u64()))?;
        let size = self
            .allocations
            .remove(&offset)
            .ok_or(PlatformError::InvalidAddress(address.as_u64()))?;

        self.allocated -= size;
        self.free_blocks.push(FreeBlock::new(offset, size));
        self.sort_free_blocks();

        tracing::trace!("DeviceHeap freed {} bytes at offset {}", size, offset);
        Ok(())
    }

    /// Copy `src` into the arena at `address`
    pub fn write(&mut self, address: DeviceAddress, src: &[u8]) -> PlatformResult<()> {
        let start = self.checked_range(address, src.len())?;
        self.memory[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copy arena bytes at `address` into `dst`
    pub fn read(&self, address: DeviceAddress, dst: &mut [u8]) -> PlatformResult<()> {
        let start = self.checked_range(address, dst.len())?;
        dst.copy_from_slice(&self.memory[start..start + dst.len()]);
        Ok(())
    }

    /// Drop every allocation
    pub fn reset(&mut self) {
        self.allocations.clear();
        self.allocated = 0;
        self.free_blocks = vec![FreeBlock::new(0, self.memory.len())];
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    pub fn remaining_capacity(&self) -> usize {
        self.free_blocks.iter().map(|b| b.size).sum()
    }

    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Snapshot of the free list, sorted by offset
    pub fn free_blocks(&self) -> &[FreeBlock] {
        &self.free_blocks
    }

    fn address_of(offset: usize) -> DeviceAddress {
        DeviceAddress(HEAP_BASE + offset as u64)
    }

    fn offset_of(&self, address: DeviceAddress) -> Option<usize> {
        let rel = address.as_u64().checked_sub(HEAP_BASE)?;
        let rel = usize::try_from(rel).ok()?;
        (rel < self.memory.len()).then_some(rel)
    }

    /// Validate that `[address, address + len)` lies inside one live allocation
    fn checked_range(&self, address: DeviceAddress, len: usize) -> PlatformResult<usize> {
        let offset = self
            .offset_of(address)
            .ok_or(PlatformError::InvalidAddress(address.as_u64()))?;
        let (&start, &size) = self
            .allocations
            .range(..=offset)
            .next_back()
            .ok_or(PlatformError::InvalidAddress(address.as_u64()))?;
        if offset >= start + size {
            return Err(PlatformError::InvalidAddress(address.as_u64()));
        }
        let end = offset
            .checked_add(len)
            .ok_or(PlatformError::InvalidAddress(address.as_u64()))?;
        if end > start + size {
            return Err(PlatformError::TransferFailed(format!(
                "{} bytes at {} overrun the {}-byte allocation at {}",
                len,
                address,
                size,
                Self::address_of(start)
            )));
        }
        Ok(offset)
    }

    /// Smallest free block that fits `size` bytes after alignment padding
    fn find_best_fit(&self, size: usize) -> Option<usize> {
        self.free_blocks
            .iter()
            .enumerate()
            .filter_map(|(idx, block)| {
                let aligned_offset = align_up(block.offset, self.alignment);
                if aligned_offset >= block.offset + block.size {
                    return None;
                }
                let padding = aligned_offset - block.offset;
                let usable = block.size - padding;
                (usable >= size).then_some((idx, usable))
            })
            .min_by_key(|&(_, usable)| usable)
            .map(|(idx, _)| idx)
    }

    fn sort_free_blocks(&mut self) {
        self.free_blocks.sort_by_key(|b| b.offset);
        self.coalesce_free_blocks();
    }

    fn coalesce_free_blocks(&mut self) {
        let mut i = 0;
        while i + 1 < self.free_blocks.len() {
            let current = self.free_blocks[i];
            let next = self.free_blocks[i + 1];
            if current.is_adjacent_to(&next) {
                self.free_blocks[i].size += next.size;
                self.free_blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }
}

/// Align `offset` up to `alignment` (a power of two)
fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}
