//! Boot Frame Allocator
//!
//! - Hands out contiguous frames from RAM nobody has touched yet
//! - One-way: frames taken here are never given back to this allocator
//! - Serves every allocation before the frame table exists, and is the
//!   fallback when the free list cannot satisfy a request afterwards

use core::ops::Range;

use limine::{memory_map::EntryType, response::MemoryMapResponse};
use x86_64::PhysAddr;

use crate::constants::memory::PAGE_SIZE;

/// Source of never-yet-touched physical frames.
pub trait StealMem: Send {
    /// Size of physical memory in bytes (the top of RAM).
    fn ram_size(&self) -> u64;

    /// Reserves `pages` contiguous frames, or `None` once untouched RAM runs out.
    fn steal(&mut self, pages: usize) -> Option<PhysAddr>;

    /// First address not yet handed out.
    fn first_free(&self) -> PhysAddr;

    /// Number of frames still untouched.
    fn remaining(&self) -> usize;
}

/// Bump allocator over a single range of untouched RAM
///
/// * `next`: the first byte not yet handed out
/// * `end`: one past the last usable byte
/// * `ram_top`: top of physical memory, reported as the RAM size
#[derive(Debug)]
pub struct BootFrameAllocator {
    next: u64,
    end: u64,
    ram_top: u64,
}

impl BootFrameAllocator {
    /// Creates a bump allocator over `untouched`, trimmed to whole frames.
    /// The RAM size is the end of that range.
    pub fn new(untouched: Range<u64>) -> Self {
        Self::with_ram_top(untouched.clone(), untouched.end)
    }

    /// Like [`BootFrameAllocator::new`], for RAM extending past the untouched range.
    pub fn with_ram_top(untouched: Range<u64>, ram_top: u64) -> Self {
        let next = untouched.start.next_multiple_of(PAGE_SIZE);
        let end = untouched.end & !(PAGE_SIZE - 1);
        assert!(end <= ram_top, "untouched RAM extends past the top of memory");

        BootFrameAllocator {
            next: next.min(end),
            end,
            ram_top,
        }
    }

    /// Builds the allocator from the Limine memory map.
    ///
    /// The largest usable entry becomes the untouched range, skipping anything
    /// below `kernel_end`. The top of the highest usable entry is the RAM size.
    pub fn from_memory_map(memory_map: &MemoryMapResponse, kernel_end: u64) -> Self {
        let mut ram_top = 0;
        let mut largest = 0..0;

        for entry in memory_map
            .entries()
            .iter()
            .filter(|entry| entry.entry_type == EntryType::USABLE)
        {
            let end = entry.base + entry.length;
            ram_top = ram_top.max(end);

            let start = entry.base.max(kernel_end);
            if start < end && end - start > largest.end - largest.start {
                largest = start..end;
            }
        }

        crate::debug!(
            "boot allocator: untouched RAM {:#x}..{:#x}, top of memory {:#x}",
            largest.start,
            largest.end,
            ram_top
        );

        Self::with_ram_top(largest, ram_top)
    }
}

impl StealMem for BootFrameAllocator {
    fn ram_size(&self) -> u64 {
        self.ram_top
    }

    fn steal(&mut self, pages: usize) -> Option<PhysAddr> {
        if pages == 0 {
            return None;
        }

        let size = (pages as u64).checked_mul(PAGE_SIZE)?;
        let top = self.next.checked_add(size)?;
        if top > self.end {
            return None;
        }

        let base = self.next;
        self.next = top;
        Some(PhysAddr::new(base))
    }

    fn first_free(&self) -> PhysAddr {
        PhysAddr::new(self.next)
    }

    fn remaining(&self) -> usize {
        ((self.end - self.next) / PAGE_SIZE) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steals_consecutive_runs() {
        let mut boot = BootFrameAllocator::new(0x4000..0x10000);
        assert_eq!(boot.remaining(), 12);

        assert_eq!(boot.steal(2), Some(PhysAddr::new(0x4000)));
        assert_eq!(boot.steal(3), Some(PhysAddr::new(0x6000)));
        assert_eq!(boot.first_free(), PhysAddr::new(0x9000));
        assert_eq!(boot.remaining(), 7);
    }

    #[test]
    fn exhaustion_returns_none_and_keeps_state() {
        let mut boot = BootFrameAllocator::new(0..0x3000);
        assert_eq!(boot.steal(4), None);
        assert_eq!(boot.remaining(), 3);
        assert_eq!(boot.steal(3), Some(PhysAddr::new(0)));
        assert_eq!(boot.steal(1), None);
    }

    #[test]
    fn unaligned_range_is_trimmed_to_frames() {
        let boot = BootFrameAllocator::with_ram_top(0x1234..0x5678, 0x10000);
        assert_eq!(boot.first_free(), PhysAddr::new(0x2000));
        assert_eq!(boot.remaining(), 3);
        assert_eq!(boot.ram_size(), 0x10000);
    }

    #[test]
    fn zero_pages_is_not_a_reservation() {
        let mut boot = BootFrameAllocator::new(0..0x2000);
        assert_eq!(boot.steal(0), None);
        assert_eq!(boot.remaining(), 2);
    }
}
