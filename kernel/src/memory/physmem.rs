//! Byte access to physical memory.
//!
//! The address-space code zero-fills and copies whole regions by physical
//! address. On hardware that goes through the kernel direct map; under test
//! it goes to a heap-backed image of RAM.

use alloc::{vec, vec::Vec};

use spin::Mutex;
use x86_64::{PhysAddr, VirtAddr};

pub trait PhysicalMemory: Send + Sync {
    /// Fills `len` bytes starting at `base` with zeroes.
    fn zero(&self, base: PhysAddr, len: usize);

    /// Copies `len` bytes from `src` to `dst`. The ranges must not overlap.
    fn copy(&self, src: PhysAddr, dst: PhysAddr, len: usize);

    fn read(&self, addr: PhysAddr, buf: &mut [u8]);

    fn write(&self, addr: PhysAddr, data: &[u8]);
}

/// Heap-backed image of physical RAM, addressed from 0.
pub struct RamImage {
    bytes: Mutex<Vec<u8>>,
}

impl RamImage {
    pub fn new(size: usize) -> Self {
        RamImage {
            bytes: Mutex::new(vec![0; size]),
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.lock().len()
    }

    fn span(addr: PhysAddr, len: usize) -> core::ops::Range<usize> {
        let start = addr.as_u64() as usize;
        start..start + len
    }
}

impl PhysicalMemory for RamImage {
    fn zero(&self, base: PhysAddr, len: usize) {
        self.bytes.lock()[Self::span(base, len)].fill(0);
    }

    fn copy(&self, src: PhysAddr, dst: PhysAddr, len: usize) {
        let from = Self::span(src, len);
        let to = Self::span(dst, len);
        assert!(
            from.end <= to.start || to.end <= from.start,
            "overlapping physical copy"
        );
        self.bytes.lock().copy_within(from, to.start);
    }

    fn read(&self, addr: PhysAddr, buf: &mut [u8]) {
        buf.copy_from_slice(&self.bytes.lock()[Self::span(addr, buf.len())]);
    }

    fn write(&self, addr: PhysAddr, data: &[u8]) {
        self.bytes.lock()[Self::span(addr, data.len())].copy_from_slice(data);
    }
}

/// Physical memory seen through a fixed kernel direct map.
pub struct DirectMap {
    offset: VirtAddr,
}

impl DirectMap {
    /// # Safety
    ///
    /// Every physical address passed to this accessor must be mapped
    /// read-write at `offset + addr` for the lifetime of the value.
    pub unsafe fn new(offset: VirtAddr) -> Self {
        DirectMap { offset }
    }

    fn ptr(&self, addr: PhysAddr) -> *mut u8 {
        (self.offset + addr.as_u64()).as_mut_ptr()
    }
}

impl PhysicalMemory for DirectMap {
    fn zero(&self, base: PhysAddr, len: usize) {
        unsafe { core::ptr::write_bytes(self.ptr(base), 0, len) }
    }

    fn copy(&self, src: PhysAddr, dst: PhysAddr, len: usize) {
        unsafe { core::ptr::copy_nonoverlapping(self.ptr(src), self.ptr(dst), len) }
    }

    fn read(&self, addr: PhysAddr, buf: &mut [u8]) {
        unsafe { core::ptr::copy_nonoverlapping(self.ptr(addr), buf.as_mut_ptr(), buf.len()) }
    }

    fn write(&self, addr: PhysAddr, data: &[u8]) {
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr(addr), data.len()) }
    }
}
