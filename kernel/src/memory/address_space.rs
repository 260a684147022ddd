//! Per-process address space: up to two program regions and a fixed stack.
//!
//! Each region is backed by one contiguous run of frames, so translation is a
//! constant offset from the region's virtual base to its physical base.

use alloc::sync::Arc;
use core::iter;

use arrayvec::ArrayVec;
use x86_64::{PhysAddr, VirtAddr};

use crate::{
    constants::memory::PAGE_SIZE,
    interrupts::InterruptControl,
    memory::{Mmu, TranslationCache, Vm, VmError},
};

/// Program regions an address space can hold, besides the stack.
pub const MAX_REGIONS: usize = 2;

/// Access a region was defined with.
///
/// Recorded but not enforced: every mapped page is readable and writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protection(u8);

impl Protection {
    pub const READ: u8 = 1 << 0;
    pub const WRITE: u8 = 1 << 1;
    pub const EXEC: u8 = 1 << 2;

    pub const fn new() -> Self {
        Protection(0)
    }

    pub const fn with_flags(self, flag: u8) -> Self {
        Protection(self.0 | flag)
    }

    pub const fn contains(self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Page-aligned virtual range backed by a contiguous physical run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    base: VirtAddr,
    pages: usize,
    frame: Option<PhysAddr>,
    protection: Protection,
}

impl Region {
    pub fn new(base: VirtAddr, pages: usize, protection: Protection) -> Self {
        assert!(base.is_aligned(PAGE_SIZE), "unaligned region base {:#x}", base.as_u64());
        Region {
            base,
            pages,
            frame: None,
            protection,
        }
    }

    pub fn base(&self) -> VirtAddr {
        self.base
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn size(&self) -> u64 {
        self.pages as u64 * PAGE_SIZE
    }

    /// One past the last address of the region.
    pub fn top(&self) -> VirtAddr {
        self.base + self.size()
    }

    /// Physical base of the backing run; `None` until loaded.
    pub fn frame(&self) -> Option<PhysAddr> {
        self.frame
    }

    pub fn protection(&self) -> Protection {
        self.protection
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.base && addr < self.top()
    }

    /// Physical address backing `addr`, at the same offset from the frame
    /// base as `addr` is from the region base.
    pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
        if !self.contains(addr) {
            return None;
        }
        Some(self.frame? + (addr - self.base))
    }
}

/// Address space of one process
///
/// * `regions`: program regions in definition order
/// * `stack`: fixed window just below the top of user space
pub struct AddressSpace {
    vm: Arc<Vm>,
    regions: ArrayVec<Region, MAX_REGIONS>,
    stack: Region,
}

impl AddressSpace {
    /// Creates an empty address space with nothing backed.
    pub fn create(vm: &Arc<Vm>) -> Self {
        let config = vm.config();
        AddressSpace {
            vm: Arc::clone(vm),
            regions: ArrayVec::new(),
            stack: Region::new(
                config.stack_base(),
                config.stack_pages,
                Protection::new()
                    .with_flags(Protection::READ)
                    .with_flags(Protection::WRITE),
            ),
        }
    }

    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn stack(&self) -> &Region {
        &self.stack
    }

    /// Defines the next program region covering `size` bytes at `vaddr`.
    ///
    /// The base is rounded down to a page and the length grown to cover the
    /// misalignment, then rounded up to whole pages.
    pub fn define_region(
        &mut self,
        vaddr: VirtAddr,
        size: usize,
        protection: Protection,
    ) -> Result<(), VmError> {
        self.vm.assert_can_sleep();
        assert!(
            self.stack.frame.is_none(),
            "defining a region after prepare_load"
        );

        let base = vaddr.align_down(PAGE_SIZE);
        let length = (size as u64 + (vaddr - base)).next_multiple_of(PAGE_SIZE);
        let pages = (length / PAGE_SIZE) as usize;
        if pages == 0 {
            return Err(VmError::EmptyRegion);
        }

        if self.regions.is_full() {
            crate::warn!("vm: too many regions, {:#x} not defined", vaddr.as_u64());
            return Err(VmError::TooManyRegions);
        }
        self.regions.push(Region::new(base, pages, protection));
        Ok(())
    }

    /// Backs every region and the stack with fresh zeroed frames.
    ///
    /// Must be called exactly once. On failure, frames already taken stay
    /// recorded in the address space and are released when it is destroyed.
    pub fn prepare_load(&mut self) -> Result<(), VmError> {
        assert!(
            self.stack.frame.is_none() && self.regions.iter().all(|r| r.frame.is_none()),
            "prepare_load called twice"
        );
        self.vm.assert_can_sleep();

        let vm = &self.vm;
        for region in self.regions.iter_mut().chain(iter::once(&mut self.stack)) {
            let frame = vm
                .frames()
                .alloc_frames(region.pages)
                .ok_or(VmError::OutOfMemory)?;
            region.frame = Some(frame);
        }

        for region in self.backed() {
            if let Some(frame) = region.frame {
                vm.ram().zero(frame, region.size() as usize);
            }
        }
        Ok(())
    }

    /// Hook for fixing things up once the program image is in place.
    pub fn complete_load(&mut self) -> Result<(), VmError> {
        self.vm.assert_can_sleep();
        Ok(())
    }

    /// Initial user stack pointer.
    pub fn define_stack(&self) -> VirtAddr {
        assert!(self.stack.frame.is_some(), "stack defined before prepare_load");
        self.stack.top()
    }

    /// Whether the stack and every program region are backed.
    pub fn is_prepared(&self) -> bool {
        self.backed().all(|region| region.frame.is_some())
    }

    /// Duplicates this address space into freshly allocated frames.
    pub fn copy(&self) -> Result<AddressSpace, VmError> {
        self.vm.assert_can_sleep();
        assert!(self.is_prepared(), "copying an address space that was never loaded");

        let mut new = AddressSpace::create(&self.vm);
        new.regions = self
            .regions
            .iter()
            .map(|r| Region::new(r.base, r.pages, r.protection))
            .collect();
        // on failure `new` is dropped here, returning whatever it got
        new.prepare_load()?;

        for (old, fresh) in self.backed().zip(new.backed()) {
            if let (Some(src), Some(dst)) = (old.frame, fresh.frame) {
                self.vm.ram().copy(src, dst, old.size() as usize);
            }
        }
        Ok(new)
    }

    /// Returns every backing frame to the allocator.
    pub fn destroy(self) {
        self.vm.assert_can_sleep();
        drop(self);
    }

    /// Physical address backing `addr`: program regions first, in order, then
    /// the stack window.
    pub fn translate(&self, addr: VirtAddr) -> Option<PhysAddr> {
        self.backed()
            .find(|region| region.contains(addr))
            .and_then(|region| region.translate(addr))
    }

    /// Makes this the address space translated on the core owning `mmu`.
    pub fn activate<T: TranslationCache, I: InterruptControl>(&self, mmu: &mut Mmu<T, I>) {
        mmu.invalidate_all();
    }

    /// Stale translations are left to be refaulted.
    pub fn deactivate(&self) {}

    /// Panics unless the address space is fully loaded and aligned.
    pub(crate) fn assert_populated(&self) {
        for region in self.backed() {
            let frame = region.frame.unwrap_or_else(|| {
                panic!("region at {:#x} is not loaded", region.base.as_u64())
            });
            assert!(region.pages > 0, "empty region at {:#x}", region.base.as_u64());
            assert!(region.base.is_aligned(PAGE_SIZE));
            assert!(frame.is_aligned(PAGE_SIZE));
        }
    }

    fn backed(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().chain(iter::once(&self.stack))
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        for region in self.regions.iter().chain(iter::once(&self.stack)) {
            if let Some(frame) = region.frame {
                self.vm.frames().free_frames(frame, region.pages);
            }
        }
    }
}
