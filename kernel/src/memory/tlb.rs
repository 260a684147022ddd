//! Software-managed translation cache.
//!
//! Entries are only ever written one at a time into a free slot on a fault,
//! or invalidated wholesale when an address space is activated. Nothing is
//! evicted: running out of slots and cross-core shootdown are both fatal.

use x86_64::{PhysAddr, VirtAddr};

use crate::{
    constants::memory::{KSEG0, NUM_TLB, PAGE_FRAME, PAGE_SIZE, TLBLO_DIRTY, TLBLO_VALID},
    interrupts::{InterruptControl, InterruptGuard},
};

/// Low word of a translation entry: frame number plus flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbLo(u64);

impl TlbLo {
    pub const VALID: u64 = TLBLO_VALID;
    pub const DIRTY: u64 = TLBLO_DIRTY;

    pub const fn invalid() -> Self {
        TlbLo(0)
    }

    /// Valid, writable mapping of `frame`.
    pub fn mapping(frame: PhysAddr) -> Self {
        TlbLo(frame.as_u64() | Self::DIRTY | Self::VALID)
    }

    pub const fn contains(self, flag: u64) -> bool {
        (self.0 & flag) != 0
    }

    pub fn frame(self) -> PhysAddr {
        PhysAddr::new(self.0 & PAGE_FRAME)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }
}

/// One translation: virtual page tag (`hi`) and frame plus flags (`lo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub hi: VirtAddr,
    pub lo: TlbLo,
}

impl TlbEntry {
    /// Invalid entry for `slot`. Every slot gets a distinct tag in unmapped
    /// kernel space so no two entries can ever match the same address.
    pub fn invalid(slot: usize) -> Self {
        TlbEntry {
            hi: VirtAddr::new(KSEG0 + slot as u64 * PAGE_SIZE),
            lo: TlbLo::invalid(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lo.contains(TlbLo::VALID)
    }
}

/// A core's translation cache
pub trait TranslationCache {
    fn slots(&self) -> usize;

    fn read(&self, slot: usize) -> TlbEntry;

    fn write(&mut self, slot: usize, entry: TlbEntry);
}

/// In-memory translation cache with `N` slots.
#[derive(Debug, Clone)]
pub struct SoftTlb<const N: usize = NUM_TLB> {
    entries: [TlbEntry; N],
}

impl<const N: usize> Default for SoftTlb<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SoftTlb<N> {
    pub fn new() -> Self {
        SoftTlb {
            entries: core::array::from_fn(TlbEntry::invalid),
        }
    }

    /// Frame a valid entry maps `page` to, if any.
    pub fn translate(&self, page: VirtAddr) -> Option<PhysAddr> {
        self.entries
            .iter()
            .find(|entry| entry.is_valid() && entry.hi == page)
            .map(|entry| entry.lo.frame())
    }

    pub fn valid_entries(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_valid()).count()
    }
}

impl<const N: usize> TranslationCache for SoftTlb<N> {
    fn slots(&self) -> usize {
        N
    }

    fn read(&self, slot: usize) -> TlbEntry {
        self.entries[slot]
    }

    fn write(&mut self, slot: usize, entry: TlbEntry) {
        self.entries[slot] = entry;
    }
}

/// Request from another core to drop a translation.
#[derive(Debug, Clone, Copy)]
pub struct TlbShootdown {
    pub vaddr: VirtAddr,
}

/// One core's translation cache together with its interrupt mask.
pub struct Mmu<T, I> {
    tlb: T,
    irq: I,
}

impl<T: TranslationCache, I: InterruptControl> Mmu<T, I> {
    pub fn new(tlb: T, irq: I) -> Self {
        Mmu { tlb, irq }
    }

    pub fn tlb(&self) -> &T {
        &self.tlb
    }

    pub fn irq(&self) -> &I {
        &self.irq
    }

    /// Invalidates every slot with interrupts masked.
    pub fn invalidate_all(&mut self) {
        let _guard = InterruptGuard::new(&self.irq);
        for slot in 0..self.tlb.slots() {
            self.tlb.write(slot, TlbEntry::invalid(slot));
        }
    }

    /// Writes `page -> frame` into the first free slot and returns the slot.
    ///
    /// # Panics
    /// When every slot holds a valid entry; valid entries are never evicted.
    pub fn install(&mut self, page: VirtAddr, frame: PhysAddr) -> usize {
        assert!(page.is_aligned(PAGE_SIZE), "unaligned page {:#x}", page.as_u64());
        assert!(frame.is_aligned(PAGE_SIZE), "unaligned frame {:#x}", frame.as_u64());

        let _guard = InterruptGuard::new(&self.irq);
        for slot in 0..self.tlb.slots() {
            if self.tlb.read(slot).is_valid() {
                continue;
            }
            self.tlb.write(
                slot,
                TlbEntry {
                    hi: page,
                    lo: TlbLo::mapping(frame),
                },
            );
            crate::trace!(
                "tlb[{}]: {:#x} -> {:#x}",
                slot,
                page.as_u64(),
                frame.as_u64()
            );
            return slot;
        }

        panic!(
            "ran out of TLB entries, cannot handle fault at {:#x}",
            page.as_u64()
        );
    }

    /// Cross-core invalidation is never requested in this design.
    pub fn shootdown(&mut self, request: &TlbShootdown) -> ! {
        panic!(
            "tried to do tlb shootdown of {:#x}",
            request.vaddr.as_u64()
        );
    }
}
