use alloc::boxed::Box;
use core::fmt;

use spin::Mutex;
use x86_64::{PhysAddr, VirtAddr};

use crate::{
    constants::memory::PAGE_SIZE,
    memory::{boot_frame_allocator::StealMem, frame_table::FrameTable, VmError},
};

/// How frames are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocPolicy {
    /// Every request is carved from untouched RAM; freed frames leak.
    BumpOnly,
    /// First-fit over the frame table, falling back to untouched RAM.
    #[default]
    FreeList,
}

/// Whether the frame table has been built yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Uninitialized,
    Ready,
}

enum TableState {
    Uninitialized,
    Ready(FrameTable),
}

/// Physical frame allocator shared by every consumer of the VM subsystem
///
/// * `table`: free bits and run lengths, guarded by the allocator lock
/// * `boot`: the bump source, guarded by its own lock since it is also
///   used before the table exists
pub struct FrameAllocator {
    policy: AllocPolicy,
    kernel_base: VirtAddr,
    table: Mutex<TableState>,
    boot: Mutex<Box<dyn StealMem>>,
}

impl FrameAllocator {
    pub fn new(policy: AllocPolicy, kernel_base: VirtAddr, boot: impl StealMem + 'static) -> Self {
        FrameAllocator {
            policy,
            kernel_base,
            table: Mutex::new(TableState::Uninitialized),
            boot: Mutex::new(Box::new(boot)),
        }
    }

    pub fn policy(&self) -> AllocPolicy {
        self.policy
    }

    pub fn status(&self) -> TableStatus {
        match *self.table.lock() {
            TableState::Uninitialized => TableStatus::Uninitialized,
            TableState::Ready(_) => TableStatus::Ready,
        }
    }

    /// Builds the frame table and enables frame reuse.
    ///
    /// A no-op under [`AllocPolicy::BumpOnly`]. With `seed_free_pool` the
    /// remaining untouched RAM is taken from the boot allocator and pooled.
    pub fn bootstrap(&self, seed_free_pool: bool) -> Result<(), VmError> {
        if self.policy == AllocPolicy::BumpOnly {
            crate::debug!("frame table disabled by bump-only policy");
            return Ok(());
        }
        // lock order: table, then boot
        let mut state = self.table.lock();
        if let TableState::Ready(_) = *state {
            return Err(VmError::AlreadyBootstrapped);
        }

        let mut boot = self.boot.lock();
        let total_frames = boot.ram_size().div_ceil(PAGE_SIZE) as usize;
        let mut table = FrameTable::new(total_frames);

        if seed_free_pool {
            let remaining = boot.remaining();
            if let Some(base) = boot.steal(remaining) {
                let first = frame_index(base);
                table.add_to_pool(first..first + remaining);
            }
        }
        crate::debug!(
            "frame table: {} frames, {} pooled, untouched RAM from {:#x}",
            total_frames,
            table.free_frames(),
            boot.first_free().as_u64()
        );
        drop(boot);

        *state = TableState::Ready(table);
        Ok(())
    }

    /// Reserves `count` contiguous frames.
    ///
    /// # Returns
    /// The first frame's physical address, or `None` when neither the free
    /// pool nor untouched RAM holds a long enough run
    pub fn alloc_frames(&self, count: usize) -> Option<PhysAddr> {
        if count == 0 {
            return None;
        }

        if self.policy == AllocPolicy::FreeList {
            let reused = self
                .with_frame_table(|table| {
                    let first = table.find_first_fit(count)?;
                    table.claim(first, count);
                    Some(first)
                })
                .flatten();
            if let Some(first) = reused {
                return Some(frame_address(first));
            }
        }

        let base = self.boot.lock().steal(count)?;
        self.with_frame_table(|table| table.record_run(frame_index(base), count));
        Some(base)
    }

    /// Gives `count` frames starting at `base` back to the free pool.
    ///
    /// # Returns
    /// Whether the frames were pooled; before the table exists they leak
    pub fn free_frames(&self, base: PhysAddr, count: usize) -> bool {
        assert!(
            base.is_aligned(PAGE_SIZE),
            "freeing unaligned frame {:#x}",
            base.as_u64()
        );
        if count == 0 {
            return false;
        }

        let released = self.with_frame_table(|table| table.release(frame_index(base), count));
        if released.is_none() {
            crate::debug!(
                "frame table disabled, leaking {} frames at {:#x}",
                count,
                base.as_u64()
            );
        }
        released.is_some()
    }

    /// Allocates `count` frames and returns their kernel direct-map address.
    pub fn alloc_kernel_pages(&self, count: usize) -> Option<VirtAddr> {
        let base = self.alloc_frames(count)?;
        Some(self.kernel_base + base.as_u64())
    }

    /// Frees a run handed out by [`FrameAllocator::alloc_kernel_pages`].
    /// The run length is recovered from the frame table.
    pub fn free_kernel_pages(&self, addr: VirtAddr) {
        assert!(
            addr >= self.kernel_base && addr.is_aligned(PAGE_SIZE),
            "{:#x} is not a kernel page",
            addr.as_u64()
        );
        let first = frame_index(PhysAddr::new(addr - self.kernel_base));

        let freed = self.with_frame_table(|table| {
            assert!(
                first < table.total_frames(),
                "kernel page {:#x} is outside RAM",
                addr.as_u64()
            );
            let count = table.run_length(first);
            if count > 0 {
                table.release(first, count);
            }
            count
        });

        match freed {
            None => crate::debug!("frame table disabled, leaking {:#x}", addr.as_u64()),
            Some(0) => crate::warn!("no run recorded at kernel page {:#x}", addr.as_u64()),
            Some(_) => {}
        }
    }

    /// Scans the frame table for [`MemStats`]; `None` before bootstrap.
    pub fn stats(&self) -> Option<MemStats> {
        self.with_frame_table(|table| MemStats {
            total_frames: table.total_frames(),
            free_frames: table.free_frames(),
            largest_run: table
                .largest_run()
                .map(|(first, length)| (frame_address(first), length)),
        })
    }

    /// Runs `f` on the frame table under the allocator lock.
    ///
    /// # Returns
    /// `None` while the table is uninitialized
    pub fn with_frame_table<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut FrameTable) -> R,
    {
        let mut guard = self.table.lock();
        match &mut *guard {
            TableState::Ready(table) => Some(f(table)),
            TableState::Uninitialized => None,
        }
    }
}

/// Snapshot of frame usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemStats {
    pub total_frames: usize,
    pub free_frames: usize,
    /// First frame address and length of the largest allocated run.
    pub largest_run: Option<(PhysAddr, usize)>,
}

impl MemStats {
    pub fn percent_free(&self) -> usize {
        if self.total_frames == 0 {
            return 0;
        }
        100 * self.free_frames / self.total_frames
    }
}

impl fmt::Display for MemStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "free memory: {} of {} frames ({}%)",
            self.free_frames,
            self.total_frames,
            self.percent_free()
        )?;
        if let Some((base, length)) = self.largest_run {
            write!(f, ", largest run: {} frames @ {:#x}", length, base.as_u64())?;
        }
        Ok(())
    }
}

fn frame_index(addr: PhysAddr) -> usize {
    (addr.as_u64() / PAGE_SIZE) as usize
}

fn frame_address(index: usize) -> PhysAddr {
    PhysAddr::new(index as u64 * PAGE_SIZE)
}
