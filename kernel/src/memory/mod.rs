pub mod address_space;
pub mod boot_frame_allocator;
pub mod config;
pub mod error;
pub mod fault;
pub mod frame_allocator;
pub mod frame_table;
pub mod physmem;
pub mod tlb;

pub use address_space::{AddressSpace, Region};
pub use boot_frame_allocator::{BootFrameAllocator, StealMem};
pub use config::VmConfig;
pub use error::VmError;
pub use fault::{vm_fault, vm_fault_raw, FaultType};
pub use frame_allocator::{AllocPolicy, FrameAllocator, MemStats, TableStatus};
pub use physmem::{DirectMap, PhysicalMemory, RamImage};
pub use tlb::{Mmu, SoftTlb, TlbEntry, TlbLo, TlbShootdown, TranslationCache};

use alloc::sync::Arc;
use limine::request::{HhdmRequest, MemoryMapRequest};
use x86_64::VirtAddr;

use crate::{
    constants::memory::PAGE_SIZE,
    processes::{assert_can_sleep, ExecutionContext},
};

#[used]
#[link_section = ".requests"]
pub static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
pub static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

/// The VM subsystem: frame allocator plus everything address spaces need.
///
/// Built once at boot and shared as an `Arc<Vm>` with every consumer.
pub struct Vm {
    config: VmConfig,
    frames: FrameAllocator,
    ram: Arc<dyn PhysicalMemory>,
    ctx: Arc<dyn ExecutionContext>,
}

impl Vm {
    pub fn new(
        config: VmConfig,
        boot: impl StealMem + 'static,
        ram: Arc<dyn PhysicalMemory>,
        ctx: Arc<dyn ExecutionContext>,
    ) -> Arc<Self> {
        Arc::new(Vm {
            frames: FrameAllocator::new(config.policy, config.kernel_base, boot),
            config,
            ram,
            ctx,
        })
    }

    /// Builds the frame table, switching allocation to the configured policy.
    pub fn bootstrap(&self) -> Result<(), VmError> {
        self.frames.bootstrap(self.config.seed_free_pool)?;

        if let Some(stats) = self.frames.stats() {
            let kib = stats.total_frames as u64 * PAGE_SIZE / 1024;
            crate::info!(
                "vm: {}MB of RAM [{}KB], {} frames, {} free",
                kib / 1024,
                kib,
                stats.total_frames,
                stats.free_frames
            );
        }
        Ok(())
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn ram(&self) -> &dyn PhysicalMemory {
        &*self.ram
    }

    pub fn context(&self) -> &dyn ExecutionContext {
        &*self.ctx
    }

    pub(crate) fn assert_can_sleep(&self) {
        assert_can_sleep(&*self.ctx);
    }

    /// Allocates `count` kernel pages; `None` when RAM is exhausted.
    pub fn alloc_kernel_pages(&self, count: usize) -> Option<VirtAddr> {
        self.assert_can_sleep();
        self.frames.alloc_kernel_pages(count)
    }

    pub fn free_kernel_pages(&self, addr: VirtAddr) {
        self.frames.free_kernel_pages(addr);
    }

    pub fn memstats(&self) -> Option<MemStats> {
        self.frames.stats()
    }

    /// Logs [`Vm::memstats`], or why there are none.
    pub fn log_memstats(&self) {
        match self.memstats() {
            Some(stats) => crate::info!("vm: {}", stats),
            None => crate::info!("vm: no memory statistics without the frame table"),
        }
    }
}

/// Brings up the VM subsystem from the bootloader's memory map.
///
/// Physical memory is reached through the higher-half direct map, which also
/// becomes the kernel page base.
///
/// # Returns
/// `None` if the bootloader did not answer the memory map or HHDM requests
pub fn init(
    config: VmConfig,
    kernel_end: u64,
    ctx: Arc<dyn ExecutionContext>,
) -> Option<Arc<Vm>> {
    let memory_map = MEMORY_MAP_REQUEST.get_response()?;
    let hhdm = VirtAddr::new(HHDM_REQUEST.get_response()?.offset());

    let boot = BootFrameAllocator::from_memory_map(memory_map, kernel_end);
    // SAFETY: Limine maps all of physical memory at the HHDM offset
    let ram = Arc::new(unsafe { DirectMap::new(hhdm) });
    let config = VmConfig {
        kernel_base: hhdm,
        ..config
    };

    let vm = Vm::new(config, boot, ram, ctx);
    if let Err(err) = vm.bootstrap() {
        crate::error!("vm: bootstrap failed: {}", err);
        return None;
    }
    Some(vm)
}
