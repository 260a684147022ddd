use x86_64::VirtAddr;

use crate::{
    constants::memory::{KSEG0, PAGE_SIZE, STACK_PAGES, USER_STACK},
    memory::AllocPolicy,
};

/// Runtime knobs of the VM subsystem. `Default` follows `constants::memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub policy: AllocPolicy,
    /// Pages backing every user stack.
    pub stack_pages: usize,
    /// Initial user stack pointer; the stack window ends here.
    pub user_stack: VirtAddr,
    /// Where the kernel sees physical address 0.
    pub kernel_base: VirtAddr,
    /// Pool all still-untouched RAM when the frame table is built, instead
    /// of leaving it to the boot allocator.
    pub seed_free_pool: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            policy: AllocPolicy::FreeList,
            stack_pages: STACK_PAGES,
            user_stack: VirtAddr::new(USER_STACK),
            kernel_base: VirtAddr::new(KSEG0),
            seed_free_pool: false,
        }
    }
}

impl VmConfig {
    /// Lowest address of the stack window.
    pub fn stack_base(&self) -> VirtAddr {
        self.user_stack - self.stack_pages as u64 * PAGE_SIZE
    }
}
