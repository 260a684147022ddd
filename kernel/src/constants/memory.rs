pub const PAGE_SIZE: u64 = 4096;

/// Mask selecting the page-number bits of an address.
pub const PAGE_FRAME: u64 = !(PAGE_SIZE - 1);

// Always 72K of user stack; must stay above ARG_MAX (64K) so argument blocks fit.
pub const STACK_PAGES: usize = 18;

/// Top of the user address space; the stack grows down from here.
pub const USER_STACK: u64 = 0x8000_0000;

/// Base of the kernel direct map. Physical address `p` is visible at `KSEG0 + p`.
pub const KSEG0: u64 = 0x8000_0000;

pub const BITMAP_ENTRY_SIZE: usize = 64;
pub const EMPTY_BITMAP_ENTRY: u64 = 0;

// Translation cache geometry and low-word flags
pub const NUM_TLB: usize = 64;
pub const TLBLO_DIRTY: u64 = 0x0000_0400;
pub const TLBLO_VALID: u64 = 0x0000_0200;
