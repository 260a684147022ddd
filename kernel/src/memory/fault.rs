//! Translation-miss handler.
//!
//! A miss is resolved against the current process's address space and
//! answered by writing one direct-mapped entry into the core's translation
//! cache. Nothing is paged in: every page of every region is already backed.

use x86_64::{PhysAddr, VirtAddr};

use crate::{
    constants::memory::PAGE_SIZE,
    interrupts::InterruptControl,
    memory::{Mmu, TranslationCache, VmError},
    processes::Process,
};

/// Kind of access that missed, as classified by the trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    Read,
    Write,
    /// Write to a page mapped read-only.
    ReadOnly,
}

impl TryFrom<u32> for FaultType {
    type Error = VmError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(FaultType::Read),
            1 => Ok(FaultType::Write),
            2 => Ok(FaultType::ReadOnly),
            _ => Err(VmError::InvalidFaultType(code)),
        }
    }
}

/// Handles a translation miss at `address` on the core owning `mmu`.
///
/// # Returns
/// The frame now mapped for the faulting page. `NoProcess` and
/// `NoAddressSpace` are fatal to the kernel; `AddressFault` goes to the
/// process.
pub fn vm_fault<T, I>(
    mmu: &mut Mmu<T, I>,
    current: Option<&Process>,
    fault_type: FaultType,
    address: VirtAddr,
) -> Result<PhysAddr, VmError>
where
    T: TranslationCache,
    I: InterruptControl,
{
    let page = address.align_down(PAGE_SIZE);
    crate::debug!("vm: fault: {:#x}", page.as_u64());

    match fault_type {
        // every page is mapped read-write, so this cannot happen
        FaultType::ReadOnly => panic!("vm: got a read-only fault at {:#x}", page.as_u64()),
        FaultType::Read | FaultType::Write => {}
    }

    // no process or no address space: a kernel fault early in boot
    let process = current.ok_or(VmError::NoProcess)?;
    let space = process.address_space().ok_or(VmError::NoAddressSpace)?;

    let ctx = space.vm().context();
    if ctx.cpu_exists() {
        assert_eq!(ctx.spinlocks_held(), 0, "vm fault while holding a spinlock");
    }
    space.assert_populated();
    if let Some(thread) = ctx.current_thread() {
        crate::trace!("vm: fault by pid {} thread {}", process.pid(), thread.0);
    }

    let frame = space
        .translate(page)
        .ok_or(VmError::AddressFault(address))?;
    assert!(frame.is_aligned(PAGE_SIZE));

    mmu.install(page, frame);
    crate::debug!("vm: {:#x} -> {:#x}", page.as_u64(), frame.as_u64());
    Ok(frame)
}

/// Entry point for the trap dispatcher: raw fault code in, status code out.
///
/// # Returns
/// 0 on success, otherwise the error's [`VmError::errno`]
pub fn vm_fault_raw<T, I>(
    mmu: &mut Mmu<T, I>,
    current: Option<&Process>,
    code: u32,
    address: u64,
) -> i32
where
    T: TranslationCache,
    I: InterruptControl,
{
    let result = FaultType::try_from(code).and_then(|fault_type| {
        let address = VirtAddr::try_new(address)
            .map_err(|_| VmError::AddressFault(VirtAddr::new_truncate(address)))?;
        vm_fault(mmu, current, fault_type, address)
    });

    match result {
        Ok(_) => 0,
        Err(err) => {
            if err.is_fatal() {
                crate::error!("vm: unrecoverable fault at {:#x}: {}", address, err);
            }
            err.errno()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    use crate::{
        constants::{
            errno::{EFAULT, EINVAL},
            memory::{STACK_PAGES, USER_STACK},
        },
        interrupts::SoftInterrupts,
        memory::{
            address_space::Protection, AddressSpace, BootFrameAllocator, RamImage, SoftTlb, Vm,
            VmConfig,
        },
        processes::{CpuState, ExecutionContext, ThreadId},
    };

    fn vm(cpu: Arc<CpuState>) -> Arc<Vm> {
        let config = VmConfig {
            seed_free_pool: true,
            ..VmConfig::default()
        };
        let vm = Vm::new(
            config,
            BootFrameAllocator::new(0..64 * PAGE_SIZE),
            Arc::new(RamImage::new(64 * PAGE_SIZE as usize)),
            cpu,
        );
        vm.bootstrap().expect("bootstrap");
        vm
    }

    /// Region 1 = [0x1000, 2 pages), region 2 = [0x10000, 1 page), loaded.
    fn loaded_process(vm: &Arc<Vm>) -> Process {
        let rw = Protection::new()
            .with_flags(Protection::READ)
            .with_flags(Protection::WRITE);
        let mut space = AddressSpace::create(vm);
        space.define_region(VirtAddr::new(0x1000), 0x2000, rw).expect("first");
        space.define_region(VirtAddr::new(0x10000), 0x1000, rw).expect("second");
        space.prepare_load().expect("enough RAM");

        let mut process = Process::new();
        process.set_address_space(Some(space));
        process
    }

    fn mmu() -> Mmu<SoftTlb, SoftInterrupts> {
        Mmu::new(SoftTlb::new(), SoftInterrupts::new())
    }

    fn space(process: &Process) -> &AddressSpace {
        process.address_space().expect("installed")
    }

    #[test]
    fn fault_in_first_region_maps_at_fixed_offset() {
        let vm = vm(Arc::new(CpuState::new()));
        let process = loaded_process(&vm);
        let base = space(&process).regions()[0].frame().expect("backed");
        let mut mmu = mmu();

        let frame = vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(0x1800))
            .expect("mapped");
        assert_eq!(frame, base);
        assert_eq!(mmu.tlb().translate(VirtAddr::new(0x1000)), Some(base));

        let frame = vm_fault(&mut mmu, Some(&process), FaultType::Write, VirtAddr::new(0x2abc))
            .expect("mapped");
        assert_eq!(frame, base + PAGE_SIZE);
        assert_eq!(space(&process).translate(VirtAddr::new(0x2abc)), Some(base + 0x1abcu64));
    }

    #[test]
    fn fault_in_second_region_and_stack() {
        let vm = vm(Arc::new(CpuState::new()));
        let process = loaded_process(&vm);
        let second = space(&process).regions()[1].frame().expect("backed");
        let stack = space(&process).stack().frame().expect("backed");
        let mut mmu = mmu();

        assert_eq!(
            vm_fault(&mut mmu, Some(&process), FaultType::Write, VirtAddr::new(0x10ff8)),
            Ok(second)
        );
        assert_eq!(
            vm_fault(&mut mmu, Some(&process), FaultType::Write, VirtAddr::new(USER_STACK - 4)),
            Ok(stack + (STACK_PAGES as u64 - 1) * PAGE_SIZE)
        );
        let stack_bottom = USER_STACK - STACK_PAGES as u64 * PAGE_SIZE;
        assert_eq!(
            vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(stack_bottom)),
            Ok(stack)
        );
        assert_eq!(mmu.tlb().valid_entries(), 3);
    }

    #[test]
    fn fault_outside_every_region_is_an_address_fault() {
        let vm = vm(Arc::new(CpuState::new()));
        let process = loaded_process(&vm);
        let mut mmu = mmu();

        let below_stack = USER_STACK - (STACK_PAGES as u64 + 1) * PAGE_SIZE;
        for addr in [0x20000, 0x3000, 0x0, USER_STACK, below_stack] {
            assert_eq!(
                vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(addr)),
                Err(VmError::AddressFault(VirtAddr::new(addr)))
            );
        }
        assert_eq!(mmu.tlb().valid_entries(), 0);
    }

    #[test]
    fn missing_process_or_address_space_is_fatal() {
        let mut mmu = mmu();
        assert_eq!(
            vm_fault(&mut mmu, None, FaultType::Read, VirtAddr::new(0x1000)),
            Err(VmError::NoProcess)
        );

        let process = Process::new();
        let err = vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(0x1000))
            .expect_err("no address space");
        assert_eq!(err, VmError::NoAddressSpace);
        assert!(err.is_fatal());
    }

    #[test]
    #[should_panic(expected = "ran out of TLB entries")]
    fn full_translation_cache_is_fatal() {
        let vm = vm(Arc::new(CpuState::new()));
        let process = loaded_process(&vm);
        let mut mmu = Mmu::new(SoftTlb::<2>::new(), SoftInterrupts::new());

        vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(0x1000)).expect("slot");
        vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(0x2000)).expect("slot");
        let _ = vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(0x10000));
    }

    #[test]
    fn activation_makes_room_for_new_faults() {
        let vm = vm(Arc::new(CpuState::new()));
        let process = loaded_process(&vm);
        let mut mmu = Mmu::new(SoftTlb::<2>::new(), SoftInterrupts::new());

        vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(0x1000)).expect("slot");
        vm_fault(&mut mmu, Some(&process), FaultType::Read, VirtAddr::new(0x2000)).expect("slot");
        space(&process).activate(&mut mmu);

        let second = VirtAddr::new(0x10000);
        assert!(vm_fault(&mut mmu, Some(&process), FaultType::Read, second).is_ok());
        assert_eq!(mmu.tlb().valid_entries(), 1);
        assert!(mmu.irq().are_enabled());
    }

    #[test]
    fn fault_on_behalf_of_a_running_thread() {
        let cpu = Arc::new(CpuState::new());
        cpu.set_current_thread(Some(ThreadId(3)));
        let vm = vm(cpu.clone());
        let process = loaded_process(&vm);
        let base = space(&process).regions()[0].frame().expect("backed");

        let mut mmu = mmu();
        assert_eq!(
            vm_fault(&mut mmu, Some(&process), FaultType::Write, VirtAddr::new(0x1010)),
            Ok(base)
        );
        assert_eq!(cpu.current_thread(), Some(ThreadId(3)));
    }

    #[test]
    #[should_panic(expected = "read-only fault")]
    fn read_only_fault_is_fatal() {
        let vm = vm(Arc::new(CpuState::new()));
        let process = loaded_process(&vm);
        let addr = VirtAddr::new(0x1000);
        let _ = vm_fault(&mut mmu(), Some(&process), FaultType::ReadOnly, addr);
    }

    #[test]
    #[should_panic(expected = "holding a spinlock")]
    fn fault_while_holding_spinlock_panics() {
        let cpu = Arc::new(CpuState::new());
        let vm = vm(cpu.clone());
        let process = loaded_process(&vm);
        cpu.acquire_spinlock();
        let _ = vm_fault(&mut mmu(), Some(&process), FaultType::Read, VirtAddr::new(0x1000));
    }

    #[test]
    fn raw_entry_decodes_codes_and_reports_status() {
        let vm = vm(Arc::new(CpuState::new()));
        let process = loaded_process(&vm);
        let mut mmu = mmu();

        assert_eq!(vm_fault_raw(&mut mmu, Some(&process), 0, 0x1800), 0);
        assert_eq!(vm_fault_raw(&mut mmu, Some(&process), 1, 0x10000), 0);
        assert_eq!(vm_fault_raw(&mut mmu, Some(&process), 9, 0x1800), EINVAL);
        assert_eq!(vm_fault_raw(&mut mmu, Some(&process), 0, 0x20000), EFAULT);
        assert_eq!(vm_fault_raw(&mut mmu, None, 0, 0x1800), EFAULT);
        assert_eq!(vm_fault_raw(&mut mmu, Some(&process), 0, 0xdead_0000_0000_0000), EFAULT);
        assert_eq!(mmu.tlb().valid_entries(), 2);
    }

    #[test]
    fn unknown_fault_code_is_rejected_before_anything_else() {
        assert_eq!(FaultType::try_from(3), Err(VmError::InvalidFaultType(3)));
        let mut mmu = mmu();
        assert_eq!(vm_fault_raw(&mut mmu, None, 3, 0x1000), EINVAL);
    }
}
