//! # Boot sequence
//!
//! From the boot stage's hand-off to the first instruction of the init
//! program:
//!
//! 1. build the kernel address space and switch to it,
//! 2. put the heap on the pages that landed in the higher half,
//! 3. allocate the gateway stack, install GDT/TSS and the syscall MSRs,
//! 4. load the embedded ELF image and build its environment,
//! 5. drop to ring 3.
//!
//! Interrupts stay masked throughout; the `iretq` into the program is what
//! enables them.

use crate::cpu::CpuPrivileged;
use crate::fatal::{Fatal, halt};
use crate::tracing::trace_boot_info;
use crate::{gdt, syscall};
use core::convert::Infallible;
use kernel_alloc::{Heap, PagePool};
use kernel_exec::{ElfImage, enter_hazardous_environment, setup_hazardous_environment};
use kernel_info::boot::{KernelBootInfo, MemoryMap};
use kernel_info::memory::SYSCALL_STACK_SIZE;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::IrqGuard;
use kernel_vmem::{IdentityMapper, PageTableManager};
use log::{info, warn};

/// Runs the boot sequence. Only returns on failure.
///
/// # Errors
/// Whatever stopped the boot; every error here is fatal.
///
/// # Safety
/// `boot_info` must describe memory that is identity mapped and untouched
/// by anything else: the memory map buffer and the program image.
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn run(boot_info: &KernelBootInfo) -> Result<Infallible, Fatal> {
    let _irq: IrqGuard = IrqGuard::new();
    trace_boot_info(boot_info);

    let mmap = &boot_info.mmap;
    let bad_map = Fatal::BadMemoryMap {
        len: mmap.mmap_len,
        stride: mmap.mmap_desc_size,
    };
    let len = usize::try_from(mmap.mmap_len).map_err(|_| bad_map)?;
    let stride = usize::try_from(mmap.mmap_desc_size).map_err(|_| bad_map)?;
    // Safety: the boot stage hands the buffer over for good.
    let bytes = unsafe { core::slice::from_raw_parts_mut(mmap.mmap_ptr as *mut u8, len) };
    let mut map = MemoryMap::new(bytes, stride).ok_or(bad_map)?;

    let mut cpu = CpuPrivileged;
    let mut paging = PageTableManager::setup(IdentityMapper, &mut map, &boot_info.fb, &mut cpu)?;
    info!("boot: paging enabled");

    let pool = PagePool::from_regions(paging.regions());
    if pool.total_pages() == 0 {
        return Err(Fatal::NoHeapMemory);
    }
    let mut heap = Heap::new(pool);
    info!("boot: heap ready, {:?}", heap.stats());

    let stack = heap.alloc_aligned(SYSCALL_STACK_SIZE as usize)?;
    let stack_top = VirtualAddress::from_ptr(stack.as_ptr()) + SYSCALL_STACK_SIZE;
    gdt::install(stack_top)?;
    syscall::install(stack_top, program_exited)?;

    let image = &boot_info.init_image;
    if image.ptr == 0 || image.len == 0 {
        return Err(Fatal::NoProgramImage);
    }
    // Safety: the image stays resident while it is loaded.
    let bytes = unsafe { core::slice::from_raw_parts(image.ptr as *const u8, image.len as usize) };
    let image = load_init(bytes, &mut heap)?;
    let ctx = setup_hazardous_environment(&mut paging, &mut heap, &image)?;
    info!("boot: init loaded, heap {:?}", heap.stats());
    syscall::attach_program(paging, ctx.table())?;

    enter_hazardous_environment(ctx, &mut cpu)
}

/// Loads the init program. A rejected image leaves the heap as it was.
fn load_init(bytes: &[u8], heap: &mut Heap) -> Result<ElfImage, Fatal> {
    ElfImage::load(bytes, heap).map_err(|e| {
        warn!("boot: init image rejected: {e}");
        Fatal::from(e)
    })
}

fn program_exited(code: i32) -> ! {
    info!("init exited with code {code}, halting");
    halt()
}
