//! # Global Descriptor Table and TSS
//!
//! Long mode ignores segment bases and limits, but selectors still carry
//! the privilege level: `iretq` into ring 3 needs DPL 3 code and data
//! descriptors, and `SYSCALL`/`SYSRET` derive their selectors from fixed
//! offsets, which dictates the order below.
//!
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (DPL 0)
//! 2     | 0x10     | Kernel data (DPL 0)
//! 3     | 0x1b     | User data (DPL 3), `SYSRET` base + 8
//! 4     | 0x23     | User code (DPL 3), `SYSRET` base + 16
//! 5/6   | 0x28     | TSS (16-byte system descriptor)
//!
//! There is one CPU, so there is one GDT and one TSS, installed once.

pub mod descriptors;
pub mod tss_desc;

use crate::fatal::Fatal;
use crate::gdt::descriptors::Desc64;
use crate::gdt::tss_desc::TssDesc64;
use crate::tss::Tss64;
use core::mem::size_of;
use kernel_info::segments::{
    KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, TSS_SELECTOR, USER_DATA_SELECTOR,
    USER_CODE_SELECTOR,
};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SyncOnceCell;
use log::info;

#[repr(C, align(16))]
#[derive(Debug)]
pub struct Gdt {
    null: Desc64,
    kcode: Desc64,
    /// Must follow `kcode`; `SYSCALL` loads SS from CS + 8.
    kdata: Desc64,
    /// Must precede `ucode`; `SYSRET` loads SS from base + 8, CS from base + 16.
    udata: Desc64,
    ucode: Desc64,
    tss: TssDesc64,
}

impl Gdt {
    #[must_use]
    pub const fn new(tss: TssDesc64) -> Self {
        Self {
            null: Desc64::NULL,
            kcode: Desc64::code(0),
            kdata: Desc64::data(0),
            udata: Desc64::data(3),
            ucode: Desc64::code(3),
            tss,
        }
    }
}

const _: () = {
    use core::mem::offset_of;
    assert!(offset_of!(Gdt, kcode) == KERNEL_CODE_SELECTOR as usize);
    assert!(offset_of!(Gdt, kdata) == KERNEL_DATA_SELECTOR as usize);
    assert!(offset_of!(Gdt, udata) == (USER_DATA_SELECTOR & !3) as usize);
    assert!(offset_of!(Gdt, ucode) == (USER_CODE_SELECTOR & !3) as usize);
    assert!(offset_of!(Gdt, tss) == TSS_SELECTOR as usize);
};

/// Operand of `lgdt`.
#[repr(C, packed)]
struct DescTablePtr {
    limit: u16,
    base: u64,
}

static TSS: SyncOnceCell<Tss64> = SyncOnceCell::new();
static GDT: SyncOnceCell<Gdt> = SyncOnceCell::new();

/// Builds the TSS and GDT, loads them and reloads every segment register.
///
/// `kernel_stack_top` becomes `rsp0`.
///
/// # Errors
/// [`Fatal::AlreadyInstalled`] on a second call.
pub fn install(kernel_stack_top: VirtualAddress) -> Result<(), Fatal> {
    let tss = TSS
        .set(Tss64::new(kernel_stack_top))
        .map_err(|_| Fatal::AlreadyInstalled("tss"))?;
    let tss_base = VirtualAddress::from_ptr(core::ptr::from_ref(tss));
    let gdt = GDT
        .set(Gdt::new(TssDesc64::new(tss_base, Tss64::LIMIT)))
        .map_err(|_| Fatal::AlreadyInstalled("gdt"))?;

    // Safety: both tables live in statics for the rest of the kernel's life.
    unsafe {
        load_gdt(gdt);
        reload_segments();
        load_task_register();
    }

    info!("gdt: installed, tss at {tss_base}, rsp0 {kernel_stack_top}");
    Ok(())
}

/// # Safety
/// `gdt` must stay mapped and unchanged while it is loaded.
#[allow(clippy::cast_possible_truncation)]
unsafe fn load_gdt(gdt: &'static Gdt) {
    let ptr = DescTablePtr {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: core::ptr::from_ref(gdt) as u64,
    };
    unsafe {
        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &raw const ptr,
            options(readonly, nostack, preserves_flags)
        );
    }
}

/// Points DS/ES/SS at kernel data and far-returns into kernel code.
///
/// # Safety
/// The GDT must be loaded.
unsafe fn reload_segments() {
    unsafe {
        core::arch::asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov ss, {0:x}",
            in(reg) KERNEL_DATA_SELECTOR,
            options(nostack, preserves_flags)
        );
        core::arch::asm!(
            "push {cs}",
            "lea {tmp}, [rip + 2f]",
            "push {tmp}",
            "retfq",
            "2:",
            cs = in(reg) u64::from(KERNEL_CODE_SELECTOR),
            tmp = out(reg) _,
            options(preserves_flags)
        );
    }
}

/// # Safety
/// The GDT must be loaded and hold an available TSS at [`TSS_SELECTOR`].
unsafe fn load_task_register() {
    unsafe {
        core::arch::asm!(
            "ltr {0:x}",
            in(reg) TSS_SELECTOR,
            options(nostack, preserves_flags)
        );
    }
}
