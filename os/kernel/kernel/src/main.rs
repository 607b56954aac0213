//! # Kernel Entry Point

#![no_std]
#![no_main]
#![allow(unsafe_code)]

use kernel::fatal::{halt, halt_with};
use kernel_info::boot::KernelBootInfo;
use kernel_qemu::{QemuLogger, qemu_trace};
use log::{LevelFilter, error};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("panic: {info}");
    halt()
}

/// Stack size.
const BOOT_STACK_SIZE: usize = 64 * 1024;

/// 16-byte aligned stack
#[repr(align(16))]
struct Aligned<const N: usize>([u8; N]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned<BOOT_STACK_SIZE> = Aligned([0; BOOT_STACK_SIZE]);

/// The kernel entry point.
///
/// # ABI
/// System V: the boot stage passes the [`KernelBootInfo`] pointer in `RDI`
/// (see [`KernelEntryFn`](kernel_info::boot::KernelEntryFn)).
///
/// # Naked function & Stack
/// Naked so the stack can be replaced before any Rust code runs. The boot
/// stage's stack is not ours to keep.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub extern "sysv64" fn _start_kernel(_boot_info: *const KernelBootInfo) -> ! {
    core::arch::naked_asm!(
        "cli",
        "lea rax, [rip + {stack_sym}]",
        "add rax, {stack_size}",
        "and rax, -16",
        "mov rsp, rax",
        // Emulate a CALL so RSP % 16 == 8 at entry
        "push 0",
        "xor rbp, rbp",
        "jmp {rust_entry}",
        stack_sym = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        rust_entry = sym kernel_entry,
    );
}

/// Kernel entry running on the boot stack. `boot_info` is still in `RDI`.
#[unsafe(no_mangle)]
extern "C" fn kernel_entry(boot_info: *const KernelBootInfo) -> ! {
    #[cfg(feature = "qemu")]
    qemu_trace!("Kernel reporting to QEMU!\n");

    if QemuLogger::init(LevelFilter::Info).is_err() {
        qemu_trace!("logger was already installed\n");
    }

    // Safety: the boot stage hands over a valid, identity-mapped record.
    let Some(boot_info) = (unsafe { boot_info.as_ref() }) else {
        error!("boot: no boot info");
        halt()
    };

    // Safety: nothing but this kernel touches the handed-over memory.
    match unsafe { kernel::boot::run(boot_info) } {
        Ok(never) => match never {},
        Err(fatal) => halt_with(&fatal),
    }
}
