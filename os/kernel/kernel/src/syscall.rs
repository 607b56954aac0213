//! # Fast system-call gateway
//!
//! `syscall` lands in [`entry::syscall_entry`], which switches to the
//! gateway's own kernel stack, saves the caller's registers in a
//! [`SyscallFrame`](entry::SyscallFrame) and calls [`handle`]. The call
//! itself is [`kernel_syscall::dispatch`]; `exit` goes to the handler
//! installed with [`install`] and never comes back. Buffers are checked
//! against the program's table handed over with [`attach_program`].

pub mod entry;

use crate::fatal::{Fatal, halt_with};
use entry::SyscallFrame;
use kernel_info::segments::{KERNEL_CODE_SELECTOR, USER_CODE_SELECTOR};
use kernel_memory_addresses::VirtualAddress;
use kernel_qemu::DebugConsole;
use kernel_registers::efer::Efer;
use kernel_registers::msr::{Ia32Fmask, Ia32Lstar, Ia32Star};
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_sync::{IrqCell, SyncOnceCell};
use kernel_syscall::{Console, PagedUserMemory, SYSCALL_FAILED, SyscallOutcome, dispatch};
use kernel_vmem::{IdentityMapper, PageTableManager, TableId};
use log::{info, warn};

/// Called with the program's exit code.
pub type ExitHandler = fn(i32) -> !;

static EXIT_HANDLER: SyncOnceCell<ExitHandler> = SyncOnceCell::new();

static CONSOLE: IrqCell<QemuConsole> = IrqCell::new(QemuConsole { written: 0 });

static USER_SPACE: SyncOnceCell<UserSpace> = SyncOnceCell::new();

/// The page tables of the running program, for checking its buffers.
struct UserSpace {
    paging: PageTableManager<IdentityMapper>,
    root: TableId,
}

/// Enables `SYSCALL`/`SYSRET` and points them at the gateway.
///
/// `stack_top` is the kernel stack the entry stub switches to.
///
/// # Errors
/// [`Fatal::AlreadyInstalled`] on a second call.
pub fn install(stack_top: VirtualAddress, on_exit: ExitHandler) -> Result<(), Fatal> {
    EXIT_HANDLER
        .set(on_exit)
        .map_err(|_| Fatal::AlreadyInstalled("syscall handler"))?;
    entry::set_kernel_stack(stack_top);

    let entry = entry::syscall_entry as usize as u64;
    // Safety: the GDT matching these selectors is loaded, and the entry
    // stub is mapped in every table because user tables share the kernel's.
    unsafe {
        let efer = Efer::load_unsafe();
        efer.with_sce(true).store_unsafe();
        Ia32Star::for_selectors(KERNEL_CODE_SELECTOR, USER_CODE_SELECTOR).store_unsafe();
        Ia32Lstar::new().with_entry(entry).store_unsafe();
        Ia32Fmask::syscall_entry().store_unsafe();
    }

    info!("syscall: handler installed at {entry:#x}, stack top {stack_top}");
    Ok(())
}

/// The debug console behind file descriptor 1.
struct QemuConsole {
    written: u64,
}

impl Console for QemuConsole {
    fn write_byte(&mut self, byte: u8) {
        DebugConsole.write_byte(byte);
        self.written += 1;
    }
}

/// Hands the page tables over to the gateway. `root` is the program's
/// top-level table, which must stay loaded while the program runs.
///
/// # Errors
/// [`Fatal::AlreadyInstalled`] on a second call.
pub fn attach_program(
    paging: PageTableManager<IdentityMapper>,
    root: TableId,
) -> Result<(), Fatal> {
    USER_SPACE
        .set(UserSpace { paging, root })
        .map(|_| ())
        .map_err(|_| Fatal::AlreadyInstalled("program address space"))
}

/// Runs one call on behalf of the entry stub.
pub(crate) extern "C" fn handle(frame: &mut SyscallFrame) {
    if !VirtualAddress::new(frame.rip).is_lower_half() {
        // sysret to a kernel address would run it in ring 0
        halt_with(&Fatal::BadReturnAddress(frame.rip));
    }

    let Some(space) = USER_SPACE.get() else {
        warn!("syscall: no program attached, failing call {}", frame.rax);
        frame.rax = SYSCALL_FAILED;
        return;
    };
    // Safety: `space.root` is in CR3 for as long as the program runs.
    let memory = unsafe { PagedUserMemory::new(&space.paging, space.root) };

    let outcome = CONSOLE.with(|console| {
        let outcome = dispatch(frame.rax, frame.args(), console, &memory);
        if matches!(outcome, SyscallOutcome::Exit(_)) {
            info!("syscall: program wrote {} bytes", console.written);
        }
        outcome
    });

    match outcome {
        Some(SyscallOutcome::Return(value)) => frame.rax = value,
        Some(SyscallOutcome::Exit(code)) => match EXIT_HANDLER.get() {
            Some(exit) => exit(code),
            None => crate::fatal::halt(),
        },
        None => {
            warn!("syscall: console busy, failing call {}", frame.rax);
            frame.rax = SYSCALL_FAILED;
        }
    }
}
