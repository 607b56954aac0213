use core::sync::atomic::{AtomicU64, Ordering};
use kernel_memory_addresses::VirtualAddress;

/// Caller state saved by [`syscall_entry`], lowest address first.
///
/// The layout must match the push order in the stub:
///
/// ```text
///   +0  rax     number in, result out
///   +8  rdi     arg0
///   +16 rsi     arg1
///   +24 rdx     arg2
///   +32 r10     arg3 (rcx is taken by SYSCALL)
///   +40 r8      arg4
///   +48 r9      arg5
///   +56 rip     from rcx
///   +64 rflags  from r11
///   +72 rsp     user stack
/// ```
#[derive(Debug)]
#[repr(C)]
pub struct SyscallFrame {
    pub rax: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub r10: u64,
    pub r8: u64,
    pub r9: u64,
    pub rip: u64,
    pub rflags: u64,
    pub rsp: u64,
}

impl SyscallFrame {
    /// Arguments in ABI order.
    #[must_use]
    pub const fn args(&self) -> [u64; 6] {
        [self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
    }
}

const _: () = {
    use core::mem::offset_of;
    assert!(offset_of!(SyscallFrame, rax) == 0);
    assert!(offset_of!(SyscallFrame, r10) == 32);
    assert!(offset_of!(SyscallFrame, rip) == 56);
    assert!(offset_of!(SyscallFrame, rsp) == 72);
};

/// Top of the gateway's kernel stack, read by the stub.
static KERNEL_STACK_TOP: AtomicU64 = AtomicU64::new(0);

/// The caller's `rsp` between the stack switch and the first push.
static USER_RSP: AtomicU64 = AtomicU64::new(0);

pub(super) fn set_kernel_stack(top: VirtualAddress) {
    KERNEL_STACK_TOP.store(top.as_u64() & !0xF, Ordering::Release);
}

/// `IA32_LSTAR` target.
///
/// On entry `rcx` holds the return address, `r11` the caller's RFLAGS and
/// `rsp` is still the user stack. Interrupts are masked by `IA32_FMASK`.
/// Everything except `rax`, `rcx` and `r11` is returned as the caller left
/// it; callee-saved registers are preserved by the Rust handler.
#[unsafe(naked)]
pub extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "mov qword ptr [rip + {user_rsp}], rsp",
        "mov rsp, qword ptr [rip + {kstack}]",

        // Ten pushes from a 16-byte aligned top leave rsp aligned for the call.
        "push qword ptr [rip + {user_rsp}]",
        "push r11",
        "push rcx",
        "push r9",
        "push r8",
        "push r10",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rax",

        "mov rdi, rsp",
        "call {rust}",

        "mov rax, [rsp + 0]",
        "mov rdi, [rsp + 8]",
        "mov rsi, [rsp + 16]",
        "mov rdx, [rsp + 24]",
        "mov r10, [rsp + 32]",
        "mov r8,  [rsp + 40]",
        "mov r9,  [rsp + 48]",
        "mov rcx, [rsp + 56]",
        "mov r11, [rsp + 64]",
        "mov rsp, [rsp + 72]",
        "sysretq",

        user_rsp = sym USER_RSP,
        kstack = sym KERNEL_STACK_TOP,
        rust = sym super::handle,
    );
}
