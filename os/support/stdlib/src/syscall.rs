use crate::syscall_abi::{STDOUT, SYSCALL_FAILED, Sysno};

/// Writes `buf` to the console. Returns the number of bytes written, or
/// `None` if the kernel refused the call.
#[inline]
pub fn sys_write(buf: &[u8]) -> Option<usize> {
    let mut ret: u64;
    unsafe {
        core::arch::asm!(
            "syscall",
            inlateout("rax") Sysno::Write as u64 => ret,
            in("rdi") STDOUT,
            in("rsi") buf.as_ptr(),
            in("rdx") buf.len(),
            lateout("rcx") _, // clobbered by SYSCALL
            lateout("r11") _, // clobbered by SYSCALL
            options(nostack)
        );
    }
    if ret == SYSCALL_FAILED {
        None
    } else {
        usize::try_from(ret).ok()
    }
}

/// Ends the program with `code`.
#[inline]
pub fn sys_exit(code: i32) -> ! {
    unsafe {
        core::arch::asm!(
            "syscall",
            in("rax") Sysno::Exit as u64,
            in("rdi") i64::from(code),
            options(noreturn, nostack)
        );
    }
}
