//! System-call numbers and conventions shared by the kernel and userland.
//!
//! The number goes in `rax`, arguments in `rdi`, `rsi`, `rdx`, `r10`, `r8`
//! and `r9`, and the result comes back in `rax`. `rcx` and `r11` are
//! clobbered by `syscall`/`sysret`.

/// File descriptor of the console.
pub const STDOUT: u64 = 1;

/// Returned in `rax` by a failed or unknown system call.
pub const SYSCALL_FAILED: u64 = u64::MAX;

#[repr(u64)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sysno {
    /// `write(fd, buf, len)`: writes `len` bytes to the console. Only
    /// [`STDOUT`] is accepted. Returns the number of bytes written.
    Write = 1,
    /// `exit(code)`: ends the program. Does not return.
    Exit = 60,
}

impl Sysno {
    #[must_use]
    pub const fn from_raw(nr: u64) -> Option<Self> {
        match nr {
            1 => Some(Self::Write),
            60 => Some(Self::Exit),
            _ => None,
        }
    }
}

impl From<Sysno> for u64 {
    fn from(value: Sysno) -> Self {
        value as Self
    }
}
