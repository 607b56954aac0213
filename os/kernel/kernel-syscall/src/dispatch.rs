//! # Call table
//!
//! [`dispatch`] decodes the number, runs the call and turns failures into
//! [`SYSCALL_FAILED`]. Buffers handed in by the program go through
//! [`user_buffer`] first: every page they touch must be present and
//! user-accessible in the caller's table before a byte is read.

use kernel_info::memory::{LAST_USERSPACE_ADDRESS, PAGE_SIZE_4K};
use kernel_memory_addresses::{Size4K, VirtualAddress};
use log::{debug, info, warn};
use stdlib::syscall_abi::{STDOUT, SYSCALL_FAILED, Sysno};

/// Byte sink behind file descriptor 1.
pub trait Console {
    fn write_byte(&mut self, byte: u8);
}

/// Read access to the calling program's memory.
pub trait UserMemory {
    /// Whether the 4 KiB page starting at `page` is present and
    /// user-accessible in the caller's address space.
    fn is_user_page(&self, page: VirtualAddress) -> bool;

    /// The `len` bytes at `addr`, if they are readable.
    ///
    /// Only called for ranges that [`user_buffer`] accepted.
    fn read(&self, addr: VirtualAddress, len: usize) -> Option<&[u8]>;
}

/// What the entry stub does after a call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Resume the caller with this value in `rax`.
    Return(u64),
    /// The program asked to stop.
    Exit(i32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyscallError {
    #[error("unknown system call {0}")]
    UnknownSyscall(u64),
    #[error("file descriptor {0} is not writable")]
    BadDescriptor(u64),
    #[error("buffer at {addr:#x} with {len} bytes is not user memory")]
    BadBuffer { addr: u64, len: u64 },
}

/// Runs system call `nr` with arguments `args` (`rdi`, `rsi`, `rdx`, `r10`,
/// `r8`, `r9`).
///
/// Failed calls return [`SYSCALL_FAILED`] without side effects.
pub fn dispatch<C, M>(nr: u64, args: [u64; 6], console: &mut C, memory: &M) -> SyscallOutcome
where
    C: Console + ?Sized,
    M: UserMemory + ?Sized,
{
    let result = match Sysno::from_raw(nr) {
        Some(Sysno::Write) => write(args[0], args[1], args[2], console, memory),
        Some(Sysno::Exit) => {
            #[allow(clippy::cast_possible_truncation)]
            let code = args[0] as i32;
            info!("syscall: exit({code})");
            return SyscallOutcome::Exit(code);
        }
        None => Err(SyscallError::UnknownSyscall(nr)),
    };

    match result {
        Ok(value) => SyscallOutcome::Return(value),
        Err(e) => {
            warn!("syscall: {e}");
            SyscallOutcome::Return(SYSCALL_FAILED)
        }
    }
}

fn write<C, M>(fd: u64, buf: u64, len: u64, console: &mut C, memory: &M) -> Result<u64, SyscallError>
where
    C: Console + ?Sized,
    M: UserMemory + ?Sized,
{
    if fd != STDOUT {
        return Err(SyscallError::BadDescriptor(fd));
    }
    if len == 0 {
        return Ok(0);
    }

    let (addr, size) = user_buffer(buf, len, memory)?;
    let bytes = memory
        .read(addr, size)
        .ok_or(SyscallError::BadBuffer { addr: buf, len })?;
    for &b in bytes {
        console.write_byte(b);
    }

    debug!("syscall: write({fd}, {addr}, {len})");
    Ok(len)
}

/// Checks that `[addr, addr + len)` is user memory of the caller.
///
/// The range must lie in the lower half, and every 4 KiB page it touches
/// must pass [`UserMemory::is_user_page`]. Supervisor-only pages, such as the
/// kernel mappings every user table shares, fail like unmapped ones.
///
/// # Errors
/// [`SyscallError::BadBuffer`] if the range wraps, reaches into the upper
/// half, does not fit a `usize` or touches a page the program cannot access.
pub fn user_buffer<M>(
    addr: u64,
    len: u64,
    memory: &M,
) -> Result<(VirtualAddress, usize), SyscallError>
where
    M: UserMemory + ?Sized,
{
    let bad = SyscallError::BadBuffer { addr, len };
    let last = addr.checked_add(len.saturating_sub(1)).ok_or(bad)?;
    if last > LAST_USERSPACE_ADDRESS {
        return Err(bad);
    }
    let size = usize::try_from(len).map_err(|_| bad)?;

    let start = VirtualAddress::new(addr);
    let mut page = start.align_down::<Size4K>().as_u64();
    // `last` is in the lower half, so stepping past it cannot overflow
    while page <= last {
        if !memory.is_user_page(VirtualAddress::new(page)) {
            return Err(bad);
        }
        page += PAGE_SIZE_4K;
    }
    Ok((start, size))
}
