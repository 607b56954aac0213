//! # System-call dispatch
//!
//! The part of the system-call gateway that does not touch the CPU: given
//! the number and arguments the entry stub captured, run the call and say
//! whether to return to the caller or stop the program.
//!
//! | Number | Call | Result |
//! |--------|------|--------|
//! | 1 | `write(fd, buf, len)` | bytes written; only fd 1 is accepted |
//! | 60 | `exit(code)` | does not return |
//! | other | | [`SYSCALL_FAILED`] |
//!
//! The console and the caller's memory come in through [`Console`] and
//! [`UserMemory`] so the table can be exercised off target. On target the
//! caller's memory is [`PagedUserMemory`], which checks buffers against the
//! program's page table.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod dispatch;
mod paged;

pub use dispatch::{Console, SyscallError, SyscallOutcome, UserMemory, dispatch, user_buffer};
pub use paged::PagedUserMemory;
pub use stdlib::syscall_abi::{STDOUT, SYSCALL_FAILED, Sysno};
