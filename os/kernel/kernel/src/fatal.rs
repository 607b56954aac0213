//! # Fatal conditions
//!
//! Library crates return errors; the kernel decides which of them end the
//! boot. Everything that does goes through [`halt_with`], which reports
//! the failing subsystem and stops the CPU.

use kernel_alloc::HeapError;
use kernel_exec::{ElfError, EnvironmentError};
use kernel_vmem::PagingError;
use log::error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fatal {
    #[error("memory map is malformed (len {len}, stride {stride})")]
    BadMemoryMap { len: u64, stride: u64 },
    #[error("no heap page survived the virtual mapping")]
    NoHeapMemory,
    #[error("no program image was handed over")]
    NoProgramImage,
    #[error("{0} installed twice")]
    AlreadyInstalled(&'static str),
    #[error(transparent)]
    Paging(#[from] PagingError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Elf(#[from] ElfError),
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    #[error("return address {0:#x} is not a user address")]
    BadReturnAddress(u64),
}

impl Fatal {
    /// The subsystem that gave up.
    #[must_use]
    pub const fn subsystem(&self) -> &'static str {
        match self {
            Self::BadMemoryMap { .. } | Self::NoProgramImage => "boot",
            Self::AlreadyInstalled(_) => "cpu",
            Self::Paging(_) => "paging",
            Self::NoHeapMemory | Self::Heap(_) => "heap",
            Self::Elf(_) => "elf",
            Self::Environment(_) => "environment",
            Self::BadReturnAddress(_) => "syscall",
        }
    }
}

/// Logs `fatal` and halts.
pub fn halt_with(fatal: &Fatal) -> ! {
    error!("{}: {fatal}", fatal.subsystem());
    halt()
}

/// Masks interrupts and parks the CPU for good.
pub fn halt() -> ! {
    loop {
        // Safety: ring 0 only; nothing runs after this.
        unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) };
    }
}
