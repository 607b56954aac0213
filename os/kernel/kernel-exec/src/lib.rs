//! # Program Execution
//!
//! Loads the embedded ELF64 program and runs it in ring 3:
//!
//! 1. [`ElfImage::load`] validates the image and stages every loadable
//!    segment in zeroed, page-aligned heap memory.
//! 2. [`setup_hazardous_environment`] gives the program its own top-level
//!    table, maps the staged segments and a user stack into it.
//! 3. [`enter_hazardous_environment`] loads that table and performs the
//!    `iretq` into the entry point through the [`Privileged`] interface.
//!
//! The privileged half is a trait so everything up to the final `iretq`
//! runs in host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod elf;
mod environment;
mod error;
#[cfg(test)]
mod test_image;

pub use elf::loader::ElfImage;
pub use environment::{HazardousContext, enter_hazardous_environment, setup_hazardous_environment};
pub use error::{ElfError, EnvironmentError};

use kernel_info::segments::{USER_CODE_SELECTOR, USER_DATA_SELECTOR};
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::rflags::Rflags;
use kernel_vmem::AddressSpaceLoader;

/// What `iretq` pops, lowest address first.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IretFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl IretFrame {
    /// Ring-3 frame with the user selectors and interrupts enabled.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn user(entry: VirtualAddress, stack: VirtualAddress) -> Self {
        Self {
            rip: entry.as_u64(),
            cs: USER_CODE_SELECTOR as u64,
            rflags: Rflags::user_entry().into_bits(),
            rsp: stack.as_u64(),
            ss: USER_DATA_SELECTOR as u64,
        }
    }
}

/// Privileged CPU operations needed to start a program.
pub trait Privileged: AddressSpaceLoader {
    /// Loads the user data selectors and executes `iretq` with `frame`.
    fn enter_user_mode(&mut self, frame: &IretFrame) -> !;
}
