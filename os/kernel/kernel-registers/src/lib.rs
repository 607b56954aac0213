//! # Typed `x86_64` Registers
//!
//! Bitfield models of the control registers and MSRs the kernel touches while
//! enabling paging and wiring the `SYSCALL`/`SYSRET` path. Each register lives
//! behind its own cargo feature; the `asm` feature adds the actual
//! load/store instructions so the encodings stay usable (and testable) on the
//! host.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "cr4")]
pub mod cr4;

#[cfg(feature = "efer")]
pub mod efer;

#[cfg(feature = "msr")]
pub mod msr;

#[cfg(feature = "rflags")]
pub mod rflags;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// Register access may be privileged and require Ring 0.
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// Writing a control register or MSR changes global CPU state; the caller
    /// must make sure the new value is consistent with the running code
    /// (e.g. the new page tables map the current instruction stream).
    unsafe fn store_unsafe(self);
}

/// Registers that can be read from any privilege level.
pub trait LoadRegister {
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}
