//! Model-specific registers used by the fast system-call path.

/// Implements the unsafe load/store traits for a bitfield MSR type with an `MSR` constant.
macro_rules! msr_access {
    ($ty:ty) => {
        #[cfg(feature = "asm")]
        impl $crate::LoadRegisterUnsafe for $ty {
            unsafe fn load_unsafe() -> Self {
                Self::from_bits(unsafe { Self::MSR.load_raw() })
            }
        }

        #[cfg(feature = "asm")]
        impl $crate::StoreRegisterUnsafe for $ty {
            unsafe fn store_unsafe(self) {
                unsafe { Self::MSR.store_raw(self.into_bits()) }
            }
        }
    };
}

pub(crate) use msr_access;

mod fmask;
mod lstar;
mod star;

pub use fmask::Ia32Fmask;
pub use lstar::Ia32Lstar;
pub use star::Ia32Star;

/// Index of a model-specific register, as passed in `ECX` to `rdmsr`/`wrmsr`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Msr(u32);

impl Msr {
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Writes `val` with `wrmsr`.
    ///
    /// # Safety
    /// Ring 0 only, and the MSR must exist on this CPU; otherwise `#GP(0)`.
    #[cfg(feature = "asm")]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn store_raw(self, val: u64) {
        let lo = val as u32;
        let hi = (val >> 32) as u32;
        unsafe {
            core::arch::asm!(
                "wrmsr",
                in("ecx") self.0,
                in("eax") lo,
                in("edx") hi,
                options(nostack, preserves_flags)
            );
        }
    }

    /// Reads the register with `rdmsr`.
    ///
    /// # Safety
    /// See [`Msr::store_raw`].
    #[cfg(feature = "asm")]
    #[inline]
    pub unsafe fn load_raw(self) -> u64 {
        let lo: u32;
        let hi: u32;
        unsafe {
            core::arch::asm!(
                "rdmsr",
                in("ecx") self.0,
                out("eax") lo,
                out("edx") hi,
                options(nomem, nostack, preserves_flags)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
}
