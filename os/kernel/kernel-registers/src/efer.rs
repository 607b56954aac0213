use crate::msr::Msr;
use bitfield_struct::bitfield;

/// Extended Feature Enable Register (`IA32_EFER`).
#[bitfield(u64)]
pub struct Efer {
    /// Bit 0: `SYSCALL`/`SYSRET` enable.
    pub sce: bool,
    #[bits(7)]
    _reserved1: u8,
    /// Bit 8: long mode enable.
    pub lme: bool,
    _reserved2: bool,
    /// Bit 10: long mode active (read-only).
    pub lma: bool,
    /// Bit 11: no-execute enable, makes the NX bit in page entries legal.
    pub nxe: bool,
    pub svme: bool,
    pub lmsle: bool,
    pub ffxsr: bool,
    pub tce: bool,
    #[bits(48)]
    _reserved3: u64,
}

impl Efer {
    pub const MSR: Msr = Msr::new(0xC000_0080);
}

#[cfg(feature = "asm")]
impl crate::LoadRegisterUnsafe for Efer {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(unsafe { Self::MSR.load_raw() })
    }
}

#[cfg(feature = "asm")]
impl crate::StoreRegisterUnsafe for Efer {
    unsafe fn store_unsafe(self) {
        unsafe { Self::MSR.store_raw(self.into_bits()) }
    }
}
