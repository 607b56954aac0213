use crate::msr::{Msr, msr_access};
use bitfield_struct::bitfield;

/// `IA32_FMASK`: RFLAGS bits cleared on `SYSCALL` entry.
///
/// Only the flags a syscall entry cares about are named; the rest stay zero
/// so they pass through unchanged.
#[bitfield(u64)]
pub struct Ia32Fmask {
    #[bits(8)]
    _reserved1: u8,
    /// Bit 8: clear TF so single-stepping does not trap inside the entry stub.
    pub tf_trap: bool,
    /// Bit 9: clear IF so the entry stub runs with interrupts masked.
    pub if_interrupt_enable: bool,
    /// Bit 10: clear DF, the ABI expects it clear.
    pub df_direction: bool,
    _reserved2: bool,
    #[bits(6)]
    _reserved3: u8,
    /// Bit 18: clear AC.
    pub ac_alignment_check: bool,
    #[bits(45)]
    _reserved4: u64,
}

impl Ia32Fmask {
    pub const MSR: Msr = Msr::new(0xC000_0084);

    /// Clears IF, TF and DF on entry.
    #[must_use]
    pub const fn syscall_entry() -> Self {
        Self::new()
            .with_if_interrupt_enable(true)
            .with_tf_trap(true)
            .with_df_direction(true)
    }
}

msr_access!(Ia32Fmask);
