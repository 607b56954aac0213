use crate::msr::{Msr, msr_access};
use bitfield_struct::bitfield;

/// `IA32_STAR`: segment selector bases for `SYSCALL` and `SYSRET`.
///
/// ```text
/// SYSCALL: CS = syscall_cs,           SS = syscall_cs + 8
/// SYSRET:  CS = (sysret_base + 16)|3, SS = (sysret_base + 8)|3
/// ```
#[bitfield(u64)]
pub struct Ia32Star {
    /// Legacy-mode `SYSCALL` target EIP. Unused in long mode.
    #[bits(32)]
    pub legacy_eip: u32,
    /// Kernel code selector loaded on `SYSCALL`.
    #[bits(16)]
    pub syscall_cs: u16,
    /// Base from which `SYSRET` derives the user selectors.
    #[bits(16)]
    pub sysret_base: u16,
}

impl Ia32Star {
    pub const MSR: Msr = Msr::new(0xC000_0081);

    /// STAR value for a GDT laid out as kernel code, kernel data, user data,
    /// user code. `user_cs` must sit directly after the user data selector.
    #[must_use]
    pub const fn for_selectors(kernel_cs: u16, user_cs: u16) -> Self {
        debug_assert!(kernel_cs & 0b11 == 0, "kernel CS must be ring 0");
        debug_assert!(user_cs >> 3 >= 2, "user CS needs a data selector before it");

        // SYSRET loads CS from base + 16, so base sits two slots below user CS.
        let base = ((user_cs >> 3) - 2) << 3;
        Self::new().with_syscall_cs(kernel_cs).with_sysret_base(base)
    }
}

msr_access!(Ia32Star);
