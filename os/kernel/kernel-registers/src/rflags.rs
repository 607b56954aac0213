use bitfield_struct::bitfield;

/// The RFLAGS register.
#[bitfield(u64)]
pub struct Rflags {
    pub cf_carry: bool,
    /// Bit 1 reads as one.
    #[bits(default = true)]
    _always_one: bool,
    pub pf_parity: bool,
    _reserved1: bool,
    pub af_adjust: bool,
    _reserved2: bool,
    pub zf_zero: bool,
    pub sf_sign: bool,
    pub tf_trap: bool,
    /// Bit 9: maskable interrupts enabled.
    pub if_interrupt_enable: bool,
    pub df_direction: bool,
    pub of_overflow: bool,
    #[bits(2)]
    pub iopl: u8,
    pub nt_nested: bool,
    _reserved3: bool,
    pub rf_resume: bool,
    pub vm_virtual_8086: bool,
    pub ac_alignment_check: bool,
    pub vif_virtual_interrupt: bool,
    pub vip_virtual_interrupt_pending: bool,
    pub id_cpuid: bool,
    #[bits(42)]
    _reserved4: u64,
}

impl Rflags {
    /// Flags for the first instruction of a user program: interrupts on,
    /// everything else clear (`0x202`).
    #[must_use]
    pub const fn user_entry() -> Self {
        Self::new().with_if_interrupt_enable(true)
    }
}

#[cfg(feature = "asm")]
impl crate::LoadRegister for Rflags {
    fn load() -> Self {
        let r: u64;
        unsafe {
            core::arch::asm!("pushfq", "pop {}", out(reg) r, options(nomem, preserves_flags));
        }
        Self::from_bits(r)
    }
}
