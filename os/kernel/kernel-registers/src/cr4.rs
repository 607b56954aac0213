use bitfield_struct::bitfield;

/// CR4, low architectural bits.
#[bitfield(u64)]
pub struct Cr4 {
    pub vme: bool,
    pub pvi: bool,
    pub tsd: bool,
    pub de: bool,
    /// Bit 4: 4 MiB pages in legacy paging. Ignored in long mode.
    pub pse: bool,
    /// Bit 5: physical address extension, required for 4-level paging.
    pub pae: bool,
    pub mce: bool,
    /// Bit 7: honor the global bit in leaf entries.
    pub pge: bool,
    pub pce: bool,
    pub osfxsr: bool,
    pub osxmmexcpt: bool,
    pub umip: bool,
    /// Bit 12: 5-level paging. Must stay clear for this kernel.
    pub la57: bool,
    #[bits(7)]
    _reserved1: u8,
    pub smep: bool,
    pub smap: bool,
    #[bits(42)]
    _reserved2: u64,
}

#[cfg(feature = "asm")]
impl crate::LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        let cr4: u64;
        unsafe {
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr4)
    }
}

#[cfg(feature = "asm")]
impl crate::StoreRegisterUnsafe for Cr4 {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!("mov cr4, {}", in(reg) self.into_bits(), options(nostack, preserves_flags));
        }
    }
}
