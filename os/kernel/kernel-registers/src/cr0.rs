use bitfield_struct::bitfield;

/// CR0 in 64-bit mode. Only the bits the kernel inspects or sets are named.
#[bitfield(u64)]
pub struct Cr0 {
    /// Bit 0: protected mode.
    pub pe_protection_enable: bool,
    pub mp_monitor_coprocessor: bool,
    pub em_emulation: bool,
    pub ts_task_switched: bool,
    pub et_extension_type: bool,
    pub ne_numeric_error: bool,
    #[bits(10)]
    _reserved1: u16,
    /// Bit 16: supervisor writes honor read-only pages.
    pub wp_write_protect: bool,
    _reserved2: bool,
    pub am_alignment_mask: bool,
    #[bits(10)]
    _reserved3: u16,
    pub nw_not_write_through: bool,
    pub cd_cache_disable: bool,
    /// Bit 31: paging enable.
    pub pg_paging: bool,
    #[bits(32)]
    _reserved4: u32,
}

#[cfg(feature = "asm")]
impl crate::LoadRegisterUnsafe for Cr0 {
    unsafe fn load_unsafe() -> Self {
        let cr0: u64;
        unsafe {
            core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr0)
    }
}

#[cfg(feature = "asm")]
impl crate::StoreRegisterUnsafe for Cr0 {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!("mov cr0, {}", in(reg) self.into_bits(), options(nostack, preserves_flags));
        }
    }
}
