use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3 without PCID: top-level table base plus the two cache-control bits.
#[bitfield(u64)]
pub struct Cr3 {
    #[bits(3)]
    _reserved1: u8,
    /// Page-level write-through for the top-level table.
    pub pwt: bool,
    /// Page-level cache disable for the top-level table.
    pub pcd: bool,
    #[bits(7)]
    _reserved2: u8,
    /// Bits 51..12 of the top-level table's physical address.
    #[bits(40)]
    root_4k: u64,
    #[bits(12)]
    _reserved3: u16,
}

impl Cr3 {
    /// CR3 value selecting `root` as the active address space, write-back cached.
    #[must_use]
    pub const fn for_root(root: PhysicalPage<Size4K>) -> Self {
        Self::new().with_root_4k(root.base().as_u64() >> 12)
    }

    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_addr(PhysicalAddress::new(self.root_4k() << 12))
    }
}

#[cfg(feature = "asm")]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(feature = "asm")]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) self.into_bits(), options(nostack, preserves_flags));
        }
    }
}
