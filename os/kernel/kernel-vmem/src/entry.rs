//! # Page-table entries
//!
//! One 64-bit layout serves all four levels. Which fields matter depends on
//! the level and on `PS`:
//!
//! | Level | `PS=0`                | `PS=1`           |
//! |-------|-----------------------|------------------|
//! | L4    | next table (PDPT)     | reserved         |
//! | L3    | next table (PD)       | 1 GiB leaf       |
//! | L2    | next table (PT)       | 2 MiB leaf       |
//! | L1    | 4 KiB leaf (bit 7 is PAT, never set here) | |
//!
//! Bit 9 (available to software) marks a link to a table **owned** by the
//! address space holding the entry. Links copied into a user table from the
//! kernel's table have it cleared; such tables are shared and must be cloned
//! before they are written through.

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size2M, Size4K};
use bitfield_struct::bitfield;

#[bitfield(u64, debug = false)]
#[derive(PartialEq, Eq)]
pub struct PageEntry {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User-accessible (bit 2). Effective only if set on every level of the walk.
    pub user: bool,
    /// Write-through (bit 3).
    pub write_through: bool,
    /// Cache disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5), set by the CPU.
    pub accessed: bool,
    /// Dirty (bit 6), set by the CPU on leaves.
    pub dirty: bool,
    /// Page size (bit 7): leaf at L3/L2.
    pub page_size: bool,
    /// Global (bit 8), leaves only.
    pub global: bool,
    /// Software bit 9: the linked table belongs to this address space.
    pub owned: bool,
    #[bits(2)]
    pub os_available: u8,
    /// Physical address bits 12..51.
    #[bits(40)]
    phys_51_12: u64,
    #[bits(11)]
    _reserved1: u16,
    /// No-execute (bit 63). Requires `EFER.NXE`.
    pub no_execute: bool,
}

impl PageEntry {
    /// A non-present entry.
    pub const EMPTY: Self = Self::new();

    /// Physical address stored in bits 12..51.
    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_51_12() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn with_address(self, pa: PhysicalAddress) -> Self {
        self.with_phys_51_12(pa.as_u64() >> 12)
    }

    /// Present link to a lower-level table.
    #[inline]
    #[must_use]
    pub const fn is_table(self) -> bool {
        self.present() && !self.page_size()
    }

    /// Present large-page leaf (at L3 or L2).
    #[inline]
    #[must_use]
    pub const fn is_huge(self) -> bool {
        self.present() && self.page_size()
    }

    /// Link to the table at `table`.
    #[inline]
    #[must_use]
    pub const fn table(table: PhysicalPage<Size4K>, writable: bool, user: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_user(user)
            .with_owned(true)
            .with_address(table.base())
    }

    /// The same link as seen from an address space that does not own the target.
    #[inline]
    #[must_use]
    pub const fn shared(self) -> Self {
        if self.is_table() {
            self.with_owned(false)
        } else {
            self
        }
    }

    #[inline]
    #[must_use]
    pub const fn leaf_4k(page: PhysicalPage<Size4K>, bits: crate::PageBits) -> Self {
        bits.apply(Self::new().with_present(true).with_address(page.base()))
    }

    #[inline]
    #[must_use]
    pub const fn leaf_2m(page: PhysicalPage<Size2M>, bits: crate::PageBits) -> Self {
        bits.apply(
            Self::new()
                .with_present(true)
                .with_page_size(true)
                .with_address(page.base()),
        )
    }
}

impl core::fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if !self.present() {
            return f.write_str("PageEntry(-)");
        }
        write!(
            f,
            "PageEntry({:?} {}{}{}{}{})",
            self.address(),
            if self.page_size() { "PS " } else { "" },
            if self.writable() { "W" } else { "R" },
            if self.user() { "U" } else { "S" },
            if self.no_execute() { " NX" } else { "" },
            if self.owned() { " own" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageBits;

    #[test]
    fn address_round_trips_through_bits_12_to_51() {
        let pa = PhysicalAddress::new(0x000f_ffff_ffff_f000);
        let e = PageEntry::new().with_address(pa);
        assert_eq!(e.address(), pa);
        assert_eq!(e.into_bits(), pa.as_u64());
    }

    #[test]
    fn table_links_are_owned_and_shared_copies_are_not() {
        let page = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x40_0000));
        let link = PageEntry::table(page, true, false);
        assert!(link.is_table());
        assert!(link.owned());
        assert_eq!(link.into_bits(), 0x40_0000 | 0b11 | (1 << 9));

        let shared = link.shared();
        assert!(!shared.owned());
        assert_eq!(shared.address(), link.address());
    }

    #[test]
    fn sharing_a_leaf_is_a_no_op() {
        let page = PhysicalPage::<Size2M>::from_addr(PhysicalAddress::new(0x20_0000));
        let leaf = PageEntry::leaf_2m(page, PageBits::kernel_rw());
        assert!(leaf.is_huge());
        assert!(!leaf.is_table());
        assert_eq!(leaf.shared(), leaf);
    }
}
