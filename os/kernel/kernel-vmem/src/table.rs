//! # Tables and indices
//!
//! A virtual address splits into four 9-bit table indices and a page offset:
//!
//! ```text
//! | 63..48 | 47..39 | 38..30 | 29..21 | 20..12 | 11..0  |
//! |  sign  |   L4   |   L3   |   L2   |   L1   | offset |
//! ```

use crate::PageEntry;
use kernel_memory_addresses::VirtualAddress;

/// Entries per table at every level.
pub const ENTRIES: usize = 512;

/// One 4 KiB page-table frame of 512 entries.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageTable {
    entries: [PageEntry; ENTRIES],
}

impl PageTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [PageEntry::EMPTY; ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: usize) -> PageEntry {
        self.entries[i]
    }

    #[inline]
    pub const fn set(&mut self, i: usize, e: PageEntry) {
        self.entries[i] = e;
    }

    pub fn zero(&mut self) {
        self.entries.fill(PageEntry::EMPTY);
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, PageEntry)> + '_ {
        self.entries.iter().copied().enumerate()
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert!(size_of::<PageTable>() == 4096);

macro_rules! level_index {
    ($name:ident, $shift:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u16);

        impl $name {
            #[inline]
            #[must_use]
            #[allow(clippy::cast_possible_truncation)]
            pub const fn of(va: VirtualAddress) -> Self {
                Self(((va.as_u64() >> $shift) & 0x1ff) as u16)
            }

            /// Panics (debug) for values above 511.
            #[inline]
            #[must_use]
            pub const fn new(i: u16) -> Self {
                debug_assert!(i < 512);
                Self(i)
            }

            #[inline]
            #[must_use]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }
        }
    };
}

level_index!(L4Index, 39, "Index into the top-level table (bits 47..39).");
level_index!(L3Index, 30, "Index into a directory-pointer table (bits 38..30).");
level_index!(L2Index, 21, "Index into a directory (bits 29..21).");
level_index!(L1Index, 12, "Index into a leaf table (bits 20..12).");

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (L4Index, L3Index, L2Index, L1Index) {
    (
        L4Index::of(va),
        L3Index::of(va),
        L2Index::of(va),
        L1Index::of(va),
    )
}

/// First index of the kernel half in a top-level table.
pub const KERNEL_HALF_START: usize = 256;
