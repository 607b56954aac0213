//! # Early physical allocator
//!
//! Bootstrap bump allocator for page-table frames. It reserves one
//! contiguous, size-aligned slice of conventional memory before anything
//! else is mapped and hands it out page by page. Nothing is ever returned.
//!
//! Because every table comes out of that one slice, a table is addressed by
//! its index in the slice ([`TableId`]). Converting a link in an entry back
//! to an index also checks that the link targets a table this allocator
//! produced.

use crate::PagingError;
use kernel_info::boot::{MemoryMap, MemoryType};
use kernel_info::memory::PAGE_SIZE_4K;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use log::debug;

/// Index of a page-table frame inside the early allocator's slice.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableId(u32);

impl TableId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// `(base, capacity, offset)` cursor over the reserved slice.
#[derive(Debug)]
pub struct EarlyAllocator {
    base: PhysicalAddress,
    capacity: u64,
    offset: u64,
}

impl EarlyAllocator {
    /// Wraps an already reserved slice.
    ///
    /// # Panics
    /// In debug builds, if `base` or `capacity` are not page multiples.
    #[must_use]
    pub const fn new(base: PhysicalAddress, capacity: u64) -> Self {
        debug_assert!(base.as_u64().is_multiple_of(PAGE_SIZE_4K));
        debug_assert!(capacity.is_multiple_of(PAGE_SIZE_4K));
        Self {
            base,
            capacity,
            offset: 0,
        }
    }

    /// Claims `capacity` bytes, aligned to `capacity`, from the first
    /// conventional entry that can hold them.
    ///
    /// The chosen entry is rewritten in place to describe whichever leftover
    /// is larger, the unaligned head in front of the reservation or the tail
    /// behind it, so later passes over the map never see the reserved frames.
    /// The smaller leftover is given up. Address zero is never handed out.
    ///
    /// # Errors
    /// [`PagingError::NoReservableRegion`] if no entry is large enough.
    pub fn reserve(map: &mut MemoryMap, capacity: u64) -> Result<Self, PagingError> {
        debug_assert!(capacity.is_power_of_two() && capacity >= PAGE_SIZE_4K);

        for i in 0..map.len() {
            let Some(mut entry) = map.get(i) else {
                continue;
            };
            if entry.memory_type() != Some(MemoryType::Conventional) {
                continue;
            }

            let end = entry.physical_end();
            let Some(start) = entry
                .physical_start
                .max(1)
                .checked_next_multiple_of(capacity)
            else {
                continue;
            };
            let Some(reservation_end) = start.checked_add(capacity) else {
                continue;
            };
            if reservation_end > end {
                continue;
            }

            let head = start - entry.physical_start;
            let tail = end - reservation_end;
            if head > tail {
                entry.page_count = head / PAGE_SIZE_4K;
            } else {
                entry.physical_start = reservation_end;
                entry.page_count = tail / PAGE_SIZE_4K;
            }
            map.set(i, &entry);

            debug!(
                "early allocator: reserved {capacity:#x} bytes at {start:#x} from map entry {i}"
            );
            return Ok(Self::new(PhysicalAddress::new(start), capacity));
        }

        Err(PagingError::NoReservableRegion {
            requested: capacity,
        })
    }

    /// Next unused 4 KiB page. The contents are whatever was in memory.
    ///
    /// # Errors
    /// [`PagingError::EarlyAllocatorExhausted`] once the slice is used up.
    pub fn alloc_page(&mut self) -> Result<PhysicalPage<Size4K>, PagingError> {
        if self.offset + PAGE_SIZE_4K > self.capacity {
            return Err(PagingError::EarlyAllocatorExhausted {
                capacity: self.capacity,
            });
        }
        let page = PhysicalPage::from_addr(self.base + self.offset);
        self.offset += PAGE_SIZE_4K;
        Ok(page)
    }

    /// Like [`alloc_page`](Self::alloc_page), as an arena index.
    ///
    /// # Errors
    /// See [`alloc_page`](Self::alloc_page).
    #[allow(clippy::cast_possible_truncation)]
    pub fn alloc_table(&mut self) -> Result<TableId, PagingError> {
        let page = self.alloc_page()?;
        Ok(TableId(((page.base().as_u64() - self.base.as_u64()) / PAGE_SIZE_4K) as u32))
    }

    /// Physical frame of table `id`.
    #[must_use]
    pub const fn table_page(&self, id: TableId) -> PhysicalPage<Size4K> {
        PhysicalPage::from_addr(PhysicalAddress::new(
            self.base.as_u64() + id.0 as u64 * PAGE_SIZE_4K,
        ))
    }

    /// The table a link points at, if it is one of ours and already handed out.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn table_id(&self, pa: PhysicalAddress) -> Option<TableId> {
        let offset = pa.distance_from(self.base)?;
        (offset < self.offset && offset.is_multiple_of(PAGE_SIZE_4K))
            .then(|| TableId((offset / PAGE_SIZE_4K) as u32))
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes handed out so far.
    #[must_use]
    pub const fn used(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::MemoryMapEntry;

    fn map_bytes(entries: &[MemoryMapEntry]) -> Vec<u8> {
        let stride = 48;
        let mut bytes = vec![0u8; entries.len() * stride];
        let mut map = MemoryMap::new(&mut bytes, stride).unwrap();
        for (i, e) in entries.iter().enumerate() {
            map.set(i, e);
        }
        bytes
    }

    #[test]
    fn reserve_aligns_and_shrinks_entry_in_place() {
        let mut bytes = map_bytes(&[
            MemoryMapEntry::new(MemoryType::LoaderCode, 0x10_0000, 16),
            // 0x30_0000 .. 0x130_0000, 16 MiB
            MemoryMapEntry::new(MemoryType::Conventional, 0x30_0000, 4096),
        ]);
        let mut map = MemoryMap::new(&mut bytes, 48).unwrap();

        let early = EarlyAllocator::reserve(&mut map, 0x40_0000).unwrap();
        assert_eq!(early.base(), PhysicalAddress::new(0x40_0000));

        let shrunk = map.get(1).unwrap();
        assert_eq!(shrunk.physical_start, 0x80_0000);
        assert_eq!(shrunk.physical_end(), 0x130_0000);
        // the loader entry is untouched
        assert_eq!(map.get(0).unwrap().physical_start, 0x10_0000);
    }

    #[test]
    fn reserve_keeps_the_larger_head_instead_of_the_tail() {
        let mut bytes = map_bytes(&[
            // 0x8_0000 .. 0x88_0000: 3.5 MiB in front of the aligned slice, 0.5 MiB behind
            MemoryMapEntry::new(MemoryType::Conventional, 0x8_0000, 0x800),
        ]);
        let mut map = MemoryMap::new(&mut bytes, 48).unwrap();

        let early = EarlyAllocator::reserve(&mut map, 0x40_0000).unwrap();
        assert_eq!(early.base(), PhysicalAddress::new(0x40_0000));

        let kept = map.get(0).unwrap();
        assert_eq!(kept.physical_start, 0x8_0000);
        assert_eq!(kept.physical_end(), 0x40_0000);
    }

    #[test]
    fn reserve_skips_entries_too_small_after_alignment() {
        let mut bytes = map_bytes(&[
            // 4 MiB long but straddles an alignment boundary
            MemoryMapEntry::new(MemoryType::Conventional, 0x10_0000, 1024),
            MemoryMapEntry::new(MemoryType::Reserved, 0x100_0000, 4096),
        ]);
        let mut map = MemoryMap::new(&mut bytes, 48).unwrap();
        assert_eq!(
            EarlyAllocator::reserve(&mut map, 0x40_0000).unwrap_err(),
            PagingError::NoReservableRegion {
                requested: 0x40_0000
            }
        );
    }

    #[test]
    fn never_reserves_address_zero() {
        let mut bytes = map_bytes(&[MemoryMapEntry::new(MemoryType::Conventional, 0, 4096)]);
        let mut map = MemoryMap::new(&mut bytes, 48).unwrap();
        let early = EarlyAllocator::reserve(&mut map, 0x40_0000).unwrap();
        assert_eq!(early.base(), PhysicalAddress::new(0x40_0000));
    }

    #[test]
    fn alloc_until_exhausted() {
        let mut early = EarlyAllocator::new(PhysicalAddress::new(0x20_0000), 3 * PAGE_SIZE_4K);
        let a = early.alloc_table().unwrap();
        let b = early.alloc_table().unwrap();
        assert_eq!(early.alloc_page().unwrap().base().as_u64(), 0x20_2000);
        assert_eq!(
            early.alloc_page().unwrap_err(),
            PagingError::EarlyAllocatorExhausted {
                capacity: 3 * PAGE_SIZE_4K
            }
        );

        assert_eq!(early.table_page(b).base().as_u64(), 0x20_1000);
        assert_eq!(early.table_id(PhysicalAddress::new(0x20_0000)), Some(a));
        assert_eq!(early.table_id(PhysicalAddress::new(0x1f_f000)), None);
        assert_eq!(early.table_id(PhysicalAddress::new(0x20_3000)), None);
        assert_eq!(early.used(), 3 * PAGE_SIZE_4K);
    }
}
