//! # Heap page pool
//!
//! Tracks the 2 MiB pages that the virtual heap regions fully cover and
//! hands out contiguous runs of them, lowest address first.

use kernel_info::memory::HEAP_PAGE_SIZE;
use kernel_memory_addresses::{Size2M, VirtualAddress};
use kernel_vmem::VirtualRegion;
use log::{debug, warn};

/// Pages the pool can track, counted from its base. 8 GiB of heap.
pub const MAX_POOL_PAGES: usize = 4096;

const WORDS: usize = MAX_POOL_PAGES / 64;

#[derive(Clone)]
struct Bitmap([u64; WORDS]);

impl Bitmap {
    const fn new() -> Self {
        Self([0; WORDS])
    }

    const fn get(&self, i: usize) -> bool {
        self.0[i / 64] & (1 << (i % 64)) != 0
    }

    const fn set(&mut self, i: usize, value: bool) {
        if value {
            self.0[i / 64] |= 1 << (i % 64);
        } else {
            self.0[i / 64] &= !(1 << (i % 64));
        }
    }
}

/// First-fit allocator over heap pages.
///
/// Page `i` starts at `base + i * HEAP_PAGE_SIZE`. A page is *available*
/// when some region covers all of it and *in use* while allocated.
#[derive(Clone)]
pub struct PagePool {
    base: Option<VirtualAddress>,
    available: Bitmap,
    in_use: Bitmap,
    total: usize,
    used: usize,
}

impl Default for PagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PagePool")
            .field("base", &self.base)
            .field("total", &self.total)
            .field("used", &self.used)
            .finish()
    }
}

impl PagePool {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: None,
            available: Bitmap::new(),
            in_use: Bitmap::new(),
            total: 0,
            used: 0,
        }
    }

    /// Pool over every fully covered page of `regions`.
    ///
    /// The lowest region fixes the base; pass regions in ascending order.
    #[must_use]
    pub fn from_regions(regions: &[VirtualRegion]) -> Self {
        let mut pool = Self::new();
        for region in regions {
            pool.add_region(region);
        }
        pool
    }

    /// Makes the pages `region` fully covers available. Returns how many
    /// were added.
    pub fn add_region(&mut self, region: &VirtualRegion) -> usize {
        let Some(first) = region.virt.align_up::<Size2M>() else {
            return 0;
        };
        let end = region.end().align_down::<Size2M>();
        if end <= first {
            debug!("heap pool: region at {} covers no full page", region.virt);
            return 0;
        }

        let base = *self.base.get_or_insert(first);
        let Some(offset) = first.distance_from(base) else {
            warn!("heap pool: region at {first} lies below the pool base {base}");
            return 0;
        };

        let mut added = 0;
        let first_index = page_index(offset);
        let count = page_index(end.as_u64() - first.as_u64());
        for i in first_index..first_index + count {
            if i >= MAX_POOL_PAGES {
                warn!("heap pool: ignoring pages beyond {MAX_POOL_PAGES}");
                break;
            }
            if !self.available.get(i) {
                self.available.set(i, true);
                added += 1;
            }
        }

        self.total += added;
        debug!("heap pool: {added} pages from region at {}", region.virt);
        added
    }

    /// Claims `pages` contiguous available pages, lowest address first.
    pub fn alloc(&mut self, pages: usize) -> Option<VirtualAddress> {
        let base = self.base?;
        if pages == 0 || pages > self.total - self.used {
            return None;
        }

        let mut run = 0;
        for i in 0..MAX_POOL_PAGES {
            if self.available.get(i) && !self.in_use.get(i) {
                run += 1;
            } else {
                run = 0;
            }

            if run == pages {
                let first = i + 1 - pages;
                for j in first..=i {
                    self.in_use.set(j, true);
                }
                self.used += pages;
                return Some(base + page_offset(first));
            }
        }
        None
    }

    /// Returns a run previously handed out by [`alloc`](Self::alloc).
    ///
    /// Pages that are not in use are left alone; the return value says
    /// whether the whole run was.
    pub fn free(&mut self, start: VirtualAddress, pages: usize) -> bool {
        let Some(first) = self.index_of(start) else {
            return false;
        };
        if !start.is_aligned::<Size2M>() || first + pages > MAX_POOL_PAGES {
            return false;
        }

        let mut all = true;
        for i in first..first + pages {
            if self.in_use.get(i) {
                self.in_use.set(i, false);
                self.used -= 1;
            } else {
                all = false;
            }
        }
        all
    }

    /// Whether `va` lies in a page that is currently handed out.
    #[must_use]
    pub fn is_in_use(&self, va: VirtualAddress) -> bool {
        self.index_of(va).is_some_and(|i| self.in_use.get(i))
    }

    /// Whether `va` lies in a page the pool manages.
    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        self.index_of(va).is_some_and(|i| self.available.get(i))
    }

    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.total
    }

    #[must_use]
    pub const fn pages_in_use(&self) -> usize {
        self.used
    }

    fn index_of(&self, va: VirtualAddress) -> Option<usize> {
        let offset = va.distance_from(self.base?)?;
        let i = page_index(offset);
        (i < MAX_POOL_PAGES).then_some(i)
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn page_index(offset: u64) -> usize {
    (offset / HEAP_PAGE_SIZE) as usize
}

const fn page_offset(index: usize) -> u64 {
    index as u64 * HEAP_PAGE_SIZE
}
