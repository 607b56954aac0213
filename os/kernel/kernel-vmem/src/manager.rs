//! # Page-table manager
//!
//! Owns the early allocator, the kernel's top-level table and the
//! higher-half cursor used by [`PageTableManager::map_virtual`].

use crate::table::{ENTRIES, split_indices};
use crate::{
    AddressSpaceLoader, EarlyAllocator, PageBits, PageEntry, PageTable, PagingError, PhysMapper,
    TableId,
};
use kernel_info::boot::{FramebufferInfo, MappingPolicy, MemoryMap, MemoryMapEntry};
use kernel_info::memory::{EARLY_ALLOC_CAPACITY, HEAP_MIN_PAGES, PAGE_SIZE_2M, PAGE_SIZE_4K, VIRT_HEAP_BASE};
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size1G, Size2M, Size4K, VirtualAddress,
};
use log::{debug, info, trace, warn};

/// Upper bound on recorded [`VirtualRegion`]s.
pub const MAX_VIRTUAL_REGIONS: usize = 32;

/// A physical range that [`PageTableManager::map_virtual`] placed in the higher half.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VirtualRegion {
    pub virt: VirtualAddress,
    pub phys: PhysicalAddress,
    /// Length in bytes (4 KiB multiple).
    pub size: u64,
}

impl VirtualRegion {
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.virt.as_u64() + self.size)
    }

    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.virt.as_u64() && va.as_u64() < self.end().as_u64()
    }
}

/// Granule of the leaf a translation ended at.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MappedSize {
    Size4K,
    Size2M,
    Size1G,
}

/// Result of walking a table for one virtual address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Translation {
    pub phys: PhysicalAddress,
    pub size: MappedSize,
    /// User access allowed: the user bit is set on every level of the walk.
    pub user: bool,
    /// Writes allowed: the writable bit is set on every level of the walk.
    pub writable: bool,
}

pub struct PageTableManager<M: PhysMapper> {
    mapper: M,
    early: EarlyAllocator,
    kernel_root: TableId,
    next_virtual: VirtualAddress,
    regions: [VirtualRegion; MAX_VIRTUAL_REGIONS],
    region_count: usize,
}

impl<M: PhysMapper> PageTableManager<M> {
    /// Manager with an empty kernel top-level table taken from `early`.
    ///
    /// # Errors
    /// If `early` cannot provide the first table.
    pub fn new(mapper: M, mut early: EarlyAllocator) -> Result<Self, PagingError> {
        let kernel_root = early.alloc_table()?;
        let mut this = Self {
            mapper,
            early,
            kernel_root,
            next_virtual: VirtualAddress::new(VIRT_HEAP_BASE),
            regions: [VirtualRegion {
                virt: VirtualAddress::zero(),
                phys: PhysicalAddress::zero(),
                size: 0,
            }; MAX_VIRTUAL_REGIONS],
            region_count: 0,
        };
        this.table_mut(kernel_root).zero();
        Ok(this)
    }

    /// Builds the kernel address space from the firmware memory map and
    /// activates it.
    ///
    /// 1. reserve the early allocator from conventional memory,
    /// 2. identity map that reservation,
    /// 3. identity map the framebuffer,
    /// 4. identity map firmware, loader, ACPI and MMIO entries and place
    ///    conventional entries of at least [`HEAP_MIN_PAGES`] pages in the
    ///    higher half (smaller ones and unknown types are skipped),
    /// 5. load the table and set the paging enable bits.
    ///
    /// # Errors
    /// Any [`PagingError`]; none of them leave a usable address space.
    pub fn setup(
        mapper: M,
        map: &mut MemoryMap,
        fb: &FramebufferInfo,
        cpu: &mut impl AddressSpaceLoader,
    ) -> Result<Self, PagingError> {
        let early = EarlyAllocator::reserve(map, EARLY_ALLOC_CAPACITY)?;
        let mut this = Self::new(mapper, early)?;

        this.map_identity(this.early.base(), this.early.capacity())?;
        if fb.size != 0 {
            this.map_identity(PhysicalAddress::new(fb.base), fb.size)?;
        }

        for i in 0..map.len() {
            let Some(mut entry) = map.get(i) else {
                continue;
            };

            match entry.memory_type().map(|t| t.policy()) {
                Some(MappingPolicy::Identity) => {
                    this.map_identity(PhysicalAddress::new(entry.physical_start), entry.size_bytes())?;
                }
                Some(MappingPolicy::Virtual) if entry.page_count >= HEAP_MIN_PAGES => {
                    this.map_virtual(&mut entry)?;
                    map.set(i, &entry);
                }
                _ => trace!(
                    "paging: skipping map entry {i} (type {}, {} pages)",
                    entry.ty, entry.page_count
                ),
            }
        }

        info!(
            "paging: kernel table built, {} of {} early bytes used, {} heap region(s)",
            this.early.used(),
            this.early.capacity(),
            this.region_count
        );

        cpu.load_address_space(this.root_page(this.kernel_root));
        cpu.enable_paging();
        Ok(this)
    }

    /// Maps `[phys, phys + size)` at the same virtual addresses in the kernel table.
    /// The range is widened to 4 KiB boundaries.
    ///
    /// # Errors
    /// See [`map_range`](Self::map_range).
    pub fn map_identity(&mut self, phys: PhysicalAddress, size: u64) -> Result<(), PagingError> {
        let start = phys.align_down::<Size4K>();
        let end = phys
            .checked_add(size)
            .and_then(PhysicalAddress::align_up::<Size4K>)
            .ok_or(PagingError::AddressOverflow(VirtualAddress::new(phys.as_u64())))?;
        if end == start {
            return Ok(());
        }

        trace!("paging: identity {start:?}..{end:?}");
        self.map_range(
            self.kernel_root,
            VirtualAddress::new(start.as_u64()),
            start,
            end.as_u64() - start.as_u64(),
            PageBits::kernel_rw(),
        )
    }

    /// Maps a conventional entry into the higher half.
    ///
    /// The virtual start is the cursor plus the entry's offset within its
    /// 2 MiB page, so both sides share 2 MiB alignment and large pages can be
    /// used. The cursor then moves past the 2 MiB-rounded range; it never
    /// moves back, so no two calls ever receive overlapping ranges.
    /// `entry.virtual_start` is updated.
    ///
    /// # Errors
    /// See [`map_range`](Self::map_range).
    pub fn map_virtual(&mut self, entry: &mut MemoryMapEntry) -> Result<VirtualRegion, PagingError> {
        let phys = PhysicalAddress::new(entry.physical_start).align_down::<Size4K>();
        let size = entry.size_bytes();
        let lead = phys.offset::<Size2M>();
        let span = (lead + size).next_multiple_of(PAGE_SIZE_2M);

        let base = self.next_virtual;
        let next = base
            .checked_add(span)
            .filter(|v| v.is_canonical())
            .ok_or(PagingError::AddressOverflow(base))?;
        let virt = base + lead;

        self.map_range(self.kernel_root, virt, phys, size, PageBits::kernel_rw())?;
        self.next_virtual = next;
        entry.virtual_start = virt.as_u64();

        let region = VirtualRegion { virt, phys, size };
        if self.region_count < MAX_VIRTUAL_REGIONS {
            self.regions[self.region_count] = region;
            self.region_count += 1;
        } else {
            warn!("paging: region table full, {region:?} will not back the heap");
        }

        debug!("paging: virtual {virt:?} -> {phys:?} ({size:#x} bytes)");
        Ok(region)
    }

    /// Hybrid mapper: maps `[virt, virt + size)` to `[phys, phys + size)` in
    /// `root` with `bits`, using a 2 MiB leaf wherever both sides are 2 MiB
    /// aligned and at least 2 MiB remain, and 4 KiB leaves otherwise.
    ///
    /// - A 4 KiB mapping that lands inside an existing 2 MiB leaf splits it
    ///   into a leaf table that preserves the other 511 pages.
    /// - A 2 MiB mapping that lands on an existing leaf table fills that
    ///   table instead of replacing it.
    /// - Intermediate tables shared with another address space are cloned
    ///   before they are written.
    /// - Tables are never freed.
    ///
    /// # Errors
    /// - [`PagingError::Misaligned`] for addresses off a 4 KiB boundary.
    /// - [`PagingError::AddressOverflow`] if the range leaves canonical space.
    /// - [`PagingError::EarlyAllocatorExhausted`] when out of table frames.
    pub fn map_range(
        &mut self,
        root: TableId,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        size: u64,
        bits: PageBits,
    ) -> Result<(), PagingError> {
        if !virt.is_aligned::<Size4K>() || !phys.is_aligned::<Size4K>() {
            return Err(PagingError::Misaligned { virt, phys });
        }
        let size = size
            .checked_next_multiple_of(PAGE_SIZE_4K)
            .ok_or(PagingError::AddressOverflow(virt))?;

        let mut done = 0;
        while done < size {
            let va = virt
                .checked_add(done)
                .filter(|v| v.is_canonical())
                .ok_or(PagingError::AddressOverflow(virt))?;
            let pa = phys
                .checked_add(done)
                .ok_or(PagingError::AddressOverflow(va))?;

            if va.is_aligned::<Size2M>() && pa.is_aligned::<Size2M>() && size - done >= PAGE_SIZE_2M {
                self.map_2m(root, va, pa, bits)?;
                done += PAGE_SIZE_2M;
            } else {
                self.map_4k(root, va, pa, bits)?;
                done += PAGE_SIZE_4K;
            }
        }
        Ok(())
    }

    fn map_2m(
        &mut self,
        root: TableId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        bits: PageBits,
    ) -> Result<(), PagingError> {
        let (i4, i3, i2, _) = split_indices(va);
        let pdpt = self.descend(root, i4.as_usize(), bits.user, va)?;
        let pd = self.descend(pdpt, i3.as_usize(), bits.user, va)?;

        if self.table(pd).get(i2.as_usize()).is_table() {
            let pt = self.descend(pd, i2.as_usize(), bits.user, va)?;
            let table = self.table_mut(pt);
            for i in 0..ENTRIES {
                let page = PhysicalPage::from_addr(pa + i as u64 * PAGE_SIZE_4K);
                table.set(i, PageEntry::leaf_4k(page, bits));
            }
        } else {
            let leaf = PageEntry::leaf_2m(PhysicalPage::from_addr(pa), bits);
            self.table_mut(pd).set(i2.as_usize(), leaf);
        }
        Ok(())
    }

    fn map_4k(
        &mut self,
        root: TableId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        bits: PageBits,
    ) -> Result<(), PagingError> {
        let (i4, i3, i2, i1) = split_indices(va);
        let pdpt = self.descend(root, i4.as_usize(), bits.user, va)?;
        let pd = self.descend(pdpt, i3.as_usize(), bits.user, va)?;

        let pde = self.table(pd).get(i2.as_usize());
        let pt = if pde.is_huge() {
            self.split_2m(pd, i2.as_usize(), pde, bits.user)?
        } else {
            self.descend(pd, i2.as_usize(), bits.user, va)?
        };

        self.table_mut(pt)
            .set(i1.as_usize(), PageEntry::leaf_4k(PhysicalPage::from_addr(pa), bits));
        Ok(())
    }

    /// Returns the table linked from `parent[index]`, creating it if absent
    /// and cloning it if `parent` does not own it. `user` adds the user bit
    /// to the link (only ever on links owned by the walked table).
    fn descend(
        &mut self,
        parent: TableId,
        index: usize,
        user: bool,
        va: VirtualAddress,
    ) -> Result<TableId, PagingError> {
        let link = self.table(parent).get(index);

        if !link.present() {
            let child = self.alloc_zeroed_table()?;
            let link = PageEntry::table(self.root_page(child), true, user);
            self.table_mut(parent).set(index, link);
            return Ok(child);
        }

        if link.page_size() {
            return Err(PagingError::HugeLeaf(va));
        }

        let child = self
            .early
            .table_id(link.address())
            .ok_or(PagingError::ForeignTable(link.address()))?;

        if !link.owned() {
            let copy = self.clone_table(child)?;
            let link = link
                .with_address(self.root_page(copy).base())
                .with_owned(true)
                .with_user(link.user() || user);
            self.table_mut(parent).set(index, link);
            trace!("paging: cloned shared table {child:?} into {copy:?} for {va:?}");
            return Ok(copy);
        }

        if user && !link.user() {
            self.table_mut(parent).set(index, link.with_user(true));
        }
        Ok(child)
    }

    /// Replaces the 2 MiB leaf at `pd[index]` with a leaf table mapping the same 512 pages.
    fn split_2m(
        &mut self,
        pd: TableId,
        index: usize,
        leaf: PageEntry,
        user: bool,
    ) -> Result<TableId, PagingError> {
        let pt = self.early.alloc_table()?;
        let bits = PageBits::of(leaf);
        let base = leaf.address();

        let table = self.table_mut(pt);
        for i in 0..ENTRIES {
            let page = PhysicalPage::from_addr(base + i as u64 * PAGE_SIZE_4K);
            table.set(i, PageEntry::leaf_4k(page, bits));
        }

        let link = PageEntry::table(self.root_page(pt), true, leaf.user() || user);
        self.table_mut(pd).set(index, link);
        Ok(pt)
    }

    /// Copy of `source` whose links are all marked shared.
    pub(crate) fn clone_table(&mut self, source: TableId) -> Result<TableId, PagingError> {
        let copy = self.early.alloc_table()?;
        for i in 0..ENTRIES {
            let e = self.table(source).get(i);
            self.table_mut(copy).set(i, e.shared());
        }
        Ok(copy)
    }

    pub(crate) fn alloc_zeroed_table(&mut self) -> Result<TableId, PagingError> {
        let id = self.early.alloc_table()?;
        self.table_mut(id).zero();
        Ok(id)
    }

    /// Walks `root` for `va`.
    ///
    /// `None` if any level is absent or links outside the table arena. A
    /// large leaf ends the walk at its level.
    #[must_use]
    pub fn translate(&self, root: TableId, va: VirtualAddress) -> Option<Translation> {
        let (i4, i3, i2, i1) = split_indices(va);

        let e4 = self.table(root).get(i4.as_usize());
        if !e4.is_table() {
            return None;
        }

        let e3 = self.table(self.early.table_id(e4.address())?).get(i3.as_usize());
        if e3.is_huge() {
            return Some(Self::leaf::<Size1G>(va, &[e4, e3], MappedSize::Size1G));
        }
        if !e3.present() {
            return None;
        }

        let e2 = self.table(self.early.table_id(e3.address())?).get(i2.as_usize());
        if e2.is_huge() {
            return Some(Self::leaf::<Size2M>(va, &[e4, e3, e2], MappedSize::Size2M));
        }
        if !e2.present() {
            return None;
        }

        let e1 = self.table(self.early.table_id(e2.address())?).get(i1.as_usize());
        if !e1.present() {
            return None;
        }
        Some(Self::leaf::<Size4K>(va, &[e4, e3, e2, e1], MappedSize::Size4K))
    }

    fn leaf<S: PageSize>(va: VirtualAddress, walk: &[PageEntry], size: MappedSize) -> Translation {
        let leaf = walk[walk.len() - 1];
        Translation {
            phys: leaf.address().align_down::<S>() + va.offset::<S>(),
            size,
            user: walk.iter().all(|e| e.user()),
            writable: walk.iter().all(|e| e.writable()),
        }
    }

    /// Resolves `va` through the kernel table. `None` means not mapped.
    #[must_use]
    pub fn virt_to_phys(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.translate(self.kernel_root, va).map(|t| t.phys)
    }

    #[must_use]
    pub const fn kernel_root(&self) -> TableId {
        self.kernel_root
    }

    /// Physical frame of a table, as loaded into CR3 for a top-level table.
    #[must_use]
    pub const fn root_page(&self, id: TableId) -> PhysicalPage<Size4K> {
        self.early.table_page(id)
    }

    /// Higher-half ranges produced by [`map_virtual`](Self::map_virtual), in order.
    #[must_use]
    pub fn regions(&self) -> &[VirtualRegion] {
        &self.regions[..self.region_count]
    }

    /// Where the next [`map_virtual`](Self::map_virtual) range will start (modulo 2 MiB offset).
    #[must_use]
    pub const fn next_virtual(&self) -> VirtualAddress {
        self.next_virtual
    }

    #[must_use]
    pub const fn early(&self) -> &EarlyAllocator {
        &self.early
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[inline]
    pub(crate) fn table(&self, id: TableId) -> &PageTable {
        // SAFETY: ids only come from `early`, whose frames are mapped for the mapper.
        unsafe { self.mapper.phys_to_mut::<PageTable>(self.early.table_page(id).base()) }
    }

    #[inline]
    pub(crate) fn table_mut(&mut self, id: TableId) -> &mut PageTable {
        // SAFETY: as in `table`; `&mut self` keeps this the only reference.
        unsafe { self.mapper.phys_to_mut::<PageTable>(self.early.table_page(id).base()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{RecordingLoader, SimulatedPhysMemory};
    use kernel_info::boot::{MemoryType, PixelFormat, PixelMasks};

    const STRIDE: usize = 48;

    fn manager() -> PageTableManager<SimulatedPhysMemory> {
        let early = EarlyAllocator::new(PhysicalAddress::new(0x40_0000), 64 * PAGE_SIZE_4K);
        PageTableManager::new(SimulatedPhysMemory::new(), early).unwrap()
    }

    fn framebuffer(base: u64, size: u64) -> FramebufferInfo {
        FramebufferInfo {
            base,
            size,
            width: 640,
            height: 480,
            stride: 640,
            format: PixelFormat::Bgra8,
            masks: PixelMasks::default(),
        }
    }

    fn map_bytes(entries: &[MemoryMapEntry]) -> Vec<u8> {
        let mut bytes = vec![0u8; entries.len() * STRIDE];
        let mut map = MemoryMap::new(&mut bytes, STRIDE).unwrap();
        for (i, e) in entries.iter().enumerate() {
            map.set(i, e);
        }
        bytes
    }

    fn boot_map() -> Vec<MemoryMapEntry> {
        vec![
            MemoryMapEntry::new(MemoryType::BootServicesData, 0x1000, 0x9f),
            MemoryMapEntry::new(MemoryType::LoaderCode, 0x10_0000, 0x80),
            MemoryMapEntry::new(MemoryType::LoaderData, 0x18_0000, 0x75),
            // 10 pages: too small for the heap
            MemoryMapEntry::new(MemoryType::Conventional, 0x20_0000, 10),
            // 4096 pages: 16 MiB, hosts the early allocator and then the heap
            MemoryMapEntry::new(MemoryType::Conventional, 0x100_0000, 4096),
            MemoryMapEntry::new(MemoryType::AcpiReclaim, 0x7f00_0000, 0x20),
            MemoryMapEntry::new(MemoryType::Reserved, 0xa_0000, 0x60),
            MemoryMapEntry::new(MemoryType::MemoryMappedIo, 0xfec0_0000, 1),
        ]
    }

    #[test]
    fn identity_mapping_resolves_to_itself() {
        let mut bytes = map_bytes(&boot_map());
        let mut map = MemoryMap::new(&mut bytes, STRIDE).unwrap();
        let mut cpu = RecordingLoader::default();
        let fb = framebuffer(0x8000_0000, 640 * 480 * 4);

        let paging =
            PageTableManager::setup(SimulatedPhysMemory::new(), &mut map, &fb, &mut cpu).unwrap();

        let identity: Vec<(u64, u64)> = map
            .iter()
            .filter(|e| e.memory_type().map(|t| t.policy()) == Some(MappingPolicy::Identity))
            .map(|e| (e.physical_start, e.size_bytes()))
            .chain([(fb.base, fb.size)])
            .chain([(paging.early().base().as_u64(), paging.early().capacity())])
            .collect();

        for (start, size) in identity {
            for addr in (start..start + size).step_by(0x1000).chain([start + size - 8]) {
                let va = VirtualAddress::new(addr);
                assert_eq!(
                    paging.virt_to_phys(va),
                    Some(PhysicalAddress::new(addr)),
                    "{va:?} in {start:#x}+{size:#x}"
                );
            }
        }

        // reserved and skipped memory stays unmapped
        assert_eq!(paging.virt_to_phys(VirtualAddress::new(0xb_8000)), None);
        assert_eq!(cpu.loaded, vec![paging.root_page(paging.kernel_root())]);
        assert!(cpu.paging_enabled);
    }

    #[test]
    fn small_conventional_region_stays_out_of_the_heap() {
        let mut bytes = map_bytes(&boot_map());
        let mut map = MemoryMap::new(&mut bytes, STRIDE).unwrap();
        let mut cpu = RecordingLoader::default();

        let paging = PageTableManager::setup(
            SimulatedPhysMemory::new(),
            &mut map,
            &framebuffer(0x8000_0000, 0x1000),
            &mut cpu,
        )
        .unwrap();

        let small = map.get(3).unwrap();
        let large = map.get(4).unwrap();
        assert_eq!(small.virtual_start, 0);
        assert_ne!(large.virtual_start, 0);

        // the early allocator took the first 4 MiB-aligned 4 MiB of the large region
        assert_eq!(paging.early().base(), PhysicalAddress::new(0x100_0000));
        assert_eq!(large.physical_start, 0x140_0000);

        let regions = paging.regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].phys, PhysicalAddress::new(0x140_0000));
        assert_eq!(regions[0].virt, VirtualAddress::new(large.virtual_start));

        let small_range = small.physical_start..small.physical_end();
        let mut va = regions[0].virt;
        while va < regions[0].end() {
            let pa = paging.virt_to_phys(va).unwrap();
            assert!(!small_range.contains(&pa.as_u64()));
            va += PAGE_SIZE_4K;
        }
        assert_eq!(
            paging.virt_to_phys(regions[0].virt + 0x1234),
            Some(PhysicalAddress::new(0x140_1234))
        );
    }

    #[test]
    fn virtual_ranges_never_overlap() {
        let mut paging = manager();
        let mut seen: Vec<VirtualRegion> = Vec::new();

        for (phys, pages) in [(0x20_0000, 512), (0x123_4000, 700), (0x100_0000, 1), (0x300_0000, 1024)] {
            let mut entry = MemoryMapEntry::new(MemoryType::Conventional, phys, pages);
            let region = paging.map_virtual(&mut entry).unwrap();
            assert_eq!(entry.virtual_start, region.virt.as_u64());
            assert_eq!(region.virt.offset::<Size2M>(), PhysicalAddress::new(phys).offset::<Size2M>());

            for other in &seen {
                assert!(region.virt >= other.end() || region.end() <= other.virt);
            }
            seen.push(region);
        }

        assert!(seen.windows(2).all(|w| w[0].virt < w[1].virt));
        assert_eq!(paging.regions(), seen.as_slice());
    }

    #[test]
    fn hybrid_mapping_uses_large_pages_where_aligned() {
        let mut paging = manager();
        let root = paging.kernel_root();
        let virt = VirtualAddress::new(0x1f_f000);
        let phys = PhysicalAddress::new(0x5f_f000);

        // 4K head, one 2M page, 4K tail
        paging
            .map_range(root, virt, phys, PAGE_SIZE_2M + 2 * PAGE_SIZE_4K, PageBits::kernel_rw())
            .unwrap();

        let head = paging.translate(root, virt).unwrap();
        assert_eq!(head.size, MappedSize::Size4K);
        assert_eq!(head.phys, phys);

        let body = paging.translate(root, VirtualAddress::new(0x30_0000)).unwrap();
        assert_eq!(body.size, MappedSize::Size2M);
        assert_eq!(body.phys, PhysicalAddress::new(0x70_0000));

        let tail = paging.translate(root, VirtualAddress::new(0x40_0000)).unwrap();
        assert_eq!(tail.size, MappedSize::Size4K);
        assert_eq!(tail.phys, PhysicalAddress::new(0x80_0000));

        assert_eq!(paging.translate(root, VirtualAddress::new(0x40_1000)), None);
    }

    #[test]
    fn misaligned_physical_and_virtual_fall_back_to_small_pages() {
        let mut paging = manager();
        let root = paging.kernel_root();
        paging
            .map_range(
                root,
                VirtualAddress::new(0x20_0000),
                PhysicalAddress::new(0x21_0000),
                PAGE_SIZE_2M,
                PageBits::kernel_rw(),
            )
            .unwrap();
        let t = paging.translate(root, VirtualAddress::new(0x3f_f123)).unwrap();
        assert_eq!(t.size, MappedSize::Size4K);
        assert_eq!(t.phys, PhysicalAddress::new(0x40_f123));
    }

    #[test]
    fn small_mapping_splits_large_leaf_and_keeps_neighbors() {
        let mut paging = manager();
        let root = paging.kernel_root();
        paging
            .map_range(
                root,
                VirtualAddress::new(0x60_0000),
                PhysicalAddress::new(0x60_0000),
                PAGE_SIZE_2M,
                PageBits::kernel_rw(),
            )
            .unwrap();
        paging
            .map_range(
                root,
                VirtualAddress::new(0x60_5000),
                PhysicalAddress::new(0x900_0000),
                PAGE_SIZE_4K,
                PageBits::kernel_rw(),
            )
            .unwrap();

        let moved = paging.translate(root, VirtualAddress::new(0x60_5010)).unwrap();
        assert_eq!(moved.size, MappedSize::Size4K);
        assert_eq!(moved.phys, PhysicalAddress::new(0x900_0010));

        for addr in [0x60_0000, 0x60_4fff, 0x60_6000, 0x7f_ffff] {
            assert_eq!(
                paging.virt_to_phys(VirtualAddress::new(addr)),
                Some(PhysicalAddress::new(addr))
            );
        }
    }

    #[test]
    fn large_mapping_over_leaf_table_fills_it() {
        let mut paging = manager();
        let root = paging.kernel_root();
        paging
            .map_range(
                root,
                VirtualAddress::new(0x20_3000),
                PhysicalAddress::new(0x20_3000),
                PAGE_SIZE_4K,
                PageBits::kernel_rw(),
            )
            .unwrap();
        let used = paging.early().used();

        paging
            .map_range(
                root,
                VirtualAddress::new(0x20_0000),
                PhysicalAddress::new(0xa0_0000),
                PAGE_SIZE_2M,
                PageBits::kernel_rw(),
            )
            .unwrap();

        assert_eq!(paging.early().used(), used, "no new tables");
        let t = paging.translate(root, VirtualAddress::new(0x20_3008)).unwrap();
        assert_eq!(t.size, MappedSize::Size4K);
        assert_eq!(t.phys, PhysicalAddress::new(0xa0_3008));
    }

    #[test]
    fn large_leaf_short_circuits_translation() {
        let mut paging = manager();
        let root = paging.kernel_root();
        paging
            .map_range(
                root,
                VirtualAddress::new(0xffff_8000_0020_0000),
                PhysicalAddress::new(0x120_0000),
                PAGE_SIZE_2M,
                PageBits::kernel_rw(),
            )
            .unwrap();
        // L4 + L3 + L2 only, no leaf table
        assert_eq!(paging.early().used(), 3 * PAGE_SIZE_4K);

        let t = paging
            .translate(root, VirtualAddress::new(0xffff_8000_003f_fff8))
            .unwrap();
        assert_eq!(t.size, MappedSize::Size2M);
        assert_eq!(t.phys, PhysicalAddress::new(0x13f_fff8));
        assert!(t.writable && !t.user);
    }

    #[test]
    fn unmapped_addresses_do_not_resolve() {
        let mut paging = manager();
        assert_eq!(paging.virt_to_phys(VirtualAddress::new(0x1000)), None);

        paging
            .map_identity(PhysicalAddress::new(0x10_0000), PAGE_SIZE_4K)
            .unwrap();
        // same leaf table, different slot
        assert_eq!(paging.virt_to_phys(VirtualAddress::new(0x10_1000)), None);
        // same top-level slot, different directory
        assert_eq!(paging.virt_to_phys(VirtualAddress::new(0x4000_0000)), None);
    }

    #[test]
    fn rejects_misaligned_and_non_canonical_ranges() {
        let mut paging = manager();
        let root = paging.kernel_root();
        assert!(matches!(
            paging.map_range(
                root,
                VirtualAddress::new(0x1001),
                PhysicalAddress::new(0x1000),
                1,
                PageBits::kernel_rw()
            ),
            Err(PagingError::Misaligned { .. })
        ));
        assert!(matches!(
            paging.map_range(
                root,
                VirtualAddress::new(0x0000_7fff_ffff_f000),
                PhysicalAddress::new(0x1000),
                2 * PAGE_SIZE_4K,
                PageBits::kernel_rw()
            ),
            Err(PagingError::AddressOverflow(_))
        ));
    }

    #[test]
    fn running_out_of_table_frames_is_reported() {
        let early = EarlyAllocator::new(PhysicalAddress::new(0x40_0000), 3 * PAGE_SIZE_4K);
        let mut paging = PageTableManager::new(SimulatedPhysMemory::new(), early).unwrap();
        let err = paging
            .map_identity(PhysicalAddress::new(0x1000), PAGE_SIZE_4K)
            .unwrap_err();
        assert_eq!(
            err,
            PagingError::EarlyAllocatorExhausted {
                capacity: 3 * PAGE_SIZE_4K
            }
        );
    }

    #[test]
    fn setup_fails_without_room_for_early_allocator() {
        let mut bytes = map_bytes(&[MemoryMapEntry::new(MemoryType::Conventional, 0x1000, 16)]);
        let mut map = MemoryMap::new(&mut bytes, STRIDE).unwrap();
        let mut cpu = RecordingLoader::default();
        let result = PageTableManager::setup(
            SimulatedPhysMemory::new(),
            &mut map,
            &framebuffer(0, 0),
            &mut cpu,
        );
        assert!(matches!(result, Err(PagingError::NoReservableRegion { .. })));
        assert!(cpu.loaded.is_empty());
        assert!(!cpu.paging_enabled);
    }
}
