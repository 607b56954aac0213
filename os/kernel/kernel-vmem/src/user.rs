//! # User address spaces
//!
//! A user top-level table starts as a copy of every present kernel
//! top-level entry, so kernel code stays mapped (supervisor-only) while the
//! user table is active and no CR3 reload is needed on system calls.
//!
//! The copied links are marked shared. [`PageTableManager::map_range`] clones
//! a shared table the first time a mapping has to write through it, which
//! keeps the kernel's own tables untouched and confines the user bit to
//! tables the user address space owns.

use crate::table::ENTRIES;
use crate::{PageBits, PageTableManager, PagingError, PhysMapper, TableId};
use kernel_info::memory::LAST_USERSPACE_ADDRESS;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::debug;

impl<M: PhysMapper> PageTableManager<M> {
    /// Allocates a top-level table that shares all of the kernel's mappings.
    ///
    /// # Errors
    /// If the early allocator is exhausted.
    pub fn create_user_table(&mut self) -> Result<TableId, PagingError> {
        let root = self.alloc_zeroed_table()?;
        let kernel = self.kernel_root();

        let mut promoted = 0;
        for i in 0..ENTRIES {
            let e = self.table(kernel).get(i);
            if e.present() {
                self.table_mut(root).set(i, e.shared());
                promoted += 1;
            }
        }

        debug!("paging: user table {root:?} with {promoted} kernel entries");
        Ok(root)
    }

    /// Maps `[virt, virt + size)` user read/write into `table`.
    ///
    /// Callers keep ranges within one table from overlapping.
    ///
    /// # Errors
    /// - [`PagingError::NotUserAddress`] if the range leaves the lower half
    ///   or `table` is the kernel's own table.
    /// - Anything [`map_range`](Self::map_range) reports.
    pub fn map_user_segment(
        &mut self,
        table: TableId,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        size: u64,
    ) -> Result<(), PagingError> {
        if table == self.kernel_root() {
            return Err(PagingError::NotUserAddress(virt));
        }

        let last = size
            .checked_sub(1)
            .and_then(|len| virt.checked_add(len))
            .unwrap_or(virt);
        if last.as_u64() > LAST_USERSPACE_ADDRESS {
            return Err(PagingError::NotUserAddress(virt));
        }

        self.map_range(table, virt, phys, size, PageBits::user_rw())
    }
}

#[cfg(test)]
mod tests {
    use crate::info::{PAGE_SIZE_2M, PAGE_SIZE_4K};
    use crate::sim::SimulatedPhysMemory;
    use crate::*;
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

    /// Kernel table with an identity-mapped low area (2 MiB leaves and a 4 KiB
    /// tail) and a higher-half heap page.
    fn kernel() -> PageTableManager<SimulatedPhysMemory> {
        let early = EarlyAllocator::new(PhysicalAddress::new(0x100_0000), 128 * PAGE_SIZE_4K);
        let mut paging = PageTableManager::new(SimulatedPhysMemory::new(), early).unwrap();
        paging
            .map_identity(PhysicalAddress::new(0), 0x80_3000)
            .unwrap();
        let root = paging.kernel_root();
        paging
            .map_range(
                root,
                VirtualAddress::new(0xffff_8000_0000_0000),
                PhysicalAddress::new(0x200_0000),
                PAGE_SIZE_2M,
                PageBits::kernel_rw(),
            )
            .unwrap();
        paging
    }

    fn snapshot(paging: &PageTableManager<SimulatedPhysMemory>, root: TableId) -> Vec<Option<Translation>> {
        [0x0, 0x1000, 0x40_0000, 0x60_0000, 0x7f_f000, 0x80_2000, 0xffff_8000_0001_0000]
            .into_iter()
            .map(|va| paging.translate(root, VirtualAddress::new(va)))
            .collect()
    }

    #[test]
    fn user_table_promotes_kernel_entries() {
        let mut paging = kernel();
        let user = paging.create_user_table().unwrap();

        assert_ne!(user, paging.kernel_root());
        assert_eq!(snapshot(&paging, user), snapshot(&paging, paging.kernel_root()));

        let root = paging.table(user);
        let kernel = paging.table(paging.kernel_root());
        for i in 0..512 {
            let (u, k) = (root.get(i), kernel.get(i));
            assert_eq!(u.present(), k.present());
            if u.present() {
                assert_eq!(u.address(), k.address());
                assert!(!u.owned(), "promoted entries are shared");
                assert!(k.owned());
            }
        }
    }

    #[test]
    fn user_mapping_leaves_kernel_table_untouched() {
        let mut paging = kernel();
        let before = snapshot(&paging, paging.kernel_root());
        let kernel_root_copy = paging.table(paging.kernel_root()).clone();

        let user = paging.create_user_table().unwrap();
        // same top-level slot and directory as the kernel's identity map
        paging
            .map_user_segment(
                user,
                VirtualAddress::new(0x40_0000),
                PhysicalAddress::new(0x300_0000),
                PAGE_SIZE_2M + PAGE_SIZE_4K,
            )
            .unwrap();

        assert_eq!(snapshot(&paging, paging.kernel_root()), before);
        let kernel_root_now = paging.table(paging.kernel_root());
        assert!((0..512).all(|i| kernel_root_now.get(i) == kernel_root_copy.get(i)));

        let t = paging.translate(user, VirtualAddress::new(0x40_0010)).unwrap();
        assert_eq!(t.phys, PhysicalAddress::new(0x300_0010));
        assert!(t.user && t.writable);
        assert_eq!(t.size, MappedSize::Size2M);

        let tail = paging.translate(user, VirtualAddress::new(0x60_0000)).unwrap();
        assert_eq!(tail.phys, PhysicalAddress::new(0x320_0000));
        assert!(tail.user);
    }

    #[test]
    fn promoted_kernel_pages_never_become_user_accessible() {
        let mut paging = kernel();
        let user = paging.create_user_table().unwrap();

        // lands inside the kernel's 2 MiB identity leaf at 0x60_0000 and its 4 KiB tail
        paging
            .map_user_segment(user, VirtualAddress::new(0x60_1000), PhysicalAddress::new(0x400_0000), PAGE_SIZE_4K)
            .unwrap();
        paging
            .map_user_segment(user, VirtualAddress::new(0x80_1000), PhysicalAddress::new(0x400_1000), PAGE_SIZE_4K)
            .unwrap();

        for va in [0x0, 0x1000, 0x40_0000, 0x60_0000, 0x60_2000, 0x7f_f000, 0x80_0000, 0x80_2000] {
            let t = paging.translate(user, VirtualAddress::new(va)).unwrap();
            assert_eq!(t.phys, PhysicalAddress::new(va), "{va:#x} still identity mapped");
            assert!(!t.user, "{va:#x} must stay supervisor-only");
        }
        let heap = paging
            .translate(user, VirtualAddress::new(0xffff_8000_0000_0000))
            .unwrap();
        assert!(!heap.user);

        assert!(paging.translate(user, VirtualAddress::new(0x60_1000)).unwrap().user);
        assert!(paging.translate(user, VirtualAddress::new(0x80_1000)).unwrap().user);

        // and the kernel view is unchanged
        let k = paging
            .translate(paging.kernel_root(), VirtualAddress::new(0x60_1000))
            .unwrap();
        assert_eq!(k.phys, PhysicalAddress::new(0x60_1000));
        assert_eq!(k.size, MappedSize::Size2M);
    }

    #[test]
    fn two_user_tables_are_independent() {
        let mut paging = kernel();
        let a = paging.create_user_table().unwrap();
        let b = paging.create_user_table().unwrap();
        let va = VirtualAddress::new(0x4000_0000);

        paging.map_user_segment(a, va, PhysicalAddress::new(0x500_0000), PAGE_SIZE_4K).unwrap();
        paging.map_user_segment(b, va, PhysicalAddress::new(0x600_0000), PAGE_SIZE_4K).unwrap();

        assert_eq!(paging.translate(a, va).unwrap().phys, PhysicalAddress::new(0x500_0000));
        assert_eq!(paging.translate(b, va).unwrap().phys, PhysicalAddress::new(0x600_0000));
        assert_eq!(paging.virt_to_phys(va), None);
    }

    #[test]
    fn user_segments_stay_in_the_lower_half() {
        let mut paging = kernel();
        let user = paging.create_user_table().unwrap();

        assert_eq!(
            paging.map_user_segment(
                user,
                VirtualAddress::new(0xffff_8000_0000_0000),
                PhysicalAddress::new(0x100_0000),
                PAGE_SIZE_4K
            ),
            Err(PagingError::NotUserAddress(VirtualAddress::new(0xffff_8000_0000_0000)))
        );
        assert!(matches!(
            paging.map_user_segment(
                user,
                VirtualAddress::new(0x0000_7fff_ffff_f000),
                PhysicalAddress::new(0x100_0000),
                2 * PAGE_SIZE_4K
            ),
            Err(PagingError::NotUserAddress(_))
        ));
        assert!(matches!(
            paging.map_user_segment(
                paging.kernel_root(),
                VirtualAddress::new(0x4000_0000),
                PhysicalAddress::new(0x100_0000),
                PAGE_SIZE_4K
            ),
            Err(PagingError::NotUserAddress(_))
        ));
    }
}
