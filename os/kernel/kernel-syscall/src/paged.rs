//! User memory as seen through the program's page table.

use crate::UserMemory;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{PageTableManager, PhysMapper, TableId};

/// Answers [`UserMemory`] queries by walking the program's top-level table.
///
/// A page counts as user memory only if the walk reaches a leaf and every
/// level grants user access, so the supervisor-only kernel mappings a user
/// table shares are refused like unmapped addresses.
pub struct PagedUserMemory<'a, M: PhysMapper> {
    paging: &'a PageTableManager<M>,
    root: TableId,
}

impl<'a, M: PhysMapper> PagedUserMemory<'a, M> {
    /// # Safety
    /// `root` must be the active table whenever [`UserMemory::read`] runs,
    /// so the pages the walk accepted are the ones the CPU reads.
    #[must_use]
    pub const unsafe fn new(paging: &'a PageTableManager<M>, root: TableId) -> Self {
        Self { paging, root }
    }
}

impl<M: PhysMapper> UserMemory for PagedUserMemory<'_, M> {
    fn is_user_page(&self, page: VirtualAddress) -> bool {
        self.paging
            .translate(self.root, page)
            .is_some_and(|t| t.user)
    }

    fn read(&self, addr: VirtualAddress, len: usize) -> Option<&[u8]> {
        // Safety: every page of the range is user-mapped in `root`, which is
        // the active table (see `new`).
        Some(unsafe { core::slice::from_raw_parts(addr.as_ptr::<u8>(), len) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Console, SYSCALL_FAILED, SyscallOutcome, dispatch, user_buffer};
    use kernel_info::memory::{PAGE_SIZE_4K, PHYS_LOAD};
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_vmem::EarlyAllocator;
    use kernel_vmem::sim::SimulatedPhysMemory;

    const PROGRAM: u64 = 0x0000_1000_0000_0000;

    /// Kernel table identity mapping the low 8 MiB, and a user table that
    /// shares it and maps two pages of program memory at `PROGRAM`.
    fn address_space() -> (PageTableManager<SimulatedPhysMemory>, TableId) {
        let early = EarlyAllocator::new(PhysicalAddress::new(0x100_0000), 64 * PAGE_SIZE_4K);
        let mut paging = PageTableManager::new(SimulatedPhysMemory::new(), early).unwrap();
        paging
            .map_identity(PhysicalAddress::new(0), 0x80_0000)
            .unwrap();
        let user = paging.create_user_table().unwrap();
        paging
            .map_user_segment(
                user,
                VirtualAddress::new(PROGRAM),
                PhysicalAddress::new(0x300_0000),
                2 * PAGE_SIZE_4K,
            )
            .unwrap();
        (paging, user)
    }

    #[derive(Default)]
    struct Recorder(Vec<u8>);

    impl Console for Recorder {
        fn write_byte(&mut self, byte: u8) {
            self.0.push(byte);
        }
    }

    #[test]
    fn program_pages_are_accepted() {
        let (paging, user) = address_space();
        // Safety: only the page walk runs, nothing is read.
        let memory = unsafe { PagedUserMemory::new(&paging, user) };

        assert!(user_buffer(PROGRAM, 2 * PAGE_SIZE_4K, &memory).is_ok());
        assert!(user_buffer(PROGRAM + 0xff0, 0x20, &memory).is_ok());
    }

    #[test]
    fn kernel_image_is_not_user_memory() {
        let (paging, user) = address_space();
        // the kernel image is mapped in the user table, but supervisor-only
        assert!(paging.translate(user, VirtualAddress::new(PHYS_LOAD)).is_some());
        // Safety: only the page walk runs, nothing is read.
        let memory = unsafe { PagedUserMemory::new(&paging, user) };

        assert!(user_buffer(PHYS_LOAD, 64, &memory).is_err());
        assert!(user_buffer(0x1000, 1, &memory).is_err());

        let mut console = Recorder::default();
        let outcome = dispatch(1, [1, PHYS_LOAD, 64, 0, 0, 0], &mut console, &memory);
        assert_eq!(outcome, SyscallOutcome::Return(SYSCALL_FAILED));
        assert!(console.0.is_empty());
    }

    #[test]
    fn unmapped_buffers_are_refused_before_reading() {
        let (paging, user) = address_space();
        // Safety: only the page walk runs, nothing is read.
        let memory = unsafe { PagedUserMemory::new(&paging, user) };

        assert!(user_buffer(0x2000_0000_0000, 16, &memory).is_err());
        // runs off the end of the program mapping
        assert!(user_buffer(PROGRAM + PAGE_SIZE_4K + 0xff0, 0x20, &memory).is_err());

        let mut console = Recorder::default();
        let outcome = dispatch(1, [1, 0x2000_0000_0000, 16, 0, 0, 0], &mut console, &memory);
        assert_eq!(outcome, SyscallOutcome::Return(SYSCALL_FAILED));
        assert!(console.0.is_empty());
    }
}
