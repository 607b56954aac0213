//! Host-backed heap memory for tests.

extern crate std;

use crate::{Heap, PagePool};
use core::ptr::NonNull;
use kernel_info::memory::HEAP_PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::VirtualRegion;
use std::alloc::{Layout, alloc_zeroed, dealloc};

/// Physical address [`HostHeapMemory::region`] claims the buffer lives at.
pub const HOST_HEAP_PHYS: u64 = 0x4000_0000;

/// A zeroed, heap-page aligned host buffer standing in for a mapped heap region.
pub struct HostHeapMemory {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl HostHeapMemory {
    /// # Panics
    /// If the host allocation fails.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(pages: usize) -> Self {
        let page = HEAP_PAGE_SIZE as usize;
        let layout = Layout::from_size_align(pages * page, page).expect("heap layout");
        // Safety: non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).expect("host allocation");
        Self { ptr, layout }
    }

    /// The buffer as a virtual heap region.
    #[must_use]
    pub fn region(&self) -> VirtualRegion {
        VirtualRegion {
            virt: VirtualAddress::from_ptr(self.ptr.as_ptr()),
            phys: PhysicalAddress::new(HOST_HEAP_PHYS),
            size: self.layout.size() as u64,
        }
    }

    /// A heap over the whole buffer.
    #[must_use]
    pub fn heap(&self) -> Heap {
        Heap::new(PagePool::from_regions(&[self.region()]))
    }
}

impl Drop for HostHeapMemory {
    fn drop(&mut self) {
        // Safety: allocated in `new` with this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
