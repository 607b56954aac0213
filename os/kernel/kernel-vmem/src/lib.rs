//! # Virtual Memory Support
//!
//! Builds and edits x86-64 4-level page tables for the kernel and for the
//! isolated user program.
//!
//! ## x86-64 virtual address → physical address walk
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  4 KiB page
//!                      │
//!                      └── PS=1 → 2 MiB page
//! ```
//!
//! Each level is one 4 KiB table of 512 eight-byte [`PageEntry`] values. A
//! directory entry is either absent, a link to the next table, or a 2 MiB
//! leaf. Leaf tables only hold 4 KiB leaves.
//!
//! ## Pieces
//!
//! - [`EarlyAllocator`]: one reserved, size-aligned slice of conventional
//!   memory that every page table is carved from. Tables are addressed by
//!   their index in it ([`TableId`]).
//! - [`PageTableManager`]: owns the allocator and the kernel's top-level
//!   table. [`PageTableManager::setup`] builds the kernel address space from
//!   the firmware memory map and switches to it. [`PageTableManager::map_range`]
//!   is the hybrid 2 MiB / 4 KiB mapper every other mapping call goes through.
//! - User tables ([`PageTableManager::create_user_table`]) start as a copy of
//!   the kernel's top-level entries. The tables below are shared and cloned
//!   on the first user mapping that has to write through them, so kernel
//!   tables never change and kernel pages never become user-accessible.
//! - [`PhysMapper`] turns a table's physical address into a reference, and
//!   [`AddressSpaceLoader`] is the privileged half (CR3, paging enable bits).
//!   Both are traits so the whole manager runs in host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod bits;
mod early;
mod entry;
mod error;
mod manager;
#[cfg(any(test, feature = "host-sim"))]
pub mod sim;
mod table;
mod user;

pub use bits::PageBits;
pub use early::{EarlyAllocator, TableId};
pub use entry::PageEntry;
pub use error::PagingError;
pub use manager::{MappedSize, PageTableManager, Translation, VirtualRegion};
pub use table::{L1Index, L2Index, L3Index, L4Index, PageTable, split_indices};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Turns physical addresses of page-table frames into references.
///
/// The kernel uses [`IdentityMapper`]: the early allocator's slice is
/// identity mapped before the new tables go live, and the firmware's tables
/// identity map everything before that.
pub trait PhysMapper {
    /// # Safety
    /// - `pa` must be mapped writable in the current address space for `'a`.
    /// - The bytes at `pa` must be a valid `T`, and nothing else may alias them.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Physical address == virtual address.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *(pa.as_u64() as *mut T) }
    }
}

/// Privileged side of activating an address space.
///
/// Implementations talk to the CPU (CR3, CR0, CR4, EFER). The manager only
/// hands over tables that map the code currently running.
pub trait AddressSpaceLoader {
    /// Makes `root` the active top-level table.
    fn load_address_space(&mut self, root: PhysicalPage<Size4K>);

    /// Sets the long-mode paging enable bits (PAE, PG, NXE). Idempotent.
    fn enable_paging(&mut self);
}
