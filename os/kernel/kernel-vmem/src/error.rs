use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Failures of the page-table manager.
///
/// Everything except [`PagingError::NotUserAddress`] means the address space
/// cannot be completed; boot code treats them as fatal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    #[error("early allocator exhausted: all {capacity} bytes handed out")]
    EarlyAllocatorExhausted { capacity: u64 },

    #[error("no conventional memory region can hold {requested} bytes aligned to their size")]
    NoReservableRegion { requested: u64 },

    #[error("table link {0:?} points outside the page-table arena")]
    ForeignTable(PhysicalAddress),

    #[error("mapping {virt:?} -> {phys:?} is not 4 KiB aligned")]
    Misaligned {
        virt: VirtualAddress,
        phys: PhysicalAddress,
    },

    #[error("mapping at {0:?} runs past the end of the address space")]
    AddressOverflow(VirtualAddress),

    #[error("1 GiB leaf on the path to {0:?}")]
    HugeLeaf(VirtualAddress),

    #[error("{0:?} is not a user-space address")]
    NotUserAddress(VirtualAddress),
}
