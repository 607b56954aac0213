use kernel_memory_addresses::VirtualAddress;

/// Failures of the kernel heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("heap exhausted while allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The pointer was never handed out by this heap. The kernel halts on this.
    #[error("free of {0:?}, which is not a live heap allocation")]
    InvalidFree(VirtualAddress),

    #[error("double free of {0:?}")]
    DoubleFree(VirtualAddress),
}
