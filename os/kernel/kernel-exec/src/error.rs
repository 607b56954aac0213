use kernel_alloc::HeapError;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PagingError;

/// Why an image was rejected.
///
/// Validation failures are reported before anything is allocated. Staging
/// failures are reported after everything staged so far was released.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElfError {
    #[error("image is shorter than an ELF header")]
    TooShort,

    #[error("bad ELF magic")]
    BadMagic,

    #[error("unsupported ELF type {0}, expected an executable or shared object")]
    UnsupportedType(u16),

    #[error("unsupported ELF class {0}, expected 64-bit")]
    BadClass(u8),

    #[error("unsupported machine {0:#x}, expected x86-64")]
    BadMachine(u16),

    #[error("unsupported data encoding {0}, expected little-endian")]
    BadEncoding(u8),

    #[error("program header entries are {0} bytes, expected 56")]
    BadProgramHeaderSize(u16),

    #[error("section header entries are {0} bytes, expected 64")]
    BadSectionHeaderSize(u16),

    #[error("header table runs past the end of the image")]
    TruncatedTable,

    #[error("loadable segment {index} does not fit the image")]
    SegmentOutOfBounds { index: usize },

    #[error("heap failure while staging: {0}")]
    Heap(#[from] HeapError),
}

/// Why a user address space could not be built.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("segment at {vaddr:?} ({size:#x} bytes) leaves user space")]
    SegmentNotInUserSpace { vaddr: VirtualAddress, size: u64 },

    #[error("segments overlap at {0:?}")]
    OverlappingSegments(VirtualAddress),

    #[error("segment at {0:?} shares a 4 KiB page with another segment")]
    SegmentsSharePage(VirtualAddress),

    #[error("staged segment memory at {0:?} is not mapped")]
    StagedSegmentNotMapped(VirtualAddress),

    #[error("entry point {0:?} is outside every loadable segment")]
    EntryOutsideSegments(VirtualAddress),

    #[error("user stack overlaps the segment at {0:?}")]
    StackOverlapsSegment(VirtualAddress),

    #[error(transparent)]
    Paging(#[from] PagingError),

    #[error(transparent)]
    Heap(#[from] HeapError),
}
