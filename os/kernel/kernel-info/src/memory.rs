//! # Memory Layout

/// Base translation granule.
pub const PAGE_SIZE_4K: u64 = 0x1000;

/// Large-page granule used wherever alignment allows it.
pub const PAGE_SIZE_2M: u64 = 0x20_0000;

/// Last byte of the canonical lower half. Everything at or below belongs to user space.
pub const LAST_USERSPACE_ADDRESS: u64 = 0x0000_7fff_ffff_ffff;

/// Start of the higher-half virtual heap. The `map_virtual` cursor starts here
/// and only ever moves upward.
pub const VIRT_HEAP_BASE: u64 = 0xffff_8000_0000_0000;

/// Conventional regions smaller than this many 4 KiB pages are not mapped into
/// the virtual heap.
pub const HEAP_MIN_PAGES: u64 = 512;

/// Bytes reserved for the early page-table allocator. The reservation is
/// aligned to its own size.
pub const EARLY_ALLOC_CAPACITY: u64 = 4 * 1024 * 1024;

/// Granule of the heap's page pool and size of one arena page.
pub const HEAP_PAGE_SIZE: u64 = PAGE_SIZE_2M;

/// Fixed top of every user stack.
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_e000;

/// Size of the user stack mapped below [`USER_STACK_TOP`].
pub const USER_STACK_SIZE: u64 = 256 * 1024;

/// Kernel stack the syscall gateway switches to.
pub const SYSCALL_STACK_SIZE: u64 = 16 * 1024;

/// Where the kernel image is linked and loaded. Identity mapped.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const PHYS_LOAD: u64 = 0x0010_0000;

const _: () = {
    assert!(EARLY_ALLOC_CAPACITY.is_multiple_of(PAGE_SIZE_4K));
    assert!(EARLY_ALLOC_CAPACITY.is_power_of_two());
    assert!(HEAP_PAGE_SIZE == PAGE_SIZE_2M);
    assert!(VIRT_HEAP_BASE.is_multiple_of(PAGE_SIZE_2M));
    assert!(VIRT_HEAP_BASE > LAST_USERSPACE_ADDRESS);
    assert!(USER_STACK_TOP.is_multiple_of(PAGE_SIZE_4K));
    assert!(USER_STACK_SIZE.is_multiple_of(PAGE_SIZE_4K));
    assert!(USER_STACK_TOP <= LAST_USERSPACE_ADDRESS);
    assert!(SYSCALL_STACK_SIZE.is_multiple_of(PAGE_SIZE_4K));
    assert!(PHYS_LOAD.is_multiple_of(PAGE_SIZE_4K));
};
