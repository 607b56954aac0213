//! # Hazardous environments
//!
//! A hazardous environment is one loaded program in its own address space:
//! a user top-level table that shares the kernel's (supervisor-only)
//! mappings, the program's segments mapped user read/write at their
//! declared addresses, and a user stack ending at [`USER_STACK_TOP`].
//!
//! [`setup_hazardous_environment`] builds it, [`enter_hazardous_environment`]
//! switches to it and drops to ring 3. Control only comes back through the
//! system-call gateway.
//!
//! Each segment is staged in its own heap copy, so no two segments may touch
//! the same 4 KiB page: one page can only be backed by one of the copies.
//! Linkers that pack segments tightly need page-aligned segments for this
//! loader (`ALIGN(4K)` between output sections).

use crate::elf::ProgramHeader;
use crate::elf::loader::ElfImage;
use crate::{EnvironmentError, IretFrame, Privileged};
use core::ptr::NonNull;
use kernel_alloc::Heap;
use kernel_info::memory::{LAST_USERSPACE_ADDRESS, PAGE_SIZE_4K, USER_STACK_SIZE, USER_STACK_TOP};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{PageTableManager, PhysMapper, TableId};
use log::{debug, info};

/// Everything needed to run a loaded program. Consumed by
/// [`enter_hazardous_environment`].
#[derive(Debug)]
pub struct HazardousContext {
    table: TableId,
    root: PhysicalPage<Size4K>,
    entry: VirtualAddress,
    stack_top: VirtualAddress,
}

impl HazardousContext {
    /// The program's top-level table.
    #[must_use]
    pub const fn table(&self) -> TableId {
        self.table
    }

    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[must_use]
    pub const fn entry(&self) -> VirtualAddress {
        self.entry
    }

    #[must_use]
    pub const fn stack_top(&self) -> VirtualAddress {
        self.stack_top
    }

    /// The ring-3 frame `iretq` starts the program from.
    #[must_use]
    pub const fn iret_frame(&self) -> IretFrame {
        IretFrame::user(self.entry, self.stack_top)
    }
}

/// A page-rounded user range `[start, end)`.
#[derive(Copy, Clone, Debug)]
struct UserRange {
    start: u64,
    end: u64,
}

impl UserRange {
    const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

const fn stack_range() -> UserRange {
    UserRange {
        start: USER_STACK_TOP - USER_STACK_SIZE,
        end: USER_STACK_TOP,
    }
}

/// Builds the address space for `image`.
///
/// Every staged segment is mapped user read/write at its `p_vaddr`, and a
/// fresh [`USER_STACK_SIZE`] stack is mapped below [`USER_STACK_TOP`]. The
/// initial stack pointer sits one slot below the top, where a caller's
/// return address would be.
///
/// # Errors
/// - [`EnvironmentError::SegmentNotInUserSpace`],
///   [`EnvironmentError::OverlappingSegments`],
///   [`EnvironmentError::SegmentsSharePage`],
///   [`EnvironmentError::EntryOutsideSegments`] or
///   [`EnvironmentError::StackOverlapsSegment`] if the image does not fit
///   the user address layout. These are checked before anything is built.
/// - [`EnvironmentError::StagedSegmentNotMapped`] if staged memory cannot be
///   resolved through the kernel table.
/// - Paging or heap exhaustion.
#[allow(clippy::cast_possible_truncation)]
pub fn setup_hazardous_environment<M: PhysMapper>(
    paging: &mut PageTableManager<M>,
    heap: &mut Heap,
    image: &ElfImage,
) -> Result<HazardousContext, EnvironmentError> {
    let entry = image.entry();
    check_layout(image)?;

    let table = paging.create_user_table()?;

    for ph in image.loaded_segments() {
        let virt = VirtualAddress::new(ph.p_vaddr.as_u64() - ph.page_offset());
        let staged = VirtualAddress::new(ph.p_paddr - ph.page_offset());
        let size = (ph.p_memsz + ph.page_offset()).next_multiple_of(PAGE_SIZE_4K);
        debug!("hazardous: segment {virt} <- staged {staged}, {size:#x} bytes");
        map_staged(paging, table, virt, staged, size)?;
    }

    let stack = heap.alloc_aligned(USER_STACK_SIZE as usize)?;
    let range = stack_range();
    let staged = VirtualAddress::from_ptr(stack.as_ptr());
    if let Err(e) = map_staged(paging, table, VirtualAddress::new(range.start), staged, USER_STACK_SIZE) {
        // Safety: allocated above and not mapped anywhere.
        unsafe { heap.free(stack)? };
        return Err(e);
    }
    scrub(stack);

    let ctx = HazardousContext {
        table,
        root: paging.root_page(table),
        entry,
        stack_top: VirtualAddress::new(USER_STACK_TOP - 8),
    };
    info!(
        "hazardous: environment ready, entry {}, stack top {}, root {:?}",
        ctx.entry, ctx.stack_top, ctx.root
    );
    Ok(ctx)
}

/// Switches to the environment's table and enters ring 3 at its entry point.
pub fn enter_hazardous_environment<P: Privileged>(ctx: HazardousContext, cpu: &mut P) -> ! {
    let frame = ctx.iret_frame();
    info!(
        "hazardous: entering ring 3 at {:#x}, rsp {:#x}",
        frame.rip, frame.rsp
    );
    cpu.load_address_space(ctx.root);
    cpu.enter_user_mode(&frame)
}

/// Rejects images whose segments, entry point or stack collide or leave
/// the lower half.
fn check_layout(image: &ElfImage) -> Result<(), EnvironmentError> {
    let stack = stack_range();
    let mut entry_found = false;

    for (i, ph) in image.loaded_segments().enumerate() {
        let range = segment_range(ph.p_vaddr, ph.p_memsz).ok_or(
            EnvironmentError::SegmentNotInUserSpace {
                vaddr: ph.p_vaddr,
                size: ph.p_memsz,
            },
        )?;

        if range.overlaps(&stack) {
            return Err(EnvironmentError::StackOverlapsSegment(ph.p_vaddr));
        }
        for other in image.loaded_segments().skip(i + 1) {
            let other_range = segment_range(other.p_vaddr, other.p_memsz);
            if other_range.is_some_and(|r| r.overlaps(&range)) {
                return Err(if bytes_overlap(ph, other) {
                    EnvironmentError::OverlappingSegments(other.p_vaddr)
                } else {
                    EnvironmentError::SegmentsSharePage(other.p_vaddr)
                });
            }
        }

        let entry = image.entry().as_u64();
        entry_found |= entry >= ph.p_vaddr.as_u64() && entry - ph.p_vaddr.as_u64() < ph.p_memsz;
    }

    if entry_found {
        Ok(())
    } else {
        Err(EnvironmentError::EntryOutsideSegments(image.entry()))
    }
}

/// Whether the in-memory bytes of two segments intersect.
fn bytes_overlap(a: &ProgramHeader, b: &ProgramHeader) -> bool {
    let (a_start, b_start) = (a.p_vaddr.as_u64(), b.p_vaddr.as_u64());
    a_start < b_start.saturating_add(b.p_memsz) && b_start < a_start.saturating_add(a.p_memsz)
}

/// The 4 KiB pages `[vaddr, vaddr + memsz)` touches, if all are user pages.
fn segment_range(vaddr: VirtualAddress, memsz: u64) -> Option<UserRange> {
    let start = vaddr.as_u64() & !(PAGE_SIZE_4K - 1);
    let end = vaddr
        .as_u64()
        .checked_add(memsz)?
        .checked_next_multiple_of(PAGE_SIZE_4K)?;
    (end > start && end - 1 <= LAST_USERSPACE_ADDRESS).then_some(UserRange { start, end })
}

/// Maps `size` bytes of staged kernel memory at `virt` in `table`.
///
/// The heap only promises virtual contiguity, so the staged range is
/// resolved page by page and mapped as physically contiguous runs.
fn map_staged<M: PhysMapper>(
    paging: &mut PageTableManager<M>,
    table: TableId,
    virt: VirtualAddress,
    staged: VirtualAddress,
    size: u64,
) -> Result<(), EnvironmentError> {
    let resolve = |paging: &PageTableManager<M>, offset: u64| {
        let va = staged + offset;
        paging
            .virt_to_phys(va)
            .ok_or(EnvironmentError::StagedSegmentNotMapped(va))
    };

    let mut run_start = 0;
    let mut run_phys: PhysicalAddress = resolve(paging, 0)?;
    let mut offset = PAGE_SIZE_4K;
    while offset < size {
        let pa = resolve(paging, offset)?;
        if pa != run_phys + (offset - run_start) {
            paging.map_user_segment(table, virt + run_start, run_phys, offset - run_start)?;
            run_start = offset;
            run_phys = pa;
        }
        offset += PAGE_SIZE_4K;
    }
    paging.map_user_segment(table, virt + run_start, run_phys, size - run_start)?;
    Ok(())
}

/// Zeroes a fresh user stack.
#[allow(clippy::cast_possible_truncation)]
fn scrub(stack: NonNull<u8>) {
    // Safety: `alloc_aligned(USER_STACK_SIZE)` returned this block.
    unsafe { core::ptr::write_bytes(stack.as_ptr(), 0, USER_STACK_SIZE as usize) };
}
