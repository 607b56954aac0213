//! # Kernel heap
//!
//! Every block starts with a 48-byte header:
//!
//! ```text
//! small:    [ header | payload ]            bump-allocated inside an arena page
//! large:    [ header | payload ........ ]   dedicated run of pool pages
//! aligned:  [ header ...... ][ payload .. ] header one heap page before the payload
//! ```
//!
//! Small blocks are bump-allocated from the current 2 MiB arena page. Freed
//! small blocks go onto a first-fit free list and are reused as they are,
//! without splitting. Large and aligned blocks give their pages back to the
//! pool when freed.
//!
//! The header tag is a magic value XOR the header's own address, so a stray
//! pointer only passes validation if it points exactly past a live header.
//! Freed small blocks carry a second magic value, which turns a double free
//! into an error instead of list corruption.

use crate::{HeapError, PagePool};
use core::ptr::{self, NonNull, null_mut};
use kernel_info::memory::HEAP_PAGE_SIZE;
use kernel_memory_addresses::VirtualAddress;
use log::trace;

const LIVE_MAGIC: u64 = 0x4b48_4541_505f_4c56;
const FREE_MAGIC: u64 = 0x4b48_4541_505f_4652;

/// Payload sizes are rounded to this and payloads are aligned to it.
pub const HEAP_ALIGN: usize = 16;

#[allow(clippy::cast_possible_truncation)]
const PAGE: usize = HEAP_PAGE_SIZE as usize;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u64)]
enum Shape {
    Small = 1,
    Large = 2,
    Aligned = 3,
}

impl Shape {
    const fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            1 => Some(Self::Small),
            2 => Some(Self::Large),
            3 => Some(Self::Aligned),
            _ => None,
        }
    }
}

#[repr(C, align(16))]
struct BlockHeader {
    tag: u64,
    shape: u64,
    /// Bytes the caller asked for.
    size: u64,
    /// Bytes the payload can hold.
    capacity: u64,
    /// Pool pages backing the block; zero for small blocks.
    pages: u64,
    /// Next free block while on the free list.
    next: *mut BlockHeader,
}

/// Size of the block header in front of every small and large payload.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE == 48);
const _: () = assert!(HEADER_SIZE.is_multiple_of(HEAP_ALIGN));

/// What a header candidate turned out to be.
enum Candidate {
    Live(*mut BlockHeader, Shape),
    Freed,
    Nothing,
}

/// Allocation counters.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HeapStats {
    pub live_allocations: usize,
    /// Sum of the requested sizes of live allocations.
    pub live_bytes: usize,
    /// Small blocks waiting on the free list.
    pub free_blocks: usize,
    pub pages_in_use: usize,
    pub total_pages: usize,
}

/// The kernel heap. See the [module documentation](self).
pub struct Heap {
    pool: PagePool,
    /// Current arena page and the bytes used in it.
    arena: Option<(VirtualAddress, usize)>,
    free_head: *mut BlockHeader,
    live_allocations: usize,
    live_bytes: usize,
    free_blocks: usize,
}

// Safety: the heap owns the memory its raw pointers refer to and is only
// reachable through `&mut`.
unsafe impl Send for Heap {}

impl core::fmt::Debug for Heap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heap")
            .field("pool", &self.pool)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Heap {
    /// Heap over the pages of `pool`.
    ///
    /// The pool's pages must be mapped writable and not used by anything
    /// else for as long as the heap lives.
    #[must_use]
    pub const fn new(pool: PagePool) -> Self {
        Self {
            pool,
            arena: None,
            free_head: null_mut(),
            live_allocations: 0,
            live_bytes: 0,
            free_blocks: 0,
        }
    }

    /// Allocates `size` bytes aligned to [`HEAP_ALIGN`]. The contents are
    /// unspecified.
    ///
    /// The free list is searched first. Otherwise requests that fit an arena
    /// page are bump-allocated, anything bigger gets its own pages.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if the pool cannot supply the pages.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let ptr = if let Some(ptr) = self.take_free(size) {
            ptr
        } else if small_block_size(size).is_some_and(|block| block <= PAGE) {
            self.alloc_small(size)?
        } else {
            self.alloc_large(size)?
        };

        self.live_allocations += 1;
        self.live_bytes += size;
        Ok(ptr)
    }

    /// Like [`alloc`](Self::alloc) with the payload zeroed.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    pub fn alloc_zeroed(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let ptr = self.alloc(size)?;
        // Safety: the block holds at least `size` bytes.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, size) };
        Ok(ptr)
    }

    /// Room for `count` values of `T`, zeroed.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    pub fn alloc_array<T>(&mut self, count: usize) -> Result<NonNull<T>, HeapError> {
        const { assert!(align_of::<T>() <= HEAP_ALIGN) };
        let bytes = size_of::<T>()
            .checked_mul(count)
            .ok_or(HeapError::OutOfMemory { requested: usize::MAX })?;
        Ok(self.alloc_zeroed(bytes)?.cast())
    }

    /// Allocates `size` bytes starting exactly on a heap page boundary.
    ///
    /// One extra leading page holds the header, so the payload itself
    /// starts page-aligned. The contents are unspecified.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if the pool cannot supply the pages.
    pub fn alloc_aligned(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let oom = HeapError::OutOfMemory { requested: size };
        let pages = size.max(1).div_ceil(PAGE) + 1;
        let base = self.pool.alloc(pages).ok_or(oom)?;

        let header = base.as_mut_ptr::<BlockHeader>();
        let payload = base.as_mut_ptr::<u8>().wrapping_add(PAGE);
        // Safety: both pages are ours, the header sits at the start of the
        // first one and the scrubbed bytes at its end.
        unsafe {
            header.write(BlockHeader {
                tag: LIVE_MAGIC ^ base.as_u64(),
                shape: Shape::Aligned as u64,
                size: size as u64,
                capacity: ((pages - 1) * PAGE) as u64,
                pages: pages as u64,
                next: null_mut(),
            });
            // a stale small or large header right before the payload would
            // otherwise shadow this one on free
            ptr::write_bytes(payload.sub(HEADER_SIZE), 0, HEADER_SIZE);
        }

        trace!("heap: aligned {size} bytes at {payload:p} ({pages} pages)");
        self.live_allocations += 1;
        self.live_bytes += size;
        NonNull::new(payload).ok_or(oom)
    }

    /// Releases a block.
    ///
    /// # Errors
    /// - [`HeapError::DoubleFree`] for a small block that is already free.
    /// - [`HeapError::InvalidFree`] for anything that is not a live
    ///   allocation of this heap. Nothing is modified in either case.
    ///
    /// # Safety
    /// If `ptr` came from this heap, nothing may use the block afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let addr = VirtualAddress::from_ptr(ptr.as_ptr());

        match self.candidate(addr.as_u64().checked_sub(HEADER_SIZE as u64)) {
            Candidate::Live(header, Shape::Small) => {
                // Safety: validated live small header.
                unsafe { self.release_small(header) };
                return Ok(());
            }
            Candidate::Live(header, Shape::Large) => {
                // Safety: validated live large header.
                unsafe { self.release_pages(header) };
                return Ok(());
            }
            Candidate::Freed => return Err(HeapError::DoubleFree(addr)),
            Candidate::Live(_, Shape::Aligned) | Candidate::Nothing => {}
        }

        if let Candidate::Live(header, Shape::Aligned) =
            self.candidate(addr.as_u64().checked_sub(PAGE as u64))
        {
            // Safety: validated live aligned header.
            unsafe { self.release_pages(header) };
            return Ok(());
        }

        Err(HeapError::InvalidFree(addr))
    }

    #[must_use]
    pub const fn stats(&self) -> HeapStats {
        HeapStats {
            live_allocations: self.live_allocations,
            live_bytes: self.live_bytes,
            free_blocks: self.free_blocks,
            pages_in_use: self.pool.pages_in_use(),
            total_pages: self.pool.total_pages(),
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &PagePool {
        &self.pool
    }

    /// First free small block that can hold `size` bytes, unlinked and live again.
    fn take_free(&mut self, size: usize) -> Option<NonNull<u8>> {
        let mut prev: *mut *mut BlockHeader = &raw mut self.free_head;
        // Safety: the list only holds headers written by `release_small`.
        unsafe {
            let mut current = *prev;
            while !current.is_null() {
                if (*current).capacity >= size as u64 {
                    *prev = (*current).next;
                    (*current).next = null_mut();
                    (*current).tag = LIVE_MAGIC ^ current as u64;
                    (*current).size = size as u64;
                    self.free_blocks -= 1;
                    trace!("heap: reusing free block {current:p} for {size} bytes");
                    return NonNull::new(current.cast::<u8>().add(HEADER_SIZE));
                }
                prev = &raw mut (*current).next;
                current = *prev;
            }
        }
        None
    }

    #[allow(clippy::cast_ptr_alignment)]
    fn alloc_small(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let oom = HeapError::OutOfMemory { requested: size };
        let block = small_block_size(size).ok_or(oom)?;

        let (page, used) = match self.arena {
            Some((page, used)) if PAGE - used >= block => (page, used),
            _ => {
                let page = self.pool.alloc(1).ok_or(oom)?;
                trace!("heap: new arena page at {page}");
                (page, 0)
            }
        };
        self.arena = Some((page, used + block));

        let header = page.as_mut_ptr::<u8>().wrapping_add(used).cast::<BlockHeader>();
        // Safety: `[header, header + block)` is unused arena space.
        unsafe {
            header.write(BlockHeader {
                tag: LIVE_MAGIC ^ header as u64,
                shape: Shape::Small as u64,
                size: size as u64,
                capacity: (block - HEADER_SIZE) as u64,
                pages: 0,
                next: null_mut(),
            });
            NonNull::new(header.cast::<u8>().add(HEADER_SIZE)).ok_or(oom)
        }
    }

    fn alloc_large(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let oom = HeapError::OutOfMemory { requested: size };
        let pages = size.checked_add(HEADER_SIZE).ok_or(oom)?.div_ceil(PAGE);
        let base = self.pool.alloc(pages).ok_or(oom)?;

        let header = base.as_mut_ptr::<BlockHeader>();
        // Safety: the run is ours and starts with room for the header.
        unsafe {
            header.write(BlockHeader {
                tag: LIVE_MAGIC ^ base.as_u64(),
                shape: Shape::Large as u64,
                size: size as u64,
                capacity: (pages * PAGE - HEADER_SIZE) as u64,
                pages: pages as u64,
                next: null_mut(),
            });
        }

        trace!("heap: large {size} bytes at {base} ({pages} pages)");
        NonNull::new(base.as_mut_ptr::<u8>().wrapping_add(HEADER_SIZE)).ok_or(oom)
    }

    /// Reads the header at `addr` if it lies in handed-out pool memory.
    fn candidate(&self, addr: Option<u64>) -> Candidate {
        let Some(addr) = addr else {
            return Candidate::Nothing;
        };
        let va = VirtualAddress::new(addr);
        if !addr.is_multiple_of(HEAP_ALIGN as u64) || !self.pool.is_in_use(va) {
            return Candidate::Nothing;
        }

        let header = va.as_mut_ptr::<BlockHeader>();
        // Safety: the header is 16-byte aligned, so it lies entirely within
        // the in-use page that `addr` is in.
        let (tag, shape) = unsafe { ((*header).tag, (*header).shape) };
        if tag == FREE_MAGIC ^ addr && Shape::from_raw(shape) == Some(Shape::Small) {
            return Candidate::Freed;
        }
        match Shape::from_raw(shape) {
            Some(shape) if tag == LIVE_MAGIC ^ addr => Candidate::Live(header, shape),
            _ => Candidate::Nothing,
        }
    }

    /// # Safety
    /// `header` must be a live small block of this heap.
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn release_small(&mut self, header: *mut BlockHeader) {
        unsafe {
            self.live_allocations -= 1;
            self.live_bytes -= (*header).size as usize;
            (*header).tag = FREE_MAGIC ^ header as u64;
            (*header).next = self.free_head;
        }
        self.free_head = header;
        self.free_blocks += 1;
        trace!("heap: small block {header:p} to the free list");
    }

    /// # Safety
    /// `header` must be a live large or aligned block of this heap.
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn release_pages(&mut self, header: *mut BlockHeader) {
        let (size, pages) = unsafe { ((*header).size as usize, (*header).pages as usize) };
        // Safety: still ours until the pages go back to the pool.
        unsafe { (*header).tag = 0 };

        self.live_allocations -= 1;
        self.live_bytes -= size;
        let returned = self.pool.free(VirtualAddress::from_ptr(header), pages);
        debug_assert!(returned, "live block pages were not in use");
        trace!("heap: returned {pages} pages at {header:p}");
    }
}

/// Header plus payload rounded up to [`HEAP_ALIGN`].
fn small_block_size(size: usize) -> Option<usize> {
    match size.checked_next_multiple_of(HEAP_ALIGN) {
        Some(payload) => payload.max(HEAP_ALIGN).checked_add(HEADER_SIZE),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::HostHeapMemory;

    #[test]
    fn small_allocations_are_distinct_and_aligned() {
        let memory = HostHeapMemory::new(4);
        let mut heap = memory.heap();

        let a = heap.alloc(1).unwrap();
        let b = heap.alloc(100).unwrap();
        let c = heap.alloc(0).unwrap();
        for p in [a, b, c] {
            assert!((p.as_ptr() as usize).is_multiple_of(HEAP_ALIGN));
        }
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, HEADER_SIZE + 16);
        assert_eq!(c.as_ptr() as usize - b.as_ptr() as usize, HEADER_SIZE + 112);

        let stats = heap.stats();
        assert_eq!(stats.live_allocations, 3);
        assert_eq!(stats.live_bytes, 101);
        assert_eq!(stats.pages_in_use, 1);
    }

    #[test]
    fn third_sixteen_byte_alloc_reuses_the_first() {
        let memory = HostHeapMemory::new(2);
        let mut heap = memory.heap();

        let first = heap.alloc(16).unwrap();
        let second = heap.alloc(16).unwrap();
        unsafe { heap.free(first).unwrap() };
        assert_eq!(heap.alloc(16).unwrap(), first);
        assert_ne!(first, second);
    }

    #[test]
    fn freed_block_is_reused_for_the_same_size() {
        let memory = HostHeapMemory::new(6);
        let mut heap = memory.heap();

        for size in [24, 4096, 3 * PAGE] {
            let p = heap.alloc(size).unwrap();
            unsafe { heap.free(p).unwrap() };
            assert_eq!(heap.alloc(size).unwrap(), p, "size {size}");
        }
    }

    #[test]
    fn first_fit_takes_the_first_block_that_is_large_enough() {
        let memory = HostHeapMemory::new(4);
        let mut heap = memory.heap();

        let small = heap.alloc(16).unwrap();
        let big = heap.alloc(256).unwrap();
        let _keep = heap.alloc(16).unwrap();
        unsafe {
            heap.free(big).unwrap();
            heap.free(small).unwrap();
        }
        assert_eq!(heap.stats().free_blocks, 2);

        // the small block is at the head of the list but cannot hold 200 bytes
        assert_eq!(heap.alloc(200).unwrap(), big);
        assert_eq!(heap.alloc(8).unwrap(), small);
        assert_eq!(heap.stats().free_blocks, 0);
    }

    #[test]
    fn writes_do_not_clobber_neighbours() {
        let memory = HostHeapMemory::new(8);
        let mut heap = memory.heap();

        // small blocks of odd sizes, interleaved with a large and an aligned one
        let mut blocks = Vec::new();
        for size in [1, 17, 40, 4095] {
            blocks.push((heap.alloc(size).unwrap(), size));
        }
        blocks.push((heap.alloc(PAGE + 1).unwrap(), PAGE + 1));
        blocks.push((heap.alloc(33).unwrap(), 33));
        blocks.push((heap.alloc_aligned(100).unwrap(), 100));
        blocks.push((heap.alloc(15).unwrap(), 15));

        let holds = |p: NonNull<u8>, size: usize, byte: u8| {
            // Safety: `size` bytes at `p` belong to a live block.
            unsafe { core::slice::from_raw_parts(p.as_ptr(), size) }
                .iter()
                .all(|&b| b == byte)
        };

        // fill front to back, then back to front with a second pattern; after
        // each pass every block must still hold exactly its own bytes
        #[allow(clippy::cast_possible_truncation)]
        for pass in 0..2u8 {
            let order: Vec<usize> = if pass == 0 {
                (0..blocks.len()).collect()
            } else {
                (0..blocks.len()).rev().collect()
            };
            for &i in &order {
                let (p, size) = blocks[i];
                unsafe { ptr::write_bytes(p.as_ptr(), 0x10 * (pass + 1) + i as u8, size) };
            }
            for (i, &(p, size)) in blocks.iter().enumerate() {
                let byte = 0x10 * (pass + 1) + i as u8;
                assert!(holds(p, size, byte), "block {i} after pass {pass}");
            }
        }

        // every header survived: each free is accepted exactly once
        for &(p, _) in &blocks {
            unsafe { heap.free(p).unwrap() };
        }
        assert_eq!(heap.stats().live_allocations, 0);
    }

    #[test]
    fn large_blocks_return_their_pages() {
        let memory = HostHeapMemory::new(4);
        let mut heap = memory.heap();

        let p = heap.alloc(PAGE).unwrap();
        assert_eq!(heap.stats().pages_in_use, 2);
        unsafe { ptr::write_bytes(p.as_ptr(), 0x5a, PAGE) };
        unsafe { heap.free(p).unwrap() };
        assert_eq!(heap.stats().pages_in_use, 0);
        assert_eq!(heap.stats().live_bytes, 0);
    }

    #[test]
    fn aligned_payload_starts_on_a_page_boundary() {
        let memory = HostHeapMemory::new(4);
        let mut heap = memory.heap();

        let p = heap.alloc_aligned(5000).unwrap();
        assert!((p.as_ptr() as usize).is_multiple_of(PAGE));
        assert_eq!(heap.stats().pages_in_use, 2);
        unsafe { ptr::write_bytes(p.as_ptr(), 0x11, 5000) };

        unsafe { heap.free(p).unwrap() };
        assert_eq!(heap.stats().pages_in_use, 0);
        assert_eq!(heap.stats().live_allocations, 0);
    }

    #[test]
    fn stale_bytes_before_an_aligned_payload_are_ignored() {
        let memory = HostHeapMemory::new(2);
        let mut heap = memory.heap();

        // leave something that looks like a live small header at the end of
        // the first page, where an aligned payload's neighbour header would be
        let large = heap.alloc(PAGE).unwrap();
        let spot = large.as_ptr() as usize - HEADER_SIZE + PAGE - HEADER_SIZE;
        unsafe {
            (spot as *mut BlockHeader).write(BlockHeader {
                tag: LIVE_MAGIC ^ spot as u64,
                shape: Shape::Small as u64,
                size: 8,
                capacity: 16,
                pages: 0,
                next: null_mut(),
            });
            heap.free(large).unwrap();
        }

        let p = heap.alloc_aligned(10).unwrap();
        assert_eq!(p.as_ptr() as usize, spot + HEADER_SIZE);
        unsafe { heap.free(p).unwrap() };
        assert_eq!(heap.stats().free_blocks, 0);
        assert_eq!(heap.stats().pages_in_use, 0);
    }

    #[test]
    fn invalid_frees_are_reported() {
        let memory = HostHeapMemory::new(4);
        let mut heap = memory.heap();
        let p = heap.alloc(64).unwrap();
        let aligned = heap.alloc_aligned(64).unwrap();

        let mut outside = 0u64;
        let outside = NonNull::from(&mut outside).cast::<u8>();
        let interior = unsafe { p.add(16) };
        let past_aligned = unsafe { aligned.add(HEADER_SIZE) };

        for bad in [outside, interior, past_aligned] {
            assert_eq!(
                unsafe { heap.free(bad) },
                Err(HeapError::InvalidFree(VirtualAddress::from_ptr(bad.as_ptr())))
            );
        }

        // nothing was touched by the failed frees
        assert_eq!(heap.stats().live_allocations, 2);
        unsafe {
            heap.free(p).unwrap();
            heap.free(aligned).unwrap();
        }
    }

    #[test]
    fn double_free_is_detected() {
        let memory = HostHeapMemory::new(4);
        let mut heap = memory.heap();

        let p = heap.alloc(32).unwrap();
        unsafe { heap.free(p).unwrap() };
        assert_eq!(
            unsafe { heap.free(p) },
            Err(HeapError::DoubleFree(VirtualAddress::from_ptr(p.as_ptr())))
        );
        assert_eq!(heap.stats().free_blocks, 1);

        let large = heap.alloc(2 * PAGE).unwrap();
        unsafe { heap.free(large).unwrap() };
        assert!(matches!(unsafe { heap.free(large) }, Err(HeapError::InvalidFree(_))));
    }

    #[test]
    fn exhaustion_is_an_error() {
        let memory = HostHeapMemory::new(2);
        let mut heap = memory.heap();

        assert_eq!(
            heap.alloc(2 * PAGE),
            Err(HeapError::OutOfMemory { requested: 2 * PAGE })
        );
        assert!(heap.alloc(PAGE).is_ok());
        assert_eq!(heap.alloc(1), Err(HeapError::OutOfMemory { requested: 1 }));
        assert_eq!(heap.alloc_aligned(1), Err(HeapError::OutOfMemory { requested: 1 }));
    }

    #[test]
    fn arrays_are_zeroed() {
        let memory = HostHeapMemory::new(2);
        let mut heap = memory.heap();

        let p = heap.alloc(64).unwrap();
        unsafe { ptr::write_bytes(p.as_ptr(), 0xff, 64) };
        unsafe { heap.free(p).unwrap() };

        let words = heap.alloc_array::<u64>(8).unwrap();
        assert_eq!(words.cast::<u8>(), p);
        let words = unsafe { core::slice::from_raw_parts(words.as_ptr(), 8) };
        assert!(words.iter().all(|&w| w == 0));
    }
}
