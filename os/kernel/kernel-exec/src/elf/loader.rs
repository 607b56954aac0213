//! # Staging an image on the heap

use crate::ElfError;
use crate::elf::{
    ElfHeader, ProgramHeader, SectionHeader, parse_header, program_header, section_header,
    segment_file_bytes,
};
use core::ptr::{self, NonNull};
use kernel_alloc::{Heap, HeapError};
use kernel_memory_addresses::VirtualAddress;
use log::{debug, info};

/// A heap-allocated array, released together with its [`ElfImage`].
pub struct HeapArray<T> {
    ptr: NonNull<T>,
    len: usize,
}

impl<T: Copy> HeapArray<T> {
    /// Allocates `len` elements and fills them from `f`.
    fn collect_in(
        heap: &mut Heap,
        len: usize,
        mut f: impl FnMut(usize) -> Option<T>,
    ) -> Result<Option<Self>, HeapError> {
        let ptr = heap.alloc_array::<T>(len)?;
        for i in 0..len {
            let Some(value) = f(i) else {
                // Safety: just allocated from this heap.
                unsafe { heap.free(ptr.cast())? };
                return Ok(None);
            };
            // Safety: `i < len` and the allocation holds `len` elements.
            unsafe { ptr.add(i).write(value) };
        }
        Ok(Some(Self { ptr, len }))
    }

    #[must_use]
    pub const fn as_slice(&self) -> &[T] {
        // Safety: `len` initialized elements, alive until `free`.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub const fn as_mut_slice(&mut self) -> &mut [T] {
        // Safety: as above, and `&mut self` is unique.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn free(self, heap: &mut Heap) -> Result<(), HeapError> {
        // Safety: allocated from `heap` in `collect_in`; `self` is consumed.
        unsafe { heap.free(self.ptr.cast()) }
    }
}

/// A validated image with every loadable segment staged on the heap.
///
/// Each staged copy is zero-filled to `p_memsz`, starts at the same offset
/// within its 4 KiB page as `p_vaddr`, and its address is stored in the
/// segment's `p_paddr`. Release everything with [`ElfImage::free`].
pub struct ElfImage {
    header: ElfHeader,
    program_headers: HeapArray<ProgramHeader>,
    section_headers: HeapArray<SectionHeader>,
}

impl core::fmt::Debug for ElfImage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ElfImage")
            .field("header", &self.header)
            .field("program_headers", &self.program_headers.as_slice())
            .field("section_headers", &self.section_headers.len)
            .finish()
    }
}

impl ElfImage {
    /// Validates `bytes` and stages its loadable segments.
    ///
    /// # Errors
    /// - Any validation error of [`parse_header`], or
    ///   [`ElfError::SegmentOutOfBounds`]. Nothing was allocated.
    /// - [`ElfError::Heap`] if staging ran out of memory. Everything staged
    ///   for this image was released again.
    pub fn load(bytes: &[u8], heap: &mut Heap) -> Result<Self, ElfError> {
        let header = parse_header(bytes)?;
        let phnum = usize::from(header.e_phnum);
        let shnum = usize::from(header.e_shnum);

        for i in 0..phnum {
            let ph = program_header(bytes, &header, i).ok_or(ElfError::TruncatedTable)?;
            if ph.is_load() {
                segment_file_bytes(bytes, &ph, i)?;
                staged_len(&ph).ok_or(ElfError::SegmentOutOfBounds { index: i })?;
            }
        }

        // `p_paddr` of a loadable segment is only non-zero once it is staged
        let program_headers = HeapArray::collect_in(heap, phnum, |i| {
            program_header(bytes, &header, i).map(|mut ph| {
                if ph.is_load() {
                    ph.p_paddr = 0;
                }
                ph
            })
        })?
        .ok_or(ElfError::TruncatedTable)?;
        let section_headers =
            match HeapArray::collect_in(heap, shnum, |i| section_header(bytes, &header, i)) {
                Ok(Some(sections)) => sections,
                failed => {
                    program_headers.free(heap)?;
                    return Err(failed.map_or_else(ElfError::Heap, |_| ElfError::TruncatedTable));
                }
            };

        let mut image = Self {
            header,
            program_headers,
            section_headers,
        };

        for i in 0..phnum {
            let ph = &mut image.program_headers.as_mut_slice()[i];
            if !ph.is_load() {
                continue;
            }
            if let Err(e) = stage(bytes, ph, i, heap) {
                debug!("elf: staging segment {i} failed, rolling back");
                image.free(heap)?;
                return Err(e);
            }
        }

        info!(
            "elf: loaded image with entry {}, {} segments staged",
            image.entry(),
            image.loaded_segments().count()
        );
        Ok(image)
    }

    /// Releases every staged segment, then both header arrays.
    ///
    /// # Errors
    /// If the heap rejects one of the frees, which means it was corrupted.
    pub fn free(self, heap: &mut Heap) -> Result<(), HeapError> {
        for ph in self.program_headers.as_slice() {
            if let Some(staged) = staged_block(ph) {
                // Safety: `stage` allocated this block from `heap`, and the
                // image is consumed here.
                unsafe { heap.free(staged)? };
            }
        }
        self.program_headers.free(heap)?;
        self.section_headers.free(heap)
    }

    #[must_use]
    pub const fn header(&self) -> &ElfHeader {
        &self.header
    }

    #[must_use]
    pub const fn entry(&self) -> VirtualAddress {
        self.header.e_entry
    }

    #[must_use]
    pub const fn program_headers(&self) -> &[ProgramHeader] {
        self.program_headers.as_slice()
    }

    #[must_use]
    pub const fn section_headers(&self) -> &[SectionHeader] {
        self.section_headers.as_slice()
    }

    /// Loadable segments that have a staged copy.
    pub fn loaded_segments(&self) -> impl Iterator<Item = &ProgramHeader> {
        self.program_headers()
            .iter()
            .filter(|ph| ph.is_load() && ph.p_paddr != 0)
    }

    /// The `p_memsz` staged bytes of program header `index`, if it was loaded.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn staged_bytes(&self, index: usize) -> Option<&[u8]> {
        let ph = self.program_headers().get(index)?;
        if !ph.is_load() || ph.p_paddr == 0 {
            return None;
        }
        // Safety: staged copies stay allocated until `free` consumes the image.
        Some(unsafe {
            core::slice::from_raw_parts(ph.p_paddr as *const u8, ph.p_memsz as usize)
        })
    }
}

/// Bytes to allocate for a segment: its page offset plus `p_memsz`.
fn staged_len(ph: &ProgramHeader) -> Option<usize> {
    let memsz = usize::try_from(ph.p_memsz).ok()?;
    memsz.checked_add(usize::try_from(ph.page_offset()).ok()?)
}

/// The heap block holding a staged segment.
fn staged_block(ph: &ProgramHeader) -> Option<NonNull<u8>> {
    if !ph.is_load() || ph.p_paddr == 0 {
        return None;
    }
    NonNull::new((ph.p_paddr - ph.page_offset()) as *mut u8)
}

/// Copies one segment into fresh, zeroed, page-aligned heap memory.
#[allow(clippy::cast_possible_truncation)]
fn stage(bytes: &[u8], ph: &mut ProgramHeader, index: usize, heap: &mut Heap) -> Result<(), ElfError> {
    if ph.p_memsz == 0 {
        return Ok(());
    }
    let file = segment_file_bytes(bytes, ph, index)?;
    let len = staged_len(ph).ok_or(ElfError::SegmentOutOfBounds { index })?;
    let offset = ph.page_offset() as usize;

    let block = heap.alloc_aligned(len)?;
    // Safety: the block holds `len = offset + p_memsz` bytes and
    // `file.len() <= p_memsz`.
    unsafe {
        ptr::write_bytes(block.as_ptr(), 0, len);
        ptr::copy_nonoverlapping(file.as_ptr(), block.as_ptr().add(offset), file.len());
    }
    ph.p_paddr = block.as_ptr() as u64 + offset as u64;

    debug!(
        "elf: segment {index} at {} staged at {:#x} ({:#x} of {:#x} bytes from file)",
        ph.p_vaddr, ph.p_paddr, ph.p_filesz, ph.p_memsz
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_image::{TestImage, TestSegment};
    use kernel_alloc::sim::HostHeapMemory;

    fn usage(heap: &Heap) -> (usize, usize) {
        let s = heap.stats();
        (s.live_allocations, s.live_bytes)
    }

    #[test]
    fn segment_tail_is_zero_filled() {
        let memory = HostHeapMemory::new(8);
        let mut heap = memory.heap();
        let data: Vec<u8> = (1..=100).collect();
        let bytes = TestImage::new(0x40_0123)
            .segment(TestSegment::new(0x40_0123, data.clone(), 0x3000))
            .build();

        let image = ElfImage::load(&bytes, &mut heap).unwrap();
        let ph = image.loaded_segments().next().unwrap();
        let staged = image.staged_bytes(0).unwrap();

        assert_eq!(staged.len(), 0x3000);
        assert_eq!(&staged[..100], &data[..]);
        assert!(staged[100..].iter().all(|&b| b == 0));
        // same offset within the page as the segment's virtual address
        assert_eq!(ph.p_paddr & 0xfff, 0x123);

        image.free(&mut heap).unwrap();
        assert_eq!(usage(&heap), (0, 0));
    }

    #[test]
    fn headers_are_copied_and_staged_addresses_recorded() {
        let memory = HostHeapMemory::new(8);
        let mut heap = memory.heap();
        let bytes = TestImage::new(0x40_1000)
            .segment(TestSegment::new(0x40_1000, vec![0xcc; 16], 16))
            .segment(TestSegment::note(vec![1, 2, 3, 4]))
            .segment(TestSegment::new(0x40_3000, vec![0xdd; 8], 0x100))
            .sections(3)
            .build();

        let image = ElfImage::load(&bytes, &mut heap).unwrap();
        assert_eq!(image.entry(), VirtualAddress::new(0x40_1000));
        assert_eq!(image.program_headers().len(), 3);
        assert_eq!(image.section_headers().len(), 3);
        assert_eq!(image.section_headers()[2].sh_name, 2);

        let phs = image.program_headers();
        assert_ne!(phs[0].p_paddr, 0x40_1000);
        assert_eq!(image.loaded_segments().count(), 2);
        assert_eq!(image.staged_bytes(1), None, "notes are not staged");
        assert_eq!(image.staged_bytes(2).unwrap()[..8], [0xdd; 8]);
        assert_eq!(image.staged_bytes(2).unwrap().len(), 0x100);

        image.free(&mut heap).unwrap();
        assert_eq!(heap.stats().live_allocations, 0);
    }

    #[test]
    fn rejected_images_allocate_nothing() {
        let memory = HostHeapMemory::new(4);
        let mut heap = memory.heap();
        let _warm = heap.alloc(8).unwrap();
        let before = usage(&heap);

        let good = TestImage::new(0x40_1000)
            .segment(TestSegment::new(0x40_1000, vec![0x90; 64], 64))
            .build();

        let mut bad_magic = good.clone();
        bad_magic[1] = b'X';
        let mut elf32 = good.clone();
        elf32[4] = 1;
        let mut arm = good.clone();
        arm[18..20].copy_from_slice(&183u16.to_le_bytes());
        let mut truncated_segment = good.clone();
        truncated_segment.truncate(good.len() - 8);

        assert_eq!(ElfImage::load(&bad_magic, &mut heap).unwrap_err(), ElfError::BadMagic);
        assert_eq!(ElfImage::load(&elf32, &mut heap).unwrap_err(), ElfError::BadClass(1));
        assert_eq!(ElfImage::load(&arm, &mut heap).unwrap_err(), ElfError::BadMachine(183));
        assert_eq!(
            ElfImage::load(&truncated_segment, &mut heap).unwrap_err(),
            ElfError::SegmentOutOfBounds { index: 0 }
        );
        assert_eq!(usage(&heap), before);
    }

    #[test]
    fn zeroed_magic_in_a_two_page_image() {
        let memory = HostHeapMemory::new(4);
        let mut heap = memory.heap();
        let mut bytes = TestImage::new(0x40_1000)
            .segment(TestSegment::new(0x40_1000, vec![0x90; 0x1e00], 0x2000))
            .build();
        assert!(bytes.len() > 0x1000 && bytes.len() <= 0x2000);
        bytes[..4].fill(0);
        let before = heap.stats();

        assert_eq!(ElfImage::load(&bytes, &mut heap).unwrap_err(), ElfError::BadMagic);
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn running_out_of_memory_mid_image_rolls_back() {
        // arena page plus two aligned segments of two pages each
        let memory = HostHeapMemory::new(5);
        let mut heap = memory.heap();
        let _warm = heap.alloc(8).unwrap();
        let before = usage(&heap);
        let pages_before = heap.stats().pages_in_use;

        let bytes = TestImage::new(0x40_0000)
            .segment(TestSegment::new(0x40_0000, vec![1; 16], 16))
            .segment(TestSegment::new(0x60_0000, vec![2; 16], 16))
            .segment(TestSegment::new(0x80_0000, vec![3; 16], 16))
            .build();

        assert!(matches!(
            ElfImage::load(&bytes, &mut heap),
            Err(ElfError::Heap(HeapError::OutOfMemory { .. }))
        ));
        assert_eq!(usage(&heap), before);
        assert_eq!(heap.stats().pages_in_use, pages_before);
    }
}
