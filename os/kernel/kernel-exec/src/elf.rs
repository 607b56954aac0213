//! # ELF64 images
//!
//! Header decoding and validation. [`ElfImage`](loader::ElfImage) builds on
//! this to stage the loadable segments on the kernel heap.

pub mod loader;

use crate::ElfError;
use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

pub const ELF_HEADER_SIZE: usize = 64;
pub const PROGRAM_HEADER_SIZE: usize = 56;
pub const SECTION_HEADER_SIZE: usize = 64;

const MAGIC: &[u8; 4] = b"\x7FELF";
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;
pub const EM_X86_64: u16 = 62;
pub const PT_LOAD: u32 = 1;

#[inline]
fn le16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

#[inline]
fn le64(x: &[u8]) -> u64 {
    u64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
}

/// The fields of `Elf64_Ehdr` after `e_ident`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::struct_field_names)]
pub struct ElfHeader {
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: VirtualAddress,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// `Elf64_Phdr.p_flags`: bit0=X, bit1=W, bit2=R.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PFlags {
    pub execute: bool,
    pub write: bool,
    pub read: bool,
    #[bits(29)]
    __: u32,
}

/// `Elf64_Phdr`.
///
/// After [`ElfImage::load`](loader::ElfImage::load), `p_paddr` of a
/// loadable segment holds the kernel address of its staged copy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::struct_field_names)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_flags: PFlags,
    pub p_offset: u64,
    pub p_vaddr: VirtualAddress,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl ProgramHeader {
    fn parse(s: &[u8]) -> Self {
        Self {
            p_type: le32(&s[0..4]),
            p_flags: PFlags::from_bits(le32(&s[4..8])),
            p_offset: le64(&s[8..16]),
            p_vaddr: VirtualAddress::new(le64(&s[16..24])),
            p_paddr: le64(&s[24..32]),
            p_filesz: le64(&s[32..40]),
            p_memsz: le64(&s[40..48]),
            p_align: le64(&s[48..56]),
        }
    }

    #[must_use]
    pub const fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Bytes between the start of the segment's first 4 KiB page and `p_vaddr`.
    #[must_use]
    pub const fn page_offset(&self) -> u64 {
        self.p_vaddr.as_u64() & 0xfff
    }
}

/// `Elf64_Shdr`, copied but not interpreted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::struct_field_names)]
pub struct SectionHeader {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

impl SectionHeader {
    fn parse(s: &[u8]) -> Self {
        Self {
            sh_name: le32(&s[0..4]),
            sh_type: le32(&s[4..8]),
            sh_flags: le64(&s[8..16]),
            sh_addr: le64(&s[16..24]),
            sh_offset: le64(&s[24..32]),
            sh_size: le64(&s[32..40]),
            sh_link: le32(&s[40..44]),
            sh_info: le32(&s[44..48]),
            sh_addralign: le64(&s[48..56]),
            sh_entsize: le64(&s[56..64]),
        }
    }
}

/// Validates the image header and the bounds of both header tables.
///
/// Checks run in this order: length, magic, type, class, machine, data
/// encoding, entry sizes, table bounds.
///
/// # Errors
/// The first check that fails.
pub fn parse_header(bytes: &[u8]) -> Result<ElfHeader, ElfError> {
    if bytes.len() < ELF_HEADER_SIZE {
        return Err(ElfError::TooShort);
    }
    if &bytes[0..4] != MAGIC {
        return Err(ElfError::BadMagic);
    }

    let eh = ElfHeader {
        e_type: le16(&bytes[16..18]),
        e_machine: le16(&bytes[18..20]),
        e_version: le32(&bytes[20..24]),
        e_entry: VirtualAddress::new(le64(&bytes[24..32])),
        e_phoff: le64(&bytes[32..40]),
        e_shoff: le64(&bytes[40..48]),
        e_flags: le32(&bytes[48..52]),
        e_ehsize: le16(&bytes[52..54]),
        e_phentsize: le16(&bytes[54..56]),
        e_phnum: le16(&bytes[56..58]),
        e_shentsize: le16(&bytes[58..60]),
        e_shnum: le16(&bytes[60..62]),
        e_shstrndx: le16(&bytes[62..64]),
    };

    if eh.e_type != ET_EXEC && eh.e_type != ET_DYN {
        return Err(ElfError::UnsupportedType(eh.e_type));
    }
    if bytes[4] != ELFCLASS64 {
        return Err(ElfError::BadClass(bytes[4]));
    }
    if eh.e_machine != EM_X86_64 {
        return Err(ElfError::BadMachine(eh.e_machine));
    }
    if bytes[5] != ELFDATA2LSB {
        return Err(ElfError::BadEncoding(bytes[5]));
    }
    if eh.e_phnum > 0 && usize::from(eh.e_phentsize) != PROGRAM_HEADER_SIZE {
        return Err(ElfError::BadProgramHeaderSize(eh.e_phentsize));
    }
    if eh.e_shnum > 0 && usize::from(eh.e_shentsize) != SECTION_HEADER_SIZE {
        return Err(ElfError::BadSectionHeaderSize(eh.e_shentsize));
    }

    table(bytes, eh.e_phoff, eh.e_phnum, PROGRAM_HEADER_SIZE)?;
    table(bytes, eh.e_shoff, eh.e_shnum, SECTION_HEADER_SIZE)?;
    Ok(eh)
}

/// The bytes of a header table, bounds-checked.
fn table(bytes: &[u8], offset: u64, count: u16, stride: usize) -> Result<&[u8], ElfError> {
    if count == 0 {
        return Ok(&[]);
    }
    let start = usize::try_from(offset).map_err(|_| ElfError::TruncatedTable)?;
    let end = usize::from(count)
        .checked_mul(stride)
        .and_then(|len| start.checked_add(len))
        .ok_or(ElfError::TruncatedTable)?;
    bytes.get(start..end).ok_or(ElfError::TruncatedTable)
}

/// Program header `i` of a validated image.
fn program_header(bytes: &[u8], eh: &ElfHeader, i: usize) -> Option<ProgramHeader> {
    let t = table(bytes, eh.e_phoff, eh.e_phnum, PROGRAM_HEADER_SIZE).ok()?;
    let off = i.checked_mul(PROGRAM_HEADER_SIZE)?;
    t.get(off..off + PROGRAM_HEADER_SIZE).map(ProgramHeader::parse)
}

/// Section header `i` of a validated image.
fn section_header(bytes: &[u8], eh: &ElfHeader, i: usize) -> Option<SectionHeader> {
    let t = table(bytes, eh.e_shoff, eh.e_shnum, SECTION_HEADER_SIZE).ok()?;
    let off = i.checked_mul(SECTION_HEADER_SIZE)?;
    t.get(off..off + SECTION_HEADER_SIZE).map(SectionHeader::parse)
}

/// The file bytes backing a loadable segment.
///
/// # Errors
/// [`ElfError::SegmentOutOfBounds`] if they are not inside `bytes` or the
/// segment claims more file bytes than memory bytes.
pub fn segment_file_bytes<'a>(
    bytes: &'a [u8],
    ph: &ProgramHeader,
    index: usize,
) -> Result<&'a [u8], ElfError> {
    let oob = ElfError::SegmentOutOfBounds { index };
    if ph.p_filesz > ph.p_memsz {
        return Err(oob);
    }
    let off = usize::try_from(ph.p_offset).map_err(|_| oob)?;
    let size = usize::try_from(ph.p_filesz).map_err(|_| oob)?;
    let end = off.checked_add(size).ok_or(oob)?;
    bytes.get(off..end).ok_or(oob)
}
