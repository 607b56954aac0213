//! # Kernel Boot Information

/// Kernel function pointer.
///
/// # ABI
/// System V (`sysv64`): the boot stage passes the [`KernelBootInfo`] pointer in `RDI`.
pub type KernelEntryFn = extern "sysv64" fn(*const KernelBootInfo) -> !;

/// Information the kernel needs right after the firmware has been left behind.
/// Keep this `#[repr(C)]`; it crosses a binary boundary.
#[repr(C)]
#[derive(Clone)]
pub struct KernelBootInfo {
    /// Memory map buffer.
    pub mmap: MemoryMapInfo,

    /// Framebuffer information.
    pub fb: FramebufferInfo,

    /// The embedded ring-3 program.
    pub init_image: ProgramImageInfo,
}

#[repr(C)]
#[derive(Clone)]
pub struct MemoryMapInfo {
    /// Address of the first descriptor.
    pub mmap_ptr: u64,

    /// Length of the memory map buffer in **bytes**.
    pub mmap_len: u64,

    /// Distance between consecutive descriptors. May exceed [`MemoryMapEntry::SIZE`].
    pub mmap_desc_size: u64,
}

/// Raw bytes of the ELF image the kernel should run. Must stay resident while
/// the loader reads it.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProgramImageInfo {
    pub ptr: u64,
    pub len: u64,
}

/// Firmware memory type of a [`MemoryMapEntry`].
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryType {
    Reserved = 0,
    LoaderCode = 1,
    LoaderData = 2,
    BootServicesCode = 3,
    BootServicesData = 4,
    RuntimeServicesCode = 5,
    RuntimeServicesData = 6,
    Conventional = 7,
    Unusable = 8,
    AcpiReclaim = 9,
    AcpiNvs = 10,
    MemoryMappedIo = 11,
    MemoryMappedIoPortSpace = 12,
    PalCode = 13,
    Persistent = 14,
    Unaccepted = 15,
}

/// How the page-table builder treats a memory type.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MappingPolicy {
    /// Map with virtual address == physical address.
    Identity,
    /// Map into the higher-half virtual heap (subject to a minimum size).
    Virtual,
    /// Leave unmapped.
    Skip,
}

impl MemoryType {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Reserved,
            1 => Self::LoaderCode,
            2 => Self::LoaderData,
            3 => Self::BootServicesCode,
            4 => Self::BootServicesData,
            5 => Self::RuntimeServicesCode,
            6 => Self::RuntimeServicesData,
            7 => Self::Conventional,
            8 => Self::Unusable,
            9 => Self::AcpiReclaim,
            10 => Self::AcpiNvs,
            11 => Self::MemoryMappedIo,
            12 => Self::MemoryMappedIoPortSpace,
            13 => Self::PalCode,
            14 => Self::Persistent,
            15 => Self::Unaccepted,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn policy(self) -> MappingPolicy {
        match self {
            Self::Conventional => MappingPolicy::Virtual,
            Self::Reserved | Self::Unusable => MappingPolicy::Skip,
            _ => MappingPolicy::Identity,
        }
    }
}

/// One firmware memory descriptor.
///
/// Byte layout (little endian): `type: u32`, padding `u32`, `physical_start: u64`,
/// `virtual_start: u64`, `page_count: u64`, `attribute: u64`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemoryMapEntry {
    pub ty: u32,
    pub physical_start: u64,
    pub virtual_start: u64,
    /// Length in 4 KiB pages.
    pub page_count: u64,
    pub attribute: u64,
}

impl MemoryMapEntry {
    /// Logical size of one descriptor in bytes.
    pub const SIZE: usize = 40;

    #[must_use]
    pub const fn new(ty: MemoryType, physical_start: u64, page_count: u64) -> Self {
        Self {
            ty: ty as u32,
            physical_start,
            virtual_start: 0,
            page_count,
            attribute: 0,
        }
    }

    /// Decoded type, `None` for values this kernel does not know.
    #[must_use]
    pub const fn memory_type(&self) -> Option<MemoryType> {
        MemoryType::from_raw(self.ty)
    }

    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.page_count * 4096
    }

    #[must_use]
    pub const fn physical_end(&self) -> u64 {
        self.physical_start + self.size_bytes()
    }

    fn read(raw: &[u8]) -> Self {
        let u32_at = |o: usize| u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]);
        let u64_at = |o: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[o..o + 8]);
            u64::from_le_bytes(b)
        };
        Self {
            ty: u32_at(0),
            physical_start: u64_at(8),
            virtual_start: u64_at(16),
            page_count: u64_at(24),
            attribute: u64_at(32),
        }
    }

    fn write(&self, raw: &mut [u8]) {
        raw[0..4].copy_from_slice(&self.ty.to_le_bytes());
        raw[8..16].copy_from_slice(&self.physical_start.to_le_bytes());
        raw[16..24].copy_from_slice(&self.virtual_start.to_le_bytes());
        raw[24..32].copy_from_slice(&self.page_count.to_le_bytes());
        raw[32..40].copy_from_slice(&self.attribute.to_le_bytes());
    }
}

/// Stride-indexed view over a firmware memory map buffer.
///
/// Descriptors are addressed by `index * stride`, never by
/// [`MemoryMapEntry::SIZE`], so padded descriptors from newer firmware work.
/// Entries are not assumed to be sorted.
pub struct MemoryMap<'a> {
    bytes: &'a mut [u8],
    stride: usize,
}

impl<'a> MemoryMap<'a> {
    /// Wraps a buffer. `None` if the stride cannot hold a descriptor.
    #[must_use]
    pub fn new(bytes: &'a mut [u8], stride: usize) -> Option<Self> {
        if stride < MemoryMapEntry::SIZE {
            return None;
        }
        Some(Self { bytes, stride })
    }

    /// Number of complete descriptors in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.stride
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<MemoryMapEntry> {
        let start = index.checked_mul(self.stride)?;
        let raw = self.bytes.get(start..start + MemoryMapEntry::SIZE)?;
        Some(MemoryMapEntry::read(raw))
    }

    /// Rewrites the descriptor at `index`. Returns `false` if out of range.
    pub fn set(&mut self, index: usize, entry: &MemoryMapEntry) -> bool {
        let Some(start) = index.checked_mul(self.stride) else {
            return false;
        };
        match self.bytes.get_mut(start..start + MemoryMapEntry::SIZE) {
            Some(raw) => {
                entry.write(raw);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = MemoryMapEntry> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }
}

/// Framebuffer description handed over by the boot stage.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FramebufferInfo {
    /// Physical base address of the linear framebuffer.
    pub base: u64,

    /// Total size in **bytes**.
    pub size: u64,

    pub width: u64,
    pub height: u64,

    /// Pixels per scanline. May be >= width due to padding.
    pub stride: u64,

    pub format: PixelFormat,

    /// Only meaningful for [`PixelFormat::Bitmask`].
    pub masks: PixelMasks,
}

#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    /// Bytes R, G, B, reserved from low to high address.
    Rgba8 = 0,
    /// Bytes B, G, R, reserved from low to high address.
    Bgra8 = 1,
    /// Channels described by [`PixelMasks`].
    Bitmask = 2,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PixelMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl PixelMasks {
    /// Alpha occupies every bit no color channel claims.
    #[must_use]
    pub const fn alpha(&self) -> u32 {
        !(self.red | self.green | self.blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_bytes(entries: &[MemoryMapEntry], stride: usize) -> Vec<u8> {
        let mut bytes = vec![0xAAu8; entries.len() * stride];
        let mut map = MemoryMap::new(&mut bytes, stride).unwrap();
        for (i, e) in entries.iter().enumerate() {
            assert!(map.set(i, e));
        }
        bytes
    }

    #[test]
    fn indexes_by_stride_not_by_record_size() {
        let entries = [
            MemoryMapEntry::new(MemoryType::Conventional, 0x10_0000, 16),
            MemoryMapEntry::new(MemoryType::AcpiNvs, 0xFEE0_0000, 1),
        ];
        let mut bytes = map_bytes(&entries, 48);
        let map = MemoryMap::new(&mut bytes, 48).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1).unwrap().physical_start, 0xFEE0_0000);
        assert_eq!(map.iter().collect::<Vec<_>>(), entries);
        assert!(map.get(2).is_none());
    }

    #[test]
    fn rejects_strides_smaller_than_a_descriptor() {
        let mut bytes = [0u8; 64];
        assert!(MemoryMap::new(&mut bytes, 32).is_none());
    }

    #[test]
    fn in_place_rewrite_is_visible() {
        let mut bytes = map_bytes(&[MemoryMapEntry::new(MemoryType::Conventional, 0, 8)], 40);
        let mut map = MemoryMap::new(&mut bytes, 40).unwrap();
        let mut e = map.get(0).unwrap();
        e.physical_start = 0x4000;
        e.page_count = 4;
        map.set(0, &e);
        assert_eq!(map.get(0).unwrap().physical_end(), 0x8000);
    }

    #[test]
    fn classification() {
        assert_eq!(MemoryType::Conventional.policy(), MappingPolicy::Virtual);
        assert_eq!(MemoryType::LoaderCode.policy(), MappingPolicy::Identity);
        assert_eq!(MemoryType::MemoryMappedIo.policy(), MappingPolicy::Identity);
        assert_eq!(MemoryType::Unaccepted.policy(), MappingPolicy::Identity);
        assert_eq!(MemoryType::Unusable.policy(), MappingPolicy::Skip);
        assert_eq!(MemoryType::from_raw(99), None);
    }

    #[test]
    fn alpha_is_the_complement_of_the_color_masks() {
        let masks = PixelMasks {
            red: 0x00FF_0000,
            green: 0x0000_FF00,
            blue: 0x0000_00FF,
        };
        assert_eq!(masks.alpha(), 0xFF00_0000);
    }
}
