use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// Low 8 bytes of a 64-bit *Available TSS* descriptor (type = 0x9, S=0).
#[bitfield(u64)]
pub struct TssDescLow {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40] = 0x9
    pub s: bool,       // [44]    = 0 (system)
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    #[bits(2)]
    _zero: u8, // [54:53] must be 0 for system types
    pub g: bool,       // [55]
    pub base_hi: u8,   // [63:56]
}

/// High 8 bytes: `base[63:32]`, rest reserved.
#[bitfield(u64)]
pub struct TssDescHigh {
    pub base_upper: u32,
    _reserved: u32,
}

/// 16-byte TSS system descriptor, two consecutive GDT slots.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct TssDesc64 {
    pub low: TssDescLow,
    pub high: TssDescHigh,
}

impl TssDesc64 {
    /// Not present. Used until the TSS address is known.
    pub const EMPTY: Self = Self {
        low: TssDescLow::new(),
        high: TssDescHigh::new(),
    };

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(base: VirtualAddress, limit: u32) -> Self {
        let base = base.as_u64();
        let low = TssDescLow::new()
            .with_limit_lo((limit & 0xFFFF) as u16)
            .with_base_lo((base & 0xFFFF) as u16)
            .with_base_mid(((base >> 16) & 0xFF) as u8)
            .with_typ(0x9)
            .with_p(true)
            .with_limit_hi(((limit >> 16) & 0xF) as u8)
            .with_base_hi(((base >> 24) & 0xFF) as u8);
        let high = TssDescHigh::new().with_base_upper((base >> 32) as u32);
        Self { low, high }
    }

    /// Base address the descriptor points at.
    #[must_use]
    pub fn base(&self) -> u64 {
        u64::from(self.low.base_lo())
            | (u64::from(self.low.base_mid()) << 16)
            | (u64::from(self.low.base_hi()) << 24)
            | (u64::from(self.high.base_upper()) << 32)
    }
}

const _: () = {
    assert!(size_of::<TssDescLow>() == 8);
    assert!(size_of::<TssDescHigh>() == 8);
    assert!(size_of::<TssDesc64>() == 16);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_is_split_across_both_halves() {
        let desc = TssDesc64::new(VirtualAddress::new(0xffff_8000_1234_5678), 0x67);
        assert_eq!(desc.low.base_lo(), 0x5678);
        assert_eq!(desc.low.base_mid(), 0x34);
        assert_eq!(desc.low.base_hi(), 0x12);
        assert_eq!(desc.high.base_upper(), 0xffff_8000);
        assert_eq!(desc.base(), 0xffff_8000_1234_5678);
        assert_eq!(desc.low.limit_lo(), 0x67);
        assert_eq!(desc.low.typ(), 0x9);
        assert!(desc.low.p());
        assert!(!desc.low.s());
    }
}
