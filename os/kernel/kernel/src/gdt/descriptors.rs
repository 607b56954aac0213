//! # 64-bit code and data segment descriptors
//!
//! In long mode the base and limit of code/data descriptors are ignored.
//! What the CPU still checks is the type, the descriptor class, the DPL,
//! the present bit and, for code, the `L` (64-bit) bit.

use bitfield_struct::bitfield;

/// Bit layout shared by code and data descriptors.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct SegmentDescBits {
    pub limit_lo: u16, // [15:0]   ignored in long mode
    pub base_lo: u16,  // [31:16]  ignored in long mode
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40]  0b1010 code exec+read, 0b0010 data read/write
    pub s: bool,       // [44]     1 = code/data
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53]     64-bit code
    pub db: bool,      // [54]     must be 0 when L = 1
    pub g: bool,       // [55]
    pub base_hi: u8,   // [63:56]
}

/// One 8-byte GDT entry.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Desc64(SegmentDescBits);

impl Desc64 {
    pub const NULL: Self = Self(SegmentDescBits::new());

    /// 64-bit code segment, execute + read.
    #[must_use]
    pub const fn code(dpl: u8) -> Self {
        Self(
            SegmentDescBits::new()
                .with_typ(0b1010)
                .with_s(true)
                .with_dpl(dpl & 0b11)
                .with_p(true)
                .with_l(true),
        )
    }

    /// Data/stack segment, read + write.
    #[must_use]
    pub const fn data(dpl: u8) -> Self {
        Self(
            SegmentDescBits::new()
                .with_typ(0b0010)
                .with_s(true)
                .with_dpl(dpl & 0b11)
                .with_p(true),
        )
    }

    #[must_use]
    pub const fn bits(self) -> SegmentDescBits {
        self.0
    }

    #[must_use]
    pub const fn to_u64(self) -> u64 {
        self.0.into_bits()
    }
}

const _: () = {
    assert!(size_of::<Desc64>() == 8);
};
