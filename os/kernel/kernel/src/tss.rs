//! # 64-bit Task State Segment
//!
//! Long mode has no hardware task switching, but the CPU still reads `rsp0`
//! from the TSS when an interrupt or exception moves it from ring 3 to
//! ring 0. `syscall` does not consult it; the entry stub switches stacks
//! itself. Both point at the same kernel stack here.

use core::mem::size_of;
use kernel_memory_addresses::VirtualAddress;

#[repr(C, packed(4))]
pub struct Tss64 {
    _reserved0: u32,
    /// Ring-0 stack loaded on a privilege change through an interrupt gate.
    pub rsp0: VirtualAddress,
    pub rsp1: VirtualAddress,
    pub rsp2: VirtualAddress,
    _reserved1: u64,
    /// Interrupt stack table, `ist[0]` is IST1.
    pub ist: [VirtualAddress; 7],
    _reserved2: u64,
    _reserved3: u16,
    /// Offset of the I/O permission bitmap. Pointing past the end disables
    /// it, so ring 3 port I/O faults.
    pub iopb_offset: u16,
}

impl Tss64 {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(rsp0: VirtualAddress) -> Self {
        Self {
            _reserved0: 0,
            rsp0,
            rsp1: VirtualAddress::zero(),
            rsp2: VirtualAddress::zero(),
            _reserved1: 0,
            ist: [VirtualAddress::zero(); 7],
            _reserved2: 0,
            _reserved3: 0,
            iopb_offset: size_of::<Self>() as u16,
        }
    }

    /// Descriptor limit: size minus one.
    #[allow(clippy::cast_possible_truncation)]
    pub const LIMIT: u32 = (size_of::<Self>() - 1) as u32;
}

const _: () = {
    assert!(size_of::<Tss64>() == 104);
    assert!(core::mem::offset_of!(Tss64, rsp0) == 4);
    assert!(core::mem::offset_of!(Tss64, ist) == 36);
    assert!(core::mem::offset_of!(Tss64, iopb_offset) == 102);
};
