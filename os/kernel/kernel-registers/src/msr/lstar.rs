use crate::msr::{Msr, msr_access};
use bitfield_struct::bitfield;

/// `IA32_LSTAR`: 64-bit `SYSCALL` entry point.
#[bitfield(u64)]
pub struct Ia32Lstar {
    #[bits(64)]
    pub entry: u64,
}

impl Ia32Lstar {
    pub const MSR: Msr = Msr::new(0xC000_0082);
}

msr_access!(Ia32Lstar);
