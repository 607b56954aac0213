//! # Segment Selectors
//!
//! GDT layout shared by the kernel's descriptor tables and the ring-3 entry
//! frame. `SYSRET` derives the user selectors from `STAR[63:48]`: SS is that
//! value + 8 and CS is + 16, which fixes the order below.
//!
//! ```text
//! 0x00  null
//! 0x08  kernel code
//! 0x10  kernel data
//! 0x18  user data     (selector 0x1b with RPL 3)
//! 0x20  user code     (selector 0x23 with RPL 3)
//! 0x28  TSS           (two slots)
//! ```

/// Requested privilege level of user selectors.
pub const USER_RPL: u16 = 3;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_DATA_SELECTOR: u16 = 0x18 | USER_RPL;
pub const USER_CODE_SELECTOR: u16 = 0x20 | USER_RPL;
pub const TSS_SELECTOR: u16 = 0x28;

/// Base the `SYSRET` half of `STAR` is programmed with.
pub const SYSRET_BASE_SELECTOR: u16 = KERNEL_DATA_SELECTOR | USER_RPL;

const _: () = {
    assert!(KERNEL_DATA_SELECTOR == KERNEL_CODE_SELECTOR + 8);
    assert!(USER_DATA_SELECTOR == SYSRET_BASE_SELECTOR + 8);
    assert!(USER_CODE_SELECTOR == SYSRET_BASE_SELECTOR + 16);
};
