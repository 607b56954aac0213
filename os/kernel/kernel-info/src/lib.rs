//! # Kernel Configuration and Boot Interface
//!
//! Shared definitions between the boot stage and the kernel, plus the
//! compile-time configuration of the address-space layout.
//!
//! ## Modules
//!
//! ### Boot Information ([`boot`])
//! The hand-off contract from the firmware stage:
//! * **Memory map**: firmware-described physical ranges, read through a
//!   stride-indexed [`MemoryMap`](boot::MemoryMap) view that also allows
//!   rewriting entries in place.
//! * **Framebuffer**: base, size, geometry and pixel format of the linear
//!   framebuffer.
//! * **Program image**: the embedded ring-3 ELF binary the kernel runs.
//!
//! ### Memory Layout ([`memory`])
//! Constants that fix where things live:
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │ identity-mapped firmware ranges │
//!                       │ kernel image (PHYS_LOAD)        │
//!                       │ user segments (ELF p_vaddr)     │
//! USER_STACK_TOP        ├─────────────────────────────────┤ 0x0000_7fff_ffff_e000
//! LAST_USERSPACE_ADDRESS├─────────────────────────────────┤ 0x0000_7fff_ffff_ffff
//!                       │ non-canonical hole              │
//! VIRT_HEAP_BASE        ├─────────────────────────────────┤ 0xffff_8000_0000_0000
//!                       │ virtual heap (map_virtual)      │
//!                       │ grows upward, never reused      │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ### Segment Selectors ([`segments`])
//! The GDT order the `SYSCALL`/`SYSRET` selector arithmetic requires.
//!
//! Low memory is identity mapped so the kernel keeps running at its load
//! address after the page-table switch; conventional RAM is mapped a second
//! time into the higher half where the heap lives.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod segments;
