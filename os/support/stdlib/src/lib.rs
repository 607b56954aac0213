//! # Userland support library
//!
//! The system-call ABI shared with the kernel (`syscall-abi`), the raw
//! `syscall` wrappers (`syscall`) and `print!`/`println!` on top of them
//! (`stdlib`). The kernel only enables the ABI.

#![no_std]
#![cfg_attr(not(feature = "syscall"), forbid(unsafe_code))]
#![cfg_attr(feature = "syscall", allow(unsafe_code))]

#[cfg(feature = "stdlib")]
#[macro_use]
pub mod stdlib;

#[cfg(feature = "syscall")]
pub mod syscall;

#[cfg(feature = "syscall-abi")]
pub mod syscall_abi;

#[cfg(feature = "stdlib")]
pub use stdlib::*;

// Hosted builds link the handler from std.
#[cfg(all(feature = "stdlib", target_os = "none"))]
mod panic {
    #[panic_handler]
    fn panic(_: &core::panic::PanicInfo) -> ! {
        crate::syscall::sys_exit(101)
    }
}
