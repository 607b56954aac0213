//! # QEMU Debug Console Support
//!
//! Output through QEMU's debug console, I/O port `0x402`. Start QEMU with
//! `-debugcon stdio` (or `-debugcon file:debug.log`) to see it.
//!
//! * [`QemuLogger`]: the `log` backend the kernel installs first thing on boot.
//! * [`qemu_trace!`]: `format!`-style output that bypasses the logger, usable
//!   before the logger is installed.
//! * [`DebugConsole`]: raw byte sink, used as the console behind the
//!   `write` system call.
//!
//! With the `enabled` feature off every write compiles to nothing, which keeps
//! the crate usable on real hardware where port `0x402` may belong to
//! something else.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! QemuLogger::init(LevelFilter::Debug).ok();
//! info!("paging enabled");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

use core::fmt::{self, Write};

/// QEMU's debug console port.
pub const QEMU_DEBUG_PORT: u16 = 0x402;

/// Byte sink writing to the QEMU debug console.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugConsole;

impl DebugConsole {
    #[inline]
    pub fn write_byte(self, byte: u8) {
        #[cfg(feature = "enabled")]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") byte,
                options(nomem, nostack, preserves_flags)
            );
        }

        #[cfg(not(feature = "enabled"))]
        let _ = byte;
    }

    pub fn write_bytes(self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }
}

impl Write for DebugConsole {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

#[doc(hidden)]
#[inline]
pub fn qemu_write(args: fmt::Arguments) {
    // Best effort; the port cannot fail.
    fmt::write(&mut DebugConsole, args).ok();
}

#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_write(core::format_args!($($arg)*));
    }};
}
