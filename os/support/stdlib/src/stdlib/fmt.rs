use crate::syscall::sys_write;
use core::fmt::{self, Write};

pub struct SyscallSink;

impl Write for SyscallSink {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut rest = s.as_bytes();
        while !rest.is_empty() {
            match sys_write(rest) {
                Some(n) if n > 0 => rest = &rest[n.min(rest.len())..],
                _ => return Err(fmt::Error),
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn syscall_write(args: fmt::Arguments) {
    // Best effort; there is nowhere to report a failed console write.
    fmt::write(&mut SyscallSink, args).ok();
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        $crate::stdlib::fmt::syscall_write(core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! println {
    () => {{
        $crate::print!("\n");
    }};
    ($($arg:tt)*) => {{
        $crate::stdlib::fmt::syscall_write(core::format_args!($($arg)*));
        $crate::print!("\n");
    }};
}
