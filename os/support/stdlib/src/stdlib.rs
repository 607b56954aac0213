pub mod fmt;

pub use crate::syscall::{sys_exit, sys_write};
