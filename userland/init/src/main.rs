#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU64, Ordering};
use stdlib::{println, sys_exit, sys_write};

static GREETING: &[u8] = b"init: raw write through the gateway\n";

/// Zero-initialized, so it lands in the zero-filled tail of the data segment.
static COUNTER: AtomicU64 = AtomicU64::new(0);

#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    println!("Init process started successfully!");

    let written = sys_write(GREETING);
    println!("write returned {written:?} for {} bytes", GREETING.len());

    let counter = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    println!("bss counter is {counter}");

    sys_exit(0)
}
