//! # Kernel
//!
//! The CPU-facing half of the kernel: descriptor tables, the privileged
//! operations behind [`kernel_exec::Privileged`], the `syscall` entry
//! path and the boot sequence that ties the library crates together. The
//! binary only provides the entry point and the panic handler.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod boot;
pub mod cpu;
pub mod fatal;
pub mod gdt;
pub mod syscall;
pub mod tracing;
pub mod tss;
