//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core, so exclusion is a matter of keeping
//! interrupt handlers (and the system-call path) out of a critical section:
//!
//! * [`IrqGuard`] masks interrupts for a scope and restores the previous state.
//! * [`IrqCell`] is a cell whose borrows run with interrupts masked and which
//!   refuses re-entrant borrows instead of deadlocking.
//! * [`SyncOnceCell`] holds values that are written once during boot.
//!
//! The interrupt flag is reached through [`InterruptMask`], so the same types
//! run in host tests with a software mask.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod irq;
mod irq_cell;
mod sync_once_cell;

pub use irq::{CpuInterrupts, InterruptMask, IrqGuard};
pub use irq_cell::{IrqCell, IrqCellGuard};
pub use sync_once_cell::SyncOnceCell;
