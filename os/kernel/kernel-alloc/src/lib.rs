//! # Kernel heap
//!
//! The virtual heap regions that paging setup produced are cut into 2 MiB
//! pages and tracked by a [`PagePool`]. The [`Heap`] sits on top:
//!
//! - requests that fit into one page are bump-allocated from an arena page,
//! - bigger requests get a run of pages of their own,
//! - [`Heap::alloc_aligned`] returns page-aligned memory with the block
//!   header one page in front of it.
//!
//! Freed small blocks are kept on a first-fit free list. Freeing anything the
//! heap did not hand out is reported as [`HeapError::InvalidFree`], which the
//! kernel treats as fatal.
//!
//! There is no global allocator; callers hold the heap and pass it where
//! memory is needed.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod error;
mod heap;
mod pool;
#[cfg(any(test, feature = "host-sim"))]
pub mod sim;

pub use error::HeapError;
pub use heap::{HEADER_SIZE, HEAP_ALIGN, Heap, HeapStats};
pub use pool::{MAX_POOL_PAGES, PagePool};
