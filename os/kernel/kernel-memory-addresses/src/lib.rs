//! # Virtual and Physical Memory Address Types
//!
//! Zero-cost wrappers that keep virtual and physical addresses apart at the
//! type level. The paging code, the heap and the loader all speak in these
//! types; raw `u64` values only appear at hardware boundaries (page-table
//! entries, control registers, ELF fields).
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | An address translated by the page tables. |
//! | [`PhysicalAddress`] | A physical RAM or MMIO address. |
//! | [`VirtualPage<S>`] / [`PhysicalPage<S>`] | A base address aligned to page size `S`. |
//!
//! Page sizes are marker types implementing the sealed [`PageSize`] trait:
//! [`Size4K`], [`Size2M`] and [`Size1G`].
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xFFFF_8000_0020_1234);
//! let (page, offset) = va.split::<Size2M>();
//! assert_eq!(page.base().as_u64(), 0xFFFF_8000_0020_0000);
//! assert_eq!(offset, 0x1234);
//! assert_eq!(page.join(offset), va);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

use core::fmt;
use core::hash::Hash;
use core::marker::PhantomData;
use core::ops::{Add, AddAssign};

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for supported page sizes.
pub trait PageSize: sealed::Sealed + Copy + Eq + Ord + Hash + fmt::Debug {
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// `log2(SIZE)`.
    const SHIFT: u32;
    /// Mask selecting the in-page offset bits.
    const MASK: u64 = Self::SIZE - 1;
    /// Short name used in debug output.
    const NAME: &'static str;
}

macro_rules! page_size {
    ($(#[$meta:meta])* $name:ident, $shift:literal, $short:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u64 = 1 << $shift;
            const SHIFT: u32 = $shift;
            const NAME: &'static str = $short;
        }
    };
}

page_size!(
    /// 4 KiB page, the base translation granule and the size of every page table.
    Size4K,
    12,
    "4K"
);
page_size!(
    /// 2 MiB large page, mapped by a directory-level leaf.
    Size2M,
    21,
    "2M"
);
page_size!(
    /// 1 GiB page. Only used for index arithmetic; the mapper never emits 1 GiB leaves.
    Size1G,
    30,
    "1G"
);

macro_rules! address_type {
    ($(#[$meta:meta])* $name:ident, $page:ident, $tag:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u64);

        impl $name {
            #[inline(always)]
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            #[inline(always)]
            #[must_use]
            pub const fn zero() -> Self {
                Self(0)
            }

            #[inline(always)]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            #[inline(always)]
            #[must_use]
            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }

            /// Whether the address sits on an `S` boundary.
            #[inline(always)]
            #[must_use]
            pub const fn is_aligned<S: PageSize>(self) -> bool {
                self.0 & S::MASK == 0
            }

            #[inline(always)]
            #[must_use]
            pub const fn align_down<S: PageSize>(self) -> Self {
                Self(self.0 & !S::MASK)
            }

            /// Rounds up to the next `S` boundary, `None` on overflow.
            #[inline]
            #[must_use]
            pub const fn align_up<S: PageSize>(self) -> Option<Self> {
                match self.0.checked_add(S::MASK) {
                    Some(v) => Some(Self(v & !S::MASK)),
                    None => None,
                }
            }

            /// The `S`-sized page containing this address.
            #[inline(always)]
            #[must_use]
            pub const fn page<S: PageSize>(self) -> $page<S> {
                $page::containing(self)
            }

            /// Offset of this address within its `S`-sized page.
            #[inline(always)]
            #[must_use]
            pub const fn offset<S: PageSize>(self) -> u64 {
                self.0 & S::MASK
            }

            #[inline(always)]
            #[must_use]
            pub const fn split<S: PageSize>(self) -> ($page<S>, u64) {
                (self.page::<S>(), self.offset::<S>())
            }

            #[inline]
            #[must_use]
            pub const fn checked_add(self, rhs: u64) -> Option<Self> {
                match self.0.checked_add(rhs) {
                    Some(v) => Some(Self(v)),
                    None => None,
                }
            }

            /// Distance in bytes from `base` up to `self`, `None` if `self < base`.
            #[inline]
            #[must_use]
            pub const fn distance_from(self, base: Self) -> Option<u64> {
                self.0.checked_sub(base.0)
            }
        }

        impl Add<u64> for $name {
            type Output = Self;

            #[inline(always)]
            fn add(self, rhs: u64) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl AddAssign<u64> for $name {
            #[inline(always)]
            fn add_assign(&mut self, rhs: u64) {
                self.0 += rhs;
            }
        }

        impl From<$name> for u64 {
            #[inline(always)]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "(0x{:016x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:016x}", self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        /// Page-aligned base address of a page of size `S`.
        #[repr(transparent)]
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $page<S: PageSize> {
            base: $name,
            _size: PhantomData<S>,
        }

        impl<S: PageSize> $page<S> {
            /// Wraps an address that is already aligned to `S`.
            ///
            /// # Panics
            /// In debug builds, if `base` is not aligned.
            #[inline]
            #[must_use]
            pub const fn from_addr(base: $name) -> Self {
                debug_assert!(base.is_aligned::<S>(), "page base must be aligned");
                Self {
                    base,
                    _size: PhantomData,
                }
            }

            /// The page that contains `addr`.
            #[inline]
            #[must_use]
            pub const fn containing(addr: $name) -> Self {
                Self {
                    base: addr.align_down::<S>(),
                    _size: PhantomData,
                }
            }

            #[inline(always)]
            #[must_use]
            pub const fn base(self) -> $name {
                self.base
            }

            /// Recombines the page base with an in-page offset.
            #[inline]
            #[must_use]
            pub const fn join(self, offset: u64) -> $name {
                debug_assert!(offset < S::SIZE, "offset exceeds page size");
                $name(self.base.0 | (offset & S::MASK))
            }

            /// The page following this one, `None` on overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Option<Self> {
                match self.base.checked_add(S::SIZE) {
                    Some(base) => Some(Self::from_addr(base)),
                    None => None,
                }
            }
        }

        impl<S: PageSize> fmt::Debug for $page<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    concat!(stringify!($page), "<{}>(0x{:016x})"),
                    S::NAME,
                    self.base.0
                )
            }
        }
    };
}

address_type!(
    /// A virtual memory address.
    VirtualAddress,
    VirtualPage,
    "VA"
);

address_type!(
    /// A physical memory address.
    PhysicalAddress,
    PhysicalPage,
    "PA"
);

/// Highest address of the canonical lower half, i.e. the last user-space byte.
const LOWER_HALF_END: u64 = 0x0000_7FFF_FFFF_FFFF;

impl VirtualAddress {
    /// The address a raw pointer refers to.
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    #[inline]
    #[must_use]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Bits 63..48 must replicate bit 47 for the CPU to accept the address.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let upper = self.0 >> 47;
        upper == 0 || upper == 0x1_FFFF
    }

    /// Whether the address lies in the canonical lower half.
    #[inline]
    #[must_use]
    pub const fn is_lower_half(self) -> bool {
        self.0 <= LOWER_HALF_END
    }
}
