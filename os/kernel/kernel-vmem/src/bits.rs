use crate::PageEntry;
use utils_accessors_derive::Setters;

/// Permission and caching bits for a leaf mapping, independent of level.
///
/// Built with the generated `with_*` setters, usually from one of the presets:
///
/// ```
/// use kernel_vmem::PageBits;
///
/// let mmio = PageBits::kernel_rw().with_cache_disable(true);
/// assert!(mmio.writable && !mmio.user);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Setters)]
#[allow(clippy::struct_excessive_bools)]
pub struct PageBits {
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub global: bool,
    pub no_execute: bool,
}

impl PageBits {
    /// Supervisor read/write.
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self {
            writable: false,
            user: false,
            write_through: false,
            cache_disable: false,
            global: false,
            no_execute: false,
        }
        .with_writable(true)
    }

    /// User read/write (and executable: segments are not split by permission).
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::kernel_rw().with_user(true)
    }

    /// Leaf bits of an existing entry, used when splitting a large page.
    #[must_use]
    pub const fn of(entry: PageEntry) -> Self {
        Self {
            writable: entry.writable(),
            user: entry.user(),
            write_through: entry.write_through(),
            cache_disable: entry.cache_disable(),
            global: entry.global(),
            no_execute: entry.no_execute(),
        }
    }

    pub(crate) const fn apply(self, entry: PageEntry) -> PageEntry {
        entry
            .with_writable(self.writable)
            .with_user(self.user)
            .with_write_through(self.write_through)
            .with_cache_disable(self.cache_disable)
            .with_global(self.global)
            .with_no_execute(self.no_execute)
    }
}
