use crate::irq::{CpuInterrupts, InterruptMask, IrqGuard};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// Interior-mutable cell for single-core kernel state.
///
/// A borrow masks interrupts for its lifetime. A second borrow while the first
/// is alive (an interrupt or system call that found the cell busy) fails with
/// `None` rather than spinning forever.
pub struct IrqCell<T, M: InterruptMask = CpuInterrupts> {
    busy: AtomicBool,
    value: UnsafeCell<T>,
    _mask: PhantomData<fn() -> M>,
}

// Safety: access is exclusive through the busy flag; only T: Send may move between contexts.
unsafe impl<T: Send, M: InterruptMask> Sync for IrqCell<T, M> {}

impl<T, M: InterruptMask> IrqCell<T, M> {
    pub const fn new(value: T) -> Self {
        Self {
            busy: AtomicBool::new(false),
            value: UnsafeCell::new(value),
            _mask: PhantomData,
        }
    }

    /// Borrows the value with interrupts masked, or `None` if it is already borrowed.
    #[inline]
    pub fn try_borrow(&self) -> Option<IrqCellGuard<'_, T, M>> {
        let irq = IrqGuard::<M>::new();
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        Some(IrqCellGuard {
            cell: self,
            _irq: irq,
        })
    }

    /// Runs `f` on the value. `None` if the cell is already borrowed.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut g = self.try_borrow()?;
        Some(f(&mut g))
    }

    #[inline]
    pub fn is_borrowed(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// Exclusive borrow of an [`IrqCell`]. Field order matters: the flag is
/// released before interrupts are restored.
pub struct IrqCellGuard<'a, T, M: InterruptMask> {
    cell: &'a IrqCell<T, M>,
    _irq: IrqGuard<M>,
}

impl<T, M: InterruptMask> Deref for IrqCellGuard<'_, T, M> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the busy flag is held.
        unsafe { &*self.cell.value.get() }
    }
}

impl<T, M: InterruptMask> DerefMut for IrqCellGuard<'_, T, M> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the busy flag is held.
        unsafe { &mut *self.cell.value.get() }
    }
}

impl<T, M: InterruptMask> Drop for IrqCellGuard<'_, T, M> {
    #[inline]
    fn drop(&mut self) {
        self.cell.busy.store(false, Ordering::Release);
    }
}
