use core::marker::PhantomData;

/// Access to the CPU's maskable-interrupt flag.
pub trait InterruptMask {
    /// Masks interrupts and returns whether they were enabled before.
    fn disable() -> bool;

    /// Unmasks interrupts again.
    fn enable();
}

/// The real interrupt flag, driven with `pushfq`/`cli`/`sti`.
///
/// # Privilege
///
/// `cli`/`sti` fault outside ring 0 (with IOPL 0). Only use from kernel code.
pub struct CpuInterrupts;

impl InterruptMask for CpuInterrupts {
    #[inline]
    fn disable() -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            let flags: u64;
            unsafe {
                core::arch::asm!("pushfq", "pop {}", "cli", out(reg) flags, options(nomem, preserves_flags));
            }
            flags & (1 << 9) != 0
        }

        #[cfg(not(target_arch = "x86_64"))]
        false
    }

    #[inline]
    fn enable() {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
        }
    }
}

/// RAII guard that masks interrupts on creation and restores them on drop.
///
/// Interrupts are re-enabled on drop **only** if they were enabled when the
/// guard was created, so guards nest.
///
/// ```no_run
/// use kernel_sync::IrqGuard;
///
/// {
///     let _g: IrqGuard = IrqGuard::new();
///     // interrupts masked here
/// }
/// // previous state restored
/// ```
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<M: InterruptMask = CpuInterrupts> {
    were_enabled: bool,
    _mask: PhantomData<M>,
}

impl<M: InterruptMask> IrqGuard<M> {
    #[inline]
    pub fn new() -> Self {
        Self {
            were_enabled: M::disable(),
            _mask: PhantomData,
        }
    }

    /// Whether interrupts were enabled when the guard was taken.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl<M: InterruptMask> Default for IrqGuard<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: InterruptMask> Drop for IrqGuard<M> {
    fn drop(&mut self) {
        if self.were_enabled {
            M::enable();
        }
    }
}
