use kernel_sync::{InterruptMask, IrqCell, IrqGuard};
use std::cell::Cell;
use std::panic;

thread_local! {
    static ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Software interrupt flag, one per test thread.
struct SoftMask;

impl InterruptMask for SoftMask {
    fn disable() -> bool {
        ENABLED.with(|e| e.replace(false))
    }

    fn enable() {
        ENABLED.with(|e| e.set(true));
    }
}

fn interrupts_enabled() -> bool {
    ENABLED.with(Cell::get)
}

#[test]
fn guard_masks_and_restores() {
    assert!(interrupts_enabled());
    {
        let g = IrqGuard::<SoftMask>::new();
        assert!(g.were_enabled());
        assert!(!interrupts_enabled());
    }
    assert!(interrupts_enabled());
}

#[test]
fn nested_guards_restore_only_at_outermost() {
    let outer = IrqGuard::<SoftMask>::new();
    {
        let inner = IrqGuard::<SoftMask>::new();
        assert!(!inner.were_enabled());
    }
    // still masked: the inner guard saw interrupts already off
    assert!(!interrupts_enabled());
    drop(outer);
    assert!(interrupts_enabled());
}

#[test]
fn borrow_masks_interrupts_for_its_lifetime() {
    let cell: IrqCell<u32, SoftMask> = IrqCell::new(41);
    {
        let mut g = cell.try_borrow().expect("free cell");
        assert!(!interrupts_enabled());
        *g += 1;
    }
    assert!(interrupts_enabled());
    assert_eq!(cell.with(|v| *v), Some(42));
}

#[test]
fn reentrant_borrow_is_refused() {
    let cell: IrqCell<Vec<u8>, SoftMask> = IrqCell::new(Vec::new());
    let outer = cell.with(|v| {
        v.push(1);
        // an interrupt handler touching the same cell would land here
        cell.with(|v| v.push(2))
    });
    assert_eq!(outer, Some(None));
    assert_eq!(cell.with(|v| v.clone()), Some(vec![1]));
    assert!(!cell.is_borrowed());
    assert!(interrupts_enabled());
}

#[test]
fn refused_borrow_does_not_leak_mask() {
    let cell: IrqCell<u8, SoftMask> = IrqCell::new(0);
    let g = cell.try_borrow().expect("free cell");
    assert!(cell.try_borrow().is_none());
    assert!(!interrupts_enabled());
    drop(g);
    assert!(interrupts_enabled());
}

#[test]
fn borrow_is_released_on_panic() {
    let cell: IrqCell<u32, SoftMask> = IrqCell::new(0);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        cell.with(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    assert_eq!(cell.with(|v| *v), Some(123));
    assert!(interrupts_enabled());
}

#[test]
fn get_mut_and_into_inner() {
    let mut cell: IrqCell<Vec<i32>, SoftMask> = IrqCell::new(vec![1, 2, 3]);
    cell.get_mut().push(4);
    assert_eq!(cell.into_inner(), vec![1, 2, 3, 4]);
}
