//! Host stand-ins for physical memory and the privileged CPU operations.

extern crate std;

use crate::{AddressSpaceLoader, PhysMapper};
use core::cell::RefCell;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use std::boxed::Box;
use std::collections::HashMap;
use std::vec::Vec;

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

/// Sparse simulated physical memory: 4 KiB frames keyed by frame number,
/// created zeroed on first touch.
#[derive(Default)]
pub struct SimulatedPhysMemory {
    frames: RefCell<HashMap<u64, Box<Frame>>>,
}

impl SimulatedPhysMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames touched so far.
    #[must_use]
    pub fn frames_touched(&self) -> usize {
        self.frames.borrow().len()
    }
}

impl PhysMapper for SimulatedPhysMemory {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let offset = (pa.as_u64() & 0xfff) as usize;
        assert!(
            offset + size_of::<T>() <= 4096,
            "simulated access crosses a frame"
        );

        let mut frames = self.frames.borrow_mut();
        let frame = frames
            .entry(pa.as_u64() >> 12)
            .or_insert_with(|| Box::new(Frame([0; 4096])));

        // SAFETY: boxed frames never move while the map is alive.
        unsafe { &mut *frame.0.as_mut_ptr().add(offset).cast::<T>() }
    }
}

/// Records what the manager asked the CPU to do.
#[derive(Debug, Default)]
pub struct RecordingLoader {
    pub loaded: Vec<PhysicalPage<Size4K>>,
    pub paging_enabled: bool,
}

impl AddressSpaceLoader for RecordingLoader {
    fn load_address_space(&mut self, root: PhysicalPage<Size4K>) {
        self.loaded.push(root);
    }

    fn enable_paging(&mut self) {
        self.paging_enabled = true;
    }
}
