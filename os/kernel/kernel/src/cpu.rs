//! The CPU side of address-space switches and the drop to ring 3.

use kernel_exec::{IretFrame, Privileged};
use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr3::Cr3;
use kernel_registers::cr4::Cr4;
use kernel_registers::efer::Efer;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_vmem::AddressSpaceLoader;
use log::debug;

/// Privileged operations on the boot CPU. Ring 0 only.
#[derive(Debug, Default)]
pub struct CpuPrivileged;

impl AddressSpaceLoader for CpuPrivileged {
    fn load_address_space(&mut self, root: PhysicalPage<Size4K>) {
        debug!("cpu: cr3 <- {:?}", root.base());
        // Safety: the table maps the running code, the stack and the
        // tables themselves; callers hand over nothing else.
        unsafe { Cr3::for_root(root).store_unsafe() };
    }

    fn enable_paging(&mut self) {
        // Safety: read-modify-write of enable bits that are already set
        // in long mode, plus NXE so NX leaf bits are legal.
        unsafe {
            let cr4 = Cr4::load_unsafe();
            if !cr4.pae() {
                cr4.with_pae(true).store_unsafe();
            }
            let efer = Efer::load_unsafe();
            if !efer.nxe() {
                efer.with_nxe(true).store_unsafe();
            }
            let cr0 = Cr0::load_unsafe();
            if !cr0.pg_paging() {
                cr0.with_pg_paging(true).store_unsafe();
            }
        }
        debug!("cpu: paging enable bits set");
    }
}

impl Privileged for CpuPrivileged {
    fn enter_user_mode(&mut self, frame: &IretFrame) -> ! {
        // Safety: the frame carries ring-3 selectors and the active table
        // maps `rip` and `rsp` for the user. Registers are cleared so no
        // kernel values leak into the program.
        unsafe {
            core::arch::asm!(
                "mov ds, {ds:x}",
                "mov es, {ds:x}",
                "push {ss}",
                "push {rsp}",
                "push {rflags}",
                "push {cs}",
                "push {rip}",
                "xor eax, eax",
                "xor ebx, ebx",
                "xor ecx, ecx",
                "xor edx, edx",
                "xor esi, esi",
                "xor edi, edi",
                "xor ebp, ebp",
                "xor r8d, r8d",
                "xor r9d, r9d",
                "xor r10d, r10d",
                "xor r11d, r11d",
                "xor r12d, r12d",
                "xor r13d, r13d",
                "xor r14d, r14d",
                "xor r15d, r15d",
                "iretq",
                ds = in(reg) frame.ss,
                ss = in(reg) frame.ss,
                rsp = in(reg) frame.rsp,
                rflags = in(reg) frame.rflags,
                cs = in(reg) frame.cs,
                rip = in(reg) frame.rip,
                options(noreturn)
            )
        }
    }
}
