//! Global descriptor table: kernel/user code+data segments and the TSS used
//! to load `esp0` for ring transitions back into the kernel on a trap.

use core::arch::asm;
use core::mem::size_of;
use lazy_static::lazy_static;
use spin::Mutex;

pub const KERNEL_CODE_SEL: u16 = 0x08;
pub const KERNEL_DATA_SEL: u16 = 0x10;
pub const USER_CODE_SEL: u16 = 0x1B; // RPL=3
pub const USER_DATA_SEL: u16 = 0x23; // RPL=3
const TSS_SEL: u16 = 0x28;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        GdtEntry {
            limit_low: 0,
            base_low: 0,
            base_mid: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        GdtEntry {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (granularity & 0xF0) | (((limit >> 16) & 0x0F) as u8),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

/// Task State Segment. Only `esp0`/`ss0` are meaningful in a software
/// task-switched i386 kernel without hardware task gates; the rest exist
/// because the CPU requires a full-sized structure.
#[repr(C, packed)]
pub struct Tss {
    pub prev_tss: u32,
    pub esp0: u32,
    pub ss0: u32,
    _rest: [u32; 23],
    _iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        Tss {
            prev_tss: 0,
            esp0: 0,
            ss0: KERNEL_DATA_SEL as u32,
            _rest: [0; 23],
            _iomap_base: size_of::<Tss>() as u16,
        }
    }
}

lazy_static! {
    static ref TSS: Mutex<Tss> = Mutex::new(Tss::new());
}

const GDT_ENTRIES: usize = 6;

fn build_gdt(tss_base: u32) -> [GdtEntry; GDT_ENTRIES] {
    [
        GdtEntry::null(),
        GdtEntry::new(0, 0xFFFFF, 0x9A, 0xC0), // kernel code
        GdtEntry::new(0, 0xFFFFF, 0x92, 0xC0), // kernel data
        GdtEntry::new(0, 0xFFFFF, 0xFA, 0xC0), // user code, DPL=3
        GdtEntry::new(0, 0xFFFFF, 0xF2, 0xC0), // user data, DPL=3
        GdtEntry::new(tss_base, size_of::<Tss>() as u32 - 1, 0x89, 0x00),
    ]
}

/// Installs the GDT and TSS and reloads every segment register. Must run
/// once, early in boot, before any trap can occur.
///
/// # Safety
/// Must be called exactly once, with interrupts disabled, before any
/// interrupt or syscall can be taken (the IDT gates reference these
/// selectors).
#[cfg(target_arch = "x86")]
pub unsafe fn init() {
    let tss_ptr = &*TSS.lock() as *const Tss as u32;
    let gdt = build_gdt(tss_ptr);
    let gdt_static: &'static [GdtEntry; GDT_ENTRIES] = unsafe {
        static mut STORAGE: [GdtEntry; GDT_ENTRIES] = [GdtEntry::null(); GDT_ENTRIES];
        STORAGE = gdt;
        &*core::ptr::addr_of!(STORAGE)
    };
    let pointer = DescriptorTablePointer {
        limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
        base: gdt_static.as_ptr() as u32,
    };
    unsafe {
        asm!("lgdt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        reload_segments();
        asm!("ltr {0:x}", in(reg) TSS_SEL, options(nostack, preserves_flags));
    }
}

#[cfg(target_arch = "x86")]
unsafe fn reload_segments() {
    unsafe {
        asm!(
            "push {code}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            "mov ax, {data}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            code = const KERNEL_CODE_SEL,
            data = const KERNEL_DATA_SEL,
            out("eax") _,
        );
    }
}

/// Updates the kernel-stack pointer the CPU loads on a ring3->ring0
/// transition. Called on every context switch to point at the new
/// process's kernel stack top.
pub fn set_kernel_stack(esp0: u32) {
    TSS.lock().esp0 = esp0;
}
