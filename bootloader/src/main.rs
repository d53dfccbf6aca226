//! Stage-2 bootloader (spec §4.J): protected-mode code that finds the
//! kernel image in the USTAR archive, ELF-loads it, builds the multiboot
//! info record the kernel's own `multiboot.rs` expects, and jumps in.
//!
//! Stage 1 (the real-mode BIOS memory-map probe, spec §4.J step 1) is a
//! named-but-unspecified collaborator: it is assembly outside this design's
//! scope, and this binary only consumes the two fixed-location symbols it
//! leaves behind.

#![no_std]
#![no_main]

mod ata;
mod elf;
mod tar;

use core::arch::global_asm;
use core::panic::PanicInfo;

/// LBA the USTAR archive starts at, immediately after the 16-sector
/// bootloader region (spec §6 "Boot disk layout").
const USTAR_START_LBA: u32 = 16;
const KERNEL_IMAGE_PATH: &str = "boot/simple_os.kernel";

/// Scratch address the kernel image is loaded to before being ELF-relocated
/// to its real load addresses, matching the original's `0x01000000`.
const KERNEL_LOAD_ADDR: usize = 0x0100_0000;
const KERNEL_LOAD_MAX: usize = 0x0040_0000;

/// Conventional low-memory address the multiboot info record is built just
/// below, matching the original (`0x00080000 - sizeof(multiboot_info_t)`).
const MULTIBOOT_INFO_TOP: usize = 0x0008_0000;

const FLAG_MEM_MAP: u32 = 1 << 6;

#[repr(C)]
struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    _syms: [u32; 4],
    mmap_length: u32,
    mmap_addr: u32,
}

#[repr(C, packed)]
struct MmapEntry {
    _size: u32,
    _base_addr: u64,
    _length: u64,
    _kind: u32,
}

// Populated by the stage-1 real-mode stub before it switches to protected
// mode and jumps here: the address of `ADDR_MMAP_ADDR` itself is the start
// of the BIOS memory map table, while `ADDR_MMAP_COUNT` holds the entry
// count as data.
extern "C" {
    static ADDR_MMAP_ADDR: u32;
    static ADDR_MMAP_COUNT: u32;
}

global_asm!(
    r#"
.section .text
.global _start
_start:
    mov esp, offset boot_stack_top
    call bootloader_main
.hang:
    hlt
    jmp .hang

.section .bss
.align 16
boot_stack_bottom:
    .skip 4096
boot_stack_top:
"#
);

#[no_mangle]
extern "C" fn bootloader_main() -> ! {
    // SAFETY: `MULTIBOOT_INFO_TOP` is reserved low memory the kernel has not
    // been loaded into yet, and outlives the jump below.
    let info = unsafe { &mut *((MULTIBOOT_INFO_TOP - core::mem::size_of::<MultibootInfo>()) as *mut MultibootInfo) };
    // SAFETY: these symbols are defined by the real-mode stub that ran
    // immediately before this code, per the boot protocol in spec §4.J.
    let (mmap_addr, mmap_count) = unsafe { (&ADDR_MMAP_ADDR as *const u32 as u32, ADDR_MMAP_COUNT) };
    info.flags = FLAG_MEM_MAP;
    info.mmap_addr = mmap_addr;
    info.mmap_length = mmap_count * core::mem::size_of::<MmapEntry>() as u32;

    // SAFETY: `KERNEL_LOAD_ADDR..+KERNEL_LOAD_MAX` is scratch memory below
    // the kernel's own eventual link addresses and above this loader.
    let kernel_buf = unsafe { core::slice::from_raw_parts_mut(KERNEL_LOAD_ADDR as *mut u8, KERNEL_LOAD_MAX) };
    let kernel_size = tar::lookup_lazy(USTAR_START_LBA, KERNEL_IMAGE_PATH, kernel_buf)
        .unwrap_or_else(|| panic!("{KERNEL_IMAGE_PATH} not found in USTAR archive"));

    if !elf::is_elf(&kernel_buf[..kernel_size.min(4)]) {
        panic!("{KERNEL_IMAGE_PATH} is not an ELF image");
    }
    // SAFETY: `kernel_buf` holds a validated ELF32 image whose PT_LOAD
    // segments target physical addresses distinct from this loader and its
    // scratch buffer, by the disk layout this crate was built against.
    let entry_point = unsafe { elf::load(kernel_buf) };

    // Multiboot convention: pointer to the info structure in `ebx`.
    unsafe {
        core::arch::asm!(
            "mov ebx, {info}",
            "jmp {entry}",
            info = in(reg) info as *mut MultibootInfo,
            entry = in(reg) entry_point,
            options(noreturn),
        );
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {
        unsafe { core::arch::asm!("hlt") };
    }
}
