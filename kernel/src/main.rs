//! Kernel entry point and boot sequence (spec §4.I "Boot"). Everything this
//! file does is sequencing: bring up the platform primitives in `arch`,
//! seed memory management from the multiboot handoff, mount the two
//! filesystem backends, then construct and jump into the first process.

#![no_std]
#![no_main]

use core::arch::global_asm;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, Ordering};

extern crate alloc;

use alloc::sync::Arc;

use log::LevelFilter;

use simpleos_kernel::arch::trap::TrapFrame;
use simpleos_kernel::arch::{gdt, idt, pic};
use simpleos_kernel::config::{SYSCALL_VECTOR, USTAR_START_LBA};
use simpleos_kernel::drivers::ata::AtaPio;
use simpleos_kernel::drivers::{keyboard, PcTerminal};
use simpleos_kernel::fs::console::Console;
use simpleos_kernel::fs::tar::UstarFs;
use simpleos_kernel::mm::paging;
use simpleos_kernel::mm::{frame_allocator::FRAME_ALLOCATOR, page_fault_handler};
use simpleos_kernel::multiboot::MultibootInfo;
use simpleos_kernel::process::{self, Process, ProcessState};
use simpleos_kernel::{log_backend, ALLOCATOR};

/// Pages handed to `mm::heap::KernelHeap::init` before anything on the heap
/// is allocated. Generous for a hobby kernel's bookkeeping structures.
const INITIAL_HEAP_PAGES: usize = 64;

/// Path the bootloader's USTAR image is expected to carry the first user
/// program under. Writing and shipping that binary is outside this
/// kernel's scope; boot fails loudly if it is absent.
const INIT_PATH: &str = "/boot/usr/bin/init";

// `_start` receives the multiboot info pointer in `ebx`, the register the
// bootloader's handoff convention (spec §9b) leaves it in, and sets up a
// small boot stack before calling into Rust.
global_asm!(
    r#"
.section .text
.global _start
_start:
    mov esp, offset boot_stack_top
    push ebx
    call kernel_entry
.hang:
    hlt
    jmp .hang

.section .bss
.align 16
boot_stack_bottom:
    .skip 16384
boot_stack_top:
"#
);

#[no_mangle]
extern "C" fn kernel_entry(multiboot_ptr: u32) -> ! {
    // SAFETY: first thing executed after the boot stack is live; no
    // interrupt or trap can occur before `gdt::init`/`idt::init` run below.
    unsafe { gdt::init() };

    idt::register(14, page_fault_handler, false);
    idt::register(SYSCALL_VECTOR, simpleos_kernel::syscall::dispatch, true);
    idt::register(pic::IRQ0_VECTOR + 1, keyboard::irq_handler, false);
    unsafe { idt::init() };
    unsafe { pic::init() };

    log_backend::init(LevelFilter::Info);
    log::info!("booting");

    // SAFETY: `multiboot_ptr` is the value `_start` forwarded straight from
    // `ebx`, untouched since the bootloader wrote it there.
    let info = unsafe { MultibootInfo::read(multiboot_ptr) }
        .expect("multiboot info missing memory map (flag bit 6)");
    let total_frames = info.total_frames();
    let reserved = info.reserved_frames(total_frames);
    FRAME_ALLOCATOR.lock().init(total_frames, reserved.into_iter());
    log::info!("{total_frames} frames reported by multiboot memory map");

    paging::assert_recursive_mapping();
    ALLOCATOR.init(INITIAL_HEAP_PAGES);

    let ata = Arc::new(AtaPio::new());
    let ustar = Arc::new(UstarFs::new(ata, USTAR_START_LBA));
    simpleos_kernel::fs::MOUNTS.write().mount("/", ustar);
    let console = Arc::new(Console::new(PcTerminal::new()));
    simpleos_kernel::fs::MOUNTS.write().mount("/console", console);

    unsafe { spawn_init() };
}

/// Builds process 1 by hand (no `fork` has a parent to copy from yet),
/// loads [`INIT_PATH`] into it via the ordinary `execve` path, and jumps
/// into user mode for the first time.
///
/// # Safety
/// Must run exactly once, after `gdt`/`idt`/`pic` are initialized and the
/// frame allocator and heap are seeded; leaves the CPU in user mode and
/// never returns.
unsafe fn spawn_init() -> ! {
    let pid = process::alloc_pid();
    debug_assert_eq!(pid, process::INIT_PID, "spawn_init must run before any other pid is allocated");
    let page_directory_phys = simpleos_kernel::arch::read_cr3();
    let kernel_stack_top = process::alloc_kernel_stack();

    let blank_frame = TrapFrame {
        edi: 0,
        esi: 0,
        ebp: 0,
        esp0: kernel_stack_top,
        ebx: 0,
        edx: 0,
        ecx: 0,
        eax: 0,
        int_no: 0,
        err_code: 0,
        eip: 0,
        cs: 0,
        eflags: 0,
        user_esp: 0,
        user_ss: 0,
    };
    let mut process = Process::new(pid, pid, page_directory_phys, kernel_stack_top, blank_frame);
    process.state = ProcessState::Running;
    process::PROCESS_TABLE.lock().insert(process);
    *process::CURRENT_PID.lock() = pid;
    gdt::set_kernel_stack(kernel_stack_top);

    process::execve(INIT_PATH, &[INIT_PATH], &[])
        .unwrap_or_else(|e| panic!("failed to load {INIT_PATH}: {e}"));

    let frame = process::PROCESS_TABLE
        .lock()
        .get(pid)
        .expect("just-inserted process")
        .read()
        .trapframe;

    simpleos_kernel::arch::restore_interrupts(true);
    unsafe { simpleos_kernel::arch::enter_user_mode(&frame) }
}

static PANICKING: AtomicBool = AtomicBool::new(false);

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    // A panic while already panicking (e.g. the logger itself faulting)
    // must not recurse into `log::error!` again.
    if !PANICKING.swap(true, Ordering::SeqCst) {
        log::error!("kernel panic: {info}");
    }
    loop {
        simpleos_kernel::arch::halt();
    }
}
