//! i386 platform primitives. Every use of inline assembly in the kernel is
//! encapsulated behind a well-typed function in this module; no other
//! module embeds `asm!`.

pub mod gdt;
pub mod idt;
pub mod isr_stubs;
pub mod pic;
pub mod port;
pub mod trap;

use core::arch::asm;

/// Loads `cr3` with the physical address of a page directory, flushing the
/// entire TLB. Used on process context switch.
///
/// # Safety
/// `phys_dir` must be the physical address of a valid, page-aligned page
/// directory with the kernel half mapped identically to every other
/// directory's kernel half.
#[inline]
pub unsafe fn load_cr3(phys_dir: u32) {
    unsafe {
        asm!("mov cr3, {0}", in(reg) phys_dir, options(nostack, preserves_flags));
    }
}

/// Reads the current `cr3` value (physical address of the active directory).
#[inline]
pub fn read_cr3() -> u32 {
    let value: u32;
    unsafe {
        asm!("mov {0}, cr3", out(reg) value, options(nostack, preserves_flags));
    }
    value
}

/// Reads `cr2`, the faulting address left by the CPU on a page fault.
#[inline]
pub fn read_cr2() -> u32 {
    let value: u32;
    unsafe {
        asm!("mov {0}, cr2", out(reg) value, options(nostack, preserves_flags));
    }
    value
}

/// Invalidates the single TLB entry covering `vaddr`.
///
/// # Safety
/// `vaddr` must be page-aligned; invalidating a stale TLB entry for a page
/// that a caller still expects to read through the old mapping is a caller
/// bug, not a memory-safety hazard in this function itself.
#[inline]
pub unsafe fn invlpg(vaddr: u32) {
    unsafe {
        asm!("invlpg [{0}]", in(reg) vaddr, options(nostack, preserves_flags));
    }
}

/// Disables maskable interrupts, returning whether they were enabled before.
#[cfg(target_arch = "x86")]
#[inline]
pub fn cli() -> bool {
    let flags: u32;
    unsafe {
        asm!("pushfd; pop {0}; cli", out(reg) flags, options(nostack));
    }
    flags & (1 << 9) != 0
}

/// Disables maskable interrupts, returning whether they were enabled before.
#[cfg(not(target_arch = "x86"))]
#[inline]
pub fn cli() -> bool {
    false
}

/// Restores interrupts to the state `cli` reported as "before".
#[inline]
pub fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        unsafe {
            asm!("sti", options(nostack, preserves_flags));
        }
    }
}

/// Transitions into user mode for the very first time, using a trap frame
/// built by hand rather than one captured from a real trap (spec §4.I step
/// 3: "overwrite the trap frame ... jump to it"). This plays the same role
/// the common stub epilogue plays when `iret`-ing out of [`idt::trap_dispatch`],
/// just invoked directly instead of falling out of an interrupt.
///
/// # Safety
/// `frame`'s `cs`/`user_ss` must be the user segment selectors, `eflags`
/// must have IF set, and `eip`/`user_esp` must point into mapped user memory
/// under the page directory already loaded into `cr3`.
#[cfg(target_arch = "x86")]
pub unsafe fn enter_user_mode(frame: &trap::TrapFrame) -> ! {
    unsafe {
        asm!(
            "mov edi, [{f}]",
            "mov esi, [{f} + 4]",
            "mov ebp, [{f} + 8]",
            "mov ebx, [{f} + 16]",
            "mov edx, [{f} + 20]",
            "mov ecx, [{f} + 24]",
            "mov eax, [{f} + 28]",
            "push dword ptr [{f} + 56]", // user_ss
            "push dword ptr [{f} + 52]", // user_esp
            "push dword ptr [{f} + 48]", // eflags
            "push dword ptr [{f} + 44]", // cs
            "push dword ptr [{f} + 40]", // eip
            "iretd",
            f = in(reg) frame,
            options(noreturn),
        );
    }
}

/// Halts the CPU until the next interrupt. The scheduler's idle loop calls
/// this when the ready queue is empty instead of busy-spinning.
#[inline]
pub fn halt() {
    unsafe { x86::halt() };
}

/// Runs `f` with interrupts disabled, restoring the prior state afterward.
/// This is how the global singletons named in spec §9 (frame bitmap, mount
/// table, process table) serialize access.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let was_enabled = cli();
    let result = f();
    restore_interrupts(was_enabled);
    result
}
