//! The trap frame: the sole contract between the assembly entry stubs and
//! kernel-level handlers (spec §4.E, `Trap frame` in the glossary).

use core::fmt;

/// Saved processor state at kernel entry from an interrupt, exception or
/// syscall. Field order matches what the common stub pushes, so this struct
/// can be read straight off the kernel stack by the dispatcher.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp0: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

impl TrapFrame {
    /// Reads syscall argument `i`, stored on the user stack below a pushed
    /// sentinel zero word: `*(user_esp + 4 + 4*i)` (spec §4.F / §9d).
    ///
    /// # Safety
    /// The caller must have already validated that the word at this offset
    /// lies within the calling process's user address range; this function
    /// performs a raw dereference of user memory.
    pub unsafe fn syscall_arg(&self, i: usize) -> u32 {
        let addr = self.user_esp.wrapping_add(4 + 4 * i as u32) as *const u32;
        unsafe { addr.read_volatile() }
    }

    /// Sets the return value that will be visible in `eax` after `iret`.
    pub fn set_return(&mut self, value: isize) {
        self.eax = value as u32;
    }
}

impl fmt::Display for TrapFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "int={} err={:#x} eip={:#010x} cs={:#x} eflags={:#x} user_esp={:#010x}",
            self.int_no, self.err_code, self.eip, self.cs, self.eflags, self.user_esp
        )
    }
}

bitflags::bitflags! {
    /// Page-fault error code bits (spec §4.C: "classify via the error code
    /// (P/W/U)").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultError: u32 {
        const PRESENT   = 1 << 0;
        const WRITE     = 1 << 1;
        const USER      = 1 << 2;
        const RESERVED  = 1 << 3;
        const INSTR_FETCH = 1 << 4;
    }
}
