//! Syscall dispatch (spec §4.F): `int 0x58` lands in [`dispatch`], which
//! reads the syscall number out of the trap frame's `eax` and its
//! arguments off the user stack, then writes the result back into
//! `trapframe.eax`.

extern crate alloc;

mod fs_calls;
mod process_calls;

use crate::arch::trap::TrapFrame;
use crate::config::KERNEL_BASE;
use crate::error::Errno;

/// Syscall numbers recognized by this core (spec §4.F table). Values are
/// this crate's own ABI — nothing in the spec mandates a specific
/// numbering, only that both sides of `int 0x58` agree on one.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Yield = 0,
    Exit = 1,
    Fork = 2,
    Execve = 3,
    Wait = 4,
    Dup = 5,
    Seek = 6,
    Readdir = 7,
    TruncateFd = 8,
    TruncatePath = 9,
    Open = 10,
    Read = 11,
    Write = 12,
    Close = 13,
    Stat = 14,
    Fstat = 15,
    Link = 16,
    Unlink = 17,
    Rename = 18,
    Chdir = 19,
    Getcwd = 20,
}

impl Syscall {
    /// How many argument slots this call reads off the user stack via
    /// `syscall_arg`, i.e. how far `[user_esp+4, ..)` must be validated
    /// before any handler touches it. Counts the slot itself, not whatever
    /// a pointer-valued slot points to — handlers validate those
    /// separately via `validate_user_range`/`read_user_cstr`.
    fn argc(self) -> usize {
        use Syscall::*;
        match self {
            Yield | Fork => 0,
            Exit | Wait | Dup | Close | Unlink | Chdir => 1,
            TruncateFd | TruncatePath | Open | Stat | Fstat | Link | Rename | Getcwd => 2,
            Execve | Seek | Read | Write => 3,
            Readdir => 4,
        }
    }
}

impl TryFrom<u32> for Syscall {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use Syscall::*;
        Ok(match value {
            0 => Yield,
            1 => Exit,
            2 => Fork,
            3 => Execve,
            4 => Wait,
            5 => Dup,
            6 => Seek,
            7 => Readdir,
            8 => TruncateFd,
            9 => TruncatePath,
            10 => Open,
            11 => Read,
            12 => Write,
            13 => Close,
            14 => Stat,
            15 => Fstat,
            16 => Link,
            17 => Unlink,
            18 => Rename,
            19 => Chdir,
            20 => Getcwd,
            _ => return Err(()),
        })
    }
}

/// Entry point called from the common trap stub for vector `0x58` (spec
/// §4.F / §4.E: "return value is written into the preserved trap frame").
///
/// `Yield`, `Wait`, and `Fork`'s child-side resumption all have the effect
/// of making a *different* process current partway through this call; the
/// caller's own trap frame is kept current in its PCB so it can be
/// restored verbatim the next time it is scheduled, and whichever process
/// ends up current when this function returns is the one `*frame` is
/// loaded with for `iret`.
pub fn dispatch(frame: &mut TrapFrame) {
    let caller_pid = crate::process::current_pid();
    if let Some(lock) = crate::process::PROCESS_TABLE.lock().get(caller_pid) {
        lock.write().trapframe = *frame;
    }

    let result = match Syscall::try_from(frame.eax) {
        Ok(call) => match validate_argument_slots(frame, call.argc()) {
            Ok(()) => handle(call, frame),
            Err(errno) => Err(errno),
        },
        Err(()) => Err(Errno::NoSys),
    };
    let raw = match result {
        Ok(value) => value,
        Err(errno) => errno.as_negative(),
    };
    if let Some(lock) = crate::process::PROCESS_TABLE.lock().get(caller_pid) {
        lock.write().trapframe.set_return(raw);
    }

    let current_pid = crate::process::current_pid();
    if let Some(lock) = crate::process::PROCESS_TABLE.lock().get(current_pid) {
        *frame = lock.read().trapframe;
    }
}

fn handle(call: Syscall, frame: &TrapFrame) -> Result<isize, Errno> {
    use Syscall::*;
    match call {
        Yield => process_calls::sys_yield(),
        Exit => process_calls::sys_exit(frame),
        Fork => process_calls::sys_fork(),
        Execve => process_calls::sys_execve(frame),
        Wait => process_calls::sys_wait(frame),
        Dup => fs_calls::sys_dup(frame),
        Seek => fs_calls::sys_seek(frame),
        Readdir => fs_calls::sys_readdir(frame),
        TruncateFd => fs_calls::sys_truncate_fd(frame),
        TruncatePath => fs_calls::sys_truncate_path(frame),
        Open => fs_calls::sys_open(frame),
        Read => fs_calls::sys_read(frame),
        Write => fs_calls::sys_write(frame),
        Close => fs_calls::sys_close(frame),
        Stat => fs_calls::sys_stat(frame),
        Fstat => fs_calls::sys_fstat(frame),
        Link => fs_calls::sys_link(frame),
        Unlink => fs_calls::sys_unlink(frame),
        Rename => fs_calls::sys_rename(frame),
        Chdir => fs_calls::sys_chdir(frame),
        Getcwd => fs_calls::sys_getcwd(frame),
    }
}

/// Validates the syscall's own argument slots — `[user_esp+4, user_esp+4+
/// 4*argc)` — before any handler calls `syscall_arg` on them. `user_esp` is
/// attacker-controlled at the moment of `int 0x58`; without this check a
/// process could point it near the top of the address space and trigger an
/// in-kernel page fault instead of the `-EFAULT` spec §4.F requires. This is
/// separate from the pointer-valued *arguments themselves* (buffers, path
/// strings), which each handler validates on its own via
/// `validate_user_range`/`read_user_cstr`.
fn validate_argument_slots(frame: &TrapFrame, argc: usize) -> Result<(), Errno> {
    let start = frame.user_esp.checked_add(4).ok_or(Errno::Fault)?;
    validate_user_range(start, argc * 4)
}

/// Validates that `[ptr, ptr+len)` lies entirely below [`KERNEL_BASE`],
/// i.e. inside the calling process's user address range (spec §4.F:
/// "every pointer argument is checked ... before dereference"; faulting
/// in-kernel on a bad user pointer must return `-EFAULT`, not panic").
pub(crate) fn validate_user_range(ptr: u32, len: usize) -> Result<(), Errno> {
    let end = ptr.checked_add(len as u32).ok_or(Errno::Fault)?;
    if end > KERNEL_BASE {
        return Err(Errno::Fault);
    }
    Ok(())
}

/// Reads a NUL-terminated path string out of user memory, capped at
/// `max_len` bytes to bound the scan.
pub(crate) fn read_user_cstr(ptr: u32, max_len: usize) -> Result<alloc::string::String, Errno> {
    validate_user_range(ptr, max_len)?;
    let mut bytes = alloc::vec::Vec::new();
    for i in 0..max_len {
        // SAFETY: `validate_user_range` confirmed `ptr..ptr+max_len` lies
        // in user space; this core runs with the caller's page directory
        // active, so these bytes are mapped and readable exactly when the
        // caller could read them itself.
        let byte = unsafe { ((ptr + i as u32) as *const u8).read_volatile() };
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    alloc::string::String::from_utf8(bytes).map_err(|_| Errno::Inval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_numbers_round_trip() {
        for n in 0..=20u32 {
            assert_eq!(Syscall::try_from(n).unwrap() as u32, n);
        }
        assert!(Syscall::try_from(21).is_err());
    }

    #[test]
    fn validate_user_range_rejects_kernel_addresses() {
        assert!(validate_user_range(KERNEL_BASE - 4, 8).is_err());
        assert!(validate_user_range(0x1000, 8).is_ok());
    }

    #[test]
    fn validate_user_range_rejects_overflow() {
        assert!(validate_user_range(u32::MAX - 2, 8).is_err());
    }

    fn frame_with_user_esp(user_esp: u32) -> TrapFrame {
        TrapFrame {
            edi: 0,
            esi: 0,
            ebp: 0,
            esp0: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            int_no: 0,
            err_code: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
            user_esp,
            user_ss: 0,
        }
    }

    #[test]
    fn argument_slots_within_user_space_are_accepted() {
        let frame = frame_with_user_esp(0x1000);
        assert!(validate_argument_slots(&frame, 4).is_ok());
    }

    #[test]
    fn a_malicious_user_esp_near_kernel_base_is_rejected() {
        // A process that sets its own user_esp to just below KERNEL_BASE
        // before `int 0x58` must get `-EFAULT`, not an in-kernel page
        // fault from `syscall_arg` dereferencing kernel/unmapped memory.
        let frame = frame_with_user_esp(KERNEL_BASE - 4);
        assert!(validate_argument_slots(&frame, 3).is_err());
    }

    #[test]
    fn a_user_esp_near_the_address_space_top_is_rejected() {
        let frame = frame_with_user_esp(u32::MAX - 2);
        assert!(validate_argument_slots(&frame, 1).is_err());
    }

    #[test]
    fn zero_argument_syscalls_skip_the_slot_check() {
        let frame = frame_with_user_esp(KERNEL_BASE - 4);
        assert!(validate_argument_slots(&frame, 0).is_ok());
    }
}
