//! Process-management syscall handlers (spec §4.F / §4.I).

extern crate alloc;

use crate::arch::trap::TrapFrame;
use crate::error::Errno;
use crate::process;

pub(super) fn sys_yield() -> Result<isize, Errno> {
    process::sys_yield();
    Ok(0)
}

pub(super) fn sys_exit(frame: &TrapFrame) -> Result<isize, Errno> {
    // SAFETY: the exit code is a plain word, not a pointer; no user-memory
    // dereference happens here.
    let code = unsafe { frame.syscall_arg(0) } as i32;
    process::exit(code);
    Ok(0)
}

pub(super) fn sys_fork() -> Result<isize, Errno> {
    let child_pid = process::fork()?;
    Ok(child_pid as isize)
}

pub(super) fn sys_execve(frame: &TrapFrame) -> Result<isize, Errno> {
    let path_ptr = unsafe { frame.syscall_arg(0) };
    let argv_ptr = unsafe { frame.syscall_arg(1) };
    let argc = unsafe { frame.syscall_arg(2) } as usize;

    let path = super::read_user_cstr(path_ptr, crate::fs::MAX_NAME)?;

    super::validate_user_range(argv_ptr, argc * 4)?;
    let mut argv_storage = alloc::vec::Vec::with_capacity(argc);
    for i in 0..argc {
        // SAFETY: `argv_ptr..argv_ptr+argc*4` was just validated above.
        let str_ptr = unsafe { ((argv_ptr + i as u32 * 4) as *const u32).read_volatile() };
        argv_storage.push(super::read_user_cstr(str_ptr, 256)?);
    }
    let argv_refs: alloc::vec::Vec<&str> = argv_storage.iter().map(|s| s.as_str()).collect();

    process::execve(&path, &argv_refs, &[])?;
    Ok(0)
}

pub(super) fn sys_wait(frame: &TrapFrame) -> Result<isize, Errno> {
    let status_ptr = unsafe { frame.syscall_arg(0) };
    let (pid, status) = process::wait()?;
    if status_ptr != 0 {
        super::validate_user_range(status_ptr, 4)?;
        // SAFETY: validated above; the pointer belongs to the caller's
        // user address range.
        unsafe { (status_ptr as *mut i32).write_volatile(status.to_raw()) };
    }
    Ok(pid as isize)
}
