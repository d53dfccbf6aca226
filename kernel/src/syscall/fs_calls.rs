//! Filesystem syscall handlers (spec §4.F / §4.G).

extern crate alloc;

use crate::arch::trap::TrapFrame;
use crate::error::Errno;
use crate::fs::file::{FileDescriptor, OpenFlags, SeekFrom};
use crate::fs::{self, Dirent};
use crate::process::{current_pid, PROCESS_TABLE};

/// Runs `f` with mutable access to the calling process's fd table.
fn with_current_fdt<R>(f: impl FnOnce(&mut crate::fs::file::FdTable) -> Result<R, Errno>) -> Result<R, Errno> {
    let table = PROCESS_TABLE.lock();
    let lock = table.get(current_pid()).ok_or(Errno::Inval)?;
    let mut process = lock.write();
    f(&mut process.fd_table)
}

fn current_cwd() -> alloc::string::String {
    let table = PROCESS_TABLE.lock();
    table
        .get(current_pid())
        .map(|lock| lock.read().cwd.clone())
        .unwrap_or_else(|| alloc::string::String::from("/"))
}

/// Resolves `path` against the caller's cwd if it is not already
/// absolute.
fn resolve_relative(path: alloc::string::String) -> alloc::string::String {
    if path.starts_with('/') {
        path
    } else {
        let mut full = current_cwd();
        if !full.ends_with('/') {
            full.push('/');
        }
        full.push_str(&path);
        full
    }
}

pub(super) fn sys_open(frame: &TrapFrame) -> Result<isize, Errno> {
    let path_ptr = unsafe { frame.syscall_arg(0) };
    let flags = OpenFlags::from_bits_truncate(unsafe { frame.syscall_arg(1) });
    let path = resolve_relative(super::read_user_cstr(path_ptr, crate::fs::MAX_NAME)?);
    let fd = with_current_fdt(|fdt| fs::open(fdt, &path, flags))?;
    Ok(fd as isize)
}

pub(super) fn sys_read(frame: &TrapFrame) -> Result<isize, Errno> {
    let fd = unsafe { frame.syscall_arg(0) } as FileDescriptor;
    let buf_ptr = unsafe { frame.syscall_arg(1) };
    let len = unsafe { frame.syscall_arg(2) } as usize;
    super::validate_user_range(buf_ptr, len)?;
    // SAFETY: `validate_user_range` confirmed this slice lies in the
    // caller's user address range.
    let buf = unsafe { core::slice::from_raw_parts_mut(buf_ptr as *mut u8, len) };
    let table = PROCESS_TABLE.lock();
    let lock = table.get(current_pid()).ok_or(Errno::Inval)?;
    let process = lock.read();
    let n = fs::read(&process.fd_table, fd, buf)?;
    Ok(n as isize)
}

pub(super) fn sys_write(frame: &TrapFrame) -> Result<isize, Errno> {
    let fd = unsafe { frame.syscall_arg(0) } as FileDescriptor;
    let buf_ptr = unsafe { frame.syscall_arg(1) };
    let len = unsafe { frame.syscall_arg(2) } as usize;
    super::validate_user_range(buf_ptr, len)?;
    // SAFETY: validated above.
    let buf = unsafe { core::slice::from_raw_parts(buf_ptr as *const u8, len) };
    let table = PROCESS_TABLE.lock();
    let lock = table.get(current_pid()).ok_or(Errno::Inval)?;
    let process = lock.read();
    let n = fs::write(&process.fd_table, fd, buf)?;
    Ok(n as isize)
}

pub(super) fn sys_close(frame: &TrapFrame) -> Result<isize, Errno> {
    let fd = unsafe { frame.syscall_arg(0) } as FileDescriptor;
    with_current_fdt(|fdt| fs::close(fdt, fd))?;
    Ok(0)
}

pub(super) fn sys_dup(frame: &TrapFrame) -> Result<isize, Errno> {
    let fd = unsafe { frame.syscall_arg(0) } as FileDescriptor;
    let new_fd = with_current_fdt(|fdt| fs::dup(fdt, fd))?;
    Ok(new_fd as isize)
}

pub(super) fn sys_seek(frame: &TrapFrame) -> Result<isize, Errno> {
    let fd = unsafe { frame.syscall_arg(0) } as FileDescriptor;
    let offset = unsafe { frame.syscall_arg(1) } as i32 as i64;
    let whence = unsafe { frame.syscall_arg(2) };
    let pos = match whence {
        0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return Err(Errno::Inval),
    };
    let table = PROCESS_TABLE.lock();
    let lock = table.get(current_pid()).ok_or(Errno::Inval)?;
    let process = lock.read();
    let new_offset = fs::lseek(&process.fd_table, fd, pos)?;
    Ok(new_offset as isize)
}

pub(super) fn sys_readdir(frame: &TrapFrame) -> Result<isize, Errno> {
    let path_ptr = unsafe { frame.syscall_arg(0) };
    let index = unsafe { frame.syscall_arg(1) } as usize;
    let buf_ptr = unsafe { frame.syscall_arg(2) };
    let buf_size = unsafe { frame.syscall_arg(3) } as usize;

    let path = resolve_relative(super::read_user_cstr(path_ptr, crate::fs::MAX_NAME)?);
    match fs::readdir_path(&path, index)? {
        None => Ok(0),
        Some(entry) => {
            write_dirent(buf_ptr, buf_size, &entry)?;
            Ok(1)
        }
    }
}

/// Packs a [`Dirent`] into the caller's buffer as `{name[MAX_NAME] u8;
/// mode u32; size u64}`, truncated to whatever `buf_size` allows.
fn write_dirent(buf_ptr: u32, buf_size: usize, entry: &Dirent) -> Result<(), Errno> {
    super::validate_user_range(buf_ptr, buf_size)?;
    let name_len = entry.name.len().min(fs::MAX_NAME).min(buf_size);
    // SAFETY: range validated above.
    unsafe {
        core::ptr::copy_nonoverlapping(entry.name.as_ptr(), buf_ptr as *mut u8, name_len);
        if name_len < buf_size.min(fs::MAX_NAME) {
            ((buf_ptr + name_len as u32) as *mut u8).write_volatile(0);
        }
        if buf_size >= fs::MAX_NAME + 12 {
            ((buf_ptr + fs::MAX_NAME as u32) as *mut u32).write_volatile(entry.mode);
            ((buf_ptr + fs::MAX_NAME as u32 + 4) as *mut u64).write_volatile(entry.size);
        }
    }
    Ok(())
}

pub(super) fn sys_truncate_fd(frame: &TrapFrame) -> Result<isize, Errno> {
    let fd = unsafe { frame.syscall_arg(0) } as FileDescriptor;
    let size = unsafe { frame.syscall_arg(1) } as u64;
    let table = PROCESS_TABLE.lock();
    let lock = table.get(current_pid()).ok_or(Errno::Inval)?;
    let process = lock.read();
    fs::truncate_fd(&process.fd_table, fd, size)?;
    Ok(0)
}

pub(super) fn sys_truncate_path(frame: &TrapFrame) -> Result<isize, Errno> {
    let path_ptr = unsafe { frame.syscall_arg(0) };
    let size = unsafe { frame.syscall_arg(1) } as u64;
    let path = resolve_relative(super::read_user_cstr(path_ptr, crate::fs::MAX_NAME)?);
    fs::truncate_path(&path, size)?;
    Ok(0)
}

pub(super) fn sys_stat(frame: &TrapFrame) -> Result<isize, Errno> {
    let path_ptr = unsafe { frame.syscall_arg(0) };
    let out_ptr = unsafe { frame.syscall_arg(1) };
    let path = resolve_relative(super::read_user_cstr(path_ptr, crate::fs::MAX_NAME)?);
    let stat = fs::getattr_path(&path)?;
    write_stat(out_ptr, &stat)?;
    Ok(0)
}

pub(super) fn sys_fstat(frame: &TrapFrame) -> Result<isize, Errno> {
    let fd = unsafe { frame.syscall_arg(0) } as FileDescriptor;
    let out_ptr = unsafe { frame.syscall_arg(1) };
    let table = PROCESS_TABLE.lock();
    let lock = table.get(current_pid()).ok_or(Errno::Inval)?;
    let process = lock.read();
    let stat = fs::fstat(&process.fd_table, fd)?;
    drop(process);
    drop(table);
    write_stat(out_ptr, &stat)?;
    Ok(0)
}

/// Packs `{mode u32; size u64; mtim.tv_sec i64}` into the caller's
/// buffer (spec §6: "`stat` returns `{mode, size, mtim.tv_sec}`").
fn write_stat(ptr: u32, stat: &fs::Stat) -> Result<(), Errno> {
    super::validate_user_range(ptr, 20)?;
    // SAFETY: validated above.
    unsafe {
        (ptr as *mut u32).write_volatile(stat.mode);
        ((ptr + 4) as *mut u64).write_volatile(stat.size);
        ((ptr + 12) as *mut i64).write_volatile(stat.mtime);
    }
    Ok(())
}

pub(super) fn sys_link(frame: &TrapFrame) -> Result<isize, Errno> {
    let old_ptr = unsafe { frame.syscall_arg(0) };
    let new_ptr = unsafe { frame.syscall_arg(1) };
    let old = resolve_relative(super::read_user_cstr(old_ptr, crate::fs::MAX_NAME)?);
    let new = resolve_relative(super::read_user_cstr(new_ptr, crate::fs::MAX_NAME)?);
    fs::link(&old, &new)?;
    Ok(0)
}

pub(super) fn sys_unlink(frame: &TrapFrame) -> Result<isize, Errno> {
    let path_ptr = unsafe { frame.syscall_arg(0) };
    let path = resolve_relative(super::read_user_cstr(path_ptr, crate::fs::MAX_NAME)?);
    fs::unlink(&path)?;
    Ok(0)
}

pub(super) fn sys_rename(frame: &TrapFrame) -> Result<isize, Errno> {
    let old_ptr = unsafe { frame.syscall_arg(0) };
    let new_ptr = unsafe { frame.syscall_arg(1) };
    let old = resolve_relative(super::read_user_cstr(old_ptr, crate::fs::MAX_NAME)?);
    let new = resolve_relative(super::read_user_cstr(new_ptr, crate::fs::MAX_NAME)?);
    fs::rename(&old, &new)?;
    Ok(0)
}

pub(super) fn sys_chdir(frame: &TrapFrame) -> Result<isize, Errno> {
    let path_ptr = unsafe { frame.syscall_arg(0) };
    let path = resolve_relative(super::read_user_cstr(path_ptr, crate::fs::MAX_NAME)?);
    let _ = fs::getattr_path(&path)?;
    let table = PROCESS_TABLE.lock();
    let lock = table.get(current_pid()).ok_or(Errno::Inval)?;
    lock.write().cwd = path;
    Ok(0)
}

pub(super) fn sys_getcwd(frame: &TrapFrame) -> Result<isize, Errno> {
    let buf_ptr = unsafe { frame.syscall_arg(0) };
    let buf_size = unsafe { frame.syscall_arg(1) } as usize;
    let cwd = current_cwd();
    let len = cwd.len().min(buf_size.saturating_sub(1));
    super::validate_user_range(buf_ptr, len + 1)?;
    // SAFETY: validated above.
    unsafe {
        core::ptr::copy_nonoverlapping(cwd.as_ptr(), buf_ptr as *mut u8, len);
        ((buf_ptr + len as u32) as *mut u8).write_volatile(0);
    }
    Ok(len as isize)
}
