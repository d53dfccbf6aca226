//! Virtual file system core: mount table, per-mount operations vtable, and
//! the open/read/write/lseek/close/dup/readdir entry points used by the
//! syscall layer (spec §4.G).

extern crate alloc;

pub mod console;
pub mod file;
pub mod tar;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::RwLock;

use crate::error::Errno;
use file::{FdEntry, FdTable, FileDescriptor, OpenFile, OpenFlags, SeekFrom};

bitflags::bitflags! {
    /// File mode bits (spec §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u32 {
        const S_IFREG = 0o100000;
        const S_IFDIR = 0o040000;
        const S_IFCHR = 0o020000;
        const S_IRWXU = 0o700;
        const S_IRWXG = 0o070;
        const S_IRWXO = 0o007;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub mode: u32,
    pub size: u64,
    pub mtime: i64,
}

pub const MAX_NAME: usize = 100;

#[derive(Debug, Clone)]
pub struct Dirent {
    pub name: String,
    pub mode: u32,
    pub size: u64,
}

/// Per-mount operations vtable. Every method defaults to `-ENOSYS`;
/// backends override only what they support (spec §4.G: "any of which may
/// be absent").
pub trait MountOps: Send + Sync {
    fn read(&self, _path: &str, _offset: u64, _buf: &mut [u8]) -> Result<usize, Errno> {
        Err(Errno::NoSys)
    }
    fn write(&self, _path: &str, _offset: u64, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::NoSys)
    }
    fn getattr(&self, _path: &str) -> Result<Stat, Errno> {
        Err(Errno::NoSys)
    }
    fn readdir(&self, _path: &str, _index: usize) -> Result<Option<Dirent>, Errno> {
        Err(Errno::NoSys)
    }
    fn create(&self, _path: &str) -> Result<(), Errno> {
        Err(Errno::NoSys)
    }
    fn link(&self, _old: &str, _new: &str) -> Result<(), Errno> {
        Err(Errno::NoSys)
    }
    fn unlink(&self, _path: &str) -> Result<(), Errno> {
        Err(Errno::NoSys)
    }
    fn truncate(&self, _path: &str, _size: u64) -> Result<(), Errno> {
        Err(Errno::NoSys)
    }
    fn rename(&self, _old: &str, _new: &str) -> Result<(), Errno> {
        Err(Errno::NoSys)
    }
}

pub type MountPointId = usize;
pub type MountHandle = Arc<dyn MountOps>;

struct Mount {
    prefix: String,
    ops: MountHandle,
}

/// Ordered mount list resolved by longest-prefix match, ties broken by
/// insertion order — a later mount with the same prefix shadows an earlier
/// one (spec §4.G).
pub struct MountTable {
    mounts: Vec<Option<Mount>>,
}

impl MountTable {
    const fn new() -> Self {
        MountTable { mounts: Vec::new() }
    }

    pub fn mount(&mut self, prefix: &str, ops: MountHandle) -> MountPointId {
        self.mounts.push(Some(Mount {
            prefix: prefix.to_string(),
            ops,
        }));
        self.mounts.len() - 1
    }

    pub fn unmount(&mut self, id: MountPointId) {
        if let Some(slot) = self.mounts.get_mut(id) {
            *slot = None;
        }
    }

    /// Longest-prefix match; among equal-length matches the highest index
    /// (most recently mounted) wins.
    fn resolve<'a>(&self, path: &'a str) -> Option<(MountPointId, &'a str)> {
        let mut best: Option<(MountPointId, usize)> = None;
        for (id, mount) in self.mounts.iter().enumerate() {
            let Some(mount) = mount else { continue };
            if path.starts_with(mount.prefix.as_str()) {
                let len = mount.prefix.len();
                let better = match best {
                    None => true,
                    Some((_, best_len)) => len >= best_len,
                };
                if better {
                    best = Some((id, len));
                }
            }
        }
        let (id, len) = best?;
        Some((id, &path[len..]))
    }

    fn ops(&self, id: MountPointId) -> Option<&MountHandle> {
        self.mounts.get(id).and_then(|m| m.as_ref()).map(|m| &m.ops)
    }
}

pub static MOUNTS: RwLock<MountTable> = RwLock::new(MountTable::new());

/// Resolves `.`/`..` textually, before any mount lookup, per spec §9
/// ("otherwise `..` at a mount boundary misbehaves"). Input and output are
/// both absolute, `/`-separated paths.
pub fn normalize_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    let mut out = String::from("/");
    out.push_str(&stack.join("/"));
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn with_mount<R>(path: &str, f: impl FnOnce(&MountHandle, &str) -> Result<R, Errno>) -> Result<R, Errno> {
    let table = MOUNTS.read();
    let (id, suffix) = table.resolve(path).ok_or(Errno::NoEnt)?;
    let ops = table.ops(id).ok_or(Errno::NoEnt)?;
    f(ops, suffix)
}

/// Opens `path`, optionally creating it, and installs a fresh fd with
/// offset 0 in `fdt`.
pub fn open(fdt: &mut FdTable, path: &str, flags: OpenFlags) -> Result<FileDescriptor, Errno> {
    let path = normalize_path(path);
    let (mount_id, suffix) = {
        let table = MOUNTS.read();
        let (id, suffix) = table.resolve(&path).ok_or(Errno::NoEnt)?;
        (id, suffix.to_string())
    };

    let exists = with_mount(&path, |ops, suffix| ops.getattr(suffix)).is_ok();
    if !exists {
        if flags.contains(OpenFlags::O_CREAT) {
            with_mount(&path, |ops, suffix| ops.create(suffix))?;
        } else {
            return Err(Errno::NoEnt);
        }
    }

    if flags.contains(OpenFlags::O_TRUNC) {
        let _ = with_mount(&path, |ops, suffix| ops.truncate(suffix, 0));
    }

    let file = Arc::new(OpenFile {
        mount: mount_id,
        path: suffix,
        flags,
    });
    Ok(fdt.insert(FdEntry { file, offset: Arc::new(RwLock::new(0)) }))
}

pub fn read(fdt: &FdTable, fd: FileDescriptor, buf: &mut [u8]) -> Result<usize, Errno> {
    let entry = fdt.get(fd).ok_or(Errno::BadF)?;
    if !entry.file.flags.readable() {
        return Err(Errno::BadF);
    }
    let offset = *entry.offset.read();
    let table = MOUNTS.read();
    let ops = table.ops(entry.file.mount).ok_or(Errno::BadF)?;
    let n = ops.read(&entry.file.path, offset, buf)?;
    *entry.offset.write() = offset + n as u64;
    Ok(n)
}

pub fn write(fdt: &FdTable, fd: FileDescriptor, buf: &[u8]) -> Result<usize, Errno> {
    let entry = fdt.get(fd).ok_or(Errno::BadF)?;
    if !entry.file.flags.writable() {
        return Err(Errno::BadF);
    }
    let mut offset_guard = entry.offset.write();
    let offset = if entry.file.flags.contains(OpenFlags::O_APPEND) {
        let table = MOUNTS.read();
        let ops = table.ops(entry.file.mount).ok_or(Errno::BadF)?;
        ops.getattr(&entry.file.path)?.size
    } else {
        *offset_guard
    };
    let table = MOUNTS.read();
    let ops = table.ops(entry.file.mount).ok_or(Errno::BadF)?;
    let n = ops.write(&entry.file.path, offset, buf)?;
    *offset_guard = offset + n as u64;
    Ok(n)
}

pub fn lseek(fdt: &FdTable, fd: FileDescriptor, pos: SeekFrom) -> Result<u64, Errno> {
    let entry = fdt.get(fd).ok_or(Errno::BadF)?;
    let mut offset_guard = entry.offset.write();
    let new_offset = match pos {
        SeekFrom::Start(n) => n,
        SeekFrom::Current(delta) => apply_delta(*offset_guard, delta)?,
        SeekFrom::End(delta) => {
            let table = MOUNTS.read();
            let ops = table.ops(entry.file.mount).ok_or(Errno::BadF)?;
            let size = ops.getattr(&entry.file.path)?.size;
            apply_delta(size, delta)?
        }
    };
    *offset_guard = new_offset;
    Ok(new_offset)
}

fn apply_delta(base: u64, delta: i64) -> Result<u64, Errno> {
    if delta >= 0 {
        Ok(base + delta as u64)
    } else {
        base.checked_sub((-delta) as u64).ok_or(Errno::Inval)
    }
}

pub fn close(fdt: &mut FdTable, fd: FileDescriptor) -> Result<(), Errno> {
    fdt.close(fd)
}

pub fn dup(fdt: &mut FdTable, fd: FileDescriptor) -> Result<FileDescriptor, Errno> {
    fdt.dup(fd)
}

pub fn getattr_path(path: &str) -> Result<Stat, Errno> {
    let path = normalize_path(path);
    with_mount(&path, |ops, suffix| ops.getattr(suffix))
}

pub fn fstat(fdt: &FdTable, fd: FileDescriptor) -> Result<Stat, Errno> {
    let entry = fdt.get(fd).ok_or(Errno::BadF)?;
    let table = MOUNTS.read();
    let ops = table.ops(entry.file.mount).ok_or(Errno::BadF)?;
    ops.getattr(&entry.file.path)
}

pub fn readdir_path(path: &str, index: usize) -> Result<Option<Dirent>, Errno> {
    let path = normalize_path(path);
    with_mount(&path, |ops, suffix| ops.readdir(suffix, index))
}

pub fn truncate_path(path: &str, size: u64) -> Result<(), Errno> {
    let path = normalize_path(path);
    with_mount(&path, |ops, suffix| ops.truncate(suffix, size))
}

pub fn truncate_fd(fdt: &FdTable, fd: FileDescriptor, size: u64) -> Result<(), Errno> {
    let entry = fdt.get(fd).ok_or(Errno::BadF)?;
    let table = MOUNTS.read();
    let ops = table.ops(entry.file.mount).ok_or(Errno::BadF)?;
    ops.truncate(&entry.file.path, size)
}

pub fn link(old: &str, new: &str) -> Result<(), Errno> {
    let old = normalize_path(old);
    let new = normalize_path(new);
    with_mount(&old, |ops, suffix| ops.link(suffix, &new))
}

pub fn unlink(path: &str) -> Result<(), Errno> {
    let path = normalize_path(path);
    with_mount(&path, |ops, suffix| ops.unlink(suffix))
}

pub fn rename(old: &str, new: &str) -> Result<(), Errno> {
    let old = normalize_path(old);
    let new = normalize_path(new);
    with_mount(&old, |ops, suffix| ops.rename(suffix, &new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dotdot_before_mount_lookup() {
        assert_eq!(normalize_path("/home/foo/../bar"), "/home/bar");
        assert_eq!(normalize_path("/a/./b"), "/a/b");
        assert_eq!(normalize_path("/../etc"), "/etc");
    }

    #[test]
    fn longest_prefix_with_later_shadowing_tie() {
        let mut table = MountTable::new();
        struct Noop;
        impl MountOps for Noop {}
        let first = table.mount("/home", Arc::new(Noop));
        let _second_home = table.mount("/home", Arc::new(Noop));
        let (id, suffix) = table.resolve("/home/file.txt").unwrap();
        assert_ne!(id, first);
        assert_eq!(suffix, "/file.txt");

        table.mount("/home/sub", Arc::new(Noop));
        let (id2, suffix2) = table.resolve("/home/sub/file.txt").unwrap();
        assert_eq!(suffix2, "/file.txt");
        assert!(id2 > id);
    }
}
