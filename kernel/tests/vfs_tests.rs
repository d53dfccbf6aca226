//! Mount table, path resolution, and fd-table scenario tests (spec §4.G),
//! built against an in-memory fake backend rather than the real USTAR/ATA
//! stack, which needs actual port I/O hardware to exercise.

use std::collections::BTreeMap;
use std::sync::Arc;

use spin::RwLock;

use simpleos_kernel::error::Errno;
use simpleos_kernel::fs::file::{FdTable, OpenFlags, SeekFrom};
use simpleos_kernel::fs::{self, Dirent, FileMode, MountOps, Stat};

/// A tiny writable in-memory filesystem, standing in for both the USTAR and
/// console backends so path resolution and the fd table can be exercised
/// without real disk or terminal hardware.
struct MemFs {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemFs {
    fn new() -> Self {
        MemFs { files: RwLock::new(BTreeMap::new()) }
    }

    fn seed(&self, path: &str, data: &[u8]) {
        self.files.write().insert(path.trim_start_matches('/').to_string(), data.to_vec());
    }
}

impl MountOps for MemFs {
    fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, Errno> {
        let files = self.files.read();
        let data = files.get(path.trim_start_matches('/')).ok_or(Errno::NoEnt)?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, path: &str, offset: u64, buf: &[u8]) -> Result<usize, Errno> {
        let mut files = self.files.write();
        let data = files.entry(path.trim_start_matches('/').to_string()).or_default();
        let offset = offset as usize;
        if data.len() < offset + buf.len() {
            data.resize(offset + buf.len(), 0);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn getattr(&self, path: &str) -> Result<Stat, Errno> {
        let files = self.files.read();
        let data = files.get(path.trim_start_matches('/')).ok_or(Errno::NoEnt)?;
        Ok(Stat { mode: FileMode::S_IFREG.bits() | 0o644, size: data.len() as u64, mtime: 0 })
    }

    fn readdir(&self, path: &str, index: usize) -> Result<Option<Dirent>, Errno> {
        let prefix = path.trim_start_matches('/');
        let files = self.files.read();
        let entry = files
            .iter()
            .filter(|(name, _)| name.starts_with(prefix) && name.as_str() != prefix)
            .nth(index);
        Ok(entry.map(|(name, data)| Dirent {
            name: name.clone(),
            mode: FileMode::S_IFREG.bits(),
            size: data.len() as u64,
        }))
    }

    fn create(&self, path: &str) -> Result<(), Errno> {
        self.files.write().entry(path.trim_start_matches('/').to_string()).or_default();
        Ok(())
    }

    fn truncate(&self, path: &str, size: u64) -> Result<(), Errno> {
        let mut files = self.files.write();
        let data = files.get_mut(path.trim_start_matches('/')).ok_or(Errno::NoEnt)?;
        data.resize(size as usize, 0);
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<(), Errno> {
        self.files.write().remove(path.trim_start_matches('/')).map(|_| ()).ok_or(Errno::NoEnt)
    }
}

#[test]
fn read_after_write_round_trips_through_a_mount() {
    fs::MOUNTS.write().mount("/data", Arc::new(MemFs::new()));
    let mut fdt = FdTable::new();
    let fd = fs::open(&mut fdt, "/data/greeting.txt", OpenFlags::O_RDWR | OpenFlags::O_CREAT).unwrap();
    assert_eq!(fs::write(&fdt, fd, b"hello").unwrap(), 5);
    fs::lseek(&fdt, fd, SeekFrom::Start(0)).unwrap();
    let mut buf = [0u8; 5];
    assert_eq!(fs::read(&fdt, fd, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");
}

#[test]
fn getattr_reports_size_written_through_the_fd() {
    fs::MOUNTS.write().mount("/data2", Arc::new(MemFs::new()));
    let mut fdt = FdTable::new();
    let fd = fs::open(&mut fdt, "/data2/f", OpenFlags::O_RDWR | OpenFlags::O_CREAT).unwrap();
    fs::write(&fdt, fd, b"0123456789").unwrap();
    let stat = fs::getattr_path("/data2/f").unwrap();
    assert_eq!(stat.size, 10);
}

#[test]
fn append_ignores_the_fds_own_offset() {
    fs::MOUNTS.write().mount("/data3", Arc::new(MemFs::new()));
    let mut fdt = FdTable::new();
    let fd = fs::open(&mut fdt, "/data3/log", OpenFlags::O_WRONLY | OpenFlags::O_CREAT | OpenFlags::O_APPEND).unwrap();
    fs::write(&fdt, fd, b"aaa").unwrap();
    fs::lseek(&fdt, fd, SeekFrom::Start(0)).unwrap();
    fs::write(&fdt, fd, b"bbb").unwrap();
    let stat = fs::getattr_path("/data3/log").unwrap();
    assert_eq!(stat.size, 6);
}

#[test]
fn dup_shares_the_parent_offset() {
    fs::MOUNTS.write().mount("/data4", Arc::new(MemFs::new()));
    let mut fdt = FdTable::new();
    let fd = fs::open(&mut fdt, "/data4/f", OpenFlags::O_RDWR | OpenFlags::O_CREAT).unwrap();
    fs::write(&fdt, fd, b"0123456789").unwrap();
    fs::lseek(&fdt, fd, SeekFrom::Start(0)).unwrap();
    let dup_fd = fs::dup(&mut fdt, fd).unwrap();

    let mut buf = [0u8; 4];
    fs::read(&fdt, fd, &mut buf).unwrap();
    // The dup'd descriptor continues from where the original left off,
    // since both share one `OpenFile` offset.
    let mut buf2 = [0u8; 4];
    let n = fs::read(&fdt, dup_fd, &mut buf2).unwrap();
    assert_eq!(n, 4);
    assert_eq!(&buf2, b"4567");
}

#[test]
fn a_deeper_mount_shadows_a_shallower_one() {
    let outer = Arc::new(MemFs::new());
    outer.seed("shared/only_in_outer.txt", b"outer");
    fs::MOUNTS.write().mount("/shared", outer.clone());
    let inner = Arc::new(MemFs::new());
    inner.seed("special.txt", b"inner");
    fs::MOUNTS.write().mount("/shared/special", inner);

    let mut fdt = FdTable::new();
    let fd = fs::open(&mut fdt, "/shared/special/special.txt", OpenFlags::O_RDONLY).unwrap();
    let mut buf = [0u8; 5];
    fs::read(&fdt, fd, &mut buf).unwrap();
    assert_eq!(&buf, b"inner");

    let fd2 = fs::open(&mut fdt, "/shared/only_in_outer.txt", OpenFlags::O_RDONLY).unwrap();
    let mut buf2 = [0u8; 5];
    fs::read(&fdt, fd2, &mut buf2).unwrap();
    assert_eq!(&buf2, b"outer");
}

#[test]
fn forked_fd_table_gets_an_independent_offset() {
    fs::MOUNTS.write().mount("/data7", Arc::new(MemFs::new()));
    let mut fdt = FdTable::new();
    let fd = fs::open(&mut fdt, "/data7/f", OpenFlags::O_RDWR | OpenFlags::O_CREAT).unwrap();
    fs::write(&fdt, fd, b"0123456789").unwrap();
    fs::lseek(&fdt, fd, SeekFrom::Start(0)).unwrap();

    let child_fdt = fdt.clone_for_fork();

    // The child reads first; the parent's offset must not move.
    let mut child_buf = [0u8; 4];
    fs::read(&child_fdt, fd, &mut child_buf).unwrap();
    assert_eq!(&child_buf, b"0123");

    let mut parent_buf = [0u8; 4];
    let n = fs::read(&fdt, fd, &mut parent_buf).unwrap();
    assert_eq!(n, 4);
    assert_eq!(&parent_buf, b"0123", "fork must not share the offset cell with the parent");
}

#[test]
fn opening_a_missing_file_without_o_creat_fails() {
    fs::MOUNTS.write().mount("/data5", Arc::new(MemFs::new()));
    let mut fdt = FdTable::new();
    let err = fs::open(&mut fdt, "/data5/nope", OpenFlags::O_RDONLY).unwrap_err();
    assert_eq!(err, Errno::NoEnt);
}

#[test]
fn close_then_read_returns_ebadf() {
    fs::MOUNTS.write().mount("/data6", Arc::new(MemFs::new()));
    let mut fdt = FdTable::new();
    let fd = fs::open(&mut fdt, "/data6/f", OpenFlags::O_RDWR | OpenFlags::O_CREAT).unwrap();
    fs::close(&mut fdt, fd).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(fs::read(&fdt, fd, &mut buf).unwrap_err(), Errno::BadF);
}
