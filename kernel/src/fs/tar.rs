//! Read-only USTAR archive backend (spec §4.H). Sequential header scan
//! with no index: a lookup reads one 512-byte header at a time, compares
//! `name`, and on mismatch skips `ceil(size/512)` content sectors before
//! trying the next header — inherited unmodified from the original
//! bootloader's `tar_lookup_lazy` (spec §9b), including its limitation that
//! a single-probe header match cannot follow USTAR long-name extension
//! records.

use alloc::string::{String, ToString};
use alloc::sync::Arc;

use crate::drivers::ata::BlockDevice;
use crate::error::Errno;
use crate::fs::{Dirent, FileMode, MountOps, Stat};

const HEADER_SIZE: usize = 512;
const NAME_LEN: usize = 100;
const SIZE_OFFSET: usize = 124;
const SIZE_LEN: usize = 12;
const MTIME_OFFSET: usize = 136;
const MTIME_LEN: usize = 12;
const TYPEFLAG_OFFSET: usize = 156;
const MAGIC_OFFSET: usize = 257;
const MAGIC: &[u8] = b"ustar";

/// Parses a NUL/space-terminated octal ASCII field, trimming trailing
/// padding before interpreting digits — matching the original's
/// `strtol`-after-trim behavior.
pub fn parse_octal(field: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &b in field {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 8 + (b - b'0') as u64;
    }
    value
}

struct Header {
    name: String,
    size: u64,
    mtime: i64,
    typeflag: u8,
    lba: u32,
}

fn sectors_for(size: u64) -> u32 {
    ((size + crate::config::SECTOR_SIZE as u64 - 1) / crate::config::SECTOR_SIZE as u64) as u32
}

/// Scans headers starting at `start_lba`, invoking `visit` with each
/// non-terminating header. Stops at the first all-zero header (archive
/// end) or when `visit` returns `Some`.
fn scan<R>(dev: &dyn BlockDevice, start_lba: u32, mut visit: impl FnMut(&Header) -> Option<R>) -> Option<R> {
    let mut lba = start_lba;
    let mut buf = [0u8; HEADER_SIZE];
    loop {
        if dev.read_sectors(lba, 1, &mut buf).is_err() {
            return None;
        }
        if buf.iter().all(|&b| b == 0) {
            return None;
        }
        if &buf[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC.len()] != MAGIC {
            return None;
        }
        let name_bytes = &buf[0..NAME_LEN];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = core::str::from_utf8(&name_bytes[..name_len]).unwrap_or("").to_string();
        let size = parse_octal(&buf[SIZE_OFFSET..SIZE_OFFSET + SIZE_LEN]);
        let mtime = parse_octal(&buf[MTIME_OFFSET..MTIME_OFFSET + MTIME_LEN]) as i64;
        let typeflag = buf[TYPEFLAG_OFFSET];
        let header = Header {
            name,
            size,
            mtime,
            typeflag,
            lba: lba + 1,
        };
        let content_sectors = sectors_for(header.size);
        if let Some(r) = visit(&header) {
            return Some(r);
        }
        lba += 1 + content_sectors;
    }
}

pub struct UstarFs {
    device: Arc<dyn BlockDevice>,
    start_lba: u32,
}

impl UstarFs {
    pub fn new(device: Arc<dyn BlockDevice>, start_lba: u32) -> Self {
        UstarFs { device, start_lba }
    }

    fn find(&self, name: &str) -> Option<Header> {
        let target = name.trim_start_matches('/');
        scan(self.device.as_ref(), self.start_lba, |h| {
            if h.name.trim_start_matches('/') == target {
                Some(Header {
                    name: h.name.clone(),
                    size: h.size,
                    mtime: h.mtime,
                    typeflag: h.typeflag,
                    lba: h.lba,
                })
            } else {
                None
            }
        })
    }
}

impl MountOps for UstarFs {
    fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, Errno> {
        let header = self.find(path).ok_or(Errno::NoEnt)?;
        if offset >= header.size {
            return Ok(0);
        }
        let remaining = (header.size - offset) as usize;
        let to_read = buf.len().min(remaining);

        // Read whole sectors covering [offset, offset+to_read) then copy
        // out the requested slice; USTAR content has no sub-sector index.
        let first_sector = offset / crate::config::SECTOR_SIZE as u64;
        let last_sector = (offset + to_read as u64).saturating_sub(1) / crate::config::SECTOR_SIZE as u64;
        let sector_count = (last_sector - first_sector + 1) as u32;
        let mut scratch = alloc::vec![0u8; sector_count as usize * HEADER_SIZE];
        self.device
            .read_sectors(header.lba + first_sector as u32, sector_count, &mut scratch)
            .map_err(|_| Errno::Io)?;
        let start_in_scratch = (offset % crate::config::SECTOR_SIZE as u64) as usize;
        buf[..to_read].copy_from_slice(&scratch[start_in_scratch..start_in_scratch + to_read]);
        Ok(to_read)
    }

    fn write(&self, _path: &str, _offset: u64, _buf: &[u8]) -> Result<usize, Errno> {
        Err(Errno::Rofs)
    }

    fn getattr(&self, path: &str) -> Result<Stat, Errno> {
        let header = self.find(path).ok_or(Errno::NoEnt)?;
        let mode = if header.typeflag == b'5' {
            FileMode::S_IFDIR.bits() | 0o755
        } else {
            FileMode::S_IFREG.bits() | 0o644
        };
        Ok(Stat {
            mode,
            size: header.size,
            mtime: header.mtime,
        })
    }

    fn readdir(&self, path: &str, index: usize) -> Result<Option<Dirent>, Errno> {
        let prefix = path.trim_start_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            let mut p = prefix.to_string();
            if !p.ends_with('/') {
                p.push('/');
            }
            p
        };
        let mut seen = 0usize;
        let found = scan(self.device.as_ref(), self.start_lba, |h| {
            let name = h.name.trim_start_matches('/');
            if name.starts_with(prefix.as_str()) && name != prefix.trim_end_matches('/') {
                if seen == index {
                    return Some(Dirent {
                        name: name.to_string(),
                        mode: if h.typeflag == b'5' {
                            FileMode::S_IFDIR.bits()
                        } else {
                            FileMode::S_IFREG.bits()
                        },
                        size: h.size,
                    });
                }
                seen += 1;
            }
            None
        });
        Ok(found)
    }

    fn create(&self, _path: &str) -> Result<(), Errno> {
        Err(Errno::Rofs)
    }
    fn link(&self, _old: &str, _new: &str) -> Result<(), Errno> {
        Err(Errno::Rofs)
    }
    fn unlink(&self, _path: &str) -> Result<(), Errno> {
        Err(Errno::Rofs)
    }
    fn truncate(&self, _path: &str, _size: u64) -> Result<(), Errno> {
        Err(Errno::Rofs)
    }
    fn rename(&self, _old: &str, _new: &str) -> Result<(), Errno> {
        Err(Errno::Rofs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octal_parses_trailing_nul_and_space() {
        assert_eq!(parse_octal(b"0000644\0"), 0o644);
        assert_eq!(parse_octal(b"     17 \0"), 0o17);
    }

    #[test]
    fn sector_count_rounds_up() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(512), 1);
        assert_eq!(sectors_for(513), 2);
    }
}
