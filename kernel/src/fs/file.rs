//! File descriptors, open flags, and the per-process fd table (spec §3
//! "File descriptor", §4.G).

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::RwLock;

use crate::error::Errno;
use crate::fs::MountPointId;

pub type FileDescriptor = usize;

pub const STDIN: FileDescriptor = 0;
pub const STDOUT: FileDescriptor = 1;
pub const STDERR: FileDescriptor = 2;

bitflags::bitflags! {
    /// Open flags (spec §6). Bit values are this crate's own ABI; nothing
    /// in the spec mandates a specific numbering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const O_RDONLY = 0x0000;
        const O_WRONLY = 0x0001;
        const O_RDWR   = 0x0002;
        const O_CREAT  = 0x0040;
        const O_TRUNC  = 0x0200;
        const O_APPEND = 0x0400;
    }
}

impl OpenFlags {
    pub fn readable(self) -> bool {
        self.bits() & 0x3 != Self::O_WRONLY.bits()
    }
    pub fn writable(self) -> bool {
        let access = self.bits() & 0x3;
        access == Self::O_WRONLY.bits() || access == Self::O_RDWR.bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

/// A backing handle shared by every fd that was produced by `dup`/`fork`
/// from a common `open`. Does not carry the offset itself: two descriptors
/// sharing one `OpenFile` may still disagree about where they are reading
/// from (`fork`), so the offset lives in `FdEntry` instead.
pub struct OpenFile {
    pub mount: MountPointId,
    pub path: alloc::string::String,
    pub flags: OpenFlags,
}

/// A dense fd-table entry: a reference-counted pointer to the shared
/// `OpenFile`, plus this entry's own offset cell. `dup` clones the `Arc<RwLock<u64>>`
/// so both descriptors advance together (spec §4.G: "dup copies the handle;
/// both share one offset"); `fork` instead seeds a fresh cell from the
/// current value, so parent and child advance independently (spec §8
/// testable property #6).
#[derive(Clone)]
pub struct FdEntry {
    pub file: Arc<OpenFile>,
    pub offset: Arc<RwLock<u64>>,
}

pub struct FdTable {
    slots: Vec<Option<FdEntry>>,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable { slots: Vec::new() }
    }

    /// Inserts `entry` at the lowest free index, growing the table if
    /// every existing slot is occupied.
    pub fn insert(&mut self, entry: FdEntry) -> FileDescriptor {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(entry);
                return i;
            }
        }
        self.slots.push(Some(entry));
        self.slots.len() - 1
    }

    /// Inserts `entry` at a specific index, as `dup2`-style operations need
    /// (not currently exposed as a syscall, but kept for `dup` onto a
    /// caller-chosen lowest-free slot via the same primitive).
    pub fn insert_at(&mut self, fd: FileDescriptor, entry: FdEntry) {
        if fd >= self.slots.len() {
            self.slots.resize(fd + 1, None);
        }
        self.slots[fd] = Some(entry);
    }

    pub fn get(&self, fd: FileDescriptor) -> Option<FdEntry> {
        self.slots.get(fd).and_then(|s| s.clone())
    }

    /// Duplicates `fd` into the lowest free slot, sharing the same
    /// `OpenFile` (and therefore the same offset).
    pub fn dup(&mut self, fd: FileDescriptor) -> Result<FileDescriptor, Errno> {
        let entry = self.get(fd).ok_or(Errno::BadF)?;
        Ok(self.insert(entry))
    }

    pub fn close(&mut self, fd: FileDescriptor) -> Result<(), Errno> {
        match self.slots.get_mut(fd) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(Errno::BadF),
        }
    }

    /// Clones the table for `fork`: each child slot shares the same backing
    /// `OpenFile` as the parent (spec §9 "avoid deep-copying the backing
    /// state"), but gets its own offset cell seeded from the parent's
    /// current value, so the two processes' later reads/writes/seeks don't
    /// move each other's offset (spec §8 testable property #6).
    pub fn clone_for_fork(&self) -> FdTable {
        FdTable {
            slots: self
                .slots
                .iter()
                .map(|slot| {
                    slot.as_ref().map(|entry| FdEntry {
                        file: entry.file.clone(),
                        offset: Arc::new(RwLock::new(*entry.offset.read())),
                    })
                })
                .collect(),
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
