//! Syscall-facing error codes and the small set of invariant violations
//! that the kernel treats as fatal rather than recoverable.

use core::fmt;

/// Negative-integer error codes returned by syscalls, matching the POSIX
/// subset this core exposes. `as_negative` gives the exact `isize` written
/// back into the trap frame's `eax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "syscall errors must be propagated, not silently discarded"]
#[repr(i32)]
pub enum Errno {
    Perm = 1,
    NoEnt = 2,
    Io = 5,
    BadF = 9,
    NoMem = 12,
    Exist = 17,
    NotDir = 20,
    IsDir = 21,
    Inval = 22,
    NoSpc = 28,
    Rofs = 30,
    Fault = 14,
    Child = 10,
    NoSys = 38,
}

impl Errno {
    pub const fn as_negative(self) -> isize {
        -(self as i32 as isize)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Errno::Perm => "EPERM",
            Errno::NoEnt => "ENOENT",
            Errno::Io => "EIO",
            Errno::BadF => "EBADF",
            Errno::NoMem => "ENOMEM",
            Errno::Exist => "EEXIST",
            Errno::NotDir => "ENOTDIR",
            Errno::IsDir => "EISDIR",
            Errno::Inval => "EINVAL",
            Errno::NoSpc => "ENOSPC",
            Errno::Rofs => "EROFS",
            Errno::Fault => "EFAULT",
            Errno::Child => "ECHILD",
            Errno::NoSys => "ENOSYS",
        };
        f.write_str(name)
    }
}

pub type KResult<T> = Result<T, Errno>;

/// Conditions spec treats as violated invariants: the kernel panics rather
/// than returning an error code, since they indicate corrupted kernel state
/// rather than a caller mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A frame was freed while its bitmap bit was already clear.
    DoubleFree { frame: usize },
    /// PDE[1023] did not point at the active directory's own physical frame.
    MissingRecursiveMapping,
    /// The ATA controller raised `ERR` or `DF` in its status register.
    AtaFault { status: u8 },
    /// The frame allocator ran dry during early boot, before any process
    /// could be scheduled to reclaim memory.
    OutOfFrames,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::DoubleFree { frame } => {
                write!(f, "double free of frame {frame:#x}")
            }
            KernelError::MissingRecursiveMapping => {
                f.write_str("PDE[1023] does not map the active page directory")
            }
            KernelError::AtaFault { status } => {
                write!(f, "ATA controller fault, status={status:#x}")
            }
            KernelError::OutOfFrames => f.write_str("frame allocator exhausted during boot"),
        }
    }
}

/// Logs the violation at `error` level and panics with a structured message.
/// Call sites use this instead of a bare `panic!` so every fatal condition
/// is logged uniformly before the kernel halts.
pub fn fatal(err: KernelError) -> ! {
    log::error!("fatal kernel error: {err}");
    panic!("{err}");
}
