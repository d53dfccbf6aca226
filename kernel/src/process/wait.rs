//! `wait()` (spec §4.I): "blocks until any child becomes a zombie, then
//! reaps it and returns its pid and exit status; `-ECHILD` if the caller
//! has no children at all." Signal-driven wakeup (WUNTRACED/WCONTINUED)
//! is out of scope; a waiting parent simply yields until a child reaps.

use crate::error::Errno;
use crate::process::pcb::ProcessState;
use crate::process::{current_pid, ProcessId, PROCESS_TABLE};

/// POSIX-compatible encoding of a reaped child's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus {
    pub exit_code: i32,
}

impl WaitStatus {
    /// `(code & 0xFF) << 8`, matching the layout user-space `WEXITSTATUS`
    /// expects.
    pub fn to_raw(self) -> i32 {
        (self.exit_code & 0xFF) << 8
    }
}

/// Blocks the caller until one of its children exits, reaps it, and
/// returns `(child_pid, status)`. Returns `Err(Errno::Child)` immediately
/// if the caller has no children, living or dead.
pub fn wait() -> Result<(ProcessId, WaitStatus), Errno> {
    let parent = current_pid();
    loop {
        let table = PROCESS_TABLE.lock();
        let children = table.children_of(parent);
        if children.is_empty() {
            return Err(Errno::Child);
        }

        for child_pid in &children {
            if let Some(lock) = table.get(*child_pid) {
                let is_zombie = lock.read().state == ProcessState::Zombie;
                if is_zombie {
                    let exit_code = lock.read().exit_code.unwrap_or(0);
                    drop(table);
                    let mut table = PROCESS_TABLE.lock();
                    let removed = table.remove(*child_pid);
                    drop(table);
                    // The child's user mappings were already freed by its
                    // own `exit`; now that we (the parent, under our own
                    // directory) are the ones running, its directory frame
                    // is no longer anyone's active `cr3` and can go too.
                    if let Some(process) = removed {
                        if process.page_directory_phys != 0 {
                            crate::mm::paging::free_directory(process.page_directory_phys);
                        }
                    }
                    return Ok((*child_pid, WaitStatus { exit_code }));
                }
            }
        }
        drop(table);

        // No zombie child yet: give up the CPU and check again once we
        // are scheduled back.
        crate::sched::yield_now();
    }
}

/// Called from `process::exit` so a parent blocked in [`wait`] is
/// scheduled again promptly instead of waiting for its own next
/// time-slice. Cooperative scheduling has no blocked/woken distinction
/// here: the parent is always in the READY queue's rotation (see
/// [`wait`]'s yield loop), so this only needs to make sure it is queued.
pub fn notify_parent(child_pid: ProcessId) {
    let table = PROCESS_TABLE.lock();
    let Some(lock) = table.get(child_pid) else { return };
    let parent_pid = lock.read().parent_pid;
    drop(table);
    crate::sched::enqueue_ready(parent_pid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_status_encodes_exit_code_in_high_byte() {
        let status = WaitStatus { exit_code: 42 };
        assert_eq!(status.to_raw(), 42 << 8);
    }

    #[test]
    fn wait_status_masks_to_a_byte() {
        let status = WaitStatus { exit_code: -1 };
        assert_eq!(status.to_raw(), 0xFF << 8);
    }
}
