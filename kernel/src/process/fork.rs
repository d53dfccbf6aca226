//! `fork()` (spec §4.I).

use crate::arch::load_cr3;
use crate::error::Errno;
use crate::mm::paging;
use crate::process::pcb::{Process, ProcessState};
use crate::process::{alloc_pid, current_pid, ProcessId, PROCESS_TABLE};

/// Creates a child process: clones the address space, clones the trap
/// frame with the child's `eax` forced to 0, duplicates the fd table, and
/// enqueues the child in READY. Returns the child's pid to the caller
/// (the parent); the child observes the fork boundary by later resuming
/// with `eax == 0` in its own trap frame.
pub fn fork() -> Result<ProcessId, Errno> {
    let parent_pid = current_pid();
    let table = PROCESS_TABLE.lock();
    let parent_lock = table.get(parent_pid).ok_or(Errno::Inval)?;
    let parent = parent_lock.read();

    let new_dir_phys = paging::clone_address_space();

    let mut child_trapframe = parent.trapframe;
    child_trapframe.eax = 0;

    let child_fd_table = parent.fd_table.clone_for_fork();
    let cwd = parent.cwd.clone();
    drop(parent);
    drop(table);

    let child_pid = alloc_pid();
    let kernel_stack_top = crate::process::alloc_kernel_stack();

    let mut child = Process::new(child_pid, parent_pid, new_dir_phys, kernel_stack_top, child_trapframe);
    child.fd_table = child_fd_table;
    child.cwd = cwd;
    child.state = ProcessState::Ready;

    // Apply the pages staged by `clone_address_space` now that the child's
    // directory is the one active processes will switch into; this core
    // switches `cr3` synchronously here since fork never overlaps itself.
    let previous_cr3 = crate::arch::read_cr3();
    unsafe { load_cr3(new_dir_phys) };
    let mut pending = paging::PENDING_CHILD_PAGES.lock();
    for (page_index, phys) in pending.drain(..) {
        paging::install_user_page(page_index, phys, true);
    }
    drop(pending);
    unsafe { load_cr3(previous_cr3) };

    PROCESS_TABLE.lock().insert(child);
    crate::sched::enqueue_ready(child_pid);

    Ok(child_pid)
}
