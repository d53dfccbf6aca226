//! Cooperative round-robin scheduler (spec §4.I: "no preemption; processes
//! give up the CPU only by calling `yield`, blocking in `wait`, or
//! `exit`ing").
//!
//! The actual register-state hand-off happens one layer up: `yield_now`
//! only picks the next READY pid, switches `cr3`, and updates
//! [`crate::process::CURRENT_PID`]. The syscall dispatcher (the only
//! caller of `sys_yield`) is responsible for re-reading the trap frame of
//! whichever process ends up current and copying it onto the trap frame
//! it was handed, so `iret` resumes the right process.

extern crate alloc;

use alloc::collections::VecDeque;

use spin::Mutex;

use crate::arch::load_cr3;
use crate::process::{ProcessId, ProcessState, PROCESS_TABLE};

static READY_QUEUE: Mutex<VecDeque<ProcessId>> = Mutex::new(VecDeque::new());

/// Appends `pid` to the tail of the READY queue.
pub fn enqueue_ready(pid: ProcessId) {
    READY_QUEUE.lock().push_back(pid);
}

/// Removes every occurrence of `pid` from the READY queue, used when a
/// process blocks in `wait` or exits while still queued.
pub fn dequeue(pid: ProcessId) {
    READY_QUEUE.lock().retain(|&p| p != pid);
}

/// Picks the next READY process and switches into it. If the queue is
/// empty the current process simply continues (this core never idles
/// more than one process deep, since `init` is always runnable).
pub fn yield_now() {
    let current = crate::process::current_pid();
    let next = READY_QUEUE.lock().pop_front();
    let Some(next_pid) = next else { return };
    if next_pid == current {
        return;
    }

    let table = PROCESS_TABLE.lock();
    if let Some(lock) = table.get(current) {
        let mut process = lock.write();
        if process.state == ProcessState::Running {
            process.state = ProcessState::Ready;
            drop(process);
            enqueue_ready(current);
        }
    }

    let Some(next_lock) = table.get(next_pid) else {
        return;
    };
    let mut next_process = next_lock.write();
    next_process.state = ProcessState::Running;
    let dir_phys = next_process.page_directory_phys;
    let kernel_stack_top = next_process.kernel_stack_top;
    drop(next_process);
    drop(table);

    *crate::process::CURRENT_PID.lock() = next_pid;
    unsafe { load_cr3(dir_phys) };
    crate::arch::gdt::set_kernel_stack(kernel_stack_top);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_queue_is_fifo() {
        READY_QUEUE.lock().clear();
        enqueue_ready(3);
        enqueue_ready(7);
        let mut q = READY_QUEUE.lock();
        assert_eq!(q.pop_front(), Some(3));
        assert_eq!(q.pop_front(), Some(7));
    }

    #[test]
    fn dequeue_removes_all_occurrences() {
        READY_QUEUE.lock().clear();
        enqueue_ready(5);
        enqueue_ready(5);
        enqueue_ready(6);
        dequeue(5);
        let q = READY_QUEUE.lock();
        assert_eq!(q.iter().copied().collect::<alloc::vec::Vec<_>>(), alloc::vec![6]);
    }
}
