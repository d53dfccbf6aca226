//! Process lifecycle: PCB, fork, exec, wait/zombie/reparenting, exit
//! (spec §3 "Process", §4.I).

extern crate alloc;

mod exec;
mod fork;
mod pcb;
mod wait;

pub use exec::execve;
pub use fork::fork;
pub use pcb::{Process, ProcessId, ProcessState};
pub use wait::{wait, WaitStatus};

use alloc::collections::BTreeMap;
use spin::{Mutex, RwLock};

use crate::error::Errno;

pub const INIT_PID: ProcessId = 1;

pub struct ProcessTable {
    processes: BTreeMap<ProcessId, RwLock<Process>>,
    next_pid: ProcessId,
}

impl ProcessTable {
    const fn new() -> Self {
        ProcessTable {
            processes: BTreeMap::new(),
            next_pid: 1,
        }
    }

    fn alloc_pid(&mut self) -> ProcessId {
        let pid = self.next_pid;
        self.next_pid = if self.next_pid >= crate::config::MAX_PID {
            1
        } else {
            self.next_pid + 1
        };
        pid
    }

    pub fn insert(&mut self, process: Process) -> ProcessId {
        let pid = process.pid;
        self.processes.insert(pid, RwLock::new(process));
        pid
    }

    pub fn get(&self, pid: ProcessId) -> Option<&RwLock<Process>> {
        self.processes.get(&pid)
    }

    pub fn remove(&mut self, pid: ProcessId) -> Option<Process> {
        self.processes.remove(&pid).map(|lock| lock.into_inner())
    }

    pub fn children_of(&self, parent: ProcessId) -> alloc::vec::Vec<ProcessId> {
        self.processes
            .iter()
            .filter(|(_, p)| p.read().parent_pid == parent)
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// Re-parents every child of `old_parent` to pid 1, per spec §3
    /// "Orphans (parent exited) are re-parented to pid 1."
    pub fn reparent_orphans(&mut self, old_parent: ProcessId) {
        for pid in self.children_of(old_parent) {
            if let Some(lock) = self.processes.get(&pid) {
                lock.write().parent_pid = INIT_PID;
            }
        }
    }
}

pub static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

pub static CURRENT_PID: Mutex<ProcessId> = Mutex::new(0);

pub fn current_pid() -> ProcessId {
    *CURRENT_PID.lock()
}

/// Allocates a fresh pid. Kept as a free function so fork and the initial
/// bootstrap process share one counter.
pub fn alloc_pid() -> ProcessId {
    PROCESS_TABLE.lock().alloc_pid()
}

/// Allocates a fresh kernel-mode stack, for the same reason `alloc_pid`
/// above is a free function: boot's bootstrap of pid 1 needs this without
/// going through `fork`.
pub fn alloc_kernel_stack() -> u32 {
    exec::alloc_kernel_stack()
}

/// `exit(code)` — spec §4.I: marks the process a zombie, releases its user
/// address space, wakes a waiting parent.
pub fn exit(code: i32) {
    let pid = current_pid();
    let table = PROCESS_TABLE.lock();
    let Some(lock) = table.get(pid) else { return };
    let mut process = lock.write();
    let page_directory_phys = process.page_directory_phys;
    process.exit_code = Some(code);
    process.state = ProcessState::Zombie;
    drop(process);
    drop(table);

    // Release the user half of the address space now, while it is still
    // the active directory. A directory of 0 only ever comes from a
    // hand-built PCB with no real address space (kernel/tests'
    // bookkeeping-only fixtures), so there is nothing to walk.
    if page_directory_phys != 0 {
        crate::mm::paging::free_user_address_space();
    }

    PROCESS_TABLE.lock().reparent_orphans(pid);
    wait::notify_parent(pid);
}

/// `yield` (spec §4.I): requeue current at the tail of READY, let the
/// scheduler run the next process. Cooperative only; never triggered by a
/// timer in this core.
pub fn sys_yield() {
    crate::sched::yield_now();
}

/// Called from the page-fault handler when a *user-mode* fault occurs
/// (spec §7: "Page faults from user mode terminate the process with an
/// exit code indicating fault").
pub fn terminate_current_on_fault(fault_addr: u32) {
    log::warn!("process {} killed by page fault at {fault_addr:#010x}", current_pid());
    exit(-(Errno::Fault as i32));
}
