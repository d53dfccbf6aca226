//! Process table and wait/exit scenario tests (spec §3 "Process", §4.I),
//! built directly against a hand-assembled PCB rather than through
//! `fork`/`execve`, which call into page-table and `cr3` primitives that
//! need real i386 hardware to run.

use simpleos_kernel::arch::trap::TrapFrame;
use simpleos_kernel::process::{self, Process, ProcessId, ProcessState, PROCESS_TABLE};

/// `CURRENT_PID` is one process-wide static; serialize this file's tests so
/// one test's `exit_as`/`wait` pair cannot observe another's in-flight
/// current-process swap.
static TEST_LOCK: spin::Mutex<()> = spin::Mutex::new(());

fn blank_trapframe() -> TrapFrame {
    TrapFrame {
        edi: 0,
        esi: 0,
        ebp: 0,
        esp0: 0,
        ebx: 0,
        edx: 0,
        ecx: 0,
        eax: 0,
        int_no: 0,
        err_code: 0,
        eip: 0,
        cs: 0,
        eflags: 0,
        user_esp: 0,
        user_ss: 0,
    }
}

/// Inserts a bare process with no real address space or kernel stack — fine
/// for exercising table bookkeeping, which never dereferences those fields.
fn spawn_bare(parent: ProcessId) -> ProcessId {
    let pid = process::alloc_pid();
    let process = Process::new(pid, parent, 0, 0, blank_trapframe());
    PROCESS_TABLE.lock().insert(process)
}

/// Runs `exit(code)` as if `pid` were the currently running process,
/// restoring whatever was current beforehand.
fn exit_as(pid: ProcessId, code: i32) {
    let previous = *process::CURRENT_PID.lock();
    *process::CURRENT_PID.lock() = pid;
    process::exit(code);
    *process::CURRENT_PID.lock() = previous;
}

#[test]
fn wait_reaps_a_zombie_child_and_returns_its_code() {
    let _guard = TEST_LOCK.lock();
    let parent = spawn_bare(0);
    let child = spawn_bare(parent);

    exit_as(child, 7);

    let previous = *process::CURRENT_PID.lock();
    *process::CURRENT_PID.lock() = parent;
    let (reaped_pid, status) = process::wait().unwrap();
    *process::CURRENT_PID.lock() = previous;

    assert_eq!(reaped_pid, child);
    assert_eq!(status.exit_code, 7);
    assert!(PROCESS_TABLE.lock().get(child).is_none(), "wait must remove the reaped zombie");
}

#[test]
fn wait_with_no_children_fails_with_echild() {
    let _guard = TEST_LOCK.lock();
    let lonely = spawn_bare(0);
    let previous = *process::CURRENT_PID.lock();
    *process::CURRENT_PID.lock() = lonely;
    let result = process::wait();
    *process::CURRENT_PID.lock() = previous;

    assert_eq!(result.unwrap_err(), simpleos_kernel::error::Errno::Child);
}

#[test]
fn exiting_reparents_orphans_to_init() {
    let _guard = TEST_LOCK.lock();
    let parent = spawn_bare(0);
    let grandchild = spawn_bare(parent);

    exit_as(parent, 0);

    let table = PROCESS_TABLE.lock();
    let reparented = table.get(grandchild).unwrap().read().parent_pid;
    assert_eq!(reparented, process::INIT_PID);
}

#[test]
fn children_of_only_lists_direct_children() {
    let parent = spawn_bare(0);
    let child_a = spawn_bare(parent);
    let child_b = spawn_bare(parent);
    let grandchild = spawn_bare(child_a);

    let table = PROCESS_TABLE.lock();
    let mut children = table.children_of(parent);
    children.sort();
    let mut expected = [child_a, child_b];
    expected.sort();
    assert_eq!(children, expected);
    assert!(!children.contains(&grandchild));
}

#[test]
fn a_fresh_process_starts_ready_with_an_empty_cwd_of_root() {
    let pid = process::alloc_pid();
    let process = Process::new(pid, 0, 0, 0, blank_trapframe());
    assert_eq!(process.state, ProcessState::Ready);
    assert_eq!(process.cwd, "/");
    assert_eq!(process.exit_code, None);
}
