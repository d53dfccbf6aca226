//! Process control block (spec §3 "Process").

use alloc::string::String;

use crate::arch::trap::TrapFrame;
use crate::fs::file::FdTable;

pub type ProcessId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Ready,
    WaitingChild,
    Zombie,
}

pub struct Process {
    pub pid: ProcessId,
    pub parent_pid: ProcessId,
    pub state: ProcessState,
    pub page_directory_phys: u32,
    pub kernel_stack_top: u32,
    pub trapframe: TrapFrame,
    pub fd_table: FdTable,
    pub cwd: String,
    pub exit_code: Option<i32>,
}

impl Process {
    pub fn new(
        pid: ProcessId,
        parent_pid: ProcessId,
        page_directory_phys: u32,
        kernel_stack_top: u32,
        trapframe: TrapFrame,
    ) -> Self {
        Process {
            pid,
            parent_pid,
            state: ProcessState::Ready,
            page_directory_phys,
            kernel_stack_top,
            trapframe,
            fd_table: FdTable::new(),
            cwd: String::from("/"),
            exit_code: None,
        }
    }
}
