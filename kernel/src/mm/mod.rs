//! Memory management: frame bitmap (B), paging/VMM (C), kernel heap (D).

pub mod frame_allocator;
pub mod heap;
pub mod paging;

use crate::arch::trap::{PageFaultError, TrapFrame};

/// Page-fault handler (interrupt 14). Reads `cr2`, classifies via the error
/// code, and panics with the fault context — this core does not implement
/// demand-growth of a region, only demand allocation through explicit
/// `paging::alloc_frame` calls (spec §4.C).
pub fn page_fault_handler(frame: &mut TrapFrame) {
    let fault_addr = crate::arch::read_cr2();
    let err = PageFaultError::from_bits_truncate(frame.err_code);

    if err.contains(PageFaultError::USER) {
        log::warn!(
            "user page fault at {fault_addr:#010x} (err={:?}), terminating process",
            err
        );
        crate::process::terminate_current_on_fault(fault_addr);
        return;
    }

    panic!(
        "kernel page fault: cr2={fault_addr:#010x} err={:?} eip={:#010x}",
        err, frame.eip
    );
}
