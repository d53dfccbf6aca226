//! Interrupt descriptor table and the single dispatcher every vector funnels
//! through (spec §4.E). Per-vector stub assembly and the 8259 PIC
//! programming are external collaborators (out of scope); this module owns
//! the IDT itself, the registered-handler table, and `trap_dispatch`, the
//! one function every stub ultimately calls.

use crate::arch::gdt::KERNEL_CODE_SEL;
use crate::arch::trap::TrapFrame;
use core::arch::asm;
use core::mem::size_of;
use spin::Mutex;

pub type Handler = fn(&mut TrapFrame);

const IDT_ENTRIES: usize = 256;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtGate {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtGate {
    const fn missing() -> Self {
        IdtGate {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, selector: u16, type_attr: u8) -> Self {
        IdtGate {
            offset_low: (handler & 0xFFFF) as u16,
            selector,
            zero: 0,
            type_attr,
            offset_high: ((handler >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

static IDT: Mutex<[IdtGate; IDT_ENTRIES]> = Mutex::new([IdtGate::missing(); IDT_ENTRIES]);

/// Handlers registered by vector number. A missing entry at dispatch time
/// is itself a fatal condition for exceptions below 32, and `-ENOSYS`-like
/// silence (ignored) for unused hardware IRQs above it.
static HANDLERS: Mutex<[Option<Handler>; IDT_ENTRIES]> = Mutex::new([None; IDT_ENTRIES]);

const GATE_INTERRUPT_DPL0: u8 = 0x8E;
const GATE_INTERRUPT_DPL3: u8 = 0xEE;

/// Registers `handler` for `vector`. Called during boot to wire up
/// exception handlers, the timer tick, and the syscall vector.
pub fn register(vector: u8, handler: Handler, user_callable: bool) {
    let attr = if user_callable {
        GATE_INTERRUPT_DPL3
    } else {
        GATE_INTERRUPT_DPL0
    };
    let stub = stub_address(vector);
    IDT.lock()[vector as usize] = IdtGate::new(stub, KERNEL_CODE_SEL, attr);
    HANDLERS.lock()[vector as usize] = Some(handler);
}

/// Loads the IDT. Must run after every vector of interest has been
/// registered.
///
/// # Safety
/// Must be called once during boot with interrupts disabled; loading an IDT
/// whose gates reference unregistered handlers would jump through a null
/// pointer on the next matching trap.
pub unsafe fn init() {
    let guard = IDT.lock();
    let pointer = DescriptorTablePointer {
        limit: (size_of::<[IdtGate; IDT_ENTRIES]>() - 1) as u16,
        base: guard.as_ptr() as u32,
    };
    unsafe {
        asm!("lidt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    }
}

/// The single entry point every per-vector assembly stub calls after
/// pushing the trap frame onto the kernel stack. Looks up the registered
/// handler by `int_no` and invokes it.
///
/// # Safety
/// `frame` must point at a fully-populated `TrapFrame` built by the common
/// stub epilogue; this function is only ever called from that assembly.
#[no_mangle]
pub unsafe extern "C" fn trap_dispatch(frame: *mut TrapFrame) {
    let frame = unsafe { &mut *frame };
    let handler = HANDLERS.lock()[frame.int_no as usize];
    match handler {
        Some(h) => h(frame),
        None if frame.int_no < 32 => {
            panic!("unhandled CPU exception {} at {}", frame.int_no, frame);
        }
        None => {
            // Unregistered hardware IRQ: acknowledge and ignore.
        }
    }
}

// One `global_asm!` trampoline per vector pushes `int_no`/`err_code` (zero
// padded where the CPU doesn't supply one), saves the general-purpose
// registers and segments into a `TrapFrame`, and calls `trap_dispatch`
// before `iret`. That per-vector boilerplate is the named-but-not-specified
// collaborator referenced in spec §1; `ISR_STUB_TABLE` is the array of its
// 256 entry addresses it exports.
#[cfg(target_arch = "x86")]
extern "C" {
    static ISR_STUB_TABLE: [u32; IDT_ENTRIES];
}

#[cfg(target_arch = "x86")]
fn stub_address(vector: u8) -> u32 {
    unsafe { ISR_STUB_TABLE[vector as usize] }
}

#[cfg(not(target_arch = "x86"))]
fn stub_address(_vector: u8) -> u32 {
    unreachable!("ISR stub table only exists on target_arch = \"x86\"")
}
