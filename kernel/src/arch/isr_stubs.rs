//! Per-vector entry stubs and `ISR_STUB_TABLE` (spec §1's named-but-
//! unspecified collaborator, referenced as `extern "C"` from [`super::idt`]).
//! Every stub normalizes the CPU's inconsistent error-code pushing into one
//! fixed-layout [`super::trap::TrapFrame`] and funnels into
//! [`super::idt::trap_dispatch`]; this is the one place outside `idt.rs`
//! itself that knows the trap frame's field order.

use core::arch::global_asm;

#[cfg(target_arch = "x86")]
global_asm!(
    r#"
.altmacro
.text

.macro isr_stub num
.global isr_stub_\num
isr_stub_\num:
.if (\num == 8) || (\num == 10) || (\num == 11) || (\num == 12) || (\num == 13) || (\num == 14) || (\num == 17)
    push \num
.else
    push 0
    push \num
.endif
    jmp isr_common
.endm

isr_common:
    pushad
    push esp
    call trap_dispatch
    add esp, 4
    popad
    add esp, 8
    iretd

.set i, 0
.rept 256
isr_stub %i
.set i, i+1
.endr

.section .rodata
.global ISR_STUB_TABLE
ISR_STUB_TABLE:
.set i, 0
.rept 256
.long isr_stub_%i
.set i, i+1
.endr
"#
);
