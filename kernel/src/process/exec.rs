//! `execve(path, argv, envp)` (spec §4.I).

extern crate alloc;

use alloc::vec::Vec;

use crate::arch::trap::TrapFrame;
use crate::config::{PAGE_SIZE, USER_STACK_PAGES};
use crate::elf::{Elf32Header, ProgramHeaderType};
use crate::error::Errno;
use crate::fs::file::{FdTable, OpenFlags};
use crate::mm::paging;
use crate::process::{current_pid, PROCESS_TABLE};

const KERNEL_STACK_PAGES: usize = 4;

/// Allocates a fresh kernel-mode stack for a new process, returning its
/// top (the initial `esp0`).
pub fn alloc_kernel_stack() -> u32 {
    let base = paging::kmalloc(KERNEL_STACK_PAGES * PAGE_SIZE, true, true)
        .expect("kernel stack allocation");
    base + (KERNEL_STACK_PAGES * PAGE_SIZE) as u32
}

/// Replaces the current process image. On any failure before the trap
/// frame is overwritten, the caller's previous image and `eip` are left
/// untouched (spec §4.I step 5: "success is irreversible" only from that
/// point on).
pub fn execve(path: &str, argv: &[&str], _envp: &[&str]) -> Result<(), Errno> {
    let pid = current_pid();

    let mut fdt = FdTable::new();
    let fd = crate::fs::open(&mut fdt, path, OpenFlags::O_RDONLY)?;
    let mut header_buf = [0u8; 52];
    let n = crate::fs::read(&fdt, fd, &mut header_buf)?;
    if n < header_buf.len() {
        return Err(Errno::Inval);
    }
    let header = Elf32Header::parse(&header_buf).ok_or(Errno::Inval)?;

    // Validate every program header is loadable before mutating anything,
    // so a malformed ELF cannot leave the address space half-overwritten.
    let mut segments = Vec::new();
    for i in 0..header.phnum {
        let mut phdr_buf = [0u8; 32];
        crate::fs::lseek(
            &fdt,
            fd,
            crate::fs::file::SeekFrom::Start((header.phoff + i as u32 * header.phentsize as u32) as u64),
        )?;
        let got = crate::fs::read(&fdt, fd, &mut phdr_buf)?;
        if got < phdr_buf.len() {
            return Err(Errno::Inval);
        }
        let phdr = crate::elf::ProgramHeader::parse(&phdr_buf);
        if phdr.p_type == ProgramHeaderType::Load {
            segments.push(phdr);
        }
    }

    // Step 1a: read every segment's file contents into scratch buffers
    // first. A short read or I/O error here returns before anything in the
    // live address space has been touched, so the caller's previous image
    // is still intact (spec §4.I step 5, testable property #7).
    let mut staged = Vec::with_capacity(segments.len());
    for seg in &segments {
        let mut data = alloc::vec![0u8; seg.p_filesz as usize];
        crate::fs::lseek(&fdt, fd, crate::fs::file::SeekFrom::Start(seg.p_offset as u64))?;
        let mut read_total = 0;
        while read_total < data.len() {
            let got = crate::fs::read(&fdt, fd, &mut data[read_total..])?;
            if got == 0 {
                return Err(Errno::Inval);
            }
            read_total += got;
        }
        staged.push(data);
    }

    // Step 1b: every segment is fully staged; now map and populate the
    // live address space. Nothing past this point can fail on file I/O.
    for (seg, data) in segments.iter().zip(staged.iter()) {
        let start_page = seg.p_vaddr / PAGE_SIZE as u32;
        let end_page = (seg.p_vaddr + seg.p_memsz + PAGE_SIZE as u32 - 1) / PAGE_SIZE as u32;
        for page in start_page..end_page {
            paging::alloc_frame(page as usize, false, true);
        }
        let dest = seg.p_vaddr as *mut u8;
        unsafe {
            core::ptr::write_bytes(dest, 0, seg.p_memsz as usize);
            core::ptr::copy_nonoverlapping(data.as_ptr(), dest, data.len());
        }
    }

    // Step 2: fresh user stack with argv/envp laid out.
    let stack_top_page = crate::config::KERNEL_BASE / PAGE_SIZE as u32 - 1;
    for i in 0..USER_STACK_PAGES {
        paging::alloc_frame((stack_top_page as usize) - i, false, true);
    }
    let stack_top = crate::config::KERNEL_BASE - 4;
    let user_esp = push_argv(stack_top, argv);

    // Step 3: overwrite the trap frame (irreversible from here).
    let table = PROCESS_TABLE.lock();
    let lock = table.get(pid).ok_or(Errno::Inval)?;
    let mut process = lock.write();
    process.trapframe = TrapFrame {
        edi: 0,
        esi: 0,
        ebp: 0,
        esp0: process.trapframe.esp0,
        ebx: 0,
        edx: 0,
        ecx: 0,
        eax: 0,
        int_no: 0,
        err_code: 0,
        eip: header.entry,
        cs: crate::arch::gdt::USER_CODE_SEL as u32,
        eflags: 0x202,
        user_esp,
        user_ss: crate::arch::gdt::USER_DATA_SEL as u32,
    };
    // Step 4: fd table is inherited as-is (close-on-exec unsupported).
    drop(process);

    Ok(())
}

/// Writes argv strings and a pointer array onto the fresh user stack,
/// returning the resulting stack pointer.
fn push_argv(stack_top: u32, argv: &[&str]) -> u32 {
    let mut sp = stack_top;
    let mut pointers = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        let bytes = arg.as_bytes();
        sp -= bytes.len() as u32 + 1;
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), sp as *mut u8, bytes.len());
            *((sp + bytes.len() as u32) as *mut u8) = 0;
        }
        pointers.push(sp);
    }
    sp &= !0x3; // word-align before the pointer array
    for &ptr in &pointers {
        sp -= 4;
        unsafe { (sp as *mut u32).write(ptr) };
    }
    sp -= 4;
    unsafe { (sp as *mut u32).write(argv.len() as u32) };
    sp
}
