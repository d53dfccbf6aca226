//! ELF32 loader (spec §4.J step 3): verify the magic, walk program headers,
//! copy each `PT_LOAD` segment to its physical load address, zero the BSS
//! tail. Paging is off at this stage, so `p_vaddr` already names a physical
//! address — the same simplification the original loader makes.

const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const PT_LOAD: u32 = 1;

#[repr(C)]
struct Elf32Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
struct Elf32Phdr {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

/// Checks the first four bytes of `buf` against the ELF magic number.
pub fn is_elf(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0..4] == MAGIC
}

/// Loads every `PT_LOAD` segment of the ELF32 image in `buf` to its `p_vaddr`
/// (this stage's stand-in physical address) and returns `e_entry`.
///
/// # Safety
/// `buf` must hold a validated ELF32 image (`is_elf` true) whose program
/// headers name load addresses that do not overlap this loader, the boot
/// stack, or the multiboot info record it is about to build.
pub unsafe fn load(buf: &[u8]) -> u32 {
    // SAFETY: `buf` starts with a valid ELF32 header, checked by the caller.
    let header = unsafe { &*(buf.as_ptr() as *const Elf32Ehdr) };

    for i in 0..header.e_phnum as usize {
        let phdr_off = header.e_phoff as usize + i * header.e_phentsize as usize;
        // SAFETY: `phdr_off` stays within `buf` for a well-formed ELF32 file;
        // this loader has no independent way to verify program header count
        // against file length, matching the original's lack of such a check.
        let phdr = unsafe { &*(buf.as_ptr().add(phdr_off) as *const Elf32Phdr) };
        if phdr.p_type != PT_LOAD {
            continue;
        }

        let src = &buf[phdr.p_offset as usize..(phdr.p_offset + phdr.p_filesz) as usize];
        let dest = phdr.p_vaddr as *mut u8;
        // SAFETY: caller guarantees `p_vaddr..p_vaddr+p_memsz` is free,
        // writable physical memory.
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), dest, phdr.p_filesz as usize);
            if phdr.p_memsz > phdr.p_filesz {
                core::ptr::write_bytes(dest.add(phdr.p_filesz as usize), 0, (phdr.p_memsz - phdr.p_filesz) as usize);
            }
        }
    }

    header.e_entry
}
