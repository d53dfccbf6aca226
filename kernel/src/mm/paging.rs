//! Paging / virtual memory manager (spec §4.C). Implements the recursive
//! page-directory mapping: PDE[1023] points at the directory's own physical
//! frame, making the active directory addressable at `0xFFFFF000` and page
//! table `i` at `0xFFC00000 + i*0x1000` without a parallel physical
//! "table of tables".

use crate::arch::{invlpg, load_cr3, read_cr3};
use crate::config::{page_table_vaddr, PAGE_DIR_VADDR, PAGE_SIZE, RECURSIVE_PDE_INDEX};
use crate::error::KernelError;
use crate::mm::frame_allocator::{alloc_frame_or_fatal, frame_to_phys, FRAME_ALLOCATOR};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
    }
}

const FRAME_MASK: u32 = 0xFFFF_F000;

/// Directory/table entry word: 20-bit frame index plus flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u32);

impl Entry {
    const fn empty() -> Self {
        Entry(0)
    }

    fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    fn is_present(self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    fn frame_phys(self) -> u32 {
        self.0 & FRAME_MASK
    }

    fn new(frame_phys: u32, flags: EntryFlags) -> Self {
        Entry((frame_phys & FRAME_MASK) | flags.bits())
    }
}

fn pd_index(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

fn pt_index(vaddr: u32) -> usize {
    ((vaddr >> 12) & 0x3FF) as usize
}

fn page_index_to_vaddr(page_index: usize) -> u32 {
    (page_index as u32) * PAGE_SIZE as u32
}

/// Read-through access to the active address space via the recursive
/// mapping. All accesses here only touch `0xFFC00000..=0xFFFFFFFF`, which
/// is always valid once PDE[1023] has been installed.
fn directory() -> *mut Entry {
    PAGE_DIR_VADDR as *mut Entry
}

fn table(pd_idx: usize) -> *mut Entry {
    page_table_vaddr(pd_idx) as *mut Entry
}

/// Asserts the platform invariant from spec §3: PDE[1023] always maps to
/// the directory's own physical frame. Checked at points where its
/// violation would corrupt every subsequent lookup.
pub fn assert_recursive_mapping() {
    let pde1023 = unsafe { directory().add(RECURSIVE_PDE_INDEX).read_volatile() };
    if !pde1023.is_present() || pde1023.frame_phys() != read_cr3() {
        crate::error::fatal(KernelError::MissingRecursiveMapping);
    }
}

/// Ensures the page table covering `pd_idx` exists, allocating and zeroing
/// a fresh one if necessary, and returns its virtual (recursively-mapped)
/// address.
fn ensure_page_table(pd_idx: usize, user: bool) -> *mut Entry {
    let dir = directory();
    let pde = unsafe { dir.add(pd_idx).read_volatile() };
    if !pde.is_present() {
        let frame = alloc_frame_or_fatal();
        let phys = frame_to_phys(frame);
        let mut flags = EntryFlags::PRESENT | EntryFlags::WRITABLE;
        if user {
            flags |= EntryFlags::USER;
        }
        unsafe {
            dir.add(pd_idx).write_volatile(Entry::new(phys, flags));
            invlpg(page_table_vaddr(pd_idx));
        }
        let pt = table(pd_idx);
        for i in 0..1024 {
            unsafe { pt.add(i).write_volatile(Entry::empty()) };
        }
    }
    table(pd_idx)
}

/// Maps `page_index` to a freshly allocated frame with the requested
/// privilege/writability. Idempotent: a page already mapped is left
/// unchanged.
pub fn alloc_frame(page_index: usize, is_kernel: bool, is_writable: bool) -> usize {
    let vaddr = page_index_to_vaddr(page_index);
    let pd_idx = pd_index(vaddr);
    let pt_idx = pt_index(vaddr);
    let pt = ensure_page_table(pd_idx, !is_kernel);

    let existing = unsafe { pt.add(pt_idx).read_volatile() };
    if existing.is_present() {
        return crate::mm::frame_allocator::phys_to_frame(existing.frame_phys());
    }

    let frame = alloc_frame_or_fatal();
    let phys = frame_to_phys(frame);
    let mut flags = EntryFlags::PRESENT;
    if is_writable {
        flags |= EntryFlags::WRITABLE;
    }
    if !is_kernel {
        flags |= EntryFlags::USER;
    }
    unsafe {
        pt.add(pt_idx).write_volatile(Entry::new(phys, flags));
        invlpg(vaddr);
    }
    frame
}

/// Unmaps `page_index`, freeing its backing frame in the bitmap. No-op if
/// the PDE or PTE was already absent.
pub fn free_frame(page_index: usize) {
    let vaddr = page_index_to_vaddr(page_index);
    let pd_idx = pd_index(vaddr);
    let pt_idx = pt_index(vaddr);

    let dir = directory();
    let pde = unsafe { dir.add(pd_idx).read_volatile() };
    if !pde.is_present() {
        return;
    }
    let pt = table(pd_idx);
    let pte = unsafe { pt.add(pt_idx).read_volatile() };
    if !pte.is_present() {
        return;
    }
    let frame = crate::mm::frame_allocator::phys_to_frame(pte.frame_phys());
    FRAME_ALLOCATOR.lock().free(frame);
    unsafe {
        pt.add(pt_idx).write_volatile(Entry::empty());
        invlpg(vaddr);
    }
}

/// Frees every present user-region mapping, and the page tables that held
/// them, in the *active* address space (spec §4.I: "exit... releases its
/// user address space"). Called by the exiting process on itself before
/// any context switch away, so the recursive mapping still resolves
/// through its own directory. Leaves the directory frame itself alone —
/// that is only safe to free once nothing has `cr3` pointed at it anymore,
/// which [`free_directory`] handles once the reaping parent takes over.
pub fn free_user_address_space() {
    let kernel_pd_start = (crate::config::KERNEL_BASE >> 22) as usize;
    for pd_idx in 0..kernel_pd_start {
        let pde = unsafe { directory().add(pd_idx).read_volatile() };
        if !pde.is_present() {
            continue;
        }
        for pt_idx in 0..1024 {
            if pte_present(pd_idx, pt_idx) {
                free_frame(pd_idx * 1024 + pt_idx);
            }
        }
        let pt_frame = crate::mm::frame_allocator::phys_to_frame(pde.frame_phys());
        FRAME_ALLOCATOR.lock().free(pt_frame);
        unsafe {
            directory().add(pd_idx).write_volatile(Entry::empty());
            invlpg(page_table_vaddr(pd_idx));
        }
    }
}

/// Frees the frame backing a process's page directory. Must only be called
/// once nothing has `cr3` pointed at it anymore — i.e. after the reaping
/// parent, which runs under its own directory, has taken over (the rest of
/// the release, freeing its user mappings, happens earlier in
/// [`free_user_address_space`] while the exiting process was still active).
pub fn free_directory(phys: u32) {
    let frame = crate::mm::frame_allocator::phys_to_frame(phys);
    FRAME_ALLOCATOR.lock().free(frame);
}

fn pte_present(pd_idx: usize, pt_idx: usize) -> bool {
    let pde = unsafe { directory().add(pd_idx).read_volatile() };
    if !pde.is_present() {
        return false;
    }
    unsafe { table(pd_idx).add(pt_idx).read_volatile() }.is_present()
}

/// Scans page directory entries for the first run of `page_count`
/// contiguous unmapped pages. An absent PDE contributes 1024 free pages at
/// once; a present PDE is walked PTE by PTE.
pub fn first_contiguous_page_index(page_count: usize) -> Option<usize> {
    // PDE[1023] (recursive) and the PDEs of the kernel image are excluded
    // implicitly because they are always present and therefore never
    // contribute to a free run.
    let mut run_start: Option<usize> = None;
    let mut run_len = 0usize;

    for pd_idx in 0..RECURSIVE_PDE_INDEX {
        let pde = unsafe { directory().add(pd_idx).read_volatile() };
        if !pde.is_present() {
            if run_start.is_none() {
                run_start = Some(pd_idx * 1024);
            }
            run_len += 1024;
            if run_len >= page_count {
                return run_start;
            }
            continue;
        }
        for pt_idx in 0..1024 {
            let page_index = pd_idx * 1024 + pt_idx;
            if pte_present(pd_idx, pt_idx) {
                run_start = None;
                run_len = 0;
            } else {
                if run_start.is_none() {
                    run_start = Some(page_index);
                }
                run_len += 1;
                if run_len >= page_count {
                    return run_start;
                }
            }
        }
    }
    None
}

/// Rounds `size` up to whole pages, finds a contiguous virtual run, and
/// allocates a frame per page. Returns the start virtual address. No
/// per-allocation metadata is kept here; `mm::heap` layers finer-grained
/// allocation on top.
pub fn kmalloc(size: usize, is_kernel: bool, is_writable: bool) -> Option<u32> {
    let pages = size.div_ceil(PAGE_SIZE);
    let start = first_contiguous_page_index(pages)?;
    for i in 0..pages {
        alloc_frame(start + i, is_kernel, is_writable);
    }
    Some(page_index_to_vaddr(start))
}

// --- Quickmap: a single reserved page table slot used to briefly map an
// arbitrary physical frame into kernel space, for building a new page
// directory (fork) without switching `cr3` mid-construction. ---

const QUICKMAP_PD_INDEX: usize = RECURSIVE_PDE_INDEX - 1;

fn quickmap_vaddr() -> u32 {
    page_index_to_vaddr(QUICKMAP_PD_INDEX * 1024)
}

/// Temporarily maps physical frame `phys` at the quickmap window and
/// returns its virtual address. Caller must `quickunmap` before any other
/// quickmap user runs; this core is single-CPU and never preempted outside
/// syscalls, so the window is not reentrant.
fn quickmap(phys: u32) -> u32 {
    ensure_page_table(QUICKMAP_PD_INDEX, false);
    let pt = table(QUICKMAP_PD_INDEX);
    let vaddr = quickmap_vaddr();
    unsafe {
        pt.write_volatile(Entry::new(phys, EntryFlags::PRESENT | EntryFlags::WRITABLE));
        invlpg(vaddr);
    }
    vaddr
}

fn quickunmap() {
    let pt = table(QUICKMAP_PD_INDEX);
    let vaddr = quickmap_vaddr();
    unsafe {
        pt.write_volatile(Entry::empty());
        invlpg(vaddr);
    }
}

/// Clones the active address space for `fork` (spec §4.I step 1): the
/// kernel half (PDEs covering `KERNEL_BASE..`) is aliased by value into
/// the new directory since every process shares one kernel mapping; the
/// user half is copied page-by-page. Copy-on-write is not implemented
/// (spec explicitly allows a straight copy). Returns the new directory's
/// physical address.
pub fn clone_address_space() -> u32 {
    let new_dir_frame = alloc_frame_or_fatal();
    let new_dir_phys = frame_to_phys(new_dir_frame);
    let new_dir_vaddr = quickmap(new_dir_phys);
    let new_dir = new_dir_vaddr as *mut Entry;

    let kernel_pd_start = crate::config::KERNEL_BASE >> 22;
    for i in 0..1024 {
        unsafe { new_dir.add(i).write_volatile(Entry::empty()) };
    }
    for i in kernel_pd_start as usize..RECURSIVE_PDE_INDEX {
        let pde = unsafe { directory().add(i).read_volatile() };
        unsafe { new_dir.add(i).write_volatile(pde) };
    }
    // Recursive self-mapping for the new directory.
    unsafe {
        new_dir
            .add(RECURSIVE_PDE_INDEX)
            .write_volatile(Entry::new(new_dir_phys, EntryFlags::PRESENT | EntryFlags::WRITABLE));
    }
    quickunmap();

    for pd_idx in 0..kernel_pd_start as usize {
        let pde = unsafe { directory().add(pd_idx).read_volatile() };
        if !pde.is_present() {
            continue;
        }
        for pt_idx in 0..1024 {
            let page_index = pd_idx * 1024 + pt_idx;
            if !pte_present(pd_idx, pt_idx) {
                continue;
            }
            copy_user_page(page_index);
        }
    }
    new_dir_phys
}

/// Copies one user page from the *active* address space into the
/// directory built by `clone_address_space`, which must still be mapped at
/// `new_dir_phys` passed implicitly via the quickmap window's prior use —
/// instead this copies through a second quickmap of the destination frame,
/// keeping the function self-contained.
fn copy_user_page(page_index: usize) {
    let src_vaddr = page_index_to_vaddr(page_index);
    let dst_frame = alloc_frame_or_fatal();
    let dst_phys = frame_to_phys(dst_frame);
    let dst_vaddr = quickmap(dst_phys);
    unsafe {
        core::ptr::copy_nonoverlapping(src_vaddr as *const u8, dst_vaddr as *mut u8, PAGE_SIZE);
    }
    quickunmap();
    PENDING_CHILD_PAGES.lock().push((page_index, dst_phys));
}

/// Staging area between `copy_user_page` and the fork caller, which installs
/// these mappings into the child directory once it switches `cr3` to it.
/// Kept as a simple queue rather than threading the child directory pointer
/// through every helper, since fork is never concurrent with itself.
pub static PENDING_CHILD_PAGES: spin::Mutex<alloc::vec::Vec<(usize, u32)>> =
    spin::Mutex::new(alloc::vec::Vec::new());

/// Installs a PTE for `page_index` -> `phys` into the *active* directory,
/// used by `fork` after switching into the child's address space to apply
/// the pages staged by `clone_address_space`.
pub fn install_user_page(page_index: usize, phys: u32, writable: bool) {
    let pt = ensure_page_table(pd_index(page_index_to_vaddr(page_index)), true);
    let pt_idx = pt_index(page_index_to_vaddr(page_index));
    let mut flags = EntryFlags::PRESENT | EntryFlags::USER;
    if writable {
        flags |= EntryFlags::WRITABLE;
    }
    unsafe {
        pt.add(pt_idx).write_volatile(Entry::new(phys, flags));
        invlpg(page_index_to_vaddr(page_index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips_frame_and_flags() {
        let e = Entry::new(0x0040_0000, EntryFlags::PRESENT | EntryFlags::WRITABLE);
        assert_eq!(e.frame_phys(), 0x0040_0000);
        assert!(e.is_present());
        assert!(e.flags().contains(EntryFlags::WRITABLE));
    }

    #[test]
    fn pd_pt_index_decompose_vaddr() {
        let vaddr = 0xC010_3000u32;
        assert_eq!(pd_index(vaddr), 0x300);
        assert_eq!(pt_index(vaddr), 0x103);
    }
}
