//! Multiboot 1 info-structure parsing, just far enough to seed the frame
//! allocator (spec §4.B) from the BIOS memory map the bootloader already
//! built at a fixed low-memory address (spec §9b: "`ptr_multiboot_info->
//! mmap_addr`/`mmap_length`, flag bit 6 set").

extern crate alloc;

use crate::config::PAGE_SIZE;

const FLAG_MEM_MAP: u32 = 1 << 6;
const MMAP_TYPE_AVAILABLE: u32 = 1;

#[repr(C)]
struct RawInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    _syms: [u32; 4],
    mmap_length: u32,
    mmap_addr: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawMmapEntry {
    size: u32,
    base_addr: u64,
    length: u64,
    kind: u32,
}

pub struct MultibootInfo {
    mmap_addr: u32,
    mmap_length: u32,
}

impl MultibootInfo {
    /// Reads the info structure at `ptr` (the value the bootloader left in
    /// `ebx`). Returns `None` if the memory-map flag is unset, in which case
    /// boot cannot proceed with an accurate frame count.
    ///
    /// # Safety
    /// `ptr` must be the multiboot info pointer handed off by the
    /// bootloader, still mapped and unmodified since boot.
    pub unsafe fn read(ptr: u32) -> Option<Self> {
        let raw = unsafe { &*(ptr as *const RawInfo) };
        if raw.flags & FLAG_MEM_MAP == 0 {
            return None;
        }
        Some(MultibootInfo { mmap_addr: raw.mmap_addr, mmap_length: raw.mmap_length })
    }

    /// Walks the BIOS-supplied memory map. Each multiboot mmap entry is
    /// prefixed by its own `size` field (excluding the field itself), so
    /// entries are not a fixed stride.
    fn entries(&self) -> impl Iterator<Item = RawMmapEntry> + '_ {
        let mut offset = 0u32;
        core::iter::from_fn(move || {
            if offset >= self.mmap_length {
                return None;
            }
            // SAFETY: `mmap_addr..mmap_addr+mmap_length` was populated by the
            // bootloader before handoff and is still identity-mapped.
            let entry = unsafe { ((self.mmap_addr + offset) as *const RawMmapEntry).read_unaligned() };
            offset += entry.size + 4;
            Some(entry)
        })
    }

    /// Highest frame number covered by any `available` region, i.e. the
    /// frame count to hand to [`crate::mm::frame_allocator::FrameAllocator::init`].
    pub fn total_frames(&self) -> usize {
        self.entries()
            .filter(|e| e.kind == MMAP_TYPE_AVAILABLE)
            .map(|e| ((e.base_addr + e.length) / PAGE_SIZE as u64) as usize)
            .max()
            .unwrap_or(0)
    }

    /// Frames *not* covered by an available region, below `total_frames`.
    /// Fed to `FrameAllocator::init` as the initial used set; frame 0 (the
    /// BIOS IVT/BDA) is always included since no BIOS map marks it reserved
    /// on every implementation.
    pub fn reserved_frames(&self, total_frames: usize) -> alloc::vec::Vec<usize> {
        let mut used = alloc::vec![true; total_frames];
        for entry in self.entries().filter(|e| e.kind == MMAP_TYPE_AVAILABLE) {
            let start = (entry.base_addr / PAGE_SIZE as u64) as usize;
            let end = ((entry.base_addr + entry.length) / PAGE_SIZE as u64) as usize;
            for frame in start..end.min(total_frames) {
                used[frame] = false;
            }
        }
        used[0] = true;
        used.iter()
            .enumerate()
            .filter_map(|(frame, &is_used)| is_used.then_some(frame))
            .collect()
    }
}
