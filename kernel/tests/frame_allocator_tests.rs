//! Frame bitmap scenario tests (spec §4.B) beyond the allocator's own
//! `#[cfg(test)]` unit tests: a simulated multiboot handoff (reserved
//! low-memory frames plus the kernel image) followed by exhaustion.

use simpleos_kernel::mm::frame_allocator::{frame_to_phys, phys_to_frame, FrameAllocator};

fn allocator_with(total_frames: usize, reserved: impl Iterator<Item = usize>) -> FrameAllocator {
    let mut a = FrameAllocator::empty();
    a.init(total_frames, reserved);
    a
}

#[test]
fn frame_and_phys_addr_round_trip() {
    assert_eq!(phys_to_frame(frame_to_phys(0)), 0);
    assert_eq!(phys_to_frame(frame_to_phys(17)), 17);
    assert_eq!(frame_to_phys(1), 4096);
}

#[test]
fn reserved_frames_from_a_simulated_memory_map_are_never_handed_out() {
    // Frame 0 (BIOS IVT/BDA) and frames 16..32 (a pretend kernel image) are
    // reserved, mirroring `MultibootInfo::reserved_frames`'s shape.
    let reserved = core::iter::once(0).chain(16..32);
    let mut a = allocator_with(64, reserved);
    for _ in 0..16 {
        let frame = a.allocate().expect("frame available below the reserved region");
        assert!(frame < 16, "allocator must skip the reserved [16, 32) run");
    }
    // Every frame below the reserved run is now used; the next allocation
    // must jump past the reserved run to [32, 64).
    let frame = a.allocate().unwrap();
    assert!(frame >= 32);
}

#[test]
fn exhausting_every_frame_returns_none_rather_than_panicking() {
    let mut a = allocator_with(4, core::iter::empty());
    for _ in 0..4 {
        a.allocate().unwrap();
    }
    assert_eq!(a.allocate(), None);
}

#[test]
fn freeing_lets_a_previously_exhausted_allocator_serve_again() {
    let mut a = allocator_with(2, core::iter::empty());
    let first = a.allocate().unwrap();
    let _second = a.allocate().unwrap();
    assert_eq!(a.allocate(), None);
    a.free(first);
    assert_eq!(a.allocate(), Some(first));
}

#[test]
fn count_used_tracks_the_initial_reserved_set() {
    let a = allocator_with(100, 0..10);
    assert_eq!(a.count_used(), 10);
}
