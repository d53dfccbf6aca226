//! Kernel heap (spec §4.D), layered atop `mm::paging::kmalloc`'s
//! page-granular virtual allocator. Growth: when the backing
//! `linked_list_allocator::Heap` runs dry, request another contiguous run
//! of pages from paging and extend it.

use crate::config::PAGE_SIZE;
use crate::mm::paging;
use core::alloc::{GlobalAlloc, Layout};
use linked_list_allocator::Heap;
use spin::Mutex;

/// Pages requested per heap-growth step.
const GROWTH_PAGES: usize = 16;

pub struct KernelHeap {
    inner: Mutex<Heap>,
}

impl KernelHeap {
    const fn empty() -> Self {
        KernelHeap {
            inner: Mutex::new(Heap::empty()),
        }
    }

    /// Carves out the initial heap region via `paging::kmalloc` and hands
    /// it to the backing allocator. Must run once during boot.
    pub fn init(&self, initial_pages: usize) {
        let size = initial_pages * PAGE_SIZE;
        let start = paging::kmalloc(size, true, true).expect("initial kernel heap region");
        unsafe {
            self.inner.lock().init(start as *mut u8, size);
        }
    }

    fn grow(&self) -> bool {
        let size = GROWTH_PAGES * PAGE_SIZE;
        match paging::kmalloc(size, true, true) {
            Some(start) => {
                unsafe {
                    self.inner.lock().extend(size);
                    let _ = start;
                }
                true
            }
            None => false,
        }
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        loop {
            let attempt = self.inner.lock().allocate_first_fit(layout);
            match attempt {
                Ok(ptr) => return ptr.as_ptr(),
                Err(_) if self.grow() => continue,
                Err(_) => return core::ptr::null_mut(),
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(nn) = core::ptr::NonNull::new(ptr) {
            unsafe {
                self.inner.lock().deallocate(nn, layout);
            }
        }
    }
}

#[cfg_attr(not(test), global_allocator)]
pub static ALLOCATOR: KernelHeap = KernelHeap::empty();

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
    panic!("kernel heap allocation failed: {layout:?}");
}
