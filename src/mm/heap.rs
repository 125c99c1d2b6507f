//! Kernel Heap
//!
//! Uses `linked_list_allocator` to back `alloc` when the crate is linked
//! into a bare-metal kernel image. Hosted builds use the system allocator.
//!
//! # Security Considerations
//! - Heap is initialized once during boot, before the first process launch
//! - Page-sized buffers for processes come from [`super::frame::PagePool`],
//!   not from this heap directly, so the user pool budget is independent of
//!   kernel bookkeeping allocations

use linked_list_allocator::LockedHeap;
use spin::Once;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Kernel heap size. Page pools allocate their pages from here.
const HEAP_SIZE: usize = 8 * 1024 * 1024;

static mut HEAP_MEMORY: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

static HEAP_INIT: Once = Once::new();

/// Initialize the kernel heap. Must run before any allocation; later calls
/// are ignored.
pub fn init_heap() {
    HEAP_INIT.call_once(|| {
        // SAFETY:
        // - HEAP_MEMORY is a valid static array used by nothing else
        // - HEAP_INIT runs this body at most once
        unsafe {
            let heap_start = core::ptr::addr_of_mut!(HEAP_MEMORY) as *mut u8;
            ALLOCATOR.lock().init(heap_start, HEAP_SIZE);
        }
    });
}

/// Get the size of the kernel heap.
pub fn heap_size() -> usize {
    HEAP_SIZE
}

/// Bytes currently free in the kernel heap.
pub fn heap_free() -> usize {
    ALLOCATOR.lock().free()
}
