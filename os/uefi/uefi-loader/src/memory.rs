#![allow(unsafe_code)]

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use core::ptr::NonNull;
use core::ptr::null_mut;
use uefi::boot;
use uefi::boot::MemoryType;

/// A UEFI Boot Services pool allocation to back Rust's global allocator.
///
/// # Notes
/// - Valid only while Boot Services are active (before `ExitBootServices`).
/// - We always over-allocate to satisfy alignment and store the original pointer
///   just before the returned aligned block for correct deallocation.
pub struct PoolAllocator;

#[global_allocator]
static GLOBAL_ALLOC: PoolAllocator = PoolAllocator;

unsafe impl GlobalAlloc for PoolAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Room for the header and for aligning up.
        let align = layout.align().max(size_of::<usize>());
        let size = layout.size().max(1);
        let Some(total) = size
            .checked_add(align)
            .and_then(|v| v.checked_add(size_of::<usize>()))
        else {
            return null_mut();
        };

        // Fails (and signals OOM) once boot services are gone.
        let Ok(raw) = boot::allocate_pool(MemoryType::LOADER_DATA, total) else {
            return null_mut();
        };

        let raw_ptr = raw.as_ptr();
        let offset = (raw_ptr as usize + size_of::<usize>()).next_multiple_of(align) - raw_ptr as usize;
        // SAFETY: `offset + size <= total`, so both pointers stay inside the pool block.
        unsafe {
            let aligned = raw_ptr.add(offset);
            ptr::write_unaligned(aligned.sub(size_of::<usize>()).cast::<*mut u8>(), raw_ptr);
            aligned
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }

        // SAFETY: `alloc` stored the pool pointer right before `ptr`.
        let orig_ptr = unsafe { ptr::read_unaligned(ptr.sub(size_of::<usize>()).cast::<*mut u8>()) };

        // SAFETY: `orig_ptr` was returned by `allocate_pool` and stored by us.
        let _ = unsafe { boot::free_pool(NonNull::new_unchecked(orig_ptr)) };
    }
}
