//! The allocator abstraction.
//!
//! Modeled as a trait object rather than a reimplementation of a bespoke
//! `{malloc, realloc, free}` struct: the crate is safe/unsafe Rust
//! throughout, so an `Allocator` trait fits its own idiom better than
//! carrying a C-shaped vtable through code that never needs one. The
//! A C-shaped `{malloc, realloc, free}` struct is honored literally, but
//! only at the `capi` boundary (see [`crate::capi`]), for callers that are
//! not Rust.

use std::alloc::{alloc, dealloc, realloc, Layout};
use std::ptr;

const HEADER: usize = std::mem::size_of::<usize>();

fn layout_for(total: usize) -> Layout {
    Layout::from_size_align(total, std::mem::align_of::<usize>()).expect("requested allocation too large to align")
}

/// A pluggable allocator for the few call sites that hand memory back to a
/// non-Rust caller. Most
/// of the crate never touches this — it exists for the boundary, not the
/// core.
pub trait Allocator: Send + Sync {
    fn allocate(&self, size: usize) -> *mut u8;
    fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8;
    fn free(&self, ptr: *mut u8);
}

/// Wraps the global Rust allocator. Each block is prefixed with a header
/// recording its requested size, since malloc-style APIs don't carry a
/// `Layout` the way `std::alloc::dealloc`/`realloc` require; the header
/// reconstructs it.
pub struct StdlibAllocator;

impl Allocator for StdlibAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        unsafe {
            let raw = alloc(layout_for(size + HEADER));
            if raw.is_null() {
                return ptr::null_mut();
            }
            (raw as *mut usize).write(size);
            raw.add(HEADER)
        }
    }

    fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.allocate(new_size);
        }
        unsafe {
            let raw = ptr.sub(HEADER);
            let old_size = (raw as *mut usize).read();
            let new_raw = realloc(raw, layout_for(old_size + HEADER), new_size + HEADER);
            if new_raw.is_null() {
                return ptr::null_mut();
            }
            (new_raw as *mut usize).write(new_size);
            new_raw.add(HEADER)
        }
    }

    fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        unsafe {
            let raw = ptr.sub(HEADER);
            let size = (raw as *mut usize).read();
            dealloc(raw, layout_for(size + HEADER));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_write_free_round_trip() {
        let allocator = StdlibAllocator;
        let ptr = allocator.allocate(16);
        assert!(!ptr.is_null());
        unsafe {
            ptr.write_bytes(0xAB, 16);
            assert_eq!(*ptr, 0xAB);
        }
        allocator.free(ptr);
    }

    #[test]
    fn reallocate_preserves_leading_bytes() {
        let allocator = StdlibAllocator;
        let ptr = allocator.allocate(4);
        unsafe {
            ptr.write_bytes(7, 4);
        }
        let grown = allocator.reallocate(ptr, 32);
        assert!(!grown.is_null());
        unsafe {
            assert_eq!(*grown, 7);
        }
        allocator.free(grown);
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        StdlibAllocator.free(ptr::null_mut());
    }
}
