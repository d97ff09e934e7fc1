//! The C-ABI-shaped surface, feature-gated behind `capi`.
//!
//! A thin `#[no_mangle] extern "C"` shim over the safe Rust API, used only
//! by non-Rust embedders. Rust callers (including the adapter crates
//! themselves) use [`crate::facade`] directly and never link against this
//! module.
//!
//! This module covers the lifecycle, call, and introspection surface plus
//! the scalar/string value kinds; it does not re-expose every
//! `value_create_<kind>` variant (arrays/maps/pointers/functions have no
//! safe, useful representation as a bare `extern "C"` argument) — see
//! `DESIGN.md` for the scope this shim covers.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::path::PathBuf;
use std::ptr;

use crate::allocator::Allocator;
use crate::error::Status;
use crate::value::{Kind, Value};

/// The literal `{malloc, realloc, free}` shape, honored as-is at this
/// boundary for callers supplying their own allocator.
#[repr(C)]
pub struct AllocatorFns {
    pub malloc: extern "C" fn(usize) -> *mut c_void,
    pub realloc: extern "C" fn(*mut c_void, usize) -> *mut c_void,
    pub free: extern "C" fn(*mut c_void),
}

struct CApiAllocator(AllocatorFns);

impl Allocator for CApiAllocator {
    fn allocate(&self, size: usize) -> *mut u8 {
        (self.0.malloc)(size) as *mut u8
    }
    fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        (self.0.realloc)(ptr as *mut c_void, new_size) as *mut u8
    }
    fn free(&self, ptr: *mut u8) {
        (self.0.free)(ptr as *mut c_void)
    }
}

unsafe fn str_from_c(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(str::to_owned)
}

#[no_mangle]
pub extern "C" fn metacall_initialize() -> c_int_status {
    status_of(crate::facade::initialize())
}

#[no_mangle]
pub extern "C" fn metacall_destroy() -> c_int_status {
    status_of(crate::facade::destroy())
}

#[no_mangle]
pub extern "C" fn metacall_is_initialized() -> c_int_status {
    if crate::facade::is_initialized() {
        Status::Ok as c_int_status
    } else {
        Status::Error as c_int_status
    }
}

type c_int_status = i32;

fn status_of(result: crate::error::Result<()>) -> c_int_status {
    Status::from(&result) as c_int_status
}

/// Loads a file-based module. `paths` is a C array of NUL-terminated
/// strings of length `count`.
///
/// # Safety
/// `tag` must be a valid NUL-terminated string; `paths` must point to
/// `count` valid NUL-terminated strings for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn metacall_load_from_file(tag: *const c_char, paths: *const *const c_char, count: usize) -> c_int_status {
    let Some(tag) = str_from_c(tag) else { return Status::Error as c_int_status };
    let mut collected = Vec::with_capacity(count);
    for i in 0..count {
        let p = *paths.add(i);
        match str_from_c(p) {
            Some(s) => collected.push(PathBuf::from(s)),
            None => return Status::Error as c_int_status,
        }
    }
    status_of(crate::facade::load_from_file(&tag, &collected).map(|_| ()))
}

/// # Safety
/// `tag`, `name`, and `buffer` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn metacall_load_from_memory(tag: *const c_char, name: *const c_char, buffer: *const c_char) -> c_int_status {
    let (Some(tag), Some(name), Some(buffer)) = (str_from_c(tag), str_from_c(name), str_from_c(buffer)) else {
        return Status::Error as c_int_status;
    };
    status_of(crate::facade::load_from_memory(&tag, &name, &buffer).map(|_| ()))
}

/// Invokes `name` with scalar/string arguments converted from `Value`
/// pointers, returning a heap-allocated `Value` the caller must release
/// with [`metacall_value_destroy`].
///
/// # Safety
/// `name` must be a valid NUL-terminated string; `args` must point to
/// `size` valid, non-null `*mut Value` entries borrowed for this call only.
#[no_mangle]
pub unsafe extern "C" fn metacall_call(name: *const c_char, args: *const *mut Value, size: usize) -> *mut Value {
    let Some(name) = str_from_c(name) else { return ptr::null_mut() };
    let mut collected = Vec::with_capacity(size);
    for i in 0..size {
        let v = *args.add(i);
        if v.is_null() {
            return ptr::null_mut();
        }
        collected.push((*v).copy());
    }
    let result = crate::facade::metacall(&name, &collected);
    Box::into_raw(Box::new(result))
}

#[no_mangle]
pub extern "C" fn metacall_value_create_null() -> *mut Value {
    Box::into_raw(Box::new(Value::null()))
}

#[no_mangle]
pub extern "C" fn metacall_value_create_bool(v: c_int_status) -> *mut Value {
    Box::into_raw(Box::new(Value::bool(v != 0)))
}

#[no_mangle]
pub extern "C" fn metacall_value_create_long(v: i64) -> *mut Value {
    Box::into_raw(Box::new(Value::long(v)))
}

#[no_mangle]
pub extern "C" fn metacall_value_create_double(v: f64) -> *mut Value {
    Box::into_raw(Box::new(Value::double(v)))
}

/// # Safety
/// `s` must be a valid NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn metacall_value_create_string(s: *const c_char) -> *mut Value {
    match str_from_c(s) {
        Some(s) => Box::into_raw(Box::new(Value::string(s))),
        None => ptr::null_mut(),
    }
}

/// # Safety
/// `v` must be null or a pointer previously returned by one of this
/// module's `metacall_value_create_*`/`metacall_call` functions, not
/// already destroyed.
#[no_mangle]
pub unsafe extern "C" fn metacall_value_destroy(v: *mut Value) {
    if !v.is_null() {
        drop(Box::from_raw(v));
    }
}

/// # Safety
/// `v` must be a live, non-null `Value` pointer as above.
#[no_mangle]
pub unsafe extern "C" fn metacall_value_type_id(v: *const Value) -> c_int_status {
    if v.is_null() {
        return -1;
    }
    kind_tag((*v).kind())
}

fn kind_tag(kind: Kind) -> c_int_status {
    match kind {
        Kind::Bool => 0,
        Kind::Char => 1,
        Kind::Short => 2,
        Kind::Int => 3,
        Kind::Long => 4,
        Kind::Float => 5,
        Kind::Double => 6,
        Kind::String => 7,
        Kind::Buffer => 8,
        Kind::Array => 9,
        Kind::Map => 10,
        Kind::Pointer => 11,
        Kind::Future => 12,
        Kind::Function => 13,
        Kind::Class => 14,
        Kind::Object => 15,
        Kind::Exception => 16,
        Kind::Throwable => 17,
        Kind::Null => 18,
    }
}

/// Returns a caller-owned, NUL-terminated JSON string allocated through
/// `allocator`, writing its byte length (excluding the terminator) to
/// `size`.
///
/// # Safety
/// `size` must be a valid, non-null, writable `usize` pointer; `allocator`
/// must point to a valid [`AllocatorFns`] whose functions behave like
/// `malloc`/`realloc`/`free`.
#[no_mangle]
pub unsafe extern "C" fn metacall_inspect(size: *mut usize, allocator: *const AllocatorFns) -> *mut c_char {
    if size.is_null() || allocator.is_null() {
        return ptr::null_mut();
    }
    let Ok(json) = crate::facade::metacall_inspect() else {
        return ptr::null_mut();
    };
    let allocator = CApiAllocator(ptr::read(allocator));
    let c_string = match CString::new(json) {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };
    let bytes = c_string.as_bytes_with_nul();
    let raw = allocator.allocate(bytes.len());
    if raw.is_null() {
        return ptr::null_mut();
    }
    ptr::copy_nonoverlapping(bytes.as_ptr(), raw, bytes.len());
    *size = bytes.len() - 1;
    raw as *mut c_char
}
