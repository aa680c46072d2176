//! Object header navigation.
//!
//! Every polymorphic subobject pointer `p` is preceded by an
//! [`ObjectHeader`]:
//!
//! ```text
//!   p - 2 words   offset_to_base: i32   (signed byte offset from p to the object base)
//!   p - 1 word    dynamic_type: *const TypeInfo
//!   p             first field of the subobject
//! ```
//!
//! The base object has a header too, with `offset_to_base == 0`.

use std::ffi::c_void;
use std::mem;
use std::ptr;

use crate::rtti::TypeInfo;

/// Two machine words preceding each subobject.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ObjectHeader {
    pub offset_to_base: i32,
    pub dynamic_type: *const TypeInfo,
}

pub const HEADER_SIZE: usize = mem::size_of::<ObjectHeader>();

const _: () = assert!(HEADER_SIZE == 2 * mem::size_of::<usize>());

impl ObjectHeader {
    pub const fn new(offset_to_base: i32, dynamic_type: &'static TypeInfo) -> Self {
        ObjectHeader {
            offset_to_base,
            dynamic_type,
        }
    }

    pub fn dynamic_type(&self) -> Option<&'static TypeInfo> {
        // SAFETY: headers only ever hold null or a `&'static TypeInfo`.
        unsafe { self.dynamic_type.as_ref() }
    }
}

/// The header in front of `subobject`.
///
/// # Safety
/// `subobject` must be non-null and point just past an initialized header.
#[inline]
pub unsafe fn header_of<'a>(subobject: *const c_void) -> &'a ObjectHeader {
    &*subobject.cast::<u8>().sub(HEADER_SIZE).cast::<ObjectHeader>()
}

/// Write the header in front of `subobject`.
///
/// # Safety
/// The two words before `subobject` must be writable and word-aligned.
#[inline]
pub unsafe fn write_header(subobject: *mut c_void, header: ObjectHeader) {
    subobject
        .cast::<u8>()
        .sub(HEADER_SIZE)
        .cast::<ObjectHeader>()
        .write(header);
}

/// Recover the base object from an interface pointer.
///
/// Null maps to null; otherwise the result is `iface` plus the signed 32-bit
/// offset stored two words before it.
///
/// # Safety
/// A non-null `iface` must be preceded by a valid header.
#[inline]
pub unsafe fn interface_to_object(iface: *mut c_void) -> *mut c_void {
    if iface.is_null() {
        return ptr::null_mut();
    }
    let offset = iface
        .cast::<u8>()
        .sub(2 * mem::size_of::<usize>())
        .cast::<i32>()
        .read();
    iface.cast::<u8>().offset(offset as isize).cast()
}
