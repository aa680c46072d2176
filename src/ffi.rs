//! C ABI consumed by generated code.
//!
//! Faults cannot unwind through `extern "C"`, so a faulting call records the
//! fault as the calling thread's pending fault and returns null (or the
//! divisor, for `check_divide`). Generated code tests
//! `aotrt_has_pending_fault` after each faultable call and dispatches to its
//! handler with `aotrt_take_pending_fault`.

#![allow(clippy::missing_safety_doc)]

use std::cell::Cell;
use std::ffi::{c_char, c_void};
use std::ptr;

use crate::{
    atomics,
    exception::{self, AllocateFn, ExceptionClass, InitializeFn},
    fault::{self, Fault, FaultKind},
    header,
    memory::{self, AllocShape, ExternAllocFn, ExternAllocator},
    rtti::{self, TypeInfo},
    stack,
    types::PrimKind,
};

// ── Pending fault ─────────────────────────────────────────────────────────────

thread_local! {
    static PENDING: Cell<Option<Fault>> = const { Cell::new(None) };
}

fn set_pending(fault: Fault) {
    PENDING.with(|p| p.set(Some(fault)));
}

/// Take the calling thread's pending fault, if any.
pub fn take_pending_fault() -> Option<Fault> {
    PENDING.with(|p| p.take())
}

#[no_mangle]
pub extern "C" fn aotrt_has_pending_fault() -> i32 {
    PENDING.with(|p| p.get().is_some()) as i32
}

/// Writes the fault kind code and exception pointer; returns 0 if nothing
/// was pending.
#[no_mangle]
pub unsafe extern "C" fn aotrt_take_pending_fault(kind: *mut i32, exception: *mut *mut c_void) -> i32 {
    match take_pending_fault() {
        Some(fault) => {
            if !kind.is_null() {
                *kind = fault.kind() as i32;
            }
            if !exception.is_null() {
                *exception = fault.exception();
            }
            1
        }
        None => 0,
    }
}

#[no_mangle]
pub extern "C" fn aotrt_clear_pending_fault() {
    PENDING.with(|p| p.set(None));
}

#[no_mangle]
pub extern "C" fn aotrt_fault_string(kind: i32) -> *const c_char {
    let s: &'static [u8] = match FaultKind::from_code(kind) {
        Some(FaultKind::InvalidCast) => b"invalid cast\0",
        Some(FaultKind::DivideByZero) => b"divide by zero\0",
        None => b"unknown fault\0",
    };
    s.as_ptr().cast()
}

/// Route `kind` faults to a host exception class. Passing null for either
/// function restores the built-in class. Returns -1 for an unknown kind.
#[no_mangle]
pub extern "C" fn aotrt_install_exception_class(
    kind: i32,
    allocate: Option<AllocateFn>,
    initialize: Option<InitializeFn>,
) -> i32 {
    let Some(kind) = FaultKind::from_code(kind) else {
        return -1;
    };
    match (allocate, initialize) {
        (Some(allocate), Some(initialize)) => exception::install_exception_class(
            kind,
            ExceptionClass::new(kind.exception_name(), allocate, initialize),
        ),
        _ => exception::reset_exception_class(kind),
    }
    0
}

/// Width in bytes of the primitive tagged `kind`; 0 for an unknown tag.
#[no_mangle]
pub extern "C" fn aotrt_prim_size(kind: u8) -> usize {
    PrimKind::from_u8(kind).map_or(0, PrimKind::size)
}

/// `PrimKind::FLAG_*` bits of the primitive tagged `kind`; 0 for an unknown
/// tag.
#[no_mangle]
pub extern "C" fn aotrt_prim_flags(kind: u8) -> u8 {
    PrimKind::from_u8(kind).map_or(0, PrimKind::flags)
}

// ── Atomics ───────────────────────────────────────────────────────────────────

macro_rules! export_atomics {
    ($($ty:ty => $cas:ident, $add:ident, $sub:ident, $swap:ident;)*) => {
        $(
            #[no_mangle]
            pub unsafe extern "C" fn $cas(location: *mut $ty, expected: $ty, desired: $ty) -> $ty {
                atomics::compare_and_swap(location, expected, desired)
            }

            #[no_mangle]
            pub unsafe extern "C" fn $add(location: *mut $ty, delta: $ty) -> $ty {
                atomics::fetch_and_add(location, delta)
            }

            #[no_mangle]
            pub unsafe extern "C" fn $sub(location: *mut $ty, delta: $ty) -> $ty {
                atomics::fetch_and_sub(location, delta)
            }

            #[no_mangle]
            pub unsafe extern "C" fn $swap(location: *mut $ty, value: $ty) -> $ty {
                atomics::swap(location, value)
            }
        )*
    };
}

export_atomics! {
    i32 => aotrt_compare_and_swap_i32, aotrt_fetch_and_add_i32, aotrt_fetch_and_sub_i32, aotrt_swap_i32;
    i64 => aotrt_compare_and_swap_i64, aotrt_fetch_and_add_i64, aotrt_fetch_and_sub_i64, aotrt_swap_i64;
    u32 => aotrt_compare_and_swap_u32, aotrt_fetch_and_add_u32, aotrt_fetch_and_sub_u32, aotrt_swap_u32;
    u64 => aotrt_compare_and_swap_u64, aotrt_fetch_and_add_u64, aotrt_fetch_and_sub_u64, aotrt_swap_u64;
    isize => aotrt_compare_and_swap_isize, aotrt_fetch_and_add_isize, aotrt_fetch_and_sub_isize, aotrt_swap_isize;
    usize => aotrt_compare_and_swap_usize, aotrt_fetch_and_add_usize, aotrt_fetch_and_sub_usize, aotrt_swap_usize;
}

#[no_mangle]
pub unsafe extern "C" fn aotrt_compare_and_swap_ptr(
    location: *mut *mut c_void,
    expected: *mut c_void,
    desired: *mut c_void,
) -> *mut c_void {
    atomics::compare_and_swap_ptr(location, expected, desired)
}

#[no_mangle]
pub unsafe extern "C" fn aotrt_swap_ptr(location: *mut *mut c_void, value: *mut c_void) -> *mut c_void {
    atomics::swap_ptr(location, value)
}

#[no_mangle]
pub extern "C" fn aotrt_memory_fence() {
    atomics::memory_fence();
}

// ── Shadow stack ──────────────────────────────────────────────────────────────

/// Returns the frame mark to pass to `aotrt_stack_leave`.
#[no_mangle]
pub extern "C" fn aotrt_stack_enter() -> usize {
    stack::stack_mark().unwrap_or(usize::MAX)
}

/// Null when the shadow stack is exhausted.
#[no_mangle]
pub extern "C" fn aotrt_stack_alloc(size: usize) -> *mut u8 {
    match stack::stack_alloc(size) {
        Ok(p) => p.as_ptr(),
        Err(_) => ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn aotrt_stack_leave(mark: usize) {
    if mark != usize::MAX {
        stack::stack_release(mark);
    }
}

// ── Allocation ────────────────────────────────────────────────────────────────

fn alloc_or_null(shape: AllocShape, size: usize) -> *mut u8 {
    match memory::allocate(shape, size) {
        Ok(p) => p.as_ptr(),
        Err(_) => ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "C" fn aotrt_gc_malloc(size: usize) -> *mut u8 {
    alloc_or_null(AllocShape::General, size)
}

#[no_mangle]
pub extern "C" fn aotrt_gc_malloc_atomic(size: usize) -> *mut u8 {
    alloc_or_null(AllocShape::Atomic, size)
}

#[no_mangle]
pub extern "C" fn aotrt_gc_malloc_ignore_off_page(size: usize) -> *mut u8 {
    alloc_or_null(AllocShape::IgnoreOffPage, size)
}

#[no_mangle]
pub extern "C" fn aotrt_gc_malloc_atomic_ignore_off_page(size: usize) -> *mut u8 {
    alloc_or_null(AllocShape::AtomicIgnoreOffPage, size)
}

#[no_mangle]
pub extern "C" fn aotrt_gc_malloc_array(shape: u8, header: usize, element_size: usize, len: usize) -> *mut u8 {
    let Some(shape) = AllocShape::from_u8(shape) else {
        return ptr::null_mut();
    };
    match memory::alloc_array(shape, header, element_size, len) {
        Ok(p) => p.as_ptr(),
        Err(_) => ptr::null_mut(),
    }
}

/// Install a calloc-shaped collector; null restores the system allocator.
#[no_mangle]
pub unsafe extern "C" fn aotrt_install_allocator(alloc: Option<ExternAllocFn>) {
    match alloc {
        Some(alloc) => memory::install_allocator(std::sync::Arc::new(ExternAllocator::new(alloc))),
        None => memory::reset_allocator(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn aotrt_mem_copy(dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
    memory::mem_copy(dst, src, len)
}

#[no_mangle]
pub unsafe extern "C" fn aotrt_mem_set(dst: *mut u8, value: i32, len: usize) -> *mut u8 {
    memory::mem_set(dst, value as u8, len)
}

// ── Objects and casts ─────────────────────────────────────────────────────────

#[no_mangle]
pub unsafe extern "C" fn aotrt_interface_to_object(iface: *mut c_void) -> *mut c_void {
    header::interface_to_object(iface)
}

/// Null for a null descriptor.
#[no_mangle]
pub unsafe extern "C" fn aotrt_dynamic_cast(
    src: *mut c_void,
    rtti_from: *const TypeInfo,
    rtti_to: *const TypeInfo,
    hint: i32,
) -> *mut c_void {
    match (rtti_from.as_ref(), rtti_to.as_ref()) {
        (Some(from), Some(to)) => rtti::dynamic_cast(src, from, to, hint),
        _ => ptr::null_mut(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn aotrt_dynamic_cast_null_test(
    src: *mut c_void,
    rtti_from: *const TypeInfo,
    rtti_to: *const TypeInfo,
    hint: i32,
) -> *mut c_void {
    if src.is_null() {
        return ptr::null_mut();
    }
    aotrt_dynamic_cast(src, rtti_from, rtti_to, hint)
}

/// On an invalid cast, returns null with an `InvalidCast` fault pending.
#[no_mangle]
pub unsafe extern "C" fn aotrt_dynamic_cast_null_test_throw(
    src: *mut c_void,
    rtti_from: *const TypeInfo,
    rtti_to: *const TypeInfo,
    hint: i32,
) -> *mut c_void {
    if src.is_null() {
        return ptr::null_mut();
    }
    let casted = aotrt_dynamic_cast(src, rtti_from, rtti_to, hint);
    if casted.is_null() {
        set_pending(exception::raise(FaultKind::InvalidCast));
    }
    casted
}

// ── Division ──────────────────────────────────────────────────────────────────

macro_rules! export_check_divide {
    ($($ty:ty => $name:ident;)*) => {
        $(
            /// Returns the divisor; a zero divisor leaves `DivideByZero` pending.
            #[no_mangle]
            pub extern "C" fn $name(divisor: $ty) -> $ty {
                if let Err(fault) = fault::check_divide(divisor) {
                    set_pending(fault);
                }
                divisor
            }
        )*
    };
}

export_check_divide! {
    i8 => aotrt_check_divide_i8;
    i16 => aotrt_check_divide_i16;
    i32 => aotrt_check_divide_i32;
    i64 => aotrt_check_divide_i64;
    u8 => aotrt_check_divide_u8;
    u16 => aotrt_check_divide_u16;
    u32 => aotrt_check_divide_u32;
    u64 => aotrt_check_divide_u64;
    f32 => aotrt_check_divide_f32;
    f64 => aotrt_check_divide_f64;
}

#[no_mangle]
pub extern "C" fn aotrt_fmod(lhs: f64, rhs: f64) -> f64 {
    fault::float_remainder(lhs, rhs)
}

#[no_mangle]
pub extern "C" fn aotrt_fmodf(lhs: f32, rhs: f32) -> f32 {
    fault::float_remainder(lhs, rhs)
}

/// Target of abstract vtable slots. Never returns.
#[no_mangle]
pub extern "C" fn aotrt_pure_virtual() -> ! {
    fault::pure_virtual_call()
}
