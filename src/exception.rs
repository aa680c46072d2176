//! Exception construction protocol.
//!
//! Each fault kind maps to a managed exception class exposing two entry
//! points: `allocate` returns an uninitialized instance, `initialize` runs the
//! parameterless constructor on it. [`raise`] calls both in that order and
//! wraps the instance in a [`Fault`].
//!
//! Until the host installs its own classes, a built-in class allocates a
//! [`BuiltinException`] record through the allocation layer.

use std::ffi::{c_char, c_void};
use std::mem;
use std::ptr;
use std::sync::RwLock;

use tracing::debug;

use crate::fault::{Fault, FaultKind};
use crate::memory;

pub type AllocateFn = unsafe extern "C" fn() -> *mut c_void;
pub type InitializeFn = unsafe extern "C" fn(*mut c_void);

/// The two-step constructor of one managed exception type.
#[derive(Clone, Copy, Debug)]
pub struct ExceptionClass {
    pub name: &'static str,
    pub allocate: AllocateFn,
    pub initialize: InitializeFn,
}

impl ExceptionClass {
    pub const fn new(name: &'static str, allocate: AllocateFn, initialize: InitializeFn) -> Self {
        ExceptionClass {
            name,
            allocate,
            initialize,
        }
    }

    /// Class used for `kind` when the host has not installed one.
    pub const fn builtin(kind: FaultKind) -> Self {
        match kind {
            FaultKind::InvalidCast => ExceptionClass::new(
                kind.exception_name(),
                builtin_allocate,
                builtin_init_invalid_cast,
            ),
            FaultKind::DivideByZero => ExceptionClass::new(
                kind.exception_name(),
                builtin_allocate,
                builtin_init_divide_by_zero,
            ),
        }
    }
}

/// Instance layout produced by the built-in classes.
#[repr(C)]
#[derive(Debug)]
pub struct BuiltinException {
    pub kind: i32,
    /// NUL-terminated, static.
    pub message: *const c_char,
}

impl BuiltinException {
    pub fn kind(&self) -> Option<FaultKind> {
        FaultKind::from_code(self.kind)
    }
}

unsafe extern "C" fn builtin_allocate() -> *mut c_void {
    match memory::gc_malloc(mem::size_of::<BuiltinException>()) {
        Ok(p) => p.as_ptr().cast(),
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn builtin_init(this: *mut c_void, kind: FaultKind) {
    let message: &'static [u8] = match kind {
        FaultKind::InvalidCast => b"Specified cast is not valid.\0",
        FaultKind::DivideByZero => b"Attempted to divide by zero.\0",
    };
    this.cast::<BuiltinException>().write(BuiltinException {
        kind: kind as i32,
        message: message.as_ptr().cast(),
    });
}

unsafe extern "C" fn builtin_init_invalid_cast(this: *mut c_void) {
    builtin_init(this, FaultKind::InvalidCast)
}

unsafe extern "C" fn builtin_init_divide_by_zero(this: *mut c_void) {
    builtin_init(this, FaultKind::DivideByZero)
}

// Indexed by `FaultKind as usize - 1`.
static CLASSES: RwLock<[Option<ExceptionClass>; 2]> = RwLock::new([None, None]);

fn slot(kind: FaultKind) -> usize {
    kind as usize - 1
}

/// Route `kind` faults to a host-provided exception class.
pub fn install_exception_class(kind: FaultKind, class: ExceptionClass) {
    let mut classes = CLASSES.write().unwrap_or_else(|e| e.into_inner());
    classes[slot(kind)] = Some(class);
    debug!(kind = %kind, class = class.name, "installed exception class");
}

/// Go back to the built-in class for `kind`.
pub fn reset_exception_class(kind: FaultKind) {
    let mut classes = CLASSES.write().unwrap_or_else(|e| e.into_inner());
    classes[slot(kind)] = None;
}

/// The class currently used to raise `kind`.
pub fn exception_class(kind: FaultKind) -> ExceptionClass {
    let classes = CLASSES.read().unwrap_or_else(|e| e.into_inner());
    classes[slot(kind)].unwrap_or(ExceptionClass::builtin(kind))
}

/// Construct the exception for `kind` and return it as a fault.
///
/// Allocation failure inside the class yields a fault with a null payload;
/// `initialize` is never called on null.
pub fn raise(kind: FaultKind) -> Fault {
    let class = exception_class(kind);
    // SAFETY: installed classes uphold the allocate/initialize contract.
    let instance = unsafe { (class.allocate)() };
    if !instance.is_null() {
        unsafe { (class.initialize)(instance) };
    }
    Fault::new(kind, instance)
}
