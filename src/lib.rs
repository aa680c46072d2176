//! aotrt: runtime support for ahead-of-time compiled managed code.
//!
//! Generated code calls into this crate for the few things it cannot emit
//! inline: atomics on object fields, frame-scoped stack memory, collector
//! allocation, interface-to-object adjustment, checked casts against the
//! portable type descriptors, and zero-divisor checks that raise managed
//! exceptions. Rust hosts use the modules directly; generated code links
//! against the `aotrt_*` symbols in [`ffi`].
//!
//! # Quick start
//!
//! ```rust
//! use aotrt::fault::{check_divide, FaultKind};
//! use aotrt::memory::AllocShape;
//! use aotrt::rtti::{self, TypeInfo};
//!
//! static OBJECT: TypeInfo = TypeInfo::class("System.Object", 8);
//! static STRING: TypeInfo = TypeInfo::single("System.String", 16, &OBJECT);
//! static LIST: TypeInfo = TypeInfo::single("System.List", 16, &OBJECT);
//!
//! let s = rtti::alloc_object(&STRING, AllocShape::General).unwrap().as_ptr();
//! let obj = unsafe { rtti::dynamic_cast_null_test_throw(s, &STRING, &OBJECT, -1) }.unwrap();
//! assert_eq!(obj, s);
//!
//! let err = unsafe { rtti::dynamic_cast_null_test_throw(obj, &OBJECT, &LIST, -1) }.unwrap_err();
//! assert_eq!(err.kind(), FaultKind::InvalidCast);
//!
//! assert_eq!(check_divide(7i32), Ok(7));
//! assert_eq!(check_divide(0u8).unwrap_err().kind(), FaultKind::DivideByZero);
//! ```

pub mod atomics;
pub mod config;
pub mod exception;
pub mod fault;
pub mod ffi;
pub mod header;
pub mod memory;
pub mod rtti;
pub mod runtime;
pub mod stack;
pub mod types;

mod test_lock;

pub use config::RuntimeConfig;
pub use exception::ExceptionClass;
pub use fault::{check_divide, Fault, FaultKind, Result, RuntimeError};
pub use header::interface_to_object;
pub use memory::{gc_malloc, gc_malloc_atomic, gc_malloc_atomic_ignore_off_page, gc_malloc_ignore_off_page};
pub use rtti::{dynamic_cast, dynamic_cast_null_test, dynamic_cast_null_test_throw, TypeInfo};
pub use runtime::Runtime;
pub use stack::StackFrame;
