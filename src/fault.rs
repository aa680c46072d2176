//! Managed faults and the divide guard.
//!
//! A [`Fault`] is the Rust rendition of a thrown managed exception: the kind
//! tag plus the opaque pointer to the exception instance built by
//! [`crate::exception::raise`]. Propagate it with `?`; a handler matches on
//! [`Fault::kind`].

use std::ffi::c_void;
use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::exception;
use crate::types::Numeric;

/// The two fault kinds this layer raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FaultKind {
    InvalidCast = 1,
    DivideByZero = 2,
}

impl FaultKind {
    pub const ALL: [FaultKind; 2] = [FaultKind::InvalidCast, FaultKind::DivideByZero];

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(FaultKind::InvalidCast),
            2 => Some(FaultKind::DivideByZero),
            _ => None,
        }
    }

    /// Managed exception type raised for this kind.
    pub const fn exception_name(self) -> &'static str {
        match self {
            FaultKind::InvalidCast => "System.InvalidCastException",
            FaultKind::DivideByZero => "System.DivideByZeroException",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::InvalidCast => write!(f, "invalid cast"),
            FaultKind::DivideByZero => write!(f, "divide by zero"),
        }
    }
}

/// A raised fault carrying its exception instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} ({})", .kind.exception_name())]
pub struct Fault {
    kind: FaultKind,
    exception: *mut c_void,
}

// The payload is owned by the collector; the fault only carries its address.
unsafe impl Send for Fault {}
unsafe impl Sync for Fault {}

impl Fault {
    pub(crate) fn new(kind: FaultKind, exception: *mut c_void) -> Self {
        Fault { kind, exception }
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// Opaque pointer to the constructed exception instance.
    pub fn exception(&self) -> *mut c_void {
        self.exception
    }
}

pub type Result<T> = std::result::Result<T, Fault>;

/// Failures of the runtime itself, as opposed to managed faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("allocation of {requested} bytes exceeds the configured limit of {limit}")]
    AllocationTooLarge { requested: usize, limit: usize },
    #[error("shadow stack overflow: {requested} bytes requested, {available} available")]
    ShadowStackOverflow { requested: usize, available: usize },
    #[error("invalid runtime config: {0}")]
    InvalidConfig(&'static str),
}

/// Pass `divisor` through, or raise `DivideByZeroException` if it is zero.
///
/// Emitted as the denominator of every managed `/` and `%`.
#[inline]
pub fn check_divide<T: Numeric>(divisor: T) -> Result<T> {
    if divisor.is_zero() {
        return Err(exception::raise(FaultKind::DivideByZero));
    }
    Ok(divisor)
}

/// Floating-point remainder with C `fmod` semantics.
#[inline]
pub fn float_remainder<T: FloatRem>(lhs: T, rhs: T) -> T {
    lhs.rem(rhs)
}

pub trait FloatRem: Copy {
    fn rem(self, rhs: Self) -> Self;
}

impl FloatRem for f32 {
    #[inline]
    fn rem(self, rhs: Self) -> Self {
        self % rhs
    }
}

impl FloatRem for f64 {
    #[inline]
    fn rem(self, rhs: Self) -> Self {
        self % rhs
    }
}

/// Reached through an abstract vtable slot. Logs and aborts the process.
#[cold]
pub fn pure_virtual_call() -> ! {
    error!("pure virtual method called");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_lock::runtime_test_guard;

    #[test]
    fn zero_divisors_fault() {
        let _guard = runtime_test_guard();
        assert_eq!(check_divide(0i32).unwrap_err().kind(), FaultKind::DivideByZero);
        assert_eq!(check_divide(0u8).unwrap_err().kind(), FaultKind::DivideByZero);
        assert_eq!(check_divide(0i64).unwrap_err().kind(), FaultKind::DivideByZero);
        assert_eq!(check_divide(0.0f32).unwrap_err().kind(), FaultKind::DivideByZero);
        assert_eq!(check_divide(-0.0f64).unwrap_err().kind(), FaultKind::DivideByZero);
    }

    #[test]
    fn non_zero_divisors_pass_through() {
        let _guard = runtime_test_guard();
        assert_eq!(check_divide(7i32), Ok(7));
        assert_eq!(check_divide(-1i8), Ok(-1));
        assert_eq!(check_divide(u64::MAX), Ok(u64::MAX));
        assert_eq!(check_divide(0.5f32), Ok(0.5));
        assert!(check_divide(f64::NAN).unwrap().is_nan());
    }

    #[test]
    fn fault_carries_an_exception_instance() {
        let _guard = runtime_test_guard();
        let fault = check_divide(0u16).unwrap_err();
        assert!(!fault.exception().is_null());
    }

    #[test]
    fn fault_display() {
        let _guard = runtime_test_guard();
        let fault = check_divide(0i32).unwrap_err();
        assert_eq!(
            fault.to_string(),
            "divide by zero (System.DivideByZeroException)"
        );
    }

    #[test]
    fn kind_codes_roundtrip() {
        for kind in FaultKind::ALL {
            assert_eq!(FaultKind::from_code(kind as i32), Some(kind));
        }
        assert_eq!(FaultKind::from_code(0), None);
    }

    #[test]
    fn remainder_matches_fmod() {
        assert_eq!(float_remainder(5.5f64, 2.0), 1.5);
        assert_eq!(float_remainder(-5.5f64, 2.0), -1.5);
        assert!(float_remainder(1.0f32, 0.0).is_nan());
    }
}
