//! Atomic operations exposed to generated code.
//!
//! Every operation is sequentially consistent, matching the full-barrier
//! `__sync_*` builtins generated code was written against. The functions work
//! on raw locations because the operands live inside collector-managed
//! objects, not inside Rust atomics.

use std::sync::atomic::{self, Ordering};

mod sealed {
    pub trait Sealed {}
}

/// Integer types with a hardware atomic of the same width.
pub trait AtomicWord: Copy + Eq + sealed::Sealed {
    /// # Safety
    /// `location` must be valid, aligned to `size_of::<Self>()` and only
    /// accessed atomically while the call runs.
    unsafe fn compare_and_swap(location: *mut Self, expected: Self, desired: Self) -> Self;
    /// # Safety
    /// As [`AtomicWord::compare_and_swap`].
    unsafe fn fetch_and_add(location: *mut Self, delta: Self) -> Self;
    /// # Safety
    /// As [`AtomicWord::compare_and_swap`].
    unsafe fn fetch_and_sub(location: *mut Self, delta: Self) -> Self;
    /// # Safety
    /// As [`AtomicWord::compare_and_swap`].
    unsafe fn swap(location: *mut Self, value: Self) -> Self;
}

macro_rules! atomic_word {
    ($($ty:ty => $atomic:ident, $width:tt;)*) => {
        $(
            #[cfg(target_has_atomic = $width)]
            impl sealed::Sealed for $ty {}

            #[cfg(target_has_atomic = $width)]
            impl AtomicWord for $ty {
                #[inline]
                unsafe fn compare_and_swap(location: *mut Self, expected: Self, desired: Self) -> Self {
                    let cell = atomic::$atomic::from_ptr(location);
                    match cell.compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst) {
                        Ok(prev) | Err(prev) => prev,
                    }
                }

                #[inline]
                unsafe fn fetch_and_add(location: *mut Self, delta: Self) -> Self {
                    atomic::$atomic::from_ptr(location).fetch_add(delta, Ordering::SeqCst)
                }

                #[inline]
                unsafe fn fetch_and_sub(location: *mut Self, delta: Self) -> Self {
                    atomic::$atomic::from_ptr(location).fetch_sub(delta, Ordering::SeqCst)
                }

                #[inline]
                unsafe fn swap(location: *mut Self, value: Self) -> Self {
                    atomic::$atomic::from_ptr(location).swap(value, Ordering::SeqCst)
                }
            }
        )*
    };
}

atomic_word! {
    i8 => AtomicI8, "8";
    i16 => AtomicI16, "16";
    i32 => AtomicI32, "32";
    i64 => AtomicI64, "64";
    u8 => AtomicU8, "8";
    u16 => AtomicU16, "16";
    u32 => AtomicU32, "32";
    u64 => AtomicU64, "64";
    isize => AtomicIsize, "ptr";
    usize => AtomicUsize, "ptr";
}

/// Store `desired` if `*location == expected`; returns the value found.
///
/// # Safety
/// See [`AtomicWord::compare_and_swap`].
#[inline]
pub unsafe fn compare_and_swap<T: AtomicWord>(location: *mut T, expected: T, desired: T) -> T {
    T::compare_and_swap(location, expected, desired)
}

/// Pointer flavour of [`compare_and_swap`], for object reference fields.
///
/// # Safety
/// `location` must be valid and pointer-aligned.
#[inline]
pub unsafe fn compare_and_swap_ptr<T>(location: *mut *mut T, expected: *mut T, desired: *mut T) -> *mut T {
    let cell = atomic::AtomicPtr::from_ptr(location);
    match cell.compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(prev) | Err(prev) => prev,
    }
}

/// Wrapping add; returns the previous value.
///
/// # Safety
/// See [`AtomicWord::compare_and_swap`].
#[inline]
pub unsafe fn fetch_and_add<T: AtomicWord>(location: *mut T, delta: T) -> T {
    T::fetch_and_add(location, delta)
}

/// Wrapping subtract; returns the previous value.
///
/// # Safety
/// See [`AtomicWord::compare_and_swap`].
#[inline]
pub unsafe fn fetch_and_sub<T: AtomicWord>(location: *mut T, delta: T) -> T {
    T::fetch_and_sub(location, delta)
}

/// Unconditional exchange; returns the previous value.
///
/// # Safety
/// See [`AtomicWord::compare_and_swap`].
#[inline]
pub unsafe fn swap<T: AtomicWord>(location: *mut T, value: T) -> T {
    T::swap(location, value)
}

/// # Safety
/// `location` must be valid and pointer-aligned.
#[inline]
pub unsafe fn swap_ptr<T>(location: *mut *mut T, value: *mut T) -> *mut T {
    atomic::AtomicPtr::from_ptr(location).swap(value, Ordering::SeqCst)
}

/// Full two-way barrier.
#[inline]
pub fn memory_fence() {
    atomic::fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use std::thread;

    #[test]
    fn cas_swaps_on_match() {
        let mut v = 5i32;
        let prev = unsafe { compare_and_swap(&mut v, 5, 9) };
        assert_eq!(prev, 5);
        assert_eq!(v, 9);
    }

    #[test]
    fn cas_leaves_value_on_mismatch() {
        let mut v = 5u64;
        let prev = unsafe { compare_and_swap(&mut v, 4, 9) };
        assert_eq!(prev, 5);
        assert_eq!(v, 5);
    }

    #[test]
    fn fetch_ops_return_previous_value() {
        let mut v = 10i64;
        assert_eq!(unsafe { fetch_and_add(&mut v, 5) }, 10);
        assert_eq!(unsafe { fetch_and_sub(&mut v, 3) }, 15);
        assert_eq!(v, 12);
        assert_eq!(unsafe { swap(&mut v, -1) }, 12);
        assert_eq!(v, -1);
    }

    #[test]
    fn fetch_add_wraps() {
        let mut v = u8::MAX;
        assert_eq!(unsafe { fetch_and_add(&mut v, 1) }, u8::MAX);
        assert_eq!(v, 0);
        let mut w = i16::MIN;
        unsafe { fetch_and_sub(&mut w, 1) };
        assert_eq!(w, i16::MAX);
    }

    #[test]
    fn pointer_cas_and_swap() {
        let mut a = 1u32;
        let mut b = 2u32;
        let mut slot: *mut u32 = ptr::null_mut();
        let prev = unsafe { compare_and_swap_ptr(&mut slot, ptr::null_mut(), &mut a) };
        assert!(prev.is_null());
        assert_eq!(slot, &mut a as *mut u32);
        let prev = unsafe { swap_ptr(&mut slot, &mut b) };
        assert_eq!(prev, &mut a as *mut u32);
        assert_eq!(slot, &mut b as *mut u32);
    }

    #[test]
    fn concurrent_fetch_add_is_atomic() {
        struct Shared(*mut usize);
        unsafe impl Sync for Shared {}
        impl Shared {
            fn get(&self) -> *mut usize {
                self.0
            }
        }

        let mut counter = 0usize;
        let shared = Shared(&mut counter);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        unsafe { fetch_and_add(shared.get(), 1) };
                    }
                });
            }
        });
        memory_fence();
        assert_eq!(counter, 80_000);
    }

    #[test]
    fn cas_loop_counts_exactly() {
        struct Shared(*mut u32);
        unsafe impl Sync for Shared {}
        impl Shared {
            fn get(&self) -> *mut u32 {
                self.0
            }
        }

        let mut counter = 0u32;
        let shared = Shared(&mut counter);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..5_000 {
                        loop {
                            let seen = unsafe { fetch_and_add(shared.get(), 0) };
                            if unsafe { compare_and_swap(shared.get(), seen, seen + 1) } == seen {
                                break;
                            }
                        }
                    }
                });
            }
        });
        assert_eq!(counter, 20_000);
    }
}
