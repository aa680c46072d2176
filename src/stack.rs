//! Frame-scoped stack allocation.
//!
//! Rust has no `alloca`, so each thread owns a [`NativeStack`] (a shadow
//! stack) and generated code brackets its frames with [`StackFrame`]. Memory
//! returned by [`stack_alloc`] is reclaimed when the innermost frame is left;
//! using it afterwards, or from another thread, is undefined by contract.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::config;
use crate::fault::RuntimeError;

/// Alignment of every shadow stack allocation.
pub const STACK_ALIGN: usize = 16;

/// A downward-growing bump stack.
pub struct NativeStack {
    /// The backing buffer. Index 0 is the low end.
    storage: Box<[u8]>,
    /// Logical stack pointer; starts at the top (high offset).
    sp: usize,
    zero_fill: bool,
}

impl NativeStack {
    /// Allocate a new shadow stack of `size` bytes.
    pub fn new(size: usize, zero_fill: bool) -> Result<Self, RuntimeError> {
        if size == 0 {
            return Err(RuntimeError::ShadowStackOverflow {
                requested: 0,
                available: 0,
            });
        }
        Ok(NativeStack {
            storage: vec![0u8; size].into_boxed_slice(),
            sp: size,
            zero_fill,
        })
    }

    /// Current stack pointer offset (from the base of the storage).
    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// How many bytes are currently in use.
    pub fn depth(&self) -> usize {
        self.storage.len() - self.sp
    }

    /// Carve `size` bytes off the top, aligned to [`STACK_ALIGN`].
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, RuntimeError> {
        let base = self.storage.as_ptr() as usize;
        let top = base + self.sp;
        let overflow = RuntimeError::ShadowStackOverflow {
            requested: size,
            available: self.sp,
        };
        let start = top.checked_sub(size).ok_or(overflow.clone())? & !(STACK_ALIGN - 1);
        if start < base {
            return Err(overflow);
        }
        let offset = start - base;
        if self.zero_fill {
            self.storage[offset..self.sp].fill(0);
        }
        self.sp = offset;
        // SAFETY: offset is within storage.
        Ok(unsafe { NonNull::new_unchecked(self.storage.as_mut_ptr().add(offset)) })
    }

    /// Pop back to a stack pointer previously returned by [`NativeStack::sp`].
    pub fn restore(&mut self, mark: usize) {
        debug_assert!(mark >= self.sp && mark <= self.storage.len(), "frames left out of order");
        self.sp = mark.clamp(self.sp, self.storage.len());
    }

    /// Reset the stack to empty.
    pub fn reset(&mut self) {
        self.sp = self.storage.len();
    }
}

thread_local! {
    static SHADOW_STACK: RefCell<Option<NativeStack>> = const { RefCell::new(None) };
}

fn with_stack<R>(f: impl FnOnce(&mut NativeStack) -> Result<R, RuntimeError>) -> Result<R, RuntimeError> {
    SHADOW_STACK.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            let cfg = config::runtime_config();
            *slot = Some(NativeStack::new(
                cfg.shadow_stack_bytes,
                cfg.zero_stack_allocations,
            )?);
        }
        match slot.as_mut() {
            Some(stack) => f(stack),
            None => unreachable!("shadow stack initialized above"),
        }
    })
}

/// Current stack pointer of this thread's shadow stack.
pub fn stack_mark() -> Result<usize, RuntimeError> {
    with_stack(|s| Ok(s.sp()))
}

/// Pop this thread's shadow stack back to `mark`.
pub fn stack_release(mark: usize) {
    let _ = with_stack(|s| {
        s.restore(mark);
        Ok(())
    });
}

/// Allocate `size` bytes in the current frame.
pub fn stack_alloc(size: usize) -> Result<NonNull<u8>, RuntimeError> {
    with_stack(|s| s.alloc(size))
}

/// Bytes in use on this thread's shadow stack.
pub fn stack_depth() -> usize {
    with_stack(|s| Ok(s.depth())).unwrap_or(0)
}

/// Scope guard for one generated-code frame.
pub struct StackFrame {
    mark: usize,
    _not_send: PhantomData<*const ()>,
}

impl StackFrame {
    pub fn enter() -> Result<Self, RuntimeError> {
        Ok(StackFrame {
            mark: stack_mark()?,
            _not_send: PhantomData,
        })
    }

    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, RuntimeError> {
        stack_alloc(size)
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        stack_release(self.mark);
    }
}

/// Run `f` inside a fresh frame.
pub fn with_stack_frame<R>(f: impl FnOnce(&StackFrame) -> R) -> Result<R, RuntimeError> {
    let frame = StackFrame::enter()?;
    Ok(f(&frame))
}
