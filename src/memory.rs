//! Allocation indirection for collector-managed memory.
//!
//! Generated code picks the entry point that describes the shape of the
//! memory it wants; every entry point lands in the one installed
//! [`Allocator`] and comes back zero-filled. What the shapes mean is the
//! collector's business. The default [`SystemAllocator`] ignores them and
//! never frees.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::config;
use crate::fault::RuntimeError;

/// Alignment of every block handed out by [`SystemAllocator`].
pub const ALLOC_ALIGN: usize = 16;

/// What the collector needs to know about a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AllocShape {
    /// May contain pointers the collector must scan.
    General = 0,
    /// Holds no pointers.
    Atomic = 1,
    /// May contain pointers; exempt from the start-of-page placement rule.
    IgnoreOffPage = 2,
    AtomicIgnoreOffPage = 3,
}

impl AllocShape {
    pub const ALL: [AllocShape; 4] = [
        AllocShape::General,
        AllocShape::Atomic,
        AllocShape::IgnoreOffPage,
        AllocShape::AtomicIgnoreOffPage,
    ];

    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(AllocShape::General),
            1 => Some(AllocShape::Atomic),
            2 => Some(AllocShape::IgnoreOffPage),
            3 => Some(AllocShape::AtomicIgnoreOffPage),
            _ => None,
        }
    }

    pub const fn contains_pointers(self) -> bool {
        matches!(self, AllocShape::General | AllocShape::IgnoreOffPage)
    }

    pub const fn ignore_off_page(self) -> bool {
        matches!(self, AllocShape::IgnoreOffPage | AllocShape::AtomicIgnoreOffPage)
    }
}

/// The collector behind the entry points.
///
/// Implementations must return `size` zero bytes that do not overlap any
/// other live block.
pub trait Allocator: Send + Sync {
    fn alloc_zeroed(&self, shape: AllocShape, size: usize) -> Result<NonNull<u8>, RuntimeError>;

    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Heap-backed allocator; blocks are never reclaimed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn alloc_zeroed(&self, _shape: AllocShape, size: usize) -> Result<NonNull<u8>, RuntimeError> {
        if size == 0 {
            return Ok(NonNull::dangling());
        }
        let layout = Layout::from_size_align(size, ALLOC_ALIGN)
            .map_err(|_| RuntimeError::OutOfMemory { requested: size })?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(raw).ok_or(RuntimeError::OutOfMemory { requested: size })
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// A calloc-shaped C function used as the collector.
pub type ExternAllocFn = unsafe extern "C" fn(size: usize) -> *mut u8;

/// Adapts a C allocation function; a null return is an allocation failure.
#[derive(Clone, Copy)]
pub struct ExternAllocator {
    alloc: ExternAllocFn,
}

impl ExternAllocator {
    /// # Safety
    /// `alloc` must return null or `size` zeroed bytes that stay valid for as
    /// long as the collector keeps them alive.
    pub unsafe fn new(alloc: ExternAllocFn) -> Self {
        ExternAllocator { alloc }
    }
}

impl fmt::Debug for ExternAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternAllocator").finish_non_exhaustive()
    }
}

impl Allocator for ExternAllocator {
    fn alloc_zeroed(&self, _shape: AllocShape, size: usize) -> Result<NonNull<u8>, RuntimeError> {
        // SAFETY: upheld by `ExternAllocator::new`.
        let raw = unsafe { (self.alloc)(size) };
        NonNull::new(raw).ok_or(RuntimeError::OutOfMemory { requested: size })
    }

    fn name(&self) -> &'static str {
        "extern"
    }
}

static ALLOCATOR: RwLock<Option<Arc<dyn Allocator>>> = RwLock::new(None);

/// Route every entry point to `allocator`.
pub fn install_allocator(allocator: Arc<dyn Allocator>) {
    debug!(allocator = allocator.name(), "installed allocator");
    *ALLOCATOR.write().unwrap_or_else(|e| e.into_inner()) = Some(allocator);
}

/// Go back to [`SystemAllocator`].
pub fn reset_allocator() {
    *ALLOCATOR.write().unwrap_or_else(|e| e.into_inner()) = None;
}

pub fn allocator_name() -> &'static str {
    match &*ALLOCATOR.read().unwrap_or_else(|e| e.into_inner()) {
        Some(a) => a.name(),
        None => SystemAllocator.name(),
    }
}

// ── Telemetry ───────────────────────────────────────────────────────────────

static CALLS: [AtomicUsize; 4] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];
static BYTES: AtomicUsize = AtomicUsize::new(0);
static FAILURES: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocationTelemetry {
    /// Calls per entry point, indexed by `AllocShape as usize`.
    pub calls: [usize; 4],
    pub bytes: usize,
    pub failures: usize,
}

impl AllocationTelemetry {
    pub fn calls_for(&self, shape: AllocShape) -> usize {
        self.calls[shape as usize]
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().sum()
    }
}

pub fn allocation_telemetry() -> AllocationTelemetry {
    AllocationTelemetry {
        calls: [
            CALLS[0].load(Ordering::Relaxed),
            CALLS[1].load(Ordering::Relaxed),
            CALLS[2].load(Ordering::Relaxed),
            CALLS[3].load(Ordering::Relaxed),
        ],
        bytes: BYTES.load(Ordering::Relaxed),
        failures: FAILURES.load(Ordering::Relaxed),
    }
}

pub fn reset_allocation_telemetry() {
    for c in &CALLS {
        c.store(0, Ordering::Relaxed);
    }
    BYTES.store(0, Ordering::Relaxed);
    FAILURES.store(0, Ordering::Relaxed);
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Allocate `size` zeroed bytes of the given shape from the installed
/// allocator.
pub fn allocate(shape: AllocShape, size: usize) -> Result<NonNull<u8>, RuntimeError> {
    CALLS[shape as usize].fetch_add(1, Ordering::Relaxed);
    let limit = config::runtime_config().max_allocation_bytes;
    if size > limit {
        FAILURES.fetch_add(1, Ordering::Relaxed);
        warn!(
            size,
            limit,
            pointers = shape.contains_pointers(),
            ignore_off_page = shape.ignore_off_page(),
            "allocation exceeds configured limit"
        );
        return Err(RuntimeError::AllocationTooLarge {
            requested: size,
            limit,
        });
    }
    let result = match &*ALLOCATOR.read().unwrap_or_else(|e| e.into_inner()) {
        Some(a) => a.alloc_zeroed(shape, size),
        None => SystemAllocator.alloc_zeroed(shape, size),
    };
    match &result {
        Ok(_) => {
            BYTES.fetch_add(size, Ordering::Relaxed);
        }
        Err(err) => {
            FAILURES.fetch_add(1, Ordering::Relaxed);
            warn!(
                size,
                pointers = shape.contains_pointers(),
                ignore_off_page = shape.ignore_off_page(),
                %err,
                "allocation failed"
            );
        }
    }
    result
}

pub fn gc_malloc(size: usize) -> Result<NonNull<u8>, RuntimeError> {
    allocate(AllocShape::General, size)
}

pub fn gc_malloc_atomic(size: usize) -> Result<NonNull<u8>, RuntimeError> {
    allocate(AllocShape::Atomic, size)
}

pub fn gc_malloc_ignore_off_page(size: usize) -> Result<NonNull<u8>, RuntimeError> {
    allocate(AllocShape::IgnoreOffPage, size)
}

pub fn gc_malloc_atomic_ignore_off_page(size: usize) -> Result<NonNull<u8>, RuntimeError> {
    allocate(AllocShape::AtomicIgnoreOffPage, size)
}

/// Allocate a managed array body: `header` bytes followed by `len` elements
/// of `element_size` bytes.
pub fn alloc_array(
    shape: AllocShape,
    header: usize,
    element_size: usize,
    len: usize,
) -> Result<NonNull<u8>, RuntimeError> {
    let size = element_size
        .checked_mul(len)
        .and_then(|body| body.checked_add(header))
        .ok_or(RuntimeError::AllocationTooLarge {
            requested: usize::MAX,
            limit: config::runtime_config().max_allocation_bytes,
        })?;
    allocate(shape, size)
}

// ── Memory utilities ────────────────────────────────────────────────────────

/// Copy `len` bytes; the regions must not overlap.
///
/// # Safety
/// `src` must be readable and `dst` writable for `len` bytes.
#[inline]
pub unsafe fn mem_copy(dst: *mut u8, src: *const u8, len: usize) -> *mut u8 {
    ptr::copy_nonoverlapping(src, dst, len);
    dst
}

/// Fill `len` bytes at `dst` with `value`.
///
/// # Safety
/// `dst` must be writable for `len` bytes.
#[inline]
pub unsafe fn mem_set(dst: *mut u8, value: u8, len: usize) -> *mut u8 {
    ptr::write_bytes(dst, value, len);
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_lock::runtime_test_guard;
    use std::slice;

    fn all_zero(p: NonNull<u8>, n: usize) -> bool {
        unsafe { slice::from_raw_parts(p.as_ptr(), n) }
            .iter()
            .all(|&b| b == 0)
    }

    #[test]
    fn every_entry_point_returns_zeroed_memory() {
        let _guard = runtime_test_guard();
        let entry_points: [fn(usize) -> Result<NonNull<u8>, RuntimeError>; 4] = [
            gc_malloc,
            gc_malloc_atomic,
            gc_malloc_ignore_off_page,
            gc_malloc_atomic_ignore_off_page,
        ];
        for entry in entry_points {
            let p = entry(257).unwrap();
            assert!(all_zero(p, 257));
            assert_eq!(p.as_ptr() as usize % ALLOC_ALIGN, 0);
        }
    }

    #[test]
    fn distinct_blocks_do_not_overlap() {
        let _guard = runtime_test_guard();
        let a = gc_malloc(64).unwrap().as_ptr() as usize;
        let b = gc_malloc(64).unwrap().as_ptr() as usize;
        assert!(a + 64 <= b || b + 64 <= a);
    }

    #[test]
    fn zero_sized_request_succeeds() {
        let _guard = runtime_test_guard();
        assert!(gc_malloc_atomic(0).is_ok());
    }

    #[test]
    fn shape_flags() {
        assert!(AllocShape::General.contains_pointers());
        assert!(!AllocShape::Atomic.contains_pointers());
        assert!(AllocShape::AtomicIgnoreOffPage.ignore_off_page());
        assert!(!AllocShape::General.ignore_off_page());
        for shape in AllocShape::ALL {
            assert_eq!(AllocShape::from_u8(shape as u8), Some(shape));
        }
    }

    #[test]
    fn array_size_overflow_is_rejected() {
        let _guard = runtime_test_guard();
        assert!(matches!(
            alloc_array(AllocShape::Atomic, 16, usize::MAX, 2),
            Err(RuntimeError::AllocationTooLarge { .. })
        ));
        let p = alloc_array(AllocShape::Atomic, 16, 4, 10).unwrap();
        assert!(all_zero(p, 56));
    }

    struct Failing;

    impl Allocator for Failing {
        fn alloc_zeroed(&self, _: AllocShape, size: usize) -> Result<NonNull<u8>, RuntimeError> {
            Err(RuntimeError::OutOfMemory { requested: size })
        }
    }

    struct Recording(std::sync::Mutex<Vec<(AllocShape, usize)>>);

    impl Allocator for Recording {
        fn alloc_zeroed(&self, shape: AllocShape, size: usize) -> Result<NonNull<u8>, RuntimeError> {
            self.0.lock().unwrap().push((shape, size));
            SystemAllocator.alloc_zeroed(shape, size)
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[test]
    fn installed_allocator_sees_every_shape() {
        let _guard = runtime_test_guard();
        let recording = Arc::new(Recording(Default::default()));
        install_allocator(recording.clone());
        assert_eq!(allocator_name(), "recording");
        gc_malloc(8).unwrap();
        gc_malloc_atomic(16).unwrap();
        gc_malloc_ignore_off_page(24).unwrap();
        gc_malloc_atomic_ignore_off_page(32).unwrap();
        reset_allocator();
        assert_eq!(allocator_name(), "system");
        assert_eq!(
            *recording.0.lock().unwrap(),
            vec![
                (AllocShape::General, 8),
                (AllocShape::Atomic, 16),
                (AllocShape::IgnoreOffPage, 24),
                (AllocShape::AtomicIgnoreOffPage, 32),
            ]
        );
    }

    #[test]
    fn allocator_failure_is_passed_through() {
        let _guard = runtime_test_guard();
        install_allocator(Arc::new(Failing));
        let before = allocation_telemetry().failures;
        let err = gc_malloc(128).unwrap_err();
        reset_allocator();
        assert_eq!(err, RuntimeError::OutOfMemory { requested: 128 });
        assert!(allocation_telemetry().failures > before);
    }

    #[test]
    fn configured_limit_is_enforced() {
        let _guard = runtime_test_guard();
        let cfg = config::RuntimeConfig::builder()
            .max_allocation_bytes(1024)
            .build()
            .unwrap();
        config::install_runtime_config(cfg).unwrap();
        let err = gc_malloc(2048).unwrap_err();
        config::reset_runtime_config();
        assert_eq!(
            err,
            RuntimeError::AllocationTooLarge {
                requested: 2048,
                limit: 1024
            }
        );
    }

    #[test]
    fn mem_utilities() {
        let mut dst = [0u8; 8];
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
        unsafe {
            mem_copy(dst.as_mut_ptr(), src.as_ptr(), 8);
        }
        assert_eq!(dst, src);
        unsafe {
            mem_set(dst.as_mut_ptr().add(2), 0xAA, 4);
        }
        assert_eq!(dst, [1, 2, 0xAA, 0xAA, 0xAA, 0xAA, 7, 8]);
    }
}
