//! Runtime entry point benchmarks using Criterion.
//!
//! Run with: `cargo bench --bench runtime_bench`

use aotrt::{
    atomics,
    fault::{check_divide, RuntimeError},
    memory::{self, AllocShape, Allocator},
    rtti::{self, BaseEdge, TypeInfo},
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

// ── Type descriptors ──────────────────────────────────────────────────────────

static OBJECT: TypeInfo = TypeInfo::class("System.Object", 16);
static STREAM: TypeInfo = TypeInfo::single("IO.Stream", 24, &OBJECT);
static FILE_STREAM: TypeInfo = TypeInfo::single("IO.FileStream", 32, &STREAM);
static IDISPOSABLE: TypeInfo = TypeInfo::class("System.IDisposable", 8);
static ICLONEABLE: TypeInfo = TypeInfo::class("System.ICloneable", 8);
static BUFFERED_BASES: [BaseEdge; 3] = [
    BaseEdge::public(&FILE_STREAM, 0),
    BaseEdge::public(&IDISPOSABLE, 48),
    BaseEdge::public(&ICLONEABLE, 64),
];
static BUFFERED: TypeInfo = TypeInfo::multiple("IO.BufferedStream", 80, &BUFFERED_BASES, &[]);
static UNRELATED: TypeInfo = TypeInfo::class("IO.Pipe", 8);

/// Hands out the same zeroed block every time, so the allocation
/// benchmarks measure dispatch instead of heap growth.
struct Arena {
    block: NonNull<u8>,
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Allocator for Arena {
    fn alloc_zeroed(&self, _shape: AllocShape, size: usize) -> Result<NonNull<u8>, RuntimeError> {
        if size > ARENA_BYTES {
            return Err(RuntimeError::OutOfMemory { requested: size });
        }
        unsafe { self.block.as_ptr().write_bytes(0, size) };
        Ok(self.block)
    }
}

const ARENA_BYTES: usize = 4096;

fn new_object(ty: &'static TypeInfo) -> *mut c_void {
    rtti::alloc_object(ty, AllocShape::General).unwrap().as_ptr()
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_casts(c: &mut Criterion) {
    let obj = new_object(&BUFFERED);
    let disposable = unsafe { rtti::dynamic_cast(obj, &BUFFERED, &IDISPOSABLE, -1) };

    let mut group = c.benchmark_group("dynamic_cast");
    group.bench_function("identity", |b| {
        b.iter(|| unsafe { rtti::dynamic_cast(black_box(obj), &BUFFERED, &BUFFERED, -1) })
    });
    group.bench_function("upcast", |b| {
        b.iter(|| unsafe { rtti::dynamic_cast(black_box(obj), &BUFFERED, &OBJECT, -1) })
    });
    group.bench_function("downcast_hinted", |b| {
        b.iter(|| unsafe { rtti::dynamic_cast(black_box(disposable), &IDISPOSABLE, &BUFFERED, 48) })
    });
    group.bench_function("crosscast", |b| {
        b.iter(|| unsafe { rtti::dynamic_cast(black_box(disposable), &IDISPOSABLE, &ICLONEABLE, -1) })
    });
    group.bench_function("failed", |b| {
        b.iter(|| unsafe { rtti::dynamic_cast(black_box(disposable), &IDISPOSABLE, &UNRELATED, -1) })
    });
    group.finish();
}

fn bench_check_divide(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_divide");
    group.bench_function("i32", |b| b.iter(|| check_divide(black_box(7i32))));
    group.bench_function("f64", |b| b.iter(|| check_divide(black_box(0.5f64))));
    group.finish();
}

fn bench_atomics(c: &mut Criterion) {
    let mut value = 0u64;
    let mut group = c.benchmark_group("atomics");
    group.bench_function("compare_and_swap", |b| {
        b.iter(|| unsafe { atomics::compare_and_swap(&mut value, black_box(0), 0) })
    });
    group.bench_function("fetch_and_add", |b| {
        b.iter(|| unsafe { atomics::fetch_and_add(&mut value, black_box(1)) })
    });
    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let block = memory::gc_malloc_atomic(ARENA_BYTES).unwrap();
    memory::install_allocator(Arc::new(Arena { block }));

    let mut group = c.benchmark_group("gc_malloc");
    for size in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("general", size), &size, |b, &size| {
            b.iter(|| memory::gc_malloc(black_box(size)))
        });
    }
    group.bench_function("alloc_object", |b| b.iter(|| new_object(&BUFFERED)));
    group.finish();
    memory::reset_allocator();
}

criterion_group!(
    benches,
    bench_casts,
    bench_check_divide,
    bench_atomics,
    bench_allocation
);
criterion_main!(benches);
