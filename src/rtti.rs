//! Run-time type descriptors and the cast routines built on them.
//!
//! Each managed class is described by a static [`TypeInfo`] emitted by the
//! code generator. Base edges carry byte offsets, so a cast is a search over
//! the subobject graph of the object's dynamic type rather than a call into
//! a compiler-specific ABI routine.
//!
//! Three cast entry points of increasing strictness are exposed:
//! [`dynamic_cast`] (no guard emitted by the caller), [`dynamic_cast_null_test`]
//! (null in, null out) and [`dynamic_cast_null_test_throw`] (raises
//! `InvalidCastException` when a non-null object does not convert). All three
//! return null for a null source.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::{Arc, OnceLock, RwLock};

use crate::exception;
use crate::fault::{FaultKind, Result, RuntimeError};
use crate::header::{self, ObjectHeader, HEADER_SIZE};
use crate::memory::{self, AllocShape};

/// Descriptor families generated code may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeKind {
    /// Class without bases.
    Class = 0,
    /// Class with exactly one public non-virtual base at offset zero.
    SingleInheritance = 1,
    /// Class with several bases, or any virtual or non-public base.
    VirtualMultiple = 2,
    Pointer = 3,
    PointerToMember = 4,
}

impl TypeKind {
    pub const fn is_class(self) -> bool {
        matches!(
            self,
            TypeKind::Class | TypeKind::SingleInheritance | TypeKind::VirtualMultiple
        )
    }
}

/// An edge from a class to one of its direct bases.
#[derive(Debug, Clone, Copy)]
pub struct BaseEdge {
    pub base: &'static TypeInfo,
    /// Offset of the base subobject inside the deriving subobject.
    /// Ignored for virtual bases, which are placed by the complete type.
    ///
    /// Every subobject at a distinct offset gets its own [`ObjectHeader`], so
    /// distinct subobject offsets must be at least [`HEADER_SIZE`] apart.
    pub offset: isize,
    pub public: bool,
    pub is_virtual: bool,
}

impl BaseEdge {
    pub const fn public(base: &'static TypeInfo, offset: isize) -> Self {
        BaseEdge {
            base,
            offset,
            public: true,
            is_virtual: false,
        }
    }

    pub const fn private(base: &'static TypeInfo, offset: isize) -> Self {
        BaseEdge {
            base,
            offset,
            public: false,
            is_virtual: false,
        }
    }

    pub const fn virtual_public(base: &'static TypeInfo) -> Self {
        BaseEdge {
            base,
            offset: 0,
            public: true,
            is_virtual: true,
        }
    }
}

/// Where a virtual base lives inside a complete object of the owning type.
#[derive(Debug, Clone, Copy)]
pub struct VirtualBaseOffset {
    pub base: &'static TypeInfo,
    pub offset: isize,
}

impl VirtualBaseOffset {
    pub const fn new(base: &'static TypeInfo, offset: isize) -> Self {
        VirtualBaseOffset { base, offset }
    }
}

/// Static descriptor of one type.
#[derive(Debug)]
pub struct TypeInfo {
    pub name: &'static str,
    pub kind: TypeKind,
    /// Instance size in bytes, measured from the base pointer.
    pub size: usize,
    /// The single base of a `SingleInheritance` type.
    pub primary: Option<&'static TypeInfo>,
    /// Bases of a `VirtualMultiple` type.
    pub bases: &'static [BaseEdge],
    /// Offsets of every virtual base in a complete object of this type.
    pub virtual_bases: &'static [VirtualBaseOffset],
    /// Pointee of a `Pointer`, member type of a `PointerToMember`.
    pub pointee: Option<&'static TypeInfo>,
    /// Class of a `PointerToMember`.
    pub context: Option<&'static TypeInfo>,
}

impl TypeInfo {
    const fn empty(name: &'static str, kind: TypeKind, size: usize) -> Self {
        TypeInfo {
            name,
            kind,
            size,
            primary: None,
            bases: &[],
            virtual_bases: &[],
            pointee: None,
            context: None,
        }
    }

    pub const fn class(name: &'static str, size: usize) -> Self {
        Self::empty(name, TypeKind::Class, size)
    }

    pub const fn single(name: &'static str, size: usize, base: &'static TypeInfo) -> Self {
        TypeInfo {
            primary: Some(base),
            ..Self::empty(name, TypeKind::SingleInheritance, size)
        }
    }

    pub const fn multiple(
        name: &'static str,
        size: usize,
        bases: &'static [BaseEdge],
        virtual_bases: &'static [VirtualBaseOffset],
    ) -> Self {
        TypeInfo {
            bases,
            virtual_bases,
            ..Self::empty(name, TypeKind::VirtualMultiple, size)
        }
    }

    pub const fn pointer(name: &'static str, pointee: &'static TypeInfo) -> Self {
        TypeInfo {
            pointee: Some(pointee),
            ..Self::empty(name, TypeKind::Pointer, std::mem::size_of::<usize>())
        }
    }

    pub const fn pointer_to_member(
        name: &'static str,
        context: &'static TypeInfo,
        member: &'static TypeInfo,
    ) -> Self {
        TypeInfo {
            pointee: Some(member),
            context: Some(context),
            ..Self::empty(name, TypeKind::PointerToMember, std::mem::size_of::<usize>())
        }
    }

    /// Direct base edges, whatever the descriptor family.
    pub fn base_edges(&self) -> impl Iterator<Item = BaseEdge> + '_ {
        self.primary
            .map(|base| BaseEdge::public(base, 0))
            .into_iter()
            .chain(self.bases.iter().copied())
    }

    fn virtual_base_offset(&self, base: &TypeInfo) -> Option<isize> {
        self.virtual_bases
            .iter()
            .find(|v| same_type(v.base, base))
            .map(|v| v.offset)
    }

    /// True if `self` is `other` or derives from it through public edges.
    pub fn is_subtype_of(&self, other: &TypeInfo) -> bool {
        same_type(self, other)
            || self
                .base_edges()
                .any(|e| e.public && e.base.is_subtype_of(other))
    }
}

/// Descriptors are compared by address, then by name so that copies of the
/// same descriptor emitted into separate images still match. Pointer
/// descriptors must also agree on what they point into.
pub fn same_type(a: &TypeInfo, b: &TypeInfo) -> bool {
    if ptr::eq(a, b) {
        return true;
    }
    a.kind == b.kind
        && a.name == b.name
        && same_link(a.pointee, b.pointee)
        && same_link(a.context, b.context)
}

fn same_link(a: Option<&TypeInfo>, b: Option<&TypeInfo>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => same_type(a, b),
        _ => false,
    }
}

/// Static placement hint for a cast (`src2dst_offset` of the Itanium C++ ABI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastHint {
    /// The source type is a unique public non-virtual base of the target,
    /// this many bytes into it.
    Offset(usize),
    NoHint,
    /// The source type is not a public base of the target.
    NotPublicBase,
    /// The source type occurs more than once as a public non-virtual base.
    MultiplePublicBase,
}

impl CastHint {
    pub const NO_HINT: i32 = -1;
    pub const NOT_PUBLIC_BASE: i32 = -2;
    pub const MULTIPLE_PUBLIC_BASE: i32 = -3;

    /// Unknown negative values degrade to [`CastHint::NoHint`].
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            n if n >= 0 => CastHint::Offset(n as usize),
            Self::NOT_PUBLIC_BASE => CastHint::NotPublicBase,
            Self::MULTIPLE_PUBLIC_BASE => CastHint::MultiplePublicBase,
            _ => CastHint::NoHint,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            CastHint::Offset(n) => n as i32,
            CastHint::NoHint => Self::NO_HINT,
            CastHint::NotPublicBase => Self::NOT_PUBLIC_BASE,
            CastHint::MultiplePublicBase => Self::MULTIPLE_PUBLIC_BASE,
        }
    }
}

// ── Subobject graph ─────────────────────────────────────────────────────────

/// One subobject of a complete object.
#[derive(Debug, Clone)]
pub struct Subobject {
    pub ty: &'static TypeInfo,
    /// Byte offset from the base pointer of the complete object.
    pub offset: isize,
    /// Direct bases as (index into the layout, reached through a public edge).
    pub bases: Vec<(usize, bool)>,
}

/// All subobjects of a complete `ty`, the complete object first. Virtual
/// bases appear once.
pub fn layout(ty: &'static TypeInfo) -> Arc<[Subobject]> {
    static LAYOUTS: OnceLock<RwLock<HashMap<usize, Arc<[Subobject]>>>> = OnceLock::new();
    let cache = LAYOUTS.get_or_init(Default::default);
    let key = ty as *const TypeInfo as usize;
    if let Some(hit) = cache.read().unwrap_or_else(|e| e.into_inner()).get(&key) {
        return hit.clone();
    }
    let mut nodes = Vec::new();
    let mut shared = Vec::new();
    collect(ty, ty, 0, &mut nodes, &mut shared);
    debug_assert!(
        header_overlap(&nodes).is_none(),
        "{}: subobject headers overlap at {:?}",
        ty.name,
        header_overlap(&nodes)
    );
    let built: Arc<[Subobject]> = nodes.into();
    cache
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .entry(key)
        .or_insert(built)
        .clone()
}

fn collect(
    complete: &'static TypeInfo,
    ty: &'static TypeInfo,
    offset: isize,
    nodes: &mut Vec<Subobject>,
    shared: &mut Vec<(&'static TypeInfo, usize)>,
) -> usize {
    let index = nodes.len();
    nodes.push(Subobject {
        ty,
        offset,
        bases: Vec::new(),
    });
    for edge in ty.base_edges() {
        let child = if edge.is_virtual {
            if let Some(&(_, existing)) = shared.iter().find(|(t, _)| same_type(t, edge.base)) {
                existing
            } else {
                // A virtual base the complete type does not place is a
                // malformed descriptor; the edge is dropped.
                let Some(at) = complete.virtual_base_offset(edge.base) else {
                    continue;
                };
                let child = collect(complete, edge.base, at, nodes, shared);
                shared.push((edge.base, child));
                child
            }
        } else {
            collect(complete, edge.base, offset + edge.offset, nodes, shared)
        };
        nodes[index].bases.push((child, edge.public));
    }
    index
}

/// First pair of distinct subobject offsets too close for both headers.
fn header_overlap(nodes: &[Subobject]) -> Option<(isize, isize)> {
    let mut offsets: Vec<isize> = nodes.iter().map(|n| n.offset).collect();
    offsets.sort_unstable();
    offsets.dedup();
    offsets
        .windows(2)
        .find(|w| w[1] - w[0] < HEADER_SIZE as isize)
        .map(|w| (w[0], w[1]))
}

/// True if `to` is `from` or reachable from it through public base edges.
fn publicly_contains(nodes: &[Subobject], from: usize, to: usize) -> bool {
    if from == to {
        return true;
    }
    nodes[from]
        .bases
        .iter()
        .any(|&(child, public)| public && publicly_contains(nodes, child, to))
}

/// Resolve a cast inside a complete object of type `dynamic`.
///
/// `src_offset` is the offset of the `from` subobject from the complete
/// object's base. Returns the offset of the target subobject.
pub fn resolve_cast(
    dynamic: &'static TypeInfo,
    src_offset: isize,
    from: &TypeInfo,
    to: &TypeInfo,
    hint: CastHint,
) -> Option<isize> {
    if !from.kind.is_class() || !to.kind.is_class() {
        return None;
    }
    let nodes = layout(dynamic);
    let src = nodes
        .iter()
        .position(|n| n.offset == src_offset && same_type(n.ty, from))?;

    if same_type(from, to) {
        return Some(src_offset);
    }

    if let CastHint::Offset(at) = hint {
        let candidate = src_offset - at as isize;
        let hit = nodes.iter().enumerate().any(|(i, n)| {
            n.offset == candidate && same_type(n.ty, to) && publicly_contains(&nodes, i, src)
        });
        if hit {
            return Some(candidate);
        }
    }

    // Upcast to a base of the source subobject.
    let mut upcast = nodes
        .iter()
        .enumerate()
        .filter(|(i, n)| same_type(n.ty, to) && publicly_contains(&nodes, src, *i));
    match (upcast.next(), upcast.next()) {
        (Some((_, n)), None) => return Some(n.offset),
        (Some(_), Some(_)) => return None,
        _ => {}
    }

    if hint != CastHint::NotPublicBase {
        let mut downcast = nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| same_type(n.ty, to) && publicly_contains(&nodes, *i, src));
        match (downcast.next(), downcast.next()) {
            (Some((_, n)), None) => return Some(n.offset),
            (Some(_), Some(_)) => return None,
            _ => {}
        }
    }

    // Cross-cast through the complete object.
    if !publicly_contains(&nodes, 0, src) {
        return None;
    }
    let mut targets = nodes
        .iter()
        .enumerate()
        .filter(|(i, n)| same_type(n.ty, to) && publicly_contains(&nodes, 0, *i));
    match (targets.next(), targets.next()) {
        (Some((_, n)), None) => Some(n.offset),
        _ => None,
    }
}

// ── Cast entry points ───────────────────────────────────────────────────────

/// Convert `src`, a pointer to a `from` subobject, into a pointer to its `to`
/// subobject, or null if the object has none. Null converts to null.
///
/// # Safety
/// A non-null `src` must point to a subobject with a valid header.
pub unsafe fn dynamic_cast(
    src: *mut c_void,
    from: &TypeInfo,
    to: &TypeInfo,
    hint: i32,
) -> *mut c_void {
    if src.is_null() {
        return ptr::null_mut();
    }
    let header = header::header_of(src);
    let Some(dynamic) = header.dynamic_type() else {
        return ptr::null_mut();
    };
    let base = src.cast::<u8>().offset(header.offset_to_base as isize);
    let src_offset = -(header.offset_to_base as isize);
    match resolve_cast(dynamic, src_offset, from, to, CastHint::from_raw(hint)) {
        Some(offset) => base.offset(offset).cast(),
        None => ptr::null_mut(),
    }
}

/// [`dynamic_cast`] with the null guard generated code emits before it.
///
/// # Safety
/// A non-null `src` must satisfy [`dynamic_cast`].
pub unsafe fn dynamic_cast_null_test(
    src: *mut c_void,
    from: &TypeInfo,
    to: &TypeInfo,
    hint: i32,
) -> *mut c_void {
    if src.is_null() {
        return ptr::null_mut();
    }
    dynamic_cast(src, from, to, hint)
}

/// Managed cast expression: null converts to null, a non-null object that
/// does not convert raises `InvalidCastException`.
///
/// # Safety
/// A non-null `src` must satisfy [`dynamic_cast`].
pub unsafe fn dynamic_cast_null_test_throw(
    src: *mut c_void,
    from: &TypeInfo,
    to: &TypeInfo,
    hint: i32,
) -> Result<*mut c_void> {
    if src.is_null() {
        return Ok(ptr::null_mut());
    }
    let casted = dynamic_cast(src, from, to, hint);
    if casted.is_null() {
        return Err(exception::raise(FaultKind::InvalidCast));
    }
    Ok(casted)
}

// ── Object construction ─────────────────────────────────────────────────────

/// Write the header of every subobject of a complete `ty` at `base`.
///
/// # Safety
/// `base` must point to `ty.size` bytes preceded by a header, and every
/// non-base subobject offset must leave room for its own header.
pub unsafe fn init_object(base: *mut c_void, ty: &'static TypeInfo) {
    let nodes = layout(ty);
    let mut written: Vec<isize> = Vec::with_capacity(nodes.len());
    for node in nodes.iter() {
        if written.contains(&node.offset) {
            continue;
        }
        written.push(node.offset);
        let subobject = base.cast::<u8>().offset(node.offset).cast::<c_void>();
        header::write_header(subobject, ObjectHeader::new(-(node.offset as i32), ty));
    }
}

/// Allocate a zeroed instance of `ty` and initialize its headers. Returns the
/// base pointer.
pub fn alloc_object(ty: &'static TypeInfo, shape: AllocShape) -> std::result::Result<NonNull<c_void>, RuntimeError> {
    let block = memory::allocate(shape, HEADER_SIZE + ty.size)?;
    // SAFETY: the block holds a header followed by `ty.size` bytes.
    unsafe {
        let base = block.as_ptr().add(HEADER_SIZE).cast::<c_void>();
        init_object(base, ty);
        Ok(NonNull::new_unchecked(base))
    }
}
