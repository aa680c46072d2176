//! Canonical primitive aliases used by generated code.
//!
//! Generated code refers only to these names, never to raw machine types, so
//! width and signedness are pinned here once for every target.

use std::ffi::c_void;

pub type Void = c_void;
pub type Boolean = bool;
pub type SByte = i8;
pub type Int16 = i16;
pub type Int32 = i32;
pub type Int64 = i64;
pub type Byte = u8;
/// UTF-16 code unit. Always unsigned.
pub type Char = u16;
pub type UInt16 = u16;
pub type UInt32 = u32;
pub type UInt64 = u64;
pub type Single = f32;
pub type Double = f64;

/// Run-time tag for each primitive alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrimKind {
    Boolean = 0x01,
    SByte = 0x02,
    Int16 = 0x03,
    Int32 = 0x04,
    Int64 = 0x05,
    Byte = 0x06,
    Char = 0x07,
    UInt16 = 0x08,
    UInt32 = 0x09,
    UInt64 = 0x0A,
    Single = 0x0B,
    Double = 0x0C,
}

impl PrimKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(PrimKind::Boolean),
            0x02 => Some(PrimKind::SByte),
            0x03 => Some(PrimKind::Int16),
            0x04 => Some(PrimKind::Int32),
            0x05 => Some(PrimKind::Int64),
            0x06 => Some(PrimKind::Byte),
            0x07 => Some(PrimKind::Char),
            0x08 => Some(PrimKind::UInt16),
            0x09 => Some(PrimKind::UInt32),
            0x0A => Some(PrimKind::UInt64),
            0x0B => Some(PrimKind::Single),
            0x0C => Some(PrimKind::Double),
            _ => None,
        }
    }

    /// Width in bytes.
    pub const fn size(self) -> usize {
        match self {
            PrimKind::Boolean | PrimKind::SByte | PrimKind::Byte => 1,
            PrimKind::Int16 | PrimKind::Char | PrimKind::UInt16 => 2,
            PrimKind::Int32 | PrimKind::UInt32 | PrimKind::Single => 4,
            PrimKind::Int64 | PrimKind::UInt64 | PrimKind::Double => 8,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            PrimKind::SByte
                | PrimKind::Int16
                | PrimKind::Int32
                | PrimKind::Int64
                | PrimKind::Single
                | PrimKind::Double
        )
    }

    pub const fn is_float(self) -> bool {
        matches!(self, PrimKind::Single | PrimKind::Double)
    }

    /// Numeric kinds are the ones a division can be guarded on.
    pub const fn is_numeric(self) -> bool {
        !matches!(self, PrimKind::Boolean)
    }

    /// `FLAG_*` bits, as reported through the C ABI.
    pub const fn flags(self) -> u8 {
        let mut flags = 0;
        if self.is_signed() {
            flags |= Self::FLAG_SIGNED;
        }
        if self.is_float() {
            flags |= Self::FLAG_FLOAT;
        }
        if self.is_numeric() {
            flags |= Self::FLAG_NUMERIC;
        }
        flags
    }

    pub const FLAG_SIGNED: u8 = 0x1;
    pub const FLAG_FLOAT: u8 = 0x2;
    pub const FLAG_NUMERIC: u8 = 0x4;
}

/// A primitive that can appear as a divisor.
///
/// Zero is tested with the type's own `==`, so `-0.0` counts as zero and NaN
/// does not.
pub trait Numeric: Copy + PartialEq {
    const KIND: PrimKind;
    const ZERO: Self;

    #[inline]
    fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

macro_rules! numeric {
    ($($ty:ty => $kind:ident, $zero:expr;)*) => {
        $(
            impl Numeric for $ty {
                const KIND: PrimKind = PrimKind::$kind;
                const ZERO: Self = $zero;
            }
        )*
    };
}

// `Char` shares `u16` with `UInt16`; it divides as an unsigned 16-bit value.
numeric! {
    i8 => SByte, 0;
    i16 => Int16, 0;
    i32 => Int32, 0;
    i64 => Int64, 0;
    u8 => Byte, 0;
    u16 => UInt16, 0;
    u32 => UInt32, 0;
    u64 => UInt64, 0;
    f32 => Single, 0.0;
    f64 => Double, 0.0;
}
