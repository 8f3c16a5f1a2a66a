//! Kernel argument values and scalar type tags.

use crate::memory::Buffer;
use std::fmt;

/// Type tag of a by-value kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ScalarType {
    /// Size in bytes on the device.
    pub fn size(&self) -> usize {
        match self {
            ScalarType::Char | ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
            ScalarType::Long | ScalarType::ULong | ScalarType::Double => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ScalarType::Float | ScalarType::Double)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Char => "char",
            ScalarType::UChar => "uchar",
            ScalarType::Short => "short",
            ScalarType::UShort => "ushort",
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Long => "long",
            ScalarType::ULong => "ulong",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }

    /// Parse a kernel-language type name. `unsigned` selects the unsigned
    /// variant of integer types.
    pub fn from_name(name: &str, unsigned: bool) -> Option<Self> {
        let ty = match name {
            "char" => ScalarType::Char,
            "uchar" => ScalarType::UChar,
            "short" => ScalarType::Short,
            "ushort" => ScalarType::UShort,
            "int" => ScalarType::Int,
            "uint" => ScalarType::UInt,
            "long" => ScalarType::Long,
            "ulong" => ScalarType::ULong,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            _ => return None,
        };
        if !unsigned {
            return Some(ty);
        }
        match ty {
            ScalarType::Char => Some(ScalarType::UChar),
            ScalarType::Short => Some(ScalarType::UShort),
            ScalarType::Int => Some(ScalarType::UInt),
            ScalarType::Long => Some(ScalarType::ULong),
            ScalarType::Float | ScalarType::Double => None,
            unsigned_already => Some(unsigned_already),
        }
    }

    /// Whether a value tagged `self` may bind to a slot declared `declared`.
    ///
    /// Sizes and integer/float class must agree; signedness may differ since
    /// the bits are passed through unchanged.
    pub fn binds_to(&self, declared: ScalarType) -> bool {
        self.size() == declared.size() && self.is_float() == declared.is_float()
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Host types that map one-to-one onto a device scalar type.
pub trait Scalar: bytemuck::Pod + Send + Sync + 'static {
    const TYPE: ScalarType;
}

macro_rules! impl_scalar {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const TYPE: ScalarType = ScalarType::$tag;
            }

            impl From<$ty> for ScalarValue {
                fn from(v: $ty) -> Self {
                    ScalarValue::new(v)
                }
            }

            impl From<$ty> for ArgValue {
                fn from(v: $ty) -> Self {
                    ArgValue::Scalar(ScalarValue::new(v))
                }
            }
        )*
    };
}

impl_scalar! {
    i8 => Char,
    u8 => UChar,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
}

/// A tagged scalar stored as its little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarValue {
    ty: ScalarType,
    bytes: [u8; 8],
}

impl ScalarValue {
    pub fn new<T: Scalar>(value: T) -> Self {
        let mut bytes = [0u8; 8];
        let src = bytemuck::bytes_of(&value);
        bytes[..src.len()].copy_from_slice(src);
        Self { ty: T::TYPE, bytes }
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.ty
    }

    /// Reinterpret as `T`; `None` when `T` cannot bind to this value's tag.
    pub fn get<T: Scalar>(&self) -> Option<T> {
        if !T::TYPE.binds_to(self.ty) {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.bytes[..self.ty.size()]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.ty.size()]
    }
}

/// Value bound to one kernel argument slot.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Buffer(Buffer),
    /// Bytes of `__local` memory allocated per work-group.
    Local(usize),
    Scalar(ScalarValue),
}

impl ArgValue {
    /// `count` elements of `T` in local memory.
    pub fn local<T>(count: usize) -> Self {
        ArgValue::Local(count * std::mem::size_of::<T>())
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            ArgValue::Buffer(_) => "buffer".to_string(),
            ArgValue::Local(_) => "local memory size".to_string(),
            ArgValue::Scalar(v) => v.scalar_type().name().to_string(),
        }
    }
}

impl From<Buffer> for ArgValue {
    fn from(buffer: Buffer) -> Self {
        ArgValue::Buffer(buffer)
    }
}

impl From<&Buffer> for ArgValue {
    fn from(buffer: &Buffer) -> Self {
        ArgValue::Buffer(buffer.clone())
    }
}

impl From<ScalarValue> for ArgValue {
    fn from(value: ScalarValue) -> Self {
        ArgValue::Scalar(value)
    }
}
