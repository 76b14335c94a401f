use std::fmt::Debug;

use num_traits::Num;

use crate::errors::{Error, Result};

/// The type of a single array element or attribute value.
///
/// The discriminant is the stable code used in the persisted format.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,
    Float32 = 9,
    Float64 = 10,
    Char = 11,
}

impl PrimitiveType {
    /// Size in bytes of one element of this type.
    pub fn size(&self) -> usize {
        match self {
            PrimitiveType::Int8 | PrimitiveType::UInt8 | PrimitiveType::Char => 1,
            PrimitiveType::Int16 | PrimitiveType::UInt16 => 2,
            PrimitiveType::Int32 | PrimitiveType::UInt32 | PrimitiveType::Float32 => 4,
            PrimitiveType::Int64 | PrimitiveType::UInt64 | PrimitiveType::Float64 => 8,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Look up a type by its persisted code.
    ///
    pub fn from_code(code: u8) -> Result<Self> {
        let dtype = match code {
            1 => PrimitiveType::Int8,
            2 => PrimitiveType::Int16,
            3 => PrimitiveType::Int32,
            4 => PrimitiveType::Int64,
            5 => PrimitiveType::UInt8,
            6 => PrimitiveType::UInt16,
            7 => PrimitiveType::UInt32,
            8 => PrimitiveType::UInt64,
            9 => PrimitiveType::Float32,
            10 => PrimitiveType::Float64,
            11 => PrimitiveType::Char,
            _ => {
                return Err(Error::InvalidShape(format!(
                    "unrecognized element type code {code}"
                )));
            }
        };

        Ok(dtype)
    }
}

/// A Rust scalar type that can be stored as an array element.
///
/// Element bytes are kept in native byte order, the same layout a caller's raw buffer has.
///
pub trait Element: Num + Copy + Debug + Send + Sync + 'static {
    const TYPE: PrimitiveType;

    fn write_bytes(&self, out: &mut Vec<u8>);

    fn read_bytes(bytes: &[u8]) -> Self;
}

macro_rules! element {
    ($type:ty, $dtype:ident) => {
        impl Element for $type {
            const TYPE: PrimitiveType = PrimitiveType::$dtype;

            fn write_bytes(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_bytes(bytes: &[u8]) -> Self {
                let mut buffer = [0; std::mem::size_of::<$type>()];
                buffer.copy_from_slice(&bytes[..std::mem::size_of::<$type>()]);

                <$type>::from_ne_bytes(buffer)
            }
        }
    };
}

element!(i8, Int8);
element!(i16, Int16);
element!(i32, Int32);
element!(i64, Int64);
element!(u8, UInt8);
element!(u16, UInt16);
element!(u32, UInt32);
element!(u64, UInt64);
element!(f32, Float32);
element!(f64, Float64);

/// Encode a slice of elements as bytes.
///
pub(crate) fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * T::TYPE.size());
    for value in values {
        value.write_bytes(&mut bytes);
    }

    bytes
}

/// Decode bytes as elements of type `T`, checking that `T` matches `dtype`.
///
pub(crate) fn from_bytes<T: Element>(dtype: PrimitiveType, bytes: &[u8]) -> Result<Vec<T>> {
    // Char values are byte strings and may be read as u8
    let compatible = T::TYPE == dtype || (dtype == PrimitiveType::Char && T::TYPE.size() == 1);
    if !compatible {
        return Err(Error::TypeMismatch(format!(
            "stored as {dtype:?}, requested as {:?}",
            T::TYPE
        )));
    }

    Ok(bytes
        .chunks_exact(T::TYPE.size())
        .map(T::read_bytes)
        .collect())
}
