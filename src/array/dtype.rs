//! Element type tags

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ShmArrayError;

/// Element type of an array, carried on the wire as a string tag
///
/// Sharing never interprets element values, so types without a native Rust
/// representation (`F16`, `BF16`, complex, `Raw`) travel exactly like the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F16,
    BF16,
    F32,
    F64,
    C64,
    C128,
    /// Opaque fixed-width element of the given byte size
    Raw(usize),
}

impl DType {
    /// Size of one element in bytes
    pub fn itemsize(&self) -> usize {
        match self {
            DType::Bool | DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 | DType::C64 => 8,
            DType::C128 => 16,
            DType::Raw(size) => *size,
        }
    }

    /// Wire tag for this dtype
    pub fn as_str(&self) -> String {
        let tag = match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::U16 => "u16",
            DType::I16 => "i16",
            DType::U32 => "u32",
            DType::I32 => "i32",
            DType::U64 => "u64",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::C64 => "c64",
            DType::C128 => "c128",
            DType::Raw(size) => return format!("V{}", size),
        };
        tag.to_string()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl FromStr for DType {
    type Err = ShmArrayError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let dtype = match tag {
            "bool" => DType::Bool,
            "u8" => DType::U8,
            "i8" => DType::I8,
            "u16" => DType::U16,
            "i16" => DType::I16,
            "u32" => DType::U32,
            "i32" => DType::I32,
            "u64" => DType::U64,
            "i64" => DType::I64,
            "f16" => DType::F16,
            "bf16" => DType::BF16,
            "f32" => DType::F32,
            "f64" => DType::F64,
            "c64" => DType::C64,
            "c128" => DType::C128,
            other => {
                let size = other
                    .strip_prefix('V')
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|&n| n > 0)
                    .ok_or_else(|| {
                        ShmArrayError::invalid_parameter("dtype", format!("unknown dtype tag {:?}", other))
                    })?;
                DType::Raw(size)
            }
        };
        Ok(dtype)
    }
}

/// Native element types with a known dtype
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    /// Append the native-endian bytes of `self`
    fn write_bytes(self, out: &mut Vec<u8>);

    /// Decode from exactly `DTYPE.itemsize()` native-endian bytes
    fn read_bytes(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = $dtype;

                fn write_bytes(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }

                fn read_bytes(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_element! {
    u8 => DType::U8,
    i8 => DType::I8,
    u16 => DType::U16,
    i16 => DType::I16,
    u32 => DType::U32,
    i32 => DType::I32,
    u64 => DType::U64,
    i64 => DType::I64,
    f32 => DType::F32,
    f64 => DType::F64,
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn write_bytes(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_itemsize_matches_native_types() {
        assert_eq!(<f64 as Element>::DTYPE.itemsize(), std::mem::size_of::<f64>());
        assert_eq!(<i16 as Element>::DTYPE.itemsize(), std::mem::size_of::<i16>());
        assert_eq!(DType::C128.itemsize(), 16);
        assert_eq!(DType::Raw(12).itemsize(), 12);
    }

    #[test]
    fn test_tags_parse_back() {
        for dtype in [DType::Bool, DType::BF16, DType::F32, DType::C64, DType::Raw(24)] {
            assert_eq!(dtype.as_str().parse::<DType>().unwrap(), dtype);
        }
        assert_eq!(DType::Raw(3).to_string(), "V3");
    }

    #[test]
    fn test_unknown_tags_rejected() {
        assert!("float128".parse::<DType>().is_err());
        assert!("V0".parse::<DType>().is_err());
        assert!("V".parse::<DType>().is_err());
    }

    #[test]
    fn test_element_bytes() {
        let mut out = Vec::new();
        1.5f32.write_bytes(&mut out);
        true.write_bytes(&mut out);
        assert_eq!(out.len(), 5);
        assert_eq!(f32::read_bytes(&out[..4]), 1.5);
        assert!(bool::read_bytes(&out[4..]));
    }
}
