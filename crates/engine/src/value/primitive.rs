// SDB - CLR Snapshot Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Primitive scalar values, one representation per numeric/boolean/char
//! width.

use crate::{
    error::{Error, Result},
    runtime::ElementType,
};

/// The scalar payload of a primitive value.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum PrimitiveKind {
    Boolean(bool),
    Char(char),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    IntPtr(i64),
    UIntPtr(u64),
}

/// A primitive value with its width-tagged payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveValue {
    /// The tagged scalar.
    pub kind: PrimitiveKind,
}

macro_rules! read_le {
    ($bytes:expr, $ty:ty, $what:literal) => {{
        let bytes: &[u8] = $bytes;
        const N: usize = std::mem::size_of::<$ty>();
        if bytes.len() < N {
            return Err(Error::Unresolvable(format!(
                "{} value too short: {} bytes",
                $what,
                bytes.len()
            )));
        }
        let mut buf = [0u8; N];
        buf.copy_from_slice(&bytes[..N]);
        <$ty>::from_le_bytes(buf)
    }};
}

impl PrimitiveValue {
    /// Builds a primitive from raw little-endian debuggee bytes.
    pub fn from_bytes(element_type: ElementType, bytes: &[u8]) -> Result<Self> {
        let kind = match element_type {
            ElementType::Boolean => {
                PrimitiveKind::Boolean(*bytes.first().ok_or_else(|| {
                    Error::Unresolvable("boolean value has no bytes".to_string())
                })? != 0)
            }
            ElementType::Char => {
                let unit = read_le!(bytes, u16, "char");
                PrimitiveKind::Char(char::from_u32(u32::from(unit)).unwrap_or('\u{fffd}'))
            }
            ElementType::I1 => PrimitiveKind::SByte(read_le!(bytes, i8, "sbyte")),
            ElementType::U1 => PrimitiveKind::Byte(read_le!(bytes, u8, "byte")),
            ElementType::I2 => PrimitiveKind::Int16(read_le!(bytes, i16, "int16")),
            ElementType::U2 => PrimitiveKind::UInt16(read_le!(bytes, u16, "uint16")),
            ElementType::I4 => PrimitiveKind::Int32(read_le!(bytes, i32, "int32")),
            ElementType::U4 => PrimitiveKind::UInt32(read_le!(bytes, u32, "uint32")),
            ElementType::I8 => PrimitiveKind::Int64(read_le!(bytes, i64, "int64")),
            ElementType::U8 => PrimitiveKind::UInt64(read_le!(bytes, u64, "uint64")),
            ElementType::R4 => PrimitiveKind::Single(read_le!(bytes, f32, "single")),
            ElementType::R8 => PrimitiveKind::Double(read_le!(bytes, f64, "double")),
            ElementType::I => PrimitiveKind::IntPtr(read_le!(bytes, i64, "intptr")),
            ElementType::U => PrimitiveKind::UIntPtr(read_le!(bytes, u64, "uintptr")),
            other => {
                return Err(Error::NotImplemented(format!(
                    "element type {other:?} is not primitive"
                )))
            }
        };
        Ok(Self { kind })
    }

    /// The element type of this primitive.
    pub fn element_type(&self) -> ElementType {
        match self.kind {
            PrimitiveKind::Boolean(_) => ElementType::Boolean,
            PrimitiveKind::Char(_) => ElementType::Char,
            PrimitiveKind::SByte(_) => ElementType::I1,
            PrimitiveKind::Byte(_) => ElementType::U1,
            PrimitiveKind::Int16(_) => ElementType::I2,
            PrimitiveKind::UInt16(_) => ElementType::U2,
            PrimitiveKind::Int32(_) => ElementType::I4,
            PrimitiveKind::UInt32(_) => ElementType::U4,
            PrimitiveKind::Int64(_) => ElementType::I8,
            PrimitiveKind::UInt64(_) => ElementType::U8,
            PrimitiveKind::Single(_) => ElementType::R4,
            PrimitiveKind::Double(_) => ElementType::R8,
            PrimitiveKind::IntPtr(_) => ElementType::I,
            PrimitiveKind::UIntPtr(_) => ElementType::U,
        }
    }

    /// Renders the scalar the way the managed runtime prints it.
    pub fn render(&self) -> String {
        match self.kind {
            PrimitiveKind::Boolean(v) => if v { "True" } else { "False" }.to_string(),
            PrimitiveKind::Char(v) => v.to_string(),
            PrimitiveKind::SByte(v) => v.to_string(),
            PrimitiveKind::Byte(v) => v.to_string(),
            PrimitiveKind::Int16(v) => v.to_string(),
            PrimitiveKind::UInt16(v) => v.to_string(),
            PrimitiveKind::Int32(v) => v.to_string(),
            PrimitiveKind::UInt32(v) => v.to_string(),
            PrimitiveKind::Int64(v) => v.to_string(),
            PrimitiveKind::UInt64(v) => v.to_string(),
            PrimitiveKind::Single(v) => v.to_string(),
            PrimitiveKind::Double(v) => v.to_string(),
            PrimitiveKind::IntPtr(v) => v.to_string(),
            PrimitiveKind::UIntPtr(v) => v.to_string(),
        }
    }

    /// Whether this primitive is a boolean.
    pub fn as_bool(&self) -> Result<bool> {
        match self.kind {
            PrimitiveKind::Boolean(v) => Ok(v),
            _ => Err(Error::TypeMismatch(format!(
                "expected Boolean, found {}",
                self.element_type().primitive_name().unwrap_or("?")
            ))),
        }
    }

    /// Signed 64-bit view of integral primitives.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match self.kind {
            PrimitiveKind::SByte(v) => i64::from(v),
            PrimitiveKind::Byte(v) => i64::from(v),
            PrimitiveKind::Int16(v) => i64::from(v),
            PrimitiveKind::UInt16(v) => i64::from(v),
            PrimitiveKind::Int32(v) => i64::from(v),
            PrimitiveKind::UInt32(v) => i64::from(v),
            PrimitiveKind::Int64(v) => v,
            PrimitiveKind::UInt64(v) => v as i64,
            PrimitiveKind::Char(v) => i64::from(u32::from(v)),
            PrimitiveKind::IntPtr(v) => v,
            PrimitiveKind::UIntPtr(v) => v as i64,
            PrimitiveKind::Boolean(_) | PrimitiveKind::Single(_) | PrimitiveKind::Double(_) => {
                return None
            }
        })
    }

    /// Floating view of numeric primitives.
    pub fn as_f64(&self) -> Option<f64> {
        match self.kind {
            PrimitiveKind::Single(v) => Some(f64::from(v)),
            PrimitiveKind::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Whether this primitive is a floating-point value.
    pub fn is_floating(&self) -> bool {
        matches!(self.kind, PrimitiveKind::Single(_) | PrimitiveKind::Double(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_int32() {
        let value = PrimitiveValue::from_bytes(ElementType::I4, &7i32.to_le_bytes()).unwrap();
        assert_eq!(value.kind, PrimitiveKind::Int32(7));
        assert_eq!(value.render(), "7");
        assert_eq!(value.element_type(), ElementType::I4);
    }

    #[test]
    fn test_from_bytes_negative() {
        let value = PrimitiveValue::from_bytes(ElementType::I2, &(-3i16).to_le_bytes()).unwrap();
        assert_eq!(value.render(), "-3");
    }

    #[test]
    fn test_from_bytes_bool_rendering() {
        let t = PrimitiveValue::from_bytes(ElementType::Boolean, &[1]).unwrap();
        let f = PrimitiveValue::from_bytes(ElementType::Boolean, &[0]).unwrap();
        assert_eq!(t.render(), "True");
        assert_eq!(f.render(), "False");
    }

    #[test]
    fn test_from_bytes_char() {
        let value =
            PrimitiveValue::from_bytes(ElementType::Char, &(b'A' as u16).to_le_bytes()).unwrap();
        assert_eq!(value.render(), "A");
    }

    #[test]
    fn test_from_bytes_double() {
        let value = PrimitiveValue::from_bytes(ElementType::R8, &2.5f64.to_le_bytes()).unwrap();
        assert_eq!(value.render(), "2.5");
        assert_eq!(value.as_f64(), Some(2.5));
    }

    #[test]
    fn test_from_bytes_truncated() {
        let err = PrimitiveValue::from_bytes(ElementType::I8, &[1, 2]).unwrap_err();
        assert!(matches!(err, Error::Unresolvable(_)));
    }

    #[test]
    fn test_from_bytes_non_primitive() {
        let err = PrimitiveValue::from_bytes(ElementType::Class, &[0; 8]).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn test_as_bool_mismatch() {
        let value = PrimitiveValue::from_bytes(ElementType::I4, &1i32.to_le_bytes()).unwrap();
        assert!(matches!(value.as_bool(), Err(Error::TypeMismatch(_))));
    }
}
