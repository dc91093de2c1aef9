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

//! Compressed metadata signature parsing.
//!
//! Recognizes primitive element types, `SZARRAY`, `ARRAY` (rank plus skipped
//! size/lower-bound prefixes), `GENERICINST` and `CLASS`/`VALUETYPE` tokens
//! resolved through typedef/typeref tables. Any element type outside this set
//! surfaces [`Error::NotImplemented`] without guessing.

use crate::{
    error::{Error, Result},
    runtime::{helper::type_name_from_token, ElementType, MetadataImport, SignatureBlob},
};

/// `FIELD` calling convention byte of a field signature.
const CALLCONV_FIELD: u8 = 0x06;
/// `PROPERTY` calling convention bits of a property signature.
const CALLCONV_PROPERTY: u8 = 0x08;
/// Mask selecting the calling convention out of the first signature byte.
const CALLCONV_MASK: u8 = 0x0f;

/// The static type of a value or expression: element type, base type name and
/// generic instantiation. Array types carry their rank and keep the element
/// type as the single generic argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSignature {
    /// CLR element type.
    pub element_type: ElementType,
    /// Base type name, without generic arguments or array suffix.
    pub type_name: String,
    /// Generic type arguments; for arrays, the element type.
    pub generic_args: Vec<TypeSignature>,
    /// Array rank; zero for non-array types.
    pub array_rank: u32,
}

impl TypeSignature {
    /// Signature of a primitive element type.
    pub fn primitive(element_type: ElementType) -> Self {
        let type_name = element_type.primitive_name().unwrap_or("Object").to_string();
        Self { element_type, type_name, generic_args: Vec::new(), array_rank: 0 }
    }

    /// Signature of a class or value type by name.
    pub fn named(element_type: ElementType, type_name: impl Into<String>) -> Self {
        Self { element_type, type_name: type_name.into(), generic_args: Vec::new(), array_rank: 0 }
    }

    /// The `Boolean` signature, the required static type of conditions.
    pub fn boolean() -> Self {
        Self::primitive(ElementType::Boolean)
    }

    /// Whether this signature is a numeric, boolean or char primitive.
    pub fn is_primitive(&self) -> bool {
        self.element_type.is_primitive()
    }

    /// Whether this is a reference-typed signature that can compare to the
    /// `null` literal.
    pub fn is_reference(&self) -> bool {
        matches!(
            self.element_type,
            ElementType::Class | ElementType::Object | ElementType::String |
                ElementType::SzArray |
                ElementType::Array
        )
    }

    /// Renders the full type string, including generic arguments and array
    /// suffix.
    pub fn type_string(&self) -> String {
        if self.array_rank > 0 {
            let element = self
                .generic_args
                .first()
                .map(TypeSignature::type_string)
                .unwrap_or_else(|| "Object".to_string());
            let commas = ",".repeat(self.array_rank.saturating_sub(1) as usize);
            return format!("{element}[{commas}]");
        }

        if self.generic_args.is_empty() {
            return self.type_name.clone();
        }

        let args =
            self.generic_args.iter().map(TypeSignature::type_string).collect::<Vec<_>>().join(", ");
        format!("{}<{args}>", self.type_name)
    }
}

/// Cursor over a compressed signature blob.
pub struct SignatureReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SignatureReader<'a> {
    /// Creates a reader over a blob.
    pub fn new(blob: &'a SignatureBlob) -> Self {
        Self { bytes: blob.bytes(), pos: 0 }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| Error::Unresolvable("signature truncated".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Decodes an ECMA-335 compressed unsigned integer.
    pub fn read_compressed_u32(&mut self) -> Result<u32> {
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(u32::from(first));
        }
        if first & 0xc0 == 0x80 {
            let second = self.read_byte()?;
            return Ok((u32::from(first & 0x3f) << 8) | u32::from(second));
        }
        if first & 0xe0 == 0xc0 {
            let b2 = self.read_byte()?;
            let b3 = self.read_byte()?;
            let b4 = self.read_byte()?;
            return Ok((u32::from(first & 0x1f) << 24) |
                (u32::from(b2) << 16) |
                (u32::from(b3) << 8) |
                u32::from(b4));
        }
        Err(Error::Unresolvable(format!("invalid compressed integer lead byte {first:#04x}")))
    }

    /// Decodes a compressed typedef-or-ref token.
    pub fn read_compressed_token(&mut self) -> Result<u32> {
        let coded = self.read_compressed_u32()?;
        let rid = coded >> 2;
        let table = match coded & 0x3 {
            0 => 0x0200_0000, // TypeDef
            1 => 0x0100_0000, // TypeRef
            2 => 0x1b00_0000, // TypeSpec
            _ => {
                return Err(Error::Unresolvable(format!(
                    "invalid coded token tag in {coded:#010x}"
                )))
            }
        };
        Ok(table | rid)
    }

    /// Reads the next element type byte.
    pub fn read_element_type(&mut self) -> Result<ElementType> {
        let byte = self.read_byte()?;
        ElementType::from_signature_byte(byte)
            .ok_or_else(|| Error::Unresolvable(format!("unknown element type byte {byte:#04x}")))
    }

    /// Skips a compressed count followed by that many compressed values
    /// (array size and lower-bound prefixes).
    fn skip_counted_values(&mut self) -> Result<()> {
        let count = self.read_compressed_u32()?;
        for _ in 0..count {
            self.read_compressed_u32()?;
        }
        Ok(())
    }
}

/// Parses a type out of a signature cursor.
pub fn parse_type(
    reader: &mut SignatureReader<'_>,
    metadata: &dyn MetadataImport,
) -> Result<TypeSignature> {
    let element_type = reader.read_element_type()?;

    if let Some(name) = element_type.primitive_name() {
        return Ok(TypeSignature::named(element_type, name));
    }

    match element_type {
        ElementType::SzArray => {
            let element = parse_type(reader, metadata)?;
            Ok(TypeSignature {
                element_type,
                type_name: element.type_name.clone(),
                generic_args: vec![element],
                array_rank: 1,
            })
        }
        ElementType::Array => {
            let element = parse_type(reader, metadata)?;
            let rank = reader.read_compressed_u32()?;
            // Only the rank matters; the stored sizes and lower bounds are
            // skipped.
            reader.skip_counted_values()?;
            reader.skip_counted_values()?;
            Ok(TypeSignature {
                element_type,
                type_name: element.type_name.clone(),
                generic_args: vec![element],
                array_rank: rank,
            })
        }
        ElementType::GenericInst => {
            let base = parse_type(reader, metadata)?;
            let arg_count = reader.read_compressed_u32()?;
            let mut generic_args = Vec::with_capacity(arg_count as usize);
            for _ in 0..arg_count {
                generic_args.push(parse_type(reader, metadata)?);
            }
            Ok(TypeSignature {
                element_type: base.element_type,
                type_name: base.type_name,
                generic_args,
                array_rank: 0,
            })
        }
        ElementType::Class | ElementType::ValueType => {
            let token = reader.read_compressed_token()?;
            let type_name = type_name_from_token(metadata, token)?;
            Ok(TypeSignature::named(element_type, type_name))
        }
        other => Err(Error::NotImplemented(format!("element type {other:?} in signature"))),
    }
}

/// Parses the type out of a field signature
/// (`FIELD CustomMod* Type`; custom modifiers are not supported).
pub fn parse_field_type(
    blob: &SignatureBlob,
    metadata: &dyn MetadataImport,
) -> Result<TypeSignature> {
    let mut reader = SignatureReader::new(blob);
    let callconv = reader.read_byte()?;
    if callconv & CALLCONV_MASK != CALLCONV_FIELD {
        return Err(Error::Unresolvable(format!(
            "expected field signature, found calling convention {callconv:#04x}"
        )));
    }
    parse_type(&mut reader, metadata)
}

/// Parses the type out of a property signature
/// (`PROPERTY [HASTHIS] ParamCount CustomMod* Type Param*`).
pub fn parse_property_type(
    blob: &SignatureBlob,
    metadata: &dyn MetadataImport,
) -> Result<TypeSignature> {
    let mut reader = SignatureReader::new(blob);
    let callconv = reader.read_byte()?;
    if callconv & CALLCONV_MASK != CALLCONV_PROPERTY {
        return Err(Error::Unresolvable(format!(
            "expected property signature, found calling convention {callconv:#04x}"
        )));
    }
    // Parameter count precedes the property type.
    reader.read_compressed_u32()?;
    parse_type(&mut reader, metadata)
}

/// Parses the return type out of a method signature
/// (`CallConv ParamCount RetType Param*`).
pub fn parse_method_return_type(
    blob: &SignatureBlob,
    metadata: &dyn MetadataImport,
) -> Result<TypeSignature> {
    let mut reader = SignatureReader::new(blob);
    // Calling convention (HASTHIS and friends live in the high bits).
    reader.read_byte()?;
    // Parameter count.
    reader.read_compressed_u32()?;
    parse_type(&mut reader, metadata)
}

/// Builds the underlying element type of an enum from its `value__` field
/// signature.
pub fn enum_underlying_type(blob: &SignatureBlob) -> Result<ElementType> {
    let mut reader = SignatureReader::new(blob);
    let callconv = reader.read_byte()?;
    if callconv & CALLCONV_MASK != CALLCONV_FIELD {
        return Err(Error::Unresolvable(format!(
            "expected field signature, found calling convention {callconv:#04x}"
        )));
    }
    reader.read_element_type()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestRig;

    fn field_sig(bytes: &[u8]) -> SignatureBlob {
        let mut all = vec![CALLCONV_FIELD];
        all.extend_from_slice(bytes);
        SignatureBlob::new(all)
    }

    #[test]
    fn test_parse_primitive_field() {
        let rig = TestRig::minimal();
        let metadata = rig.module.metadata().unwrap();

        let sig = parse_field_type(&field_sig(&[0x08]), metadata.as_ref()).unwrap();
        assert_eq!(sig.element_type, ElementType::I4);
        assert_eq!(sig.type_string(), "Int32");
    }

    #[test]
    fn test_parse_szarray() {
        let rig = TestRig::minimal();
        let metadata = rig.module.metadata().unwrap();

        // SZARRAY of I4
        let sig = parse_field_type(&field_sig(&[0x1d, 0x08]), metadata.as_ref()).unwrap();
        assert_eq!(sig.element_type, ElementType::SzArray);
        assert_eq!(sig.array_rank, 1);
        assert_eq!(sig.type_string(), "Int32[]");
    }

    #[test]
    fn test_parse_multidimensional_array() {
        let rig = TestRig::minimal();
        let metadata = rig.module.metadata().unwrap();

        // ARRAY of R8, rank 2, one stored size (4), no lower bounds.
        let sig =
            parse_field_type(&field_sig(&[0x14, 0x0d, 0x02, 0x01, 0x04, 0x00]), metadata.as_ref())
                .unwrap();
        assert_eq!(sig.element_type, ElementType::Array);
        assert_eq!(sig.array_rank, 2);
        assert_eq!(sig.type_string(), "Double[,]");
    }

    #[test]
    fn test_parse_generic_inst() {
        let rig = TestRig::minimal();
        let metadata = rig.module.metadata().unwrap();
        let token = rig.list_typedef_token;
        assert_eq!(token & 0xff00_0000, 0x0200_0000);
        let coded = ((token & 0x00ff_ffff) << 2) as u8;

        // GENERICINST CLASS <token> 1 I4
        let sig = parse_field_type(&field_sig(&[0x15, 0x12, coded, 0x01, 0x08]), metadata.as_ref())
            .unwrap();
        assert_eq!(sig.element_type, ElementType::Class);
        assert_eq!(sig.generic_args.len(), 1);
        assert_eq!(sig.type_string(), "System.Collections.Generic.List`1<Int32>");
    }

    #[test]
    fn test_unsupported_element_type() {
        let rig = TestRig::minimal();
        let metadata = rig.module.metadata().unwrap();

        // FNPTR is outside the supported set.
        let err = parse_field_type(&field_sig(&[0x1b]), metadata.as_ref()).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn test_wrong_calling_convention() {
        let rig = TestRig::minimal();
        let metadata = rig.module.metadata().unwrap();
        let err =
            parse_field_type(&SignatureBlob::new(vec![0x08, 0x08]), metadata.as_ref()).unwrap_err();
        assert!(matches!(err, Error::Unresolvable(_)));
    }

    #[test]
    fn test_compressed_integer_widths() {
        let blob = SignatureBlob::new(vec![0x7f, 0x80, 0x80, 0xc0, 0x00, 0x40, 0x00]);
        let mut reader = SignatureReader::new(&blob);
        assert_eq!(reader.read_compressed_u32().unwrap(), 0x7f);
        assert_eq!(reader.read_compressed_u32().unwrap(), 0x80);
        assert_eq!(reader.read_compressed_u32().unwrap(), 0x4000);
    }

    #[test]
    fn test_type_signature_display() {
        let mut dict = TypeSignature::named(
            ElementType::Class,
            "System.Collections.Generic.Dictionary`2".to_string(),
        );
        dict.generic_args = vec![
            TypeSignature::primitive(ElementType::String),
            TypeSignature::primitive(ElementType::I4),
        ];
        assert_eq!(dict.type_string(), "System.Collections.Generic.Dictionary`2<String, Int32>");
    }
}
