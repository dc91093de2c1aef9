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

//! Abstract capability layer over the managed debugging runtime.
//!
//! The engine never touches vendor debugging interfaces directly. Stack
//! walks, value reads, metadata lookups, function evaluation and breakpoint
//! arming are all expressed through the traits in this module, and the real
//! bindings are wired in at the process boundary. Capability methods that a
//! given value kind does not support default to [`Error::NotImplemented`],
//! mirroring how interface queries fail on the native side.

pub mod helper;
pub mod signature;

use std::{fmt, sync::Arc};

use crate::error::{Error, Result};

/// Metadata token of a method definition.
pub type MethodToken = u32;
/// Metadata token of a type definition.
pub type ClassToken = u32;
/// Metadata token of a field definition.
pub type FieldToken = u32;
/// Metadata token of a property definition.
pub type PropertyToken = u32;
/// Runtime-assigned thread identifier.
pub type ThreadId = u64;

/// `mdStatic` bit of method flags.
pub const MD_STATIC: u32 = 0x0010;

/// CLR element types, as they appear in compressed metadata signatures and on
/// runtime values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ElementType {
    End,
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Ptr,
    ByRef,
    ValueType,
    Class,
    Var,
    Array,
    GenericInst,
    TypedByRef,
    I,
    U,
    FnPtr,
    Object,
    SzArray,
    MVar,
}

impl ElementType {
    /// Decodes the one-byte element type of a compressed signature.
    pub fn from_signature_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::End,
            0x01 => Self::Void,
            0x02 => Self::Boolean,
            0x03 => Self::Char,
            0x04 => Self::I1,
            0x05 => Self::U1,
            0x06 => Self::I2,
            0x07 => Self::U2,
            0x08 => Self::I4,
            0x09 => Self::U4,
            0x0a => Self::I8,
            0x0b => Self::U8,
            0x0c => Self::R4,
            0x0d => Self::R8,
            0x0e => Self::String,
            0x0f => Self::Ptr,
            0x10 => Self::ByRef,
            0x11 => Self::ValueType,
            0x12 => Self::Class,
            0x13 => Self::Var,
            0x14 => Self::Array,
            0x15 => Self::GenericInst,
            0x16 => Self::TypedByRef,
            0x18 => Self::I,
            0x19 => Self::U,
            0x1b => Self::FnPtr,
            0x1c => Self::Object,
            0x1d => Self::SzArray,
            0x1e => Self::MVar,
            _ => return None,
        })
    }

    /// Canonical short name for primitive element types, `None` for
    /// everything else.
    pub fn primitive_name(&self) -> Option<&'static str> {
        Some(match self {
            Self::Boolean => "Boolean",
            Self::Char => "Char",
            Self::I1 => "SByte",
            Self::U1 => "Byte",
            Self::I2 => "Int16",
            Self::U2 => "UInt16",
            Self::I4 => "Int32",
            Self::U4 => "UInt32",
            Self::I8 => "Int64",
            Self::U8 => "UInt64",
            Self::R4 => "Single",
            Self::R8 => "Double",
            Self::I => "IntPtr",
            Self::U => "UIntPtr",
            Self::String => "String",
            Self::Object => "Object",
            _ => return None,
        })
    }

    /// True for the numeric/boolean/char element types a `Primitive` value
    /// can represent.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Char
                | Self::I1
                | Self::U1
                | Self::I2
                | Self::U2
                | Self::I4
                | Self::U4
                | Self::I8
                | Self::U8
                | Self::R4
                | Self::R8
                | Self::I
                | Self::U
        )
    }
}

/// A compressed metadata signature blob.
///
/// Equality compares contents; arming compares field signatures to pick the
/// right overload among same-named methods.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SignatureBlob(pub Arc<[u8]>);

impl SignatureBlob {
    /// Wraps raw signature bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into().into())
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SignatureBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBlob({} bytes)", self.0.len())
    }
}

/// Everything `GetMethodProps` reports that the engine needs.
#[derive(Debug, Clone)]
pub struct MethodProps {
    /// The method token.
    pub token: MethodToken,
    /// Method name.
    pub name: String,
    /// Token of the owning type.
    pub class_token: ClassToken,
    /// Raw method flags; see [`MD_STATIC`].
    pub flags: u32,
    /// Method signature blob.
    pub signature: SignatureBlob,
    /// Relative virtual address of the method body.
    pub virtual_address: u32,
}

impl MethodProps {
    /// Whether the method is static.
    pub fn is_static(&self) -> bool {
        self.flags & MD_STATIC != 0
    }
}

/// One parameter row of a method.
#[derive(Debug, Clone)]
pub struct ParamProps {
    /// Ordinal position, 1-based (0 is the return value row).
    pub ordinal: u32,
    /// Parameter name; may be empty when stripped.
    pub name: String,
}

/// A compile-time constant attached to a field row (enum members, literals).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantValue {
    /// Element type of the constant.
    pub element_type: ElementType,
    /// Raw little-endian bytes of the constant.
    pub bytes: Vec<u8>,
}

impl ConstantValue {
    /// Widens the raw constant to 64 bits, sign-extending signed types. This
    /// is the lens enum rendering looks through.
    pub fn as_u64(&self) -> u64 {
        let mut buf = [0u8; 8];
        let n = self.bytes.len().min(8);
        buf[..n].copy_from_slice(&self.bytes[..n]);
        let raw = u64::from_le_bytes(buf);
        match self.element_type {
            ElementType::I1 => i64::from(raw as u8 as i8) as u64,
            ElementType::I2 => i64::from(raw as u16 as i16) as u64,
            ElementType::I4 => i64::from(raw as u32 as i32) as u64,
            _ => raw,
        }
    }
}

/// One field row of a type.
#[derive(Debug, Clone)]
pub struct FieldProps {
    /// The field token.
    pub token: FieldToken,
    /// Field name (mangled for property backing fields).
    pub name: String,
    /// Whether the field is static.
    pub is_static: bool,
    /// Whether the field is a compile-time literal with no storage slot.
    pub is_literal: bool,
    /// Field signature blob (`FIELD` calling convention).
    pub signature: SignatureBlob,
    /// Constant value for literal fields and enum members.
    pub default_value: Option<ConstantValue>,
}

/// One property row of a type.
#[derive(Debug, Clone)]
pub struct PropertyProps {
    /// The property token.
    pub token: PropertyToken,
    /// Property name.
    pub name: String,
    /// Property signature blob (`PROPERTY` calling convention).
    pub signature: SignatureBlob,
    /// Token of the getter method, if the property has one.
    pub getter: Option<MethodToken>,
}

/// One type-definition row.
#[derive(Debug, Clone)]
pub struct TypeDefProps {
    /// The type token.
    pub token: ClassToken,
    /// Fully qualified type name.
    pub name: String,
    /// Raw token of the base type (typedef or typeref), zero for none.
    pub extends: u32,
}

/// How the instruction pointer of a frame maps back to IL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingResult {
    /// Exact IL mapping.
    Exact,
    /// Approximate IL mapping; still usable.
    Approximate,
    /// No mapping information; the frame cannot be inspected at IL level.
    NoInfo,
    /// The address does not map into IL.
    UnmappedAddress,
}

impl MappingResult {
    /// Whether sequence-point lookup can use this mapping.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Exact | Self::Approximate)
    }
}

/// Array shape of a runtime array value.
#[derive(Debug, Clone)]
pub struct ArrayInfo {
    /// Array rank.
    pub rank: u32,
    /// Per-dimension sizes.
    pub dimensions: Vec<u32>,
}

impl ArrayInfo {
    /// Total element count across all dimensions.
    pub fn total_elements(&self) -> u32 {
        self.dimensions.iter().product()
    }
}

/// Metadata tables of one module.
pub trait MetadataImport: Send + Sync {
    /// `GetMethodProps`.
    fn method_props(&self, method: MethodToken) -> Result<MethodProps>;

    /// `EnumMethodsWithName` on one type.
    fn methods_with_name(&self, class: ClassToken, name: &str) -> Result<Vec<MethodToken>>;

    /// `EnumParams` + `GetParamProps` for one method, in ordinal order.
    fn method_params(&self, method: MethodToken) -> Result<Vec<ParamProps>>;

    /// `GetTypeDefProps`.
    fn type_def_props(&self, token: ClassToken) -> Result<TypeDefProps>;

    /// `FindTypeDefByName`. `Ok(None)` when this module declares no type
    /// with the given fully qualified name.
    fn find_type_def(&self, name: &str) -> Result<Option<ClassToken>>;

    /// `GetTypeRefProps` name lookup.
    fn type_ref_name(&self, token: u32) -> Result<String>;

    /// All field rows of a type, declaration order.
    fn fields(&self, class: ClassToken) -> Result<Vec<FieldProps>>;

    /// `FindField` by name on a type. `Ok(None)` when the type has no such
    /// field; errors are reserved for metadata-level failures.
    fn find_field(&self, class: ClassToken, name: &str) -> Result<Option<FieldProps>>;

    /// All property rows of a type, declaration order.
    fn properties(&self, class: ClassToken) -> Result<Vec<PropertyProps>>;

    /// Property lookup by name on a type.
    fn find_property(&self, class: ClassToken, name: &str) -> Result<Option<PropertyProps>>;
}

/// A loaded module of the debuggee.
pub trait RuntimeModule: Send + Sync {
    /// Full module path as the runtime reports it.
    fn name(&self) -> Result<String>;

    /// The module's metadata tables.
    fn metadata(&self) -> Result<Arc<dyn MetadataImport>>;

    /// Resolves a class token to a runtime class.
    fn class_from_token(&self, token: ClassToken) -> Result<Arc<dyn RuntimeClass>>;

    /// Creates an (inactive) function breakpoint at `il_offset` inside the
    /// method's IL body.
    fn create_breakpoint(
        &self,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<Arc<dyn RuntimeBreakpoint>>;
}

/// A loaded class of the debuggee.
pub trait RuntimeClass: Send + Sync {
    /// The class token.
    fn token(&self) -> ClassToken;

    /// The owning module.
    fn module(&self) -> Result<Arc<dyn RuntimeModule>>;

    /// Reads a static field. The frame provides thread/context binding for
    /// thread-static fields when available.
    fn static_field_value(
        &self,
        field: FieldToken,
        frame: Option<&Arc<dyn RuntimeFrame>>,
    ) -> Result<Arc<dyn RuntimeValue>>;
}

/// The exact runtime type of a value, including generic instantiation.
pub trait RuntimeType: Send + Sync {
    /// Element type of this type.
    fn element_type(&self) -> ElementType;

    /// The class behind `Class`/`ValueType` types.
    fn type_class(&self) -> Result<Arc<dyn RuntimeClass>> {
        Err(Error::NotImplemented("type has no class".to_string()))
    }

    /// Base type, `None` at `System.Object`.
    fn base(&self) -> Result<Option<Arc<dyn RuntimeType>>> {
        Ok(None)
    }

    /// Generic type arguments (also the element type of arrays).
    fn generic_args(&self) -> Result<Vec<Arc<dyn RuntimeType>>> {
        Ok(Vec::new())
    }
}

/// Nullness of a reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceInfo {
    /// Whether the reference is null.
    pub is_null: bool,
}

/// A value handle obtained from the runtime.
///
/// Capability methods default to [`Error::NotImplemented`]; implementations
/// override exactly the set their value kind supports, the way native values
/// answer only some interface queries.
pub trait RuntimeValue: Send + Sync {
    /// Element type of the value as the runtime reports it.
    fn element_type(&self) -> Result<ElementType>;

    /// Exact type with generic instantiation.
    fn exact_type(&self) -> Result<Arc<dyn RuntimeType>> {
        Err(Error::NotImplemented("value carries no exact type".to_string()))
    }

    /// `Some` when this value is a reference; carries nullness.
    fn reference_info(&self) -> Option<ReferenceInfo> {
        None
    }

    /// Follows a single reference hop. Errors when not a reference.
    fn dereference(&self) -> Result<Arc<dyn RuntimeValue>> {
        Err(Error::NotImplemented("value is not a reference".to_string()))
    }

    /// Removes one level of boxing. `Ok(None)` when the value is not boxed,
    /// in which case the caller keeps the handle it already has.
    fn unboxed(&self) -> Result<Option<Arc<dyn RuntimeValue>>> {
        Ok(None)
    }

    /// Raw little-endian bytes of a primitive value.
    fn primitive_bytes(&self) -> Result<Vec<u8>> {
        Err(Error::NotImplemented("value is not primitive".to_string()))
    }

    /// Contents of a string value.
    fn string_value(&self) -> Result<String> {
        Err(Error::NotImplemented("value is not a string".to_string()))
    }

    /// Shape of an array value.
    fn array_info(&self) -> Result<ArrayInfo> {
        Err(Error::NotImplemented("value is not an array".to_string()))
    }

    /// One array element by flattened index.
    fn array_element(&self, _index: u32) -> Result<Arc<dyn RuntimeValue>> {
        Err(Error::NotImplemented("value is not an array".to_string()))
    }

    /// Class of an object value.
    fn object_class(&self) -> Result<Arc<dyn RuntimeClass>> {
        Err(Error::NotImplemented("value is not an object".to_string()))
    }

    /// Reads an instance field of an object value.
    fn field_value(&self, _field: FieldToken) -> Result<Arc<dyn RuntimeValue>> {
        Err(Error::NotImplemented("value is not an object".to_string()))
    }

    /// Promotes a transient heap value to a strong handle that survives a
    /// runtime resume. The returned value is a reference to the same object.
    fn create_strong_handle(&self) -> Result<Arc<dyn RuntimeValue>> {
        Err(Error::NotImplemented("value is not a heap value".to_string()))
    }

    /// Debuggee address of the value, zero when unavailable.
    fn address(&self) -> u64 {
        0
    }
}

impl std::fmt::Debug for dyn RuntimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RuntimeValue(address={:#x})", self.address())
    }
}

/// A managed thread of the debuggee.
pub trait RuntimeThread: Send + Sync {
    /// Runtime thread id.
    fn id(&self) -> ThreadId;

    /// Walks the managed stack, innermost frame first.
    fn stack_walk(&self) -> Result<Vec<Arc<dyn RuntimeFrame>>>;

    /// The innermost frame.
    fn active_frame(&self) -> Result<Arc<dyn RuntimeFrame>>;

    /// Starts a function evaluation on this thread. The evaluation only makes
    /// progress while the debuggee runs, so the caller must release the
    /// callback thread and wait for `EvalComplete`/`EvalException`.
    fn begin_eval(&self, call: EvalCall) -> Result<Arc<dyn PendingEval>>;
}

/// A function-evaluation request.
pub struct EvalCall {
    /// Module owning the target method.
    pub module: Arc<dyn RuntimeModule>,
    /// Target method token.
    pub method: MethodToken,
    /// Receiver for instance methods.
    pub this: Option<Arc<dyn RuntimeValue>>,
    /// Positional arguments.
    pub args: Vec<Arc<dyn RuntimeValue>>,
}

/// An in-flight function evaluation.
pub trait PendingEval: Send + Sync {
    /// Polls for the result: `Ok(None)` while the evaluation has not
    /// completed, `Ok(Some(value))` once it has.
    fn try_result(&self) -> Result<Option<Arc<dyn RuntimeValue>>>;
}

/// One raw frame of a stack walk.
pub trait RuntimeFrame: Send + Sync {
    /// False when no managed function backs this frame (native code).
    fn is_il(&self) -> bool;

    /// Token of the frame's method.
    fn method_token(&self) -> Result<MethodToken>;

    /// Module owning the frame's method.
    fn module(&self) -> Result<Arc<dyn RuntimeModule>>;

    /// Instruction pointer as an IL offset plus mapping quality.
    fn ip_offset(&self) -> Result<(u32, MappingResult)>;

    /// All local variable slots, in slot order. Slots the JIT optimized away
    /// may be missing from the end.
    fn locals(&self) -> Result<Vec<Arc<dyn RuntimeValue>>>;

    /// One local variable slot.
    fn local(&self, slot: u32) -> Result<Arc<dyn RuntimeValue>>;

    /// All arguments (`this` at index 0 for instance methods).
    fn arguments(&self) -> Result<Vec<Arc<dyn RuntimeValue>>>;

    /// One argument by index.
    fn argument(&self, index: u32) -> Result<Arc<dyn RuntimeValue>>;

    /// Relative virtual address of the frame's function.
    fn function_virtual_address(&self) -> Result<u32>;
}

/// An armed (or armable) runtime breakpoint.
pub trait RuntimeBreakpoint: Send + Sync {
    /// Arms or disarms the breakpoint.
    fn activate(&self, active: bool) -> Result<()>;

    /// Whether the breakpoint is currently armed.
    fn is_active(&self) -> Result<bool>;

    /// Method token the breakpoint lives in.
    fn method_token(&self) -> MethodToken;

    /// IL offset the breakpoint is armed at.
    fn il_offset(&self) -> u32;
}
