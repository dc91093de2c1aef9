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

//! The polymorphic model of managed values.
//!
//! A [`Value`] is built from a runtime handle pair `(value, type)` plus a
//! creation depth, and implements three contracts used by the breadth-first
//! renderer: populate the type string, populate the scalar value (or report
//! that the value has members), and populate members (or report that the
//! value is a leaf).
//!
//! Reference-typed values hold a strong handle into the debuggee heap so they
//! survive runtime resumes; value-typed values own their bytes and materialize
//! their children eagerly at creation time because the bytes cannot be
//! re-acquired later.

pub mod array;
pub mod class;
pub mod collection;
pub mod enum_value;
pub mod factory;
pub mod primitive;
pub mod render;

use std::sync::Arc;

use derive_more::From;

use sdb_common::Variable;

use crate::{
    coordinator::EvalCoordinator,
    error::Result,
    runtime::{signature::TypeSignature, ElementType, RuntimeValue},
    Caches, EngineConfig,
};

pub use array::ArrayValue;
pub use class::{ClassValue, StaticMemberCache};
pub use collection::{CollectionKind, CollectionValue};
pub use enum_value::EnumValue;
pub use factory::create_value;
pub use primitive::{PrimitiveKind, PrimitiveValue};
pub use render::{perform_bfs, BfsItem, NodeId, VariableArena};

/// Everything value construction and rendering needs from the surrounding
/// capture task.
pub struct CaptureContext {
    /// The coordinator brokering function evaluations.
    pub coordinator: Arc<EvalCoordinator>,
    /// Engine configuration (depths, toggles).
    pub config: Arc<EngineConfig>,
    /// Per-process caches (static members, enum constants).
    pub caches: Arc<Caches>,
}

/// A managed string value, either held by strong handle in the debuggee or
/// produced by a string literal during expression evaluation.
pub enum StringValue {
    /// Debuggee string, read at render time.
    Handle(Arc<dyn RuntimeValue>),
    /// Literal produced by the expression compiler.
    Literal(String),
}

impl StringValue {
    /// Wraps a (strong-handle) string value.
    pub fn new(handle: Arc<dyn RuntimeValue>) -> Self {
        Self::Handle(handle)
    }

    /// Wraps a literal.
    pub fn literal(text: String) -> Self {
        Self::Literal(text)
    }

    /// The debuggee handle, when there is one.
    pub fn handle(&self) -> Option<Arc<dyn RuntimeValue>> {
        match self {
            Self::Handle(handle) => Some(handle.clone()),
            Self::Literal(_) => None,
        }
    }

    /// Reads the string contents.
    pub fn text(&self) -> Result<String> {
        match self {
            Self::Literal(text) => Ok(text.clone()),
            Self::Handle(handle) => {
                let (value, is_null) = crate::runtime::helper::dereference(handle.clone())?;
                if is_null {
                    return Ok("null".to_string());
                }
                value.string_value()
            }
        }
    }
}

/// A null value of a known declared type.
pub struct NullValue {
    /// Rendered type of the null.
    pub type_name: String,
}

/// A managed value, one variant per kind the debugger distinguishes.
#[derive(From)]
pub enum Value {
    /// Numeric, boolean or char scalar.
    Primitive(PrimitiveValue),
    /// Managed string.
    Str(StringValue),
    /// Single- or multi-dimensional array.
    Array(ArrayValue),
    /// Class or struct.
    Class(ClassValue),
    /// Enum, rendered symbolically.
    Enum(EnumValue),
    /// `List<T>`, `HashSet<T>` or `Dictionary<K,V>`.
    Collection(CollectionValue),
    /// Null reference with declared type.
    Null(NullValue),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Self::Primitive(_) => "Primitive",
            Self::Str(_) => "Str",
            Self::Array(_) => "Array",
            Self::Class(_) => "Class",
            Self::Enum(_) => "Enum",
            Self::Collection(_) => "Collection",
            Self::Null(_) => "Null",
        };
        write!(f, "Value::{variant}")
    }
}

impl Value {
    /// Whether this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// The debuggee handle behind this value, for values that keep one.
    /// Used when a value becomes the receiver or argument of a method call.
    pub fn runtime_handle(&self) -> Option<Arc<dyn RuntimeValue>> {
        match self {
            Self::Str(s) => s.handle(),
            Self::Array(a) => Some(a.handle()),
            Self::Class(c) => c.this_handle(),
            _ => None,
        }
    }

    /// The static type signature of this value, as the expression compiler
    /// sees it.
    pub fn type_signature(&self) -> TypeSignature {
        match self {
            Self::Primitive(p) => TypeSignature::primitive(p.element_type()),
            Self::Str(_) => TypeSignature::primitive(ElementType::String),
            Self::Array(a) => a.type_signature(),
            Self::Class(c) => c.type_signature(),
            Self::Enum(e) => TypeSignature::named(ElementType::ValueType, e.type_name.clone()),
            Self::Collection(c) => c.type_signature(),
            Self::Null(n) => TypeSignature::named(ElementType::Class, n.type_name.clone()),
        }
    }

    /// Writes the language-agnostic type string into the node.
    pub fn populate_type(&self, node: &mut Variable) -> Result<()> {
        node.type_name = self.type_signature().type_string();
        Ok(())
    }

    /// Writes the scalar rendering of a leaf value into the node.
    ///
    /// Compound values leave the node's value empty; their content is the
    /// member list.
    pub fn populate_value(&self, node: &mut Variable) -> Result<()> {
        match self {
            Self::Primitive(p) => {
                node.value = p.render();
                Ok(())
            }
            Self::Str(s) => {
                node.value = s.text()?;
                Ok(())
            }
            Self::Enum(e) => {
                node.value = e.render();
                Ok(())
            }
            Self::Null(_) => {
                node.value = "null".to_string();
                Ok(())
            }
            Self::Array(_) | Self::Class(_) | Self::Collection(_) => Ok(()),
        }
    }

    /// Enumerates the children of a compound value into the arena under
    /// `parent`.
    ///
    /// Returns `Ok(None)` for leaves (the renderer then calls
    /// [`Value::populate_value`] instead), `Ok(Some(children))` with the
    /// nodes to keep expanding otherwise.
    pub fn populate_members(
        &self,
        arena: &mut VariableArena,
        parent: NodeId,
        ctx: &CaptureContext,
        max_items: i32,
    ) -> Result<Option<Vec<(NodeId, Arc<Value>)>>> {
        match self {
            Self::Primitive(_) | Self::Str(_) | Self::Enum(_) | Self::Null(_) => Ok(None),
            Self::Array(a) => a.populate_members(arena, parent, ctx, max_items).map(Some),
            Self::Class(c) => c.populate_members(arena, parent, ctx).map(Some),
            Self::Collection(c) => c.populate_members(arena, parent, ctx, max_items).map(Some),
        }
    }
}
