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

//! Creation of model values from runtime handles.
//!
//! The factory dereferences and unboxes the raw handle, then dispatches on
//! the element type: primitives map directly, strings and arrays take strong
//! handles, and `Class`/`ValueType`/`Object` branch further on the class.
//! Primitive wrapper classes unwrap to primitives, `System.Enum` descendants
//! become enums, the known generic collections become collection values, and
//! everything else becomes a class value.

use std::sync::Arc;

use tracing::debug;

use crate::{
    error::{Error, Result},
    runtime::{
        helper, signature::TypeSignature, ElementType, MetadataImport, RuntimeClass,
        RuntimeModule, RuntimeType, RuntimeValue,
    },
    value::{
        class::ClassValue,
        collection::{CollectionKind, CollectionValue},
        enum_value::EnumValue,
        ArrayValue, CaptureContext, NullValue, PrimitiveValue, StringValue, Value,
    },
};

/// Base class name distinguishing enums.
const ENUM_BASE_CLASS: &str = "System.Enum";

/// Maps primitive wrapper class names to their element types.
fn wrapper_element_type(class_name: &str) -> Option<ElementType> {
    Some(match class_name {
        "System.Boolean" => ElementType::Boolean,
        "System.Char" => ElementType::Char,
        "System.SByte" => ElementType::I1,
        "System.Byte" => ElementType::U1,
        "System.Int16" => ElementType::I2,
        "System.UInt16" => ElementType::U2,
        "System.Int32" => ElementType::I4,
        "System.UInt32" => ElementType::U4,
        "System.Int64" => ElementType::I8,
        "System.UInt64" => ElementType::U8,
        "System.Single" => ElementType::R4,
        "System.Double" => ElementType::R8,
        "System.IntPtr" => ElementType::I,
        "System.UIntPtr" => ElementType::U,
        _ => return None,
    })
}

/// Builds a model value from a raw runtime handle at the given creation
/// depth.
pub fn create_value(
    raw: Arc<dyn RuntimeValue>,
    depth: i32,
    ctx: &CaptureContext,
) -> Result<Value> {
    let (value, is_null) = helper::dereference_and_unbox(raw)?;

    let exact_type = value.exact_type().ok();
    let element_type = match &exact_type {
        Some(ty) => ty.element_type(),
        None => value.element_type()?,
    };

    if element_type.is_primitive() {
        let bytes = value.primitive_bytes()?;
        return Ok(Value::Primitive(PrimitiveValue::from_bytes(element_type, &bytes)?));
    }

    match element_type {
        ElementType::String => {
            if is_null {
                return Ok(Value::Null(NullValue { type_name: "String".to_string() }));
            }
            Ok(Value::Str(StringValue::new(strong_handle_or_value(value))))
        }
        ElementType::SzArray | ElementType::Array => {
            create_array_value(value, exact_type, is_null, depth)
        }
        ElementType::Class | ElementType::ValueType | ElementType::Object => {
            create_class_value(value, exact_type, element_type, is_null, depth, ctx)
        }
        other => Err(Error::NotImplemented(format!("element type {other:?}"))),
    }
}

fn create_array_value(
    value: Arc<dyn RuntimeValue>,
    exact_type: Option<Arc<dyn RuntimeType>>,
    is_null: bool,
    depth: i32,
) -> Result<Value> {
    let element_sig = match &exact_type {
        Some(ty) => ty
            .generic_args()?
            .first()
            .map(runtime_type_signature)
            .transpose()?
            .unwrap_or_else(|| TypeSignature::primitive(ElementType::Object)),
        None => TypeSignature::primitive(ElementType::Object),
    };

    if is_null {
        let sig = TypeSignature {
            element_type: ElementType::SzArray,
            type_name: element_sig.type_name.clone(),
            generic_args: vec![element_sig],
            array_rank: 1,
        };
        return Ok(Value::Null(NullValue { type_name: sig.type_string() }));
    }

    let info = value.array_info()?;
    Ok(Value::Array(ArrayValue::new(
        element_sig,
        info.dimensions.clone(),
        info.rank,
        strong_handle_or_value(value),
        depth,
    )))
}

fn create_class_value(
    value: Arc<dyn RuntimeValue>,
    exact_type: Option<Arc<dyn RuntimeType>>,
    element_type: ElementType,
    is_null: bool,
    depth: i32,
    ctx: &CaptureContext,
) -> Result<Value> {
    let class = match &exact_type {
        Some(ty) => ty.type_class()?,
        None => value.object_class()?,
    };
    let module = class.module()?;
    let metadata = module.metadata()?;
    let class_name = metadata.type_def_props(class.token())?.name;
    let module_name = helper::short_module_name(&module.name()?).to_string();

    let generic_args = match &exact_type {
        Some(ty) => ty
            .generic_args()?
            .iter()
            .map(runtime_type_signature)
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    if is_null {
        let sig = TypeSignature {
            element_type: ElementType::Class,
            type_name: class_name,
            generic_args,
            array_rank: 0,
        };
        return Ok(Value::Null(NullValue { type_name: sig.type_string() }));
    }

    // Primitive wrapper types render as plain primitives.
    if let Some(primitive_type) = wrapper_element_type(&class_name) {
        let bytes = value.primitive_bytes()?;
        return Ok(Value::Primitive(PrimitiveValue::from_bytes(primitive_type, &bytes)?));
    }

    let base_class_name = base_class_name(exact_type.as_deref())?;
    if base_class_name.as_deref() == Some(ENUM_BASE_CLASS) {
        let bytes = value.primitive_bytes()?;
        let cached = ctx.caches.enum_constants.get(&module_name, &class_name);
        let was_cached = cached.is_some();
        let (enum_value, constants) = EnumValue::from_metadata(
            class_name.clone(),
            class.token(),
            metadata.as_ref(),
            &bytes,
            cached,
        )?;
        if !was_cached {
            ctx.caches.enum_constants.insert(&module_name, &class_name, constants);
        }
        return Ok(Value::Enum(enum_value));
    }

    if let Some(kind) = CollectionKind::from_class_name(&class_name) {
        let collection = CollectionValue::from_object(
            kind,
            class_name,
            generic_args,
            &value,
            metadata.as_ref(),
            class.token(),
            depth,
            ctx,
        )?;
        return Ok(Value::Collection(collection));
    }

    if element_type == ElementType::ValueType {
        let class_value = ClassValue::new_value_type(
            module_name,
            class_name,
            generic_args,
            class,
            module,
            metadata,
            &value,
            depth,
            ctx,
        )?;
        return Ok(Value::Class(class_value));
    }

    Ok(Value::Class(ClassValue::new_reference(
        module_name,
        class_name,
        generic_args,
        class,
        module,
        metadata,
        strong_handle_or_value(value),
        depth,
    )))
}

/// Derives the static type signature of a runtime type.
pub fn runtime_type_signature(ty: &Arc<dyn RuntimeType>) -> Result<TypeSignature> {
    let element_type = ty.element_type();

    if element_type.primitive_name().is_some() {
        return Ok(TypeSignature::primitive(element_type));
    }

    match element_type {
        ElementType::SzArray | ElementType::Array => {
            let element = ty
                .generic_args()?
                .first()
                .map(runtime_type_signature)
                .transpose()?
                .unwrap_or_else(|| TypeSignature::primitive(ElementType::Object));
            Ok(TypeSignature {
                element_type,
                type_name: element.type_name.clone(),
                generic_args: vec![element],
                array_rank: 1,
            })
        }
        ElementType::Class | ElementType::ValueType => {
            let class = ty.type_class()?;
            let metadata = class.module()?.metadata()?;
            let type_name = metadata.type_def_props(class.token())?.name;
            let generic_args = ty
                .generic_args()?
                .iter()
                .map(runtime_type_signature)
                .collect::<Result<Vec<_>>>()?;
            Ok(TypeSignature { element_type, type_name, generic_args, array_rank: 0 })
        }
        other => Err(Error::NotImplemented(format!("type signature for {other:?}"))),
    }
}

fn base_class_name(exact_type: Option<&dyn RuntimeType>) -> Result<Option<String>> {
    let Some(ty) = exact_type else { return Ok(None) };
    let Some(base) = ty.base()? else { return Ok(None) };
    let class = match base.type_class() {
        Ok(class) => class,
        // System.Object and friends may come back classless.
        Err(Error::NotImplemented(_)) => return Ok(None),
        Err(err) => return Err(err),
    };
    let metadata = class.module()?.metadata()?;
    Ok(Some(metadata.type_def_props(class.token())?.name))
}

fn strong_handle_or_value(value: Arc<dyn RuntimeValue>) -> Arc<dyn RuntimeValue> {
    match value.create_strong_handle() {
        Ok(handle) => handle,
        Err(err) => {
            debug!(%err, "strong handle unavailable, keeping transient value");
            value
        }
    }
}
