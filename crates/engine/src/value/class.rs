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

//! Class and struct values.
//!
//! Reference-typed instances hold a strong handle and read their fields at
//! render time; value-typed instances materialize instance fields at
//! creation because the underlying bytes cannot be re-acquired once the
//! runtime resumes. Property getters are invoked through the eval
//! coordinator. Static members are shared across instances of the same class
//! within one snapshot via the static member cache.

use std::{collections::HashMap, sync::atomic::AtomicU64, sync::atomic::Ordering, sync::Arc};

use dashmap::DashMap;
use tracing::debug;

use crate::{
    error::{Error, Result},
    runtime::{
        helper, signature::TypeSignature, ClassToken, ElementType, EvalCall, FieldProps,
        MetadataImport, PropertyProps, RuntimeClass, RuntimeModule, RuntimeValue,
    },
    value::{factory, CaptureContext, NodeId, Value, VariableArena},
};

/// Suffix of compiler-generated property backing fields.
const BACKING_FIELD_SUFFIX: &str = ">k__BackingField";

/// If `name` is a mangled backing field, returns the property name it backs.
pub fn backing_field_property(name: &str) -> Option<&str> {
    name.strip_prefix('<')?.strip_suffix(BACKING_FIELD_SUFFIX)
}

/// How the class value reaches its member storage.
enum ClassState {
    /// Reference type: fields read from the heap object at render time.
    Reference { handle: Arc<dyn RuntimeValue> },
    /// Value type: instance fields captured at creation time.
    ValueType { members: Vec<EagerMember> },
}

struct EagerMember {
    name: String,
    value: std::result::Result<Arc<Value>, String>,
}

/// A class or struct value.
pub struct ClassValue {
    /// Short name of the owning module.
    pub module_name: String,
    /// Fully qualified class name.
    pub class_name: String,
    /// Token of the class.
    pub class_token: ClassToken,
    /// Generic instantiation, empty for non-generic classes.
    pub generic_args: Vec<TypeSignature>,
    /// `Class` for reference types, `ValueType` for structs.
    pub element_type: ElementType,
    class: Arc<dyn RuntimeClass>,
    module: Arc<dyn RuntimeModule>,
    metadata: Arc<dyn MetadataImport>,
    depth: i32,
    state: ClassState,
}

impl ClassValue {
    /// Creates a reference-typed class value over a strong handle.
    #[allow(clippy::too_many_arguments)]
    pub fn new_reference(
        module_name: String,
        class_name: String,
        generic_args: Vec<TypeSignature>,
        class: Arc<dyn RuntimeClass>,
        module: Arc<dyn RuntimeModule>,
        metadata: Arc<dyn MetadataImport>,
        handle: Arc<dyn RuntimeValue>,
        depth: i32,
    ) -> Self {
        Self {
            module_name,
            class_name,
            class_token: class.token(),
            generic_args,
            element_type: ElementType::Class,
            class,
            module,
            metadata,
            depth,
            state: ClassState::Reference { handle },
        }
    }

    /// Creates a value-typed class value, materializing instance fields from
    /// `object` immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn new_value_type(
        module_name: String,
        class_name: String,
        generic_args: Vec<TypeSignature>,
        class: Arc<dyn RuntimeClass>,
        module: Arc<dyn RuntimeModule>,
        metadata: Arc<dyn MetadataImport>,
        object: &Arc<dyn RuntimeValue>,
        depth: i32,
        ctx: &CaptureContext,
    ) -> Result<Self> {
        let mut members = Vec::new();
        if depth > 0 {
            for field in metadata.fields(class.token())? {
                if field.is_static {
                    continue;
                }
                let name = canonical_field_name(&field);
                let value = read_instance_field(object, &field, depth - 1, ctx)
                    .map(Arc::new)
                    .map_err(|e| e.to_string());
                members.push(EagerMember { name, value });
            }
        }

        Ok(Self {
            module_name,
            class_name,
            class_token: class.token(),
            generic_args,
            element_type: ElementType::ValueType,
            class,
            module,
            metadata,
            depth,
            state: ClassState::ValueType { members },
        })
    }

    /// The static type of this value.
    pub fn type_signature(&self) -> TypeSignature {
        TypeSignature {
            element_type: self.element_type,
            type_name: self.class_name.clone(),
            generic_args: self.generic_args.clone(),
            array_rank: 0,
        }
    }

    /// The heap handle for reference-typed instances, used as `this` when
    /// invoking getters and methods.
    pub fn this_handle(&self) -> Option<Arc<dyn RuntimeValue>> {
        match &self.state {
            ClassState::Reference { handle } => Some(handle.clone()),
            ClassState::ValueType { .. } => None,
        }
    }

    /// A member materialized at creation time, value-typed instances only.
    pub fn eager_member(&self, name: &str) -> Option<Arc<Value>> {
        match &self.state {
            ClassState::ValueType { members } => members
                .iter()
                .find(|m| m.name == name)
                .and_then(|m| m.value.as_ref().ok())
                .cloned(),
            ClassState::Reference { .. } => None,
        }
    }

    /// Reads one field of this instance (or class, for statics) as a model
    /// value.
    pub fn read_field(&self, field: &FieldProps, ctx: &CaptureContext) -> Result<Arc<Value>> {
        if field.is_literal {
            return literal_field_value(field).map(Arc::new);
        }

        if field.is_static {
            let raw = self.class.static_field_value(field.token, None)?;
            return factory::create_value(raw, self.depth - 1, ctx).map(Arc::new);
        }

        match &self.state {
            ClassState::Reference { handle } => {
                read_instance_field(handle, field, self.depth - 1, ctx).map(Arc::new)
            }
            ClassState::ValueType { members } => {
                let name = canonical_field_name(field);
                let member = members
                    .iter()
                    .find(|m| m.name == name)
                    .ok_or_else(|| Error::FieldOptimizedAway(name.clone()))?;
                match &member.value {
                    Ok(value) => Ok(value.clone()),
                    Err(message) => Err(Error::Unresolvable(message.clone())),
                }
            }
        }
    }

    /// Invokes a property getter through the coordinator and models the
    /// result.
    pub fn eval_property(
        &self,
        property: &PropertyProps,
        ctx: &CaptureContext,
    ) -> Result<Arc<Value>> {
        let getter = property
            .getter
            .ok_or_else(|| Error::Unresolvable(format!("property {} has no getter", property.name)))?;
        let this = self.this_handle().ok_or_else(|| {
            Error::NotImplemented(format!(
                "cannot evaluate property {} on a value type",
                property.name
            ))
        })?;

        let call =
            EvalCall { module: self.module.clone(), method: getter, this: Some(this), args: vec![] };
        let raw = ctx.coordinator.evaluate(call, &ctx.config)?;
        factory::create_value(raw, self.depth - 1, ctx).map(Arc::new)
    }

    pub(crate) fn populate_members(
        &self,
        arena: &mut VariableArena,
        parent: NodeId,
        ctx: &CaptureContext,
    ) -> Result<Vec<(NodeId, Arc<Value>)>> {
        if self.depth <= 0 {
            return Err(Error::DepthLimitReached);
        }

        let mut children = Vec::new();
        let mut backing_properties = Vec::new();

        let fields = self.metadata.fields(self.class_token)?;
        for field in &fields {
            if let Some(property) = backing_field_property(&field.name) {
                backing_properties.push(property.to_string());
            }
        }

        for field in &fields {
            let name = canonical_field_name(field);
            let node = arena.new_child(parent, name);
            let read = if field.is_static {
                self.static_member_value(field, ctx)
            } else {
                self.read_field(field, ctx)
            };
            match read {
                Ok(value) => children.push((node, value)),
                Err(err) => arena.node_mut(node).set_error(err.to_string()),
            }
        }

        if ctx.config.property_evaluation {
            for property in self.metadata.properties(self.class_token)? {
                // A backing field already rendered this member under the
                // property's name.
                if backing_properties.iter().any(|p| p == &property.name) {
                    continue;
                }
                let node = arena.new_child(parent, property.name.clone());
                match self.eval_property(&property, ctx) {
                    Ok(value) => children.push((node, value)),
                    Err(err) => arena.node_mut(node).set_error(err.to_string()),
                }
            }
        }

        Ok(children)
    }

    /// Reads a static member through the per-snapshot cache.
    fn static_member_value(&self, field: &FieldProps, ctx: &CaptureContext) -> Result<Arc<Value>> {
        let cache = &ctx.caches.static_members;
        if let Some(value) = cache.get(&self.module_name, &self.class_name, &field.name) {
            return Ok(value);
        }
        let value = self.read_field(field, ctx)?;
        cache.insert(&self.module_name, &self.class_name, &field.name, value.clone());
        Ok(value)
    }
}

/// Display name of a field: backing fields are canonicalized to the property
/// they back.
pub fn canonical_field_name(field: &FieldProps) -> String {
    backing_field_property(&field.name).unwrap_or(&field.name).to_string()
}

fn read_instance_field(
    object: &Arc<dyn RuntimeValue>,
    field: &FieldProps,
    depth: i32,
    ctx: &CaptureContext,
) -> Result<Value> {
    let (target, is_null) = helper::dereference(object.clone())?;
    if is_null {
        return Err(Error::Unresolvable(format!(
            "cannot read field {} of a null object",
            field.name
        )));
    }
    let raw = target.field_value(field.token)?;
    factory::create_value(raw, depth, ctx)
}

fn literal_field_value(field: &FieldProps) -> Result<Value> {
    let constant = field
        .default_value
        .as_ref()
        .ok_or_else(|| Error::LiteralField(field.name.clone()))?;
    let primitive = crate::value::PrimitiveValue::from_bytes(constant.element_type, &constant.bytes)?;
    Ok(Value::Primitive(primitive))
}

/// Process-wide cache of static members, keyed `(module, class)` and cleared
/// at the end of every snapshot to bound staleness.
#[derive(Default)]
pub struct StaticMemberCache {
    map: DashMap<(String, String), HashMap<String, Arc<Value>>>,
    cleared_total: AtomicU64,
}

impl StaticMemberCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value of a static member, if present.
    pub fn get(&self, module: &str, class: &str, member: &str) -> Option<Arc<Value>> {
        self.map
            .get(&(module.to_string(), class.to_string()))
            .and_then(|members| members.get(member).cloned())
    }

    /// Caches the value of a static member.
    pub fn insert(&self, module: &str, class: &str, member: &str, value: Arc<Value>) {
        self.map
            .entry((module.to_string(), class.to_string()))
            .or_default()
            .insert(member.to_string(), value);
    }

    /// Clears the cache at a snapshot boundary. Rapid-fire hits discard and
    /// re-read valid entries; the logged count makes that churn observable.
    pub fn clear(&self) {
        let entries: usize = self.map.iter().map(|kv| kv.value().len()).sum();
        if entries > 0 {
            self.cleared_total.fetch_add(entries as u64, Ordering::Relaxed);
            debug!(entries, total = self.cleared_total.load(Ordering::Relaxed), "static cache cleared");
        }
        self.map.clear();
    }

    /// Number of entries discarded over the lifetime of the process.
    pub fn cleared_total(&self) -> u64 {
        self.cleared_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_field_property() {
        assert_eq!(backing_field_property("<Count>k__BackingField"), Some("Count"));
        assert_eq!(backing_field_property("_count"), None);
        assert_eq!(backing_field_property("<Count>"), None);
    }

    #[test]
    fn test_static_cache_roundtrip_and_clear() {
        let cache = StaticMemberCache::new();
        assert!(cache.get("m", "C", "F").is_none());

        let value = Arc::new(Value::Primitive(
            crate::value::PrimitiveValue::from_bytes(
                crate::runtime::ElementType::I4,
                &5i32.to_le_bytes(),
            )
            .unwrap(),
        ));
        cache.insert("m", "C", "F", value);
        assert!(cache.get("m", "C", "F").is_some());
        assert!(cache.get("m", "C", "G").is_none());

        cache.clear();
        assert!(cache.get("m", "C", "F").is_none());
        assert_eq!(cache.cleared_total(), 1);
    }
}
