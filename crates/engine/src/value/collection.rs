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

//! Built-in collection values: `List<T>`, `HashSet<T>` and
//! `Dictionary<K,V>`.
//!
//! Collections are recognized by class name and rendered through their
//! internal storage: the list's `_items`/`_size` pair, the hash set's
//! `_slots`/`_count`/`_lastIndex` triple and the dictionary's
//! `entries`/`count` pair. Set slots and dictionary entries are value-type
//! structs whose `hashCode` field is `-1` for removed (tombstoned) items;
//! those are filtered out.

use std::sync::Arc;

use crate::{
    error::{Error, Result},
    runtime::{
        signature::TypeSignature, ElementType, FieldProps, MetadataImport, RuntimeValue,
    },
    value::{factory, CaptureContext, NodeId, PrimitiveKind, Value, VariableArena},
};

/// Fully qualified class name of `List<T>`.
pub const LIST_CLASS_NAME: &str = "System.Collections.Generic.List`1";
/// Fully qualified class name of `HashSet<T>`.
pub const HASH_SET_CLASS_NAME: &str = "System.Collections.Generic.HashSet`1";
/// Fully qualified class name of `Dictionary<K,V>`.
pub const DICTIONARY_CLASS_NAME: &str = "System.Collections.Generic.Dictionary`2";

const LIST_ITEMS_FIELD: &str = "_items";
const LIST_SIZE_FIELD: &str = "_size";
const HASH_SET_SLOTS_FIELD: &str = "_slots";
const HASH_SET_COUNT_FIELD: &str = "_count";
const HASH_SET_LAST_INDEX_FIELD: &str = "_lastIndex";
const DICTIONARY_ENTRIES_FIELD: &str = "entries";
const DICTIONARY_COUNT_FIELD: &str = "count";
const HASH_CODE_FIELD: &str = "hashCode";
const KEY_FIELD: &str = "key";
const VALUE_FIELD: &str = "value";
const COUNT_MEMBER_NAME: &str = "Count";

/// Which built-in collection a value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// `List<T>`.
    List,
    /// `HashSet<T>`.
    Set,
    /// `Dictionary<K,V>`.
    Dictionary,
}

impl CollectionKind {
    /// Recognizes a collection class by its fully qualified name.
    pub fn from_class_name(class_name: &str) -> Option<Self> {
        match class_name {
            LIST_CLASS_NAME => Some(Self::List),
            HASH_SET_CLASS_NAME => Some(Self::Set),
            DICTIONARY_CLASS_NAME => Some(Self::Dictionary),
            _ => None,
        }
    }
}

/// A built-in collection value.
pub struct CollectionValue {
    /// Which collection this is.
    pub kind: CollectionKind,
    /// Fully qualified class name.
    pub class_name: String,
    /// Generic instantiation.
    pub generic_args: Vec<TypeSignature>,
    /// Logical element count.
    pub count: i32,
    /// Last valid slot index, hash sets only.
    pub last_index: Option<i32>,
    items: Arc<Value>,
}

impl CollectionValue {
    /// Reads a collection's internal storage out of a (dereferenced) object.
    #[allow(clippy::too_many_arguments)]
    pub fn from_object(
        kind: CollectionKind,
        class_name: String,
        generic_args: Vec<TypeSignature>,
        object: &Arc<dyn RuntimeValue>,
        metadata: &dyn MetadataImport,
        class_token: u32,
        depth: i32,
        ctx: &CaptureContext,
    ) -> Result<Self> {
        let (count_field, items_field) = match kind {
            CollectionKind::List => (LIST_SIZE_FIELD, LIST_ITEMS_FIELD),
            CollectionKind::Set => (HASH_SET_COUNT_FIELD, HASH_SET_SLOTS_FIELD),
            CollectionKind::Dictionary => (DICTIONARY_COUNT_FIELD, DICTIONARY_ENTRIES_FIELD),
        };

        let count = read_i32_field(object, metadata, class_token, count_field, ctx)?;

        let items_props = field_props(metadata, class_token, items_field)?;
        let items_raw = object.field_value(items_props.token)?;
        let mut items_value = factory::create_value(items_raw, depth, ctx)?;
        if let Value::Array(array) = &mut items_value {
            // The backing array is usually larger than the logical count.
            array.set_item_cap(count);
        }

        let last_index = match kind {
            CollectionKind::Set => Some(read_i32_field(
                object,
                metadata,
                class_token,
                HASH_SET_LAST_INDEX_FIELD,
                ctx,
            )?),
            _ => None,
        };

        Ok(Self { kind, class_name, generic_args, count, last_index, items: Arc::new(items_value) })
    }

    /// The static type of this collection.
    pub fn type_signature(&self) -> TypeSignature {
        TypeSignature {
            element_type: ElementType::Class,
            type_name: self.class_name.clone(),
            generic_args: self.generic_args.clone(),
            array_rank: 0,
        }
    }

    pub(crate) fn populate_members(
        &self,
        arena: &mut VariableArena,
        parent: NodeId,
        ctx: &CaptureContext,
        max_items: i32,
    ) -> Result<Vec<(NodeId, Arc<Value>)>> {
        if self.count < 0 {
            return Err(Error::Unresolvable("collection has a negative count".to_string()));
        }

        // The Count member renders inline; it never enters the queue.
        let count_node = arena.new_child(parent, COUNT_MEMBER_NAME);
        let count_var = arena.node_mut(count_node);
        count_var.value = self.count.to_string();
        count_var.type_name = "Int32".to_string();

        match self.kind {
            CollectionKind::List => {
                self.items.populate_members(arena, parent, ctx, max_items).map(|c| c.unwrap_or_default())
            }
            CollectionKind::Set | CollectionKind::Dictionary => {
                self.populate_slots(arena, parent, ctx, max_items)
            }
        }
    }

    /// Walks set slots or dictionary entries, skipping tombstones.
    fn populate_slots(
        &self,
        arena: &mut VariableArena,
        parent: NodeId,
        ctx: &CaptureContext,
        max_items: i32,
    ) -> Result<Vec<(NodeId, Arc<Value>)>> {
        let Value::Array(slots) = self.items.as_ref() else {
            return Err(Error::Unresolvable("collection storage is not an array".to_string()));
        };

        let max_to_fetch = self.count.min(max_items);
        let max_index = match self.kind {
            CollectionKind::Set => self.last_index.unwrap_or(self.count),
            _ => self.count,
        };

        let mut children = Vec::new();
        let mut fetched = 0i32;
        for index in 0..max_index.max(0) as u32 {
            let slot = slots.element_value(index, ctx)?;
            let Value::Class(entry) = &slot else {
                return Err(Error::Unresolvable(format!(
                    "collection slot {index} is not a struct"
                )));
            };

            let hash_code = entry
                .eager_member(HASH_CODE_FIELD)
                .ok_or_else(|| Error::Unresolvable(format!("slot {index} has no hashCode")))?;
            if as_i32(&hash_code) == Some(-1) {
                continue;
            }

            let value = entry
                .eager_member(VALUE_FIELD)
                .ok_or_else(|| Error::Unresolvable(format!("slot {index} has no value")))?;

            let item_node = arena.new_child(parent, format!("[{fetched}]"));
            match self.kind {
                CollectionKind::Set => children.push((item_node, value)),
                CollectionKind::Dictionary => {
                    let key = entry
                        .eager_member(KEY_FIELD)
                        .ok_or_else(|| Error::Unresolvable(format!("slot {index} has no key")))?;
                    let key_node = arena.new_child(item_node, KEY_FIELD);
                    let value_node = arena.new_child(item_node, VALUE_FIELD);
                    children.push((key_node, key));
                    children.push((value_node, value));
                }
                CollectionKind::List => unreachable!(),
            }

            fetched += 1;
            if fetched >= max_to_fetch {
                break;
            }
        }

        Ok(children)
    }
}

fn field_props(
    metadata: &dyn MetadataImport,
    class_token: u32,
    name: &str,
) -> Result<FieldProps> {
    metadata
        .find_field(class_token, name)?
        .ok_or_else(|| Error::Unresolvable(format!("collection has no {name} field")))
}

fn read_i32_field(
    object: &Arc<dyn RuntimeValue>,
    metadata: &dyn MetadataImport,
    class_token: u32,
    name: &str,
    ctx: &CaptureContext,
) -> Result<i32> {
    let props = field_props(metadata, class_token, name)?;
    let raw = object.field_value(props.token)?;
    let value = factory::create_value(raw, 0, ctx)?;
    as_i32(&Arc::new(value))
        .ok_or_else(|| Error::Unresolvable(format!("collection field {name} is not Int32")))
}

fn as_i32(value: &Arc<Value>) -> Option<i32> {
    match value.as_ref() {
        Value::Primitive(p) => match p.kind {
            PrimitiveKind::Int32(v) => Some(v),
            _ => p.as_i64().and_then(|v| i32::try_from(v).ok()),
        },
        _ => None,
    }
}
