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

//! Managed array values.

use std::sync::Arc;

use crate::{
    error::Result,
    runtime::{helper, signature::TypeSignature, ElementType, RuntimeValue},
    value::{factory, CaptureContext, NodeId, Value, VariableArena},
};

/// An array value held by strong handle; elements are materialized lazily
/// during rendering.
pub struct ArrayValue {
    element_sig: TypeSignature,
    dimensions: Vec<u32>,
    rank: u32,
    handle: Arc<dyn RuntimeValue>,
    depth: i32,
    /// Cap imposed by an owning builtin collection (its logical count can be
    /// smaller than the backing array).
    item_cap: Option<i32>,
}

impl ArrayValue {
    /// Wraps an array handle.
    pub fn new(
        element_sig: TypeSignature,
        dimensions: Vec<u32>,
        rank: u32,
        handle: Arc<dyn RuntimeValue>,
        depth: i32,
    ) -> Self {
        Self { element_sig, dimensions, rank, handle, depth, item_cap: None }
    }

    /// Restricts rendering to the first `cap` elements.
    pub fn set_item_cap(&mut self, cap: i32) {
        self.item_cap = Some(cap);
    }

    /// The debuggee handle of the array.
    pub fn handle(&self) -> Arc<dyn RuntimeValue> {
        self.handle.clone()
    }

    /// Total element count.
    pub fn total_elements(&self) -> u32 {
        self.dimensions.iter().product()
    }

    /// The static type of this array.
    pub fn type_signature(&self) -> TypeSignature {
        TypeSignature {
            element_type: if self.rank == 1 { ElementType::SzArray } else { ElementType::Array },
            type_name: self.element_sig.type_name.clone(),
            generic_args: vec![self.element_sig.clone()],
            array_rank: self.rank,
        }
    }

    /// Reads one element by flattened index.
    pub fn element(&self, index: u32) -> Result<Arc<dyn RuntimeValue>> {
        let (array, _) = helper::dereference(self.handle.clone())?;
        array.array_element(index)
    }

    /// Builds a model value for one element.
    pub fn element_value(&self, index: u32, ctx: &CaptureContext) -> Result<Value> {
        let raw = self.element(index)?;
        factory::create_value(raw, self.depth - 1, ctx)
    }

    pub(crate) fn populate_members(
        &self,
        arena: &mut VariableArena,
        parent: NodeId,
        ctx: &CaptureContext,
        max_items: i32,
    ) -> Result<Vec<(NodeId, Arc<Value>)>> {
        let mut limit = self.total_elements().min(max_items.max(0) as u32);
        if let Some(cap) = self.item_cap {
            limit = limit.min(cap.max(0) as u32);
        }

        let mut children = Vec::new();
        for index in 0..limit {
            let node = arena.new_child(parent, format!("[{index}]"));
            match self.element_value(index, ctx) {
                Ok(value) => children.push((node, Arc::new(value))),
                Err(err) => arena.node_mut(node).set_error(err.to_string()),
            }
        }
        Ok(children)
    }
}
