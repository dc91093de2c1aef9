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

//! Breadth-first expansion of value trees into wire nodes.
//!
//! Nodes live in a flat arena and reference their children by index, so the
//! expansion queue can hand out node ids freely while the arena keeps sole
//! ownership of the tree. The outer driver aborts expansion the moment the
//! supplied predicate reports the byte budget crossed, which degrades output
//! gracefully instead of truncating a subtree midway.

use std::{collections::VecDeque, sync::Arc};

use sdb_common::Variable;

use crate::{error::Result, value::CaptureContext, Value};

/// Index of a node in a [`VariableArena`].
pub type NodeId = usize;

struct ArenaNode {
    var: Variable,
    children: Vec<NodeId>,
}

/// Flat storage for a value tree under construction.
#[derive(Default)]
pub struct VariableArena {
    nodes: Vec<ArenaNode>,
}

impl VariableArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a root node with the given name.
    pub fn new_root(&mut self, name: impl Into<String>) -> NodeId {
        self.nodes.push(ArenaNode { var: Variable::named(name), children: Vec::new() });
        self.nodes.len() - 1
    }

    /// Allocates a child node under `parent`.
    pub fn new_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = self.new_root(name);
        self.nodes[parent].children.push(id);
        id
    }

    /// Mutable access to a node's wire data.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Variable {
        &mut self.nodes[id].var
    }

    /// Read access to a node's wire data.
    pub fn node(&self, id: NodeId) -> &Variable {
        &self.nodes[id].var
    }

    /// Estimated serialized size of every node in the arena.
    pub fn estimated_size(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| {
                const NODE_OVERHEAD: usize = 16;
                let var = &n.var;
                let mut size =
                    NODE_OVERHEAD + var.name.len() + var.value.len() + var.type_name.len();
                if let Some(status) = &var.status {
                    size += NODE_OVERHEAD + status.message.len();
                }
                size
            })
            .sum()
    }

    /// Materializes the subtree rooted at `id` into a nested wire node.
    pub fn to_variable(&self, id: NodeId) -> Variable {
        let node = &self.nodes[id];
        let mut var = node.var.clone();
        var.members = node.children.iter().map(|&child| self.to_variable(child)).collect();
        var
    }
}

/// One queued unit of expansion work.
pub struct BfsItem {
    /// Arena node to populate.
    pub node: NodeId,
    /// Value backing the node.
    pub value: Arc<Value>,
    /// Depth in the expansion, capped by the configured object depth.
    pub level: u32,
}

/// Runs the breadth-first expansion until the queue drains or `terminate`
/// reports the budget crossed.
///
/// For each dequeued item: populate its type; past the depth limit, mark the
/// node and move on; null values keep type-only nodes; otherwise request
/// members, pushing children one level deeper and populating the scalar
/// value of leaves. Failures attach to the node and never stop the sweep.
pub fn perform_bfs(
    arena: &mut VariableArena,
    queue: &mut VecDeque<BfsItem>,
    terminate: &dyn Fn(&VariableArena) -> bool,
    ctx: &CaptureContext,
    max_items: i32,
) -> Result<()> {
    while let Some(item) = queue.pop_front() {
        if terminate(arena) {
            return Err(crate::error::Error::BudgetExceeded);
        }

        if let Err(err) = item.value.populate_type(arena.node_mut(item.node)) {
            arena.node_mut(item.node).set_error(err.to_string());
            continue;
        }

        if item.level >= ctx.config.object_eval_depth {
            arena.node_mut(item.node).set_info("Object evaluation limit reached");
            continue;
        }

        if item.value.is_null() {
            continue;
        }

        match item.value.populate_members(arena, item.node, ctx, max_items) {
            Ok(Some(children)) => {
                for (node, value) in children {
                    queue.push_back(BfsItem { node, value, level: item.level + 1 });
                }
            }
            Ok(None) => {
                if let Err(err) = item.value.populate_value(arena.node_mut(item.node)) {
                    arena.node_mut(item.node).set_error(err.to_string());
                }
            }
            Err(err) => {
                arena.node_mut(item.node).set_error(err.to_string());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_tree_roundtrip() {
        let mut arena = VariableArena::new();
        let root = arena.new_root("root");
        let a = arena.new_child(root, "a");
        let _b = arena.new_child(root, "b");
        let _aa = arena.new_child(a, "aa");

        arena.node_mut(a).value = "1".to_string();

        let tree = arena.to_variable(root);
        assert_eq!(tree.name, "root");
        assert_eq!(tree.members.len(), 2);
        assert_eq!(tree.members[0].name, "a");
        assert_eq!(tree.members[0].value, "1");
        assert_eq!(tree.members[0].members.len(), 1);
        assert_eq!(tree.members[0].members[0].name, "aa");
    }

    #[test]
    fn test_arena_size_grows() {
        let mut arena = VariableArena::new();
        let root = arena.new_root("root");
        let before = arena.estimated_size();
        arena.node_mut(root).value = "some rather long value".to_string();
        assert!(arena.estimated_size() > before);
    }
}
