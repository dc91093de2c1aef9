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

use serde::{Deserialize, Serialize};

/// A rendered value-tree node inside a snapshot: a local, an argument, an
/// evaluated expression or a member thereof.
///
/// Leaves carry `value`; compound values carry `members`. A node that could
/// not be rendered carries a `status` and nothing else, so one broken value
/// never poisons its siblings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variable {
    /// Display name (variable, argument, field, `[index]`, ...).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Rendered scalar value, empty for compound values.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    /// Rendered type string.
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_name: String,
    /// Child nodes, present for compound values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Variable>,
    /// Error or informational status attached to this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusMessage>,
}

/// Status attached to a [`Variable`] node when rendering stopped short.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusMessage {
    /// True for errors, false for informational notices such as the depth
    /// limit marker.
    #[serde(default)]
    pub is_error: bool,
    /// Human-readable description.
    pub message: String,
}

impl Variable {
    /// Creates a named, otherwise empty node.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Attaches an error status to this node.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = Some(StatusMessage { is_error: true, message: message.into() });
    }

    /// Attaches an informational status to this node.
    pub fn set_info(&mut self, message: impl Into<String>) {
        self.status = Some(StatusMessage { is_error: false, message: message.into() });
    }

    /// Estimated serialized size in bytes, used for budget enforcement.
    ///
    /// This intentionally over-approximates a little (fixed per-node
    /// overhead) rather than re-serializing the whole message on every
    /// budget check.
    pub fn estimated_size(&self) -> usize {
        const NODE_OVERHEAD: usize = 16;
        let mut size = NODE_OVERHEAD + self.name.len() + self.value.len() + self.type_name.len();
        if let Some(status) = &self.status {
            size += NODE_OVERHEAD + status.message.len();
        }
        for member in &self.members {
            size += member.estimated_size();
        }
        size
    }
}
