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

use crate::types::{LogLevel, SourceLocation, Variable};

/// One captured stack frame inside a snapshot.
///
/// Frames with no managed IL keep their `method_name` marker and empty
/// variable lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackFrame {
    /// `module!Class.Method`, or the undebuggable-code marker.
    pub method_name: String,
    /// Source location of the frame, when symbols resolve it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Local variables, rendered as value trees.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locals: Vec<Variable>,
    /// Method arguments (`this` first for instance methods).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Variable>,
}

impl StackFrame {
    /// Estimated serialized size in bytes.
    pub fn estimated_size(&self) -> usize {
        const FRAME_OVERHEAD: usize = 32;
        let mut size = FRAME_OVERHEAD + self.method_name.len();
        if let Some(location) = &self.location {
            size += 24 + location.path.len();
        }
        for variable in self.locals.iter().chain(self.arguments.iter()) {
            size += variable.estimated_size();
        }
        size
    }
}

/// The outbound message capturing one breakpoint hit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    /// Id of the breakpoint that produced this snapshot.
    pub id: String,
    /// Resolved location (path + effective line).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Whether the originating breakpoint is a log point.
    #[serde(default)]
    pub log_point: bool,
    /// Log severity echoed from the breakpoint.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Reader-side message template echoed from the breakpoint.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_message_format: String,
    /// Capture expression results, in request order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluated_expressions: Vec<Variable>,
    /// Stack frames, first (innermost) to top.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack_frames: Vec<StackFrame>,
}

impl Snapshot {
    /// Estimated serialized size in bytes, used against the snapshot budget.
    pub fn estimated_size(&self) -> usize {
        const MESSAGE_OVERHEAD: usize = 64;
        let mut size = MESSAGE_OVERHEAD + self.id.len() + self.log_message_format.len();
        if let Some(location) = &self.location {
            size += 24 + location.path.len();
        }
        for expression in &self.evaluated_expressions {
            size += expression.estimated_size();
        }
        for frame in &self.stack_frames {
            size += frame.estimated_size();
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = Snapshot {
            id: "b-1".to_string(),
            location: Some(SourceLocation { path: "prog.cs".to_string(), line: 42, column: 0 }),
            log_point: false,
            log_level: LogLevel::Info,
            log_message_format: String::new(),
            evaluated_expressions: vec![Variable {
                name: "x * 2".to_string(),
                value: "6".to_string(),
                type_name: "Int32".to_string(),
                members: vec![],
                status: None,
            }],
            stack_frames: vec![StackFrame {
                method_name: "prog!Prog.M".to_string(),
                location: Some(SourceLocation { path: "prog.cs".to_string(), line: 42, column: 0 }),
                locals: vec![],
                arguments: vec![Variable {
                    name: "x".to_string(),
                    value: "3".to_string(),
                    type_name: "Int32".to_string(),
                    members: vec![],
                    status: None,
                }],
            }],
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }

    #[test]
    fn test_estimated_size_tracks_serialized_size() {
        let mut snapshot = Snapshot { id: "b".to_string(), ..Default::default() };
        for i in 0..16 {
            snapshot.stack_frames.push(StackFrame {
                method_name: format!("m!C.F{i}"),
                location: None,
                locals: vec![Variable {
                    name: "local".to_string(),
                    value: "1234".to_string(),
                    type_name: "Int32".to_string(),
                    members: vec![],
                    status: None,
                }],
                arguments: vec![],
            });
        }

        let actual = serde_json::to_vec(&snapshot).unwrap().len();
        let estimated = snapshot.estimated_size();
        // The estimate only has to be a sane budget proxy: same order of
        // magnitude and never wildly below the real size.
        assert!(estimated >= actual / 2, "estimated {estimated} actual {actual}");
        assert!(estimated <= actual * 3, "estimated {estimated} actual {actual}");
    }
}
