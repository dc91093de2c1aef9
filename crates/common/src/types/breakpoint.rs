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

/// A source location inside the debuggee, as the reader side names it.
///
/// `path` is matched against symbol-file document paths case-insensitively
/// with normalized separators; `line` is 1-based. When a breakpoint is
/// resolved the effective line (the start line of the chosen sequence point)
/// is written back here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Path to the source file.
    pub path: String,
    /// Line number in the source file (1-based).
    pub line: u32,
    /// Optional column. Currently unused by resolution.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub column: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// Severity attached to log-point breakpoints.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Informational log point.
    #[default]
    Info,
    /// Warning log point.
    Warning,
    /// Error log point.
    Error,
}

/// A breakpoint definition received from the reader over the pipe.
///
/// The same envelope doubles as the server-control channel: a message with
/// `kill_server` set asks the agent to drain and exit and is never armed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BreakpointRequest {
    /// Opaque client identifier; updates with a known id mutate the existing
    /// breakpoint instead of creating a new one.
    pub id: String,
    /// Requested source location. Absent for pure control messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Whether the breakpoint should be armed.
    #[serde(default)]
    pub activated: bool,
    /// Drain request; the sync loop returns when it sees this.
    #[serde(default)]
    pub kill_server: bool,
    /// Optional condition expression; must compile to `Boolean`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
    /// Capture expressions evaluated at every hit, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<String>,
    /// Whether this is a log point rather than a capture point.
    #[serde(default)]
    pub log_point: bool,
    /// Log severity for log points.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Reader-side message template for log points.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_message_format: String,
}

impl BreakpointRequest {
    /// Creates a drain request.
    pub fn kill_server() -> Self {
        Self { kill_server: true, ..Default::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let req = BreakpointRequest {
            id: "b-1".to_string(),
            location: Some(SourceLocation { path: "Prog.cs".to_string(), line: 42, column: 0 }),
            activated: true,
            kill_server: false,
            condition: "x > 10".to_string(),
            expressions: vec!["x * 2".to_string()],
            log_point: false,
            log_level: LogLevel::Info,
            log_message_format: String::new(),
        };

        let json = serde_json::to_string(&req).unwrap();
        let back: BreakpointRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn test_minimal_message_defaults() {
        let req: BreakpointRequest = serde_json::from_str(r#"{"id":"b-2"}"#).unwrap();
        assert_eq!(req.id, "b-2");
        assert!(req.location.is_none());
        assert!(!req.activated);
        assert!(!req.kill_server);
        assert!(req.condition.is_empty());
        assert!(req.expressions.is_empty());
    }

    #[test]
    fn test_kill_server_constructor() {
        let req = BreakpointRequest::kill_server();
        assert!(req.kill_server);
        assert!(!req.activated);
        assert!(req.location.is_none());
    }

    #[test]
    fn test_column_skipped_when_zero() {
        let loc = SourceLocation { path: "A.cs".to_string(), line: 1, column: 0 };
        let json = serde_json::to_string(&loc).unwrap();
        assert!(!json.contains("column"));

        let loc = SourceLocation { path: "A.cs".to_string(), line: 1, column: 7 };
        let json = serde_json::to_string(&loc).unwrap();
        assert!(json.contains("\"column\":7"));
    }
}
