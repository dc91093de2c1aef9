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

//! Environment variable name constants for SDB configuration.
//!
//! This module provides constant string names for all environment variables used by SDB.
//! These constants ensure consistency across the codebase and provide a single source of
//! truth for environment variable names.

/// Environment variable carrying the pipe name the agent connects to.
///
/// The debugger reader process creates the pipe; the agent connects to it to
/// receive breakpoint updates and to write snapshots back. On Unix platforms
/// the "pipe name" is the path of a Unix-domain socket.
pub const SDB_PIPE_NAME: &str = "SDB_PIPE_NAME";

/// Environment variable enabling property evaluation during value rendering.
///
/// When disabled, properties without a backing field are reported by
/// signature only and their getters are never invoked.
pub const SDB_PROPERTY_EVALUATION: &str = "SDB_PROPERTY_EVALUATION";

/// Environment variable enabling method calls inside breakpoint conditions.
///
/// When disabled, a condition that would require invoking a getter or method
/// aborts the snapshot instead of resuming the debuggee mid-inspection.
pub const SDB_METHOD_EVALUATION: &str = "SDB_METHOD_EVALUATION";

/// Environment variable overriding the log directory used by
/// [`crate::logging::init_logging`]. When unset, file logging is disabled and
/// logs go to stderr only.
pub const SDB_LOG_DIR: &str = "SDB_LOG_DIR";
