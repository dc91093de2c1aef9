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

//! Engine configuration and the fixed capture limits.

use std::time::Duration;

/// The whole snapshot message must stay under this many bytes.
pub const MAXIMUM_SNAPSHOT_SIZE: usize = 65536;

/// At most this many frames are walked per snapshot.
pub const MAXIMUM_STACK_FRAMES: usize = 20;

/// At most this many frames get IL-level variable processing.
pub const MAXIMUM_STACK_FRAMES_WITH_VARIABLES: usize = 4;

/// Default number of eager expansion levels for a value tree.
pub const DEFAULT_OBJECT_EVAL_DEPTH: u32 = 5;

/// Reference chains longer than this fail with `TooManyIndirections`.
pub const MAXIMUM_REFERENCE_DEPTH: u32 = 10;

/// Collections expose at most this many items when rendered inside frames.
pub const MAXIMUM_COLLECTION_SIZE: i32 = 10;

/// Collections expose at most this many items inside evaluated expressions.
pub const MAXIMUM_COLLECTION_EXPRESSION_SIZE: i32 = 100;

/// Tunable knobs of the engine, wired from the CLI.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pipe name (Unix-domain socket path) the agent connects to.
    pub pipe_name: String,
    /// Whether property getters may be invoked while rendering values.
    pub property_evaluation: bool,
    /// Whether breakpoint conditions may invoke methods and getters.
    pub method_evaluation_in_condition: bool,
    /// Eager expansion depth for value trees.
    pub object_eval_depth: u32,
    /// How long a single function evaluation may take before the capture
    /// task gives up with `EvalNotComplete`.
    pub eval_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipe_name: String::new(),
            property_evaluation: true,
            method_evaluation_in_condition: false,
            object_eval_depth: DEFAULT_OBJECT_EVAL_DEPTH,
            eval_timeout: Duration::from_secs(60),
        }
    }
}
