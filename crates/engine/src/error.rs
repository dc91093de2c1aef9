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

//! Error taxonomy of the engine.
//!
//! Inside a value tree, errors attach to the failing node and rendering
//! continues with siblings; inside a breakpoint, a condition type mismatch or
//! a forbidden method call aborts the snapshot while the breakpoint stays
//! armed; inside the registry, an unresolvable location leaves the breakpoint
//! tracked but unarmed so a later module load can resolve it.

use thiserror::Error;

/// Engine-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All failure kinds the engine distinguishes.
#[derive(Debug, Error)]
pub enum Error {
    /// A breakpoint location could not be resolved against any symbol file.
    #[error("breakpoint location not found: {0}")]
    NotFound(String),

    /// A metadata signature could not be parsed.
    #[error("cannot resolve signature: {0}")]
    Unresolvable(String),

    /// More than the allowed number of reference hops while dereferencing.
    #[error("cannot dereference more than {0} times")]
    TooManyIndirections(u32),

    /// The JIT removed the field; no value is available.
    #[error("field {0} was optimized away")]
    FieldOptimizedAway(String),

    /// The owning class has not been loaded by the runtime yet.
    #[error("class {0} is not loaded")]
    ClassNotLoaded(String),

    /// The field is a compile-time literal and has no storage slot.
    #[error("field {0} is a compile-time constant")]
    LiteralField(String),

    /// A static field's storage is not yet initialized.
    #[error("static field {0} is not yet available")]
    StaticFieldNotReady(String),

    /// A function evaluation did not complete within the timeout.
    #[error("function evaluation did not complete")]
    EvalNotComplete,

    /// The debuggee threw while evaluating on our behalf.
    #[error("exception thrown during evaluation: {0}")]
    EvalException(String),

    /// Value-tree expansion reached the configured depth.
    #[error("object evaluation limit reached")]
    DepthLimitReached,

    /// The snapshot byte budget was exhausted.
    #[error("snapshot size budget exceeded")]
    BudgetExceeded,

    /// A condition needed a method call while method calls are disabled.
    #[error("evaluation of this expression requires a method call")]
    EvaluationRequiresMethodCall,

    /// Static types don't line up (condition not Boolean, bad operands, ...).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Pipe transport failure.
    #[error("pipe error: {0}")]
    Io(#[from] std::io::Error),

    /// Element type, frame kind or runtime capability outside the supported
    /// set. Surfaced upward without guessing.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Compilation of a user expression failed.
    #[error("failed to compile expression: {0}")]
    Compile(String),

    /// Anything the runtime boundary reports that has no finer kind. The
    /// numeric code is the vendor error code when one exists.
    #[error("runtime error in {operation} (code {code:#010x})")]
    Runtime {
        /// Name of the failing runtime operation.
        operation: &'static str,
        /// Vendor error code, zero when unavailable.
        code: u32,
    },
}

impl Error {
    /// Shorthand for a [`Error::Runtime`] with no vendor code.
    pub fn runtime(operation: &'static str) -> Self {
        Self::Runtime { operation, code: 0 }
    }

    /// True when the error should abort the enclosing snapshot instead of
    /// being attached to a single value node.
    pub fn aborts_snapshot(&self) -> bool {
        matches!(self, Self::EvaluationRequiresMethodCall | Self::TypeMismatch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_operation_and_code() {
        let err = Error::Runtime { operation: "GetMethodProps", code: 0x8013_1309 };
        let text = err.to_string();
        assert!(text.contains("GetMethodProps"));
        assert!(text.contains("0x80131309"));
    }

    #[test]
    fn test_abort_classification() {
        assert!(Error::EvaluationRequiresMethodCall.aborts_snapshot());
        assert!(Error::TypeMismatch("condition must be Boolean".to_string()).aborts_snapshot());
        assert!(!Error::DepthLimitReached.aborts_snapshot());
        assert!(!Error::runtime("Dereference").aborts_snapshot());
    }
}
