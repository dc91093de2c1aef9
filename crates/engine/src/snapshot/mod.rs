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

//! Snapshot assembly at a hit site.
//!
//! For each breakpoint matched at the hit location, in insertion order: the
//! condition is compiled against the materialized first frame and must be
//! `Boolean` (false means no snapshot); capture expressions compile against
//! a fresh active frame each, because evaluating one can perturb frame
//! state; the stack is walked and rendered under the 64 KiB budget. The
//! assembled message goes to the registry's writer.

use std::{collections::VecDeque, sync::Arc};

use tracing::{debug, info, warn};

use sdb_common::{Snapshot, SourceLocation};

use crate::{
    breakpoints::{BreakpointRegistry, BreakpointSpec},
    config::{MAXIMUM_COLLECTION_EXPRESSION_SIZE, MAXIMUM_SNAPSHOT_SIZE},
    error::{Error, Result},
    eval::{compile_expression, EvalContext},
    frame::{collection::FrameCollection, StackFrame},
    runtime::ElementType,
    symbols::SymbolStore,
    value::{perform_bfs, BfsItem, CaptureContext, VariableArena},
};

/// Assembles and emits snapshots for every breakpoint matched at one hit.
///
/// A condition type mismatch or a forbidden method call aborts that
/// breakpoint's snapshot (the breakpoint stays armed); other failures are
/// attached to the affected nodes and the snapshot stays best-effort.
pub fn process_hit(
    specs: &[BreakpointSpec],
    registry: &BreakpointRegistry,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<()> {
    for spec in specs {
        match assemble_snapshot(spec, symbols, ctx) {
            Ok(Some(snapshot)) => {
                registry.write_snapshot(&snapshot)?;
                debug!(id = %spec.id, size = snapshot.estimated_size(), "snapshot written");
            }
            Ok(None) => {
                info!(id = %spec.id, "breakpoint condition is not met");
            }
            // An abort is scoped to this breakpoint; the others at the same
            // location still get their snapshots.
            Err(err) => {
                warn!(id = %spec.id, %err, "snapshot aborted");
            }
        }
    }
    Ok(())
}

/// Builds the snapshot for one breakpoint; `Ok(None)` when the condition
/// evaluated to false.
fn assemble_snapshot(
    spec: &BreakpointSpec,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<Option<Snapshot>> {
    let mut frames = FrameCollection::new();

    if !spec.condition.is_empty() {
        let first_frame = frames.ensure_first_frame(symbols, ctx)?;
        if first_frame.is_empty || !first_frame.is_processed_il {
            return Err(Error::NotImplemented(
                "conditional breakpoints are not supported on undebuggable frames".to_string(),
            ));
        }

        let compiled = compile_expression(&spec.condition, &first_frame, symbols, ctx)?;
        if compiled.signature().element_type != ElementType::Boolean {
            return Err(Error::TypeMismatch(
                "condition of the breakpoint must be of type Boolean".to_string(),
            ));
        }

        let ectx = EvalContext {
            frame: first_frame.as_ref(),
            ctx,
            allow_method_call: ctx.config.method_evaluation_in_condition,
        };
        if !compiled.evaluate_condition(&ectx)? {
            return Ok(None);
        }
    }

    frames.walk(symbols, ctx)?;

    let mut snapshot = Snapshot {
        id: spec.id.clone(),
        location: Some(SourceLocation {
            path: spec.file_path.clone(),
            line: spec.line,
            column: 0,
        }),
        log_point: spec.log_point,
        log_level: spec.log_level,
        log_message_format: spec.log_message_format.clone(),
        evaluated_expressions: Vec::new(),
        stack_frames: Vec::new(),
    };

    if !spec.expressions.is_empty() {
        evaluate_expressions(spec, &mut snapshot, symbols, ctx)?;
    }

    frames.populate_into(&mut snapshot, ctx)?;
    Ok(Some(snapshot))
}

/// Compiles and evaluates each capture expression against a fresh active
/// frame, rendering results at the snapshot's top level.
fn evaluate_expressions(
    spec: &BreakpointSpec,
    snapshot: &mut Snapshot,
    symbols: &SymbolStore,
    ctx: &CaptureContext,
) -> Result<()> {
    let mut arena = VariableArena::new();
    let mut queue = VecDeque::new();
    let mut roots = Vec::new();

    for expression in &spec.expressions {
        let node = arena.new_root(expression.clone());
        roots.push(node);

        let result = (|| {
            let raw_frame = ctx.coordinator.active_frame()?;
            let frame = StackFrame::from_runtime_frame(&raw_frame, symbols, true, ctx)?;
            let compiled = compile_expression(expression, &frame, symbols, ctx)?;
            let ectx = EvalContext { frame: &frame, ctx, allow_method_call: true };
            compiled.evaluate(&ectx)
        })();

        match result {
            Ok(value) => queue.push_back(BfsItem { node, value, level: 0 }),
            Err(err) if err.aborts_snapshot() => return Err(err),
            Err(err) => {
                warn!(id = %spec.id, expression = %expression, %err, "failed to evaluate expression");
                arena.node_mut(node).set_error(err.to_string());
            }
        }
    }

    let base_size = snapshot.estimated_size();
    let terminate = move |arena: &VariableArena| {
        base_size + arena.estimated_size() > MAXIMUM_SNAPSHOT_SIZE
    };
    match perform_bfs(&mut arena, &mut queue, &terminate, ctx, MAXIMUM_COLLECTION_EXPRESSION_SIZE)
    {
        Ok(()) => {}
        Err(Error::BudgetExceeded) => {
            debug!(id = %spec.id, "expression expansion stopped at the byte budget");
        }
        Err(err) => return Err(err),
    }

    snapshot.evaluated_expressions = roots.iter().map(|&id| arena.to_variable(id)).collect();
    Ok(())
}

/// The capture-task body handed to the coordinator for one hit: assembles
/// snapshots for every matched breakpoint.
pub fn capture_task(
    specs: Vec<BreakpointSpec>,
    registry: Arc<BreakpointRegistry>,
    symbols: Arc<SymbolStore>,
    ctx: CaptureContext,
) -> Result<()> {
    process_hit(&specs, &registry, &symbols, &ctx)
}
