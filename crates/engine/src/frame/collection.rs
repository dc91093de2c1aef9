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

//! The walked stack of one hit, and its rendering under the snapshot byte
//! budget.

use std::sync::Arc;

use sdb_common::{Snapshot, StackFrame as WireStackFrame};

use crate::{
    config::{
        MAXIMUM_COLLECTION_SIZE, MAXIMUM_SNAPSHOT_SIZE, MAXIMUM_STACK_FRAMES,
        MAXIMUM_STACK_FRAMES_WITH_VARIABLES,
    },
    error::Result,
    frame::StackFrame,
    symbols::SymbolStore,
    value::CaptureContext,
};

/// The frames captured for one breakpoint hit.
///
/// The innermost frame is materialized early when a condition or expression
/// needs it and reused as the first entry of the walk.
#[derive(Default)]
pub struct FrameCollection {
    frames: Vec<Arc<StackFrame>>,
    first_frame: Option<Arc<StackFrame>>,
    walked: bool,
    processed_il_count: usize,
}

impl FrameCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Materializes (once) the innermost frame with full IL processing.
    pub fn ensure_first_frame(
        &mut self,
        symbols: &SymbolStore,
        ctx: &CaptureContext,
    ) -> Result<Arc<StackFrame>> {
        if let Some(first) = &self.first_frame {
            return Ok(first.clone());
        }
        let raw = ctx.coordinator.active_frame()?;
        let frame = Arc::new(StackFrame::from_runtime_frame(&raw, symbols, true, ctx)?);
        self.first_frame = Some(frame.clone());
        Ok(frame)
    }

    /// Walks the managed stack, at most [`MAXIMUM_STACK_FRAMES`] deep with at
    /// most [`MAXIMUM_STACK_FRAMES_WITH_VARIABLES`] IL-processed frames.
    pub fn walk(&mut self, symbols: &SymbolStore, ctx: &CaptureContext) -> Result<()> {
        if self.walked {
            return Ok(());
        }

        let raw_frames = ctx.coordinator.stack_walk()?;
        let mut il_processed = 0usize;
        let mut iter = raw_frames.into_iter();

        // The frame materialized for the condition is the innermost one;
        // reuse it instead of capturing twice.
        if let Some(first) = &self.first_frame {
            self.frames.push(first.clone());
            if first.is_processed_il {
                il_processed += 1;
            }
            let _ = iter.next();
        }

        for raw in iter {
            if self.frames.len() >= MAXIMUM_STACK_FRAMES {
                break;
            }
            let process_il = il_processed < MAXIMUM_STACK_FRAMES_WITH_VARIABLES;
            let frame = Arc::new(StackFrame::from_runtime_frame(&raw, symbols, process_il, ctx)?);
            if frame.is_processed_il {
                il_processed += 1;
            }
            self.frames.push(frame);
        }

        self.processed_il_count = il_processed;
        self.walked = true;
        Ok(())
    }

    /// The captured frames, innermost first.
    pub fn frames(&self) -> &[Arc<StackFrame>] {
        &self.frames
    }

    /// Renders all frames into the snapshot under the byte budget: each
    /// frame gets half of what remains, except the last IL-processed frame,
    /// which gets all of it.
    pub fn populate_into(&self, snapshot: &mut Snapshot, ctx: &CaptureContext) -> Result<()> {
        ctx.coordinator.wait_for_ready_signal();

        let mut frame_budget =
            MAXIMUM_SNAPSHOT_SIZE.saturating_sub(snapshot.estimated_size()) / 2;
        let mut il_populated = 0usize;

        for frame in &self.frames {
            if il_populated + 1 == self.processed_il_count {
                frame_budget = MAXIMUM_SNAPSHOT_SIZE.saturating_sub(snapshot.estimated_size());
            }

            let mut proto = WireStackFrame::default();
            frame.populate_into(&mut proto, frame_budget, ctx, MAXIMUM_COLLECTION_SIZE)?;
            if frame.is_processed_il {
                il_populated += 1;
            }
            snapshot.stack_frames.push(proto);

            if snapshot.estimated_size() > MAXIMUM_SNAPSHOT_SIZE {
                break;
            }
            frame_budget = MAXIMUM_SNAPSHOT_SIZE.saturating_sub(snapshot.estimated_size()) / 2;
        }

        Ok(())
    }
}
