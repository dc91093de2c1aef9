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

//! The breakpoint registry: the collection of breakpoint records, their
//! resolution against symbol files, and runtime arming/disarming.
//!
//! Two active breakpoints at the same `(file, line)` share a single armed
//! runtime breakpoint; the runtime handle is disarmed only when the last
//! active record sharing it is deactivated. Records whose location cannot be
//! resolved yet stay tracked, and later module loads retry them.

pub mod resolver;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use sdb_common::{normalize_expression, BreakpointRequest, LogLevel, Snapshot};

use crate::{
    error::{Error, Result},
    runtime::{MetadataImport as _, MethodToken, RuntimeBreakpoint, RuntimeModule},
    symbols::SymbolStore,
};

use resolver::{resolve_in_file, split_file_path};

/// Where emitted snapshots go. The pipe writer implements this; tests use an
/// in-memory sink.
pub trait SnapshotSink: Send {
    /// Writes one snapshot message.
    fn write(&mut self, snapshot: &Snapshot) -> Result<()>;
}

/// The resolved-and-armed half of a breakpoint record.
struct ArmedLocation {
    method_def: MethodToken,
    method_token: MethodToken,
    il_offset: u32,
    effective_line: u32,
    handle: Arc<dyn RuntimeBreakpoint>,
}

/// One tracked breakpoint.
struct BreakpointRecord {
    id: String,
    /// Lower-cased request path.
    file_path: String,
    /// Line as requested by the client; dedup matches on this.
    requested_line: u32,
    /// Effective line: the chosen sequence point's start line once resolved.
    line: u32,
    #[allow(dead_code)]
    column: u32,
    condition: String,
    expressions: Vec<String>,
    log_point: bool,
    log_level: LogLevel,
    log_message_format: String,
    /// Client-requested activation.
    enabled: bool,
    armed: Option<ArmedLocation>,
}

/// The plain data a capture task needs about one matched breakpoint.
#[derive(Debug, Clone)]
pub struct BreakpointSpec {
    /// Client id.
    pub id: String,
    /// Lower-cased request path.
    pub file_path: String,
    /// Effective (resolved) line.
    pub line: u32,
    /// Condition source, empty for unconditional breakpoints.
    pub condition: String,
    /// Capture expression sources, in order.
    pub expressions: Vec<String>,
    /// Log-point flag.
    pub log_point: bool,
    /// Log severity.
    pub log_level: LogLevel,
    /// Log message template.
    pub log_message_format: String,
}

/// Holds all breakpoints behind one mutex and owns the snapshot writer.
#[derive(Default)]
pub struct BreakpointRegistry {
    breakpoints: Mutex<Vec<BreakpointRecord>>,
    writer: Mutex<Option<Box<dyn SnapshotSink>>>,
}

impl BreakpointRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the snapshot writer.
    pub fn set_writer(&self, writer: Box<dyn SnapshotSink>) {
        *self.writer.lock() = Some(writer);
    }

    /// Writes a snapshot through the installed writer.
    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut writer = self.writer.lock();
        match writer.as_mut() {
            Some(writer) => writer.write(snapshot),
            None => Err(Error::NotImplemented("no snapshot writer installed".to_string())),
        }
    }

    /// The only mutator: applies one request from the reader.
    ///
    /// A known id updates condition/expressions and flips the armed state; an
    /// unknown active id is armed, preferring the runtime handle of an
    /// existing breakpoint at the same `(file, line)` over a fresh
    /// resolution.
    pub fn update_breakpoint(&self, request: &BreakpointRequest, symbols: &SymbolStore) -> Result<()> {
        let location = request.location.as_ref();
        let mut breakpoints = self.breakpoints.lock();

        if let Some(index) = breakpoints.iter().position(|b| b.id == request.id) {
            return Self::update_existing(&mut breakpoints, index, request);
        }

        if !request.activated {
            return Ok(());
        }

        let location = location.ok_or_else(|| {
            Error::NotFound(format!("breakpoint {} has no location", request.id))
        })?;
        let file_path = location.path.to_lowercase();

        let mut record = BreakpointRecord {
            id: request.id.clone(),
            file_path,
            requested_line: location.line,
            line: location.line,
            column: location.column,
            condition: normalize_condition(&request.condition),
            expressions: request.expressions.clone(),
            log_point: request.log_point,
            log_level: request.log_level,
            log_message_format: request.log_message_format.clone(),
            enabled: true,
            armed: None,
        };

        // Reuse the runtime handle of a breakpoint at the same location.
        let shared = breakpoints
            .iter()
            .filter(|b| {
                b.file_path == record.file_path && b.requested_line == record.requested_line
            })
            .find_map(|b| b.armed.as_ref())
            .map(|a| ArmedLocation {
                method_def: a.method_def,
                method_token: a.method_token,
                il_offset: a.il_offset,
                effective_line: a.effective_line,
                handle: a.handle.clone(),
            });
        if let Some(armed) = shared {
            if !armed.handle.is_active()? {
                armed.handle.activate(true)?;
            }
            record.line = armed.effective_line;
            record.armed = Some(armed);
            breakpoints.push(record);
            return Ok(());
        }

        match Self::resolve_and_arm(&mut record, symbols) {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                // Stays tracked; a later module load may resolve it.
                info!(id = %record.id, path = %record.file_path, line = record.line,
                    "breakpoint location not resolvable yet");
            }
            Err(err) => {
                breakpoints.push(record);
                return Err(err);
            }
        }
        breakpoints.push(record);
        Ok(())
    }

    fn update_existing(
        breakpoints: &mut Vec<BreakpointRecord>,
        index: usize,
        request: &BreakpointRequest,
    ) -> Result<()> {
        breakpoints[index].condition = normalize_condition(&request.condition);
        breakpoints[index].expressions = request.expressions.clone();
        breakpoints[index].log_point = request.log_point;
        breakpoints[index].log_level = request.log_level;
        breakpoints[index].log_message_format = request.log_message_format.clone();

        if breakpoints[index].enabled == request.activated {
            return Ok(());
        }
        breakpoints[index].enabled = request.activated;

        let Some(handle) = breakpoints[index].armed.as_ref().map(|a| a.handle.clone()) else {
            return Ok(());
        };

        if request.activated {
            if !handle.is_active()? {
                handle.activate(true)?;
            }
            return Ok(());
        }

        // Disarm only when no other enabled record shares this handle.
        let shared_elsewhere = breakpoints.iter().enumerate().any(|(i, b)| {
            i != index &&
                b.enabled &&
                b.armed.as_ref().is_some_and(|a| Arc::ptr_eq(&a.handle, &handle))
        });
        if !shared_elsewhere && handle.is_active()? {
            handle.activate(false)?;
        }
        Ok(())
    }

    /// Resolves against all ingested symbol files and arms the first match.
    fn resolve_and_arm(record: &mut BreakpointRecord, symbols: &SymbolStore) -> Result<()> {
        let segments = split_file_path(&record.file_path);

        for module_symbols in symbols.all() {
            let Some(resolved) =
                resolve_in_file(&module_symbols.file, &segments, record.requested_line)
            else {
                continue;
            };

            let (handle, method_token) =
                Self::arm(&module_symbols.module, resolved.method_def, resolved.il_offset)?;
            debug!(
                id = %record.id,
                method_token,
                il_offset = resolved.il_offset,
                line = resolved.effective_line,
                "armed breakpoint"
            );
            record.armed = Some(ArmedLocation {
                method_def: resolved.method_def,
                method_token,
                il_offset: resolved.il_offset,
                effective_line: resolved.effective_line,
                handle,
            });
            record.line = resolved.effective_line;
            return Ok(());
        }

        Err(Error::NotFound(format!("{}:{}", record.file_path, record.requested_line)))
    }

    /// Maps a symbol method-definition to the runtime method token by
    /// enumerating same-named methods on the owning type and matching the
    /// signature blob and virtual address, then creates and activates the
    /// function breakpoint.
    fn arm(
        module: &Arc<dyn RuntimeModule>,
        method_def: MethodToken,
        il_offset: u32,
    ) -> Result<(Arc<dyn RuntimeBreakpoint>, MethodToken)> {
        let metadata = module.metadata()?;
        let target = metadata.method_props(method_def)?;

        for candidate in metadata.methods_with_name(target.class_token, &target.name)? {
            let props = metadata.method_props(candidate)?;
            if props.signature != target.signature ||
                props.virtual_address != target.virtual_address
            {
                continue;
            }

            let handle = module.create_breakpoint(candidate, il_offset)?;
            handle.activate(true)?;
            return Ok((handle, candidate));
        }

        Err(Error::NotFound(format!("no runtime method matches method-def {method_def:#010x}")))
    }

    /// Retries resolution of tracked-but-unarmed breakpoints; the callback
    /// calls this after ingesting a new module's symbols.
    pub fn resolve_pending(&self, symbols: &SymbolStore) {
        let mut breakpoints = self.breakpoints.lock();
        for record in breakpoints.iter_mut() {
            if record.armed.is_some() || !record.enabled {
                continue;
            }
            match Self::resolve_and_arm(record, symbols) {
                Ok(()) => info!(id = %record.id, "breakpoint resolved after module load"),
                Err(Error::NotFound(_)) => {}
                Err(err) => warn!(id = %record.id, %err, "failed to arm pending breakpoint"),
            }
        }
    }

    /// Copies out the specs of every enabled breakpoint armed at the given
    /// location. Runs under the mutex; everything downstream is lock-free.
    pub fn matches_at(&self, method_token: MethodToken, il_offset: u32) -> Vec<BreakpointSpec> {
        let breakpoints = self.breakpoints.lock();
        breakpoints
            .iter()
            .filter(|b| {
                b.enabled &&
                    b.armed
                        .as_ref()
                        .is_some_and(|a| a.method_token == method_token && a.il_offset == il_offset)
            })
            .map(|b| BreakpointSpec {
                id: b.id.clone(),
                file_path: b.file_path.clone(),
                line: b.line,
                condition: b.condition.clone(),
                expressions: b.expressions.clone(),
                log_point: b.log_point,
                log_level: b.log_level,
                log_message_format: b.log_message_format.clone(),
            })
            .collect()
    }

    /// Number of tracked records, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.breakpoints.lock().len()
    }

    /// Whether no breakpoints are tracked.
    pub fn is_empty(&self) -> bool {
        self.breakpoints.lock().is_empty()
    }

    /// Number of distinct runtime handles currently held.
    pub fn distinct_handles(&self) -> usize {
        let breakpoints = self.breakpoints.lock();
        let mut handles: Vec<Arc<dyn RuntimeBreakpoint>> = Vec::new();
        for record in breakpoints.iter() {
            if let Some(armed) = &record.armed {
                if !handles.iter().any(|h| Arc::ptr_eq(h, &armed.handle)) {
                    handles.push(armed.handle.clone());
                }
            }
        }
        handles.len()
    }

    /// Blocking read loop on the request pipe. Applies every received
    /// request until a `kill_server` message arrives, then returns.
    pub fn sync_breakpoints(
        &self,
        reader: &mut dyn Iterator<Item = Result<BreakpointRequest>>,
        symbols: &SymbolStore,
    ) -> Result<()> {
        for request in reader {
            let request = request?;
            if request.kill_server {
                info!("received kill_server, draining");
                return Ok(());
            }
            if let Err(err) = self.update_breakpoint(&request, symbols) {
                error!(id = %request.id, %err, "failed to apply breakpoint update");
            }
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "request pipe closed before kill_server",
        )))
    }
}

fn normalize_condition(condition: &str) -> String {
    if condition.is_empty() {
        String::new()
    } else {
        normalize_expression(condition)
    }
}
