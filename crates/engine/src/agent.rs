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

//! Agent wiring: ties the registry, coordinator, callback, symbol store and
//! pipe together for one debugging session.
//!
//! The process attach/launch glue lives outside the engine; whatever binds
//! the vendor runtime delivers its events to [`DebuggerAgent::callback`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::{
    breakpoints::BreakpointRegistry,
    callback::DebuggerCallback,
    coordinator::EvalCoordinator,
    error::{Error, Result},
    pipe::{PipeCancellation, PipeReader, PipeWriter},
    symbols::{SymbolProvider, SymbolStore},
    Caches, EngineConfig,
};

/// One debugging session's engine state.
pub struct DebuggerAgent {
    config: Arc<EngineConfig>,
    registry: Arc<BreakpointRegistry>,
    coordinator: Arc<EvalCoordinator>,
    symbols: Arc<SymbolStore>,
    callback: Arc<DebuggerCallback>,
    reader: Mutex<Option<PipeReader>>,
}

impl DebuggerAgent {
    /// Builds the engine around a symbol provider.
    pub fn new(config: EngineConfig, symbol_provider: Arc<dyn SymbolProvider>) -> Self {
        let config = Arc::new(config);
        let caches = Arc::new(Caches::new());
        let registry = Arc::new(BreakpointRegistry::new());
        let coordinator = Arc::new(EvalCoordinator::new(caches.clone()));
        let symbols = Arc::new(SymbolStore::new());
        let callback = Arc::new(DebuggerCallback::new(
            registry.clone(),
            coordinator.clone(),
            symbols.clone(),
            symbol_provider,
            config.clone(),
            caches,
        ));

        Self { config, registry, coordinator, symbols, callback, reader: Mutex::new(None) }
    }

    /// Connects both pipe directions: the read half feeding
    /// [`DebuggerAgent::sync_breakpoints`] and the write half that snapshots
    /// flow out of.
    pub fn connect_pipe(&self) -> Result<PipeCancellation> {
        let reader = PipeReader::connect(&self.config.pipe_name)?;
        let cancellation = reader.cancellation_handle()?;
        let writer = PipeWriter::connect(&self.config.pipe_name)?;

        self.registry.set_writer(Box::new(writer));
        *self.reader.lock() = Some(reader);
        info!(pipe = %self.config.pipe_name, "breakpoint pipe connected");
        Ok(cancellation)
    }

    /// Blocking read loop applying breakpoint updates until `kill_server`.
    pub fn sync_breakpoints(&self) -> Result<()> {
        let mut reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| Error::NotImplemented("pipe is not connected".to_string()))?;
        let result = self.registry.sync_breakpoints(&mut reader, &self.symbols);
        self.coordinator.join_capture_tasks();
        result
    }

    /// The event sink to hand to the runtime bindings.
    pub fn callback(&self) -> Arc<DebuggerCallback> {
        self.callback.clone()
    }

    /// The breakpoint registry.
    pub fn registry(&self) -> Arc<BreakpointRegistry> {
        self.registry.clone()
    }

    /// The symbol store.
    pub fn symbols(&self) -> Arc<SymbolStore> {
        self.symbols.clone()
    }
}
