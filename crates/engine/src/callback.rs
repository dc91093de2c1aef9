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

//! The adapter around the runtime's event interface.
//!
//! All runtime events arrive on the single callback thread. Only
//! `Breakpoint`, `EvalComplete`, `EvalException`, `Exception` and
//! `LoadModule` matter to the agent; every other event is acknowledged with
//! an immediate continue. While a capture task is waiting on a function
//! evaluation, `Breakpoint` is a no-op, so a breakpoint inside a property
//! getter we are evaluating cannot recurse into a second capture.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    breakpoints::BreakpointRegistry,
    coordinator::EvalCoordinator,
    runtime::{RuntimeBreakpoint, RuntimeModule, RuntimeThread},
    snapshot,
    symbols::{SymbolProvider, SymbolStore},
    value::CaptureContext,
    Caches, EngineConfig,
};

/// How the callback answers an event; the runtime resumes the debuggee on
/// `Continue(false)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Resume the debuggee; `true` keeps other threads stopped.
    Continue(bool),
}

/// Events outside the handled set; all of them are stubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum OtherEvent {
    CreateProcess,
    ExitProcess,
    CreateThread,
    ExitThread,
    CreateAppDomain,
    ExitAppDomain,
    LoadAssembly,
    UnloadAssembly,
    LoadClass,
    UnloadClass,
    UnloadModule,
    NameChange,
    StepComplete,
    Break,
    LogMessage,
    CustomNotification,
}

/// One event delivered by the runtime on the callback thread.
pub enum DebuggerEvent {
    /// A breakpoint was hit.
    Breakpoint {
        /// Thread the hit occurred on.
        thread: Arc<dyn RuntimeThread>,
        /// The runtime breakpoint that fired.
        breakpoint: Arc<dyn RuntimeBreakpoint>,
    },
    /// A function evaluation completed normally.
    EvalComplete {
        /// Thread the evaluation ran on.
        thread: Arc<dyn RuntimeThread>,
    },
    /// A function evaluation ended with a managed exception.
    EvalException {
        /// Thread the evaluation ran on.
        thread: Arc<dyn RuntimeThread>,
    },
    /// The debuggee raised an exception.
    Exception {
        /// Whether the exception is unhandled.
        unhandled: bool,
    },
    /// A module finished loading.
    LoadModule {
        /// The loaded module.
        module: Arc<dyn RuntimeModule>,
    },
    /// Anything else; acknowledged and ignored.
    Other(OtherEvent),
}

/// The runtime event sink wiring events into the registry and coordinator.
pub struct DebuggerCallback {
    registry: Arc<BreakpointRegistry>,
    coordinator: Arc<EvalCoordinator>,
    symbols: Arc<SymbolStore>,
    symbol_provider: Arc<dyn SymbolProvider>,
    config: Arc<EngineConfig>,
    caches: Arc<Caches>,
}

impl DebuggerCallback {
    /// Wires the callback to its collaborators.
    pub fn new(
        registry: Arc<BreakpointRegistry>,
        coordinator: Arc<EvalCoordinator>,
        symbols: Arc<SymbolStore>,
        symbol_provider: Arc<dyn SymbolProvider>,
        config: Arc<EngineConfig>,
        caches: Arc<Caches>,
    ) -> Self {
        Self { registry, coordinator, symbols, symbol_provider, config, caches }
    }

    /// Routes one runtime event. Always continues on exit.
    pub fn handle_event(&self, event: DebuggerEvent) -> Continuation {
        match event {
            DebuggerEvent::Breakpoint { thread, breakpoint } => {
                self.on_breakpoint(thread, breakpoint)
            }
            DebuggerEvent::EvalComplete { thread } => {
                self.coordinator.signal_finished_eval(thread);
                Continuation::Continue(false)
            }
            DebuggerEvent::EvalException { thread } => {
                self.coordinator.handle_exception();
                self.coordinator.signal_finished_eval(thread);
                Continuation::Continue(false)
            }
            DebuggerEvent::Exception { unhandled } => {
                if unhandled {
                    debug!("unhandled exception in debuggee");
                }
                self.coordinator.handle_exception();
                Continuation::Continue(false)
            }
            DebuggerEvent::LoadModule { module } => {
                self.on_load_module(module);
                Continuation::Continue(false)
            }
            DebuggerEvent::Other(event) => {
                debug!(?event, "ignoring runtime event");
                Continuation::Continue(false)
            }
        }
    }

    /// Breakpoint hits: while an evaluation is outstanding this is a no-op
    /// to prevent capture recursion; otherwise matched breakpoints are
    /// handed to the coordinator, which spawns the capture task.
    fn on_breakpoint(
        &self,
        thread: Arc<dyn RuntimeThread>,
        breakpoint: Arc<dyn RuntimeBreakpoint>,
    ) -> Continuation {
        if self.coordinator.waiting_for_eval() {
            return Continuation::Continue(false);
        }

        let method_token = breakpoint.method_token();
        let il_offset = breakpoint.il_offset();
        let specs = self.registry.matches_at(method_token, il_offset);
        if specs.is_empty() {
            debug!(method_token, il_offset, "no matching breakpoints found");
            return Continuation::Continue(false);
        }

        let registry = self.registry.clone();
        let symbols = self.symbols.clone();
        let ctx = CaptureContext {
            coordinator: self.coordinator.clone(),
            config: self.config.clone(),
            caches: self.caches.clone(),
        };

        let spawned = self.coordinator.clone().process_breakpoints(thread, move || {
            snapshot::capture_task(specs, registry, symbols, ctx)
        });
        if let Err(err) = spawned {
            error!(%err, "failed to process breakpoint hit");
        }

        Continuation::Continue(false)
    }

    /// Module loads: parse symbols through the provider, ingest them, and
    /// retry breakpoints that could not be resolved before.
    fn on_load_module(&self, module: Arc<dyn RuntimeModule>) {
        match self.symbol_provider.load_symbols(&module) {
            Ok(Some(file)) => {
                self.symbols.ingest(module, file);
                self.registry.resolve_pending(&self.symbols);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, "failed to load symbols for module");
            }
        }
    }

    /// The coordinator, for shutdown plumbing.
    pub fn coordinator(&self) -> &Arc<EvalCoordinator> {
        &self.coordinator
    }
}
