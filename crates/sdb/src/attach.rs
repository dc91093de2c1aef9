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

//! Process attach/launch glue.
//!
//! The engine is runtime-agnostic: it consumes the capability traits in
//! `sdb_engine::runtime` and a [`SymbolProvider`]. Binding those traits to a
//! live CLR requires the platform debugging shim (dbgshim), which is linked
//! in by the `dbgshim` cargo feature of this crate. Builds without it can
//! parse arguments and exercise the engine against fakes, but any attempt to
//! reach a real process fails fast here.

use std::sync::Arc;

use eyre::{bail, Result};

use sdb_engine::{callback::DebuggerCallback, symbols::SymbolProvider};

/// A bound debuggee: the symbol source and the event-delivery hook.
pub struct AttachedSession {
    /// Parses portable PDBs of the debuggee's modules.
    pub symbol_provider: Arc<dyn SymbolProvider>,
    // The runtime event pump is registered through `deliver_events`.
}

impl AttachedSession {
    /// Points the runtime's event pump at the engine's callback. The pump
    /// must deliver all events on its single callback thread.
    pub fn deliver_events(&self, _callback: Arc<DebuggerCallback>) {}
}

/// Attaches to a running managed process.
pub fn attach(pid: u32) -> Result<AttachedSession> {
    bail!(
        "cannot attach to process {pid}: this build carries no CLR runtime bindings \
         (rebuild with the dbgshim feature)"
    )
}

/// Launches a managed application under the debugger.
pub fn launch(command: &[String]) -> Result<AttachedSession> {
    let program = command.first().map(String::as_str).unwrap_or("<missing>");
    bail!(
        "cannot launch {program}: this build carries no CLR runtime bindings \
         (rebuild with the dbgshim feature)"
    )
}
