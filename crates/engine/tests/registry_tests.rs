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

//! Registry behavior: resolution determinism, deduplication, deferred
//! resolution on module load, and the pipe-driven sync loop.

mod common;

use common::*;

use std::{io::BufReader, os::unix::net::UnixListener, sync::Arc, thread, time::Duration};

use sdb_common::BreakpointRequest;
use sdb_engine::{
    callback::DebuggerEvent,
    error::Result,
    pipe::write_request,
    runtime::RuntimeBreakpoint,
    DebuggerAgent,
};

#[test]
fn test_resolution_is_deterministic() {
    let scenario = scenario();
    scenario.registry.update_breakpoint(&scenario.request("b1", 41), &scenario.symbols).unwrap();
    scenario.registry.update_breakpoint(&scenario.request("b2", 41), &scenario.symbols).unwrap();

    // Line 41 resolves forward to the sequence point at line 42 / IL 8 both
    // times.
    let armed = scenario.module.armed_breakpoints();
    assert_eq!(armed[0].il_offset(), 8);
    assert_eq!(armed[0].method_token(), METHOD_M);
    assert_eq!(scenario.registry.matches_at(METHOD_M, 8).len(), 2);
}

#[test]
fn test_s4_dedup_shares_one_runtime_handle() {
    let scenario = scenario();
    scenario.registry.update_breakpoint(&scenario.request("b1", 42), &scenario.symbols).unwrap();
    scenario.registry.update_breakpoint(&scenario.request("b2", 42), &scenario.symbols).unwrap();

    // Two records, one runtime handle.
    assert_eq!(scenario.registry.len(), 2);
    assert_eq!(scenario.registry.distinct_handles(), 1);
    assert_eq!(scenario.module.armed_breakpoints().len(), 1);
    let handle = scenario.armed_handle();
    assert!(handle.is_active().unwrap());

    // Deactivating b1 keeps the shared handle armed.
    let mut deactivate = scenario.request("b1", 42);
    deactivate.activated = false;
    scenario.registry.update_breakpoint(&deactivate, &scenario.symbols).unwrap();
    assert!(handle.is_active().unwrap());
    assert_eq!(scenario.registry.matches_at(METHOD_M, 8).len(), 1);

    // Deactivating b2 as well disarms it.
    let mut deactivate = scenario.request("b2", 42);
    deactivate.activated = false;
    scenario.registry.update_breakpoint(&deactivate, &scenario.symbols).unwrap();
    assert!(!handle.is_active().unwrap());
}

#[test]
fn test_reactivating_breakpoint_rearms_handle() {
    let scenario = scenario();
    scenario.registry.update_breakpoint(&scenario.request("b1", 42), &scenario.symbols).unwrap();
    let handle = scenario.armed_handle();

    let mut toggle = scenario.request("b1", 42);
    toggle.activated = false;
    scenario.registry.update_breakpoint(&toggle, &scenario.symbols).unwrap();
    assert!(!handle.is_active().unwrap());

    toggle.activated = true;
    scenario.registry.update_breakpoint(&toggle, &scenario.symbols).unwrap();
    assert!(handle.is_active().unwrap());
}

#[test]
fn test_update_changes_condition_without_rearming() {
    let scenario = scenario();
    scenario.registry.update_breakpoint(&scenario.request("b1", 42), &scenario.symbols).unwrap();
    assert_eq!(scenario.module.armed_breakpoints().len(), 1);

    let mut update = scenario.request("b1", 42);
    update.condition = "x > 3".to_string();
    scenario.registry.update_breakpoint(&update, &scenario.symbols).unwrap();

    // Still one record, one handle; the condition travels into the spec.
    assert_eq!(scenario.registry.len(), 1);
    assert_eq!(scenario.module.armed_breakpoints().len(), 1);
    let specs = scenario.registry.matches_at(METHOD_M, 8);
    assert_eq!(specs[0].condition, "x > 3");
}

#[test]
fn test_inactive_unknown_breakpoint_is_ignored() {
    let scenario = scenario();
    let mut request = scenario.request("ghost", 42);
    request.activated = false;
    scenario.registry.update_breakpoint(&request, &scenario.symbols).unwrap();
    assert!(scenario.registry.is_empty());
    assert!(scenario.module.armed_breakpoints().is_empty());
}

#[test]
fn test_unresolved_breakpoint_arms_after_module_load() {
    // Symbols are not ingested up front.
    let scenario = scenario_with(test_config(), false);
    scenario.registry.update_breakpoint(&scenario.request("b1", 42), &scenario.symbols).unwrap();

    // Tracked but unarmed.
    assert_eq!(scenario.registry.len(), 1);
    assert!(scenario.module.armed_breakpoints().is_empty());
    assert!(scenario.registry.matches_at(METHOD_M, 8).is_empty());

    // The module load brings symbols; the pending breakpoint resolves.
    scenario.callback.handle_event(DebuggerEvent::LoadModule {
        module: Arc::new(scenario.module.clone()),
    });

    assert_eq!(scenario.module.armed_breakpoints().len(), 1);
    assert_eq!(scenario.registry.matches_at(METHOD_M, 8).len(), 1);
}

#[test]
fn test_sync_loop_drains_on_kill_server() {
    let scenario = scenario();

    let requests: Vec<Result<BreakpointRequest>> = vec![
        Ok(scenario.request("b1", 42)),
        Ok(BreakpointRequest::kill_server()),
        // Never reached.
        Ok(scenario.request("b2", 44)),
    ];
    let mut reader = requests.into_iter();
    scenario.registry.sync_breakpoints(&mut reader, &scenario.symbols).unwrap();

    assert_eq!(scenario.registry.len(), 1);
}

#[test]
fn test_sync_loop_reports_closed_pipe() {
    let scenario = scenario();
    let requests: Vec<Result<BreakpointRequest>> = vec![Ok(scenario.request("b1", 42))];
    let mut reader = requests.into_iter();
    let err = scenario.registry.sync_breakpoints(&mut reader, &scenario.symbols).unwrap_err();
    assert!(err.to_string().contains("pipe"));
}

#[test]
fn test_agent_drains_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let pipe_path = dir.path().join("sdb.sock");
    let listener = UnixListener::bind(&pipe_path).unwrap();

    let server = thread::spawn(move || {
        // First connection is the agent's read pipe.
        let (mut read_conn, _) = listener.accept().unwrap();
        // Second is the write pipe; keep it open.
        let (write_conn, _) = listener.accept().unwrap();
        let _hold = BufReader::new(write_conn);

        let request = BreakpointRequest {
            id: "b1".to_string(),
            location: Some(sdb_common::SourceLocation {
                path: "prog.cs".to_string(),
                line: 42,
                column: 0,
            }),
            activated: true,
            ..Default::default()
        };
        write_request(&mut read_conn, &request).unwrap();
        write_request(&mut read_conn, &BreakpointRequest::kill_server()).unwrap();
    });

    let config = sdb_engine::EngineConfig {
        pipe_name: pipe_path.to_string_lossy().into_owned(),
        eval_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let agent = DebuggerAgent::new(
        config,
        Arc::new(sdb_engine::testing::FakeSymbolProvider::new()),
    );
    agent.connect_pipe().unwrap();
    agent.sync_breakpoints().unwrap();

    // The request arrived and is tracked (unresolved: no symbols ingested).
    assert_eq!(agent.registry().len(), 1);
    server.join().unwrap();
}
