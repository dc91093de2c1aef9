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

//! Coordinator protocol properties: liveness under evaluation timeouts, the
//! reentrancy guard, and exception surfacing.

mod common;

use common::*;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use sdb_engine::{
    callback::{Continuation, DebuggerEvent},
    error::Error,
    runtime::{EvalCall, RuntimeValue},
    testing::{EvalOutcome, FakeValue},
};

#[test]
fn test_liveness_when_every_eval_times_out() {
    let mut config = test_config();
    config.eval_timeout = Duration::from_millis(200);
    let scenario = scenario_with(config.clone(), true);

    // The getter never completes.
    scenario.thread.set_eval(METHOD_GET_P, EvalOutcome::NeverCompletes);

    let coordinator = scenario.coordinator.clone();
    let module = scenario.module.clone();
    let outcome: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    let outcome_in_task = outcome.clone();

    let start = Instant::now();
    let coordinator_in_task = coordinator.clone();
    coordinator
        .clone()
        .process_breakpoints(scenario.thread.clone().into_arc(), move || {
            let call = EvalCall {
                module: Arc::new(module),
                method: METHOD_GET_P,
                this: None,
                args: vec![],
            };
            let err = coordinator_in_task
                .evaluate(call, &config)
                .expect_err("evaluation must time out");
            *outcome_in_task.lock() = Some(err);
            Ok(())
        })
        .unwrap();

    // The callback thread came back promptly even though the evaluation
    // never completed.
    assert!(start.elapsed() < Duration::from_secs(5));

    scenario.coordinator.join_capture_tasks();
    assert!(matches!(*outcome.lock(), Some(Error::EvalNotComplete)));
    // Every exit path released the callback thread; a second hit can be
    // processed.
    assert!(!scenario.coordinator.waiting_for_eval());
}

#[test]
fn test_reentrancy_guard_skips_breakpoints_during_eval() {
    let mut config = test_config();
    config.eval_timeout = Duration::from_millis(600);
    let scenario = scenario_with(config.clone(), true);
    scenario.registry.update_breakpoint(&scenario.request("b1", 42), &scenario.symbols).unwrap();

    let frame = scenario.frame_in_m(vec![FakeValue::int32(5)], vec![FakeValue::int32(7)]);
    scenario.thread.set_frames(vec![frame]);
    scenario.thread.set_eval(METHOD_GET_P, EvalOutcome::NeverCompletes);

    // Start a capture that blocks inside wait_for_eval.
    let coordinator = scenario.coordinator.clone();
    let coordinator_in_task = coordinator.clone();
    let module = scenario.module.clone();
    coordinator
        .clone()
        .process_breakpoints(scenario.thread.clone().into_arc(), move || {
            let call = EvalCall {
                module: Arc::new(module),
                method: METHOD_GET_P,
                this: None,
                args: vec![],
            };
            let _ = coordinator_in_task.evaluate(call, &config);
            Ok(())
        })
        .unwrap();

    // The capture task is now waiting on the evaluation.
    assert!(scenario.coordinator.waiting_for_eval());

    // A breakpoint event during the wait is a no-op continue: no snapshot,
    // no new capture task.
    let continuation = scenario.callback.handle_event(DebuggerEvent::Breakpoint {
        thread: scenario.thread.clone().into_arc(),
        breakpoint: scenario.armed_handle(),
    });
    assert_eq!(continuation, Continuation::Continue(false));
    assert!(scenario.sink.all().is_empty());

    scenario.coordinator.join_capture_tasks();
}

#[test]
fn test_exception_during_eval_surfaces_as_eval_exception() {
    let mut config = test_config();
    config.eval_timeout = Duration::from_millis(400);
    let scenario = scenario_with(config.clone(), true);
    scenario.thread.set_eval(METHOD_GET_P, EvalOutcome::NeverCompletes);

    let coordinator = scenario.coordinator.clone();
    let coordinator_in_task = coordinator.clone();
    let module = scenario.module.clone();
    let outcome: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    let outcome_in_task = outcome.clone();

    coordinator
        .clone()
        .process_breakpoints(scenario.thread.clone().into_arc(), move || {
            let call = EvalCall {
                module: Arc::new(module),
                method: METHOD_GET_P,
                this: None,
                args: vec![],
            };
            let err = coordinator_in_task.evaluate(call, &config).expect_err("must fail");
            *outcome_in_task.lock() = Some(err);
            Ok(())
        })
        .unwrap();

    // The debuggee throws while the capture task waits for the result.
    std::thread::sleep(Duration::from_millis(50));
    scenario.coordinator.handle_exception();

    scenario.coordinator.join_capture_tasks();
    assert!(matches!(*outcome.lock(), Some(Error::EvalException(_))));
}

#[test]
fn test_immediate_eval_result_roundtrip() {
    let scenario = scenario();
    scenario.thread.set_eval(METHOD_GET_P, EvalOutcome::Value(FakeValue::boolean(true)));

    let coordinator = scenario.coordinator.clone();
    let coordinator_in_task = coordinator.clone();
    let module = scenario.module.clone();
    let config = scenario.config.as_ref().clone();
    let got: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
    let got_in_task = got.clone();

    coordinator
        .clone()
        .process_breakpoints(scenario.thread.clone().into_arc(), move || {
            let call = EvalCall {
                module: Arc::new(module),
                method: METHOD_GET_P,
                this: None,
                args: vec![],
            };
            let value = coordinator_in_task.evaluate(call, &config)?;
            *got_in_task.lock() = value.primitive_bytes()? == vec![1];
            Ok(())
        })
        .unwrap();

    scenario.coordinator.join_capture_tasks();
    assert!(*got.lock());
}
