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

//! The eval coordinator: the handshake between the runtime's callback thread
//! and the capture tasks that render snapshots.
//!
//! Function evaluation only makes progress while the debuggee runs, and only
//! the callback thread may let it run by returning from its event handler.
//! Capture work therefore happens on short-lived worker threads, one per
//! breakpoint hit, and this coordinator shuttles control between them and
//! the callback thread with one mutex and two condition variables:
//!
//! - the callback thread blocks until the capture task either requests an
//!   evaluation ([`EvalCoordinator::wait_for_eval`] releases it so the
//!   runtime can execute the call) or finishes
//!   ([`EvalCoordinator::signal_finished_capture`]);
//! - the capture task blocks inside `wait_for_eval` until `EvalComplete` or
//!   `EvalException` arrives on the callback thread.
//!
//! Only those two calls ever release the callback thread; every capture exit
//! path runs through `signal_finished_capture`, so the callback thread can
//! never leak. While an evaluation is outstanding the `Breakpoint` handler
//! is a no-op, which breaks the recursion of hitting a breakpoint inside a
//! property getter we are evaluating for another breakpoint.

use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::{
    error::{Error, Result},
    runtime::{EvalCall, PendingEval, RuntimeFrame, RuntimeThread, RuntimeValue},
    Caches, EngineConfig,
};

/// How long `wait_for_eval` sleeps between polls of the pending evaluation.
const EVAL_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct CoordinatorState {
    ready_to_capture: bool,
    callback_can_continue: bool,
    waiting_for_eval: bool,
    eval_exception_occurred: bool,
    active_thread: Option<Arc<dyn RuntimeThread>>,
}

/// Coordinates the callback thread and capture tasks. See the module docs
/// for the protocol.
pub struct EvalCoordinator {
    state: Mutex<CoordinatorState>,
    /// Wakes capture tasks (ready signal, eval completion).
    capture_cv: Condvar,
    /// Wakes the callback thread (eval requested, capture finished).
    callback_cv: Condvar,
    caches: Arc<Caches>,
    capture_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EvalCoordinator {
    /// Creates a coordinator over the shared caches.
    pub fn new(caches: Arc<Caches>) -> Self {
        Self {
            state: Mutex::new(CoordinatorState::default()),
            capture_cv: Condvar::new(),
            callback_cv: Condvar::new(),
            caches,
            capture_tasks: Mutex::new(Vec::new()),
        }
    }

    /// The thread the current hit arrived on.
    pub fn active_thread(&self) -> Result<Arc<dyn RuntimeThread>> {
        self.state
            .lock()
            .active_thread
            .clone()
            .ok_or_else(|| Error::runtime("GetActiveDebugThread"))
    }

    /// Walks the active thread's stack.
    pub fn stack_walk(&self) -> Result<Vec<Arc<dyn RuntimeFrame>>> {
        self.active_thread()?.stack_walk()
    }

    /// The active thread's innermost frame; condition and expression
    /// compilation bind against a fresh one per evaluation.
    pub fn active_frame(&self) -> Result<Arc<dyn RuntimeFrame>> {
        self.active_thread()?.active_frame()
    }

    /// Whether a capture task is blocked on an evaluation result.
    pub fn waiting_for_eval(&self) -> bool {
        self.state.lock().waiting_for_eval
    }

    /// Handles a breakpoint hit: records the active thread, spawns one
    /// capture task, and blocks the calling (callback) thread until the task
    /// either requests an evaluation or finishes.
    pub fn process_breakpoints<F>(
        self: Arc<Self>,
        thread: Arc<dyn RuntimeThread>,
        capture: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.prune_finished_tasks();

        let mut state = self.state.lock();
        state.active_thread = Some(thread);

        let coordinator = self.clone();
        let handle = std::thread::Builder::new()
            .name("sdb-capture".to_string())
            .spawn(move || {
                let result = capture();
                if let Err(err) = &result {
                    error!(%err, "capture task failed");
                }
                // The callback thread must be released no matter how the
                // capture ended.
                coordinator.signal_finished_capture();
            })
            .map_err(Error::Io)?;
        self.capture_tasks.lock().push(handle);

        state.ready_to_capture = true;
        state.callback_can_continue = false;
        self.capture_cv.notify_all();

        // The capture task will set callback_can_continue by calling either
        // wait_for_eval or signal_finished_capture.
        self.callback_cv.wait_while(&mut state, |s| !s.callback_can_continue);
        Ok(())
    }

    /// Capture tasks call this before emitting output, so they cannot race
    /// ahead of the handshake in `process_breakpoints`.
    pub fn wait_for_ready_signal(&self) {
        let mut state = self.state.lock();
        self.capture_cv.wait_while(&mut state, |s| !s.ready_to_capture);
    }

    /// Starts a function evaluation on the active thread and blocks until it
    /// completes, the debuggee throws, or the timeout elapses.
    pub fn evaluate(&self, call: EvalCall, config: &EngineConfig) -> Result<Arc<dyn RuntimeValue>> {
        let thread = self.active_thread()?;
        let pending = thread.begin_eval(call)?;
        self.wait_for_eval(pending.as_ref(), config.eval_timeout)
    }

    /// Releases the callback thread so the runtime can run the evaluation,
    /// then blocks until the result is available.
    pub fn wait_for_eval(
        &self,
        pending: &dyn PendingEval,
        timeout: Duration,
    ) -> Result<Arc<dyn RuntimeValue>> {
        let mut state = self.state.lock();
        state.waiting_for_eval = true;
        state.callback_can_continue = true;
        state.eval_exception_occurred = false;

        let start = Instant::now();
        let mut outcome = Err(Error::EvalNotComplete);

        loop {
            match pending.try_result() {
                Ok(Some(value)) => {
                    outcome = Ok(value);
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }

            if start.elapsed() >= timeout {
                warn!("timed out waiting for function evaluation");
                outcome = Err(Error::EvalNotComplete);
                break;
            }

            // Wake the callback thread so the runtime can execute the
            // evaluation, then sleep until EvalComplete/EvalException.
            self.callback_cv.notify_one();
            let wait = EVAL_POLL_INTERVAL.min(timeout.saturating_sub(start.elapsed()));
            let _ = self.capture_cv.wait_for(&mut state, wait);
        }

        state.callback_can_continue = false;
        state.waiting_for_eval = false;

        if state.eval_exception_occurred {
            return Err(Error::EvalException("exception thrown during evaluation".to_string()));
        }
        outcome
    }

    /// Callback-thread entry for `EvalComplete`/`EvalException`: records the
    /// thread, wakes the capture task waiting on the result, and blocks the
    /// callback thread again until the task requests more work or finishes.
    pub fn signal_finished_eval(&self, thread: Arc<dyn RuntimeThread>) {
        let mut state = self.state.lock();
        state.callback_can_continue = false;
        state.active_thread = Some(thread);
        self.capture_cv.notify_all();
        self.callback_cv.wait_while(&mut state, |s| !s.callback_can_continue);
    }

    /// Marks that the debuggee threw during an evaluation; surfaced through
    /// the next `wait_for_eval` return.
    pub fn handle_exception(&self) {
        self.state.lock().eval_exception_occurred = true;
    }

    /// Capture-task exit: clears the static member cache and releases the
    /// callback thread.
    pub fn signal_finished_capture(&self) {
        {
            let mut state = self.state.lock();
            self.caches.static_members.clear();
            state.callback_can_continue = true;
        }
        self.callback_cv.notify_one();
    }

    fn prune_finished_tasks(&self) {
        let mut tasks = self.capture_tasks.lock();
        let before = tasks.len();
        tasks.retain(|handle| !handle.is_finished());
        if tasks.len() != before {
            debug!(pruned = before - tasks.len(), "reaped finished capture tasks");
        }
    }

    /// Waits for all spawned capture tasks to finish. Used on shutdown.
    pub fn join_capture_tasks(&self) {
        let tasks: Vec<_> = self.capture_tasks.lock().drain(..).collect();
        for handle in tasks {
            if handle.join().is_err() {
                error!("capture task panicked");
            }
        }
    }
}
