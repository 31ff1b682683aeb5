/*
 * Copyright 2020 Nikhil Marathe <nsm.nikhil@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! One-shot result channel between a task body and whoever asked for the
//! value. The producing half never leaves this crate; the consuming half
//! is the [`Promise`] returned by `emplace` and `dispatch`.

use std::{
    mem,
    panic,
    sync::{Arc, Condvar, Mutex},
    thread,
};

enum State<T> {
    Pending,
    Ready(thread::Result<T>),
    Taken,
}

struct Slot<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

pub(crate) fn pair<T>() -> (Complete<T>, Promise<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(State::Pending),
        ready: Condvar::new(),
    });
    (
        Complete { slot: slot.clone() },
        Promise { slot },
    )
}

/// Producer half. Filled exactly once by the worker that runs the
/// associated node. Dropping it unfilled (the scheduler was torn down
/// before the task ran) publishes a "broken promise" payload so a blocked
/// `get` panics instead of hanging.
pub(crate) struct Complete<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Complete<T> {
    pub(crate) fn fill(&self, result: thread::Result<T>) {
        let mut state = self.slot.state.lock().unwrap();
        if let State::Pending = *state {
            *state = State::Ready(result);
            self.slot.ready.notify_all();
        }
    }
}

impl<T> Drop for Complete<T> {
    fn drop(&mut self) {
        self.fill(Err(Box::new("task dropped before it could run")));
    }
}

/// Consumer half of a task's result channel.
///
/// `get` blocks until the task has run and either returns the produced
/// value or resumes the task body's panic on the calling thread. With a
/// zero-worker scheduler nothing runs tasks until `wait_for_all`, so call
/// that first.
pub struct Promise<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Promise<T> {
    /// Non-blocking readiness probe.
    pub fn is_ready(&self) -> bool {
        match *self.slot.state.lock().unwrap() {
            State::Ready(_) => true,
            _ => false,
        }
    }

    /// Block until the value is available and take it. Re-raises the task
    /// body's panic if it had one.
    pub fn get(self) -> T {
        let mut state = self.slot.state.lock().unwrap();
        loop {
            if let State::Pending = *state {
                state = self.slot.ready.wait(state).unwrap();
                continue;
            }
            break;
        }
        match mem::replace(&mut *state, State::Taken) {
            State::Ready(Ok(value)) => value,
            State::Ready(Err(payload)) => {
                drop(state);
                panic::resume_unwind(payload)
            }
            // `get` consumes the only Promise, so the value cannot have
            // been taken before.
            State::Pending | State::Taken => unreachable!("promise taken twice"),
        }
    }
}
