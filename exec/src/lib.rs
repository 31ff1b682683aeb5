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

//! Parallel execution of task graphs.
//!
//! A [`Taskflow`] owns a pool of worker threads and the graph currently
//! under construction. Emplace closures, wire them with the returned
//! [`Task`] handles, then `dispatch` (or let `wait_for_all` do it) and the
//! pool runs every task as soon as its dependencies have finished.
//!
//! ```
//! use flow_exec::Taskflow;
//!
//! let mut tf = Taskflow::new(2);
//! let (a, b) = tf.silent_emplace_all((|| println!("A"), || println!("B")));
//! a.precede(&b);
//! tf.wait_for_all();
//! ```
//!
//! The graph must be acyclic. Nothing checks this on dispatch; a cycle
//! leaves its tasks waiting forever and `wait_for_all` never returns. Run
//! [`Taskflow::check_acyclic`] while debugging if that happens.

mod emplace;
mod promise;
mod topology;


use std::{panic, sync::Arc, thread};

use flow_graph::{GraphHandle, Work};
use flow_metrics::{scoped_timer, Metrics};

use promise::Complete;
use topology::{Shared, Topology};

pub use emplace::{SilentTaskSet, TaskSet};
pub use flow_graph::{CycleError, Task};
pub use promise::Promise;

/// The user-facing scheduler: a fixed worker pool plus the graph being
/// built for the next dispatch.
///
/// All graph-building calls must stay on the thread that owns the
/// `Taskflow`; the type is `!Send`, so the compiler enforces it. The
/// [`Promise`] handles it gives out are free to travel.
pub struct Taskflow {
    graph: GraphHandle,
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Taskflow {
    /// Create a scheduler with `num_workers` OS threads. Zero is legal and
    /// means `wait_for_all` runs every task on the calling thread, which
    /// makes single-stepping under a debugger bearable.
    pub fn new(num_workers: usize) -> Taskflow {
        let shared = Arc::new(Shared::new());
        let workers = (0..num_workers)
            .map(|id| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("flow-worker-{}", id))
                    .spawn(move || shared.worker_loop(id))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Taskflow {
            graph: GraphHandle::new(),
            shared,
            workers,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Nodes accumulated for the next dispatch.
    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Add a task whose return value (or panic) can be observed through
    /// the returned [`Promise`].
    pub fn emplace<F, T>(&mut self, body: F) -> (Task, Promise<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (complete, promise) = promise::pair();
        let work: Work = Box::new(move || {
            let result = panic::catch_unwind(panic::AssertUnwindSafe(body));
            complete.fill(result);
        });
        (self.graph.add_task(work), promise)
    }

    /// Add a task and discard its result. A panic in the body is logged
    /// and swallowed; successors still run.
    pub fn silent_emplace<F, T>(&mut self, body: F) -> Task
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.graph.add_task(Box::new(move || {
            body();
        }))
    }

    /// Emplace a tuple of closures in one call; returns the positional
    /// tuple of `(Task, Promise)` pairs. `emplace_all(())` is a no-op.
    pub fn emplace_all<S: TaskSet>(&mut self, bodies: S) -> S::Handles {
        bodies.emplace_into(self)
    }

    /// Tuple form of [`Taskflow::silent_emplace`]; returns the positional
    /// tuple of handles.
    pub fn silent_emplace_all<S: SilentTaskSet>(&mut self, bodies: S) -> S::Handles {
        bodies.emplace_into(self)
    }

    /// Chain each task to the next: first before second, second before
    /// third, and so on. Fewer than two handles is a no-op.
    pub fn linearize<'a, I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut tasks = tasks.into_iter();
        if let Some(first) = tasks.next() {
            let mut prev = first;
            for next in tasks {
                prev.precede(next);
                prev = next;
            }
        }
    }

    /// Commit the current graph for execution and start a fresh one. The
    /// returned promise fires when every node of the committed graph has
    /// finished.
    pub fn dispatch(&mut self) -> Promise<()> {
        let (complete, promise) = promise::pair();
        self.dispatch_current(complete);
        promise
    }

    /// Like [`Taskflow::dispatch`] without the completion promise.
    pub fn silent_dispatch(&mut self) {
        let (complete, _promise) = promise::pair();
        self.dispatch_current(complete);
    }

    fn dispatch_current(&mut self, done: Complete<()>) {
        scoped_timer!(self.shared.metrics, "dispatch");
        let graph = self.graph.take();
        if graph.is_empty() {
            done.fill(Ok(()));
            return;
        }
        log::trace!("dispatching topology with {} tasks", graph.node_count());
        self.shared.submit(Arc::new(Topology::new(graph, done)));
    }

    /// Block until every dispatched topology has completed. A non-empty
    /// construction graph is dispatched first, so plain build-then-wait
    /// callers never need to say `dispatch`.
    pub fn wait_for_all(&mut self) {
        if !self.graph.is_empty() {
            self.silent_dispatch();
        }
        scoped_timer!(self.shared.metrics, "wait_for_all");
        if self.workers.is_empty() {
            self.shared.drain();
        }
        self.shared.wait_all_done();
    }

    /// Textual form of the graph currently under construction. The format
    /// is one paragraph per task in insertion order:
    ///
    /// ```text
    /// Task "A" [dependents:0|successors:1]
    ///   |--> task "B"
    /// Task "B" [dependents:1|successors:0]
    /// ```
    pub fn dump(&self) -> String {
        self.graph.dump()
    }

    /// Developer-mode check of the construction graph. Dispatch never
    /// calls this.
    pub fn check_acyclic(&self) -> Result<(), CycleError> {
        self.graph.check_acyclic()
    }

    /// Timing/counter registry for this scheduler. Disabled until
    /// `metrics().enable()` is called.
    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }
}

impl Default for Taskflow {
    /// A scheduler with one worker per logical CPU.
    fn default() -> Taskflow {
        Taskflow::new(num_cpus::get())
    }
}

impl Drop for Taskflow {
    /// Waits for dispatched topologies, then parks the pool. The graph
    /// still under construction is discarded, not dispatched; promises of
    /// discarded tasks report a broken promise instead of hanging.
    fn drop(&mut self) {
        if self.workers.is_empty() {
            self.shared.drain();
        }
        self.shared.wait_all_done();
        self.shared.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
