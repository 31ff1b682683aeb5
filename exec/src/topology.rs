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

use std::{
    collections::VecDeque,
    panic,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
};

use flow_graph::{Graph, NodeIndex};
use flow_metrics::Metrics;

use crate::promise::Complete;

/// One dispatched graph. Workers share it through an `Arc`; the only
/// things that move after construction are the atomic counters and the
/// per-node work slots.
pub(crate) struct Topology {
    pub(crate) graph: Graph,
    // Countdown to readiness, one per node, seeded with the node's
    // in-degree. The worker that takes a counter to zero owns the enqueue.
    pending: Vec<AtomicUsize>,
    // Countdown to completion of the whole topology.
    outstanding: AtomicUsize,
    done: Complete<()>,
}

impl Topology {
    pub(crate) fn new(graph: Graph, done: Complete<()>) -> Topology {
        let pending = graph
            .node_indices()
            .map(|index| AtomicUsize::new(graph.in_degree(index)))
            .collect();
        let outstanding = AtomicUsize::new(graph.node_count());
        Topology {
            graph,
            pending,
            outstanding,
            done,
        }
    }
}

struct PoolState {
    queue: VecDeque<(Arc<Topology>, NodeIndex)>,
    shutdown: bool,
}

/// Everything the owner thread and the workers have in common: the FIFO
/// ready queue under one mutex, the condvar workers sleep on, and the
/// in-flight topology count `wait_for_all` blocks on.
pub(crate) struct Shared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    in_flight: Mutex<usize>,
    all_done: Condvar,
    pub(crate) metrics: Metrics,
}

impl Shared {
    pub(crate) fn new() -> Shared {
        Shared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            work_available: Condvar::new(),
            in_flight: Mutex::new(0),
            all_done: Condvar::new(),
            metrics: Metrics::new(),
        }
    }

    /// Register a topology and push its source frontier, waking every
    /// worker.
    pub(crate) fn submit(&self, topology: Arc<Topology>) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            *in_flight += 1;
        }
        let mut state = self.state.lock().unwrap();
        for source in topology.graph.sources() {
            state.queue.push_back((topology.clone(), source));
        }
        drop(state);
        self.work_available.notify_all();
    }

    pub(crate) fn worker_loop(&self, id: usize) {
        log::trace!("worker {} up", id);
        loop {
            let (topology, node) = {
                let mut state = self.state.lock().unwrap();
                loop {
                    if let Some(ready) = state.queue.pop_front() {
                        break ready;
                    }
                    if state.shutdown {
                        log::trace!("worker {} down", id);
                        return;
                    }
                    state = self.work_available.wait(state).unwrap();
                }
            };
            self.run_node(&topology, node);
        }
    }

    /// Run one node, then settle the books: ready successors are pushed,
    /// and the topology's completion fires when its last node finishes.
    /// Also the drain step of the zero-worker mode.
    pub(crate) fn run_node(&self, topology: &Arc<Topology>, node: NodeIndex) {
        if let Some(work) = topology.graph.node(node).take_work() {
            if panic::catch_unwind(panic::AssertUnwindSafe(work)).is_err() {
                // A promise-backed body already routed its panic into the
                // promise, so anything landing here was silent-emplaced.
                log::warn!(
                    "task \"{}\" panicked; its successors run anyway",
                    topology.graph.node(node).name()
                );
            }
        }
        self.metrics.count("tasks_executed");

        for succ in topology.graph.successors(node) {
            // The release half tells the acquiring worker that this
            // node's effects happened-before the successor starts.
            if topology.pending[succ.index()].fetch_sub(1, Ordering::AcqRel) == 1 {
                let mut state = self.state.lock().unwrap();
                state.queue.push_back((topology.clone(), succ));
                drop(state);
                self.work_available.notify_one();
            }
        }

        if topology.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            log::trace!(
                "topology of {} tasks complete",
                topology.graph.node_count()
            );
            topology.done.fill(Ok(()));
            self.metrics.count("topologies_completed");
            let mut in_flight = self.in_flight.lock().unwrap();
            *in_flight -= 1;
            drop(in_flight);
            self.all_done.notify_all();
        }
    }

    /// Execute queued nodes on the calling thread until the queue stays
    /// empty. How a zero-worker scheduler gets anything done.
    pub(crate) fn drain(&self) {
        loop {
            let ready = self.state.lock().unwrap().queue.pop_front();
            match ready {
                Some((topology, node)) => self.run_node(&topology, node),
                None => break,
            }
        }
    }

    pub(crate) fn wait_all_done(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        while *in_flight > 0 {
            in_flight = self.all_done.wait(in_flight).unwrap();
        }
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        drop(state);
        self.work_available.notify_all();
    }
}
