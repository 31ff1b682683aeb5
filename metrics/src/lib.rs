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

//! Shared timing and counter registry for the flowrs scheduler.
//!
//! Unlike a thread-local design, a `Metrics` registry is meant to be put in
//! an `Arc` and handed to worker threads, so events recorded off the owner
//! thread still show up in the final report. Recording is gated on an atomic
//! flag; a disabled registry costs one relaxed load per call site.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
struct Metric {
    name: &'static str,
    count: u64,
    sum: u128,
}

impl Metric {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.sum += elapsed.as_micros();
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    enabled: AtomicBool,
    // Insertion order is report order. The vector stays tiny, so a linear
    // scan beats hashing.
    metrics: Mutex<Vec<Metric>>,
}

impl Metrics {
    pub fn new() -> Metrics {
        Default::default()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Bump a pure counter. Shows up in the report with an empty time
    /// column.
    pub fn count(&self, name: &'static str) {
        if !self.is_enabled() {
            return;
        }
        self.with_metric(name, |m| m.count += 1);
    }

    pub fn record(&self, name: &'static str, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        self.with_metric(name, |m| m.record(elapsed));
    }

    /// RAII timer recording on drop. `None` when disabled so the `Instant`
    /// is never taken.
    pub fn timer(&self, name: &'static str) -> Option<ScopedTimer<'_>> {
        if !self.is_enabled() {
            return None;
        }
        Some(ScopedTimer {
            metrics: self,
            name,
            start: Instant::now(),
        })
    }

    fn with_metric<F: FnOnce(&mut Metric)>(&self, name: &'static str, f: F) {
        let mut metrics = self.metrics.lock().unwrap();
        match metrics.iter_mut().find(|m| m.name == name) {
            Some(metric) => f(metric),
            None => {
                let mut metric = Metric {
                    name,
                    ..Default::default()
                };
                f(&mut metric);
                metrics.push(metric);
            }
        }
    }
}

pub struct ScopedTimer<'a> {
    metrics: &'a Metrics,
    name: &'static str,
    start: Instant,
}

impl<'a> Drop for ScopedTimer<'a> {
    fn drop(&mut self) {
        self.metrics.record(self.name, self.start.elapsed());
    }
}

#[macro_export]
macro_rules! scoped_timer {
    ($metrics:expr, $name:literal) => {
        let _scoped_timer = $metrics.timer($name);
    };
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics.lock().unwrap();

        let mut name_width = 7; // To fit "metric ".
        for metric in metrics.iter() {
            name_width = std::cmp::max(name_width, metric.name.len());
        }
        writeln!(
            f,
            "{:name_width$} {:>6} {:>9} {:>11}",
            "metric ",
            "count",
            "avg (us)",
            "total (us)",
            name_width = name_width
        )?;
        writeln!(
            f,
            "{:-<name_width$} {:-^6} {:-^9} {:-^11}",
            "",
            "",
            "",
            "",
            name_width = name_width
        )?;
        for metric in metrics.iter() {
            if metric.sum == 0 {
                writeln!(
                    f,
                    "{:name_width$} {:>6} {:>9} {:>11}",
                    metric.name,
                    metric.count,
                    "-",
                    "-",
                    name_width = name_width
                )?;
            } else {
                writeln!(
                    f,
                    "{:name_width$} {:>6} {:>9.3} {:>11}",
                    metric.name,
                    metric.count,
                    metric.sum as f64 / metric.count as f64,
                    metric.sum,
                    name_width = name_width
                )?;
            }
        }
        Ok(())
    }
}
