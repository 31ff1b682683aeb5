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
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use once_cell::sync::Lazy;
use thiserror::Error;

use flow_exec::{Task, Taskflow};
use flow_metrics::Metrics;

/// Nothing to do with rustc debug vs. release, just knobs for poking at
/// the scheduler.
#[derive(Debug, PartialEq, Eq)]
pub enum DebugMode {
    List,
    Stats,
    Check,
}

#[derive(Error, Debug)]
#[error("Unknown debug setting '{0}'")]
pub struct DebugModeError(String);

impl std::str::FromStr for DebugMode {
    type Err = DebugModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stats" => Ok(DebugMode::Stats),
            "check" => Ok(DebugMode::Check),
            "list" => Ok(DebugMode::List),
            e @ _ => Err(DebugModeError(e.to_owned())),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub parallelism: usize,
    pub debug_modes: Vec<DebugMode>,
    pub demos: Vec<String>,
}

/// `[finished/total] name` status line shared by every task body in a
/// demo. In-place updates on a real terminal, one line per task when
/// redirected.
pub struct Printer {
    finished: AtomicUsize,
    total: AtomicUsize,
    console: console::Term,
}

impl Printer {
    fn new() -> Printer {
        Printer {
            finished: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            console: console::Term::stdout(),
        }
    }

    fn expect(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn task_done(&self, name: &str) {
        let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        let status = format!(
            "[{}/{}] {}",
            finished,
            self.total.load(Ordering::SeqCst),
            name
        );
        if self.console.is_term() {
            self.console.clear_line().expect("clear");
            self.console.write_str(&status).expect("write");
        } else {
            self.console.write_line(&status).expect("write");
        }
    }
}

impl Drop for Printer {
    fn drop(&mut self) {
        // The status printer leaves the cursor mid-line on a terminal.
        if self.console.is_term() {
            self.console.write_line("").expect("write");
        }
    }
}

pub struct DemoContext<'a> {
    taskflow: &'a mut Taskflow,
    printer: Arc<Printer>,
    check: bool,
}

impl<'a> DemoContext<'a> {
    /// Run what the demo built: optional cycle check, then block until
    /// the pool has drained it.
    fn execute(&mut self) -> anyhow::Result<()> {
        if self.check {
            self.taskflow
                .check_acyclic()
                .context("demo graph failed the cycle check")?;
        }
        self.printer.expect(self.taskflow.num_nodes());
        self.taskflow.wait_for_all();
        Ok(())
    }
}

pub struct Demo {
    pub name: &'static str,
    pub about: &'static str,
    run: fn(&mut DemoContext) -> anyhow::Result<()>,
}

static DEMOS: Lazy<Vec<Demo>> = Lazy::new(|| {
    vec![
        Demo {
            name: "diamond",
            about: "four tasks in a diamond, the classic partial order",
            run: diamond,
        },
        Demo {
            name: "pipeline",
            about: "eight stages chained with linearize",
            run: pipeline,
        },
        Demo {
            name: "fanout",
            about: "one source broadcasting to 100 sinks, gathered by a gate",
            run: fanout,
        },
        Demo {
            name: "reduce",
            about: "value-returning tasks summed through their promises",
            run: reduce,
        },
    ]
});

pub fn demos() -> &'static [Demo] {
    &DEMOS
}

fn diamond(ctx: &mut DemoContext) -> anyhow::Result<()> {
    let printer = ctx.printer.clone();
    let say = move |name: &'static str| {
        let printer = printer.clone();
        move || printer.task_done(name)
    };
    let (a, b, c, d) = ctx.taskflow.silent_emplace_all((
        say("TaskA"),
        say("TaskB"),
        say("TaskC"),
        say("TaskD"),
    ));
    a.name("TaskA");
    b.name("TaskB");
    c.name("TaskC");
    d.name("TaskD");
    a.broadcast([&b, &c].iter().cloned());
    d.gather([&b, &c].iter().cloned());
    log::debug!("diamond graph:\n{}", ctx.taskflow.dump());
    ctx.execute()
}

fn pipeline(ctx: &mut DemoContext) -> anyhow::Result<()> {
    let stages: Vec<Task> = (0..8)
        .map(|i| {
            let printer = ctx.printer.clone();
            let stage = ctx.taskflow.silent_emplace(move || {
                thread::sleep(Duration::from_millis(5));
                printer.task_done(&format!("stage {}", i));
            });
            stage.name(format!("stage-{}", i));
            stage
        })
        .collect();
    ctx.taskflow.linearize(stages.iter());
    drop(stages);
    ctx.execute()
}

fn fanout(ctx: &mut DemoContext) -> anyhow::Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let source = {
        let printer = ctx.printer.clone();
        ctx.taskflow
            .silent_emplace(move || printer.task_done("source"))
    };
    source.name("source");
    let sinks: Vec<Task> = (0..100)
        .map(|i| {
            let printer = ctx.printer.clone();
            let counter = counter.clone();
            ctx.taskflow.silent_emplace(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                printer.task_done(&format!("sink {}", i));
            })
        })
        .collect();
    let gate = {
        let printer = ctx.printer.clone();
        let counter = counter.clone();
        ctx.taskflow.silent_emplace(move || {
            printer.task_done(&format!("gate saw {} sinks", counter.load(Ordering::SeqCst)))
        })
    };
    gate.name("gate");
    source.broadcast(sinks.iter());
    gate.gather(sinks.iter());
    drop(sinks);
    ctx.execute()
}

fn reduce(ctx: &mut DemoContext) -> anyhow::Result<()> {
    let mut promises = Vec::new();
    for i in 0..8u64 {
        let printer = ctx.printer.clone();
        let (task, promise) = ctx.taskflow.emplace(move || {
            printer.task_done(&format!("square {}", i));
            i * i
        });
        task.name(format!("square-{}", i));
        promises.push(promise);
    }
    ctx.execute()?;
    let total: u64 = promises.into_iter().map(|promise| promise.get()).sum();
    println!("sum of squares below 8 = {}", total);
    Ok(())
}

pub fn run(config: Config) -> anyhow::Result<()> {
    let metrics_enabled = config.debug_modes.iter().any(|v| v == &DebugMode::Stats);
    let check = config.debug_modes.iter().any(|v| v == &DebugMode::Check);

    let selected: Vec<&Demo> = if config.demos.is_empty() {
        demos().iter().collect()
    } else {
        config
            .demos
            .iter()
            .map(|name| {
                demos()
                    .iter()
                    .find(|demo| demo.name == name.as_str())
                    .ok_or_else(|| anyhow::anyhow!("unknown demo '{}', try --help", name))
            })
            .collect::<anyhow::Result<_>>()?
    };

    let mut taskflow = Taskflow::new(config.parallelism);
    if metrics_enabled {
        taskflow.metrics().enable();
    }
    // Wall clock per demo, kept outside the scheduler's own registry.
    let wall = Metrics::new();
    if metrics_enabled {
        wall.enable();
    }

    // One Taskflow across all demos: each round leaves it empty and ready
    // for the next graph.
    for demo in selected {
        println!("--- {}: {}", demo.name, demo.about);
        let _timer = wall.timer(demo.name);
        let mut ctx = DemoContext {
            taskflow: &mut taskflow,
            printer: Arc::new(Printer::new()),
            check,
        };
        (demo.run)(&mut ctx)?;
    }

    if metrics_enabled {
        eprintln!("{}", taskflow.metrics());
        eprintln!("{}", wall);
    }
    Ok(())
}
