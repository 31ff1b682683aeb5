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

use flowrs::{demos, run, Config, DebugMode};

fn read_debug_modes(args: &mut pico_args::Arguments) -> anyhow::Result<Vec<DebugMode>> {
    let mut debug_modes: Vec<DebugMode> = Vec::new();
    while let Some(debug_mode) = args.opt_value_from_str("-d")? {
        if debug_mode == DebugMode::List {
            eprintln!(
                r#" debugging modes:
  stats  print scheduler operation counts/timing info
  check  run the cycle check on each demo graph before executing it
multiple modes can be enabled via -d FOO -d BAR"#
            );
            std::process::exit(1);
        }
        debug_modes.push(debug_mode);
    }
    Ok(debug_modes)
}

fn print_usage() {
    let called_as = std::env::args().next();
    let demo_list = demos()
        .iter()
        .map(|demo| format!("  {:10} {}", demo.name, demo.about))
        .collect::<Vec<String>>()
        .join("\n");
    eprintln!(
        r#"usage: {} [options] [demos...]

if demos are unspecified, every demo runs in sequence.

demos:
{}

options:
  --version  print flowrs version ("{}")

  -j N     run tasks on N worker threads [default={}, derived from CPUs available]
           0 runs every task on the main thread inside wait_for_all

  -d MODE  enable debugging (use -d list to list modes)
    "#,
        called_as.as_deref().unwrap_or("flowrs"),
        demo_list,
        env!("CARGO_PKG_VERSION"),
        num_cpus::get(),
    );
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print_usage();
        std::process::exit(1);
    }
    if args.contains("--version") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }
    let config = Config {
        parallelism: args
            .opt_value_from_str("-j")?
            .unwrap_or_else(|| num_cpus::get()),
        debug_modes: read_debug_modes(&mut args)?,
        demos: args.free()?,
    };

    run(config)
}
