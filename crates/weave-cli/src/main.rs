// SPDX-License-Identifier: Apache-2.0
//! Weave developer CLI.
//!
//! Loads flow snapshots into a fresh runtime, runs scheduler passes against
//! them, and prints the settled state as JSON. Also inspects snapshot files
//! and flow-definition stores without running anything.

// The CLI is expected to print to stdout/stderr.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use weave_core::{digest, units, DirStore, FlowStore, Runtime, SystemClock, Value};

#[derive(Parser)]
#[command(name = "weave")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a snapshot file, run it, and print the settled state
    Run {
        /// Path to the snapshot JSON file
        file: PathBuf,

        /// Write PATH=JSON before running (repeatable)
        #[arg(long = "set", value_name = "PATH=JSON")]
        sets: Vec<String>,

        /// Send a call trigger to the block at PATH (repeatable)
        #[arg(long = "call", value_name = "PATH")]
        calls: Vec<String>,

        /// Print the live value at PATH after settling instead of the
        /// saved state (repeatable)
        #[arg(long = "get", value_name = "PATH")]
        gets: Vec<String>,

        /// Run exactly this many passes instead of running to idle
        #[arg(long, value_name = "N")]
        passes: Option<u32>,

        /// Directory holding stored flow definitions
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
    },
    /// Print a snapshot file's normalized form without running it
    Show {
        /// Path to the snapshot JSON file
        file: PathBuf,

        /// Print only the content digest
        #[arg(long)]
        digest: bool,
    },
    /// List flow definitions stored in a directory
    Defs {
        /// Directory holding stored flow definitions
        store: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    match cli.command {
        Commands::Run {
            file,
            sets,
            calls,
            gets,
            passes,
            store,
        } => run(&file, &sets, &calls, &gets, passes, store.as_deref()),
        Commands::Show { file, digest } => show(&file, digest),
        Commands::Defs { store } => defs(&store),
    }
}

fn init_logging(verbosity: u8) -> Result<()> {
    let fallback = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(fallback.parse()?))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn runtime_with(store: Option<&Path>) -> Result<Runtime> {
    let mut rt = if let Some(dir) = store {
        let store = DirStore::open(dir)
            .with_context(|| format!("open definition store at {}", dir.display()))?;
        Runtime::new(Box::new(store), Rc::new(SystemClock::new()))
    } else {
        Runtime::in_memory(Rc::new(SystemClock::new()))
    };
    units::register_builtins(&mut rt)?;
    Ok(rt)
}

/// Reads a snapshot file and applies it to the runtime's root.
fn load_file(rt: &mut Runtime, file: &Path) -> Result<()> {
    let text =
        fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parse {}", file.display()))?;
    let Some(map) = json.as_object() else {
        bail!("{}: top level must be a JSON object", file.display());
    };
    rt.live_update("", map)
        .with_context(|| format!("load {}", file.display()))?;
    Ok(())
}

/// One `--set` argument: `PATH=JSON`.
fn parse_set(spec: &str) -> Result<(&str, Value)> {
    let Some((path, raw)) = spec.split_once('=') else {
        bail!("--set takes PATH=JSON, got `{spec}`");
    };
    let json: serde_json::Value = serde_json::from_str(raw)
        .with_context(|| format!("value for `{path}` must be JSON"))?;
    let Some(value) = Value::from_json(&json) else {
        bail!("value for `{path}` does not fit in a property");
    };
    Ok((path, value))
}

fn run(
    file: &Path,
    sets: &[String],
    calls: &[String],
    gets: &[String],
    passes: Option<u32>,
    store: Option<&Path>,
) -> Result<()> {
    let mut rt = runtime_with(store)?;
    load_file(&mut rt, file)?;
    for spec in sets {
        let (path, value) = parse_set(spec)?;
        rt.set_value(path, value)
            .with_context(|| format!("write `{path}`"))?;
    }
    for path in calls {
        rt.call(path).with_context(|| format!("call `{path}`"))?;
    }
    let tick = if let Some(n) = passes {
        let mut tick = rt.tick();
        for _ in 0..n {
            tick = rt.run_pass()?;
        }
        tick
    } else {
        rt.run_until_idle()?
    };
    info!(%tick, "settled");
    if rt.parked_len() > 0 {
        info!(parked = rt.parked_len(), "timer blocks still pending at exit");
    }
    if gets.is_empty() {
        let map = rt.save_block("")?;
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for path in gets {
            let value = rt
                .value(path)
                .with_context(|| format!("read `{path}`"))?;
            if let Some(json) = value.to_json() {
                println!("{path} = {json}");
            } else {
                println!("{path} = <event>");
            }
        }
    }
    Ok(())
}

fn show(file: &Path, digest_only: bool) -> Result<()> {
    let mut rt = runtime_with(None)?;
    load_file(&mut rt, file)?;
    let map = rt.save_block("")?;
    if digest_only {
        println!("{}", digest(&map));
    } else {
        println!("{}", serde_json::to_string_pretty(&map)?);
    }
    Ok(())
}

fn defs(dir: &Path) -> Result<()> {
    let store = DirStore::open(dir)
        .with_context(|| format!("open definition store at {}", dir.display()))?;
    for name in store.list()? {
        println!("{name}");
    }
    Ok(())
}
