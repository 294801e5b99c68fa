use std::env::args;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use retrobasic::compiler::compile;
use retrobasic::config::Config;
use retrobasic::console::StdConsole;
use retrobasic::graphics::NullGraphicsHost;
use retrobasic::program::StoredProgram;
use retrobasic::vm::Vm;

fn load_config(program_path: &Path) -> Config {
    let sibling = program_path.with_extension("json");
    if sibling.exists() {
        match Config::load(&sibling) {
            Ok(cfg) => return cfg,
            Err(e) => tracing::warn!("couldn't load {}: {}", sibling.display(), e),
        }
    }
    Config::default()
}

/// Peeks at `trace` before the tracing subscriber is installed, so the
/// effective log level can be set before any events are emitted.
fn trace_enabled(program_path: &Path) -> bool {
    let sibling = program_path.with_extension("json");
    Config::load(&sibling).map(|c| c.trace).unwrap_or(false)
}

fn main() -> ExitCode {
    let path: PathBuf = match args().nth(1) {
        Some(p) => p.into(),
        None => {
            eprintln!("usage: retrobasic <program.bas>");
            return ExitCode::FAILURE;
        }
    };

    let default_level = if trace_enabled(&path) { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = load_config(&path);

    let program = match StoredProgram::load(&path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("couldn't read {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let compiled = match compile(&program) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut vm = Vm::with_stack_limit(&compiled, config.rng_seed, config.max_stack_depth);
    let mut console = StdConsole::new();
    let mut graphics = NullGraphicsHost::new();

    match vm.run(&mut console, &mut graphics) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
