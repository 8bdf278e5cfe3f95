//! Library-level run configuration: the `Opts` struct the CLI's `clap::Args` translates into,
//! covering the full flag surface (dry-run, ninja emission, find emulation, `--werror_*`
//! promotion, goal overrides).

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::MakeErrorKind;

#[derive(Debug, Default, Clone)]
pub struct Opts {
    /// `-f FILE`: the primary build file. Defaults to `Makefile`/`makefile` search if unset.
    pub file: Option<PathBuf>,
    /// `-C DIR` / `--include-dir DIR`: include search path, repeatable.
    pub directory: Vec<PathBuf>,
    /// `-j N`: parallel jobs, accepted for forward-compat with the (out-of-scope) executor.
    pub jobs: Option<usize>,
    /// `-n`: print commands, don't execute.
    pub dry_run: bool,
    /// `--ninja`: emit a ninja manifest instead of executing.
    pub ninja: bool,
    /// `--use_find_emulator`: route `$(shell find ...)` through the in-process find emulator.
    pub use_find_emulator: bool,
    /// `--werror_*` family: warning kinds promoted to hard errors.
    pub werror: HashSet<MakeErrorKind>,
    /// `--query=TARGET`: print resolved info for a target and exit instead of building.
    pub query: Option<String>,
    /// `--use_cache`: accepted, not honored (see DESIGN.md: no persistent cache in this core).
    pub use_cache: bool,
    /// Unconditionally remake all targets.
    pub always_make: bool,
    /// Ignore errors from recipes.
    pub ignore_errors: bool,
    /// Keep going with independent targets after a recipe failure.
    pub keep_going: bool,
    /// Consider FILE to be very old and do not remake it.
    pub old_file: Vec<String>,
    /// Consider FILE to be very new, to simulate "what if" it changed.
    pub new_file: Vec<String>,
    /// Positional `X=Y` overrides and target names, already split by the CLI layer.
    pub overrides: Vec<(String, String)>,
    pub goals: Vec<String>,
}
