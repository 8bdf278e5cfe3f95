//! # omake (Oxidized Make)
//!
//! A GNU-Make-compatible build description engine: source cache, parser, expression compiler,
//! evaluator, find emulator, dependency resolver, command evaluator, and export model, plus two
//! honestly-scoped stand-ins for the pieces a production build system would hand off to external
//! collaborators — a direct single-threaded recipe runner and a ninja-manifest emitter.
//!
//! This crate is designed to be used both by the `omake` binary and directly as a library.

mod context;
mod error;
mod expr;
mod eval;
mod find;
mod functions;
mod ninja;
mod opts;
mod parser;
mod resolve;
mod rule;
mod runner;
mod source;
mod statement;
mod vars;

pub use context::Context;
pub use error::{BufferLogger, DefaultLogger, Logger, MakeError, MakeErrorKind};
pub use eval::{AutomaticVars, Evaluator};
pub use find::{
    find_leaves, parse_expressions as parse_find_expressions, run as find_run, try_emulate_shell,
    Expr as FindExpr, FileType as FindFileType, FindOptions, Snapshot as FindSnapshot,
};
pub use opts::Opts;
pub use resolve::{DepGraph, DepNode, NodeId, Resolver};
pub use rule::{AllowRulesMode, Rule, RuleKind, TargetVar};
pub use runner::Runner;
pub use vars::{Flavor, Origin, VarTable};

/// An ordered list of filenames used to search for a makefile, matching GNU Make's own search
/// order plus the BSD-style spellings.
pub const MAKEFILE_SEARCH: [&str; 6] = [
    "makefile",
    "Makefile",
    "BSDmakefile",
    "BSDMakefile",
    "GNUmakefile",
    "GNUMakefile",
];

/// Search the current directory for a makefile, preferring an exact-case match from the
/// directory listing (so case-insensitive file systems still report the file's real name) and
/// falling back to a case-insensitive probe of each candidate name.
pub fn find_makefile() -> Option<std::path::PathBuf> {
    use std::path::PathBuf;

    if let Some(cwd_files) = std::fs::read_dir(".").ok().map(|rd| {
        rd.flatten()
            .filter_map(|entry| entry.path().file_name().map(PathBuf::from))
            .collect::<Vec<_>>()
    }) {
        for file in MAKEFILE_SEARCH {
            let f = PathBuf::from(file);
            if cwd_files.contains(&f) && f.is_file() {
                return Some(f);
            }
        }
    }

    for file in MAKEFILE_SEARCH {
        let f = PathBuf::from(file);
        if f.is_file() {
            return Some(f);
        }
    }

    None
}

/// Parse `path` and every file it (transitively) includes into a single `Evaluator`, ready for
/// resolution. Does not itself resolve or run any targets.
pub fn load<L: Logger>(path: std::path::PathBuf, opts: Opts, logger: L) -> Result<Evaluator<L>, MakeError> {
    let mut evaluator = Evaluator::new(opts, logger);
    evaluator.eval_file(&path)?;
    Ok(evaluator)
}

/// Resolve `goals` (or the evaluator's default goal if empty) against an already-loaded
/// `Evaluator`, returning the populated dependency graph plus the resolved `NodeId` for each
/// requested goal.
pub fn resolve_goals<L: Logger>(
    evaluator: &Evaluator<L>,
    goals: &[String],
) -> Result<(DepGraph, Vec<NodeId>), MakeError> {
    let requested: Vec<String> = if goals.is_empty() {
        match &evaluator.default_goal {
            Some(g) => vec![g.clone()],
            None => {
                return Err(MakeError::new(
                    "no target specified and no default target found",
                    Context::new(),
                ))
            }
        }
    } else {
        goals.to_vec()
    };

    let resolver = Resolver::new(&evaluator.rules, &evaluator.vpath_table, &evaluator.logger)
        .with_werror_overriding_commands(evaluator.opts.werror.contains(&MakeErrorKind::OverridingCommands))
        .with_allow_rules_mode(
            evaluator.allow_rules_mode,
            evaluator.opts.werror.contains(&MakeErrorKind::RuleNotAllowed),
        );
    let (mut graph, ids) = resolver.resolve(&requested)?;
    resolve::mark_phony(&mut graph, &evaluator.phony_targets);
    Ok((graph, ids))
}

/// Load a makefile, resolve the requested goals, and run their recipes directly — the
/// convenience entry point the `omake` binary uses for its non-`--ninja`, non-`--query` path.
pub fn build<L: Logger>(path: std::path::PathBuf, opts: Opts, logger: L) -> Result<(), MakeError> {
    let goals = opts.goals.clone();
    let mut evaluator = load(path, opts, logger)?;
    let (graph, ids) = resolve_goals(&evaluator, &goals)?;
    let opts_snapshot = evaluator.opts.clone();
    Runner::new(&graph, &mut evaluator, &opts_snapshot).run(&ids)
}

/// Load a makefile, resolve the requested goals, and emit a ninja manifest instead of running
/// anything directly — the `--ninja` path.
pub fn emit_ninja<L: Logger>(
    path: std::path::PathBuf,
    opts: Opts,
    logger: L,
) -> Result<String, MakeError> {
    let goals = opts.goals.clone();
    let evaluator = load(path, opts, logger)?;
    let (graph, ids) = resolve_goals(&evaluator, &goals)?;
    Ok(ninja::emit(&graph, &ids))
}
