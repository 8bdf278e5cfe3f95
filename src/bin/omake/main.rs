//! # omake (Oxidized Make)
//!
//! A GNU-Make-compatible build description engine: source cache, parser, expression compiler,
//! evaluator, find emulator, dependency resolver, command evaluator, and export model.

mod args;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use args::Args;
use omake::{Context, DefaultLogger, Logger, Opts};

/// Print an error message to stderr. Exit code `1` covers user-input and build errors (the only
/// kind `MakeError` represents); `2` is reserved for internal failures this binary detects itself
/// (chdir, cwd lookup) before ever reaching the evaluator.
fn report(msg: impl AsRef<str>, logger: &DefaultLogger, context: Option<&Context>) -> ExitCode {
    logger.error(msg, context);
    ExitCode::from(1)
}

fn internal_error(msg: impl AsRef<str>, logger: &DefaultLogger) -> ExitCode {
    logger.error(msg, None);
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let logger = DefaultLogger;
    let opts: Opts = args.clone().into();

    let original_dir = if opts.directory.is_empty() {
        None
    } else {
        let cwd = match env::current_dir() {
            Ok(cwd) => cwd,
            Err(e) => return internal_error(format!("failed to get cwd ({e})"), &logger),
        };
        let dir = opts
            .directory
            .iter()
            .fold(PathBuf::new(), |dir, d| dir.join(d));
        logger.info(format!("Chdir to `{}'.", dir.display()), None);
        if let Err(e) = env::set_current_dir(&dir) {
            return internal_error(format!("chdir failed: {e}"), &logger);
        }
        Some(cwd)
    };

    let makefile_path = match &opts.file {
        Some(f) => f.clone(),
        None => match omake::find_makefile() {
            Some(f) => f,
            None => return report("no makefile found", &logger, None),
        },
    };

    let code = run(makefile_path, opts, &logger);

    if let Some(cwd) = original_dir {
        logger.info(format!("Chdir back to `{}'.", cwd.display()), None);
        if let Err(e) = env::set_current_dir(&cwd) {
            return internal_error(format!("chdir failed: {e}"), &logger);
        }
    }

    code
}

fn run(makefile_path: PathBuf, opts: Opts, logger: &DefaultLogger) -> ExitCode {
    if opts.ninja {
        return match omake::emit_ninja(makefile_path, opts, DefaultLogger) {
            Ok(manifest) => {
                print!("{manifest}");
                ExitCode::SUCCESS
            }
            Err(e) => report(&e.msg, logger, Some(&e.context)),
        };
    }

    if let Some(target) = opts.query.clone() {
        let evaluator = match omake::load(makefile_path, opts, DefaultLogger) {
            Ok(e) => e,
            Err(e) => return report(&e.msg, logger, Some(&e.context)),
        };
        let (graph, ids) = match omake::resolve_goals(&evaluator, &[target.clone()]) {
            Ok(r) => r,
            Err(e) => return report(&e.msg, logger, Some(&e.context)),
        };
        let Some(&id) = ids.first() else {
            return report(format!("no rule to make target `{target}'"), logger, None);
        };
        let node = graph.node(id);
        println!("target: {}", node.output);
        println!("phony: {}", node.phony);
        println!("prerequisites: {}", node.prerequisites.join(" "));
        if !node.order_only.is_empty() {
            println!("order-only: {}", node.order_only.join(" "));
        }
        if node.recipe.is_empty() {
            println!("recipe: (none)");
        } else {
            println!("recipe:");
            for line in &node.recipe {
                println!("\t{}", line.text);
            }
        }
        return ExitCode::SUCCESS;
    }

    match omake::build(makefile_path, opts, DefaultLogger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e.msg, logger, Some(&e.context)),
    }
}
