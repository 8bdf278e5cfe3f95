//! `clap`-based `Args` struct, translated into library-level `Opts`.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::Parser;
use const_format::formatcp;

use omake::{MakeErrorKind, Opts};

/// Represents the `clap`-based arguments provided by this binary.
#[derive(Clone, Debug, Parser)]
#[clap(
    name = "omake",
    version,
    about,
    after_help = formatcp!(
        "License:  {}\nSource:   {}", env!("CARGO_PKG_LICENSE"), env!("CARGO_PKG_REPOSITORY")
    ),
)]
pub struct Args {
    /// Target(s) and/or `X=Y` variable overrides, in any order.
    #[arg()]
    pub targets: Vec<String>,

    /// Read FILE as the makefile.
    #[arg(short, long, visible_alias("makefile"), value_name = "FILE")]
    pub file: Option<String>,

    /// Change to DIR before doing anything, repeatable (each DIR is joined onto the previous).
    #[arg(short = 'C', long = "include-dir", value_name = "DIR")]
    pub directory: Vec<String>,

    /// Parallel jobs, accepted for forward-compatibility with the (out-of-scope) executor.
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Unconditionally make all targets.
    #[arg(short = 'B', long)]
    pub always_make: bool,

    /// Ignore errors from recipes.
    #[arg(short, long)]
    pub ignore_errors: bool,

    /// Keep going with independent targets after a recipe failure.
    #[arg(short, long)]
    pub keep_going: bool,

    /// Don't execute recipes; just print them.
    #[arg(short = 'n', long = "just-print", visible_alias("dry-run"), visible_alias("recon"))]
    pub just_print: bool,

    /// Emit a ninja-style manifest instead of executing.
    #[arg(long)]
    pub ninja: bool,

    /// Route `$(shell find ...)` through the in-process find emulator.
    #[arg(long = "use_find_emulator")]
    pub use_find_emulator: bool,

    /// Persist/reuse a parsed graph keyed by input files and relevant environment variables.
    /// Accepted for forward-compatibility; this core has no persistent cache (see DESIGN.md).
    #[arg(long = "use_cache")]
    pub use_cache: bool,

    /// Print resolved info for TARGET and exit instead of building.
    #[arg(long, value_name = "TARGET")]
    pub query: Option<String>,

    /// Consider FILE to be very old and do not remake it.
    #[arg(short, long, value_name = "FILE", visible_alias("assume-old"))]
    pub old_file: Vec<String>,

    /// Consider FILE to be very new to simulate "what if" it changed.
    #[arg(
        short = 'W',
        long = "what-if",
        value_name = "FILE",
        visible_alias("new-file"),
        visible_alias("assume-new")
    )]
    pub new_file: Vec<String>,

    /// Promote "two rules supply a recipe for the same target" to a hard error.
    #[arg(long = "werror_overriding_commands")]
    pub werror_overriding_commands: bool,

    /// Promote "assignment to a readonly variable" to a hard error (always fatal already).
    #[arg(long = "werror_readonly")]
    pub werror_readonly: bool,

    /// Promote "rule defined where .KATI_ALLOW_RULES forbids it" to a hard error.
    #[arg(long = "werror_rule_not_allowed")]
    pub werror_rule_not_allowed: bool,

    /// Promote "reference to a deprecated variable/export" to a hard error.
    #[arg(long = "werror_deprecated")]
    pub werror_deprecated: bool,

    /// Promote "a `.KATI_visibility_prefix` restriction was violated" to a hard error.
    #[arg(long = "werror_visibility")]
    pub werror_visibility: bool,

    /// Promote a failing `$(shell ...)` or recipe line to a hard error beyond its normal handling.
    #[arg(long = "werror_shell")]
    pub werror_shell: bool,
}

/// Split `targets` into command-line variable overrides (`X=Y`) and actual goal names, the way
/// GNU Make treats its own positional arguments.
fn split_overrides(targets: &[String]) -> (Vec<(String, String)>, Vec<String>) {
    let mut overrides = Vec::new();
    let mut goals = Vec::new();
    for arg in targets {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() && !name.contains(char::is_whitespace) => {
                overrides.push((name.to_string(), value.to_string()));
            }
            _ => goals.push(arg.clone()),
        }
    }
    (overrides, goals)
}

impl From<Args> for Opts {
    fn from(args: Args) -> Self {
        let (overrides, goals) = split_overrides(&args.targets);

        let mut werror = HashSet::new();
        if args.werror_overriding_commands {
            werror.insert(MakeErrorKind::OverridingCommands);
        }
        if args.werror_readonly {
            werror.insert(MakeErrorKind::Readonly);
        }
        if args.werror_rule_not_allowed {
            werror.insert(MakeErrorKind::RuleNotAllowed);
        }
        if args.werror_deprecated {
            werror.insert(MakeErrorKind::Deprecated);
        }
        if args.werror_visibility {
            werror.insert(MakeErrorKind::Visibility);
        }
        if args.werror_shell {
            werror.insert(MakeErrorKind::Shell);
        }

        Self {
            file: args.file.map(PathBuf::from),
            directory: args.directory.into_iter().map(PathBuf::from).collect(),
            jobs: args.jobs,
            dry_run: args.just_print,
            ninja: args.ninja,
            use_find_emulator: args.use_find_emulator,
            werror,
            query: args.query,
            use_cache: args.use_cache,
            always_make: args.always_make,
            ignore_errors: args.ignore_errors,
            keep_going: args.keep_going,
            old_file: args.old_file,
            new_file: args.new_file,
            overrides,
            goals,
        }
    }
}
