//! Direct, single-threaded recipe runner: walks a resolved `DepGraph` depth-first and fork/execs
//! each node's recipe lines in order.
//!
//! Recursive prerequisite-then-self execution gated on mtime comparison, over the richer
//! `DepNode` (target-specific variables, automatic variables, order-only edges, phony nodes). Not
//! a parallel (`-j`) executor; this is what makes the `omake` binary usable end-to-end.

use std::collections::HashSet;
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::eval::{AutomaticVars, Evaluator};
use crate::error::{Logger, MakeError, MakeErrorKind};
use crate::opts::Opts;
use crate::resolve::{DepGraph, DepNode, NodeId};

/// Get a target's mtime, honoring `--old-file`/`--new-file` overrides. `None` means "doesn't
/// exist or inaccessible", which by Make's rules always makes the node stale.
fn mtime(output: &str, opts: &Opts) -> Option<SystemTime> {
    if opts.old_file.iter().any(|f| f == output) {
        return Some(UNIX_EPOCH);
    }
    if opts.new_file.iter().any(|f| f == output) {
        return Some(SystemTime::now() + Duration::from_secs(365 * 24 * 60 * 60));
    }
    std::fs::metadata(output).and_then(|m| m.modified()).ok()
}

/// Runs recipes for a resolved set of goals against a graph, tracking which nodes have already
/// been visited so diamond-shaped dependencies execute their recipe at most once per run.
pub struct Runner<'a, L: Logger> {
    graph: &'a DepGraph,
    evaluator: &'a mut Evaluator<L>,
    opts: &'a Opts,
    done: HashSet<NodeId>,
}

impl<'a, L: Logger> Runner<'a, L> {
    pub fn new(graph: &'a DepGraph, evaluator: &'a mut Evaluator<L>, opts: &'a Opts) -> Self {
        Self {
            graph,
            evaluator,
            opts,
            done: HashSet::new(),
        }
    }

    /// Build every requested goal, in request order.
    pub fn run(&mut self, goals: &[NodeId]) -> Result<(), MakeError> {
        for &goal in goals {
            self.build(goal)?;
        }
        Ok(())
    }

    fn build(&mut self, id: NodeId) -> Result<(), MakeError> {
        if self.done.contains(&id) {
            return Ok(());
        }
        self.done.insert(id);

        let node = self.graph.node(id).clone();
        let prereq_ids: Vec<NodeId> = node
            .prerequisites
            .iter()
            .filter_map(|p| self.graph.lookup(p))
            .collect();
        let order_only_ids: Vec<NodeId> = node
            .order_only
            .iter()
            .filter_map(|p| self.graph.lookup(p))
            .collect();

        for &dep in prereq_ids.iter().chain(order_only_ids.iter()) {
            self.build(dep)?;
        }

        let target_mtime = mtime(&node.output, self.opts);
        let mut should_execute = self.opts.always_make || node.phony;

        if !should_execute {
            for prereq in &node.prerequisites {
                match mtime(prereq, self.opts) {
                    None => should_execute = true,
                    Some(prereq_mtime) => {
                        if let Some(target_time) = target_mtime {
                            if prereq_mtime > target_time {
                                should_execute = true;
                            }
                        }
                    }
                }
            }
        }

        if target_mtime.is_none() || should_execute {
            self.execute_node(&node)?;
        } else {
            self.evaluator.logger.info(
                format!("`{}' is up to date.", node.output),
                Some(&node.context),
            );
        }

        Ok(())
    }

    fn execute_node(&mut self, node: &DepNode) -> Result<(), MakeError> {
        let automatic = AutomaticVars {
            target: node.output.clone(),
            first_prereq: node.prerequisites.first().cloned().unwrap_or_default(),
            all_prereqs_unique: node.unique_prerequisites(),
            all_prereqs: node.prerequisites.clone(),
            newer_prereqs: node.newer_prerequisites(),
            stem: node.stem.clone().unwrap_or_default(),
        };

        for line in &node.recipe {
            let expanded = self
                .evaluator
                .expand_recipe_line(&line.text, automatic.clone(), &node.target_vars)?;
            if expanded.trim().is_empty() {
                continue;
            }

            if !line.always_run && self.opts.dry_run {
                println!("{expanded}");
                continue;
            }

            if !line.silent {
                println!("{expanded}");
            }

            let shell = self
                .evaluator
                .vars
                .get("SHELL")
                .map(|v| v.raw.clone())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "/bin/sh".to_string());
            let mut cmd = Command::new(shell);
            cmd.arg("-c").arg(&expanded);
            for (k, v) in self.evaluator.build_environment()? {
                cmd.env(k, v);
            }

            let status = cmd
                .status()
                .map_err(|e| MakeError::with_kind(e.to_string(), line.context.clone(), MakeErrorKind::Shell))?;

            let ignore = line.ignore_errors || self.opts.ignore_errors;
            if !status.success() && !ignore {
                let msg = match status.code() {
                    Some(code) => format!("recipe for target `{}' failed: exit status {code}", node.output),
                    None => format!("recipe for target `{}' failed: killed by signal", node.output),
                };
                if self.opts.keep_going {
                    self.evaluator.logger.warn(&msg, Some(&line.context));
                } else {
                    return Err(MakeError::with_kind(msg, line.context.clone(), MakeErrorKind::Shell));
                }
            }
        }
        Ok(())
    }
}
