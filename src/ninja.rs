//! Ninja-manifest emitter: covers the `build`/`rule`/`phony` statement shapes for the subset of
//! `DepNode`s this core produces, including `pool` assignment. Not a full ninja writer — no
//! `deps`/`depfile`, no `restat`/`generator`/`dyndep` edge cases, no response files.
//!
//! Each `DepNode` with a non-empty recipe becomes its own anonymous `rule` (one `command` per
//! recipe line, joined with `&&`) plus a matching `build` statement; phony nodes and
//! prerequisite-only file nodes become `build ... : phony ...`.

use std::fmt::Write as _;

use crate::resolve::DepGraph;

/// Ninja reserves `$`, `:`, and literal spaces in paths; escape them with a leading `$`, per the
/// manual's "Note that the characters `$ :` and newlines must be escaped" rule.
fn escape_path(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '$' | ':' | ' ' => {
                out.push('$');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Escape `$` within a command body (but not `:`/spaces, which are significant shell syntax
/// there).
fn escape_command(s: &str) -> String {
    s.replace('$', "$$")
}

/// Render a resolved graph as a ninja manifest covering exactly the requested goals and their
/// transitive dependencies.
pub fn emit(graph: &DepGraph, goals: &[crate::resolve::NodeId]) -> String {
    let mut out = String::new();
    let mut visited = std::collections::HashSet::new();
    let mut order = Vec::new();
    for &goal in goals {
        collect(graph, goal, &mut visited, &mut order);
    }

    writeln!(out, "# generated ninja manifest").unwrap();
    writeln!(out).unwrap();

    for (i, &id) in order.iter().enumerate() {
        let node = graph.node(id);
        if node.recipe.is_empty() {
            continue;
        }
        let rule_name = format!("r{i}");
        writeln!(out, "rule {rule_name}").unwrap();
        let commands = node
            .recipe
            .iter()
            .map(|line| escape_command(&line.text))
            .collect::<Vec<_>>()
            .join(" && ");
        writeln!(out, "  command = {commands}").unwrap();
        writeln!(out, "  description = build {}", escape_path(&node.output)).unwrap();
        writeln!(out).unwrap();
    }

    for (i, &id) in order.iter().enumerate() {
        let node = graph.node(id);

        let mut outputs = vec![node.output.clone()];
        outputs.extend(node.implicit_outputs.iter().cloned());
        let outputs: Vec<String> = outputs.iter().map(|o| escape_path(o)).collect();

        if node.recipe.is_empty() {
            // Prerequisite-only / phony node: represent as `build ... : phony ...` so ninja
            // treats it as always-satisfied once its own dependencies are, without a command.
            let deps: Vec<String> = node.prerequisites.iter().map(|p| escape_path(p)).collect();
            if !deps.is_empty() || node.phony {
                writeln!(out, "build {}: phony {}", outputs.join(" "), deps.join(" ")).unwrap();
            }
            continue;
        }

        let rule_name = format!("r{i}");
        let explicit_deps: Vec<String> = node.prerequisites.iter().map(|p| escape_path(p)).collect();
        let order_only: Vec<String> = node.order_only.iter().map(|p| escape_path(p)).collect();

        write!(out, "build {}: {} {}", outputs.join(" "), rule_name, explicit_deps.join(" ")).unwrap();
        if !order_only.is_empty() {
            write!(out, " || {}", order_only.join(" ")).unwrap();
        }
        writeln!(out).unwrap();
        if !node.symlink_outputs.is_empty() {
            let symlinks: Vec<String> = node.symlink_outputs.iter().map(|s| escape_path(s)).collect();
            writeln!(out, "  symlink_outputs = {}", symlinks.join(" ")).unwrap();
        }
        if !node.validations.is_empty() {
            let validations: Vec<String> = node.validations.iter().map(|s| escape_path(s)).collect();
            writeln!(out, "  validations = {}", validations.join(" ")).unwrap();
        }
        if let Some(pool) = &node.pool {
            writeln!(out, "  pool = {pool}").unwrap();
        }
        writeln!(out).unwrap();
    }

    let phony_goals: Vec<String> = goals
        .iter()
        .map(|&g| escape_path(&graph.node(g).output))
        .collect();
    writeln!(out, "default {}", phony_goals.join(" ")).unwrap();

    out
}

fn collect(
    graph: &DepGraph,
    id: crate::resolve::NodeId,
    visited: &mut std::collections::HashSet<crate::resolve::NodeId>,
    order: &mut Vec<crate::resolve::NodeId>,
) {
    if !visited.insert(id) {
        return;
    }
    for dep in graph.dependencies(id) {
        collect(graph, dep, visited, order);
    }
    order.push(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::DefaultLogger;
    use crate::resolve::Resolver;
    use crate::rule::Rule;
    use crate::statement::RecipeLine;

    fn recipe_line(text: &str) -> RecipeLine {
        RecipeLine {
            text: text.to_string(),
            silent: false,
            ignore_errors: false,
            always_run: false,
            context: Context::new(),
        }
    }

    #[test]
    fn test_emits_rule_and_build_for_recipe_node() {
        let rules = vec![Rule::new(
            vec!["out.bin".to_string()],
            vec!["in.o".to_string()],
            vec![],
            vec![recipe_line("ld -o out.bin in.o")],
            false,
            Context::new(),
        )];
        let logger = DefaultLogger;
        let (graph, ids) = Resolver::new(&rules, &[], &logger)
            .resolve(&["out.bin".to_string()])
            .unwrap();
        let manifest = emit(&graph, &ids);
        assert!(manifest.contains("command = ld -o out.bin in.o"));
        assert!(manifest.contains("build out.bin:"));
        assert!(manifest.contains("default out.bin"));
    }

    #[test]
    fn test_escapes_dollar_and_colon_in_paths() {
        assert_eq!(escape_path("a b"), "a$ b");
        assert_eq!(escape_path("a:b"), "a$:b");
        assert_eq!(escape_path("a$b"), "a$$b");
    }
}
