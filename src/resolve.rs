//! The rule database & dependency resolver: turns accumulated `Rule`s into a topologically sound
//! `DepGraph` of concrete `DepNode`s for a set of requested targets.
//!
//! An append-only node arena plus a `petgraph::DiGraphMap` for edges, addressed by a stable
//! integer id, covering Make's explicit/pattern/suffix/static-pattern rule selection.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use petgraph::prelude::DiGraphMap;

use crate::context::Context;
use crate::error::{MakeError, MakeErrorKind, Logger};
use crate::rule::{AllowRulesMode, Rule, RuleKind};
use crate::statement::RecipeLine;

/// Stable handle into a `DepGraph`'s node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

/// The resolved entity for a single concrete target.
#[derive(Clone, Debug)]
pub struct DepNode {
    pub output: String,
    /// Non-order-only prerequisites, in declaration order, duplicates kept (source for `$+`).
    pub prerequisites: Vec<String>,
    /// Order-only prerequisites: contribute to build ordering, never to `$^`/`$+`/`$?`.
    pub order_only: Vec<String>,
    pub recipe: Vec<RecipeLine>,
    /// Target-specific variable overlay captured at resolution time.
    pub target_vars: Vec<crate::rule::TargetVar>,
    pub phony: bool,
    pub symlink_outputs: Vec<String>,
    pub implicit_outputs: Vec<String>,
    pub validations: Vec<String>,
    pub pool: Option<String>,
    /// The `%` stem matched when this node came from a pattern/suffix/static-pattern rule.
    pub stem: Option<String>,
    /// The `.KATI_ALLOW_RULES` mode active when this node was resolved, if any was set.
    pub allow_rules_mode: Option<AllowRulesMode>,
    pub context: Context,
}

impl DepNode {
    /// Prerequisites with duplicates removed, preserving first occurrence (`$^`).
    pub fn unique_prerequisites(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.prerequisites
            .iter()
            .filter(|p| seen.insert((*p).clone()))
            .cloned()
            .collect()
    }

    /// Prerequisites newer than the output (`$?`); only meaningful for direct execution. Missing
    /// prerequisites or a missing/phony output are treated as "newer" so the rule still runs.
    pub fn newer_prerequisites(&self) -> Vec<String> {
        if self.phony {
            return self.prerequisites.clone();
        }
        let out_mtime = std::fs::metadata(&self.output).and_then(|m| m.modified()).ok();
        self.prerequisites
            .iter()
            .filter(|p| match (std::fs::metadata(p).and_then(|m| m.modified()).ok(), out_mtime) {
                (Some(pm), Some(om)) => pm > om,
                _ => true,
            })
            .cloned()
            .collect()
    }
}

/// Append-only arena of resolved nodes plus the dependency edges between them.
#[derive(Debug, Default)]
pub struct DepGraph {
    nodes: Vec<DepNode>,
    /// Maps every known output name (including implicit outputs) to the node that produces it.
    by_output: HashMap<String, NodeId>,
    graph: DiGraphMap<u32, bool>, // edge weight: true if order-only
}

impl DepGraph {
    pub fn node(&self, id: NodeId) -> &DepNode {
        &self.nodes[id.0 as usize]
    }

    pub fn lookup(&self, output: &str) -> Option<NodeId> {
        self.by_output.get(output).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DepNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Dependencies of `id` in insertion order (not edge-order, since `DiGraphMap` doesn't
    /// preserve it); callers needing ordered prerequisites should read `DepNode::prerequisites`
    /// directly. This is for graph-structural queries (topological execution, ninja emission).
    pub fn dependencies(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.graph
            .neighbors_directed(id.0, petgraph::Direction::Outgoing)
            .map(NodeId)
    }

    fn alloc(&mut self, node: DepNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for alias in std::iter::once(node.output.clone()).chain(node.implicit_outputs.clone()) {
            self.by_output.insert(alias, id);
        }
        self.graph.add_node(id.0);
        self.nodes.push(node);
        id
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, order_only: bool) {
        self.graph.add_edge(from.0, to.0, order_only);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Gray,
    Black,
}

/// Resolves requested targets against a frozen rule set.
pub struct Resolver<'a, L: Logger> {
    rules: &'a [Rule],
    /// Index of explicit-rule declarations by literal target name, in declaration order.
    explicit: HashMap<&'a str, Vec<usize>>,
    /// Indices of pattern/suffix rules, in declaration order (tie-break discriminator).
    patterns: Vec<usize>,
    /// `vpath PATTERN DIRS` table, consulted when a prerequisite is not found relative to cwd.
    vpath: &'a [(String, Vec<String>)],
    logger: &'a L,
    graph: DepGraph,
    marks: HashMap<String, Mark>,
    stack: Vec<String>,
    werror_overriding_commands: bool,
    allow_rules_mode: Option<AllowRulesMode>,
    werror_rule_not_allowed: bool,
}

impl<'a, L: Logger> Resolver<'a, L> {
    pub fn new(rules: &'a [Rule], vpath: &'a [(String, Vec<String>)], logger: &'a L) -> Self {
        let mut explicit: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut patterns = Vec::new();
        for (i, rule) in rules.iter().enumerate() {
            match rule.kind {
                RuleKind::Pattern | RuleKind::Suffix => patterns.push(i),
                RuleKind::Explicit | RuleKind::StaticPattern => {
                    for t in &rule.targets {
                        explicit.entry(t.as_str()).or_default().push(i);
                    }
                }
            }
        }
        Self {
            rules,
            explicit,
            patterns,
            vpath,
            logger,
            graph: DepGraph::default(),
            marks: HashMap::new(),
            stack: Vec::new(),
            werror_overriding_commands: false,
            allow_rules_mode: None,
            werror_rule_not_allowed: false,
        }
    }

    /// Promote "overriding commands" from a warning to a fatal error, for `--werror_overriding_commands`.
    pub fn with_werror_overriding_commands(mut self, flag: bool) -> Self {
        self.werror_overriding_commands = flag;
        self
    }

    /// `.KATI_ALLOW_RULES` mode from the makefile, plus `--werror_rule_not_allowed` to force the
    /// error variant regardless of what the makefile asked for.
    pub fn with_allow_rules_mode(mut self, mode: Option<AllowRulesMode>, werror: bool) -> Self {
        self.allow_rules_mode = mode;
        self.werror_rule_not_allowed = werror;
        self
    }

    /// Resolve every requested goal, returning the populated graph plus the `NodeId` of each goal
    /// in request order (a goal may resolve to the same node as an earlier one).
    pub fn resolve(mut self, goals: &[String]) -> Result<(DepGraph, Vec<NodeId>), MakeError> {
        let mut ids = Vec::with_capacity(goals.len());
        for goal in goals {
            ids.push(self.resolve_target(goal)?);
        }
        Ok((self.graph, ids))
    }

    fn resolve_target(&mut self, name: &str) -> Result<NodeId, MakeError> {
        if let Some(id) = self.graph.lookup(name) {
            return Ok(id);
        }

        match self.marks.get(name) {
            Some(Mark::Gray) => {
                let cycle = self.stack.join(" -> ");
                return Err(MakeError::with_kind(
                    format!("circular dependency dropped on `{name}': {cycle} -> {name}"),
                    Context::new(),
                    MakeErrorKind::Cycle,
                ));
            }
            Some(Mark::Black) => unreachable!("resolved targets are always in by_output"),
            None => {}
        }

        self.marks.insert(name.to_string(), Mark::Gray);
        self.stack.push(name.to_string());

        let id = self.build_node(name)?;

        self.stack.pop();
        self.marks.insert(name.to_string(), Mark::Black);
        Ok(id)
    }

    fn build_node(&mut self, name: &str) -> Result<NodeId, MakeError> {
        if let Some(rule_idxs) = self.explicit.get(name).cloned() {
            return self.build_explicit(name, &rule_idxs);
        }

        if let Some((rule_idx, stem)) = self.select_pattern(name) {
            return self.build_from_pattern(name, rule_idx, &stem);
        }

        if Path::new(name).is_file() || self.resolve_vpath(name).is_some() {
            return Ok(self.graph.alloc(DepNode {
                output: name.to_string(),
                prerequisites: Vec::new(),
                order_only: Vec::new(),
                recipe: Vec::new(),
                target_vars: Vec::new(),
                phony: false,
                symlink_outputs: Vec::new(),
                implicit_outputs: Vec::new(),
                validations: Vec::new(),
                pool: None,
                stem: None,
                allow_rules_mode: self.allow_rules_mode,
                context: Context::new(),
            }));
        }

        Err(MakeError::with_kind(
            format!("no rule to make target `{name}'"),
            Context::new(),
            MakeErrorKind::MissingRule,
        ))
    }

    fn build_explicit(&mut self, name: &str, rule_idxs: &[usize]) -> Result<NodeId, MakeError> {
        // Double-colon rules: each declaration is an independent node. We only support resolving
        // the first goal reference to the group of `::` rules for `name`; GNU Make chains them
        // under one logical target but each keeps its own recipe and prerequisites.
        if self.rules[rule_idxs[0]].double_colon {
            let mut last = None;
            for &idx in rule_idxs {
                let node = self.make_node_from_rule(name, idx, None)?;
                last = Some(node);
            }
            return Ok(last.unwrap());
        }

        let with_recipe: Vec<usize> = rule_idxs
            .iter()
            .copied()
            .filter(|&i| self.rules[i].has_recipe())
            .collect();
        let chosen = match with_recipe.len() {
            0 => rule_idxs[0],
            1 => with_recipe[0],
            _ => {
                let context = self.rules[*with_recipe.last().unwrap()].context.clone();
                match self.allow_rules_mode {
                    Some(mode) => {
                        let msg = format!("rule not allowed for target `{name}'");
                        if mode == AllowRulesMode::Error || self.werror_rule_not_allowed {
                            return Err(MakeError::with_kind(msg, context, MakeErrorKind::RuleNotAllowed));
                        }
                        self.logger.warn(msg, Some(&context));
                    }
                    None => {
                        let msg = format!("overriding commands for target `{name}'");
                        if self.werror_overriding_commands {
                            return Err(MakeError::with_kind(msg, context, MakeErrorKind::OverridingCommands));
                        }
                        self.logger.warn(msg, Some(&context));
                    }
                }
                *with_recipe.last().unwrap()
            }
        };

        // Merge prerequisites from every rule contributing to this target (GNU Make allows
        // several prerequisite-only rules for the same single-colon target). Static-pattern rules
        // carry a `%` in their prerequisite list that must be substituted with the stem derived
        // from matching `name` against `target_pattern`.
        let mut prereqs = Vec::new();
        let mut order_only = Vec::new();
        for &idx in rule_idxs {
            let rule = &self.rules[idx];
            let stem = rule
                .target_pattern
                .as_deref()
                .and_then(|tp| crate::functions::match_pattern_pub(tp, name));
            let (p, o) = instantiate_prereqs(rule, stem.as_deref());
            prereqs.extend(p);
            order_only.extend(o);
        }

        let chosen_stem = self.rules[chosen]
            .target_pattern
            .as_deref()
            .and_then(|tp| crate::functions::match_pattern_pub(tp, name));
        self.make_node_merged(name, chosen, prereqs, order_only, chosen_stem.as_deref())
    }

    fn select_pattern(&self, name: &str) -> Option<(usize, String)> {
        let mut candidates: Vec<(usize, String)> = Vec::new();
        for &idx in &self.patterns {
            for target in &self.rules[idx].targets {
                if let Some(stem) = crate::functions::match_pattern_pub(target, name) {
                    candidates.push((idx, stem));
                }
            }
        }
        let min_len = candidates.iter().map(|(_, stem)| stem.len()).min()?;
        candidates.retain(|(_, stem)| stem.len() == min_len);

        // Among same-stem-length candidates, GNU Make prefers one whose prerequisites already
        // exist or are themselves buildable, falling back to the first in declaration order if
        // none qualify (e.g. `baz.o` against `%.o: %.c` and `.cc.o:` when only `baz.cc` exists).
        candidates
            .iter()
            .find(|(idx, stem)| self.candidate_is_buildable(*idx, stem))
            .cloned()
            .or_else(|| candidates.into_iter().next())
    }

    /// Whether every prerequisite a pattern/suffix candidate would instantiate already exists as
    /// a file, matches an explicit rule, resolves through `vpath`, or matches some other pattern's
    /// target. A single level of lookahead, not full recursive resolution, but enough to
    /// discriminate e.g. a `%.c` suffix candidate from a `%.cc` one when only one source exists.
    fn candidate_is_buildable(&self, rule_idx: usize, stem: &str) -> bool {
        let rule = &self.rules[rule_idx];
        let (prereqs, _) = instantiate_prereqs(rule, Some(stem));
        prereqs.iter().all(|p| {
            Path::new(p).is_file()
                || self.explicit.contains_key(p.as_str())
                || self.resolve_vpath(p).is_some()
                || self.patterns.iter().any(|&i| {
                    self.rules[i]
                        .targets
                        .iter()
                        .any(|t| crate::functions::match_pattern_pub(t, p).is_some())
                })
        })
    }

    fn build_from_pattern(&mut self, name: &str, rule_idx: usize, stem: &str) -> Result<NodeId, MakeError> {
        self.make_node_from_rule(name, rule_idx, Some(stem))
    }

    fn make_node_from_rule(&mut self, name: &str, rule_idx: usize, stem: Option<&str>) -> Result<NodeId, MakeError> {
        let rule = self.rules[rule_idx].clone();
        let stem = stem.map(str::to_string).or_else(|| {
            rule.target_pattern
                .as_deref()
                .and_then(|tp| crate::functions::match_pattern_pub(tp, name))
        });
        let (prereqs, order_only) = instantiate_prereqs(&rule, stem.as_deref());
        self.make_node_merged(name, rule_idx, prereqs, order_only, stem.as_deref())
    }

    fn make_node_merged(
        &mut self,
        name: &str,
        rule_idx: usize,
        prereqs: Vec<String>,
        order_only: Vec<String>,
        stem: Option<&str>,
    ) -> Result<NodeId, MakeError> {
        let rule = self.rules[rule_idx].clone();

        let mut resolved_prereqs = Vec::with_capacity(prereqs.len());
        for p in &prereqs {
            let dep_id = self.resolve_target(p)?;
            resolved_prereqs.push((p.clone(), dep_id));
        }
        let mut resolved_order_only = Vec::with_capacity(order_only.len());
        for p in &order_only {
            let dep_id = self.resolve_target(p)?;
            resolved_order_only.push((p.clone(), dep_id));
        }

        let implicit_outputs = rule
            .target_vars
            .iter()
            .filter(|tv| tv.name == ".KATI_IMPLICIT_OUTPUTS")
            .flat_map(|tv| tv.value.split_whitespace().map(str::to_string))
            .collect::<Vec<_>>();
        let symlink_outputs = rule
            .target_vars
            .iter()
            .filter(|tv| tv.name == ".KATI_SYMLINK_OUTPUTS")
            .flat_map(|tv| tv.value.split_whitespace().map(str::to_string))
            .collect::<Vec<_>>();
        let validations = rule
            .target_vars
            .iter()
            .filter(|tv| tv.name == ".KATI_VALIDATIONS")
            .flat_map(|tv| tv.value.split_whitespace().map(str::to_string))
            .collect::<Vec<_>>();
        let pool = rule
            .target_vars
            .iter()
            .find(|tv| tv.name == ".KATI_NINJA_POOL")
            .map(|tv| tv.value.clone());

        let id = self.graph.alloc(DepNode {
            output: name.to_string(),
            prerequisites: prereqs,
            order_only,
            recipe: rule.recipe.clone(),
            target_vars: rule.target_vars.clone(),
            phony: false,
            symlink_outputs,
            implicit_outputs,
            validations,
            pool,
            stem: stem.map(str::to_string),
            allow_rules_mode: self.allow_rules_mode,
            context: rule.context.clone(),
        });

        for (_, dep_id) in resolved_prereqs {
            self.graph.add_edge(id, dep_id, false);
        }
        for (_, dep_id) in resolved_order_only {
            self.graph.add_edge(id, dep_id, true);
        }

        Ok(id)
    }

    fn resolve_vpath(&self, name: &str) -> Option<String> {
        for (pattern, dirs) in self.vpath {
            if crate::functions::match_pattern_pub(pattern, name).is_some() {
                for dir in dirs {
                    let candidate = Path::new(dir).join(name);
                    if candidate.is_file() {
                        return Some(candidate.to_string_lossy().into_owned());
                    }
                }
            }
        }
        None
    }
}

/// Expand a rule's raw prerequisite text into concrete paths: pattern/suffix rules substitute the
/// stem into `%`; static-pattern rules substitute the stem derived from `target_pattern` into the
/// rule's `prerequisites` list (already done by the caller via `stem`).
fn instantiate_prereqs(rule: &Rule, stem: Option<&str>) -> (Vec<String>, Vec<String>) {
    let subst = |list: &[String]| -> Vec<String> {
        list.iter()
            .map(|p| match stem {
                Some(s) if p.contains('%') => p.replacen('%', s, 1),
                _ => p.clone(),
            })
            .collect()
    };
    (subst(&rule.prerequisites), subst(&rule.order_only))
}

/// Mark a set of target names as phony after resolution (driven by `.PHONY:` accumulation in the
/// evaluator, which isn't itself a buildable rule).
pub fn mark_phony(graph: &mut DepGraph, names: &HashSet<String>) {
    for node in graph.nodes.iter_mut() {
        if names.contains(&node.output) {
            node.phony = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DefaultLogger;
    use crate::rule::Rule;

    fn rule(targets: &[&str], prereqs: &[&str]) -> Rule {
        Rule::new(
            targets.iter().map(|s| s.to_string()).collect(),
            prereqs.iter().map(|s| s.to_string()).collect(),
            vec![],
            vec![],
            false,
            Context::new(),
        )
    }

    #[test]
    fn test_explicit_rule_resolves_with_prereqs() {
        let rules = vec![rule(&["all"], &["a.o"]), rule(&["a.o"], &[])];
        let logger = DefaultLogger;
        let (graph, ids) = Resolver::new(&rules, &[], &logger)
            .resolve(&["all".to_string()])
            .unwrap();
        let node = graph.node(ids[0]);
        assert_eq!(node.prerequisites, vec!["a.o".to_string()]);
    }

    #[test]
    fn test_pattern_rule_shortest_stem_wins() {
        let rules = vec![
            rule(&["ab%"], &[]),
            rule(&["abc%"], &[]),
            rule(&["a%"], &[]),
        ];
        let logger = DefaultLogger;
        let resolver = Resolver::new(&rules, &[], &logger);
        let (idx, stem) = resolver.select_pattern("abcd").unwrap();
        assert_eq!(idx, 1); // "abc%"
        assert_eq!(stem, "d");
    }

    #[test]
    fn test_cycle_detection() {
        let rules = vec![rule(&["a"], &["b"]), rule(&["b"], &["a"])];
        let logger = DefaultLogger;
        let result = Resolver::new(&rules, &[], &logger).resolve(&["a".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_rule_is_error() {
        let rules: Vec<Rule> = vec![];
        let logger = DefaultLogger;
        let result = Resolver::new(&rules, &[], &logger).resolve(&["nope-does-not-exist".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_order_only_excluded_from_unique_prerequisites_list() {
        let node = DepNode {
            output: "test".into(),
            prerequisites: vec!["foo".into(), "foo".into()],
            order_only: vec!["bar".into()],
            recipe: vec![],
            target_vars: vec![],
            phony: false,
            symlink_outputs: vec![],
            implicit_outputs: vec![],
            validations: vec![],
            pool: None,
            stem: None,
            allow_rules_mode: None,
            context: Context::new(),
        };
        assert_eq!(node.unique_prerequisites(), vec!["foo".to_string()]);
    }

    #[test]
    fn test_static_pattern_rule_takes_priority_over_general_pattern_and_suffix() {
        let rules = vec![
            Rule::new_static_pattern(
                vec!["foo.o".into()],
                "%.o".into(),
                vec!["%.c".into()],
                vec![],
                vec![],
                false,
                Context::new(),
            ),
            rule(&["%.o"], &["%.cc"]),
            Rule::new_suffix(".cc", ".o", vec![], Context::new()),
        ];
        let logger = DefaultLogger;
        let (graph, ids) = Resolver::new(&rules, &[], &logger)
            .resolve(&["foo.o".to_string()])
            .unwrap();
        let node = graph.node(ids[0]);
        assert_eq!(node.prerequisites, vec!["foo.c".to_string()]);
        assert_eq!(node.stem.as_deref(), Some("foo"));
    }

    #[test]
    fn test_double_colon_rules_each_get_own_node() {
        let mut rules = Vec::new();
        let mut first = rule(&["all"], &["a"]);
        first.double_colon = true;
        let mut second = rule(&["all"], &["b"]);
        second.double_colon = true;
        rules.push(rule(&["a"], &[]));
        rules.push(rule(&["b"], &[]));
        rules.push(first);
        rules.push(second);

        let logger = DefaultLogger;
        let (graph, ids) = Resolver::new(&rules, &[], &logger)
            .resolve(&["all".to_string()])
            .unwrap();
        // Only the last `::` declaration's node is returned for the goal, but both ran through
        // `make_node_from_rule` independently (each keeps its own declaration's prerequisites).
        let node = graph.node(ids[0]);
        assert_eq!(node.prerequisites, vec!["b".to_string()]);
    }

    fn rule_with_recipe(targets: &[&str], prereqs: &[&str]) -> Rule {
        let mut r = rule(targets, prereqs);
        r.recipe.push(RecipeLine {
            text: "echo hi".to_string(),
            silent: false,
            ignore_errors: false,
            always_run: false,
            context: Context::new(),
        });
        r
    }

    #[test]
    fn test_allow_rules_error_mode_rejects_recipe_override() {
        let rules = vec![
            rule_with_recipe(&["all"], &["a"]),
            rule_with_recipe(&["all"], &["b"]),
            rule(&["a"], &[]),
            rule(&["b"], &[]),
        ];
        let logger = DefaultLogger;
        let result = Resolver::new(&rules, &[], &logger)
            .with_allow_rules_mode(Some(AllowRulesMode::Error), false)
            .resolve(&["all".to_string()]);
        let err = result.unwrap_err();
        assert_eq!(err.kind, MakeErrorKind::RuleNotAllowed);
    }

    #[test]
    fn test_allow_rules_warning_mode_keeps_last_recipe() {
        let rules = vec![
            rule_with_recipe(&["all"], &["a"]),
            rule_with_recipe(&["all"], &["b"]),
            rule(&["a"], &[]),
            rule(&["b"], &[]),
        ];
        let logger = DefaultLogger;
        let (graph, ids) = Resolver::new(&rules, &[], &logger)
            .with_allow_rules_mode(Some(AllowRulesMode::Warning), false)
            .resolve(&["all".to_string()])
            .unwrap();
        let node = graph.node(ids[0]);
        assert_eq!(node.allow_rules_mode, Some(AllowRulesMode::Warning));
    }

    #[test]
    fn test_implicit_outputs_alias_one_node() {
        let mut primary = rule(&["primary"], &[]);
        primary.target_vars.push(crate::rule::TargetVar {
            name: ".KATI_IMPLICIT_OUTPUTS".to_string(),
            op: crate::statement::AssignOp::Simple,
            value: "secondary".to_string(),
        });
        let rules = vec![primary];
        let logger = DefaultLogger;
        let (graph, ids) = Resolver::new(&rules, &[], &logger)
            .resolve(&["primary".to_string()])
            .unwrap();
        let via_primary = ids[0];
        let via_secondary = graph.lookup("secondary").unwrap();
        assert_eq!(via_primary, via_secondary);
    }
}
