//! The evaluator: walks a parsed statement tree, drives the variable table, accumulates rules,
//! and implements the `FuncContext` seam that `functions.rs` dispatches through.
//!
//! A single owned struct generic over the logger, threaded through statement execution, with no
//! process-wide singleton state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::context::Context;
use crate::error::{Logger, MakeError, MakeErrorKind};
use crate::expr::{self, Expr};
use crate::functions::{self, FuncContext};
use crate::opts::Opts;
use crate::parser::Parser;
use crate::rule::{AllowRulesMode, Rule, TargetVar};
use crate::source::{SourceCache, SourceFile};
use crate::statement::{AssignOp, IfKind, Statement};
use crate::vars::{Flavor, Origin, VarTable};

const MAX_CALL_DEPTH: usize = 64;

/// Automatic variables bound while expanding a single recipe line.
#[derive(Clone, Debug, Default)]
pub struct AutomaticVars {
    pub target: String,
    pub first_prereq: String,
    pub all_prereqs_unique: Vec<String>,
    pub all_prereqs: Vec<String>,
    pub newer_prereqs: Vec<String>,
    pub stem: String,
}

impl AutomaticVars {
    fn lookup(&self, letter: char) -> Option<String> {
        Some(match letter {
            '@' => self.target.clone(),
            '<' => self.first_prereq.clone(),
            '^' => self.all_prereqs_unique.join(" "),
            '+' => self.all_prereqs.join(" "),
            '?' => self.newer_prereqs.join(" "),
            '*' => self.stem.clone(),
            _ => return None,
        })
    }
}

/// Drives statement execution over a frozen parse tree. Owns the variable table, rule
/// accumulator, include/export state, and the logger used for diagnostics.
pub struct Evaluator<L: Logger> {
    pub vars: VarTable,
    pub rules: Vec<Rule>,
    pub logger: L,
    pub source: SourceCache,
    pub opts: Opts,
    pub phony_targets: std::collections::HashSet<String>,
    pub allow_rules_mode: Option<AllowRulesMode>,
    pub vpath_table: Vec<(String, Vec<String>)>,
    pub default_goal: Option<String>,
    pub shell_status: i32,

    /// Ordered export set; re-exporting a name moves it to the end.
    export_order: Vec<String>,
    unexported: std::collections::HashSet<String>,
    export_all: bool,

    /// Per-target variable assignments collected from `TargetAssign` statements, keyed by literal
    /// target name, spliced into matching `Rule`s once parsing finishes.
    pending_target_vars: HashMap<String, Vec<TargetVar>>,
    clear_suffixes: bool,

    visibility: HashMap<String, Vec<String>>,
    current_file: PathBuf,
    current_context: Context,
    automatic: Option<AutomaticVars>,
    call_depth: usize,
    extra_file_deps: Vec<String>,
}

impl<L: Logger> Evaluator<L> {
    pub fn new(opts: Opts, logger: L) -> Self {
        let include_dirs = opts.directory.clone();
        let mut ev = Self {
            vars: VarTable::new(),
            rules: Vec::new(),
            logger,
            source: SourceCache::new(include_dirs),
            opts,
            phony_targets: Default::default(),
            allow_rules_mode: None,
            vpath_table: Vec::new(),
            default_goal: None,
            shell_status: 0,
            export_order: Vec::new(),
            unexported: Default::default(),
            export_all: false,
            pending_target_vars: HashMap::new(),
            clear_suffixes: false,
            visibility: HashMap::new(),
            current_file: PathBuf::new(),
            current_context: Context::new(),
            automatic: None,
            call_depth: 0,
            extra_file_deps: Vec::new(),
        };
        ev.seed_bootstrap_vars();
        ev
    }

    /// Bootstrap variables a complete engine needs before any makefile is read, grounded in
    /// kati's `read_bootstrap_makefile`.
    fn seed_bootstrap_vars(&mut self) {
        let ctx = Context::new();
        for (env_name, env_value) in std::env::vars() {
            let _ = self
                .vars
                .set_recursive(&env_name, env_value, Origin::Environment, ctx.clone());
        }

        let _ = self.vars.set_if_undefined("CC", "cc", Origin::Default, ctx.clone());
        let _ = self.vars.set_if_undefined("CXX", "c++", Origin::Default, ctx.clone());
        let _ = self.vars.set_if_undefined("AR", "ar", Origin::Default, ctx.clone());
        let _ = self
            .vars
            .set_simple("MAKE_VERSION", "4.2.1", Origin::Default, ctx.clone());
        let _ = self.vars.set_if_undefined("SHELL", "/bin/sh", Origin::Default, ctx.clone());

        let make_exe = std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "make".to_string());
        let _ = self.vars.set_simple("MAKE", make_exe, Origin::Default, ctx.clone());

        let makeflags: Vec<String> = std::env::args().skip(1).collect();
        let _ = self.vars.set_simple(
            "MAKEFLAGS",
            makeflags.join(" "),
            Origin::Default,
            ctx.clone(),
        );

        let _ = self.vars.set_simple(
            "MAKECMDGOALS",
            self.opts.goals.join(" "),
            Origin::Default,
            ctx.clone(),
        );

        let cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _ = self.vars.set_simple("CURDIR", cwd, Origin::Default, ctx.clone());

        let _ = self.vars.set_simple(".SHELLSTATUS", "0", Origin::Default, ctx.clone());

        for (name, value) in self.opts.overrides.clone() {
            let _ = self.vars.set_recursive(&name, value, Origin::CommandLine, ctx.clone());
        }
    }

    /// Parse and evaluate `path` as the top-level makefile.
    pub fn eval_file(&mut self, path: &Path) -> Result<(), MakeError> {
        let canonical = path.to_path_buf();
        self.current_file = canonical.clone();
        let file = self.source.load(path)?;
        self.refresh_makefile_list();
        let stmts = Parser::new(file).parse()?;
        self.eval_statements(&stmts)?;
        self.finalize();
        Ok(())
    }

    fn refresh_makefile_list(&mut self) {
        let list = self.source.makefile_list();
        let _ = self
            .vars
            .set_simple("MAKEFILE_LIST", list, Origin::File, self.current_context.clone());
    }

    /// Splice pending per-target variable assignments into accumulated rules and register the
    /// built-in suffix rules, unless `.SUFFIXES:` cleared them.
    fn finalize(&mut self) {
        for rule in &mut self.rules {
            for target in rule.targets.clone() {
                if let Some(tvs) = self.pending_target_vars.get(&target) {
                    rule.target_vars.extend(tvs.iter().cloned());
                }
            }
        }

        if !self.clear_suffixes {
            let ctx = Context::new();
            for (from, to, compiler) in [(".c", ".o", "CC"), (".cc", ".o", "CXX")] {
                let recipe_text = format!("$({compiler}) -c -o $@ $<");
                self.rules.push(Rule::new_suffix(
                    from,
                    to,
                    vec![crate::statement::RecipeLine {
                        text: recipe_text,
                        silent: false,
                        ignore_errors: false,
                        always_run: false,
                        context: ctx.clone(),
                    }],
                    ctx.clone(),
                ));
            }
        }
    }

    pub fn eval_statements(&mut self, stmts: &[Statement]) -> Result<(), MakeError> {
        for stmt in stmts {
            self.eval_statement(stmt)?;
        }
        Ok(())
    }

    fn eval_statement(&mut self, stmt: &Statement) -> Result<(), MakeError> {
        self.current_context = stmt.context().clone();
        match stmt {
            Statement::Assign {
                name,
                op,
                value,
                is_override,
                context,
            } => self.eval_assign(name, *op, value, *is_override, context),
            Statement::Rule {
                targets,
                double_colon,
                prerequisites,
                order_only,
                recipe,
                context,
            } => self.eval_rule(targets, *double_colon, prerequisites, order_only.as_deref(), recipe, context),
            Statement::TargetAssign {
                targets,
                name,
                op,
                value,
                context,
            } => self.eval_target_assign(targets, name, *op, value, context),
            Statement::Include { files, optional, context } => {
                self.eval_include(files, *optional, context)
            }
            Statement::If {
                kind,
                lhs,
                rhs,
                then_body,
                else_body,
                ..
            } => {
                let condition = self.eval_condition(*kind, lhs, rhs.as_deref())?;
                if condition {
                    self.eval_statements(then_body)
                } else {
                    self.eval_statements(else_body)
                }
            }
            Statement::Define {
                name,
                op,
                body,
                is_override,
                context,
            } => self.eval_define(name, *op, body, *is_override, context),
            Statement::Export { names, .. } => {
                self.eval_export(names.as_deref(), true);
                Ok(())
            }
            Statement::Unexport { names, .. } => {
                self.eval_export(names.as_deref(), false);
                Ok(())
            }
            Statement::VPath { pattern, dirs, .. } => {
                self.eval_vpath(pattern, dirs);
                Ok(())
            }
        }
    }

    fn expand_text(&mut self, text: &str) -> Result<String, MakeError> {
        let expr = expr::compile(text).map_err(|e| MakeError::new(e, self.current_context.clone()))?;
        self.expand(&expr).map_err(|e| MakeError::new(e, self.current_context.clone()))
    }

    fn eval_assign(
        &mut self,
        name_raw: &str,
        op: AssignOp,
        value: &str,
        is_override: bool,
        context: &Context,
    ) -> Result<(), MakeError> {
        let name = self.expand_text(name_raw)?;
        let origin = if is_override {
            Origin::Override
        } else {
            Origin::File
        };
        let result: Result<(), String> = match op {
            AssignOp::Recursive => self
                .vars
                .set_recursive(&name, value, origin, context.clone())
                .map(|_| ()),
            AssignOp::Simple => {
                let expanded = self.expand_text(value)?;
                self.vars
                    .set_simple(&name, expanded, origin, context.clone())
                    .map(|_| ())
            }
            AssignOp::Conditional => self
                .vars
                .set_if_undefined(&name, value, origin, context.clone())
                .map(|_| ()),
            AssignOp::Append => match self.vars.flavor(&name) {
                Some(Flavor::Simple) => {
                    let expanded = self.expand_text(value)?;
                    self.vars
                        .append(&name, &expanded, origin, context.clone())
                        .map(|_| ())
                }
                _ => self.vars.append(&name, value, origin, context.clone()).map(|_| ()),
            },
            AssignOp::Shell => {
                let cmd = self.expand_text(value)?;
                let output = self.run_shell(&cmd).map_err(|e| MakeError::new(e, context.clone()))?;
                self.vars
                    .set_simple(&name, output, origin, context.clone())
                    .map(|_| ())
            }
        };
        result.map_err(|e| MakeError::new(e, context.clone()))
    }

    fn eval_target_assign(
        &mut self,
        targets_raw: &str,
        name: &str,
        op: AssignOp,
        value: &str,
        context: &Context,
    ) -> Result<(), MakeError> {
        let targets = self.expand_text(targets_raw)?;
        for target in targets.split_whitespace() {
            self.pending_target_vars
                .entry(target.to_string())
                .or_default()
                .push(TargetVar {
                    name: name.to_string(),
                    op,
                    value: value.to_string(),
                });
        }
        Ok(())
    }

    fn eval_rule(
        &mut self,
        targets_raw: &str,
        double_colon: bool,
        prereqs_raw: &str,
        order_only_raw: Option<&str>,
        recipe: &[crate::statement::RecipeLine],
        context: &Context,
    ) -> Result<(), MakeError> {
        let targets_text = self.expand_text(targets_raw)?;
        let targets: Vec<String> = targets_text.split_whitespace().map(String::from).collect();

        if targets.len() == 1 && targets[0] == ".PHONY" {
            let prereqs = self.expand_text(prereqs_raw)?;
            self.phony_targets.extend(prereqs.split_whitespace().map(String::from));
            return Ok(());
        }
        if targets.len() == 1 && targets[0] == ".SUFFIXES" && prereqs_raw.trim().is_empty() {
            self.clear_suffixes = true;
            return Ok(());
        }
        if targets.len() == 1 && targets[0] == ".KATI_READONLY" {
            let prereqs = self.expand_text(prereqs_raw)?;
            for name in prereqs.split_whitespace() {
                self.vars.mark_readonly(name);
            }
            return Ok(());
        }
        if targets.len() == 1 && targets[0] == ".KATI_ALLOW_RULES" {
            let prereqs = self.expand_text(prereqs_raw)?;
            let mode = prereqs.trim();
            self.allow_rules_mode = Some(AllowRulesMode::parse(mode).ok_or_else(|| {
                MakeError::new(format!("invalid `.KATI_ALLOW_RULES' mode `{mode}'"), context.clone())
            })?);
            return Ok(());
        }

        let prereqs_text = self.expand_text(prereqs_raw)?;
        let prerequisites: Vec<String> = prereqs_text.split_whitespace().map(String::from).collect();
        let order_only: Vec<String> = match order_only_raw {
            Some(raw) => self
                .expand_text(raw)?
                .split_whitespace()
                .map(String::from)
                .collect(),
            None => Vec::new(),
        };

        let expanded_recipe: Vec<crate::statement::RecipeLine> = recipe.to_vec();

        // `target: target-pattern: prereq-pattern` static-pattern form: the parser can't tell
        // this apart from a normal rule (both look like `T: P`), so we detect it here: when every
        // target name lacks `%` but the prerequisite list's first word contains `%` and is
        // followed by a second colon-delimited section, GNU Make would have already split that at
        // parse time via a second colon. Since our grammar only carries one colon split, static
        // pattern rules must be written with the pattern as the sole "prerequisite" and a nested
        // colon, which `find_first` already resolves as a second Rule-level colon inside
        // `prereqs_raw` — handled by the parser producing `prereqs_raw` containing a literal `:`.
        if let Some((pattern_part, prereq_part)) = prereqs_raw.split_once(':') {
            if targets.iter().all(|t| !t.contains('%')) && pattern_part.contains('%') {
                let target_pattern = self.expand_text(pattern_part)?.trim().to_string();
                let prereq_text = self.expand_text(prereq_part)?;
                let prereqs: Vec<String> = prereq_text.split_whitespace().map(String::from).collect();
                self.rules.push(Rule::new_static_pattern(
                    targets,
                    target_pattern,
                    prereqs,
                    order_only,
                    expanded_recipe,
                    double_colon,
                    context.clone(),
                ));
                return Ok(());
            }
        }

        if self.default_goal.is_none() {
            if let Some(t) = targets.iter().find(|t| !t.starts_with('.')) {
                self.default_goal = Some(t.clone());
                let _ = self.vars.set_simple(
                    ".DEFAULT_GOAL",
                    t.clone(),
                    Origin::File,
                    context.clone(),
                );
            }
        }

        self.rules.push(Rule::new(
            targets,
            prerequisites,
            order_only,
            expanded_recipe,
            double_colon,
            context.clone(),
        ));
        Ok(())
    }

    fn eval_include(&mut self, files_raw: &str, optional: bool, context: &Context) -> Result<(), MakeError> {
        let files_text = self.expand_text(files_raw)?;
        let from_dir = self
            .current_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        for name in files_text.split_whitespace() {
            match self.source.resolve_include(name, &from_dir) {
                Some(path) => {
                    let saved_file = self.current_file.clone();
                    self.current_file = path.clone();
                    let file = self.source.load(&path)?;
                    self.refresh_makefile_list();
                    let stmts = Parser::new(file).parse()?;
                    self.eval_statements(&stmts)?;
                    self.current_file = saved_file;
                }
                None if optional => {
                    self.logger.warn(
                        format!("{name}: No such file or directory (optional include)"),
                        Some(context),
                    );
                }
                None => {
                    return Err(MakeError::new(
                        format!("{name}: No such file or directory"),
                        context.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn eval_condition(&mut self, kind: IfKind, lhs: &str, rhs: Option<&str>) -> Result<bool, MakeError> {
        Ok(match kind {
            IfKind::IfDef => self.vars.is_set(lhs.trim()),
            IfKind::IfNDef => !self.vars.is_set(lhs.trim()),
            IfKind::IfEq | IfKind::IfNEq => {
                let lhs_val = self.expand_text(lhs)?;
                let rhs_val = self.expand_text(rhs.unwrap_or(""))?;
                let eq = lhs_val == rhs_val;
                if kind == IfKind::IfEq {
                    eq
                } else {
                    !eq
                }
            }
        })
    }

    fn eval_define(
        &mut self,
        name: &str,
        op: AssignOp,
        body: &str,
        is_override: bool,
        context: &Context,
    ) -> Result<(), MakeError> {
        let origin = if is_override {
            Origin::Override
        } else {
            Origin::File
        };
        let result: Result<(), String> = match op {
            AssignOp::Simple => {
                let expanded = self.expand_text(body)?;
                self.vars
                    .set_simple(name, expanded, origin, context.clone())
                    .map(|_| ())
            }
            AssignOp::Conditional => self
                .vars
                .set_if_undefined(name, body, origin, context.clone())
                .map(|_| ()),
            AssignOp::Append => self.vars.append(name, body, origin, context.clone()).map(|_| ()),
            AssignOp::Recursive | AssignOp::Shell => self
                .vars
                .set_recursive(name, body, origin, context.clone())
                .map(|_| ()),
        };
        result.map_err(|e| MakeError::new(e, context.clone()))
    }

    fn eval_export(&mut self, names: Option<&[String]>, exporting: bool) {
        match names {
            None => {
                self.export_all = exporting;
            }
            Some(names) => {
                for name in names {
                    if exporting {
                        self.unexported.remove(name);
                        self.export_order.retain(|n| n != name);
                        self.export_order.push(name.clone());
                    } else {
                        self.unexported.insert(name.clone());
                        self.export_order.retain(|n| n != name);
                    }
                }
            }
        }
    }

    fn eval_vpath(&mut self, pattern: &str, dirs: &str) {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            self.vpath_table.clear();
            return;
        }
        let dirs: Vec<String> = dirs
            .split(|c: char| c == ':' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        self.vpath_table.push((pattern.to_string(), dirs));
    }

    /// Names currently flagged for export, in export-order.
    pub fn exported_names(&self) -> Vec<String> {
        if self.export_all {
            self.vars
                .names()
                .filter(|n| !self.unexported.contains(*n))
                .map(String::from)
                .collect()
        } else {
            self.export_order
                .iter()
                .filter(|n| !self.unexported.contains(*n))
                .cloned()
                .collect()
        }
    }

    /// Build the child-process environment for a recipe invocation.
    pub fn build_environment(&mut self) -> Result<Vec<(String, String)>, MakeError> {
        let names = self.exported_names();
        let mut env = Vec::with_capacity(names.len());
        for name in names {
            if let Some(v) = self.vars.get(&name).cloned() {
                let value = match v.flavor {
                    Flavor::Simple => v.raw,
                    Flavor::Recursive => {
                        let expr = crate::expr::compile(&v.raw)
                            .map_err(|e| MakeError::new(e, v.context.clone()))?;
                        self.expand(&expr).map_err(|e| MakeError::new(e, v.context))?
                    }
                };
                env.push((name, value));
            }
        }
        Ok(env)
    }

    fn run_shell(&mut self, cmd: &str) -> Result<String, String> {
        if self.opts.use_find_emulator {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if let Some(result) = crate::find::try_emulate_shell(cmd, &cwd) {
                self.shell_status = 0;
                return result;
            }
        }

        use std::process::Command;
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|e| format!("$(shell {cmd}): {e}"))?;
        self.shell_status = output.status.code().unwrap_or(-1);
        let _ = self.vars.set_simple(
            ".SHELLSTATUS",
            self.shell_status.to_string(),
            Origin::File,
            self.current_context.clone(),
        );
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim_end_matches('\n').replace('\n', " "))
    }

    /// Expand an already-compiled recipe line with automatic variables bound.
    pub fn expand_recipe_line(
        &mut self,
        text: &str,
        automatic: AutomaticVars,
        target_vars: &[TargetVar],
    ) -> Result<String, MakeError> {
        let mut saved = Vec::new();
        for tv in target_vars {
            let previous = self.vars.get(&tv.name).cloned();
            self.apply_target_var(tv)
                .map_err(|e| MakeError::new(e, self.current_context.clone()))?;
            saved.push((tv.name.clone(), previous));
        }

        self.automatic = Some(automatic);
        let result = self.expand_text(text);
        self.automatic = None;

        for (name, previous) in saved.into_iter().rev() {
            match previous {
                Some(v) => {
                    self.vars.get_by_id_mut(self.vars.id_of(&name).unwrap()).clone_from(&v);
                }
                None => { /* leave as-is; no removal API is needed since overlay is ephemeral */ }
            }
        }

        result
    }

    fn apply_target_var(&mut self, tv: &TargetVar) -> Result<(), String> {
        match tv.op {
            AssignOp::Recursive => self
                .vars
                .set_recursive(&tv.name, tv.value.clone(), Origin::File, self.current_context.clone())
                .map(|_| ()),
            AssignOp::Simple => {
                let expanded = self.expand(&expr::compile(&tv.value)?)?;
                self.vars
                    .set_simple(&tv.name, expanded, Origin::File, self.current_context.clone())
                    .map(|_| ())
            }
            AssignOp::Conditional => self
                .vars
                .set_if_undefined(&tv.name, tv.value.clone(), Origin::File, self.current_context.clone())
                .map(|_| ()),
            AssignOp::Append => self
                .vars
                .append(&tv.name, &tv.value, Origin::File, self.current_context.clone())
                .map(|_| ()),
            AssignOp::Shell => {
                let cmd = self.expand(&expr::compile(&tv.value)?)?;
                let output = self.run_shell(&cmd)?;
                self.vars
                    .set_simple(&tv.name, output, Origin::File, self.current_context.clone())
                    .map(|_| ())
            }
        }
    }
}

impl<L: Logger> FuncContext for Evaluator<L> {
    fn expand(&mut self, e: &Expr) -> Result<String, String> {
        match e {
            Expr::Literal(s) => Ok(s.clone()),
            Expr::VarRef(name) => self.expand_var(name),
            Expr::VarRefExpr(inner) => {
                let name = self.expand(inner)?;
                self.expand_var(&name)
            }
            Expr::Subst { var, pattern, replacement } => {
                let text = self.expand(var)?;
                let pattern = self.expand(pattern)?;
                let replacement = self.expand(replacement)?;
                Ok(functions::subst_ref(&pattern, &replacement, &text))
            }
            Expr::Call { name, args } => functions::call(name, args, self),
            Expr::Concat(parts) => {
                let mut out = String::new();
                for p in parts {
                    out.push_str(&self.expand(p)?);
                }
                Ok(out)
            }
        }
    }

    fn var_raw(&self, name: &str) -> Option<String> {
        self.vars.get(name).map(|v| v.raw.clone())
    }

    fn var_origin(&self, name: &str) -> Origin {
        self.vars.origin(name)
    }

    fn var_flavor(&self, name: &str) -> Option<Flavor> {
        self.vars.flavor(name)
    }

    fn var_location(&self, name: &str) -> Option<String> {
        self.vars.get(name).and_then(|v| v.context.label())
    }

    fn foreach(&mut self, var: &str, list: &str, body: &Expr, sep: &str) -> Result<String, String> {
        let saved = self.vars.get(var).cloned();
        let mut out = Vec::new();
        for word in list.split_whitespace() {
            self.vars
                .set_simple(var, word, Origin::Automatic, self.current_context.clone())?;
            out.push(self.expand(body)?);
        }
        match saved {
            Some(v) => {
                let id = self.vars.id_of(var).expect("just written above");
                self.vars.get_by_id_mut(id).clone_from(&v);
            }
            None => {
                let id = self.vars.id_of(var).expect("just written above");
                let slot = self.vars.get_by_id_mut(id);
                slot.origin = Origin::Undefined;
                slot.raw.clear();
                slot.expr = None;
            }
        }
        Ok(out.join(sep))
    }

    fn call_function(&mut self, name: &str, args: &[String]) -> Result<String, String> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(format!("$(call {name},...): recursion too deep"));
        }
        let Some(raw) = self.var_raw(name) else {
            return Ok(String::new());
        };
        let body = expr::compile(&raw)?;

        let mut saved = Vec::new();
        for (i, arg) in std::iter::once(&name.to_string()).chain(args.iter()).enumerate() {
            let key = i.to_string();
            saved.push((key.clone(), self.vars.get(&key).cloned()));
            self.vars
                .set_simple(&key, arg.clone(), Origin::Automatic, self.current_context.clone())?;
        }

        self.call_depth += 1;
        let result = self.expand(&body);
        self.call_depth -= 1;

        for (key, previous) in saved.into_iter().rev() {
            let id = self.vars.id_of(&key).expect("just written above");
            match previous {
                Some(v) => self.vars.get_by_id_mut(id).clone_from(&v),
                None => {
                    let slot = self.vars.get_by_id_mut(id);
                    slot.origin = Origin::Undefined;
                    slot.raw.clear();
                    slot.expr = None;
                }
            }
        }

        result
    }

    fn eval_text(&mut self, text: &str) -> Result<(), String> {
        let synthetic = Rc::new(SourceFile {
            path: self.current_file.clone(),
            lines: text.lines().map(String::from).collect(),
        });
        let stmts = Parser::new(synthetic).parse().map_err(|e| e.msg)?;
        self.eval_statements(&stmts).map_err(|e| e.msg)
    }

    fn shell(&mut self, cmd: &str) -> Result<String, String> {
        self.run_shell(cmd)
    }

    fn glob(&self, pattern: &str) -> Vec<String> {
        let mut matches: Vec<String> = match glob::glob(pattern) {
            Ok(paths) => paths
                .filter_map(Result::ok)
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        matches.sort();
        matches.dedup();
        matches
    }

    fn warn(&self, msg: &str) {
        self.logger.warn(msg, Some(&self.current_context));
    }

    fn print_info(&self, msg: &str) {
        println!("{msg}");
    }

    fn set_deprecated(&mut self, name: &str, msg: Option<String>) {
        let id = self.vars.ensure(name, self.current_context.clone());
        self.vars.get_by_id_mut(id).deprecated = msg;
    }

    fn set_obsolete(&mut self, name: &str, msg: Option<String>) {
        let id = self.vars.ensure(name, self.current_context.clone());
        self.vars.get_by_id_mut(id).obsolete = msg;
    }

    fn set_visibility_prefix(&mut self, name: &str, prefixes: Vec<String>) -> Result<(), String> {
        if let Some(existing) = self.visibility.get(name) {
            if existing != &prefixes {
                return Err(format!(
                    "conflicting `.KATI_visibility_prefix' declarations for variable `{name}'"
                ));
            }
            return Ok(());
        }
        self.visibility.insert(name.to_string(), prefixes);
        Ok(())
    }

    fn add_extra_file_deps(&mut self, deps: Vec<String>) {
        self.extra_file_deps.extend(deps);
    }
}

impl<L: Logger> Evaluator<L> {
    fn expand_var(&mut self, name: &str) -> Result<String, String> {
        if name.chars().count() == 1 {
            if let Some(automatic) = &self.automatic {
                if let Some(v) = automatic.lookup(name.chars().next().unwrap()) {
                    return Ok(v);
                }
            }
        }
        // `$(@D)`/`$(@F)`/etc.: directory/filename variants of an automatic variable.
        if name.len() == 2 && (name.ends_with('D') || name.ends_with('F')) {
            let letter = name.chars().next().unwrap();
            if let Some(automatic) = &self.automatic {
                if let Some(v) = automatic.lookup(letter) {
                    let want_dir = name.ends_with('D');
                    let first = v.split_whitespace().next().unwrap_or("");
                    return Ok(match first.rfind('/') {
                        Some(idx) if want_dir => first[..idx].to_string(),
                        Some(idx) => first[idx + 1..].to_string(),
                        None if want_dir => ".".to_string(),
                        None => first.to_string(),
                    });
                }
            }
        }

        let Some(var) = self.vars.get(name) else {
            return Ok(String::new());
        };
        if let Some(msg) = var.obsolete.clone() {
            return Err(format!("variable `{name}' is obsolete: {msg}"));
        }
        if let Some(msg) = var.deprecated.clone() {
            let full = format!("variable `{name}' is deprecated: {msg}");
            if self.opts.werror.contains(&MakeErrorKind::Deprecated) {
                return Err(full);
            }
            self.logger.warn(full, Some(&self.current_context));
        }
        if let Some(prefixes) = self.visibility.get(name) {
            let path = self.current_file.to_string_lossy();
            if !prefixes.iter().any(|p| path.starts_with(p.as_str())) {
                return Err(format!("variable `{name}' referenced outside its visibility prefix"));
            }
        }

        match var.flavor {
            Flavor::Simple => Ok(var.raw.clone()),
            Flavor::Recursive => {
                let id = self.vars.id_of(name).unwrap();
                let compiled = self.vars.get_by_id_mut(id).compiled()?.clone();
                self.expand(&compiled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BufferLogger, DefaultLogger};

    fn eval(text: &str) -> Evaluator<DefaultLogger> {
        let mut ev = Evaluator::new(Opts::default(), DefaultLogger);
        let synthetic = Rc::new(SourceFile {
            path: PathBuf::from("Makefile"),
            lines: text.lines().map(String::from).collect(),
        });
        let stmts = Parser::new(synthetic).parse().unwrap();
        ev.eval_statements(&stmts).unwrap();
        ev
    }

    #[test]
    fn test_immediate_vs_deferred() {
        let mut ev = eval("A := 1\nB = $(A)\nA := 2\n");
        let value = ev.expand_text("$(B)").unwrap();
        assert_eq!(value, "2");
    }

    #[test]
    fn test_foreach_scoping_restores_outer_binding() {
        let mut ev = eval("dir := FAIL\nfiles := $(foreach dir,a b,$(dir)/x)\n");
        assert_eq!(ev.vars.get("files").unwrap().raw, "a/x b/x");
        assert_eq!(ev.vars.get("dir").unwrap().raw, "FAIL");
    }

    #[test]
    fn test_conditional_assignment_once() {
        let mut ev = eval("A = one\nA ?= two\n");
        assert_eq!(ev.expand_text("$(A)").unwrap(), "one");
    }

    #[test]
    fn test_append_preserves_flavor() {
        let mut ev = eval("A := 1\nA += 2\n");
        assert_eq!(ev.expand_text("$(A)").unwrap(), "1 2");
    }

    #[test]
    fn test_ifeq_selects_branch() {
        let mut ev = eval("X := 1\nifeq ($(X),1)\nR := yes\nelse\nR := no\nendif\n");
        assert_eq!(ev.expand_text("$(R)").unwrap(), "yes");
    }

    #[test]
    fn test_phony_rule_populates_phony_set() {
        let ev = eval(".PHONY: clean test\nclean:\n\trm -rf build\n");
        assert!(ev.phony_targets.contains("clean"));
        assert!(ev.phony_targets.contains("test"));
    }

    #[test]
    fn test_visibility_violation_is_fatal() {
        let mut ev = eval("A := 1\n");
        ev.expand_text("$(KATI_visibility_prefix A,src/)").unwrap();
        let err = ev.expand_text("$(A)").unwrap_err();
        assert!(err.contains("visibility"));
    }

    #[test]
    fn test_visibility_conflicting_prefix_set_is_error() {
        let mut ev = eval("A := 1\n");
        ev.expand_text("$(KATI_visibility_prefix A,src/)").unwrap();
        let err = ev.expand_text("$(KATI_visibility_prefix A,other/)").unwrap_err();
        assert!(err.contains("conflicting"));
    }

    #[test]
    fn test_visibility_same_prefix_set_twice_is_not_an_error() {
        let mut ev = eval("A := 1\n");
        ev.expand_text("$(KATI_visibility_prefix A,src/)").unwrap();
        assert!(ev.expand_text("$(KATI_visibility_prefix A,src/)").is_ok());
    }

    #[test]
    fn test_kati_readonly_marks_variable() {
        let mut ev = eval("A := 1\n.KATI_READONLY: A\n");
        assert!(ev.vars.set_simple("A", "2", Origin::File, Context::new()).is_err());
    }

    #[test]
    fn test_kati_allow_rules_sets_mode() {
        let ev = eval(".KATI_ALLOW_RULES: error\n");
        assert_eq!(ev.allow_rules_mode, Some(AllowRulesMode::Error));
    }

    #[test]
    fn test_kati_allow_rules_rejects_unknown_mode() {
        let mut ev = Evaluator::new(Opts::default(), BufferLogger::default());
        let err = ev.eval_rule(".KATI_ALLOW_RULES", false, "bogus", None, &[], &Context::new());
        assert!(err.is_err());
    }

    #[test]
    fn test_target_specific_variable_applies_only_during_that_targets_recipe() {
        let ev = eval("CFLAGS := -O2\nfoo.o: CFLAGS += -g\nfoo.o: foo.c\n\t$(CC) $(CFLAGS) -c foo.c\n");
        let rule = ev.rules.iter().find(|r| r.targets == vec!["foo.o".to_string()]).unwrap();
        assert_eq!(rule.target_vars.len(), 1);
        assert_eq!(rule.target_vars[0].name, "CFLAGS");
    }

    #[test]
    fn test_call_binds_positional_args() {
        let mut ev = eval("greet = Hello, $(1)!\n");
        let result = ev.call_function("greet", &["World".to_string()]).unwrap();
        assert_eq!(result, "Hello, World!");
    }

    #[test]
    fn test_export_reordering() {
        let mut ev = eval("A = 1\nB = 2\n");
        ev.eval_export(Some(&["A".to_string()]), true);
        ev.eval_export(Some(&["B".to_string()]), true);
        ev.eval_export(Some(&["A".to_string()]), true);
        assert_eq!(ev.exported_names(), vec!["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn test_default_goal_is_first_non_dot_target() {
        let ev = eval(".PHONY: all\nall: foo\nfoo:\n");
        assert_eq!(ev.default_goal.as_deref(), Some("all"));
    }
}
