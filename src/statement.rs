//! The statement model: the parser's output and the evaluator's input.
//!
//! A whole file parses into a flat `Vec<Statement>`, with conditionals represented as a tree
//! (`Statement::If` holds both branches' already-parsed bodies) so the evaluator — not the parser —
//! decides which branch runs. This is what lets `ifeq`/`ifdef` see variable values that may depend
//! on assignments the parser has no business evaluating.

use crate::context::Context;

/// How a variable assignment combines with any existing value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`: recursive, expanded on every reference.
    Recursive,
    /// `:=`/`::=`: simple, expanded once at assignment time.
    Simple,
    /// `?=`: recursive, only takes effect if the variable is currently undefined.
    Conditional,
    /// `+=`: append to the existing value, preserving its flavor.
    Append,
    /// `!=`: expand RHS, run it through the shell, store stdout (trimmed) as a simple value.
    Shell,
}

/// A single recipe (command) line within a rule, with its leading-character modifiers already
/// stripped and recorded.
#[derive(Clone, Debug)]
pub struct RecipeLine {
    /// Raw text to hand to the shell, after stripping the recipe prefix character and any of
    /// `@`/`-`/`+`. May itself still contain `$` references, expanded per invocation.
    pub text: String,
    /// `@`: don't echo the command before running it.
    pub silent: bool,
    /// `-`: a nonzero exit status doesn't stop the build.
    pub ignore_errors: bool,
    /// `+`: run even under `-n`/`--just-print`.
    pub always_run: bool,
    pub context: Context,
}

/// Which conditional directive introduced a `Statement::If`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfKind {
    IfDef,
    IfNDef,
    IfEq,
    IfNEq,
}

/// A parsed top-level construct. One file parses to `Vec<Statement>`; `If`'s branches are
/// themselves `Vec<Statement>`, so nesting is represented structurally rather than by a parser-
/// side conditional stack.
#[derive(Clone, Debug)]
pub enum Statement {
    Assign {
        name: String,
        op: AssignOp,
        /// Raw (unexpanded) right-hand side text.
        value: String,
        /// `override NAME = ...`: bypasses command-line-origin protection.
        is_override: bool,
        context: Context,
    },
    Rule {
        /// Raw (unexpanded) target list text.
        targets: String,
        double_colon: bool,
        /// Raw (unexpanded) normal prerequisite list text.
        prerequisites: String,
        /// Raw (unexpanded) order-only prerequisite list text (after `|`), if present.
        order_only: Option<String>,
        recipe: Vec<RecipeLine>,
        context: Context,
    },
    /// A rule-specific variable assignment, e.g. `foo.o: CFLAGS += -g`.
    TargetAssign {
        targets: String,
        name: String,
        op: AssignOp,
        value: String,
        context: Context,
    },
    Include {
        /// Raw (unexpanded) text; may name more than one file.
        files: String,
        /// `-include`/`sinclude`: a missing file is a warning, not an error.
        optional: bool,
        context: Context,
    },
    If {
        kind: IfKind,
        /// For `ifdef`/`ifndef`: the variable name. For `ifeq`/`ifneq`: the left operand text.
        lhs: String,
        /// Only set for `ifeq`/`ifneq`: the right operand text.
        rhs: Option<String>,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
        context: Context,
    },
    Define {
        name: String,
        op: AssignOp,
        body: String,
        is_override: bool,
        context: Context,
    },
    Export {
        /// `None` means `export` with no names: every subsequently-assigned variable is exported.
        names: Option<Vec<String>>,
        context: Context,
    },
    Unexport {
        names: Option<Vec<String>>,
        context: Context,
    },
    VPath {
        /// Empty pattern clears the whole vpath table.
        pattern: String,
        dirs: String,
        context: Context,
    },
}

impl Statement {
    pub fn context(&self) -> &Context {
        match self {
            Statement::Assign { context, .. }
            | Statement::Rule { context, .. }
            | Statement::TargetAssign { context, .. }
            | Statement::Include { context, .. }
            | Statement::If { context, .. }
            | Statement::Define { context, .. }
            | Statement::Export { context, .. }
            | Statement::Unexport { context, .. }
            | Statement::VPath { context, .. } => context,
        }
    }
}
