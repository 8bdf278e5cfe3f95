//! Variable storage: flavors, origins, and the arena-backed table that owns every `Variable` in a
//! run.
//!
//! `VarTable` is implemented as an arena (`Vec<Variable>`) addressed by integer handles (`VarId`)
//! rather than passing `Variable`s around by value or by long-lived reference — recursive
//! variables can reference variables that are assigned later, and rules hold their own per-target
//! overlays, so a stable, cheap-to-copy handle is what lets the rest of the crate avoid lifetime
//! gymnastics.

use std::collections::HashMap;

use crate::context::Context;
use crate::expr::Expr;

/// Whether a variable's value is expanded at assignment time (`Simple`, from `:=`/`::=`) or at
/// every reference (`Recursive`, from `=`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    Recursive,
    Simple,
}

/// Where a variable's current value came from, mirroring GNU Make's `origin` function. Ordered
/// roughly by increasing precedence for override resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    Undefined,
    Default,
    Environment,
    File,
    CommandLine,
    Override,
    Automatic,
}

impl Origin {
    /// The name `$(origin VAR)` should produce.
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Undefined => "undefined",
            Origin::Default => "default",
            Origin::Environment => "environment",
            Origin::File => "file",
            Origin::CommandLine => "command line",
            Origin::Override => "override",
            Origin::Automatic => "automatic",
        }
    }
}

/// A single variable binding: its flavor, current value/expression, provenance, and any
/// attributes attached via `KATI_deprecated_var`/`KATI_obsolete_var` or `override`/`readonly`.
#[derive(Clone, Debug)]
pub struct Variable {
    pub flavor: Flavor,
    pub origin: Origin,
    /// For `Simple` variables, the already-expanded value. For `Recursive` variables, the raw
    /// source text (re-expanded on every reference); kept alongside the compiled `expr` so
    /// `$(value VAR)` can return the original text without re-serializing the tree.
    pub raw: String,
    /// Compiled form of `raw`, built lazily on first reference and cached; `None` for `Simple`
    /// variables, which have nothing left to expand.
    pub expr: Option<Expr>,
    pub export: bool,
    pub readonly: bool,
    pub deprecated: Option<String>,
    pub obsolete: Option<String>,
    pub context: Context,
}

impl Variable {
    fn simple(value: impl Into<String>, origin: Origin, context: Context) -> Self {
        Self {
            flavor: Flavor::Simple,
            origin,
            raw: value.into(),
            expr: None,
            export: false,
            readonly: false,
            deprecated: None,
            obsolete: None,
            context,
        }
    }

    fn recursive(raw: impl Into<String>, origin: Origin, context: Context) -> Self {
        Self {
            flavor: Flavor::Recursive,
            origin,
            raw: raw.into(),
            expr: None,
            export: false,
            readonly: false,
            deprecated: None,
            obsolete: None,
            context,
        }
    }

    /// The expression to evaluate on reference. `Simple` variables are represented as a literal
    /// expr so callers can treat both flavors uniformly.
    pub fn compiled(&mut self) -> Result<&Expr, String> {
        if self.expr.is_none() {
            self.expr = Some(match self.flavor {
                Flavor::Simple => Expr::Literal(self.raw.clone()),
                Flavor::Recursive => crate::expr::compile(&self.raw)?,
            });
        }
        Ok(self.expr.as_ref().unwrap())
    }
}

/// Stable handle into a `VarTable`'s arena. Cheap to copy and store in `Rule`/scope overlays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VarId(usize);

/// Owns every `Variable` for a run. Lookups by name go through `names`; holders of a `VarId` (a
/// rule's per-target overlay, a `foreach` loop variable) can bypass the name lookup entirely.
#[derive(Debug, Default)]
pub struct VarTable {
    arena: Vec<Variable>,
    names: HashMap<String, VarId>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_of(&self, name: &str) -> Option<VarId> {
        self.names.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.names.get(name).map(|id| &self.arena[id.0])
    }

    pub fn get_by_id(&self, id: VarId) -> &Variable {
        &self.arena[id.0]
    }

    pub fn get_by_id_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.arena[id.0]
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| v.origin != Origin::Undefined)
    }

    /// `origin` function support: unknown variables report `"undefined"`.
    pub fn origin(&self, name: &str) -> Origin {
        self.get(name).map(|v| v.origin).unwrap_or(Origin::Undefined)
    }

    /// `flavor` function support: unknown variables report as `"undefined"` via the caller.
    pub fn flavor(&self, name: &str) -> Option<Flavor> {
        self.get(name).map(|v| v.flavor)
    }

    /// Return the `VarId` for `name`, allocating an undefined placeholder if it has never been
    /// assigned. Lets `KATI_deprecated_var`/`KATI_obsolete_var`/`KATI_visibility_prefix` attach
    /// metadata to a variable before its first assignment.
    pub fn ensure(&mut self, name: &str, context: Context) -> VarId {
        if let Some(id) = self.names.get(name) {
            return *id;
        }
        self.alloc(name, Variable::recursive(String::new(), Origin::Undefined, context))
    }

    fn alloc(&mut self, name: &str, var: Variable) -> VarId {
        if let Some(id) = self.names.get(name) {
            self.arena[id.0] = var;
            *id
        } else {
            let id = VarId(self.arena.len());
            self.arena.push(var);
            self.names.insert(name.to_string(), id);
            id
        }
    }

    /// Implements `:=`/`::=` simple assignment: `value` is expanded by the caller before this is
    /// invoked, since expansion needs the evaluator's full context (functions, recursion guard).
    pub fn set_simple(
        &mut self,
        name: &str,
        value: impl Into<String>,
        origin: Origin,
        context: Context,
    ) -> Result<VarId, String> {
        self.check_writable(name, origin)?;
        Ok(self.alloc(name, Variable::simple(value, origin, context)))
    }

    /// Implements `=` recursive assignment: `raw` is stored verbatim and only compiled/expanded
    /// lazily on reference.
    pub fn set_recursive(
        &mut self,
        name: &str,
        raw: impl Into<String>,
        origin: Origin,
        context: Context,
    ) -> Result<VarId, String> {
        self.check_writable(name, origin)?;
        Ok(self.alloc(name, Variable::recursive(raw, origin, context)))
    }

    /// Implements `?=`: only assigns if the variable is currently undefined.
    pub fn set_if_undefined(
        &mut self,
        name: &str,
        raw: impl Into<String>,
        origin: Origin,
        context: Context,
    ) -> Result<Option<VarId>, String> {
        if self.is_set(name) {
            return Ok(None);
        }
        self.set_recursive(name, raw, origin, context).map(Some)
    }

    /// Implements `+=`: appends to the existing value (space-separated) preserving the existing
    /// variable's flavor, or behaves like `=` if the variable is new.
    pub fn append(
        &mut self,
        name: &str,
        suffix: &str,
        origin: Origin,
        context: Context,
    ) -> Result<VarId, String> {
        self.check_writable(name, origin)?;
        match self.get(name) {
            Some(existing) => {
                let flavor = existing.flavor;
                let mut raw = existing.raw.clone();
                if !raw.is_empty() && !suffix.is_empty() {
                    raw.push(' ');
                }
                raw.push_str(suffix);
                let var = match flavor {
                    Flavor::Simple => Variable::simple(raw, origin, context),
                    Flavor::Recursive => Variable::recursive(raw, origin, context),
                };
                Ok(self.alloc(name, var))
            }
            None => self.set_recursive(name, suffix, origin, context),
        }
    }

    fn check_writable(&self, name: &str, incoming: Origin) -> Result<(), String> {
        if let Some(existing) = self.get(name) {
            if existing.readonly && incoming != Origin::Override {
                return Err(format!("cannot assign to readonly variable `{name}'"));
            }
        }
        Ok(())
    }

    pub fn mark_readonly(&mut self, name: &str) {
        if let Some(id) = self.names.get(name).copied() {
            self.arena[id.0].readonly = true;
        }
    }

    pub fn mark_export(&mut self, name: &str, export: bool) {
        if let Some(id) = self.names.get(name).copied() {
            self.arena[id.0].export = export;
        }
    }

    pub fn set_deprecated(&mut self, name: &str, msg: Option<String>) {
        if let Some(id) = self.names.get(name).copied() {
            self.arena[id.0].deprecated = msg;
        }
    }

    pub fn set_obsolete(&mut self, name: &str, msg: Option<String>) {
        if let Some(id) = self.names.get(name).copied() {
            self.arena[id.0].obsolete = msg;
        }
    }

    /// All variables marked for export, for populating a child shell's environment.
    pub fn exported(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.names
            .iter()
            .map(|(name, id)| (name.as_str(), &self.arena[id.0]))
            .filter(|(_, v)| v.export)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }
}

/// A variable name is invalid if it is empty or contains whitespace, `:`, `#`, or `=` — these
/// characters would make assignment/rule lines ambiguous to parse.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '#' | '='))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_assignment_expands_once() {
        let mut vars = VarTable::new();
        vars.set_simple("A", "hello", Origin::File, Context::new())
            .unwrap();
        let v = vars.get("A").unwrap();
        assert_eq!(v.flavor, Flavor::Simple);
        assert_eq!(v.raw, "hello");
    }

    #[test]
    fn test_recursive_stores_raw_text() {
        let mut vars = VarTable::new();
        vars.set_recursive("A", "$(B)", Origin::File, Context::new())
            .unwrap();
        assert_eq!(vars.get("A").unwrap().raw, "$(B)");
    }

    #[test]
    fn test_conditional_assignment_only_when_undefined() {
        let mut vars = VarTable::new();
        vars.set_recursive("A", "first", Origin::File, Context::new())
            .unwrap();
        let result = vars
            .set_if_undefined("A", "second", Origin::File, Context::new())
            .unwrap();
        assert!(result.is_none());
        assert_eq!(vars.get("A").unwrap().raw, "first");
    }

    #[test]
    fn test_append_preserves_flavor_and_joins_with_space() {
        let mut vars = VarTable::new();
        vars.set_simple("A", "one", Origin::File, Context::new())
            .unwrap();
        vars.append("A", "two", Origin::File, Context::new())
            .unwrap();
        let v = vars.get("A").unwrap();
        assert_eq!(v.raw, "one two");
        assert_eq!(v.flavor, Flavor::Simple);
    }

    #[test]
    fn test_readonly_rejects_further_assignment() {
        let mut vars = VarTable::new();
        vars.set_simple("A", "one", Origin::File, Context::new())
            .unwrap();
        vars.mark_readonly("A");
        assert!(vars
            .set_simple("A", "two", Origin::File, Context::new())
            .is_err());
    }

    #[test]
    fn test_origin_of_unknown_variable_is_undefined() {
        let vars = VarTable::new();
        assert_eq!(vars.origin("NOPE"), Origin::Undefined);
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("has:colon"));
        assert!(is_valid_name("VALID_NAME"));
    }
}
