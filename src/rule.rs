//! The parsed `Rule` model: what the evaluator accumulates while walking statements, before the
//! resolver turns it into concrete `DepNode`s.

use crate::context::Context;

/// How a rule's targets were spelled, which determines how the resolver matches it against a
/// concrete target name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleKind {
    /// No `%` in any target: matches only the literal target names listed.
    Explicit,
    /// `%` present in the target: a pattern rule, e.g. `%.o: %.c`.
    Pattern,
    /// `targets: target-pattern: prereq-pattern` form.
    StaticPattern,
    /// `.X.Y:` suffix-rule form, equivalent to `%.Y: %.X`.
    Suffix,
}

/// Attribute assignments that apply to specific targets rather than declaring a buildable rule,
/// e.g. `.PHONY: clean` or `.KATI_IMPLICIT_OUTPUTS := x y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attribute {
    Phony,
    ImplicitOutputs,
    NinjaPool,
    SymlinkOutputs,
    Validations,
    Readonly,
    AllowRules,
    VisibilityPrefix,
}

impl Attribute {
    /// Recognize a special target name as a known attribute directive, if any.
    pub fn from_target(name: &str) -> Option<Self> {
        match name {
            ".PHONY" => Some(Self::Phony),
            ".KATI_IMPLICIT_OUTPUTS" => Some(Self::ImplicitOutputs),
            ".KATI_NINJA_POOL" => Some(Self::NinjaPool),
            ".KATI_SYMLINK_OUTPUTS" => Some(Self::SymlinkOutputs),
            ".KATI_VALIDATIONS" => Some(Self::Validations),
            ".KATI_READONLY" => Some(Self::Readonly),
            ".KATI_ALLOW_RULES" => Some(Self::AllowRules),
            ".KATI_VISIBILITY_PREFIX" => Some(Self::VisibilityPrefix),
            _ => None,
        }
    }
}

/// The mode named by a `.KATI_ALLOW_RULES: error|warning` attribute line: whether a later rule
/// redefining a target's recipe is rejected outright or merely warned about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllowRulesMode {
    Error,
    Warning,
}

impl AllowRulesMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }
}

/// A single target-specific variable assignment captured while the rule was parsed, applied to
/// the `DepNode`'s variable snapshot at resolution time.
#[derive(Clone, Debug)]
pub struct TargetVar {
    pub name: String,
    pub op: crate::statement::AssignOp,
    pub value: String,
}

/// Parsed form of a rule, before resolution against concrete targets. Rules accumulate in
/// declaration order during evaluation and are frozen before the resolver runs.
#[derive(Clone, Debug)]
pub struct Rule {
    pub kind: RuleKind,
    /// Output patterns, already split on whitespace; may contain `%` for pattern/suffix rules.
    pub targets: Vec<String>,
    /// Only set for `RuleKind::StaticPattern`: the `target-pattern` component.
    pub target_pattern: Option<String>,
    /// Prerequisite patterns, already split on whitespace.
    pub prerequisites: Vec<String>,
    pub order_only: Vec<String>,
    pub recipe: Vec<crate::statement::RecipeLine>,
    pub double_colon: bool,
    pub target_vars: Vec<TargetVar>,
    pub context: Context,
}

impl Rule {
    pub fn new(
        targets: Vec<String>,
        prerequisites: Vec<String>,
        order_only: Vec<String>,
        recipe: Vec<crate::statement::RecipeLine>,
        double_colon: bool,
        context: Context,
    ) -> Self {
        let kind = if targets.iter().any(|t| t.contains('%')) {
            RuleKind::Pattern
        } else {
            RuleKind::Explicit
        };
        Self {
            kind,
            targets,
            target_pattern: None,
            prerequisites,
            order_only,
            recipe,
            double_colon,
            target_vars: Vec::new(),
            context,
        }
    }

    /// Build a static-pattern rule: `targets: target_pattern: prerequisites`.
    pub fn new_static_pattern(
        targets: Vec<String>,
        target_pattern: String,
        prerequisites: Vec<String>,
        order_only: Vec<String>,
        recipe: Vec<crate::statement::RecipeLine>,
        double_colon: bool,
        context: Context,
    ) -> Self {
        Self {
            kind: RuleKind::StaticPattern,
            targets,
            target_pattern: Some(target_pattern),
            prerequisites,
            order_only,
            recipe,
            double_colon,
            target_vars: Vec::new(),
            context,
        }
    }

    /// Build a suffix rule (`.c.o:`) as its pattern-rule equivalent (`%.o: %.c`).
    pub fn new_suffix(
        from_suffix: &str,
        to_suffix: &str,
        recipe: Vec<crate::statement::RecipeLine>,
        context: Context,
    ) -> Self {
        Self {
            kind: RuleKind::Suffix,
            targets: vec![format!("%{to_suffix}")],
            target_pattern: None,
            prerequisites: vec![format!("%{from_suffix}")],
            order_only: Vec::new(),
            recipe,
            double_colon: false,
            target_vars: Vec::new(),
            context,
        }
    }

    pub fn has_recipe(&self) -> bool {
        !self.recipe.is_empty()
    }

    /// Whether this rule is a pattern-shaped rule for resolver dispatch purposes (suffix rules
    /// behave identically to pattern rules once converted).
    pub fn is_pattern_like(&self) -> bool {
        matches!(self.kind, RuleKind::Pattern | RuleKind::Suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_vs_pattern_kind() {
        let explicit = Rule::new(
            vec!["foo.o".into()],
            vec!["foo.c".into()],
            vec![],
            vec![],
            false,
            Context::new(),
        );
        assert_eq!(explicit.kind, RuleKind::Explicit);

        let pattern = Rule::new(
            vec!["%.o".into()],
            vec!["%.c".into()],
            vec![],
            vec![],
            false,
            Context::new(),
        );
        assert_eq!(pattern.kind, RuleKind::Pattern);
    }

    #[test]
    fn test_suffix_rule_becomes_pattern_equivalent() {
        let rule = Rule::new_suffix(".c", ".o", vec![], Context::new());
        assert_eq!(rule.targets, vec!["%.o".to_string()]);
        assert_eq!(rule.prerequisites, vec!["%.c".to_string()]);
        assert!(rule.is_pattern_like());
    }

    #[test]
    fn test_attribute_from_target() {
        assert_eq!(Attribute::from_target(".PHONY"), Some(Attribute::Phony));
        assert_eq!(Attribute::from_target("foo.o"), None);
    }

    #[test]
    fn test_allow_rules_mode_parse() {
        assert_eq!(AllowRulesMode::parse("error"), Some(AllowRulesMode::Error));
        assert_eq!(AllowRulesMode::parse("warning"), Some(AllowRulesMode::Warning));
        assert_eq!(AllowRulesMode::parse("bogus"), None);
    }
}
