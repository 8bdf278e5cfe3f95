//! The parser: converts a `SourceFile`'s physical lines into a `Vec<Statement>`.
//!
//! Conditionals are captured structurally — `ifeq`/`ifdef`/... hold both branches' already-parsed
//! bodies — so the evaluator decides which branch executes instead of the parser trying to
//! pre-evaluate conditions it has no variable context for. `.RECIPEPREFIX` is assumed to be the
//! default (tab) for the whole file; see DESIGN.md for why this is an acceptable scope reduction.

use std::rc::Rc;

use crate::context::Context;
use crate::error::MakeError;
use crate::source::SourceFile;
use crate::statement::{AssignOp, IfKind, RecipeLine, Statement};

const DEFAULT_RECIPE_PREFIX: char = '\t';

#[derive(Debug)]
enum Split {
    Assign(usize, usize, AssignOp),
    Colon(usize, usize, bool), // (pos, len, double_colon)
}

/// Find the earliest top-level (outside `$(...)`/`${...}`) occurrence of a rule-colon or
/// assignment operator. Whichever appears first wins, matching GNU Make's own line
/// classification.
fn find_first(text: &str) -> Option<Split> {
    let chars: Vec<char> = text.chars().collect();
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() && (chars[i + 1] == '(' || chars[i + 1] == '{') {
            depth += 1;
            i += 2;
            continue;
        }
        if depth > 0 {
            if chars[i] == ')' || chars[i] == '}' {
                depth -= 1;
            }
            i += 1;
            continue;
        }
        let rest: String = chars[i..].iter().collect();
        if rest.starts_with("::=") {
            return Some(Split::Assign(i, 3, AssignOp::Simple));
        }
        if rest.starts_with(":=") {
            return Some(Split::Assign(i, 2, AssignOp::Simple));
        }
        if rest.starts_with("?=") {
            return Some(Split::Assign(i, 2, AssignOp::Conditional));
        }
        if rest.starts_with("+=") {
            return Some(Split::Assign(i, 2, AssignOp::Append));
        }
        if rest.starts_with("!=") {
            return Some(Split::Assign(i, 2, AssignOp::Shell));
        }
        if rest.starts_with("::") {
            return Some(Split::Colon(i, 2, true));
        }
        if chars[i] == ':' {
            return Some(Split::Colon(i, 1, false));
        }
        if chars[i] == '=' {
            return Some(Split::Assign(i, 1, AssignOp::Recursive));
        }
        i += 1;
    }
    None
}

/// Find the first top-level occurrence of `needle` (a single char), skipping `$(...)` nesting.
fn find_top_level_char(text: &str, needle: char) -> Option<usize> {
    let chars: Vec<char> = text.chars().collect();
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() && (chars[i + 1] == '(' || chars[i + 1] == '{') {
            depth += 1;
            i += 2;
            continue;
        }
        if depth > 0 {
            if chars[i] == ')' || chars[i] == '}' {
                depth -= 1;
            }
            i += 1;
            continue;
        }
        if chars[i] == needle {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'#' && (i == 0 || bytes[i - 1] != b'\\') {
            return &line[..i];
        }
        i += 1;
    }
    line
}

enum BlockEnd {
    Eof,
    Else(String),
    Endif,
}

pub struct Parser {
    file: Rc<SourceFile>,
    pos: usize,
    recipe_prefix: char,
}

impl Parser {
    pub fn new(file: Rc<SourceFile>) -> Self {
        Self {
            file,
            pos: 0,
            recipe_prefix: DEFAULT_RECIPE_PREFIX,
        }
    }

    pub fn parse(mut self) -> Result<Vec<Statement>, MakeError> {
        let (stmts, end) = self.parse_block(false)?;
        match end {
            BlockEnd::Eof => Ok(stmts),
            BlockEnd::Else(_) | BlockEnd::Endif => Err(MakeError::new(
                "extraneous `else'/`endif'",
                self.file.context_at(self.pos),
            )),
        }
    }

    fn ctx(&self, line_number: usize) -> Context {
        self.file.context_at(line_number)
    }

    fn peek_raw(&self) -> Option<&str> {
        self.file.lines.get(self.pos).map(String::as_str)
    }

    /// Read one logical line starting at `self.pos`, joining backslash-continuations. Returns the
    /// joined text and the 1-indexed line number of its first physical line. `recipe` selects
    /// whether continuations are collapsed to a single space (normal text) or preserved literally
    /// (recipe lines, whose continuations are meaningful to the shell).
    fn read_logical(&mut self, recipe: bool) -> Option<(String, usize)> {
        let start_line = self.pos + 1;
        let mut text = self.file.lines.get(self.pos)?.clone();
        self.pos += 1;

        loop {
            let trailing_backslashes = text.chars().rev().take_while(|&c| c == '\\').count();
            if trailing_backslashes % 2 == 0 {
                break;
            }
            let Some(next) = self.file.lines.get(self.pos) else {
                break;
            };
            text.pop(); // drop the continuation backslash
            if recipe {
                text.push('\n');
                text.push_str(next);
            } else {
                text.push(' ');
                text.push_str(next.trim_start());
            }
            self.pos += 1;
        }

        Some((text, start_line))
    }

    /// Parse statements until EOF, a matching `else`, or a matching `endif`.
    fn parse_block(&mut self, in_conditional: bool) -> Result<(Vec<Statement>, BlockEnd), MakeError> {
        let mut stmts: Vec<Statement> = Vec::new();
        let mut current_rule: Option<usize> = None;

        loop {
            let Some(raw_peek) = self.peek_raw() else {
                return Ok((stmts, BlockEnd::Eof));
            };

            if current_rule.is_some() && raw_peek.starts_with(self.recipe_prefix) {
                let line_no = self.pos + 1;
                let (joined, _) = self.read_logical(true).unwrap();
                let mut body = joined[self.recipe_prefix.len_utf8()..].to_string();
                let mut silent = false;
                let mut ignore_errors = false;
                let mut always_run = false;
                loop {
                    match body.chars().next() {
                        Some('@') => {
                            silent = true;
                            body.remove(0);
                        }
                        Some('-') => {
                            ignore_errors = true;
                            body.remove(0);
                        }
                        Some('+') => {
                            always_run = true;
                            body.remove(0);
                        }
                        _ => break,
                    }
                }
                if let Some(Statement::Rule { recipe, .. }) = stmts.get_mut(current_rule.unwrap()) {
                    recipe.push(RecipeLine {
                        text: body,
                        silent,
                        ignore_errors,
                        always_run,
                        context: self.ctx(line_no),
                    });
                }
                continue;
            }

            let line_no = self.pos + 1;
            let (joined, _) = self.read_logical(false).unwrap();
            let stripped = strip_comment(&joined);
            let trimmed = stripped.trim();

            if trimmed.is_empty() {
                current_rule = None;
                continue;
            }

            let first_word = trimmed.split_whitespace().next().unwrap_or("");
            let rest_of_line = trimmed[first_word.len()..].trim_start().to_string();

            match first_word {
                "else" => {
                    if !in_conditional {
                        return Err(MakeError::new("extraneous `else'", self.ctx(line_no)));
                    }
                    return Ok((stmts, BlockEnd::Else(rest_of_line)));
                }
                "endif" => {
                    if !in_conditional {
                        return Err(MakeError::new("extraneous `endif'", self.ctx(line_no)));
                    }
                    return Ok((stmts, BlockEnd::Endif));
                }
                "ifeq" | "ifneq" | "ifdef" | "ifndef" => {
                    current_rule = None;
                    let stmt = self.parse_conditional(first_word, &rest_of_line, line_no)?;
                    stmts.push(stmt);
                }
                "define" => {
                    current_rule = None;
                    stmts.push(self.parse_define(&rest_of_line, line_no, false)?);
                }
                "override" => {
                    current_rule = None;
                    stmts.push(self.parse_override(&rest_of_line, line_no)?);
                }
                "export" => {
                    current_rule = None;
                    self.parse_export_unexport(&rest_of_line, line_no, true, &mut stmts)?;
                }
                "unexport" => {
                    current_rule = None;
                    self.parse_export_unexport(&rest_of_line, line_no, false, &mut stmts)?;
                }
                "vpath" => {
                    current_rule = None;
                    stmts.push(self.parse_vpath(&rest_of_line, line_no));
                }
                "include" | "-include" | "sinclude" => {
                    current_rule = None;
                    stmts.push(Statement::Include {
                        files: rest_of_line,
                        optional: first_word != "include",
                        context: self.ctx(line_no),
                    });
                }
                _ => {
                    let stmt = self.parse_assign_or_rule(trimmed, line_no)?;
                    let is_rule = matches!(stmt, Statement::Rule { .. });
                    stmts.push(stmt);
                    current_rule = if is_rule { Some(stmts.len() - 1) } else { None };
                }
            }
        }
    }

    fn parse_conditional(&mut self, kind_word: &str, rest: &str, line_no: usize) -> Result<Statement, MakeError> {
        let kind = match kind_word {
            "ifeq" => IfKind::IfEq,
            "ifneq" => IfKind::IfNEq,
            "ifdef" => IfKind::IfDef,
            "ifndef" => IfKind::IfNDef,
            _ => unreachable!(),
        };

        let (lhs, rhs) = match kind {
            IfKind::IfDef | IfKind::IfNDef => (rest.trim().to_string(), None),
            IfKind::IfEq | IfKind::IfNEq => self.parse_eq_operands(rest, line_no)?,
        };

        let (then_body, end) = self.parse_block(true)?;
        let else_body = match end {
            BlockEnd::Endif => Vec::new(),
            BlockEnd::Else(trailing) => {
                if trailing.is_empty() {
                    let (body, end2) = self.parse_block(true)?;
                    match end2 {
                        BlockEnd::Endif => body,
                        _ => {
                            return Err(MakeError::new(
                                "unterminated conditional",
                                self.ctx(line_no),
                            ))
                        }
                    }
                } else {
                    // `else ifeq ...`/`else ifdef ...` chaining.
                    let trailing_word = trailing.split_whitespace().next().unwrap_or("");
                    let trailing_rest = trailing[trailing_word.len()..].trim_start().to_string();
                    match trailing_word {
                        "ifeq" | "ifneq" | "ifdef" | "ifndef" => {
                            vec![self.parse_conditional(trailing_word, &trailing_rest, line_no)?]
                        }
                        _ => {
                            return Err(MakeError::new(
                                format!("invalid syntax in conditional: else {trailing}"),
                                self.ctx(line_no),
                            ))
                        }
                    }
                }
            }
            BlockEnd::Eof => {
                return Err(MakeError::new("missing `endif'", self.ctx(line_no)));
            }
        };

        Ok(Statement::If {
            kind,
            lhs,
            rhs,
            then_body,
            else_body,
            context: self.ctx(line_no),
        })
    }

    fn parse_eq_operands(&self, rest: &str, line_no: usize) -> Result<(String, Option<String>), MakeError> {
        let rest = rest.trim();
        if let Some(inner) = rest.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            let comma = find_top_level_char(inner, ',').ok_or_else(|| {
                MakeError::new("missing comma in conditional", self.ctx(line_no))
            })?;
            let lhs = inner[..comma].trim().to_string();
            let rhs = inner[comma + 1..].trim().to_string();
            return Ok((lhs, Some(rhs)));
        }

        let quote = rest.chars().next();
        if let Some(q @ ('"' | '\'')) = quote {
            let rest_after = &rest[1..];
            let end = rest_after
                .find(q)
                .ok_or_else(|| MakeError::new("unterminated string in conditional", self.ctx(line_no)))?;
            let lhs = rest_after[..end].to_string();
            let remainder = rest_after[end + 1..].trim_start();
            let q2 = remainder
                .chars()
                .next()
                .filter(|c| *c == '"' || *c == '\'')
                .ok_or_else(|| MakeError::new("expected second quoted operand", self.ctx(line_no)))?;
            let remainder_after = &remainder[1..];
            let end2 = remainder_after
                .find(q2)
                .ok_or_else(|| MakeError::new("unterminated string in conditional", self.ctx(line_no)))?;
            let rhs = remainder_after[..end2].to_string();
            return Ok((lhs, Some(rhs)));
        }

        Err(MakeError::new(
            "invalid syntax in conditional",
            self.ctx(line_no),
        ))
    }

    fn parse_define(&mut self, rest: &str, line_no: usize, is_override: bool) -> Result<Statement, MakeError> {
        let mut parts = rest.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| MakeError::new("empty variable name in `define'", self.ctx(line_no)))?
            .to_string();
        let op = match parts.next() {
            None => AssignOp::Recursive,
            Some("=") => AssignOp::Recursive,
            Some(":=") | Some("::=") => AssignOp::Simple,
            Some("?=") => AssignOp::Conditional,
            Some("+=") => AssignOp::Append,
            Some(other) => {
                return Err(MakeError::new(
                    format!("invalid define operator `{other}'"),
                    self.ctx(line_no),
                ))
            }
        };

        let mut body_lines: Vec<String> = Vec::new();
        let mut depth = 1;
        loop {
            let Some(raw) = self.file.lines.get(self.pos).cloned() else {
                return Err(MakeError::new("missing `endef'", self.ctx(line_no)));
            };
            self.pos += 1;
            let trimmed = raw.trim_start();
            let is_endef = trimmed == "endef" || trimmed.starts_with("endef ") || trimmed.starts_with("endef\t");
            let is_define = trimmed == "define" || trimmed.starts_with("define ") || trimmed.starts_with("define\t");
            if is_endef {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                body_lines.push(raw);
                continue;
            }
            if is_define {
                depth += 1;
            }
            body_lines.push(raw);
        }

        Ok(Statement::Define {
            name,
            op,
            body: body_lines.join("\n"),
            is_override,
            context: self.ctx(line_no),
        })
    }

    fn parse_override(&mut self, rest: &str, line_no: usize) -> Result<Statement, MakeError> {
        let first_word = rest.split_whitespace().next().unwrap_or("");
        if first_word == "define" {
            let define_rest = rest[first_word.len()..].trim_start();
            return self.parse_define(define_rest, line_no, true);
        }
        match self.parse_assign_or_rule(rest, line_no)? {
            Statement::Assign {
                name,
                op,
                value,
                context,
                ..
            } => Ok(Statement::Assign {
                name,
                op,
                value,
                is_override: true,
                context,
            }),
            _ => Err(MakeError::new(
                "`override' is only valid on variable assignments",
                self.ctx(line_no),
            )),
        }
    }

    fn parse_export_unexport(
        &mut self,
        rest: &str,
        line_no: usize,
        exporting: bool,
        stmts: &mut Vec<Statement>,
    ) -> Result<(), MakeError> {
        if rest.is_empty() {
            stmts.push(if exporting {
                Statement::Export {
                    names: None,
                    context: self.ctx(line_no),
                }
            } else {
                Statement::Unexport {
                    names: None,
                    context: self.ctx(line_no),
                }
            });
            return Ok(());
        }

        // `export NAME = VALUE` performs the assignment too, in addition to marking it exported.
        if let Some(Split::Assign(..)) = find_first(rest) {
            let assign = self.parse_assign_or_rule(rest, line_no)?;
            if let Statement::Assign { ref name, .. } = assign {
                stmts.push(if exporting {
                    Statement::Export {
                        names: Some(vec![name.clone()]),
                        context: self.ctx(line_no),
                    }
                } else {
                    Statement::Unexport {
                        names: Some(vec![name.clone()]),
                        context: self.ctx(line_no),
                    }
                });
            }
            stmts.push(assign);
            return Ok(());
        }

        let names = rest.split_whitespace().map(String::from).collect();
        stmts.push(if exporting {
            Statement::Export {
                names: Some(names),
                context: self.ctx(line_no),
            }
        } else {
            Statement::Unexport {
                names: Some(names),
                context: self.ctx(line_no),
            }
        });
        Ok(())
    }

    fn parse_vpath(&self, rest: &str, line_no: usize) -> Statement {
        let rest = rest.trim();
        let (pattern, dirs) = match rest.split_once(char::is_whitespace) {
            Some((p, d)) => (p.to_string(), d.trim().to_string()),
            None => (rest.to_string(), String::new()),
        };
        Statement::VPath {
            pattern,
            dirs,
            context: self.ctx(line_no),
        }
    }

    fn parse_assign_or_rule(&self, line: &str, line_no: usize) -> Result<Statement, MakeError> {
        match find_first(line) {
            Some(Split::Assign(pos, len, op)) => Ok(Statement::Assign {
                name: line[..pos].trim().to_string(),
                op,
                value: line[pos + len..].trim_start().to_string(),
                is_override: false,
                context: self.ctx(line_no),
            }),
            Some(Split::Colon(pos, len, double_colon)) => {
                let targets = line[..pos].trim().to_string();
                let rest = &line[pos + len..];

                // Does the remainder look like a target-specific variable assignment rather than
                // a prerequisite list? Only true if an assignment operator appears before any
                // top-level `;` that would otherwise start an inline recipe.
                let semi = find_top_level_char(rest, ';');
                if let Some(Split::Assign(p2, l2, op)) = find_first(rest) {
                    if semi.map_or(true, |s| s > p2) {
                        return Ok(Statement::TargetAssign {
                            targets,
                            name: rest[..p2].trim().to_string(),
                            op,
                            value: rest[p2 + l2..].trim_start().to_string(),
                            context: self.ctx(line_no),
                        });
                    }
                }

                let (deps_part, inline_recipe) = match semi {
                    Some(s) => (&rest[..s], Some(rest[s + 1..].to_string())),
                    None => (rest, None),
                };
                let (prereqs, order_only) = match find_top_level_char(deps_part, '|') {
                    Some(p) => (
                        deps_part[..p].trim().to_string(),
                        Some(deps_part[p + 1..].trim().to_string()),
                    ),
                    None => (deps_part.trim().to_string(), None),
                };

                let mut recipe = Vec::new();
                if let Some(cmd) = inline_recipe {
                    recipe.push(RecipeLine {
                        text: cmd,
                        silent: false,
                        ignore_errors: false,
                        always_run: false,
                        context: self.ctx(line_no),
                    });
                }

                Ok(Statement::Rule {
                    targets,
                    double_colon,
                    prerequisites: prereqs,
                    order_only,
                    recipe,
                    context: self.ctx(line_no),
                })
            }
            None => Err(MakeError::new(
                format!("missing separator (expected `:' or `='): {line}"),
                self.ctx(line_no),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(text: &str) -> Vec<Statement> {
        let file = Rc::new(SourceFile {
            path: PathBuf::from("Makefile"),
            lines: text.lines().map(String::from).collect(),
        });
        Parser::new(file).parse().unwrap()
    }

    #[test]
    fn test_simple_assignment() {
        let stmts = parse("A = 1\n");
        assert!(matches!(&stmts[0], Statement::Assign { name, value, op: AssignOp::Recursive, .. } if name == "A" && value == "1"));
    }

    #[test]
    fn test_simple_flavor_assignment() {
        let stmts = parse("A := 1\n");
        assert!(matches!(&stmts[0], Statement::Assign { op: AssignOp::Simple, .. }));
    }

    #[test]
    fn test_basic_rule_with_recipe() {
        let stmts = parse("all: a.o b.o\n\techo hi\n\t@silent\n");
        match &stmts[0] {
            Statement::Rule {
                targets,
                prerequisites,
                recipe,
                double_colon,
                ..
            } => {
                assert_eq!(targets, "all");
                assert_eq!(prerequisites, "a.o b.o");
                assert!(!double_colon);
                assert_eq!(recipe.len(), 2);
                assert_eq!(recipe[0].text, "echo hi");
                assert!(recipe[1].silent);
            }
            other => panic!("expected Rule, got {other:?}"),
        }
    }

    #[test]
    fn test_double_colon_rule() {
        let stmts = parse("all::\n\techo hi\n");
        assert!(matches!(&stmts[0], Statement::Rule { double_colon: true, .. }));
    }

    #[test]
    fn test_order_only_prerequisites() {
        let stmts = parse("out: src.c | build-dir\n");
        match &stmts[0] {
            Statement::Rule {
                prerequisites,
                order_only,
                ..
            } => {
                assert_eq!(prerequisites, "src.c");
                assert_eq!(order_only.as_deref(), Some("build-dir"));
            }
            other => panic!("expected Rule, got {other:?}"),
        }
    }

    #[test]
    fn test_target_specific_variable() {
        let stmts = parse("foo.o: CFLAGS += -g\n");
        assert!(matches!(
            &stmts[0],
            Statement::TargetAssign { targets, name, op: AssignOp::Append, .. }
                if targets == "foo.o" && name == "CFLAGS"
        ));
    }

    #[test]
    fn test_inline_recipe_after_semicolon() {
        let stmts = parse("all: ; echo hi\n");
        match &stmts[0] {
            Statement::Rule { recipe, .. } => {
                assert_eq!(recipe.len(), 1);
                assert_eq!(recipe[0].text, "echo hi");
            }
            other => panic!("expected Rule, got {other:?}"),
        }
    }

    #[test]
    fn test_ifeq_paren_form_and_else() {
        let stmts = parse("ifeq ($(X),1)\nA = yes\nelse\nA = no\nendif\n");
        match &stmts[0] {
            Statement::If {
                lhs,
                rhs,
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(lhs, "$(X)");
                assert_eq!(rhs.as_deref(), Some("1"));
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.len(), 1);
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn test_else_ifeq_chaining() {
        let stmts = parse("ifeq ($(X),1)\nA=1\nelse ifeq ($(X),2)\nA=2\nelse\nA=3\nendif\n");
        match &stmts[0] {
            Statement::If { else_body, .. } => {
                assert_eq!(else_body.len(), 1);
                assert!(matches!(&else_body[0], Statement::If { .. }));
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn test_ifdef() {
        let stmts = parse("ifdef FOO\nA=1\nendif\n");
        assert!(matches!(&stmts[0], Statement::If { kind: IfKind::IfDef, lhs, .. } if lhs == "FOO"));
    }

    #[test]
    fn test_define_endef_body() {
        let stmts = parse("define greeting\nhello\nworld\nendef\n");
        match &stmts[0] {
            Statement::Define { name, body, .. } => {
                assert_eq!(name, "greeting");
                assert_eq!(body, "hello\nworld");
            }
            other => panic!("expected Define, got {other:?}"),
        }
    }

    #[test]
    fn test_override_assignment() {
        let stmts = parse("override CFLAGS := -O2\n");
        assert!(matches!(&stmts[0], Statement::Assign { is_override: true, op: AssignOp::Simple, .. }));
    }

    #[test]
    fn test_export_with_assignment_emits_both() {
        let stmts = parse("export FOO = bar\n");
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], Statement::Export { names: Some(n), .. } if n == &vec!["FOO".to_string()]));
        assert!(matches!(&stmts[1], Statement::Assign { name, .. } if name == "FOO"));
    }

    #[test]
    fn test_include_directive() {
        let stmts = parse("-include config.mk\n");
        assert!(matches!(&stmts[0], Statement::Include { optional: true, files, .. } if files == "config.mk"));
    }

    #[test]
    fn test_continuation_join() {
        let stmts = parse("A = one \\\ntwo\n");
        assert!(matches!(&stmts[0], Statement::Assign { value, .. } if value == "one two"));
    }

    #[test]
    fn test_comment_stripped() {
        let stmts = parse("A = 1 # a comment\n");
        assert!(matches!(&stmts[0], Statement::Assign { value, .. } if value == "1"));
    }

    #[test]
    fn test_missing_separator_is_error() {
        let file = Rc::new(SourceFile {
            path: PathBuf::from("Makefile"),
            lines: vec!["just some text".to_string()],
        });
        assert!(Parser::new(file).parse().is_err());
    }
}
