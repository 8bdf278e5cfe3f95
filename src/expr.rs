//! The expression tree: the compiled form of everything that can appear on the right-hand side of
//! a variable, inside a recipe line, or as a rule's targets/prerequisites.
//!
//! Compiling text into a tree once (rather than re-scanning raw strings on every expansion) is
//! what lets recursive variables store their expression form and makes `$(value X)` and error
//! messages cheap. A stack-machine compiler: instead of directly concatenating expanded text, each
//! stack frame accumulates `Expr` fragments and closes into a single node.

use crate::functions;

/// A compiled fragment of Make source text.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Plain text with no further expansion.
    Literal(String),
    /// `$(NAME)`/`${NAME}`/`$X` where `NAME` is a literal variable name known at compile time.
    VarRef(String),
    /// `$(NAME)` where `NAME` itself must be expanded before being used as a variable name, e.g.
    /// `$($(X))`.
    VarRefExpr(Box<Expr>),
    /// `$(VAR:PATTERN=REPLACEMENT)`.
    Subst {
        var: Box<Expr>,
        pattern: Box<Expr>,
        replacement: Box<Expr>,
    },
    /// A builtin function call with its already-split argument expressions.
    Call { name: String, args: Vec<Expr> },
    /// An ordered concatenation of fragments (the general case once more than one fragment is
    /// produced by compilation).
    Concat(Vec<Expr>),
}

impl Expr {
    pub fn empty() -> Self {
        Expr::Literal(String::new())
    }

    /// True for the (common) case of a compiled expression with no `$` at all, letting callers
    /// skip expansion entirely.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(s) => Some(s),
            _ => None,
        }
    }
}

/// Compile a piece of make source text (the RHS of an assignment, a rule's target/prerequisite
/// list, a recipe line, a function argument, ...) into an `Expr` tree.
pub fn compile(text: &str) -> Result<Expr, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts: Vec<Expr> = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '$' {
            literal.push(c);
            i += 1;
            continue;
        }

        // `$` at end of input: keep it literally.
        if i + 1 >= chars.len() {
            literal.push('$');
            i += 1;
            continue;
        }

        let next = chars[i + 1];
        if next == '$' {
            literal.push('$');
            i += 2;
            continue;
        }

        if next == '(' || next == '{' {
            let (start, end) = find_matching_close(&chars, i + 2)?;
            if !literal.is_empty() {
                parts.push(Expr::Literal(std::mem::take(&mut literal)));
            }
            let inner: String = chars[start..end].iter().collect();
            parts.push(compile_inner(&inner)?);
            i = end + 1;
            continue;
        }

        // Single-letter automatic/variable reference, e.g. `$@`, `$<`, `$X`.
        if !literal.is_empty() {
            parts.push(Expr::Literal(std::mem::take(&mut literal)));
        }
        parts.push(Expr::VarRef(next.to_string()));
        i += 2;
    }

    if !literal.is_empty() {
        parts.push(Expr::Literal(literal));
    }

    Ok(finalize(parts))
}

fn finalize(mut parts: Vec<Expr>) -> Expr {
    match parts.len() {
        0 => Expr::empty(),
        1 => parts.remove(0),
        _ => Expr::Concat(parts),
    }
}

/// Scan forward from `start` (just past an opening `$(`/`${`) for the index of the matching
/// closing delimiter. Nesting is tracked leniently: any further `$(`/`${` increases depth, and any
/// `)`/`}` decreases it, regardless of which bracket kind originally opened the frame — this
/// matches GNU Make's observed tolerance for mismatched bracket kinds (documented as an explicit
/// policy choice rather than an oversight, see DESIGN.md).
fn find_matching_close(chars: &[char], start: usize) -> Result<(usize, usize), String> {
    let mut i = start;
    let mut depth = 1;
    while i < chars.len() {
        match chars[i] {
            '$' if i + 1 < chars.len() && (chars[i + 1] == '(' || chars[i + 1] == '{') => {
                depth += 1;
                i += 2;
            }
            ')' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((start, i));
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    Err("unterminated variable reference".to_string())
}

/// Compile the text found strictly between a matched `$(`/`${` pair: decide whether it is a
/// substitution reference, a function call, or a plain (possibly computed) variable reference.
fn compile_inner(s: &str) -> Result<Expr, String> {
    let chars: Vec<char> = s.chars().collect();
    let first_space = top_level_index(&chars, |c| c == ' ' || c == '\t');
    let first_colon = top_level_index(&chars, |c| c == ':');

    // `$(VAR:PATTERN=REPLACEMENT)`: only a substitution ref if the colon precedes any top-level
    // whitespace (so `$(call f, a:b=c)` isn't mistaken for one) and a top-level `=` follows it.
    if let Some(colon) = first_colon {
        if first_space.map_or(true, |sp| sp > colon) {
            if let Some(eq_rel) = top_level_index(&chars[colon + 1..], |c| c == '=') {
                let eq = colon + 1 + eq_rel;
                let name: String = chars[..colon].iter().collect();
                let pattern: String = chars[colon + 1..eq].iter().collect();
                let replacement: String = chars[eq + 1..].iter().collect();
                return Ok(Expr::Subst {
                    var: Box::new(compile(&name)?),
                    pattern: Box::new(compile(&pattern)?),
                    replacement: Box::new(compile(&replacement)?),
                });
            }
        }
    }

    if let Some(sp) = first_space {
        let name: String = chars[..sp].iter().collect();
        if functions::is_builtin(&name) {
            let rest: String = chars[sp + 1..].iter().collect();
            let mut arg_strs = split_top_level_commas(&rest);
            if let Some(max) = functions::max_args(&name) {
                if arg_strs.len() > max && max > 0 {
                    let tail = arg_strs.split_off(max - 1).join(",");
                    arg_strs.push(tail);
                }
            }
            let args = arg_strs
                .iter()
                .map(|a| compile(a))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Expr::Call { name, args });
        }
    }

    // Plain variable reference; the name itself may require expansion (e.g. `$($(X))`).
    let name_expr = compile(s)?;
    Ok(match name_expr {
        Expr::Literal(lit) => Expr::VarRef(lit),
        other => Expr::VarRefExpr(Box::new(other)),
    })
}

/// Find the first index matching `pred` that is not nested inside a further `$(`/`${` span.
fn top_level_index(chars: &[char], pred: impl Fn(char) -> bool) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '$' if i + 1 < chars.len() && (chars[i + 1] == '(' || chars[i + 1] == '{') => {
                depth += 1;
                i += 2;
                continue;
            }
            ')' | '}' if depth > 0 => {
                depth -= 1;
            }
            c if depth == 0 && pred(c) => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split on top-level commas (depth tracked the same way as `top_level_index`), used for
/// argument-splitting of function calls.
pub fn split_top_level_commas(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut depth = 0usize;
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '$' if i + 1 < chars.len() && (chars[i + 1] == '(' || chars[i + 1] == '{') => {
                depth += 1;
                i += 2;
                continue;
            }
            ')' | '}' if depth > 0 => depth -= 1,
            ',' if depth == 0 => {
                parts.push(chars[start..i].iter().collect());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(chars[start..].iter().collect());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_roundtrip() {
        assert!(matches!(compile("plain text").unwrap(), Expr::Literal(s) if s == "plain text"));
    }

    #[test]
    fn test_single_letter_var_ref() {
        assert!(matches!(compile("$X").unwrap(), Expr::VarRef(s) if s == "X"));
    }

    #[test]
    fn test_escaped_dollar() {
        assert!(matches!(compile("$$").unwrap(), Expr::Literal(s) if s == "$"));
    }

    #[test]
    fn test_paren_and_brace_var_ref() {
        assert!(matches!(compile("$(FOO)").unwrap(), Expr::VarRef(s) if s == "FOO"));
        assert!(matches!(compile("${FOO}").unwrap(), Expr::VarRef(s) if s == "FOO"));
    }

    #[test]
    fn test_nested_var_ref() {
        match compile("$($(X))").unwrap() {
            Expr::VarRefExpr(inner) => {
                assert!(matches!(*inner, Expr::VarRef(s) if s == "X"));
            }
            other => panic!("expected VarRefExpr, got {other:?}"),
        }
    }

    #[test]
    fn test_substitution_ref() {
        match compile("$(SRCS:.c=.o)").unwrap() {
            Expr::Subst {
                var,
                pattern,
                replacement,
            } => {
                assert!(matches!(*var, Expr::VarRef(s) if s == "SRCS"));
                assert_eq!(pattern.as_literal(), Some(".c"));
                assert_eq!(replacement.as_literal(), Some(".o"));
            }
            other => panic!("expected Subst, got {other:?}"),
        }
    }

    #[test]
    fn test_function_call() {
        match compile("$(subst a,b,abc)").unwrap() {
            Expr::Call { name, args } => {
                assert_eq!(name, "subst");
                assert_eq!(args.len(), 3);
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_function_call_extra_commas_merge_into_last_arg() {
        // `strip` takes a single argument; extra top-level commas should not split further.
        match compile("$(strip a,b,c)").unwrap() {
            Expr::Call { name, args } => {
                assert_eq!(name, "strip");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_function_like_text_is_var_ref() {
        // `NOT_A_FUNC foo` does not match a known builtin, so it's treated as a (likely blank)
        // variable lookup rather than a function call.
        match compile("$(NOT_A_FUNC foo)").unwrap() {
            Expr::VarRef(s) => assert_eq!(s, "NOT_A_FUNC foo"),
            other => panic!("expected VarRef, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_reference_is_error() {
        assert!(compile("$(FOO").is_err());
    }

    #[test]
    fn test_split_top_level_commas_respects_nesting() {
        let parts = split_top_level_commas("a,$(subst x,y,z),b");
        assert_eq!(parts, vec!["a", "$(subst x,y,z)", "b"]);
    }
}
