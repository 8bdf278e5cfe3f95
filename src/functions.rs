//! The builtin function catalog: every `$(name ...)` call the evaluator recognizes, plus the
//! `KATI_*` extensions.
//!
//! Functions don't own evaluation state themselves; they're handed a `FuncContext` (implemented by
//! `Evaluator`) through which they expand sub-expressions, look up/assign variables, shell out, and
//! recurse into the makefile parser for `$(eval ...)`. `call()` dispatches over a plain string
//! match rather than a numeric-id table, which is simple enough for this crate's function count.

use std::borrow::Cow;
use std::path::Path;

use crate::expr::{split_top_level_commas, Expr};
use crate::vars::{Flavor, Origin};

/// Everything a builtin function needs from the evaluator. Implemented by `Evaluator` (see
/// `eval.rs`); kept as a trait here so `functions.rs` has no dependency on `eval.rs`, avoiding a
/// module cycle.
pub trait FuncContext {
    /// Expand a compiled expression to its string value.
    fn expand(&mut self, expr: &Expr) -> Result<String, String>;

    /// The raw (unexpanded) text of a variable, for `$(value NAME)`.
    fn var_raw(&self, name: &str) -> Option<String>;
    fn var_origin(&self, name: &str) -> Origin;
    fn var_flavor(&self, name: &str) -> Option<Flavor>;
    fn var_location(&self, name: &str) -> Option<String>;

    /// Run `body` once per word of `list`, with `var` bound to that word; returns the
    /// `sep`-joined results. `foreach`/`KATI_foreach_sep` share this.
    fn foreach(&mut self, var: &str, list: &str, body: &Expr, sep: &str) -> Result<String, String>;

    /// `$(call name,args...)`: evaluate the variable named `name` as a user-defined function with
    /// `$1`, `$2`, ... bound to `args`.
    fn call_function(&mut self, name: &str, args: &[String]) -> Result<String, String>;

    /// `$(eval text)`: parse `text` as additional makefile statements and apply them immediately.
    fn eval_text(&mut self, text: &str) -> Result<(), String>;

    /// `$(shell cmd)`.
    fn shell(&mut self, cmd: &str) -> Result<String, String>;

    /// `$(wildcard pattern)`, using the find-emulator's cached directory view when available.
    fn glob(&self, pattern: &str) -> Vec<String>;

    fn warn(&self, msg: &str);
    /// `$(info ...)` prints straight to stdout, unlike `warning`/`error`.
    fn print_info(&self, msg: &str);

    fn set_deprecated(&mut self, name: &str, msg: Option<String>);
    fn set_obsolete(&mut self, name: &str, msg: Option<String>);
    /// A second call naming a different prefix set for the same variable is a conflict error.
    fn set_visibility_prefix(&mut self, name: &str, prefixes: Vec<String>) -> Result<(), String>;
    fn add_extra_file_deps(&mut self, deps: Vec<String>);
}

/// Builtin function names recognized by the expression compiler. Anything not in this list is
/// treated as a (likely blank) variable reference rather than a call.
const BUILTINS: &[&str] = &[
    "subst",
    "patsubst",
    "strip",
    "findstring",
    "filter",
    "filter-out",
    "sort",
    "word",
    "wordlist",
    "words",
    "firstword",
    "lastword",
    "dir",
    "notdir",
    "suffix",
    "basename",
    "addsuffix",
    "addprefix",
    "join",
    "wildcard",
    "realpath",
    "abspath",
    "if",
    "or",
    "and",
    "foreach",
    "call",
    "value",
    "eval",
    "origin",
    "flavor",
    "shell",
    "error",
    "warning",
    "info",
    "file",
    "KATI_deprecated_var",
    "KATI_obsolete_var",
    "KATI_deprecate_export",
    "KATI_visibility_prefix",
    "KATI_foreach_sep",
    "KATI_shell_no_rerun",
    "KATI_file_no_rerun",
    "KATI_extra_file_deps",
    "KATI_variable_location",
    "KATI_profile_makefile",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Maximum number of comma-separated arguments a function distinguishes; extra top-level commas
/// are folded back into the final argument (GNU Make's documented behavior for e.g. `$(shell ...)`
/// commands that themselves contain commas). `None` means no limit (variadic).
pub fn max_args(name: &str) -> Option<usize> {
    match name {
        "subst" | "patsubst" | "wordlist" | "if" | "foreach" => Some(3),
        "findstring" | "filter" | "filter-out" | "word" | "addsuffix" | "addprefix" | "join"
        | "file" | "KATI_deprecated_var" | "KATI_obsolete_var" | "KATI_file_no_rerun" => Some(2),
        "strip" | "sort" | "words" | "firstword" | "lastword" | "dir" | "notdir" | "suffix"
        | "basename" | "wildcard" | "realpath" | "abspath" | "value" | "eval" | "origin"
        | "flavor" | "shell" | "error" | "warning" | "info" | "KATI_deprecate_export"
        | "KATI_shell_no_rerun" | "KATI_variable_location" => Some(1),
        "KATI_foreach_sep" => Some(4),
        "or" | "and" | "call" | "KATI_visibility_prefix" | "KATI_extra_file_deps"
        | "KATI_profile_makefile" => None,
        _ => None,
    }
}

fn words(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Match `word` against a `%`-pattern, returning the text captured by `%` on success. A pattern
/// with no `%` matches only identical text, capturing nothing.
fn match_pattern(pattern: &str, word: &str) -> Option<String> {
    match pattern.find('%') {
        None => (pattern == word).then(String::new),
        Some(idx) => {
            let prefix = &pattern[..idx];
            let suffix = &pattern[idx + 1..];
            if word.len() >= prefix.len() + suffix.len()
                && word.starts_with(prefix)
                && word.ends_with(suffix)
            {
                Some(word[prefix.len()..word.len() - suffix.len()].to_string())
            } else {
                None
            }
        }
    }
}

/// Public entry point for `match_pattern`, used by the resolver for pattern/suffix/vpath
/// selection outside of function-call dispatch.
pub fn match_pattern_pub(pattern: &str, word: &str) -> Option<String> {
    match_pattern(pattern, word)
}

fn apply_stem(replacement: &str, stem: &str) -> String {
    match replacement.find('%') {
        Some(idx) => format!("{}{}{}", &replacement[..idx], stem, &replacement[idx + 1..]),
        None => replacement.to_string(),
    }
}

fn patsubst_word(pattern: &str, replacement: &str, word: &str) -> String {
    match match_pattern(pattern, word) {
        Some(stem) => apply_stem(replacement, &stem),
        None => word.to_string(),
    }
}

/// `$(VAR:a=b)` sugar: a pattern with no `%` is implicitly anchored as a suffix, equivalent to
/// `$(patsubst %a,%b,$(VAR))`.
pub fn subst_ref(pattern: &str, replacement: &str, text: &str) -> String {
    let pattern: Cow<str> = if pattern.contains('%') {
        pattern.into()
    } else {
        format!("%{pattern}").into()
    };
    let replacement: Cow<str> = if replacement.contains('%') {
        replacement.into()
    } else {
        format!("%{replacement}").into()
    };
    words(text)
        .iter()
        .map(|w| patsubst_word(&pattern, &replacement, w))
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_dir(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("./", path),
    }
}

fn split_suffix(path: &str) -> Option<(&str, &str)> {
    let base = split_dir(path).1;
    base.rfind('.')
        .map(|idx| (&path[..path.len() - (base.len() - idx)], &base[idx..]))
}

fn lexical_abspath(path: &str) -> String {
    let cwd = std::env::current_dir().unwrap_or_default();
    let joined = if Path::new(path).is_absolute() {
        Path::new(path).to_path_buf()
    } else {
        cwd.join(path)
    };
    let mut out: Vec<String> = Vec::new();
    for comp in joined.components() {
        use std::path::Component::*;
        match comp {
            CurDir => {}
            ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str().to_string_lossy().into_owned()),
        }
    }
    if out.is_empty() {
        "/".to_string()
    } else {
        out.join("/")
    }
}

/// Dispatch a builtin call. `args` are the still-uncompiled-to-string argument expressions;
/// functions that need lazy/short-circuit evaluation (`if`, `and`, `or`, `foreach`, `call`) expand
/// only the arguments they actually need.
pub fn call(name: &str, args: &[Expr], ctx: &mut dyn FuncContext) -> Result<String, String> {
    match name {
        "subst" => {
            let (from, to, text) = expand3(args, ctx)?;
            Ok(text.replace(&from, &to))
        }
        "patsubst" => {
            let (pattern, replacement, text) = expand3(args, ctx)?;
            Ok(words(&text)
                .iter()
                .map(|w| patsubst_word(&pattern, &replacement, w))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "strip" => Ok(words(&expand1(args, ctx)?).join(" ")),
        "findstring" => {
            let (needle, haystack) = expand2(args, ctx)?;
            Ok(if haystack.contains(&needle) {
                needle
            } else {
                String::new()
            })
        }
        "filter" => {
            let (patterns, text) = expand2(args, ctx)?;
            let patterns = words(&patterns);
            Ok(words(&text)
                .into_iter()
                .filter(|w| patterns.iter().any(|p| match_pattern(p, w).is_some()))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "filter-out" => {
            let (patterns, text) = expand2(args, ctx)?;
            let patterns = words(&patterns);
            Ok(words(&text)
                .into_iter()
                .filter(|w| !patterns.iter().any(|p| match_pattern(p, w).is_some()))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "sort" => {
            let mut ws: Vec<String> = words(&expand1(args, ctx)?)
                .into_iter()
                .map(String::from)
                .collect();
            ws.sort();
            ws.dedup();
            Ok(ws.join(" "))
        }
        "word" => {
            let (n, text) = expand2(args, ctx)?;
            let n: usize = n
                .trim()
                .parse()
                .map_err(|_| format!("non-numeric first argument to `word': '{n}'"))?;
            if n == 0 {
                return Err("first argument to `word' must be greater than 0".to_string());
            }
            Ok(words(&text).get(n - 1).map(|s| s.to_string()).unwrap_or_default())
        }
        "wordlist" => {
            let (s, e, text) = expand3(args, ctx)?;
            let s: usize = s
                .trim()
                .parse()
                .map_err(|_| format!("non-numeric first argument to `wordlist': '{s}'"))?;
            let e: usize = e
                .trim()
                .parse()
                .map_err(|_| format!("non-numeric second argument to `wordlist': '{e}'"))?;
            let ws = words(&text);
            if s == 0 || s > e || s > ws.len() {
                return Ok(String::new());
            }
            Ok(ws[s - 1..e.min(ws.len())].join(" "))
        }
        "words" => Ok(words(&expand1(args, ctx)?).len().to_string()),
        "firstword" => Ok(words(&expand1(args, ctx)?)
            .first()
            .map(|s| s.to_string())
            .unwrap_or_default()),
        "lastword" => Ok(words(&expand1(args, ctx)?)
            .last()
            .map(|s| s.to_string())
            .unwrap_or_default()),
        "dir" => Ok(words(&expand1(args, ctx)?)
            .iter()
            .map(|w| split_dir(w).0.to_string())
            .collect::<Vec<_>>()
            .join(" ")),
        "notdir" => Ok(words(&expand1(args, ctx)?)
            .iter()
            .map(|w| split_dir(w).1.to_string())
            .collect::<Vec<_>>()
            .join(" ")),
        "suffix" => Ok(words(&expand1(args, ctx)?)
            .iter()
            .filter_map(|w| split_suffix(w).map(|(_, suf)| suf.to_string()))
            .collect::<Vec<_>>()
            .join(" ")),
        "basename" => Ok(words(&expand1(args, ctx)?)
            .iter()
            .map(|w| match split_suffix(w) {
                Some((base, _)) => base.to_string(),
                None => w.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")),
        "addsuffix" => {
            let (suf, text) = expand2(args, ctx)?;
            Ok(words(&text)
                .iter()
                .map(|w| format!("{w}{suf}"))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "addprefix" => {
            let (pre, text) = expand2(args, ctx)?;
            Ok(words(&text)
                .iter()
                .map(|w| format!("{pre}{w}"))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "join" => {
            let (a, b) = expand2(args, ctx)?;
            let (aw, bw) = (words(&a), words(&b));
            let n = aw.len().max(bw.len());
            Ok((0..n)
                .map(|i| format!("{}{}", aw.get(i).unwrap_or(&""), bw.get(i).unwrap_or(&"")))
                .collect::<Vec<_>>()
                .join(" "))
        }
        "wildcard" => {
            let pattern = expand1(args, ctx)?;
            let mut matches = Vec::new();
            for p in words(&pattern) {
                matches.extend(ctx.glob(p));
            }
            Ok(matches.join(" "))
        }
        "realpath" => Ok(words(&expand1(args, ctx)?)
            .iter()
            .filter_map(|w| std::fs::canonicalize(w).ok())
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")),
        "abspath" => Ok(words(&expand1(args, ctx)?)
            .iter()
            .map(|w| lexical_abspath(w))
            .collect::<Vec<_>>()
            .join(" ")),
        "if" => {
            require_args(args, 1, name)?;
            let cond = ctx.expand(&args[0])?;
            if !cond.trim().is_empty() {
                args.get(1).map(|e| ctx.expand(e)).unwrap_or(Ok(String::new()))
            } else {
                args.get(2).map(|e| ctx.expand(e)).unwrap_or(Ok(String::new()))
            }
        }
        "or" => {
            for a in args {
                let v = ctx.expand(a)?;
                if !v.is_empty() {
                    return Ok(v);
                }
            }
            Ok(String::new())
        }
        "and" => {
            let mut last = String::new();
            for a in args {
                last = ctx.expand(a)?;
                if last.is_empty() {
                    return Ok(String::new());
                }
            }
            Ok(last)
        }
        "foreach" => {
            require_args(args, 3, name)?;
            let var = ctx.expand(&args[0])?;
            let list = ctx.expand(&args[1])?;
            ctx.foreach(var.trim(), &list, &args[2], " ")
        }
        "KATI_foreach_sep" => {
            require_args(args, 4, name)?;
            let sep = ctx.expand(&args[0])?;
            let var = ctx.expand(&args[1])?;
            let list = ctx.expand(&args[2])?;
            ctx.foreach(var.trim(), &list, &args[3], &sep)
        }
        "call" => {
            require_args(args, 1, name)?;
            let func_name = ctx.expand(&args[0])?;
            let mut call_args = Vec::with_capacity(args.len() - 1);
            for a in &args[1..] {
                call_args.push(ctx.expand(a)?);
            }
            ctx.call_function(func_name.trim(), &call_args)
        }
        "value" => {
            let name = expand1(args, ctx)?;
            Ok(ctx.var_raw(name.trim()).unwrap_or_default())
        }
        "eval" => {
            let text = expand1(args, ctx)?;
            ctx.eval_text(&text)?;
            Ok(String::new())
        }
        "origin" => {
            let name = expand1(args, ctx)?;
            Ok(ctx.var_origin(name.trim()).as_str().to_string())
        }
        "flavor" => {
            let name = expand1(args, ctx)?;
            Ok(match ctx.var_flavor(name.trim()) {
                None => "undefined".to_string(),
                Some(Flavor::Recursive) => "recursive".to_string(),
                Some(Flavor::Simple) => "simple".to_string(),
            })
        }
        "shell" => ctx.shell(&expand1(args, ctx)?),
        "error" => Err(expand1(args, ctx)?),
        "warning" => {
            let msg = expand1(args, ctx)?;
            ctx.warn(&msg);
            Ok(String::new())
        }
        "info" => {
            let msg = expand1(args, ctx)?;
            ctx.print_info(&msg);
            Ok(String::new())
        }
        "file" => file_function(args, ctx),
        "KATI_deprecated_var" => {
            let (var, msg) = expand_opt2(args, ctx)?;
            ctx.set_deprecated(var.trim(), msg);
            Ok(String::new())
        }
        "KATI_obsolete_var" => {
            let (var, msg) = expand_opt2(args, ctx)?;
            ctx.set_obsolete(var.trim(), msg);
            Ok(String::new())
        }
        "KATI_deprecate_export" => {
            // Deprecating `export` itself is a whole-program policy switch, not per-variable
            // state; the CLI surfaces it through `--werror_deprecated`, so there is nothing
            // further to record here.
            let _ = expand1(args, ctx)?;
            Ok(String::new())
        }
        "KATI_visibility_prefix" => {
            require_args(args, 1, name)?;
            let var = ctx.expand(&args[0])?;
            let mut prefixes = Vec::with_capacity(args.len() - 1);
            for a in &args[1..] {
                prefixes.push(ctx.expand(a)?);
            }
            ctx.set_visibility_prefix(var.trim(), prefixes)?;
            Ok(String::new())
        }
        "KATI_shell_no_rerun" => ctx.shell(&expand1(args, ctx)?),
        "KATI_file_no_rerun" => file_function(args, ctx),
        "KATI_extra_file_deps" => {
            let mut deps = Vec::new();
            for a in args {
                deps.extend(words(&ctx.expand(a)?).into_iter().map(String::from));
            }
            ctx.add_extra_file_deps(deps);
            Ok(String::new())
        }
        "KATI_variable_location" => {
            let name = expand1(args, ctx)?;
            Ok(ctx.var_location(name.trim()).unwrap_or_default())
        }
        "KATI_profile_makefile" => Ok(String::new()),
        _ => Err(format!("unknown function `{name}'")),
    }
}

fn require_args(args: &[Expr], min: usize, name: &str) -> Result<(), String> {
    if args.len() < min {
        Err(format!(
            "insufficient number of arguments ({}) to function `{name}'",
            args.len()
        ))
    } else {
        Ok(())
    }
}

fn expand1(args: &[Expr], ctx: &mut dyn FuncContext) -> Result<String, String> {
    match args.first() {
        Some(a) => ctx.expand(a),
        None => Ok(String::new()),
    }
}

fn expand2(args: &[Expr], ctx: &mut dyn FuncContext) -> Result<(String, String), String> {
    let a = args.first().map(|e| ctx.expand(e)).transpose()?.unwrap_or_default();
    let b = args.get(1).map(|e| ctx.expand(e)).transpose()?.unwrap_or_default();
    Ok((a, b))
}

fn expand3(args: &[Expr], ctx: &mut dyn FuncContext) -> Result<(String, String, String), String> {
    let a = args.first().map(|e| ctx.expand(e)).transpose()?.unwrap_or_default();
    let b = args.get(1).map(|e| ctx.expand(e)).transpose()?.unwrap_or_default();
    let c = args.get(2).map(|e| ctx.expand(e)).transpose()?.unwrap_or_default();
    Ok((a, b, c))
}

fn expand_opt2(args: &[Expr], ctx: &mut dyn FuncContext) -> Result<(String, Option<String>), String> {
    require_args(args, 1, "KATI_deprecated_var/KATI_obsolete_var")?;
    let a = ctx.expand(&args[0])?;
    let b = match args.get(1) {
        Some(e) => Some(ctx.expand(e)?),
        None => None,
    };
    Ok((a, b))
}

fn file_function(args: &[Expr], ctx: &mut dyn FuncContext) -> Result<String, String> {
    require_args(args, 1, "file")?;
    let op_and_name = ctx.expand(&args[0])?;
    let mut it = op_and_name.splitn(2, char::is_whitespace);
    let op = it.next().unwrap_or_default();
    let filename = it.next().unwrap_or_default().trim();
    match op {
        "<" => Ok(std::fs::read_to_string(filename).unwrap_or_default()),
        ">" | ">>" => {
            let text = match args.get(1) {
                Some(e) => ctx.expand(e)?,
                None => String::new(),
            };
            let result = if op == ">" {
                std::fs::write(filename, text)
            } else {
                use std::io::Write;
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(filename)
                    .and_then(|mut f| f.write_all(text.as_bytes()))
            };
            result.map_err(|e| format!("$(file {op} {filename}): {e}"))?;
            Ok(String::new())
        }
        other => Err(format!("Invalid file operation: '{other}'")),
    }
}

/// Re-exported for the parser, which needs the same top-level comma splitting for directive
/// argument lists (e.g. `vpath`).
pub fn split_args(s: &str) -> Vec<String> {
    split_top_level_commas(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestCtx;

    impl FuncContext for TestCtx {
        fn expand(&mut self, expr: &Expr) -> Result<String, String> {
            Ok(expr.as_literal().unwrap_or_default().to_string())
        }
        fn var_raw(&self, _name: &str) -> Option<String> {
            None
        }
        fn var_origin(&self, _name: &str) -> Origin {
            Origin::Undefined
        }
        fn var_flavor(&self, _name: &str) -> Option<Flavor> {
            None
        }
        fn var_location(&self, _name: &str) -> Option<String> {
            None
        }
        fn foreach(&mut self, _var: &str, _list: &str, _body: &Expr, _sep: &str) -> Result<String, String> {
            Ok(String::new())
        }
        fn call_function(&mut self, _name: &str, _args: &[String]) -> Result<String, String> {
            Ok(String::new())
        }
        fn eval_text(&mut self, _text: &str) -> Result<(), String> {
            Ok(())
        }
        fn shell(&mut self, _cmd: &str) -> Result<String, String> {
            Ok(String::new())
        }
        fn glob(&self, _pattern: &str) -> Vec<String> {
            Vec::new()
        }
        fn warn(&self, _msg: &str) {}
        fn print_info(&self, _msg: &str) {}
        fn set_deprecated(&mut self, _name: &str, _msg: Option<String>) {}
        fn set_obsolete(&mut self, _name: &str, _msg: Option<String>) {}
        fn set_visibility_prefix(
            &mut self,
            _name: &str,
            _prefixes: Vec<String>,
        ) -> Result<(), String> {
            Ok(())
        }
        fn add_extra_file_deps(&mut self, _deps: Vec<String>) {}
    }

    fn lit(s: &str) -> Expr {
        Expr::Literal(s.to_string())
    }

    #[test]
    fn test_subst() {
        let mut ctx = TestCtx;
        let result = call("subst", &[lit("a"), lit("b"), lit("banana")], &mut ctx).unwrap();
        assert_eq!(result, "bbnbnb");
    }

    #[test]
    fn test_patsubst() {
        let mut ctx = TestCtx;
        let result = call(
            "patsubst",
            &[lit("%.c"), lit("%.o"), lit("a.c b.c")],
            &mut ctx,
        )
        .unwrap();
        assert_eq!(result, "a.o b.o");
    }

    #[test]
    fn test_subst_ref_suffix_sugar() {
        assert_eq!(subst_ref(".c", ".o", "a.c b.c"), "a.o b.o");
    }

    #[test]
    fn test_filter_and_filter_out() {
        let mut ctx = TestCtx;
        assert_eq!(
            call("filter", &[lit("%.c"), lit("a.c b.o c.c")], &mut ctx).unwrap(),
            "a.c c.c"
        );
        assert_eq!(
            call("filter-out", &[lit("%.c"), lit("a.c b.o c.c")], &mut ctx).unwrap(),
            "b.o"
        );
    }

    #[test]
    fn test_word_functions() {
        let mut ctx = TestCtx;
        assert_eq!(call("words", &[lit("a b c")], &mut ctx).unwrap(), "3");
        assert_eq!(call("word", &[lit("2"), lit("a b c")], &mut ctx).unwrap(), "b");
        assert_eq!(
            call("wordlist", &[lit("2"), lit("3"), lit("a b c")], &mut ctx).unwrap(),
            "b c"
        );
        assert_eq!(call("firstword", &[lit("a b c")], &mut ctx).unwrap(), "a");
        assert_eq!(call("lastword", &[lit("a b c")], &mut ctx).unwrap(), "c");
    }

    #[test]
    fn test_dir_notdir_suffix_basename() {
        let mut ctx = TestCtx;
        assert_eq!(call("dir", &[lit("src/main.rs")], &mut ctx).unwrap(), "src/");
        assert_eq!(call("dir", &[lit("main.rs")], &mut ctx).unwrap(), "./");
        assert_eq!(call("notdir", &[lit("src/main.rs")], &mut ctx).unwrap(), "main.rs");
        assert_eq!(call("suffix", &[lit("src/main.rs")], &mut ctx).unwrap(), ".rs");
        assert_eq!(call("suffix", &[lit("README")], &mut ctx).unwrap(), "");
        assert_eq!(call("basename", &[lit("src/main.rs")], &mut ctx).unwrap(), "src/main");
    }

    #[test]
    fn test_if_short_circuits_else_branch() {
        let mut ctx = TestCtx;
        let result = call("if", &[lit("yes"), lit("then-val")], &mut ctx).unwrap();
        assert_eq!(result, "then-val");
        let result = call("if", &[lit(""), lit("then-val")], &mut ctx).unwrap();
        assert_eq!(result, "");
    }

    #[test]
    fn test_or_returns_first_nonempty() {
        let mut ctx = TestCtx;
        let result = call("or", &[lit(""), lit(""), lit("x")], &mut ctx).unwrap();
        assert_eq!(result, "x");
    }

    #[test]
    fn test_and_returns_empty_if_any_empty() {
        let mut ctx = TestCtx;
        assert_eq!(call("and", &[lit("a"), lit("")], &mut ctx).unwrap(), "");
        assert_eq!(call("and", &[lit("a"), lit("b")], &mut ctx).unwrap(), "b");
    }

    #[test]
    fn test_join() {
        let mut ctx = TestCtx;
        assert_eq!(
            call("join", &[lit("a b"), lit("1 2 3")], &mut ctx).unwrap(),
            "a1 b2 3"
        );
    }

    #[test]
    fn test_sort_dedups_and_orders() {
        let mut ctx = TestCtx;
        assert_eq!(call("sort", &[lit("c a b a")], &mut ctx).unwrap(), "a b c");
    }

    #[test]
    fn test_unknown_function_errors() {
        let mut ctx = TestCtx;
        assert!(call("not-a-real-fn", &[], &mut ctx).is_err());
    }
}
