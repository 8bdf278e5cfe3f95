//! In-process `find`/`findleaves.py` emulator: enough of the `find` grammar that build files
//! commonly reach for — `-name`, `-type`, `-maxdepth`, `-prune`, `-print`, boolean composition,
//! and `-L` — to service `$(shell find ...)` without forking a shell.
//!
//! A directory tree snapshot is taken on first traversal of a root and cached for the lifetime
//! of the `Snapshot`; repeated queries against the same root re-walk only the cached entries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Parsed predicate tree. `Not` binds tighter than `And`, which binds tighter than `Or`;
/// adjacency between primaries is an implicit `And`.
#[derive(Clone, Debug)]
pub enum Expr {
    Name(String),
    Type(FileType),
    Prune,
    Print,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    pub follow_symlinks: bool,
    pub max_depth: Option<usize>,
}

/// One cached directory-tree entry, keyed by its path relative to the snapshot's root.
#[derive(Clone, Debug)]
struct Entry {
    name: String,
    relative_path: String,
    is_dir: bool,
    is_file: bool,
    is_symlink: bool,
    symlink_target: Option<PathBuf>,
    depth: usize,
}

/// A snapshot of one root's directory tree, taken on first use and reused for every subsequent
/// query against that root so repeated `$(shell find ...)` calls are O(matches) rather than
/// O(tree size) each time.
#[derive(Debug, Default)]
pub struct Snapshot {
    root: PathBuf,
    entries: Vec<Entry>,
}

impl Snapshot {
    /// Walk `root` once, recording every entry in pre-order, alphabetical-within-directory
    /// traversal order, which is what the resulting `-print` output preserves.
    pub fn take(root: &Path, follow_symlinks: bool) -> std::io::Result<Self> {
        let mut entries = Vec::new();
        let meta = if follow_symlinks {
            std::fs::metadata(root)
        } else {
            std::fs::symlink_metadata(root)
        }?;
        entries.push(Entry {
            name: root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.to_string_lossy().into_owned()),
            relative_path: ".".to_string(),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            is_symlink: meta.is_symlink(),
            symlink_target: if meta.is_symlink() {
                std::fs::read_link(root).ok()
            } else {
                None
            },
            depth: 0,
        });
        if meta.is_dir() {
            walk(root, Path::new("."), 1, follow_symlinks, &mut entries)?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    /// Evaluate `expr` against every cached entry, honoring `-maxdepth`/`-prune` and the
    /// implicit-`-print` default action, returning matched relative paths in traversal order.
    pub fn query(&self, expr: &Expr, opts: &FindOptions) -> Vec<String> {
        let has_action = contains_action(expr);
        let expr = if has_action {
            expr.clone()
        } else {
            Expr::And(Box::new(expr.clone()), Box::new(Expr::Print))
        };

        let mut pruned_prefixes: Vec<String> = Vec::new();
        let mut output = Vec::new();
        for entry in &self.entries {
            if let Some(max) = opts.max_depth {
                if entry.depth > max {
                    continue;
                }
            }
            if pruned_prefixes
                .iter()
                .any(|p| is_under(&entry.relative_path, p))
            {
                continue;
            }
            let (matched, pruned) = evaluate(&expr, entry);
            if pruned {
                pruned_prefixes.push(entry.relative_path.clone());
            }
            if matched && contains_print(&expr) {
                output.push(entry.relative_path.clone());
            }
        }
        output
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_under(path: &str, prefix: &str) -> bool {
    path != prefix && (path.starts_with(prefix) && path[prefix.len()..].starts_with('/'))
}

fn walk(
    abs_dir: &Path,
    rel_dir: &Path,
    depth: usize,
    follow_symlinks: bool,
    out: &mut Vec<Entry>,
) -> std::io::Result<()> {
    let mut children: Vec<_> = std::fs::read_dir(abs_dir)?
        .filter_map(|e| e.ok())
        .collect();
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let name = child.file_name().to_string_lossy().into_owned();
        let abs_path = child.path();
        let rel_path = rel_dir.join(&name);
        let meta = if follow_symlinks {
            std::fs::metadata(&abs_path)
        } else {
            std::fs::symlink_metadata(&abs_path)
        };
        let meta = match meta {
            Ok(m) => m,
            Err(_) => continue,
        };
        let is_symlink = meta.is_symlink();
        out.push(Entry {
            name: name.clone(),
            relative_path: rel_path.to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            is_symlink,
            symlink_target: if is_symlink {
                std::fs::read_link(&abs_path).ok()
            } else {
                None
            },
            depth,
        });
        if meta.is_dir() {
            walk(&abs_path, &rel_path, depth + 1, follow_symlinks, out)?;
        }
    }
    Ok(())
}

fn contains_action(expr: &Expr) -> bool {
    match expr {
        Expr::Print | Expr::Prune => true,
        Expr::Not(e) => contains_action(e),
        Expr::And(a, b) | Expr::Or(a, b) => contains_action(a) || contains_action(b),
        _ => false,
    }
}

fn contains_print(expr: &Expr) -> bool {
    match expr {
        Expr::Print => true,
        Expr::Not(e) => contains_print(e),
        Expr::And(a, b) | Expr::Or(a, b) => contains_print(a) || contains_print(b),
        _ => false,
    }
}

/// Evaluate `expr` against one entry, short-circuiting `And`/`Or` per usual boolean rules.
/// Returns `(matched, pruned)`; `pruned` is only ever set by an evaluated `-prune`.
fn evaluate(expr: &Expr, entry: &Entry) -> (bool, bool) {
    match expr {
        Expr::Name(pattern) => (glob_match(pattern, &entry.name), false),
        Expr::Type(ft) => {
            let matched = match ft {
                FileType::File => entry.is_file,
                FileType::Directory => entry.is_dir,
                FileType::Symlink => entry.is_symlink,
            };
            (matched, false)
        }
        Expr::Prune => (true, entry.is_dir),
        Expr::Print => (true, false),
        Expr::Not(e) => {
            let (m, _) = evaluate(e, entry);
            (!m, false)
        }
        Expr::And(a, b) => {
            let (ma, pa) = evaluate(a, entry);
            if !ma {
                return (false, pa);
            }
            let (mb, pb) = evaluate(b, entry);
            (mb, pa || pb)
        }
        Expr::Or(a, b) => {
            let (ma, pa) = evaluate(a, entry);
            if ma {
                return (true, pa);
            }
            let (mb, pb) = evaluate(b, entry);
            (mb, pa || pb)
        }
    }
}

/// Shell-style glob matching (`*`, `?`, `[...]`) as used by `-name`, via the `glob` crate's
/// pattern matcher already in the dependency stack for `$(wildcard ...)`.
fn glob_match(pattern: &str, name: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(name))
        .unwrap_or(false)
}

/// Internal token type for the recursive-descent predicate parser.
#[derive(Debug, Clone)]
enum Token {
    Expr(Expr),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

/// Parse `find`-style arguments (everything after the starting-point paths have been split off)
/// into an `Expr` tree plus global options.
pub fn parse_expressions(args: &[String]) -> Result<(Expr, FindOptions), String> {
    let mut options = FindOptions::default();
    let mut remaining = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-maxdepth" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "find: missing argument to `-maxdepth'".to_string())?;
                options.max_depth = Some(
                    v.parse()
                        .map_err(|_| format!("find: invalid argument `{v}' to `-maxdepth'"))?,
                );
            }
            other => remaining.push(other.to_string()),
        }
        i += 1;
    }

    let mut tokens = Vec::new();
    let mut i = 0;
    while i < remaining.len() {
        let arg = remaining[i].as_str();
        match arg {
            "(" | "\\(" => tokens.push(Token::LParen),
            ")" | "\\)" => tokens.push(Token::RParen),
            "-not" | "!" => tokens.push(Token::Not),
            "-a" | "-and" => tokens.push(Token::And),
            "-o" | "-or" => tokens.push(Token::Or),
            "-name" => {
                i += 1;
                let v = remaining
                    .get(i)
                    .ok_or_else(|| "find: missing argument to `-name'".to_string())?;
                tokens.push(Token::Expr(Expr::Name(v.clone())));
            }
            "-type" => {
                i += 1;
                let v = remaining
                    .get(i)
                    .ok_or_else(|| "find: missing argument to `-type'".to_string())?;
                let ft = match v.as_str() {
                    "f" => FileType::File,
                    "d" => FileType::Directory,
                    "l" => FileType::Symlink,
                    other => return Err(format!("find: unknown argument to -type: {other}")),
                };
                tokens.push(Token::Expr(Expr::Type(ft)));
            }
            "-prune" => tokens.push(Token::Expr(Expr::Prune)),
            "-print" => tokens.push(Token::Expr(Expr::Print)),
            other => return Err(format!("find: unknown predicate `{other}'")),
        }
        i += 1;
    }

    if tokens.is_empty() {
        return Ok((Expr::Print, options));
    }
    let expr = parse_or(&tokens, &mut 0)?;
    Ok((expr, options))
}

fn parse_or(tokens: &[Token], pos: &mut usize) -> Result<Expr, String> {
    let mut left = parse_and(tokens, pos)?;
    while *pos < tokens.len() {
        if matches!(tokens[*pos], Token::Or) {
            *pos += 1;
            let right = parse_and(tokens, pos)?;
            left = Expr::Or(Box::new(left), Box::new(right));
        } else {
            break;
        }
    }
    Ok(left)
}

fn parse_and(tokens: &[Token], pos: &mut usize) -> Result<Expr, String> {
    let mut left = parse_unary(tokens, pos)?;
    while *pos < tokens.len() {
        match &tokens[*pos] {
            Token::And => {
                *pos += 1;
                let right = parse_unary(tokens, pos)?;
                left = Expr::And(Box::new(left), Box::new(right));
            }
            Token::Expr(_) | Token::Not | Token::LParen => {
                let right = parse_unary(tokens, pos)?;
                left = Expr::And(Box::new(left), Box::new(right));
            }
            _ => break,
        }
    }
    Ok(left)
}

fn parse_unary(tokens: &[Token], pos: &mut usize) -> Result<Expr, String> {
    if *pos < tokens.len() && matches!(tokens[*pos], Token::Not) {
        *pos += 1;
        return Ok(Expr::Not(Box::new(parse_unary(tokens, pos)?)));
    }
    parse_primary(tokens, pos)
}

fn parse_primary(tokens: &[Token], pos: &mut usize) -> Result<Expr, String> {
    match tokens.get(*pos) {
        Some(Token::LParen) => {
            *pos += 1;
            let inner = parse_or(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Token::RParen) => {
                    *pos += 1;
                    Ok(inner)
                }
                _ => Err("find: missing closing `)'".to_string()),
            }
        }
        Some(Token::Expr(e)) => {
            *pos += 1;
            Ok(e.clone())
        }
        other => Err(format!("find: unexpected token {other:?}")),
    }
}

/// Run a `find` invocation given its full argument list (starting points, `-L`, predicates),
/// returning newline-joined matched paths the way `$(shell find ...)` would.
pub fn run(args: &[String], cwd: &Path) -> Result<String, String> {
    let mut follow_symlinks = false;
    let mut paths = Vec::new();
    let mut expr_start = 0;
    for (i, arg) in args.iter().enumerate() {
        if arg == "-L" {
            follow_symlinks = true;
            expr_start = i + 1;
            continue;
        }
        if arg.starts_with('-') || matches!(arg.as_str(), "(" | "\\(" | ")" | "\\)" | "!") {
            expr_start = i;
            break;
        }
        paths.push(arg.clone());
        expr_start = i + 1;
    }
    if paths.is_empty() {
        paths.push(".".to_string());
    }

    let (expr, opts) = parse_expressions(&args[expr_start..])?;

    let mut out = String::new();
    for path in &paths {
        let root = cwd.join(path);
        let snapshot =
            Snapshot::take(&root, follow_symlinks).map_err(|e| format!("find: `{path}': {e}"))?;
        for rel in snapshot.query(&expr, &opts) {
            let joined = if rel == "." {
                path.clone()
            } else {
                format!("{}/{}", path.trim_end_matches('/'), rel)
            };
            out.push_str(&joined);
            out.push('\n');
        }
    }
    Ok(out.trim_end_matches('\n').replace('\n', " "))
}

/// Recognize the common shell wrappers a Makefile writes around `find` so the emulator can
/// service them without forking `/bin/sh`: `cd DIR && find ...`, `test -d DIR && find ...`, and
/// `if [ -d DIR ]; then find ...; fi`.
pub fn try_emulate_shell(cmd: &str, cwd: &Path) -> Option<Result<String, String>> {
    let trimmed = cmd.trim();

    if let Some(rest) = trimmed.strip_prefix("cd ") {
        let (dir, find_part) = rest.split_once("&&")?;
        let find_args = find_part.trim().strip_prefix("find ")?;
        return Some(run(&split_args(find_args), &cwd.join(dir.trim())));
    }

    if let Some(rest) = trimmed.strip_prefix("test -d ") {
        let (dir, find_part) = rest.split_once("&&")?;
        let find_args = find_part.trim().strip_prefix("find ")?;
        return Some(run(&split_args(find_args), &cwd.join(dir.trim())));
    }

    if trimmed.starts_with("if [ -d ") {
        let after = trimmed.strip_prefix("if [ -d ")?;
        let (dir, after) = after.split_once(" ]")?;
        let after = after.trim_start().strip_prefix(';')?.trim_start();
        let after = after.strip_prefix("then ")?;
        let (find_part, _) = after.split_once(';')?;
        let find_args = find_part.trim().strip_prefix("find ")?;
        return Some(run(&split_args(find_args), &cwd.join(dir.trim())));
    }

    if let Some(rest) = trimmed.strip_prefix("find ") {
        return Some(run(&split_args(rest), cwd));
    }

    if let Some(rest) = trimmed.strip_prefix("findleaves.py ") {
        return Some(run_findleaves(&split_args(rest), cwd));
    }

    None
}

/// `findleaves.py --prune=NAME... --mindepth=N --dir=DIR... LEAF...` equivalent: every `--dir`
/// is a starting point (cwd if none given), every non-flag argument left over is a leaf name.
fn run_findleaves(args: &[String], cwd: &Path) -> Result<String, String> {
    let mut dirs = Vec::new();
    let mut prune_names = Vec::new();
    let mut mindepth = 0usize;
    let mut leaf_names = Vec::new();

    for arg in args {
        if let Some(v) = arg.strip_prefix("--prune=") {
            prune_names.push(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--mindepth=") {
            mindepth = v
                .parse()
                .map_err(|_| format!("findleaves.py: invalid --mindepth value `{v}'"))?;
        } else if let Some(v) = arg.strip_prefix("--dir=") {
            dirs.push(v.to_string());
        } else {
            leaf_names.push(arg.clone());
        }
    }

    if dirs.is_empty() {
        dirs.push(".".to_string());
    }

    let results = find_leaves(&dirs, &leaf_names, &prune_names, mindepth, cwd)
        .map_err(|e| format!("findleaves.py: {e}"))?;
    Ok(results.join("\n"))
}

fn split_args(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Depth-first `findleaves.py` equivalent: for each of `start_dirs` (each resolved against
/// `dir`, the `--dir` base), walk down pruning `prune_names` directories, returning the first
/// file among `leaf_names` found per subtree (shallowest match wins, honoring `mindepth`).
pub fn find_leaves(
    start_dirs: &[String],
    leaf_names: &[String],
    prune_names: &[String],
    mindepth: usize,
    dir: &Path,
) -> std::io::Result<Vec<String>> {
    let mut results = Vec::new();
    let mut seen: HashMap<PathBuf, ()> = HashMap::new();
    for start in start_dirs {
        find_leaves_rec(
            &dir.join(start),
            leaf_names,
            prune_names,
            0,
            mindepth,
            &mut results,
            &mut seen,
        )?;
    }
    Ok(results)
}

#[allow(clippy::too_many_arguments)]
fn find_leaves_rec(
    dir: &Path,
    leaf_names: &[String],
    prune_names: &[String],
    depth: usize,
    mindepth: usize,
    results: &mut Vec<String>,
    seen: &mut HashMap<PathBuf, ()>,
) -> std::io::Result<()> {
    if seen.contains_key(dir) {
        return Ok(());
    }
    seen.insert(dir.to_path_buf(), ());

    if depth >= mindepth {
        for leaf in leaf_names {
            let candidate = dir.join(leaf);
            if candidate.is_file() {
                results.push(candidate.to_string_lossy().into_owned());
                return Ok(());
            }
        }
    }

    let mut children: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());
    for child in children {
        let path = child.path();
        if !path.is_dir() {
            continue;
        }
        let name = child.file_name().to_string_lossy().into_owned();
        if prune_names.contains(&name) {
            continue;
        }
        find_leaves_rec(
            &path,
            leaf_names,
            prune_names,
            depth + 1,
            mindepth,
            results,
            seen,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("omake-find-test-{label}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_name_predicate_matches_glob() {
        let dir = scratch_dir("name");
        std::fs::write(dir.join("foo.c"), "").unwrap();
        std::fs::write(dir.join("foo.o"), "").unwrap();
        let snap = Snapshot::take(&dir, false).unwrap();
        let (expr, opts) = parse_expressions(&["-name".to_string(), "*.c".to_string()]).unwrap();
        let matches = snap.query(&expr, &opts);
        assert_eq!(matches, vec!["foo.c".to_string()]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_type_directory_predicate() {
        let dir = scratch_dir("type");
        std::fs::create_dir(dir.join("sub")).unwrap();
        std::fs::write(dir.join("file.txt"), "").unwrap();
        let snap = Snapshot::take(&dir, false).unwrap();
        let (expr, opts) = parse_expressions(&["-type".to_string(), "d".to_string()]).unwrap();
        let matches = snap.query(&expr, &opts);
        assert!(matches.contains(&"sub".to_string()));
        assert!(!matches.contains(&"file.txt".to_string()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_prune_excludes_subtree() {
        let dir = scratch_dir("prune");
        std::fs::create_dir(dir.join("skip")).unwrap();
        std::fs::write(dir.join("skip/inner.txt"), "").unwrap();
        std::fs::write(dir.join("keep.txt"), "").unwrap();
        let snap = Snapshot::take(&dir, false).unwrap();
        let args = vec![
            "-name".to_string(),
            "skip".to_string(),
            "-prune".to_string(),
            "-o".to_string(),
            "-print".to_string(),
        ];
        let (expr, opts) = parse_expressions(&args).unwrap();
        let matches = snap.query(&expr, &opts);
        assert!(!matches.iter().any(|m| m.starts_with("skip/")));
        assert!(matches.contains(&"keep.txt".to_string()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_maxdepth_limits_traversal() {
        let dir = scratch_dir("maxdepth");
        std::fs::create_dir_all(dir.join("a/b")).unwrap();
        std::fs::write(dir.join("a/b/deep.txt"), "").unwrap();
        let snap = Snapshot::take(&dir, false).unwrap();
        let opts = FindOptions {
            follow_symlinks: false,
            max_depth: Some(1),
        };
        let matches = snap.query(&Expr::Print, &opts);
        assert!(!matches.iter().any(|m| m.contains("deep.txt")));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_not_and_or_precedence() {
        let dir = scratch_dir("notandor");
        std::fs::write(dir.join("a.c"), "").unwrap();
        std::fs::write(dir.join("b.o"), "").unwrap();
        let snap = Snapshot::take(&dir, false).unwrap();
        let args = vec!["-not".to_string(), "-name".to_string(), "*.o".to_string()];
        let (expr, opts) = parse_expressions(&args).unwrap();
        let matches = snap.query(&expr, &opts);
        assert!(matches.contains(&"a.c".to_string()));
        assert!(!matches.contains(&"b.o".to_string()));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_find_leaves_returns_shallowest_match() {
        let dir = scratch_dir("leaves");
        std::fs::create_dir_all(dir.join("pkg/sub")).unwrap();
        std::fs::write(dir.join("pkg/BUILD"), "").unwrap();
        std::fs::write(dir.join("pkg/sub/BUILD"), "").unwrap();
        let leaves = find_leaves(
            &[dir.to_string_lossy().into_owned()],
            &["BUILD".to_string()],
            &[],
            0,
            Path::new(""),
        )
        .unwrap();
        assert!(leaves.iter().any(|p| p.ends_with("pkg/BUILD")));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_try_emulate_shell_recognizes_findleaves_wrapper() {
        let dir = scratch_dir("findleaves-wrapper");
        std::fs::create_dir_all(dir.join("pkg/sub")).unwrap();
        std::fs::write(dir.join("pkg/BUILD"), "").unwrap();
        std::fs::write(dir.join("pkg/sub/BUILD"), "").unwrap();
        let cmd = format!("findleaves.py --mindepth=1 --dir={} BUILD", dir.join("pkg").display());
        let result = try_emulate_shell(&cmd, Path::new("")).unwrap().unwrap();
        assert!(result.ends_with("sub/BUILD"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_try_emulate_shell_recognizes_cd_wrapper() {
        let dir = scratch_dir("wrapper");
        std::fs::write(dir.join("x.c"), "").unwrap();
        let cmd = format!("cd {} && find . -name '*.c'", dir.display());
        let result = try_emulate_shell(&cmd, Path::new("/")).unwrap().unwrap();
        assert!(result.contains("x.c"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
