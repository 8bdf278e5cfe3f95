//! Source file cache: loads makefiles from disk once, splits them into physical lines, and
//! resolves `include` search paths.
//!
//! Uses `std::fs::read_to_string` rather than memory-mapping: makefiles are small text files
//! where a mapped view buys nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::context::Context;
use crate::error::MakeError;

/// A loaded makefile, split into physical lines (newlines stripped). Shared via `Rc` since the
/// same file can be `include`d more than once and many `Context`s reference lines within it.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

impl SourceFile {
    pub fn line(&self, number: usize) -> Option<&str> {
        self.lines.get(number.checked_sub(1)?).map(String::as_str)
    }

    pub fn context_at(&self, line_number: usize) -> Context {
        Context {
            path: Some(Rc::new(self.path.clone())),
            line: self.line(line_number).map(|l| Rc::new(l.to_string())),
            line_number,
            column_number: 0,
        }
    }
}

/// Owns every loaded `SourceFile` for a run and the `include`/`-I` search path.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: HashMap<PathBuf, Rc<SourceFile>>,
    pub include_dirs: Vec<PathBuf>,
    /// Every file loaded, in load order, for `$(MAKEFILE_LIST)`.
    pub loaded_order: Vec<PathBuf>,
}

impl SourceCache {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self {
            files: HashMap::new(),
            include_dirs,
            loaded_order: Vec::new(),
        }
    }

    /// Load (or return the cached copy of) the file at `path`.
    pub fn load(&mut self, path: &Path) -> Result<Rc<SourceFile>, MakeError> {
        let canonical = path.to_path_buf();
        if let Some(existing) = self.files.get(&canonical) {
            return Ok(existing.clone());
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            MakeError::new(
                format!("{}: {e}", path.display()),
                Context::with_path(path.to_path_buf()),
            )
        })?;

        let lines = text.lines().map(str::to_string).collect();
        let file = Rc::new(SourceFile {
            path: canonical.clone(),
            lines,
        });
        self.files.insert(canonical.clone(), file.clone());
        self.loaded_order.push(canonical);
        Ok(file)
    }

    /// Resolve an `include`d filename: try it relative to `from_dir` first (the including file's
    /// directory), then each `-I`/`--include-dir` path in order, matching GNU Make's documented
    /// search behavior.
    pub fn resolve_include(&self, name: &str, from_dir: &Path) -> Option<PathBuf> {
        let direct = from_dir.join(name);
        if direct.is_file() {
            return Some(direct);
        }
        if Path::new(name).is_absolute() && Path::new(name).is_file() {
            return Some(PathBuf::from(name));
        }
        for dir in &self.include_dirs {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Space-joined list of every file loaded so far, for `$(MAKEFILE_LIST)`.
    pub fn makefile_list(&self) -> String {
        self.loaded_order
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_caches_and_splits_lines() {
        let dir = std::env::temp_dir().join(format!("omake-source-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("Makefile");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "A = 1\nB = 2").unwrap();
        }

        let mut cache = SourceCache::new(vec![]);
        let file = cache.load(&path).unwrap();
        assert_eq!(file.lines, vec!["A = 1".to_string(), "B = 2".to_string()]);
        assert_eq!(cache.loaded_order.len(), 1);

        // Second load must hit the cache rather than append again.
        cache.load(&path).unwrap();
        assert_eq!(cache.loaded_order.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_resolve_include_prefers_relative_then_include_dirs() {
        let dir = std::env::temp_dir().join(format!("omake-source-test2-{}", std::process::id()));
        let sub = dir.join("inc");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("common.mk"), "").unwrap();

        let cache = SourceCache::new(vec![sub.clone()]);
        let resolved = cache.resolve_include("common.mk", &dir).unwrap();
        assert_eq!(resolved, sub.join("common.mk"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
