//! Simple implementation of a `Context` struct designed to track parsing/execution location.

use std::path::PathBuf;
use std::rc::Rc;

/// Represents parsing/execution context: which file, and where in the file, something is
/// happening. Cloned onto nearly every diagnostic and every `Variable`/`Rule`, so `path` and
/// `line` are reference-counted rather than copied.
#[derive(Clone, Debug, Default)]
pub struct Context {
    pub path: Option<Rc<PathBuf>>,
    pub line: Option<Rc<String>>,

    // Line/row number is determined when iterating the input, so we use `usize` here to match
    // the return type of `enumerate()`. Both line and column are `1`-indexed to match the
    // convention other programs (including other make implementations) use when referencing
    // line/column numbers, so `0` is a sentinel value indicating that the value is not set.
    pub line_number: usize,
    pub column_number: usize,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(Rc::new(path.into())),
            ..Self::default()
        }
    }

    /// Produce a `file:line[:column]` label suitable for diagnostics.
    pub fn label(&self) -> Option<String> {
        let path_display = self.path.as_ref()?.display().to_string();

        Some(match (self.line_number, self.column_number) {
            (0, _) => path_display,
            (line, 0) => format!("{path_display}:{line}"),
            (line, column) => format!("{path_display}:{line}:{column}"),
        })
    }

    /// Render the offending source line with a caret under the offending column, in the style of
    /// `rustc`/`cargo` diagnostics.
    pub fn display_line(&self) -> Option<String> {
        let line = self.line.as_ref()?;
        let line_number_s = if self.line_number == 0 {
            String::new()
        } else {
            self.line_number.to_string()
        };
        let pad = " ".repeat(line_number_s.len());

        Some(if self.column_number > 0 {
            format!(
                "{pad} |\n{line_number_s} | {line}\n{pad} | {}^\n",
                " ".repeat(self.column_number.saturating_sub(1)),
            )
        } else {
            format!("{pad} |\n{line_number_s} | {line}\n{pad} |\n")
        })
    }
}

impl From<PathBuf> for Context {
    fn from(path: PathBuf) -> Self {
        Self::with_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_variants() {
        let mut ctx = Context::new();
        assert_eq!(ctx.label(), None);

        ctx = Context::with_path("Makefile");
        assert_eq!(ctx.label(), Some("Makefile".to_string()));

        ctx.line_number = 3;
        assert_eq!(ctx.label(), Some("Makefile:3".to_string()));

        ctx.column_number = 5;
        assert_eq!(ctx.label(), Some("Makefile:3:5".to_string()));
    }

    #[test]
    fn test_display_line() {
        let mut ctx = Context::with_path("Makefile");
        ctx.line_number = 2;
        ctx.column_number = 3;
        ctx.line = Some(Rc::new("foo: bar".to_string()));
        let rendered = ctx.display_line().unwrap();
        assert!(rendered.contains("foo: bar"));
        assert!(rendered.contains('^'));
    }
}
