//! Error and diagnostic model for the parser/evaluator, plus a small `Logger` abstraction for
//! non-fatal diagnostics (warnings, info).
//!
//! Fatal conditions are reported as `MakeError` and unwind the evaluator via `Result`. Non-fatal
//! diagnostics (warnings, info) go through a `Logger` so callers can capture them (tests) or print
//! them (the CLI), and so `--werror_*` can promote specific `MakeErrorKind`s to fatal errors.

use std::error::Error;
use std::fmt;

use crate::context::Context;

const MAX_SEVERITY_LENGTH: usize = 5;

/// Discriminates the diagnostic taxonomy, so the CLI's `--werror_*` family can selectively
/// upgrade specific warning kinds to errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MakeErrorKind {
    /// Parser-level syntax error. Always fatal.
    Syntax,
    /// A deprecated variable or export was referenced/assigned.
    Deprecated,
    /// An obsolete variable or export was referenced/assigned. Always fatal.
    Obsolete,
    /// A `KATI_visibility_prefix` restriction was violated.
    Visibility,
    /// Assignment to a readonly/final variable.
    Readonly,
    /// A rule was defined somewhere `.KATI_ALLOW_RULES` forbids.
    RuleNotAllowed,
    /// A cycle was found in the dependency graph. Always fatal.
    Cycle,
    /// No rule exists to build a requested target. Always fatal.
    MissingRule,
    /// Two rules both supply a recipe for the same single-colon target.
    OverridingCommands,
    /// `$(shell ...)` or a recipe line failed.
    Shell,
}

impl MakeErrorKind {
    /// Whether this kind is fatal regardless of `--werror_*` configuration.
    pub fn always_fatal(self) -> bool {
        matches!(
            self,
            Self::Syntax | Self::Obsolete | Self::Cycle | Self::MissingRule
        )
    }
}

/// Represents a generic error in a makefile, including context and its taxonomy kind.
#[derive(Debug)]
pub struct MakeError {
    pub msg: String,
    pub context: Context,
    pub kind: MakeErrorKind,
}

impl MakeError {
    pub fn new(msg: impl AsRef<str>, context: Context) -> Self {
        Self::with_kind(msg, context, MakeErrorKind::Syntax)
    }

    pub fn with_kind(msg: impl AsRef<str>, context: Context, kind: MakeErrorKind) -> Self {
        Self {
            msg: msg.as_ref().to_string(),
            context,
            kind,
        }
    }
}

impl Error for MakeError {}

impl fmt::Display for MakeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            DefaultLogger::format("ERROR", &self.msg, Some(&self.context))
        )
    }
}

/// Generic logging facility with a default implementation: a single required `write`, with
/// `info`/`warn`/`error` as default methods built atop it so alternate sinks (tests, `--werror_*`
/// promotion) only need to override `write` or intercept at a higher level.
pub trait Logger {
    /// Write a fully-formatted message somewhere.
    fn write(&self, msg: String);

    fn info(&self, msg: impl AsRef<str>, context: Option<&Context>) {
        self.write(Self::format("INFO", msg.as_ref(), context));
    }

    fn warn(&self, msg: impl AsRef<str>, context: Option<&Context>) {
        self.write(Self::format("WARN", msg.as_ref(), context));
    }

    fn error(&self, msg: impl AsRef<str>, context: Option<&Context>) {
        self.write(Self::format("ERROR", msg.as_ref(), context));
    }

    /// Formatter shared by all log levels.
    fn format(level: &str, msg: &str, context: Option<&Context>) -> String
    where
        Self: Sized,
    {
        let level_display = format!("{level:0width$}", width = MAX_SEVERITY_LENGTH);
        let context_label = context
            .and_then(|c| c.label())
            .map(|l| format!("[{l}] "))
            .unwrap_or_default();

        // Only show the offending source line for warnings/errors.
        let context_line = if level == "WARN" || level == "ERROR" {
            context
                .and_then(|c| c.display_line())
                .map(|l| format!("\n{l}"))
                .unwrap_or_default()
        } else {
            String::new()
        };

        format!("make: {level_display} {context_label}| {msg}{context_line}")
    }
}

/// Uses the default implementation and outputs to `stderr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn write(&self, msg: String) {
        eprintln!("{msg}");
    }
}

impl DefaultLogger {
    /// Exposed so `MakeError`'s `Display` impl can reuse the same formatting without
    /// instantiating a logger.
    fn format(level: &str, msg: &str, context: Option<&Context>) -> String {
        <Self as Logger>::format(level, msg, context)
    }
}

/// A `Logger` that buffers messages in-memory instead of printing them, for tests that want to
/// assert on diagnostic output.
#[derive(Debug, Default)]
pub struct BufferLogger {
    pub lines: std::cell::RefCell<Vec<String>>,
}

impl Logger for BufferLogger {
    fn write(&self, msg: String) {
        self.lines.borrow_mut().push(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_location() {
        let err = MakeError::new("bad syntax", Context::with_path("Makefile"));
        let rendered = err.to_string();
        assert!(rendered.contains("ERROR"));
        assert!(rendered.contains("Makefile"));
        assert!(rendered.contains("bad syntax"));
    }

    #[test]
    fn test_always_fatal_kinds() {
        assert!(MakeErrorKind::Cycle.always_fatal());
        assert!(!MakeErrorKind::Deprecated.always_fatal());
    }

    #[test]
    fn test_buffer_logger_captures_messages() {
        let logger = BufferLogger::default();
        logger.warn("careful", None);
        assert_eq!(logger.lines.borrow().len(), 1);
        assert!(logger.lines.borrow()[0].contains("careful"));
    }
}
