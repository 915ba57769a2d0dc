//! Diagnostics and control-flow signaling.
//!
//! The evaluator never unwinds through Rust's own error machinery for
//! `break`/`continue`/`return`/runtime failures — it reports them through
//! a `ControlFlow` value returned alongside the evaluated handle, exactly
//! the way the interpreter's own `returnType` out-parameter works. A
//! [`thiserror`]-derived [`DerpError`] sits on top for hosts that want a
//! plain `std::error::Error` once evaluation has unwound back to them.

use std::fmt;

use crate::pool::PoolRef;

/// What an `eval` call is signaling about the enclosing control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Keep evaluating the next sibling/statement.
    Normal,
    /// A `return` unwound to the nearest function call.
    FunctionReturn,
    /// A `break` unwound to the nearest loop.
    Break,
    /// A `continue` unwound to the nearest loop.
    Continue,
    /// A fatal error; the error state holds the diagnostic. Unwinds all
    /// the way to the host.
    Error,
}

impl ControlFlow {
    pub fn is_normal(self) -> bool {
        matches!(self, ControlFlow::Normal)
    }

    /// True for anything a block/loop must propagate without running
    /// its remaining children.
    pub fn interrupts(self) -> bool {
        !matches!(self, ControlFlow::Normal)
    }
}

/// One accumulated diagnostic.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub file: Option<PoolRef>,
    pub line: u32,
    pub message: String,
}

/// Accumulates `(file, line, message)` diagnostics with a "current
/// location" cursor that the evaluator updates before any step that may
/// fail, so `add_error` always attaches correct provenance.
#[derive(Debug, Clone, Default)]
pub struct ErrorState {
    current_file: Option<PoolRef>,
    current_line: u32,
    entries: Vec<ErrorEntry>,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the cursor. Called by the evaluator before every node it visits.
    pub fn set_location(&mut self, file: PoolRef, line: u32) {
        self.current_file = Some(file);
        self.current_line = line;
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.entries.push(ErrorEntry {
            file: self.current_file.clone(),
            line: self.current_line,
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ErrorEntry] {
        &self.entries
    }

    pub fn reset(&mut self) {
        self.current_file = None;
        self.current_line = 0;
        self.entries.clear();
    }

    /// Concatenates every entry as `file:line: error: msg`.
    pub fn all_error_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{}:{}: error: {}",
                    e.file.as_ref().map(|f| f.as_str()).unwrap_or("<unknown>"),
                    e.line,
                    e.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A `std::error::Error`-compatible wrapper around the first diagnostic in
/// an [`ErrorState`], for hosts that want a `?`-friendly type once an
/// `Error` control-flow signal has unwound to them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DerpError {
    #[error("{file}:{line}: error: {message}")]
    Diagnostic {
        file: String,
        line: u32,
        message: String,
    },
    #[error("{0}")]
    Other(String),
}

impl DerpError {
    pub fn from_error_state(errors: &ErrorState) -> Self {
        match errors.entries().first() {
            Some(e) => DerpError::Diagnostic {
                file: e.file.as_ref().map(|f| f.as_str().to_string()).unwrap_or_default(),
                line: e.line,
                message: e.message.clone(),
            },
            None => DerpError::Other("evaluation failed with no recorded diagnostic".into()),
        }
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: error: {}",
            self.file.as_ref().map(|x| x.as_str()).unwrap_or("<unknown>"),
            self.line,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::StringPool;

    #[test]
    fn accumulates_with_cursor() {
        let pool = StringPool::new();
        let mut errors = ErrorState::new();
        errors.set_location(pool.get_or_add("a.derp"), 3);
        errors.add_error("unexpected token");
        assert!(errors.has_errors());
        assert_eq!(errors.all_error_text(), "a.derp:3: error: unexpected token");
    }
}
