//! Compile-time diagnostics.
//!
//! The code generator never aborts on a user error.  It reports a
//! [`Diagnostic`] into the [`Report`] it was handed, emits a placeholder with
//! the same stack effect and carries on, so one compile surfaces every error.

use std::fmt;

use tracing::warn;

/// Stable diagnostic codes.
pub mod codes {
    /// Array declared with an initializer.
    pub const CANNOT_CONVERT: u32 = 29;
    /// The name does not exist in the current context.
    pub const UNDECLARED_NAME: u32 = 103;
    /// A non-void function returns without a value.
    pub const MISSING_RETURN_VALUE: u32 = 126;
    /// A void function returns a value.
    pub const UNEXPECTED_RETURN_VALUE: u32 = 127;
    /// A local with this name already exists in the block.
    pub const DUPLICATE_LOCAL: u32 = 128;
    /// Assignment to something that is not a variable.
    pub const NOT_ASSIGNABLE: u32 = 131;
    /// `break` or `continue` outside of a loop.
    pub const NO_ENCLOSING_LOOP: u32 = 139;
    /// Call of something that is not a function.
    pub const NOT_CALLABLE: u32 = 149;
    /// `&` applied to something without storage.
    pub const NOT_ADDRESSABLE: u32 = 211;
    /// Call with the wrong number of arguments.
    pub const ARGUMENT_COUNT: u32 = 1501;
}

/// One reported compile error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: u32,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message)
    }
}

/// Collects diagnostics for one compile.
#[derive(Debug, Default)]
pub struct Report {
    diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, code: u32, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            code,
            message: message.into(),
        };
        warn!(code, message = %diagnostic.message, "compile error");
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// `true` if a diagnostic with `code` was reported.
    pub fn contains(&self, code: u32) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}
