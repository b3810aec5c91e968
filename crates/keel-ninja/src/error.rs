//! Writer error types.

/// Errors that can occur while composing or saving a Ninja file.
#[derive(Debug, thiserror::Error)]
pub enum NinjaError {
    /// A value handed to the writer contains a newline. Ninja has no escape
    /// for `\n`, so this is a programming error at the call site.
    #[error("ninja value contains a newline: {value:?}")]
    EmbeddedNewline { value: String },

    /// A build statement references a rule that was never declared.
    #[error("build statement references undeclared rule '{rule}'")]
    UndeclaredRule { rule: String },

    /// I/O error while saving the finished document.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for writer operations.
pub type Result<T> = std::result::Result<T, NinjaError>;
