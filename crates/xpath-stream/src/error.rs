//! Error types for pattern compilation and stream reading.

use thiserror::Error;

use crate::parser::MAX_DEPTH;

/// Result type alias for pattern compilation.
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Result type alias for read operations.
pub type ReadResult<T> = std::result::Result<T, ReadError>;

/// Fatal errors raised while compiling a pattern set.
///
/// Any of these aborts the whole compile call; no engine is produced and the
/// partially merged tree is discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The pattern set was empty or contained only whitespace and separators.
    #[error("the pattern set is empty or whitespace")]
    EmptyInput,

    /// A pattern did not start with `/`, or contained `//`.
    #[error("only absolute location paths are supported: `{pattern}`")]
    RelativePath { pattern: String },

    /// A pattern contained an axis specifier (`::`).
    #[error("axis specifiers are not supported: `{pattern}`")]
    AxisSpecifier { pattern: String },

    /// A step used `*`, `text()` or `node()`.
    #[error("the step `{step}` in `{pattern}` is not supported")]
    UnsupportedWildcardOrFunction { step: String, pattern: String },

    /// A step selected an attribute (`@...`).
    #[error("the attribute selection `{step}` in `{pattern}` is not supported")]
    AttributeSelection { step: String, pattern: String },

    /// A step was not a valid XML name.
    #[error("the step `{step}` in `{pattern}` is not a valid XML name")]
    InvalidName { step: String, pattern: String },

    /// A pattern had more steps than the supported maximum depth.
    #[error("`{pattern}` exceeds the maximum supported depth of {}", MAX_DEPTH)]
    ExceedsMaxDepth { pattern: String },

    /// A pattern's first step differed from the already established root.
    #[error("the pattern set already expects root `{root}`; `{pattern}` has a different root")]
    DifferentRoots { root: String, pattern: String },

    /// A pattern would force an existing leaf to gain children, or an
    /// existing branch to become terminal.
    #[error("`{pattern}` conflicts with the already expected `{existing}` at a different depth")]
    ConflictingDepths { existing: String, pattern: String },

    /// A pattern that survived the other checks still had no usable steps.
    #[error("`{pattern}` is not a valid location pattern")]
    MalformedPatternSyntax { pattern: String },
}

/// Errors raised while reading a document against a compiled engine.
#[derive(Error, Debug)]
pub enum ReadError {
    /// The underlying tokenizer reported malformed XML; the native error is
    /// preserved unchanged.
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A start tag carried a malformed attribute.
    #[error("invalid attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    /// The document contained more than one root element.
    #[error("more than one root element found in the document")]
    MultipleRoots,

    /// The document ended while elements were still open.
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: String },

    /// Cancellation was requested through the session's token.
    #[error("the read operation was cancelled")]
    Cancelled,
}

impl ReadError {
    /// True when the error is the cancellation outcome rather than a parse
    /// failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReadError::Cancelled)
    }
}
