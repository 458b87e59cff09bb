//! Streaming extraction of XML subtrees selected by compiled path patterns.
//!
//! A pattern set is one or more absolute, child-axis-only paths such as
//! `/feed/entry/title`, separated by `|` or newlines. Compiling merges them
//! into a single prefix tree; reading then makes exactly one forward pass
//! over the document, skipping every subtree no pattern can reach, and
//! yields the matched elements in document order together with a positional
//! path like `/feed/entry[2]/title[1]`.
//!
//! Matches are lent out one at a time: a [`TransientMatch`] borrows its
//! session and is itself a forward-only cursor over the matched subtree, so
//! it can be persisted into an owned [`XmlElement`], read token by token,
//! or handed to another engine via
//! [`read_from_cursor`](MatchEngine::read_from_cursor). Whatever is left
//! unread is skipped when the session moves on.
//!
//! ```
//! use xpath_stream::MatchEngine;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (engine, diagnostics) = MatchEngine::compile("/feed/entry/title")?;
//! assert!(diagnostics.is_empty());
//!
//! let xml = "<feed><entry><title>One</title></entry><entry><title>Two</title></entry></feed>";
//! let mut titles = Vec::new();
//! let mut matches = engine.read(xml.as_bytes());
//! while let Some(found) = matches.next()? {
//!     let result = found.persist()?;
//!     titles.push(format!("{}: {}", result.path, result.node.text().unwrap_or("")));
//! }
//! assert_eq!(titles, vec!["/feed/entry[1]/title[1]: One", "/feed/entry[2]/title[1]: Two"]);
//! # Ok(())
//! # }
//! ```
//!
//! The same engine runs against async sources through
//! [`MatchEngine::read_async`], with cooperative cancellation via a
//! [`tokio_util::sync::CancellationToken`].

pub mod cursor;
pub mod engine;
pub mod error;
mod parser;
mod path;
pub mod pattern;
pub mod result;
pub mod symbol;

pub use cursor::{AsyncTokenCursor, CursorState, StartTag, Token, TokenCursor, XmlCursor};
pub use engine::{MatchEngine, Matches, MatchesAsync};
pub use error::{CompileError, CompileResult, ReadError, ReadResult};
pub use parser::MAX_DEPTH;
pub use pattern::{CompileDiagnostic, CompileDiagnostics, PatternTree};
pub use result::{
    Persisted, PersistedMatch, TransientMatch, TransientMatchAsync, XmlAttribute, XmlChild,
    XmlChildren, XmlElement,
};
pub use symbol::{Symbol, SymbolTable};

/// Compile a pattern set into an engine; shorthand for
/// [`MatchEngine::compile`].
pub fn compile(pattern_set: &str) -> CompileResult<(MatchEngine, CompileDiagnostics)> {
    MatchEngine::compile(pattern_set)
}
