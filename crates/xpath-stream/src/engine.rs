//! The compiled match engine and its read sessions.
//!
//! A [`MatchEngine`] owns a compiled pattern tree plus the symbol table its
//! sessions intern into. Each call to [`MatchEngine::read`] (or its async
//! and subtree variants) starts an independent single-pass session over one
//! source; the engine itself is immutable and freely shared.
//!
//! A session walks the token stream with a scope stack mirroring the pattern
//! tree: one scope per currently open, pattern-relevant element, each scope
//! carrying per-name occurrence counters for the child steps it expects.
//! Elements no pattern asks about are skipped whole, so the session never
//! descends further than the patterns reach. When a leaf step matches, the
//! session lends the caller a scoped view of the matched element's subtree
//! and does not move past it until that view is consumed or abandoned.

use std::io::BufRead;
use std::sync::Arc;

use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::cursor::{AsyncTokenCursor, CursorState, Token, TokenCursor, XmlCursor};
use crate::error::{CompileResult, ReadError, ReadResult};
use crate::parser;
use crate::path::PathBuilder;
use crate::pattern::{CompileDiagnostics, NodeId, PatternTree};
use crate::result::{TransientMatch, TransientMatchAsync};
use crate::symbol::{Symbol, SymbolTable};

/// A compiled pattern set, ready to run against any number of sources.
///
/// Compiling is where all pattern validation happens; a constructed engine
/// never rejects a pattern at read time. Cloning is cheap and clones share
/// the tree and symbol table.
#[derive(Debug, Clone)]
pub struct MatchEngine {
    tree: Arc<PatternTree>,
    table: Arc<SymbolTable>,
}

impl MatchEngine {
    /// Compile a pattern set with a fresh symbol table.
    pub fn compile(pattern_set: &str) -> CompileResult<(Self, CompileDiagnostics)> {
        Self::compile_with_table(pattern_set, Arc::new(SymbolTable::new()))
    }

    /// Compile a pattern set interning into an existing table, so engines
    /// can share one table across a process.
    pub fn compile_with_table(
        pattern_set: &str,
        table: Arc<SymbolTable>,
    ) -> CompileResult<(Self, CompileDiagnostics)> {
        let (tree, diagnostics) = parser::parse(pattern_set)?;
        Ok((
            Self {
                tree: Arc::new(tree),
                table,
            },
            diagnostics,
        ))
    }

    pub fn symbol_table(&self) -> &Arc<SymbolTable> {
        &self.table
    }

    /// Start a synchronous session over a whole document.
    pub fn read<R: BufRead>(&self, source: R) -> Matches<XmlCursor<R>> {
        self.read_from_cursor(XmlCursor::new(source, Arc::clone(&self.table)))
    }

    /// Start a synchronous session over any cursor, e.g. the subtree view of
    /// a match produced by another engine.
    pub fn read_from_cursor<C: TokenCursor>(&self, cursor: C) -> Matches<C> {
        Matches {
            core: SessionCore::new(Arc::clone(&self.tree), cursor),
        }
    }

    /// Start an asynchronous session over a whole document. The token is
    /// checked before every read; once it is cancelled the session fails
    /// with [`ReadError::Cancelled`] at the next suspension point.
    pub fn read_async<R: AsyncBufRead + Unpin>(
        &self,
        source: R,
        cancellation: CancellationToken,
    ) -> MatchesAsync<XmlCursor<R>> {
        self.read_from_cursor_async(XmlCursor::new(source, Arc::clone(&self.table)), cancellation)
    }

    /// Async counterpart of [`MatchEngine::read_from_cursor`].
    pub fn read_from_cursor_async<C: AsyncTokenCursor>(
        &self,
        cursor: C,
        cancellation: CancellationToken,
    ) -> MatchesAsync<C> {
        MatchesAsync {
            core: SessionCore::new(Arc::clone(&self.tree), cursor),
            cancellation,
        }
    }
}

/// What the traversal wants to do next. `plan` only inspects state; the
/// sync and async drivers perform the actual cursor IO.
enum Step {
    Advance,
    Skip,
    Produce(NodeId),
    Finished,
    Fail(ReadError),
}

/// IO required to advance within an open subtree.
enum SubtreeIo {
    None,
    /// The subtree's own end tag is current; consume it and close the view.
    Consume,
    AdvanceAndCount,
}

/// IO required to skip an element inside an open subtree.
enum SubtreeSkip {
    None,
    /// The subtree root itself is current; skip it whole and close the view.
    Whole,
    SkipInnerAndCount,
}

/// One expected child step within a scope, with its sibling counter.
struct ScopeChild {
    symbol: Symbol,
    node: NodeId,
    count: u32,
}

/// One open, pattern-relevant element (or the document itself, at the
/// bottom of the stack, with `symbol: None`).
struct Scope {
    symbol: Option<Symbol>,
    children: Vec<ScopeChild>,
    /// Path length to restore when this scope closes.
    mark: usize,
}

/// A produced match whose subtree the session has not yet moved past.
struct OpenSubtree {
    /// Start tags seen minus end tags seen, counting the current token.
    /// Zero means the subtree's own end tag is current.
    depth: u32,
    /// Set once the end tag has been consumed; the subtree view then
    /// reports [`Token::Eof`].
    done: bool,
    /// Path length to restore once the subtree closes.
    mark: usize,
}

/// Everything about a session except the IO: the scope stack, occurrence
/// counters, current path, and open-subtree bookkeeping.
pub(crate) struct SessionCore<C> {
    pub(crate) cursor: C,
    pub(crate) tree: Arc<PatternTree>,
    /// Interned symbol per tree name, indexed by `NameId`.
    symbols: Vec<Symbol>,
    pub(crate) path: PathBuilder,
    scopes: Vec<Scope>,
    open: Option<OpenSubtree>,
    pub(crate) finished: bool,
}

impl<C: CursorState> SessionCore<C> {
    fn new(tree: Arc<PatternTree>, cursor: C) -> Self {
        // Intern every name the tree can ask about up front; matching is
        // then pure symbol identity.
        let symbols: Vec<Symbol> = tree.local_names().map(|name| cursor.intern(name)).collect();

        let root = tree.root();
        let document = Scope {
            symbol: None,
            children: vec![ScopeChild {
                symbol: symbols[tree.node(root).name],
                node: root,
                count: 0,
            }],
            mark: 0,
        };

        Self {
            cursor,
            tree,
            symbols,
            path: PathBuilder::new(),
            scopes: vec![document],
            open: None,
            finished: false,
        }
    }

    /// Decide the next step from the current token. Must not be called with
    /// an open subtree; drivers close it first.
    fn plan(&mut self) -> Step {
        debug_assert!(self.open.is_none());

        match self.cursor.token() {
            Token::StartElement(symbol) => {
                let at_root = self.scopes.len() == 1;
                let top = self.scopes.len() - 1;
                let Some(child) = self.scopes[top]
                    .children
                    .iter_mut()
                    .find(|c| c.symbol == symbol)
                else {
                    return Step::Skip;
                };

                child.count += 1;
                if at_root && child.count > 1 {
                    self.finished = true;
                    return Step::Fail(ReadError::MultipleRoots);
                }
                let node = child.node;
                let count = child.count;

                let mark = self.path.len();
                let name = self.tree.name_text(self.tree.node(node).name);
                // The root step carries no index.
                let index = if at_root { None } else { Some(count) };
                self.path.push_step(name, index);

                let children = self.tree.children(node);
                if children.is_empty() {
                    self.open = Some(OpenSubtree {
                        depth: 1,
                        done: false,
                        mark,
                    });
                    Step::Produce(node)
                } else {
                    let expected = children
                        .iter()
                        .map(|&c| ScopeChild {
                            symbol: self.symbols[self.tree.node(c).name],
                            node: c,
                            count: 0,
                        })
                        .collect();
                    self.scopes.push(Scope {
                        symbol: Some(symbol),
                        children: expected,
                        mark,
                    });
                    Step::Advance
                }
            }
            Token::EndElement(symbol) => {
                let top = self.scopes.len() - 1;
                if self.scopes[top].symbol == Some(symbol) {
                    if let Some(scope) = self.scopes.pop() {
                        self.path.truncate(scope.mark);
                    }
                }
                Step::Advance
            }
            Token::Eof => {
                self.finished = true;
                let top = self.scopes.len() - 1;
                match self.scopes[top].symbol {
                    Some(symbol) => Step::Fail(ReadError::UnexpectedEof {
                        expected: format!("</{}>", self.cursor.resolve(symbol)),
                    }),
                    None => Step::Finished,
                }
            }
            Token::Text | Token::Other => Step::Advance,
        }
    }

    /// Token as seen from inside the open subtree; [`Token::Eof`] once the
    /// subtree has been fully consumed.
    pub(crate) fn subtree_token(&self) -> Token {
        match &self.open {
            Some(open) if open.done => Token::Eof,
            _ => self.cursor.token(),
        }
    }

    fn subtree_advance_plan(&mut self) -> SubtreeIo {
        let Some(open) = self.open.as_mut() else {
            return SubtreeIo::None;
        };
        if open.done {
            SubtreeIo::None
        } else if open.depth == 0 {
            open.done = true;
            SubtreeIo::Consume
        } else {
            SubtreeIo::AdvanceAndCount
        }
    }

    fn subtree_skip_plan(&mut self) -> SubtreeSkip {
        let Some(open) = self.open.as_mut() else {
            return SubtreeSkip::None;
        };
        if open.done {
            SubtreeSkip::None
        } else if open.depth <= 1 {
            // Only the subtree root itself can be a start tag at depth 1.
            open.done = true;
            SubtreeSkip::Whole
        } else {
            // The skipped element's own end tag will not be observed.
            open.depth -= 1;
            SubtreeSkip::SkipInnerAndCount
        }
    }

    /// Fold the token the cursor just landed on into the open subtree's
    /// depth.
    fn subtree_count(&mut self) -> ReadResult<()> {
        let token = self.cursor.token();
        let Some(open) = self.open.as_mut() else {
            return Ok(());
        };
        match token {
            Token::StartElement(_) => open.depth += 1,
            Token::EndElement(_) => open.depth -= 1,
            Token::Eof => {
                return Err(ReadError::UnexpectedEof {
                    expected: "the end of the matched element".to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Drop the fully consumed subtree and restore the session path.
    fn release_open(&mut self) {
        if let Some(open) = self.open.take() {
            debug_assert!(open.done);
            self.path.truncate(open.mark);
        }
    }
}

/// A synchronous read session. Matches are produced one at a time in
/// document order; each borrows the session until it is persisted or
/// dropped, and a dropped match's subtree is skipped on the next call.
pub struct Matches<C: TokenCursor> {
    pub(crate) core: SessionCore<C>,
}

impl<C: TokenCursor> Matches<C> {
    /// Produce the next match, or `None` once the source is exhausted.
    /// After an error the session stays finished.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> ReadResult<Option<TransientMatch<'_, C>>> {
        if let Err(err) = self.close_open() {
            self.core.finished = true;
            return Err(err);
        }
        if self.core.finished {
            return Ok(None);
        }

        loop {
            match self.core.plan() {
                Step::Advance => {
                    if let Err(err) = self.core.cursor.advance() {
                        self.core.finished = true;
                        return Err(err);
                    }
                }
                Step::Skip => {
                    if let Err(err) = self.core.cursor.skip_subtree() {
                        self.core.finished = true;
                        return Err(err);
                    }
                }
                Step::Produce(node) => {
                    trace!(path = %self.core.path, "pattern matched");
                    return Ok(Some(TransientMatch::new(self, node)));
                }
                Step::Finished => return Ok(None),
                Step::Fail(err) => return Err(err),
            }
        }
    }

    pub(crate) fn subtree_advance(&mut self) -> ReadResult<()> {
        match self.core.subtree_advance_plan() {
            SubtreeIo::None => Ok(()),
            SubtreeIo::Consume => self.core.cursor.advance(),
            SubtreeIo::AdvanceAndCount => {
                self.core.cursor.advance()?;
                self.core.subtree_count()
            }
        }
    }

    pub(crate) fn subtree_skip(&mut self) -> ReadResult<()> {
        match self.core.subtree_skip_plan() {
            SubtreeSkip::None => Ok(()),
            SubtreeSkip::Whole => self.core.cursor.skip_subtree(),
            SubtreeSkip::SkipInnerAndCount => {
                self.core.cursor.skip_subtree()?;
                self.core.subtree_count()
            }
        }
    }

    /// Move past whatever is left of the previously produced match.
    fn close_open(&mut self) -> ReadResult<()> {
        if self.core.open.is_none() {
            return Ok(());
        }
        loop {
            match self.core.subtree_token() {
                Token::Eof if self.core.open.as_ref().is_some_and(|o| o.done) => break,
                Token::StartElement(_) => self.subtree_skip()?,
                _ => self.subtree_advance()?,
            }
        }
        self.core.release_open();
        Ok(())
    }
}

/// An asynchronous read session; see [`Matches`] for the lending contract.
pub struct MatchesAsync<C: AsyncTokenCursor> {
    pub(crate) core: SessionCore<C>,
    cancellation: CancellationToken,
}

impl<C: AsyncTokenCursor> MatchesAsync<C> {
    fn checkpoint(&self) -> ReadResult<()> {
        if self.cancellation.is_cancelled() {
            Err(ReadError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn io_advance(&mut self) -> ReadResult<()> {
        self.checkpoint()?;
        self.core.cursor.advance().await
    }

    async fn io_skip(&mut self) -> ReadResult<()> {
        self.checkpoint()?;
        self.core.cursor.skip_subtree().await
    }

    /// Produce the next match, or `None` once the source is exhausted.
    /// Cancellation surfaces as [`ReadError::Cancelled`] and finishes the
    /// session.
    pub async fn next(&mut self) -> ReadResult<Option<TransientMatchAsync<'_, C>>> {
        if let Err(err) = self.close_open().await {
            self.core.finished = true;
            return Err(err);
        }
        if self.core.finished {
            return Ok(None);
        }

        loop {
            match self.core.plan() {
                Step::Advance => {
                    if let Err(err) = self.io_advance().await {
                        self.core.finished = true;
                        return Err(err);
                    }
                }
                Step::Skip => {
                    if let Err(err) = self.io_skip().await {
                        self.core.finished = true;
                        return Err(err);
                    }
                }
                Step::Produce(node) => {
                    trace!(path = %self.core.path, "pattern matched");
                    return Ok(Some(TransientMatchAsync::new(self, node)));
                }
                Step::Finished => return Ok(None),
                Step::Fail(err) => return Err(err),
            }
        }
    }

    pub(crate) async fn subtree_advance(&mut self) -> ReadResult<()> {
        match self.core.subtree_advance_plan() {
            SubtreeIo::None => Ok(()),
            SubtreeIo::Consume => self.io_advance().await,
            SubtreeIo::AdvanceAndCount => {
                self.io_advance().await?;
                self.core.subtree_count()
            }
        }
    }

    pub(crate) async fn subtree_skip(&mut self) -> ReadResult<()> {
        match self.core.subtree_skip_plan() {
            SubtreeSkip::None => Ok(()),
            SubtreeSkip::Whole => self.io_skip().await,
            SubtreeSkip::SkipInnerAndCount => {
                self.io_skip().await?;
                self.core.subtree_count()
            }
        }
    }

    async fn close_open(&mut self) -> ReadResult<()> {
        if self.core.open.is_none() {
            return Ok(());
        }
        loop {
            match self.core.subtree_token() {
                Token::Eof if self.core.open.as_ref().is_some_and(|o| o.done) => break,
                Token::StartElement(_) => self.subtree_skip().await?,
                _ => self.subtree_advance().await?,
            }
        }
        self.core.release_open();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_for(patterns: &str, xml: &str) -> Vec<(String, String)> {
        let (engine, _) = MatchEngine::compile(patterns).unwrap();
        let mut session = engine.read(xml.as_bytes());
        let mut out = Vec::new();
        while let Some(found) = session.next().unwrap() {
            out.push((found.path().to_string(), found.requested_first().to_string()));
        }
        out
    }

    #[test]
    fn test_matches_in_document_order_with_positional_paths() {
        let xml = "\
<ukraine>\
  <capital>Kyiv</capital>\
  <geography>\
    <regions>\
      <region><name>Lviv</name></region>\
      <region><name>Kharkiv</name></region>\
    </regions>\
  </geography>\
</ukraine>";
        let found = paths_for(
            "/ukraine/capital|/ukraine/geography/regions/region/name",
            xml,
        );

        assert_eq!(
            found,
            vec![
                (
                    "/ukraine/capital[1]".to_string(),
                    "/ukraine/capital".to_string()
                ),
                (
                    "/ukraine/geography[1]/regions[1]/region[1]/name[1]".to_string(),
                    "/ukraine/geography/regions/region/name".to_string()
                ),
                (
                    "/ukraine/geography[1]/regions[1]/region[2]/name[1]".to_string(),
                    "/ukraine/geography/regions/region/name".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_unmatched_subtrees_are_skipped_without_counting() {
        // The <a> inside <skip> must neither match nor bump the counter.
        let found = paths_for("/root/a", "<root><skip><a/></skip><a/></root>");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "/root/a[1]");
    }

    #[test]
    fn test_root_step_carries_no_index() {
        let found = paths_for("/root", "<root><x/></root>");
        assert_eq!(found[0].0, "/root");
    }

    #[test]
    fn test_second_root_element_is_an_error() {
        let (engine, _) = MatchEngine::compile("/root").unwrap();
        let mut session = engine.read("<root/><root/>".as_bytes());

        assert!(session.next().unwrap().is_some());
        assert!(matches!(session.next(), Err(ReadError::MultipleRoots)));
        // The session stays finished afterwards.
        assert!(session.next().unwrap().is_none());
    }

    #[test]
    fn test_root_name_mismatch_yields_no_matches() {
        let found = paths_for("/root/a", "<other><a/></other>");
        assert!(found.is_empty());
    }

    #[test]
    fn test_abandoned_match_is_skipped_before_the_next_one() {
        let (engine, _) = MatchEngine::compile("/r/a|/r/b").unwrap();
        let mut session = engine
            .read("<r><a><deep><x/></deep>text</a><b/></r>".as_bytes());

        {
            let first = session.next().unwrap().unwrap();
            assert_eq!(first.path(), "/r/a[1]");
            // Dropped without reading its subtree.
        }
        let second = session.next().unwrap().unwrap();
        assert_eq!(second.path(), "/r/b[1]");
    }

    #[test]
    fn test_sibling_counters_reset_per_parent_scope() {
        let xml = "<r><g><i/><i/></g><g><i/></g></r>";
        let found = paths_for("/r/g/i", xml);
        let paths: Vec<&str> = found.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/r/g[1]/i[1]", "/r/g[1]/i[2]", "/r/g[2]/i[1]"]
        );
    }

    #[test]
    fn test_prolog_comments_and_text_are_ignored() {
        let xml = "<?xml version=\"1.0\"?><!-- doc --><root>\n  <a/>\n</root>";
        let found = paths_for("/root/a", xml);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_chain_at_maximum_depth_matches() {
        let mut pattern = String::new();
        let mut open = String::new();
        let mut close = String::new();
        for i in 1..=64 {
            pattern.push_str(&format!("/d{i}"));
            open.push_str(&format!("<d{i}>"));
            close.insert_str(0, &format!("</d{i}>"));
        }
        let xml = format!("{open}x{close}");

        let found = paths_for(&pattern, &xml);
        assert_eq!(found.len(), 1);
        assert!(found[0].0.ends_with("/d64[1]"));
        assert!(found[0].0.starts_with("/d1/d2[1]/"));
    }

    #[test]
    fn test_engine_is_shareable_across_threads() {
        let (engine, _) = MatchEngine::compile("/r/a").unwrap();
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let mut session = engine.read("<r><a/><a/></r>".as_bytes());
                    let mut n = 0;
                    while let Some(found) = session.next().unwrap() {
                        assert!(found.path().starts_with("/r/a["));
                        n += 1;
                    }
                    n
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
    }

    #[test]
    fn test_truncated_document_is_an_error() {
        let (engine, _) = MatchEngine::compile("/root/missing").unwrap();
        let mut session = engine.read("<root><other>".as_bytes());

        let err = loop {
            match session.next() {
                Ok(Some(_)) => {}
                Ok(None) => panic!("truncated document must not finish cleanly"),
                Err(err) => break err,
            }
        };
        assert!(matches!(
            err,
            ReadError::Xml(_) | ReadError::UnexpectedEof { .. }
        ));
    }
}
