//! Match results: the borrowed, forward-only view of a matched subtree and
//! the owned tree it can be persisted into.
//!
//! A [`TransientMatch`] borrows its session, so at most one exists per
//! session at a time and it cannot outlive the tokens it points at. It is
//! itself a [`TokenCursor`] scoped to the matched element, which is what
//! makes nested engines possible: another engine can run
//! [`read_from_cursor`](crate::MatchEngine::read_from_cursor) over it.
//! [`persist`](TransientMatch::persist) consumes the view and materializes
//! the subtree into an owned [`XmlElement`].

use std::sync::Arc;

use crate::cursor::{AsyncTokenCursor, CursorState, StartTag, Token, TokenCursor};
use crate::engine::{Matches, MatchesAsync};
use crate::error::{ReadError, ReadResult};
use crate::pattern::NodeId;
use crate::symbol::Symbol;

/// An attribute of a persisted element, local name and prefix split apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: String,
    pub prefix: Option<String>,
    pub value: String,
}

/// The children of a persisted element.
///
/// Whitespace-only text between elements is dropped during persisting, so
/// pretty-printed documents still materialize as `Elements`.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlChildren {
    Elements(Vec<XmlElement>),
    Text(String),
    Mixed(Vec<XmlChild>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlChild {
    Element(XmlElement),
    Text(String),
}

/// An owned element persisted out of a matched subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub prefix: Option<String>,
    pub attributes: Vec<XmlAttribute>,
    pub children: XmlChildren,
}

impl XmlElement {
    /// Value of the attribute with this local name.
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Child elements with this local name, in document order.
    pub fn get_children(&self, name: &str) -> Vec<&XmlElement> {
        self.all_children()
            .into_iter()
            .filter(|c| c.name == name)
            .collect()
    }

    /// All child elements in document order, whatever the children kind.
    pub fn all_children(&self) -> Vec<&XmlElement> {
        match &self.children {
            XmlChildren::Elements(elements) => elements.iter().collect(),
            XmlChildren::Mixed(children) => children
                .iter()
                .filter_map(|c| match c {
                    XmlChild::Element(e) => Some(e),
                    XmlChild::Text(_) => None,
                })
                .collect(),
            XmlChildren::Text(_) | XmlChildren::Empty => Vec::new(),
        }
    }

    /// The element's text when it holds text only.
    pub fn text(&self) -> Option<&str> {
        match &self.children {
            XmlChildren::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn has_elements(&self) -> bool {
        !self.all_children().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.children, XmlChildren::Empty)
    }
}

/// An owned match, detached from its session.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedMatch {
    /// Positional path of the matched element, e.g. `/doc/item[3]/name[1]`.
    pub path: String,
    /// The pattern strings whose final step this element satisfied.
    pub requested: Vec<String>,
    pub local_name: String,
    /// The matched element with its whole subtree.
    pub node: XmlElement,
}

impl PersistedMatch {
    pub fn requested_first(&self) -> &str {
        &self.requested[0]
    }
}

/// A matched element, borrowed from a synchronous session.
pub struct TransientMatch<'s, C: TokenCursor> {
    session: &'s mut Matches<C>,
    node: NodeId,
}

impl<'s, C: TokenCursor> TransientMatch<'s, C> {
    pub(crate) fn new(session: &'s mut Matches<C>, node: NodeId) -> Self {
        Self { session, node }
    }

    /// Positional path of the matched element.
    pub fn path(&self) -> &str {
        self.session.core.path.as_str()
    }

    /// The pattern strings whose final step this element satisfied.
    pub fn requested(&self) -> &[String] {
        self.session.core.tree.requested(self.node)
    }

    pub fn requested_first(&self) -> &str {
        &self.requested()[0]
    }

    pub fn local_name(&self) -> &str {
        let tree = &self.session.core.tree;
        tree.name_text(tree.node(self.node).name)
    }

    /// Materialize the subtree into an owned result, consuming the view.
    pub fn persist(mut self) -> ReadResult<PersistedMatch> {
        let path = self.path().to_string();
        let requested = self.requested().to_vec();
        let local_name = self.local_name().to_string();
        let node = materialize(&mut self)?;
        Ok(PersistedMatch {
            path,
            requested,
            local_name,
            node,
        })
    }
}

impl<C: TokenCursor> CursorState for TransientMatch<'_, C> {
    fn token(&self) -> Token {
        self.session.core.subtree_token()
    }

    fn intern(&self, name: &str) -> Symbol {
        self.session.core.cursor.intern(name)
    }

    fn resolve(&self, symbol: Symbol) -> Arc<str> {
        self.session.core.cursor.resolve(symbol)
    }

    fn start_tag(&self) -> ReadResult<Option<StartTag>> {
        // The underlying cursor may already be past the subtree.
        if self.token() == Token::Eof {
            return Ok(None);
        }
        self.session.core.cursor.start_tag()
    }

    fn text_content(&self) -> ReadResult<Option<String>> {
        if self.token() == Token::Eof {
            return Ok(None);
        }
        self.session.core.cursor.text_content()
    }
}

impl<C: TokenCursor> TokenCursor for TransientMatch<'_, C> {
    fn advance(&mut self) -> ReadResult<()> {
        self.session.subtree_advance()
    }

    fn skip_subtree(&mut self) -> ReadResult<()> {
        match self.token() {
            Token::StartElement(_) => self.session.subtree_skip(),
            _ => self.session.subtree_advance(),
        }
    }
}

/// A matched element, borrowed from an asynchronous session.
pub struct TransientMatchAsync<'s, C: AsyncTokenCursor> {
    session: &'s mut MatchesAsync<C>,
    node: NodeId,
}

impl<'s, C: AsyncTokenCursor> TransientMatchAsync<'s, C> {
    pub(crate) fn new(session: &'s mut MatchesAsync<C>, node: NodeId) -> Self {
        Self { session, node }
    }

    pub fn path(&self) -> &str {
        self.session.core.path.as_str()
    }

    pub fn requested(&self) -> &[String] {
        self.session.core.tree.requested(self.node)
    }

    pub fn requested_first(&self) -> &str {
        &self.requested()[0]
    }

    pub fn local_name(&self) -> &str {
        let tree = &self.session.core.tree;
        tree.name_text(tree.node(self.node).name)
    }

    /// Materialize the subtree into an owned result, consuming the view.
    /// Cancelling the session's token aborts at the next read.
    pub async fn persist(mut self) -> ReadResult<PersistedMatch> {
        let path = self.path().to_string();
        let requested = self.requested().to_vec();
        let local_name = self.local_name().to_string();
        let node = materialize_async(&mut self).await?;
        Ok(PersistedMatch {
            path,
            requested,
            local_name,
            node,
        })
    }
}

impl<C: AsyncTokenCursor> std::fmt::Debug for TransientMatchAsync<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientMatchAsync")
            .field("path", &self.path())
            .field("node", &self.node)
            .finish()
    }
}

impl<C: AsyncTokenCursor> CursorState for TransientMatchAsync<'_, C> {
    fn token(&self) -> Token {
        self.session.core.subtree_token()
    }

    fn intern(&self, name: &str) -> Symbol {
        self.session.core.cursor.intern(name)
    }

    fn resolve(&self, symbol: Symbol) -> Arc<str> {
        self.session.core.cursor.resolve(symbol)
    }

    fn start_tag(&self) -> ReadResult<Option<StartTag>> {
        if self.token() == Token::Eof {
            return Ok(None);
        }
        self.session.core.cursor.start_tag()
    }

    fn text_content(&self) -> ReadResult<Option<String>> {
        if self.token() == Token::Eof {
            return Ok(None);
        }
        self.session.core.cursor.text_content()
    }
}

impl<C: AsyncTokenCursor> AsyncTokenCursor for TransientMatchAsync<'_, C> {
    async fn advance(&mut self) -> ReadResult<()> {
        self.session.subtree_advance().await
    }

    async fn skip_subtree(&mut self) -> ReadResult<()> {
        match self.token() {
            Token::StartElement(_) => self.session.subtree_skip().await,
            _ => self.session.subtree_advance().await,
        }
    }
}

/// Builds the owned tree while the subtree cursor walks forward.
#[derive(Default)]
struct TreeAssembler {
    stack: Vec<PendingElement>,
    root: Option<XmlElement>,
}

struct PendingElement {
    tag: StartTag,
    children: Vec<XmlChild>,
}

impl TreeAssembler {
    fn open(&mut self, tag: StartTag) {
        self.stack.push(PendingElement {
            tag,
            children: Vec::new(),
        });
    }

    fn text(&mut self, text: String) {
        let Some(pending) = self.stack.last_mut() else {
            return;
        };
        // Adjacent text events (entities, CDATA) merge into one node.
        if let Some(XmlChild::Text(existing)) = pending.children.last_mut() {
            existing.push_str(&text);
        } else {
            pending.children.push(XmlChild::Text(text));
        }
    }

    fn close(&mut self) {
        let Some(pending) = self.stack.pop() else {
            return;
        };
        let element = XmlElement {
            name: pending.tag.name,
            prefix: pending.tag.prefix,
            attributes: pending.tag.attributes,
            children: finalize_children(pending.children),
        };
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(XmlChild::Element(element)),
            None => self.root = Some(element),
        }
    }

    fn finish(self) -> ReadResult<XmlElement> {
        self.root.ok_or_else(|| ReadError::UnexpectedEof {
            expected: "a complete element".to_string(),
        })
    }
}

fn finalize_children(children: Vec<XmlChild>) -> XmlChildren {
    // Whitespace-only text carries no content, only formatting.
    let children: Vec<XmlChild> = children
        .into_iter()
        .filter(|c| match c {
            XmlChild::Text(text) => !text.trim().is_empty(),
            XmlChild::Element(_) => true,
        })
        .collect();

    if children.is_empty() {
        return XmlChildren::Empty;
    }
    if children.len() == 1 {
        if let XmlChild::Text(_) = &children[0] {
            let Some(XmlChild::Text(text)) = children.into_iter().next() else {
                unreachable!();
            };
            return XmlChildren::Text(text);
        }
    }
    if children.iter().all(|c| matches!(c, XmlChild::Element(_))) {
        let elements = children
            .into_iter()
            .filter_map(|c| match c {
                XmlChild::Element(e) => Some(e),
                XmlChild::Text(_) => None,
            })
            .collect();
        return XmlChildren::Elements(elements);
    }
    XmlChildren::Mixed(children)
}

fn materialize<C: TokenCursor>(cursor: &mut C) -> ReadResult<XmlElement> {
    let mut assembler = TreeAssembler::default();
    loop {
        match cursor.token() {
            Token::StartElement(_) => {
                if let Some(tag) = cursor.start_tag()? {
                    assembler.open(tag);
                }
                cursor.advance()?;
            }
            Token::EndElement(_) => {
                assembler.close();
                cursor.advance()?;
            }
            Token::Text => {
                if let Some(text) = cursor.text_content()? {
                    assembler.text(text);
                }
                cursor.advance()?;
            }
            Token::Other => cursor.advance()?,
            Token::Eof => break,
        }
    }
    assembler.finish()
}

async fn materialize_async<C: AsyncTokenCursor>(cursor: &mut C) -> ReadResult<XmlElement> {
    let mut assembler = TreeAssembler::default();
    loop {
        match cursor.token() {
            Token::StartElement(_) => {
                if let Some(tag) = cursor.start_tag()? {
                    assembler.open(tag);
                }
                cursor.advance().await?;
            }
            Token::EndElement(_) => {
                assembler.close();
                cursor.advance().await?;
            }
            Token::Text => {
                if let Some(text) = cursor.text_content()? {
                    assembler.text(text);
                }
                cursor.advance().await?;
            }
            Token::Other => cursor.advance().await?,
            Token::Eof => break,
        }
    }
    assembler.finish()
}

/// Owning iterator persisting every remaining match of a session.
pub struct Persisted<C: TokenCursor> {
    session: Matches<C>,
}

impl<C: TokenCursor> Iterator for Persisted<C> {
    type Item = ReadResult<PersistedMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.session.next() {
            Ok(Some(found)) => Some(found.persist()),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<C: TokenCursor> Matches<C> {
    /// Turn the session into an iterator of persisted matches.
    pub fn persisted(self) -> Persisted<C> {
        Persisted { session: self }
    }

    /// Persist every remaining match, failing on the first error.
    pub fn persist_all(self) -> ReadResult<Vec<PersistedMatch>> {
        self.persisted().collect()
    }
}

impl<C: AsyncTokenCursor> MatchesAsync<C> {
    /// Persist every remaining match, failing on the first error or on
    /// cancellation.
    pub async fn persist_all(mut self) -> ReadResult<Vec<PersistedMatch>> {
        let mut out = Vec::new();
        while let Some(found) = self.next().await? {
            out.push(found.persist().await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MatchEngine;

    fn persist_one(patterns: &str, xml: &str) -> PersistedMatch {
        let (engine, _) = MatchEngine::compile(patterns).unwrap();
        let mut session = engine.read(xml.as_bytes());
        let found = session.next().unwrap().unwrap();
        found.persist().unwrap()
    }

    #[test]
    fn test_persist_captures_attributes_and_text() {
        let result = persist_one(
            "/doc/item",
            r#"<doc><item id="7" kind="book">Dune</item></doc>"#,
        );

        assert_eq!(result.path, "/doc/item[1]");
        assert_eq!(result.requested_first(), "/doc/item");
        assert_eq!(result.local_name, "item");
        assert_eq!(result.node.name, "item");
        assert_eq!(result.node.get_attribute("id"), Some("7"));
        assert_eq!(result.node.get_attribute("kind"), Some("book"));
        assert_eq!(result.node.text(), Some("Dune"));
    }

    #[test]
    fn test_whitespace_between_children_is_dropped() {
        let result = persist_one("/doc/item", "<doc><item>\n  <a/>\n  <b/>\n</item></doc>");

        assert!(matches!(result.node.children, XmlChildren::Elements(_)));
        let names: Vec<&str> = result.node.all_children().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_mixed_content_is_preserved() {
        let result = persist_one("/doc/p", "<doc><p>before<em>x</em>after</p></doc>");

        let XmlChildren::Mixed(children) = &result.node.children else {
            panic!("expected mixed children, got {:?}", result.node.children);
        };
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], XmlChild::Text("before".to_string()));
        assert_eq!(children[2], XmlChild::Text("after".to_string()));
    }

    #[test]
    fn test_empty_element_persists_as_empty() {
        let result = persist_one("/doc/item", "<doc><item/></doc>");
        assert!(result.node.is_empty());
    }

    #[test]
    fn test_nested_structure_round_trips() {
        let result = persist_one(
            "/lib/shelf",
            "<lib><shelf><book><title>A</title></book><book><title>B</title></book></shelf></lib>",
        );

        let books = result.node.get_children("book");
        assert_eq!(books.len(), 2);
        assert_eq!(books[1].get_children("title")[0].text(), Some("B"));
    }

    #[test]
    fn test_persist_all_collects_in_document_order() {
        let (engine, _) = MatchEngine::compile("/doc/item").unwrap();
        let session = engine.read("<doc><item>1</item><item>2</item></doc>".as_bytes());

        let results = session.persist_all().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node.text(), Some("1"));
        assert_eq!(results[1].path, "/doc/item[2]");
    }

    #[test]
    fn test_session_continues_after_persist() {
        let (engine, _) = MatchEngine::compile("/doc/a|/doc/b").unwrap();
        let mut session = engine.read("<doc><a>x</a><b>y</b></doc>".as_bytes());

        let first = session.next().unwrap().unwrap().persist().unwrap();
        assert_eq!(first.node.text(), Some("x"));

        let second = session.next().unwrap().unwrap().persist().unwrap();
        assert_eq!(second.path, "/doc/b[1]");
        assert_eq!(second.node.text(), Some("y"));

        assert!(session.next().unwrap().is_none());
    }

    #[test]
    fn test_cdata_counts_as_text() {
        let result = persist_one("/doc/item", "<doc><item><![CDATA[a < b]]></item></doc>");
        assert_eq!(result.node.text(), Some("a < b"));
    }
}
