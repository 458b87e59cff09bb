//! Forward-only token cursors over an XML source.
//!
//! The match engine never talks to quick-xml directly; it drives a
//! [`TokenCursor`] (or its async counterpart), which exposes exactly what the
//! traversal needs: the current token with its interned name, one-token
//! advance, and whole-subtree skip. [`XmlCursor`] is the quick-xml-backed
//! implementation, usable both synchronously (`R: BufRead`) and
//! asynchronously (`R: AsyncBufRead + Unpin`).

use std::io::BufRead;
use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::Event;
use quick_xml::name::QName;
use tokio::io::AsyncBufRead;

use crate::error::{ReadError, ReadResult};
use crate::result::XmlAttribute;
use crate::symbol::{Symbol, SymbolTable};

/// The current token of a cursor.
///
/// Element names are interned; comparing two `StartElement`/`EndElement`
/// tokens for the same name is an identity comparison of their symbols.
/// Empty elements (`<a/>`) always surface as a start/end pair, and comments
/// never surface at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    StartElement(Symbol),
    EndElement(Symbol),
    /// Character data or CDATA.
    Text,
    /// Anything else the tokenizer reports (declarations, processing
    /// instructions, doctypes) — also the state of a cursor that has not
    /// read its first token yet.
    Other,
    Eof,
}

/// Owned view of the start tag under the cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct StartTag {
    pub name: String,
    pub prefix: Option<String>,
    pub attributes: Vec<XmlAttribute>,
}

/// The token-independent part of a cursor: current-token inspection and the
/// symbol table every observed name is interned into.
pub trait CursorState {
    fn token(&self) -> Token;

    /// Intern `name` into this cursor's symbol table.
    fn intern(&self, name: &str) -> Symbol;

    /// Canonical text for a symbol from this cursor's table.
    fn resolve(&self, symbol: Symbol) -> Arc<str>;

    /// The start tag under the cursor, or `None` when the current token is
    /// not an element start.
    fn start_tag(&self) -> ReadResult<Option<StartTag>>;

    /// Unescaped character data under the cursor, or `None` when the current
    /// token is not text.
    fn text_content(&self) -> ReadResult<Option<String>>;
}

/// Synchronous forward-only cursor.
pub trait TokenCursor: CursorState {
    /// Move to the next token.
    fn advance(&mut self) -> ReadResult<()>;

    /// Consume the element under the cursor together with its whole subtree,
    /// leaving the cursor on the first token after its end tag. When the
    /// current token is not an element start this advances one token.
    fn skip_subtree(&mut self) -> ReadResult<()>;
}

/// Asynchronous forward-only cursor; same contract as [`TokenCursor`] with
/// suspension at the underlying read boundaries.
#[allow(async_fn_in_trait)]
pub trait AsyncTokenCursor: CursorState {
    async fn advance(&mut self) -> ReadResult<()>;

    async fn skip_subtree(&mut self) -> ReadResult<()>;
}

impl<C: CursorState + ?Sized> CursorState for &mut C {
    fn token(&self) -> Token {
        (**self).token()
    }

    fn intern(&self, name: &str) -> Symbol {
        (**self).intern(name)
    }

    fn resolve(&self, symbol: Symbol) -> Arc<str> {
        (**self).resolve(symbol)
    }

    fn start_tag(&self) -> ReadResult<Option<StartTag>> {
        (**self).start_tag()
    }

    fn text_content(&self) -> ReadResult<Option<String>> {
        (**self).text_content()
    }
}

impl<C: TokenCursor + ?Sized> TokenCursor for &mut C {
    fn advance(&mut self) -> ReadResult<()> {
        (**self).advance()
    }

    fn skip_subtree(&mut self) -> ReadResult<()> {
        (**self).skip_subtree()
    }
}

impl<C: AsyncTokenCursor> AsyncTokenCursor for &mut C {
    async fn advance(&mut self) -> ReadResult<()> {
        (**self).advance().await
    }

    async fn skip_subtree(&mut self) -> ReadResult<()> {
        (**self).skip_subtree().await
    }
}

/// quick-xml-backed cursor.
///
/// The reader is configured to expand empty elements, so the traversal only
/// ever sees balanced start/end pairs; comments are dropped here (the
/// engine's default reader configuration ignores them). The raw event under
/// the cursor is kept owned so attributes and text stay retrievable while
/// a match is being materialized.
pub struct XmlCursor<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    table: Arc<SymbolTable>,
    token: Token,
    current: Option<Event<'static>>,
}

impl<R> XmlCursor<R> {
    /// Wrap a source. The cursor starts before the first token; the first
    /// `advance` reads it.
    pub fn new(source: R, table: Arc<SymbolTable>) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().expand_empty_elements = true;

        Self {
            reader,
            buf: Vec::new(),
            table,
            token: Token::Other,
            current: None,
        }
    }

    /// Classify one event; returns `false` for events that never surface.
    fn accept(&mut self, event: Event<'_>) -> bool {
        self.token = match &event {
            Event::Comment(_) => return false,
            Event::Start(e) => Token::StartElement(self.intern_name(e.name())),
            Event::End(e) => Token::EndElement(self.intern_name(e.name())),
            Event::Text(_) | Event::CData(_) => Token::Text,
            Event::Eof => Token::Eof,
            _ => Token::Other,
        };
        self.current = Some(event.into_owned());
        true
    }

    fn intern_name(&self, name: QName<'_>) -> Symbol {
        self.table
            .intern(&String::from_utf8_lossy(name.local_name().into_inner()))
    }
}

impl<R> CursorState for XmlCursor<R> {
    fn token(&self) -> Token {
        self.token
    }

    fn intern(&self, name: &str) -> Symbol {
        self.table.intern(name)
    }

    fn resolve(&self, symbol: Symbol) -> Arc<str> {
        self.table.resolve(symbol)
    }

    fn start_tag(&self) -> ReadResult<Option<StartTag>> {
        let Some(Event::Start(e)) = &self.current else {
            return Ok(None);
        };

        let qname = e.name();
        let name = String::from_utf8_lossy(qname.local_name().into_inner()).into_owned();
        let prefix = qname
            .prefix()
            .map(|p| String::from_utf8_lossy(p.into_inner()).into_owned());

        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let key = attr.key;
            let value = attr
                .unescape_value()
                .map_err(|err| ReadError::Xml(err.into()))?
                .into_owned();
            attributes.push(XmlAttribute {
                name: String::from_utf8_lossy(key.local_name().into_inner()).into_owned(),
                prefix: key
                    .prefix()
                    .map(|p| String::from_utf8_lossy(p.into_inner()).into_owned()),
                value,
            });
        }

        Ok(Some(StartTag {
            name,
            prefix,
            attributes,
        }))
    }

    fn text_content(&self) -> ReadResult<Option<String>> {
        match &self.current {
            Some(Event::Text(t)) => {
                let text = t.unescape().map_err(|err| ReadError::Xml(err.into()))?;
                Ok(Some(text.into_owned()))
            }
            Some(Event::CData(c)) => Ok(Some(String::from_utf8_lossy(c.as_ref()).into_owned())),
            _ => Ok(None),
        }
    }
}

impl<R: BufRead> TokenCursor for XmlCursor<R> {
    fn advance(&mut self) -> ReadResult<()> {
        let mut buf = std::mem::take(&mut self.buf);
        let result = loop {
            buf.clear();
            match self.reader.read_event_into(&mut buf) {
                Ok(event) => {
                    if self.accept(event) {
                        break Ok(());
                    }
                }
                Err(err) => break Err(ReadError::Xml(err)),
            }
        };
        self.buf = buf;
        result
    }

    fn skip_subtree(&mut self) -> ReadResult<()> {
        if !matches!(self.token, Token::StartElement(_)) {
            return self.advance();
        }

        let mut depth = 0u32;
        loop {
            match self.token {
                Token::StartElement(_) => depth += 1,
                Token::EndElement(_) => {
                    depth -= 1;
                    if depth == 0 {
                        // Step past the matching end tag.
                        return self.advance();
                    }
                }
                Token::Eof => {
                    return Err(ReadError::UnexpectedEof {
                        expected: "the matching end tag".to_string(),
                    });
                }
                _ => {}
            }
            self.advance()?;
        }
    }
}

impl<R: AsyncBufRead + Unpin> AsyncTokenCursor for XmlCursor<R> {
    async fn advance(&mut self) -> ReadResult<()> {
        let mut buf = std::mem::take(&mut self.buf);
        let result = loop {
            buf.clear();
            match self.reader.read_event_into_async(&mut buf).await {
                Ok(event) => {
                    if self.accept(event) {
                        break Ok(());
                    }
                }
                Err(err) => break Err(ReadError::Xml(err)),
            }
        };
        self.buf = buf;
        result
    }

    async fn skip_subtree(&mut self) -> ReadResult<()> {
        if !matches!(self.token, Token::StartElement(_)) {
            return self.advance().await;
        }

        let mut depth = 0u32;
        loop {
            match self.token {
                Token::StartElement(_) => depth += 1,
                Token::EndElement(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return self.advance().await;
                    }
                }
                Token::Eof => {
                    return Err(ReadError::UnexpectedEof {
                        expected: "the matching end tag".to_string(),
                    });
                }
                _ => {}
            }
            self.advance().await?;
        }
    }
}
