//! Thread-safe interning of element local names.
//!
//! Matching never compares name text. Every local name observed from a token
//! cursor and every pattern step is interned into one shared [`SymbolTable`],
//! and all comparisons are identity comparisons of the resulting [`Symbol`]s.
//! This keeps the per-element matching cost constant regardless of how many
//! patterns were compiled.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Canonical handle for one interned local name.
///
/// Two symbols obtained from the same table compare equal exactly when their
/// texts are equal. Symbols are only meaningful relative to the table that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

/// Thread-safe interning table.
///
/// The common case (the symbol is already known) takes only a shared read
/// lock, so concurrent read sessions are not serialized against each other.
/// The exclusive write lock is taken only when a genuinely new name shows up.
#[derive(Debug, Default)]
pub struct SymbolTable {
    inner: RwLock<Interner>,
}

#[derive(Debug, Default)]
struct Interner {
    ids: HashMap<Arc<str>, u32>,
    names: Vec<Arc<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical symbol for `text`, interning it if necessary.
    pub fn intern(&self, text: &str) -> Symbol {
        {
            let inner = self.inner.read().expect("symbol table lock poisoned");
            if let Some(&id) = inner.ids.get(text) {
                return Symbol(id);
            }
        }

        let mut inner = self.inner.write().expect("symbol table lock poisoned");
        // Another thread may have inserted between the two locks.
        if let Some(&id) = inner.ids.get(text) {
            return Symbol(id);
        }

        let id = inner.names.len() as u32;
        let name: Arc<str> = Arc::from(text);
        inner.names.push(name.clone());
        inner.ids.insert(name, id);
        Symbol(id)
    }

    /// Canonical text for a symbol previously produced by this table.
    pub fn resolve(&self, symbol: Symbol) -> Arc<str> {
        let inner = self.inner.read().expect("symbol table lock poisoned");
        inner.names[symbol.0 as usize].clone()
    }

    /// Number of distinct names interned so far.
    pub fn len(&self) -> usize {
        self.inner.read().expect("symbol table lock poisoned").names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
