//! Insertion-ordered symbol interning.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Maps symbols to dense ids in insertion order. Ids are stable for the
/// lifetime of the table; symbols are never removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    syms: IndexSet<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Intern a symbol, returning its id.
    pub fn insert(&mut self, symbol: &str) -> usize {
        if let Some(id) = self.syms.get_index_of(symbol) {
            return id;
        }
        self.syms.insert_full(symbol.to_string()).0
    }

    pub fn id(&self, symbol: &str) -> Option<usize> {
        self.syms.get_index_of(symbol)
    }

    pub fn symbol(&self, id: usize) -> Option<&str> {
        self.syms.get_index(id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.syms.iter().map(|s| s.as_str())
    }
}
