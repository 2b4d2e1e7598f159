//! Typed and typeless database schemas.
//!
//! A typeless schema interns every symbol into a single universal type,
//! [`THING`]. A typed schema keeps one symbol table per declared type and
//! records, per relation, the type of each argument position. The two kinds
//! never convert into each other; callers branch on [`Schema::is_typeless`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::symbols::SymbolTable;

/// The universal type of a typeless schema.
pub const THING: &str = "__THING__";

fn decl_key(functor: &str, arity: usize) -> String {
    format!("{}/{}", functor, arity)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Schema {
    Typeless {
        symbols: SymbolTable,
    },
    Typed {
        types: IndexMap<String, SymbolTable>,
        /// `functor/arity` to declared argument types.
        decls: IndexMap<String, Vec<String>>,
    },
}

impl Schema {
    pub fn typeless() -> Self {
        Schema::Typeless {
            symbols: SymbolTable::new(),
        }
    }

    pub fn typed() -> Self {
        Schema::Typed {
            types: IndexMap::new(),
            decls: IndexMap::new(),
        }
    }

    pub fn is_typeless(&self) -> bool {
        matches!(self, Schema::Typeless { .. })
    }

    /// Resolve an optional type name: typeless schemas always answer
    /// [`THING`], typed schemas require an explicit name.
    pub fn resolve_type<'a>(&self, type_name: Option<&'a str>) -> Result<&'a str, DbError> {
        match self {
            Schema::Typeless { .. } => Ok(THING),
            Schema::Typed { .. } => type_name.ok_or(DbError::TypeRequired),
        }
    }

    pub fn insert_symbol(&mut self, type_name: Option<&str>, symbol: &str) -> Result<usize, DbError> {
        match self {
            Schema::Typeless { symbols } => Ok(symbols.insert(symbol)),
            Schema::Typed { types, .. } => {
                let name = type_name.ok_or(DbError::TypeRequired)?;
                Ok(types.entry(name.to_string()).or_default().insert(symbol))
            }
        }
    }

    pub fn symbol_id(&self, type_name: Option<&str>, symbol: &str) -> Result<usize, DbError> {
        let table = self.table(type_name)?;
        table.id(symbol).ok_or_else(|| DbError::UnknownSymbol {
            symbol: symbol.to_string(),
            type_name: self
                .resolve_type(type_name)
                .unwrap_or(THING)
                .to_string(),
        })
    }

    pub fn symbol(&self, type_name: Option<&str>, id: usize) -> Result<&str, DbError> {
        let table = self.table(type_name)?;
        table.symbol(id).ok_or(DbError::IndexOutOfBounds {
            index: id,
            dim: table.len(),
        })
    }

    pub fn num_symbols(&self, type_name: Option<&str>) -> Result<usize, DbError> {
        Ok(self.table(type_name)?.len())
    }

    /// Search every type table for a symbol; used when no type hint is
    /// available (e.g. one-hot encoding a rule-id constant).
    pub fn find_symbol(&self, symbol: &str) -> Option<(&str, usize)> {
        match self {
            Schema::Typeless { symbols } => symbols.id(symbol).map(|id| (THING, id)),
            Schema::Typed { types, .. } => types
                .iter()
                .find_map(|(name, table)| table.id(symbol).map(|id| (name.as_str(), id))),
        }
    }

    pub fn declare_relation_types(
        &mut self,
        functor: &str,
        arity: usize,
        arg_types: Vec<String>,
    ) -> Result<(), DbError> {
        match self {
            Schema::Typeless { .. } => Err(DbError::NotTyped),
            Schema::Typed { types, decls } => {
                for t in &arg_types {
                    types.entry(t.clone()).or_default();
                }
                decls.insert(decl_key(functor, arity), arg_types);
                Ok(())
            }
        }
    }

    /// The declared type of one argument position, or [`THING`] for a
    /// typeless schema.
    pub fn arg_type(&self, functor: &str, arity: usize, pos: usize) -> Option<String> {
        match self {
            Schema::Typeless { .. } => Some(THING.to_string()),
            Schema::Typed { decls, .. } => decls
                .get(&decl_key(functor, arity))
                .and_then(|args| args.get(pos))
                .cloned(),
        }
    }

    pub fn has_declaration(&self, functor: &str, arity: usize) -> bool {
        match self {
            Schema::Typeless { .. } => true,
            Schema::Typed { decls, .. } => decls.contains_key(&decl_key(functor, arity)),
        }
    }

    pub fn type_names(&self) -> Vec<&str> {
        match self {
            Schema::Typeless { .. } => vec![THING],
            Schema::Typed { types, .. } => types.keys().map(|s| s.as_str()).collect(),
        }
    }

    fn table(&self, type_name: Option<&str>) -> Result<&SymbolTable, DbError> {
        match self {
            Schema::Typeless { symbols } => Ok(symbols),
            Schema::Typed { types, .. } => {
                let name = type_name.ok_or(DbError::TypeRequired)?;
                types
                    .get(name)
                    .ok_or_else(|| DbError::UnknownType(name.to_string()))
            }
        }
    }
}
