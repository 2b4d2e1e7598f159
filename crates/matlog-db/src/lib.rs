//! # matlog DB
//!
//! The sparse relational database backing matlog programs: relations stored
//! as sparse vectors and matrices over interned symbols, typed or typeless
//! schemas, named trainable parameters, and one-hot symbol encoding.
//!
//! ## Quick start
//!
//! ```
//! use matlog_db::Database;
//!
//! let mut db = Database::new();
//! db.add_fact("edge", &["a", "b"], 1.0).unwrap();
//! db.add_fact("edge", &["b", "c"], 1.0).unwrap();
//!
//! let a = db.onehot("a", None).unwrap();
//! let out = db.matrix("edge").unwrap().vec_mul(&a).unwrap();
//! assert_eq!(out.nnz(), 1);
//! ```

pub mod database;
pub mod error;
pub mod schema;
pub mod sparse;
pub mod symbols;

pub use database::{Database, Relation};
pub use error::DbError;
pub use schema::{Schema, THING};
pub use sparse::{SparseMatrix, SparseVector};
pub use symbols::SymbolTable;
