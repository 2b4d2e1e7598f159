//! Error types for the database layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("unknown symbol '{symbol}' in type {type_name}")]
    UnknownSymbol { symbol: String, type_name: String },
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("a type name is required on a database with declared types")]
    TypeRequired,
    #[error("type declarations are only valid on a database with declared types")]
    NotTyped,
    #[error("no relation {functor}/{arity} in database")]
    NoSuchRelation { functor: String, arity: usize },
    #[error("relation {functor}/{arity} needs declared argument types on a typed database")]
    UndeclaredTypes { functor: String, arity: usize },
    #[error("relations of arity {arity} are not supported: {functor}")]
    UnsupportedArity { functor: String, arity: usize },
    #[error("dimension mismatch: {left} vs {right}")]
    DimMismatch { left: usize, right: usize },
    #[error("index {index} out of bounds for dimension {dim}")]
    IndexOutOfBounds { index: usize, dim: usize },
    #[error("bad fact at {path}:{line}: {reason}")]
    BadFactLine {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
