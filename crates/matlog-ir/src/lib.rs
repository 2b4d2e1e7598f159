//! # matlog IR
//!
//! Rules, goals, terms, and predicate modes for the matlog logic compiler.
//!
//! This crate is the symbolic layer shared by the database and the compiler:
//! it knows how to represent and parse Horn-clause rules (with the optional
//! weighted-feature annotations) and how to name predicate call patterns as
//! [`Mode`] values, but nothing about matrices or evaluation.
//!
//! ## Quick start
//!
//! ```
//! use matlog_ir::{Mode, Parser, Syntax};
//!
//! let rules = Parser::new(Syntax::Proppr)
//!     .parse_str("path(X,Y) :- edge(X,Y).\npath(X,Y) :- edge(X,Z), path(Z,Y).")
//!     .unwrap();
//!
//! let mode: Mode = "path/io".parse().unwrap();
//! assert_eq!(rules.rules_for(&mode).len(), 2);
//! ```

pub mod error;
pub mod mode;
pub mod parser;
pub mod rule;
pub mod term;

pub use error::IrError;
pub use mode::{ArgIo, Mode};
pub use parser::{Parser, Syntax};
pub use rule::{Goal, Rule, RuleCollection};
pub use term::Term;
