//! # matlog compiler
//!
//! Compiles Horn-clause programs over a sparse relational database into
//! composed, depth-bounded function graphs that evaluate forward and
//! differentiate for gradient-based learning.
//!
//! The central type is [`Program`]: it looks rules up by predicate
//! [`Mode`](matlog_ir::Mode), compiles them recursively with per-instance
//! `(mode, depth)` memoization, sums multi-clause predicates, applies the
//! configured top-level normalization, and installs stable node ids, then
//! evaluates the result against the database. [`ProPPRProgram`] extends it
//! with weighted-feature rewriting and weight-initialization heuristics,
//! and [`Plugins`] lets a backend inject primitive predicates that bypass
//! rule compilation entirely.
//!
//! ## Quick start
//!
//! ```
//! use matlog_compiler::{Normalization, Program};
//! use matlog_db::Database;
//! use matlog_ir::{Mode, Parser, Syntax};
//!
//! let mut db = Database::new();
//! db.add_fact("edge", &["a", "b"], 1.0).unwrap();
//! db.add_fact("edge", &["b", "c"], 1.0).unwrap();
//!
//! let rules = Parser::new(Syntax::Proppr)
//!     .parse_str("path(X,Y) :- edge(X,Y).\npath(X,Y) :- edge(X,Z), path(Z,Y).")
//!     .unwrap();
//!
//! let mut program = Program::new(db, rules).unwrap();
//! program.set_normalize(Normalization::None);
//!
//! let mode: Mode = "path/io".parse().unwrap();
//! let reachable = program.eval_symbols(&mode, &["a"], None).unwrap();
//! assert_eq!(reachable.nnz(), 2); // b and c
//! ```

pub mod config;
pub mod function;
pub mod ops;
pub mod plugins;
pub mod program;
pub mod proppr;
pub mod rule_compiler;

pub use config::{CompilerConfig, Normalization, DEFAULT_MAX_DEPTH};
pub use function::{FunKind, Function, Gradients, Scratchpad};
pub use ops::{Op, OpKind};
pub use plugins::{PluginFn, PluginTypeFn, Plugins};
pub use program::{Program, DATABASE_FILE, RULES_FILE};
pub use proppr::{ProPPRProgram, WEIGHTED};
pub use rule_compiler::{compile_rule, infer_types, ASSIGN};
