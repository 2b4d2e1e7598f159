//! matlog: differentiable logic programs over sparse matrices.
//!
//! This is the umbrella crate that re-exports the matlog components:
//!
//! - **Symbolic layer**: [`ir`], with rules, goals, modes, and the rule parsers
//! - **Data layer**: [`db`], the sparse relational database and its parameters
//! - **Compiler**: [`compiler`], with programs, plugins, and the function graph

pub use matlog_compiler as compiler;
pub use matlog_db as db;
pub use matlog_ir as ir;
