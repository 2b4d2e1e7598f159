//! Terms: variables and constants appearing in goals.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Var(String),
    Const(String),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Self {
        Term::Var(name.into())
    }

    pub fn constant(name: impl Into<String>) -> Self {
        Term::Const(name.into())
    }

    /// Classify an identifier the Prolog way: a leading uppercase letter or
    /// underscore makes it a variable, anything else is a constant.
    pub fn from_ident(ident: &str) -> Self {
        let is_var = ident
            .chars()
            .next()
            .is_some_and(|c| c.is_uppercase() || c == '_');
        if is_var {
            Term::Var(ident.to_string())
        } else {
            Term::Const(ident.to_string())
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Term::Const(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Term::Var(n) | Term::Const(n) => n,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
