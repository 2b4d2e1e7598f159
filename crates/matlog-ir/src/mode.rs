//! Predicate modes: a functor plus per-argument input/output designations.
//!
//! A mode names *how* a predicate is called, not just which predicate: `p/io`
//! binds the first argument and computes the second, `p/oi` is the reverse.
//! Two modes with the same functor and arity but different io-patterns are
//! distinct values, and the compiler caches them independently.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IrError;

/// Input/output designation of one argument position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgIo {
    In,
    Out,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mode {
    functor: String,
    io: Vec<ArgIo>,
}

impl Mode {
    pub fn new(functor: impl Into<String>, io: Vec<ArgIo>) -> Self {
        Mode {
            functor: functor.into(),
            io,
        }
    }

    /// Build a mode from a functor and a compact pattern like `"io"`.
    pub fn from_pattern(functor: impl Into<String>, pattern: &str) -> Result<Self, IrError> {
        let functor = functor.into();
        let mut io = Vec::with_capacity(pattern.len());
        for c in pattern.chars() {
            match c {
                'i' => io.push(ArgIo::In),
                'o' => io.push(ArgIo::Out),
                other => {
                    return Err(IrError::InvalidMode {
                        spec: format!("{}/{}", functor, pattern),
                        reason: format!("unexpected designator '{}'", other),
                    })
                }
            }
        }
        if io.is_empty() {
            return Err(IrError::InvalidMode {
                spec: functor,
                reason: "empty io pattern".into(),
            });
        }
        Ok(Mode { functor, io })
    }

    pub fn functor(&self) -> &str {
        &self.functor
    }

    pub fn arity(&self) -> usize {
        self.io.len()
    }

    pub fn is_input(&self, pos: usize) -> bool {
        self.io.get(pos) == Some(&ArgIo::In)
    }

    pub fn is_output(&self, pos: usize) -> bool {
        self.io.get(pos) == Some(&ArgIo::Out)
    }

    pub fn input_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.io
            .iter()
            .enumerate()
            .filter(|(_, io)| **io == ArgIo::In)
            .map(|(i, _)| i)
    }

    pub fn output_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.io
            .iter()
            .enumerate()
            .filter(|(_, io)| **io == ArgIo::Out)
            .map(|(i, _)| i)
    }

    /// The compact io-pattern, e.g. `"io"`.
    pub fn pattern(&self) -> String {
        self.io
            .iter()
            .map(|io| if *io == ArgIo::In { 'i' } else { 'o' })
            .collect()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.functor, self.pattern())
    }
}

impl FromStr for Mode {
    type Err = IrError;

    /// Parse `"p/io"` or `"p(i,o)"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((functor, pattern)) = s.split_once('/') {
            return Mode::from_pattern(functor.trim(), pattern.trim());
        }
        if let Some(open) = s.find('(') {
            let Some(inner) = s[open + 1..].strip_suffix(')') else {
                return Err(IrError::InvalidMode {
                    spec: s.to_string(),
                    reason: "unmatched parenthesis".into(),
                });
            };
            let pattern: String = inner.split(',').map(|p| p.trim()).collect();
            return Mode::from_pattern(s[..open].trim(), &pattern);
        }
        Err(IrError::InvalidMode {
            spec: s.to_string(),
            reason: "expected 'functor/pattern' or 'functor(i,o,..)'".into(),
        })
    }
}
