//! Compiler configuration.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Default bound on recursive compilation depth.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Top-level normalization applied once, at depth 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    #[default]
    Softmax,
    LogSoftmax,
    None,
}

impl FromStr for Normalization {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "softmax" => Ok(Normalization::Softmax),
            "log+softmax" => Ok(Normalization::LogSoftmax),
            "none" => Ok(Normalization::None),
            other => bail!("bad normalization setting '{}'", other),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Normalization::Softmax => "softmax",
            Normalization::LogSoftmax => "log+softmax",
            Normalization::None => "none",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Maximum depth of recursive compilation; beyond it every mode compiles
    /// to the zero function.
    pub max_depth: usize,
    pub normalize: Normalization,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_normalize(mut self, normalize: Normalization) -> Self {
        self.normalize = normalize;
        self
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            normalize: Normalization::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_from_str() {
        assert_eq!(
            "softmax".parse::<Normalization>().unwrap(),
            Normalization::Softmax
        );
        assert_eq!(
            "log+softmax".parse::<Normalization>().unwrap(),
            Normalization::LogSoftmax
        );
        assert_eq!("none".parse::<Normalization>().unwrap(), Normalization::None);
        assert!("sofmax".parse::<Normalization>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = CompilerConfig::default();
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.normalize, Normalization::Softmax);
    }

    #[test]
    fn test_builders() {
        let config = CompilerConfig::new()
            .with_max_depth(3)
            .with_normalize(Normalization::None);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.normalize, Normalization::None);
    }
}
