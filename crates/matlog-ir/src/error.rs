//! Error types for the rule layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrError {
    #[error("line {line}: cannot parse rule '{text}': {reason}")]
    Parse {
        line: usize,
        text: String,
        reason: String,
    },
    #[error("invalid mode spec '{spec}': {reason}")]
    InvalidMode { spec: String, reason: String },
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
