//! Error taxonomy for the chain engine.
//!
//! Two layers: [`TierError`] is what a single backing tier reports,
//! [`ChainError`] is what the engine surfaces to callers. Only the terminal
//! tier can fail an operation; every other tier error degrades to a logged
//! warning (see [`crate::chain`]).

use std::fmt;
use thiserror::Error;

/// Error reported by a single backing tier.
#[derive(Error, Debug)]
pub enum TierError {
    /// The backend rejected or failed the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

/// The tier operation that failed, as rendered in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOp {
    Contains,
    Get,
    GetBatch,
    Put,
    PutBatch,
    Delete,
}

impl fmt::Display for TierOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TierOp::Contains => "check",
            TierOp::Get => "get",
            TierOp::GetBatch => "get batch",
            TierOp::Put => "put",
            TierOp::PutBatch => "put batch",
            TierOp::Delete => "delete",
        })
    }
}

/// Error surfaced by chain store operations.
///
/// Messages name the failing tier and the offending key so operators can
/// tell which layer of the chain is the culprit.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The terminal tier failed. Its answer is authoritative, so the rest
    /// of the chain cannot serve the operation.
    #[error("could not {op} key '{key}' in terminal tier '{tier}': {source}")]
    Terminal {
        tier: String,
        op: TierOp,
        key: String,
        #[source]
        source: TierError,
    },

    /// The terminal tier failed during a batch operation.
    #[error("could not {op} in terminal tier '{tier}': {source}")]
    TerminalBatch {
        tier: String,
        op: TierOp,
        #[source]
        source: TierError,
    },

    /// A stock tier could not be brought up while assembling a chain from
    /// configuration.
    #[error("could not connect tier '{tier}': {source}")]
    Startup {
        tier: String,
        #[source]
        source: TierError,
    },

    /// A chain needs at least one tier.
    #[error("chain has no tiers")]
    EmptyChain,
}
