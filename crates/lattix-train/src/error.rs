use std::time::Duration;

use thiserror::Error;

use crate::triple::Triple;

/// Which end of a triple a negative sample replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorruptionSide {
    /// Replace the head entity.
    Head,
    /// Replace the tail entity.
    Tail,
}

impl std::fmt::Display for CorruptionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Head => f.write_str("head"),
            Self::Tail => f.write_str("tail"),
        }
    }
}

/// Errors that can occur in lattix-train.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Invalid or unparseable configuration.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Training strategy tag is not one of the recognized tags.
    #[error("Unknown training strategy: {0}")]
    UnknownStrategy(String),
    /// Optimizer name is not supported.
    #[error("No support for {0} optimizer")]
    UnknownOptimizer(String),
    /// Rejection sampling could not find a corrupted triple outside the positive set.
    #[error("Negative sampling exhausted after {attempts} attempts corrupting the {side} of {triple}")]
    SamplingExhausted {
        /// The positive triple being corrupted.
        triple: Triple,
        /// Which side was being replaced.
        side: CorruptionSide,
        /// Number of candidates drawn before giving up.
        attempts: usize,
    },
    /// Fewer training triples than a single batch.
    #[error("{triples} training triples cannot fill a single batch of {batch_size}")]
    InsufficientTriples {
        /// Number of training triples available.
        triples: usize,
        /// Configured batch size.
        batch_size: usize,
    },
    /// Every producer of the batch pipeline has exited.
    #[error("Batch pipeline closed")]
    PipelineClosed,
    /// No processed batch arrived within the given wait.
    #[error("Batch pipeline produced nothing within {0:?}")]
    PipelineStalled(Duration),
    /// Entity ID out of range.
    #[error("Entity not found: {0}")]
    EntityNotFound(usize),
    /// Relation ID out of range.
    #[error("Relation not found: {0}")]
    RelationNotFound(usize),
    /// Tensor shapes disagree.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for lattix-train.
pub type Result<T> = std::result::Result<T, Error>;
