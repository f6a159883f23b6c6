//! Errors raised while distributing tasks and gathering results.

use thiserror::Error;

/// Errors produced by the task distributor and the process-group layer.
#[derive(Debug, Error)]
pub enum DistributionError {
    /// A constructor or configuration parameter is out of range.
    #[error("invalid configuration: `{parameter}` {reason}")]
    InvalidConfiguration {
        parameter: String,
        reason: String,
    },

    /// The local contribution does not have the leading dimension this rank owns.
    #[error("shape mismatch: expected leading dimension {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// The local contribution has no leading (task) axis at all.
    #[error("shape mismatch: expected an array with a leading task axis, got a 0-d array")]
    MissingLeadingAxis,

    /// Participants disagree on a collective call (element type, counts or
    /// trailing shape). Carries the diagnostic of the process-group layer.
    #[error("collective mismatch: {0}")]
    CollectiveMismatch(String),

    /// A per-rank element count does not fit into the communication count type.
    #[error("element count {count} of rank {rank} exceeds the collective count limit")]
    CountOverflow { rank: usize, count: u128 },

    #[error("serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("malformed configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("logger initialization failed: {0}")]
    Logger(#[from] flexi_logger::FlexiLoggerError),
}

impl DistributionError {
    pub(crate) fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

/// Shorthand for results carrying a [`DistributionError`].
pub type Result<T, E = DistributionError> = std::result::Result<T, E>;
