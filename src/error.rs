// src/error.rs

//! Error types for the OJoB solver.

use thiserror::Error;

/// Errors surfaced by covariance validation, configuration checks, and the
/// decompositions the solver relies on.
///
/// Non-convergence and divergence are deliberately *not* errors: the solver
/// returns its best solution with advisory flags on [`crate::OjobResult`] and
/// a `log::warn!` record instead.
#[derive(Debug, Error)]
pub enum OjobError {
    /// A configuration value or input-shape combination that is rejected
    /// before any computation starts.
    #[error("invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Name of the offending parameter.
        parameter: String,
        /// Why it was rejected.
        message: String,
    },

    /// Structurally malformed covariance input: inconsistent shapes, an empty
    /// trial set, non-positive traces under normalization, and the like.
    #[error("malformed covariance input: {0}")]
    MalformedInput(String),

    /// A LAPACK decomposition failed. This indicates a contract violation by
    /// the input data (non-Hermitian or degenerate matrices) and is propagated
    /// as fatal rather than recovered from.
    #[error("matrix decomposition failed: {0}")]
    Decomposition(#[from] ndarray_linalg::error::LinalgError),
}

impl OjobError {
    pub(crate) fn config(parameter: &str, message: impl Into<String>) -> Self {
        OjobError::InvalidConfig {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OjobError>;
