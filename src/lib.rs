// src/lib.rs

//! # ojob
//!
//! Orthogonal joint blind source separation (OJoB) for Rust: given a 3-index
//! array of covariance and cross-covariance matrices over `m` datasets
//! ("groups") and `k` observation windows ("trials"), find one orthogonal
//! transform per group that makes all pairwise transformed cross-covariances
//! as diagonal as possible, simultaneously.
//!
//! The same routine covers the classical special cases:
//!
//! - `m = 1, k > 2`: approximate joint diagonalization of a matrix set;
//! - `m = 2, k = 1`: the generalized singular-value-style two-set problem;
//! - `m > 1, k > 1`: the full joint BSS problem across datasets and trials.
//!
//! The solver is a generalized power iteration with a nearest-orthogonal
//! (polar) projection after every Gauss-Seidel sweep, an optional
//! dimensionality-reducing pre-whitening stage, and a post-hoc resolver for
//! the sign/permutation ambiguity inherent to the objective.
//!
//! ## Example
//!
//! ```no_run
//! use ndarray::Array2;
//! use ojob::{CovarianceSet, Ojob, OjobConfig};
//!
//! // Six trial covariances of one 4-dimensional dataset.
//! let trials: Vec<Array2<f64>> = (0..6).map(|_| Array2::eye(4)).collect();
//! let cov = CovarianceSet::from_trials(trials)?;
//!
//! let result = Ojob::fit(&cov, &OjobConfig::default())?;
//! assert!(result.converged);
//! let basis = result.transform(); // 4 × 4, orthogonal
//! # Ok::<(), ojob::OjobError>(())
//! ```
//!
//! Real (`f64`) and complex (`c64`) covariance arrays are both supported; the
//! solver is generic over the scalar via `ndarray-linalg`.

mod config;
mod covariance;
mod error;
pub mod math;
mod resolver;
mod result;
mod solver;
mod whitening;

pub use config::{
    ConfigBuilder, NoWeighting, OjobConfig, SubspaceSpec, TrialWeighting, VarianceSearch,
};
pub use covariance::{CovarianceSet, Estimator, EstimatorOptions, SampleAxis};
pub use error::{OjobError, Result};
pub use result::OjobResult;
pub use solver::Ojob;
pub use whitening::Whitener;
