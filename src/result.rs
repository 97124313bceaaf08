// src/result.rs

//! Result types for the OJoB solver.

use ndarray::{Array1, Array2};
use ndarray_linalg::Scalar;

/// Result of running [`crate::Ojob::fit`].
///
/// All per-group collections are indexed by group. In the single-group case
/// (m = 1) they hold one element; [`transform`](Self::transform) and
/// [`unmixing_matrix`](Self::unmixing_matrix) are convenience accessors for
/// that case.
#[derive(Clone, Debug)]
pub struct OjobResult<A: Scalar> {
    /// Per-group forward (basis) transforms, `n_i × p`: back-substituted
    /// through the whitening factor when pre-whitening was active, square
    /// orthogonal otherwise.
    pub transforms: Vec<Array2<A>>,

    /// Per-group unmixing transforms, `p × n_i`, the left-inverses of the
    /// forward transforms: the conjugate transpose composed with the
    /// whitening left-inverse when pre-whitening was active, the plain
    /// conjugate transpose otherwise.
    pub unmixing: Vec<Array2<A>>,

    /// Explained joint covariance per output dimension: the trial-averaged
    /// (and, for m > 1, pair-averaged) diagonal of the transformed
    /// cross-covariances, ordered by the ambiguity resolver. `None` when
    /// sorting was disabled.
    pub diag_averages: Option<Array1<A::Real>>,

    /// Number of sweeps performed.
    pub iterations: usize,

    /// Final relative-change convergence value.
    pub conv: A::Real,

    /// Whether the relative-change criterion was met within the cap.
    pub converged: bool,

    /// Whether a negative relative change beyond tolerance was observed,
    /// a signal of likely numerical instability, not a failure.
    pub diverged: bool,
}

impl<A: Scalar> OjobResult<A> {
    /// Number of groups in the solution.
    pub fn n_groups(&self) -> usize {
        self.transforms.len()
    }

    /// The forward transform of the single-group case.
    pub fn transform(&self) -> &Array2<A> {
        &self.transforms[0]
    }

    /// The unmixing transform of the single-group case.
    pub fn unmixing_matrix(&self) -> &Array2<A> {
        &self.unmixing[0]
    }
}
