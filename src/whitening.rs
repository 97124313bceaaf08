// src/whitening.rs

//! The pre-whitening stage: per-group dimensionality-reducing whitening
//! transforms derived from the average within-group covariance spectrum.

use ndarray::{s, Array1, Array2};
use ndarray_linalg::{Lapack, Scalar};
use num_traits::{Float, Zero};

use crate::config::VarianceSearch;
use crate::covariance::CovarianceSet;
use crate::error::{OjobError, Result};
use crate::math::{adjoint, eigh_descending};

/// A per-group whitening transform: a forward factor `F` (`n × p`, `p ≤ n`)
/// and its left-inverse, satisfying `F^H · C̄ · F ≈ I_p` for the trial-average
/// within-group covariance `C̄`.
#[derive(Clone, Debug)]
pub struct Whitener<A: Scalar> {
    /// Forward factor `F`, `n × p`.
    pub forward: Array2<A>,
    /// Left-inverse `iF`, `p × n`, with `iF · F = I_p`.
    pub inverse: Array2<A>,
    /// Retained subspace dimension `p`.
    pub retained: usize,
}

impl<A: Scalar + Lapack> Whitener<A> {
    /// Build the closed-form Hermitian whitening of group `group`, keeping
    /// the `retained` dominant eigendirections of its trial-average
    /// within-group covariance.
    pub fn fit(cov: &CovarianceSet<A>, group: usize, retained: usize) -> Result<Self> {
        let mean_cov = cov.average_within(group);
        let (values, vectors) = eigh_descending(&mean_cov)?;
        if retained == 0 || retained > values.len() {
            return Err(OjobError::config(
                "e_var",
                format!(
                    "retained dimension {retained} is outside 1..={} for group {group}",
                    values.len()
                ),
            ));
        }
        let mut forward = vectors.slice(s![.., ..retained]).to_owned();
        let mut inverse = adjoint(&forward);
        for (idx, lambda) in values.iter().take(retained).enumerate() {
            if !(*lambda > A::Real::zero()) {
                return Err(OjobError::MalformedInput(format!(
                    "average covariance of group {group} is not positive definite on the retained subspace (eigenvalue {idx} is {lambda})"
                )));
            }
            let root = Float::sqrt(*lambda);
            forward.column_mut(idx).mapv_inplace(|v| v.div_real(root));
            inverse.row_mut(idx).mapv_inplace(|v| v.mul_real(root));
        }
        Ok(Self {
            forward,
            inverse,
            retained,
        })
    }
}

/// Resolve an explained-variance target into a retained dimension over a
/// descending spectrum. Negative trailing eigenvalues (rounding artifacts)
/// contribute no energy.
pub fn select_dimension<R: Float>(
    spectrum: &Array1<R>,
    target: f64,
    method: VarianceSearch,
) -> usize {
    let n = spectrum.len();
    if n == 0 {
        return 0;
    }
    let target = R::from(target).unwrap_or_else(R::one);
    let total = spectrum
        .iter()
        .fold(R::zero(), |acc, &v| acc + v.max(R::zero()));
    if !(total > R::zero()) {
        return n;
    }
    let mut cumulative = R::zero();
    match method {
        VarianceSearch::First => {
            for (idx, &v) in spectrum.iter().enumerate() {
                cumulative = cumulative + v.max(R::zero());
                if cumulative / total >= target {
                    return idx + 1;
                }
            }
            n
        }
        VarianceSearch::Nearest => {
            let mut best_gap = R::infinity();
            let mut best = n;
            for (idx, &v) in spectrum.iter().enumerate() {
                cumulative = cumulative + v.max(R::zero());
                let gap = (cumulative / total - target).abs();
                if gap < best_gap {
                    best_gap = gap;
                    best = idx + 1;
                }
            }
            best
        }
    }
}

/// Transform the whole covariance array into the whitened bases:
/// `G[κ,i,j] = F_i^H · C[κ,i,j] · F_j`, built once before iterating.
pub fn whiten_covariances<A: Scalar + Lapack>(
    cov: &CovarianceSet<A>,
    whiteners: &[Whitener<A>],
) -> Result<CovarianceSet<A>> {
    let forward_adjoints: Vec<Array2<A>> =
        whiteners.iter().map(|w| adjoint(&w.forward)).collect();
    let dims: Vec<usize> = whiteners.iter().map(|w| w.retained).collect();
    CovarianceSet::from_fn(cov.k(), &dims, |kappa, i, j| {
        forward_adjoints[i]
            .dot(cov.get(kappa, i, j))
            .dot(&whiteners[j].forward)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn select_dimension_first_at_or_above_target() {
        let spectrum = array![4.0, 3.0, 2.0, 1.0];
        assert_eq!(select_dimension(&spectrum, 0.40, VarianceSearch::First), 1);
        assert_eq!(select_dimension(&spectrum, 0.41, VarianceSearch::First), 2);
        assert_eq!(select_dimension(&spectrum, 0.70, VarianceSearch::First), 2);
        assert_eq!(select_dimension(&spectrum, 1.0, VarianceSearch::First), 4);
    }

    #[test]
    fn select_dimension_nearest_minimizes_gap() {
        let spectrum = array![4.0, 3.0, 2.0, 1.0];
        // Cumulative fractions: 0.4, 0.7, 0.9, 1.0.
        assert_eq!(select_dimension(&spectrum, 0.52, VarianceSearch::Nearest), 1);
        assert_eq!(select_dimension(&spectrum, 0.78, VarianceSearch::Nearest), 2);
        assert_eq!(select_dimension(&spectrum, 0.99, VarianceSearch::Nearest), 4);
    }

    #[test]
    fn select_dimension_ignores_negative_tail() {
        let spectrum = array![3.0, 1.0, -0.5];
        assert_eq!(select_dimension(&spectrum, 0.75, VarianceSearch::First), 1);
        assert_eq!(select_dimension(&spectrum, 0.9, VarianceSearch::First), 2);
    }

    #[test]
    fn whitener_round_trip_on_retained_subspace() {
        // Diagonal spectrum makes the expected factors explicit.
        let c = array![
            [4.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 0.25]
        ];
        let cov = CovarianceSet::from_trials(vec![c.clone()]).unwrap();
        let w = Whitener::<f64>::fit(&cov, 0, 2).unwrap();
        assert_eq!(w.forward.dim(), (3, 2));
        assert_eq!(w.inverse.dim(), (2, 3));

        // F^H · C̄ · F = I_p.
        let white = adjoint(&w.forward).dot(&c).dot(&w.forward);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(white[[i, j]], expected, epsilon = 1e-10);
            }
        }
        // iF · F = I_p.
        let round_trip = w.inverse.dot(&w.forward);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(round_trip[[i, j]], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn whitener_rejects_degenerate_spectrum() {
        let cov = CovarianceSet::from_trials(vec![Array2::<f64>::zeros((2, 2))]).unwrap();
        assert!(Whitener::<f64>::fit(&cov, 0, 2).is_err());
    }

    #[test]
    fn whiten_covariances_transforms_every_entry() {
        let c = array![[2.0, 0.0], [0.0, 0.5]];
        let cov = CovarianceSet::from_fn(1, &[2, 2], |_, _, _| c.clone()).unwrap();
        let whiteners: Vec<Whitener<f64>> = (0..2)
            .map(|i| Whitener::fit(&cov, i, 2).unwrap())
            .collect();
        let white = whiten_covariances(&cov, &whiteners).unwrap();
        // Within-group entries become the identity; so do the cross entries
        // here, because every entry shares the same matrix.
        for i in 0..2 {
            for j in 0..2 {
                let g = white.get(0, i, j);
                assert_abs_diff_eq!(g[[0, 0]], 1.0, epsilon = 1e-10);
                assert_abs_diff_eq!(g[[1, 1]], 1.0, epsilon = 1e-10);
                assert_abs_diff_eq!(g[[0, 1]], 0.0, epsilon = 1e-10);
            }
        }
    }
}
