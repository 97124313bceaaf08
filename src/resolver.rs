// src/resolver.rs

//! Post-hoc resolution of the sign/permutation ambiguity of the solver's
//! optimum. The objective is invariant to column permutations and sign flips,
//! so the raw solution has no canonical column order; these routines impose
//! one and report the explained joint covariance per output dimension.

use ndarray::{Array1, Array2};
use ndarray_linalg::Scalar;
use num_traits::{Float, Zero};

use crate::covariance::CovarianceSet;
use crate::math::adjoint;

/// Single-group variant (m = 1): greedily reorder columns so the
/// trial-averaged diagonal of `U^H · C · U` is non-increasing in absolute
/// value. Signs are left untouched. Returns the reordered diagonal averages.
pub(crate) fn resolve_single<A: Scalar>(
    u: &mut Array2<A>,
    cov: &CovarianceSet<A>,
) -> Array1<A::Real> {
    let n = u.ncols();
    let mut d = Array1::<A::Real>::zeros(n);
    let uh = adjoint(&*u);
    for kappa in 0..cov.k() {
        let t = uh.dot(cov.get(kappa, 0, 0)).dot(&*u);
        for e in 0..n {
            d[e] = d[e] + t[[e, e]].re();
        }
    }
    let k = A::real(cov.k());
    d.mapv_inplace(|v| v / k);

    for e in 0..n {
        let mut best = e;
        for eta in (e + 1)..n {
            if Float::abs(d[eta]) > Float::abs(d[best]) {
                best = eta;
            }
        }
        if best != e {
            swap_columns(u, e, best);
            d.swap(e, best);
        }
    }
    d
}

/// Multi-group variant (m > 1): for each output position, pick the globally
/// dominant pairwise diagonal entry among the remaining columns, make the
/// pairwise diagonals at that index non-negative by per-group sign flips, and
/// swap the winning column into place across every group simultaneously.
///
/// Ties break first-found in scan order: ascending `i`, then `j`, then `η`.
/// All pairwise diagonals are recomputed from scratch between positions;
/// that is O(n³·m²·k) in the worst case, acceptable because the output
/// dimension is small next to trial and sample counts.
///
/// Returns the grand average over ordered pairs `i ≠ j` of the final
/// diagonals.
pub(crate) fn resolve_multi<A: Scalar>(
    us: &mut [Array2<A>],
    cov: &CovarianceSet<A>,
) -> Array1<A::Real> {
    let m = us.len();
    let n = us[0].ncols();

    for e in 0..n {
        let d = pairwise_diagonals(us, cov);

        let mut best = (0usize, 1usize, e);
        let mut best_mag = A::Real::neg_infinity();
        for i in 0..m {
            for j in (i + 1)..m {
                for eta in e..n {
                    let mag = d[i * m + j][eta].abs();
                    if mag > best_mag {
                        best_mag = mag;
                        best = (i, j, eta);
                    }
                }
            }
        }
        let (bi, bj, beta) = best;

        // Make every pairwise diagonal at this index non-negative, using the
        // (now-corrected) group bi as the sign reference. Flipping one
        // group's column leaves its diagonals with the other groups intact,
        // so the pre-flip values of d stay valid for the remaining checks.
        if d[bi * m + bj][beta].re() < A::Real::zero() {
            flip_column(&mut us[bj], beta);
        }
        for x in 0..m {
            if x == bi || x == bj {
                continue;
            }
            if d[bi * m + x][beta].re() < A::Real::zero() {
                flip_column(&mut us[x], beta);
            }
        }

        if beta != e {
            for u in us.iter_mut() {
                swap_columns(u, e, beta);
            }
        }
    }

    let d = pairwise_diagonals(us, cov);
    let mut averages = Array1::<A::Real>::zeros(n);
    for i in 0..m {
        for j in 0..m {
            if i == j {
                continue;
            }
            for e in 0..n {
                averages[e] = averages[e] + d[i * m + j][e].re();
            }
        }
    }
    let pairs = A::real(m * (m - 1));
    averages.mapv_inplace(|v| v / pairs);
    averages
}

/// Trial-averaged diagonals of `U_i^H · C[κ,i,j] · U_j` for every ordered
/// pair `i ≠ j`, as an m×m grid (the `i = j` cells are unused).
fn pairwise_diagonals<A: Scalar>(
    us: &[Array2<A>],
    cov: &CovarianceSet<A>,
) -> Vec<Array1<A>> {
    let m = us.len();
    let n = us[0].ncols();
    let k = A::real(cov.k());
    let mut grid = vec![Array1::<A>::zeros(n); m * m];
    for i in 0..m {
        let uh = adjoint(&us[i]);
        for j in 0..m {
            if i == j {
                continue;
            }
            let mut diag = Array1::<A>::zeros(n);
            for kappa in 0..cov.k() {
                let t = uh.dot(cov.get(kappa, i, j)).dot(&us[j]);
                for e in 0..n {
                    diag[e] += t[[e, e]];
                }
            }
            diag.mapv_inplace(|v| v.div_real(k));
            grid[i * m + j] = diag;
        }
    }
    grid
}

fn swap_columns<A: Scalar>(u: &mut Array2<A>, a: usize, b: usize) {
    for row in 0..u.nrows() {
        u.swap([row, a], [row, b]);
    }
}

fn flip_column<A: Scalar>(u: &mut Array2<A>, column: usize) {
    u.column_mut(column).mapv_inplace(|v| -v);
}
