// src/solver.rs

//! The OJoB engine: a generalized power iteration over m transform matrices,
//! forced orthogonal after every sweep, maximizing the summed squared
//! diagonals of all pairwise transformed cross-covariances.

use std::borrow::Cow;

use log::{debug, info, warn};
use ndarray::linalg::{general_mat_mul, general_mat_vec_mul};
use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, Lapack, Scalar, UPLO};
use num_traits::{Float, Zero};

use crate::config::{OjobConfig, SubspaceSpec};
use crate::covariance::CovarianceSet;
use crate::error::{OjobError, Result};
use crate::math::{adjoint, eigh_descending, nearest_orthogonal};
use crate::resolver::{resolve_multi, resolve_single};
use crate::result::OjobResult;
use crate::whitening::{select_dimension, whiten_covariances, Whitener};

/// Orthogonal joint blind source separation solver.
///
/// One routine covers every call pattern, parameterized by the shape of the
/// supplied [`CovarianceSet`]: approximate joint diagonalization (m = 1,
/// k > 2), classical joint BSS (m > 1, k = 1), and the general multi-trial,
/// multi-group problem.
pub struct Ojob;

impl Ojob {
    /// Jointly diagonalize `cov` under `config`.
    ///
    /// The input array is never mutated; opt-in normalization and weighting
    /// run once on an internal working copy. Non-convergence and divergence
    /// are soft conditions reported through flags on the result and
    /// `log::warn!`, with the best solution found so far returned either way.
    pub fn fit<A: Scalar + Lapack>(
        cov: &CovarianceSet<A>,
        config: &OjobConfig<A>,
    ) -> Result<OjobResult<A>> {
        config.validate()?;
        let m = cov.m();
        let k = cov.k();
        if k < 3 && m < 2 {
            return Err(OjobError::config(
                "trials",
                format!(
                    "the problem is underdetermined for k = {k} trials of a single group; need k >= 3 or m >= 2"
                ),
            ));
        }

        let mut working: Cow<'_, CovarianceSet<A>> = Cow::Borrowed(cov);
        if config.trace_norm {
            working.to_mut().trace_normalize()?;
        }
        if let Some(weighting) = &config.weighting {
            working.to_mut().apply_weights(weighting.as_ref())?;
        }

        let (garr, whiteners) = if config.pre_white {
            let retained = resolve_subspace(working.as_ref(), config)?;
            let whiteners = (0..m)
                .map(|i| Whitener::fit(working.as_ref(), i, retained))
                .collect::<Result<Vec<_>>>()?;
            let white = whiten_covariances(working.as_ref(), &whiteners)?;
            (Cow::Owned(white), Some(whiteners))
        } else {
            if !working.dims_uniform() {
                return Err(OjobError::config(
                    "pre_white",
                    "groups have different dimensions; pre-whitening is required to reduce them to a common subspace",
                ));
            }
            (working, None)
        };
        let garr = garr.as_ref();
        let n = garr.dim(0);

        // Partner groups entering each group's accumulator. Identical length
        // for every group, which keeps the workspace a single fixed size.
        let partner_lists: Vec<Vec<usize>> = (0..m)
            .map(|i| {
                if m == 1 {
                    vec![0]
                } else {
                    (0..m).filter(|&j| j != i || config.full_model).collect()
                }
            })
            .collect();

        let mut us = initialize(garr, config, &partner_lists, n)?;

        let stacked = k * partner_lists[0].len();
        let mut ws = Workspace::<A>::new(n, stacked);

        let tol: A::Real = match config.tol {
            Some(t) => A::real(t),
            None => Float::sqrt(A::Real::epsilon()),
        };
        let mut state = ConvergenceState::new(tol, config.max_iter);

        while state.keep_going() {
            let mut sweep_acc = A::Real::zero();
            // Gauss-Seidel sweep: group i sees the already-updated transforms
            // of groups 1..i from this same sweep.
            for i in 0..m {
                for eta in 0..n {
                    let mut column = 0;
                    for &j in &partner_lists[i] {
                        for kappa in 0..k {
                            general_mat_vec_mul(
                                A::one(),
                                garr.get(kappa, i, j),
                                &us[j].column(eta),
                                A::zero(),
                                &mut ws.omega,
                            );
                            ws.proj.column_mut(column).assign(&ws.omega);
                            column += 1;
                        }
                    }
                    for c in 0..stacked {
                        for r in 0..n {
                            ws.proj_h[[c, r]] = ws.proj[[r, c]].conj();
                        }
                    }
                    general_mat_mul(A::one(), &ws.proj, &ws.proj_h, A::zero(), &mut ws.r);
                    general_mat_vec_mul(
                        A::one(),
                        &ws.r,
                        &us[i].column(eta),
                        A::zero(),
                        &mut ws.omega,
                    );
                    us[i].column_mut(eta).assign(&ws.omega);
                }
                for value in us[i].iter() {
                    sweep_acc = sweep_acc + value.square();
                }
                // The projection is what bounds the power iteration; without
                // it the column norms grow without limit.
                us[i] = nearest_orthogonal(&us[i])?;
            }
            let sweep_norm = Float::sqrt(sweep_acc / A::real(m));
            state.record(sweep_norm);
            if config.verbose {
                info!(
                    "ojob sweep {:4}: norm {:.6e}, relative change {:.3e}",
                    state.iteration, sweep_norm, state.conv
                );
            } else {
                debug!(
                    "ojob sweep {}: norm {:.6e}, relative change {:.3e}",
                    state.iteration, sweep_norm, state.conv
                );
            }
        }

        if state.diverging {
            warn!(
                "ojob solver observed a negative relative change ({:.3e}) at sweep {}; returning the current solution",
                state.conv, state.iteration
            );
        } else if !state.converged {
            warn!(
                "ojob solver reached the iteration cap ({}) before meeting tolerance {:.3e}; returning the best solution so far",
                config.max_iter, tol
            );
        }

        let diag_averages = if config.sort {
            Some(if m == 1 {
                resolve_single(&mut us[0], garr)
            } else {
                resolve_multi(&mut us, garr)
            })
        } else {
            None
        };

        let (transforms, unmixing): (Vec<_>, Vec<_>) = match &whiteners {
            Some(whiteners) => us
                .iter()
                .zip(whiteners)
                .map(|(u, w)| (w.forward.dot(u), adjoint(u).dot(&w.inverse)))
                .unzip(),
            None => us.iter().map(|u| (u.clone(), adjoint(u))).unzip(),
        };

        Ok(OjobResult {
            transforms,
            unmixing,
            diag_averages,
            iterations: state.iteration,
            conv: state.conv,
            converged: state.converged,
            diverged: state.diverging,
        })
    }
}

/// Starting transforms: caller seeds (projected orthogonal) or, by default,
/// the eigenvectors of the summed squared cross-covariances, a starting
/// point aligned with the dominant joint structure.
fn initialize<A: Scalar + Lapack>(
    garr: &CovarianceSet<A>,
    config: &OjobConfig<A>,
    partner_lists: &[Vec<usize>],
    n: usize,
) -> Result<Vec<Array2<A>>> {
    let m = garr.m();
    match &config.init {
        Some(seeds) => {
            if seeds.len() != m {
                return Err(OjobError::config(
                    "init",
                    format!("expected {m} seed matrices, got {}", seeds.len()),
                ));
            }
            seeds
                .iter()
                .map(|seed| {
                    if seed.dim() != (n, n) {
                        return Err(OjobError::config(
                            "init",
                            format!(
                                "seed matrices must be {n}×{n} in the solver's working space; got {:?}",
                                seed.dim()
                            ),
                        ));
                    }
                    nearest_orthogonal(seed)
                })
                .collect()
        }
        None => {
            let mut us = Vec::with_capacity(m);
            for (i, partners) in partner_lists.iter().enumerate() {
                let mut b = Array2::<A>::zeros((n, n));
                for &j in partners {
                    for kappa in 0..garr.k() {
                        let g = garr.get(kappa, i, j);
                        b += &g.dot(&adjoint(g));
                    }
                }
                let (_values, vectors) = b.eigh(UPLO::Upper)?;
                us.push(vectors);
            }
            Ok(us)
        }
    }
}

/// Resolve the retained pre-whitening dimension, common to every group.
fn resolve_subspace<A: Scalar + Lapack>(
    cov: &CovarianceSet<A>,
    config: &OjobConfig<A>,
) -> Result<usize> {
    match config.e_var {
        SubspaceSpec::Dimension(d) => {
            let min_dim = cov.dims().iter().copied().min().unwrap_or(0);
            if d == 0 || d > min_dim {
                return Err(OjobError::config(
                    "e_var",
                    format!("requested subspace dimension {d} is outside 1..={min_dim}"),
                ));
            }
            Ok(d)
        }
        SubspaceSpec::ExplainedVariance(target) => {
            if cov.dims_uniform() {
                let pooled = cov.pooled_average()?;
                let (spectrum, _) = eigh_descending(&pooled)?;
                Ok(select_dimension(&spectrum, target, config.e_var_meth))
            } else {
                // Mixed group dimensions: resolve per group and keep the
                // smallest answer so every group can honor it.
                let mut retained = usize::MAX;
                for i in 0..cov.m() {
                    let (spectrum, _) = eigh_descending(&cov.average_within(i))?;
                    retained = retained.min(select_dimension(&spectrum, target, config.e_var_meth));
                }
                Ok(retained)
            }
        }
    }
}

/// Reusable scratch for the sweep loop: the trial-stacked projection buffer,
/// its adjoint, the per-column accumulator, and a column vector. Freshly
/// sized per invocation; reused across columns and sweeps within one.
struct Workspace<A: Scalar> {
    /// Stacked projections `Ω`, one column per (partner, trial) pair; n × c.
    proj: Array2<A>,
    /// Conjugate transpose of `proj`; c × n.
    proj_h: Array2<A>,
    /// The accumulator `R_η = Σ Ω Ω^H`; n × n.
    r: Array2<A>,
    /// Column-sized scratch; n.
    omega: Array1<A>,
}

impl<A: Scalar> Workspace<A> {
    fn new(n: usize, stacked: usize) -> Self {
        Self {
            proj: Array2::zeros((n, stacked)),
            proj_h: Array2::zeros((stacked, n)),
            r: Array2::zeros((n, n)),
            omega: Array1::zeros(n),
        }
    }
}

/// Book-keeping for the sweep loop; created at loop entry, mutated once per
/// sweep, inspected after exit to decide the advisory warnings.
struct ConvergenceState<R: Float> {
    iteration: usize,
    conv: R,
    previous: R,
    tol: R,
    max_iter: usize,
    converged: bool,
    diverging: bool,
}

impl<R: Float> ConvergenceState<R> {
    fn new(tol: R, max_iter: usize) -> Self {
        Self {
            iteration: 0,
            conv: R::one(),
            previous: R::zero(),
            tol,
            max_iter,
            converged: false,
            diverging: false,
        }
    }

    fn keep_going(&self) -> bool {
        !self.converged && !self.diverging && self.iteration < self.max_iter
    }

    fn record(&mut self, sweep_norm: R) {
        self.iteration += 1;
        let mut conv = if self.iteration == 1 {
            // Defined as 1.0 to force at least two sweeps.
            R::one()
        } else {
            (sweep_norm - self.previous).abs() / self.previous
        };
        // Floating-point noise near convergence can nudge the metric a hair
        // below zero; clamp within tolerance instead of flagging divergence.
        if conv < R::zero() && conv >= -self.tol {
            conv = R::zero();
        }
        if conv.is_nan() || conv < R::zero() {
            self.diverging = true;
        } else if self.iteration > 1 && conv <= self.tol {
            self.converged = true;
        }
        self.previous = sweep_norm;
        self.conv = conv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn explained_variance_takes_the_group_minimum_for_mixed_dims() {
        // Group 0 spectrum 4,3,2,1 reaches 0.7 at two dimensions; group 1
        // spectrum 8,1,1 reaches it at one. The common subspace is the
        // minimum.
        let dims = [4usize, 3];
        let spectra: [&[f64]; 2] = [&[4.0, 3.0, 2.0, 1.0], &[8.0, 1.0, 1.0]];
        let cov = CovarianceSet::from_fn(1, &dims, |_, i, j| {
            if i == j {
                Array2::from_diag(&Array::from(spectra[i].to_vec()))
            } else {
                Array2::zeros((dims[i], dims[j]))
            }
        })
        .unwrap();

        let config = OjobConfig::<f64>::builder()
            .pre_white(true)
            .e_var(SubspaceSpec::ExplainedVariance(0.7))
            .build();
        assert_eq!(resolve_subspace(&cov, &config).unwrap(), 1);
    }

    #[test]
    fn requested_dimension_is_bounded_by_the_smallest_group() {
        let dims = [4usize, 3];
        let cov = CovarianceSet::from_fn(1, &dims, |_, i, j| {
            Array2::<f64>::eye(dims[i].max(dims[j]))
                .slice(ndarray::s![..dims[i], ..dims[j]])
                .to_owned()
        })
        .unwrap();
        let config = OjobConfig::<f64>::builder()
            .pre_white(true)
            .e_var(SubspaceSpec::Dimension(4))
            .build();
        assert!(resolve_subspace(&cov, &config).is_err());
    }

    #[test]
    fn convergence_needs_two_sweeps() {
        let mut state = ConvergenceState::new(1e-8_f64, 100);
        state.record(5.0);
        assert!((state.conv - 1.0).abs() < 1e-15);
        assert!(!state.converged);
        state.record(5.0);
        assert!(state.converged);
        assert!(!state.keep_going());
    }

    #[test]
    fn iteration_cap_stops_the_loop() {
        let mut state = ConvergenceState::new(1e-12_f64, 3);
        for step in 0..3 {
            assert!(state.keep_going());
            state.record(1.0 + (step as f64 + 1.0).recip());
        }
        assert!(!state.keep_going());
        assert!(!state.converged);
        assert_eq!(state.iteration, 3);
    }

    #[test]
    fn nan_metric_flags_divergence() {
        let mut state = ConvergenceState::new(1e-8_f64, 100);
        state.record(0.0);
        state.record(0.0); // 0/0 relative change
        assert!(state.diverging);
        assert!(!state.keep_going());
    }
}
