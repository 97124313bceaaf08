// src/covariance.rs

//! The 3-index covariance/cross-covariance array the solver consumes, plus
//! the standard estimator that builds one from raw data blocks.

use ndarray::{Array1, Array2, Axis};
use ndarray_linalg::Scalar;
use num_traits::Float;

use crate::config::TrialWeighting;
use crate::error::{OjobError, Result};
use crate::math::adjoint;

/// Which second-moment estimator to use when building a [`CovarianceSet`]
/// from raw data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Estimator {
    /// Mean-centered sample covariance with the `T - 1` denominator.
    #[default]
    SampleCovariance,
    /// Uncentered second moment with the `T` denominator.
    SecondMoment,
}

/// Orientation of the raw data blocks handed to the estimator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleAxis {
    /// Variables along rows, samples along columns (`n × T`).
    #[default]
    Columns,
    /// Samples along rows, variables along columns (`T × n`).
    Rows,
}

/// Options for [`CovarianceSet::estimate`].
#[derive(Clone)]
pub struct EstimatorOptions<A: Scalar = f64> {
    /// Estimator choice.
    pub estimator: Estimator,
    /// Which axis of the data blocks holds the samples.
    pub sample_axis: SampleAxis,
    /// Externally supplied means to subtract, one vector per group. `None`
    /// uses the per-trial sample mean (centered estimator only).
    pub means: Option<Vec<Array1<A>>>,
}

impl<A: Scalar> Default for EstimatorOptions<A> {
    fn default() -> Self {
        Self {
            estimator: Estimator::default(),
            sample_axis: SampleAxis::default(),
            means: None,
        }
    }
}

/// A 3-index collection of covariance and cross-covariance matrices, indexed
/// by trial `κ ∈ [0, k)` and group pair `(i, j) ∈ [0, m)²`; the entry at
/// `(κ, i, j)` is an `n_i × n_j` matrix.
///
/// Callers guarantee the pairing invariant `C[κ,i,j] = C[κ,j,i]^H` and that
/// within-group entries are Hermitian positive semi-definite; constructors
/// validate shapes only, never symmetry (violations surface later as
/// decomposition failures, which is the intended contract).
///
/// The array is read-only to the solver. The only mutations are the explicit
/// opt-in [`trace_normalize`](Self::trace_normalize) and
/// [`apply_weights`](Self::apply_weights) steps, which the solver performs
/// once on an internal working copy.
#[derive(Clone, Debug)]
pub struct CovarianceSet<A: Scalar> {
    trials: usize,
    dims: Vec<usize>,
    mats: Vec<Array2<A>>,
}

impl<A: Scalar> CovarianceSet<A> {
    /// Build the general `k × m × m` form. `mats` is laid out trial-major:
    /// the entry for `(κ, i, j)` sits at `(κ·m + i)·m + j`.
    pub fn new(trials: usize, dims: Vec<usize>, mats: Vec<Array2<A>>) -> Result<Self> {
        let m = dims.len();
        if trials == 0 || m == 0 {
            return Err(OjobError::MalformedInput(
                "need at least one trial and one group".into(),
            ));
        }
        if mats.len() != trials * m * m {
            return Err(OjobError::MalformedInput(format!(
                "expected {} matrices for k = {trials}, m = {m}; got {}",
                trials * m * m,
                mats.len()
            )));
        }
        for kappa in 0..trials {
            for i in 0..m {
                for j in 0..m {
                    let shape = mats[(kappa * m + i) * m + j].dim();
                    if shape != (dims[i], dims[j]) {
                        return Err(OjobError::MalformedInput(format!(
                            "entry (trial {kappa}, {i}, {j}) has shape {:?}, expected ({}, {})",
                            shape, dims[i], dims[j]
                        )));
                    }
                }
            }
        }
        Ok(Self { trials, dims, mats })
    }

    /// Single-group convenience form: `k` trial covariances of one group.
    pub fn from_trials(trials: Vec<Array2<A>>) -> Result<Self> {
        let k = trials.len();
        let n = trials.first().map_or(0, |c| c.nrows());
        Self::new(k, vec![n], trials)
    }

    /// Build an array by evaluating `f(κ, i, j)` for every entry.
    pub fn from_fn<F>(trials: usize, dims: &[usize], mut f: F) -> Result<Self>
    where
        F: FnMut(usize, usize, usize) -> Array2<A>,
    {
        let m = dims.len();
        let mut mats = Vec::with_capacity(trials * m * m);
        for kappa in 0..trials {
            for i in 0..m {
                for j in 0..m {
                    mats.push(f(kappa, i, j));
                }
            }
        }
        Self::new(trials, dims.to_vec(), mats)
    }

    /// Estimate the array from raw data blocks: `data[i][κ]` is the data
    /// matrix of group `i` at trial `κ`. All groups must share the trial
    /// count and, within each trial, the sample count.
    pub fn estimate(data: &[Vec<Array2<A>>], options: &EstimatorOptions<A>) -> Result<Self> {
        let m = data.len();
        if m == 0 {
            return Err(OjobError::MalformedInput("no data groups supplied".into()));
        }
        let k = data[0].len();
        if k == 0 || data.iter().any(|g| g.len() != k) {
            return Err(OjobError::MalformedInput(
                "every group must supply the same non-zero number of trials".into(),
            ));
        }
        if let Some(means) = &options.means {
            if means.len() != m {
                return Err(OjobError::MalformedInput(format!(
                    "expected {m} external mean vectors, got {}",
                    means.len()
                )));
            }
        }

        // Orient everything variables × samples once up front.
        let oriented: Vec<Vec<Array2<A>>> = data
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|x| match options.sample_axis {
                        SampleAxis::Columns => x.clone(),
                        SampleAxis::Rows => x.t().to_owned(),
                    })
                    .collect()
            })
            .collect();

        let dims: Vec<usize> = oriented.iter().map(|g| g[0].nrows()).collect();
        let mut mats = Vec::with_capacity(k * m * m);
        for kappa in 0..k {
            let samples = oriented[0][kappa].ncols();
            for (i, group) in oriented.iter().enumerate() {
                if group[kappa].dim() != (dims[i], samples) {
                    return Err(OjobError::MalformedInput(format!(
                        "group {i}, trial {kappa}: expected shape ({}, {samples}), got {:?}",
                        dims[i],
                        group[kappa].dim()
                    )));
                }
            }
            let centered: Vec<Array2<A>> = oriented
                .iter()
                .enumerate()
                .map(|(i, group)| center_block(&group[kappa], i, options))
                .collect::<Result<_>>()?;
            let denominator = match options.estimator {
                Estimator::SampleCovariance => {
                    if samples < 2 {
                        return Err(OjobError::MalformedInput(
                            "sample covariance needs at least 2 samples per trial".into(),
                        ));
                    }
                    A::real(samples - 1)
                }
                Estimator::SecondMoment => A::real(samples),
            };
            for i in 0..m {
                for j in 0..m {
                    let mut c = centered[i].dot(&adjoint(&centered[j]));
                    c.mapv_inplace(|v| v.div_real(denominator));
                    mats.push(c);
                }
            }
        }
        Self::new(k, dims, mats)
    }

    /// Number of trials `k`.
    pub fn k(&self) -> usize {
        self.trials
    }

    /// Number of groups `m`.
    pub fn m(&self) -> usize {
        self.dims.len()
    }

    /// Dimension `n_i` of group `i`.
    pub fn dim(&self, group: usize) -> usize {
        self.dims[group]
    }

    /// All group dimensions.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Whether every group has the same dimension.
    pub fn dims_uniform(&self) -> bool {
        self.dims.windows(2).all(|w| w[0] == w[1])
    }

    /// The matrix at `(trial, i, j)`.
    pub fn get(&self, trial: usize, i: usize, j: usize) -> &Array2<A> {
        let m = self.m();
        &self.mats[(trial * m + i) * m + j]
    }

    /// Trial-average of the within-group covariance of group `i`.
    pub fn average_within(&self, group: usize) -> Array2<A> {
        let n = self.dims[group];
        let mut mean = Array2::<A>::zeros((n, n));
        for kappa in 0..self.trials {
            mean += self.get(kappa, group, group);
        }
        let k = A::real(self.trials);
        mean.mapv_inplace(|v| v.div_real(k));
        mean
    }

    /// Trial-and-group average of the within-group covariances. Requires all
    /// groups to share one dimension.
    pub fn pooled_average(&self) -> Result<Array2<A>> {
        if !self.dims_uniform() {
            return Err(OjobError::MalformedInput(
                "pooled average covariance needs uniform group dimensions".into(),
            ));
        }
        let n = self.dims[0];
        let mut mean = Array2::<A>::zeros((n, n));
        for kappa in 0..self.trials {
            for i in 0..self.m() {
                mean += self.get(kappa, i, i);
            }
        }
        let count = A::real(self.trials * self.m());
        mean.mapv_inplace(|v| v.div_real(count));
        Ok(mean)
    }

    /// One-shot opt-in normalization: scale every entry so within-group
    /// traces become unity, i.e. `C[κ,i,j] /= sqrt(tr C[κ,i,i] · tr C[κ,j,j])`.
    pub fn trace_normalize(&mut self) -> Result<()> {
        let m = self.m();
        for kappa in 0..self.trials {
            let traces: Vec<A::Real> = (0..m)
                .map(|i| self.get(kappa, i, i).diag().iter().map(|v| v.re()).fold(
                    <A::Real as num_traits::Zero>::zero(),
                    |acc, v| acc + v,
                ))
                .collect();
            for (i, trace) in traces.iter().enumerate() {
                if !(*trace > <A::Real as num_traits::Zero>::zero()) {
                    return Err(OjobError::MalformedInput(format!(
                        "trace normalization needs positive within-group traces; trial {kappa}, group {i} has trace {trace}"
                    )));
                }
            }
            for i in 0..m {
                for j in 0..m {
                    let scale = Float::sqrt(traces[i] * traces[j]);
                    self.mats[(kappa * m + i) * m + j].mapv_inplace(|v| v.div_real(scale));
                }
            }
        }
        Ok(())
    }

    /// One-shot opt-in weighting: scale `C[κ,i,j]` by `sqrt(w(κ,i) · w(κ,j))`.
    pub fn apply_weights(&mut self, weighting: &dyn TrialWeighting) -> Result<()> {
        let m = self.m();
        for kappa in 0..self.trials {
            let weights: Vec<f64> = (0..m).map(|i| weighting.weight(kappa, i)).collect();
            for (i, w) in weights.iter().enumerate() {
                if !(w.is_finite() && *w >= 0.0) {
                    return Err(OjobError::config(
                        "weighting",
                        format!("weight for trial {kappa}, group {i} is {w}; weights must be finite and non-negative"),
                    ));
                }
            }
            for i in 0..m {
                for j in 0..m {
                    let scale = A::real((weights[i] * weights[j]).sqrt());
                    self.mats[(kappa * m + i) * m + j].mapv_inplace(|v| v.mul_real(scale));
                }
            }
        }
        Ok(())
    }
}

fn center_block<A: Scalar>(
    x: &Array2<A>,
    group: usize,
    options: &EstimatorOptions<A>,
) -> Result<Array2<A>> {
    let external = options.means.as_ref().map(|means| &means[group]);
    match (options.estimator, external) {
        (Estimator::SecondMoment, None) => Ok(x.clone()),
        (_, Some(mean)) => {
            if mean.len() != x.nrows() {
                return Err(OjobError::MalformedInput(format!(
                    "external mean for group {group} has length {}, expected {}",
                    mean.len(),
                    x.nrows()
                )));
            }
            Ok(x - &mean.clone().insert_axis(Axis(1)))
        }
        (Estimator::SampleCovariance, None) => {
            let mean = x
                .mean_axis(Axis(1))
                .ok_or_else(|| OjobError::MalformedInput("empty data block".into()))?;
            Ok(x - &mean.insert_axis(Axis(1)))
        }
    }
}
