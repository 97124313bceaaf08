// src/config.rs

//! Configuration for the OJoB solver.

use std::sync::Arc;

use ndarray::Array2;
use ndarray_linalg::Scalar;

use crate::error::{OjobError, Result};

/// How the retained subspace size is chosen when pre-whitening is active.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SubspaceSpec {
    /// Keep exactly this many dimensions in every group.
    Dimension(usize),
    /// Keep the smallest dimension whose cumulative normalized spectrum
    /// reaches this explained-variance fraction, in `(0, 1]`.
    ExplainedVariance(f64),
}

impl Default for SubspaceSpec {
    fn default() -> Self {
        SubspaceSpec::ExplainedVariance(0.999)
    }
}

/// Search strategy over the cumulative-eigenvalue sequence when resolving an
/// explained-variance target into a dimension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VarianceSearch {
    /// First index whose cumulative fraction meets or exceeds the target.
    #[default]
    First,
    /// Index whose cumulative fraction is closest to the target.
    Nearest,
}

/// Per-trial, per-group weighting strategy applied once to a working copy of
/// the covariance array before solving. Cross-covariances between groups
/// `i` and `j` at trial `κ` are scaled by `sqrt(w(κ,i) · w(κ,j))`, which is
/// equivalent to scaling the underlying data blocks by `sqrt(w)`.
pub trait TrialWeighting {
    /// Non-negative weight for one (trial, group) cell.
    fn weight(&self, trial: usize, group: usize) -> f64;
}

/// The default strategy: every trial and group counts the same.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoWeighting;

impl TrialWeighting for NoWeighting {
    fn weight(&self, _trial: usize, _group: usize) -> f64 {
        1.0
    }
}

/// Configuration parameters for [`crate::Ojob::fit`].
///
/// Generic over the working scalar so caller-seeded starting transforms can
/// be real or complex; defaults to `f64`.
#[derive(Clone)]
pub struct OjobConfig<A: Scalar = f64> {
    /// Include the within-group terms `j = i` in the objective and updates.
    pub full_model: bool,

    /// Enable the dimensionality-reducing pre-whitening stage. This relaxes
    /// the orthogonality constraint to an invertibility-plus-scaling
    /// constraint expressed in the whitened basis.
    pub pre_white: bool,

    /// Run the ambiguity resolver after the solver terminates (default on).
    /// When disabled, the column order and signs of the returned transforms
    /// are arbitrary and no diagonal-average sequence is produced.
    pub sort: bool,

    /// Scale every covariance once, before solving, so within-group traces
    /// are unity. The caller's array is never mutated.
    pub trace_norm: bool,

    /// Caller-seeded starting transforms, one square matrix per group, sized
    /// to the solver's working space (the retained subspace when pre-whitening
    /// is active). Seeds are projected to the nearest orthogonal matrix before
    /// iterating. `None` selects the eigenvector-based initialization.
    pub init: Option<Vec<Array2<A>>>,

    /// Relative-change convergence tolerance. `None` defaults to the square
    /// root of machine epsilon for the working precision.
    pub tol: Option<f64>,

    /// Iteration cap. Reaching it is a soft condition: the best solution so
    /// far is returned with a warning, never an error.
    pub max_iter: usize,

    /// Emit per-sweep progress at `info` level instead of `debug`.
    pub verbose: bool,

    /// Subspace-size specifier for pre-whitening.
    pub e_var: SubspaceSpec,

    /// Search strategy used to resolve an explained-variance target.
    pub e_var_meth: VarianceSearch,

    /// Optional per-trial/group weighting applied before solving.
    pub weighting: Option<Arc<dyn TrialWeighting + Send + Sync>>,
}

impl<A: Scalar> Default for OjobConfig<A> {
    fn default() -> Self {
        Self {
            full_model: false,
            pre_white: false,
            sort: true,
            trace_norm: false,
            init: None,
            tol: None,
            max_iter: 1000,
            verbose: false,
            e_var: SubspaceSpec::default(),
            e_var_meth: VarianceSearch::default(),
            weighting: None,
        }
    }
}

impl<A: Scalar> OjobConfig<A> {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a configuration.
    pub fn builder() -> ConfigBuilder<A> {
        ConfigBuilder::new()
    }

    /// Validate the configuration. Called by the solver before any
    /// computation; also usable standalone.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(OjobError::config("max_iter", "must be at least 1"));
        }
        if let Some(tol) = self.tol {
            if !(tol > 0.0 && tol.is_finite()) {
                return Err(OjobError::config("tol", "must be positive and finite"));
            }
        }
        match self.e_var {
            SubspaceSpec::Dimension(0) => {
                return Err(OjobError::config("e_var", "subspace dimension must be at least 1"));
            }
            SubspaceSpec::ExplainedVariance(f) if !(f > 0.0 && f <= 1.0) => {
                return Err(OjobError::config(
                    "e_var",
                    "explained-variance target must lie in (0, 1]",
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Builder for [`OjobConfig`] with a fluent API.
pub struct ConfigBuilder<A: Scalar = f64> {
    config: OjobConfig<A>,
}

impl<A: Scalar> Default for ConfigBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Scalar> ConfigBuilder<A> {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: OjobConfig::default(),
        }
    }

    /// Include within-group terms in the objective and updates.
    pub fn full_model(mut self, full_model: bool) -> Self {
        self.config.full_model = full_model;
        self
    }

    /// Enable or disable the pre-whitening stage.
    pub fn pre_white(mut self, pre_white: bool) -> Self {
        self.config.pre_white = pre_white;
        self
    }

    /// Enable or disable the post-hoc ambiguity resolver.
    pub fn sort(mut self, sort: bool) -> Self {
        self.config.sort = sort;
        self
    }

    /// Enable or disable trace normalization of the covariance array.
    pub fn trace_norm(mut self, trace_norm: bool) -> Self {
        self.config.trace_norm = trace_norm;
        self
    }

    /// Seed the solver with caller-supplied starting transforms.
    pub fn init(mut self, init: Vec<Array2<A>>) -> Self {
        self.config.init = Some(init);
        self
    }

    /// Set the convergence tolerance.
    pub fn tol(mut self, tol: f64) -> Self {
        self.config.tol = Some(tol);
        self
    }

    /// Set the iteration cap.
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.config.max_iter = max_iter;
        self
    }

    /// Enable or disable per-sweep progress reporting.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Set the subspace-size specifier for pre-whitening.
    pub fn e_var(mut self, e_var: SubspaceSpec) -> Self {
        self.config.e_var = e_var;
        self
    }

    /// Set the explained-variance search strategy.
    pub fn e_var_meth(mut self, e_var_meth: VarianceSearch) -> Self {
        self.config.e_var_meth = e_var_meth;
        self
    }

    /// Set the per-trial/group weighting strategy.
    pub fn weighting(mut self, weighting: Arc<dyn TrialWeighting + Send + Sync>) -> Self {
        self.config.weighting = Some(weighting);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> OjobConfig<A> {
        self.config
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<OjobConfig<A>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = OjobConfig::<f64>::default();
        assert!(!config.full_model);
        assert!(!config.pre_white);
        assert!(config.sort);
        assert_eq!(config.max_iter, 1000);
        assert_eq!(config.e_var, SubspaceSpec::ExplainedVariance(0.999));
        assert_eq!(config.e_var_meth, VarianceSearch::First);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let config = OjobConfig::<f64>::builder()
            .full_model(true)
            .pre_white(true)
            .e_var(SubspaceSpec::Dimension(3))
            .max_iter(50)
            .tol(1e-9)
            .build_validated()
            .unwrap();
        assert!(config.full_model);
        assert!(config.pre_white);
        assert_eq!(config.e_var, SubspaceSpec::Dimension(3));
        assert_eq!(config.max_iter, 50);
        assert_eq!(config.tol, Some(1e-9));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(OjobConfig::<f64>::builder()
            .max_iter(0)
            .build_validated()
            .is_err());
        assert!(OjobConfig::<f64>::builder()
            .tol(-1.0)
            .build_validated()
            .is_err());
        assert!(OjobConfig::<f64>::builder()
            .e_var(SubspaceSpec::ExplainedVariance(1.5))
            .build_validated()
            .is_err());
        assert!(OjobConfig::<f64>::builder()
            .e_var(SubspaceSpec::Dimension(0))
            .build_validated()
            .is_err());
    }

    #[test]
    fn no_weighting_is_unit() {
        assert_eq!(NoWeighting.weight(3, 1), 1.0);
    }
}
