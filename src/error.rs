//! Error types for estimator and distribution operations.

use thiserror::Error;

/// Errors that can occur while sampling, scoring, or estimating gradients.
#[derive(Debug, Clone, Error)]
pub enum EstimatorError {
    /// Distribution parameter outside its valid range.
    #[error("invalid {family} parameter {name} = {value}")]
    InvalidParameter {
        family: &'static str,
        name: &'static str,
        value: f64,
    },

    /// Density (or its parameter gradient) undefined at the given point.
    #[error("{family} density undefined at x = {value}")]
    UndefinedDensity { family: &'static str, value: f64 },

    /// Pathwise estimation requested for a family without a
    /// differentiable reparameterization.
    #[error("{family} admits no differentiable reparameterization")]
    NotReparameterizable { family: &'static str },

    /// The density is not differentiable in its argument (discrete support).
    #[error("{family} log-density is not differentiable in x")]
    NotDifferentiable { family: &'static str },

    /// An estimate was requested over zero draws.
    #[error("draw count must be positive")]
    NoDraws,
}
