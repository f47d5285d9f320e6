use crate::error::EstimatorError;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp1, StandardNormal};
use statrs::function::gamma::{digamma, ln_gamma};

/// A parameterized distribution family q(x | φ) over a flat parameter slice.
///
/// `score` is the parameter gradient of the log-density, ∇φ log q(x|φ),
/// evaluated at a sampled point — the quantity the score-function estimator
/// multiplies by the cost. `log_prob_dx` is the derivative in the argument,
/// defined only for continuous families.
///
/// Families are shared read-only across draw threads, hence `Sync`.
pub trait Family: Sync {
    fn name(&self) -> &'static str;

    fn param_count(&self) -> usize;

    fn sample(&self, params: &[f64], rng: &mut ChaCha8Rng) -> Result<f64, EstimatorError>;

    fn log_prob(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError>;

    /// ∇φ log q(x | φ).
    fn score(&self, params: &[f64], x: f64) -> Result<Vec<f64>, EstimatorError>;

    /// ∂/∂x log q(x | φ).
    fn log_prob_dx(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError>;

    /// The pathwise form of this family, if one exists.
    fn reparam(&self) -> Option<&dyn Reparam> {
        None
    }
}

/// A differentiable reparameterization: a fixed base-noise distribution and
/// a parameter-dependent map T(ε, φ) whose output has the family's law.
pub trait Reparam {
    fn sample_noise(&self, rng: &mut ChaCha8Rng) -> f64;

    fn transform(&self, params: &[f64], eps: f64) -> f64;

    /// ∂T/∂φ at fixed noise.
    fn transform_grad(&self, params: &[f64], eps: f64) -> Vec<f64>;
}

const HALF_LN_TAU: f64 = 0.918_938_533_204_672_8;

fn check_positive(
    family: &'static str,
    name: &'static str,
    value: f64,
) -> Result<(), EstimatorError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(EstimatorError::InvalidParameter {
            family,
            name,
            value,
        })
    }
}

// ── Normal [mean, std] — location-scale, reparameterized ────────────

/// Normal(μ, σ), params = [μ, σ].
///
/// Reparameterization: z = μ + σ·ε with ε ~ N(0, 1); ∂z/∂μ = 1, ∂z/∂σ = ε.
#[derive(Debug, Clone, Copy)]
pub struct Normal;

impl Family for Normal {
    fn name(&self) -> &'static str {
        "Normal"
    }

    fn param_count(&self) -> usize {
        2
    }

    fn sample(&self, params: &[f64], rng: &mut ChaCha8Rng) -> Result<f64, EstimatorError> {
        check_positive(self.name(), "std", params[1])?;
        let eps: f64 = StandardNormal.sample(rng);
        Ok(params[0] + params[1] * eps)
    }

    fn log_prob(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        let (mu, sigma) = (params[0], params[1]);
        check_positive(self.name(), "std", sigma)?;
        let z = (x - mu) / sigma;
        Ok(-0.5 * z * z - sigma.ln() - HALF_LN_TAU)
    }

    fn score(&self, params: &[f64], x: f64) -> Result<Vec<f64>, EstimatorError> {
        let (mu, sigma) = (params[0], params[1]);
        check_positive(self.name(), "std", sigma)?;
        let diff = x - mu;
        let s2 = sigma * sigma;
        Ok(vec![diff / s2, diff * diff / (s2 * sigma) - 1.0 / sigma])
    }

    fn log_prob_dx(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        let (mu, sigma) = (params[0], params[1]);
        check_positive(self.name(), "std", sigma)?;
        Ok(-(x - mu) / (sigma * sigma))
    }

    fn reparam(&self) -> Option<&dyn Reparam> {
        Some(&NormalReparam)
    }
}

struct NormalReparam;

impl Reparam for NormalReparam {
    fn sample_noise(&self, rng: &mut ChaCha8Rng) -> f64 {
        StandardNormal.sample(rng)
    }

    fn transform(&self, params: &[f64], eps: f64) -> f64 {
        params[0] + params[1] * eps
    }

    fn transform_grad(&self, _params: &[f64], eps: f64) -> Vec<f64> {
        vec![1.0, eps]
    }
}

// ── LogScaleNormal [mean, log-std] — unconstrained guide form ───────

/// Normal(μ, e^ρ), params = [μ, ρ].
///
/// Every parameter vector is valid, which keeps gradient-ascent steps from
/// leaving the family; this is the guide parameterization used by the SVI
/// driver instead of a constrained σ.
#[derive(Debug, Clone, Copy)]
pub struct LogScaleNormal;

impl Family for LogScaleNormal {
    fn name(&self) -> &'static str {
        "LogScaleNormal"
    }

    fn param_count(&self) -> usize {
        2
    }

    fn sample(&self, params: &[f64], rng: &mut ChaCha8Rng) -> Result<f64, EstimatorError> {
        let eps: f64 = StandardNormal.sample(rng);
        Ok(params[0] + params[1].exp() * eps)
    }

    fn log_prob(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        let (mu, rho) = (params[0], params[1]);
        let z = (x - mu) * (-rho).exp();
        Ok(-0.5 * z * z - rho - HALF_LN_TAU)
    }

    fn score(&self, params: &[f64], x: f64) -> Result<Vec<f64>, EstimatorError> {
        let (mu, rho) = (params[0], params[1]);
        let inv_var = (-2.0 * rho).exp();
        let diff = x - mu;
        Ok(vec![diff * inv_var, diff * diff * inv_var - 1.0])
    }

    fn log_prob_dx(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        let (mu, rho) = (params[0], params[1]);
        Ok(-(x - mu) * (-2.0 * rho).exp())
    }

    fn reparam(&self) -> Option<&dyn Reparam> {
        Some(&LogScaleNormalReparam)
    }
}

struct LogScaleNormalReparam;

impl Reparam for LogScaleNormalReparam {
    fn sample_noise(&self, rng: &mut ChaCha8Rng) -> f64 {
        StandardNormal.sample(rng)
    }

    fn transform(&self, params: &[f64], eps: f64) -> f64 {
        params[0] + params[1].exp() * eps
    }

    fn transform_grad(&self, params: &[f64], eps: f64) -> Vec<f64> {
        // ∂z/∂ρ = e^ρ · ε
        vec![1.0, params[1].exp() * eps]
    }
}

// ── Exponential [rate] — reparameterized via Exp(1) base noise ──────

/// Exponential(λ), params = [λ].
///
/// Reparameterization: z = ε/λ with ε ~ Exp(1); ∂z/∂λ = -ε/λ².
#[derive(Debug, Clone, Copy)]
pub struct Exponential;

impl Family for Exponential {
    fn name(&self) -> &'static str {
        "Exponential"
    }

    fn param_count(&self) -> usize {
        1
    }

    fn sample(&self, params: &[f64], rng: &mut ChaCha8Rng) -> Result<f64, EstimatorError> {
        check_positive(self.name(), "rate", params[0])?;
        let eps: f64 = Exp1.sample(rng);
        Ok(eps / params[0])
    }

    fn log_prob(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        let rate = params[0];
        check_positive(self.name(), "rate", rate)?;
        if x < 0.0 {
            return Err(EstimatorError::UndefinedDensity {
                family: self.name(),
                value: x,
            });
        }
        Ok(rate.ln() - rate * x)
    }

    fn score(&self, params: &[f64], x: f64) -> Result<Vec<f64>, EstimatorError> {
        let rate = params[0];
        check_positive(self.name(), "rate", rate)?;
        if x < 0.0 {
            return Err(EstimatorError::UndefinedDensity {
                family: self.name(),
                value: x,
            });
        }
        Ok(vec![1.0 / rate - x])
    }

    fn log_prob_dx(&self, params: &[f64], _x: f64) -> Result<f64, EstimatorError> {
        check_positive(self.name(), "rate", params[0])?;
        Ok(-params[0])
    }

    fn reparam(&self) -> Option<&dyn Reparam> {
        Some(&ExponentialReparam)
    }
}

struct ExponentialReparam;

impl Reparam for ExponentialReparam {
    fn sample_noise(&self, rng: &mut ChaCha8Rng) -> f64 {
        Exp1.sample(rng)
    }

    fn transform(&self, params: &[f64], eps: f64) -> f64 {
        eps / params[0]
    }

    fn transform_grad(&self, params: &[f64], eps: f64) -> Vec<f64> {
        vec![-eps / (params[0] * params[0])]
    }
}

// ── Bernoulli [p] — discrete, score-function only ───────────────────

/// Bernoulli(p) over {0, 1}, params = [p].
///
/// No differentiable reparameterization exists; p at the boundary of (0, 1)
/// makes the score undefined and is rejected.
#[derive(Debug, Clone, Copy)]
pub struct Bernoulli;

impl Bernoulli {
    fn check_p(&self, p: f64) -> Result<(), EstimatorError> {
        if p > 0.0 && p < 1.0 {
            Ok(())
        } else {
            Err(EstimatorError::InvalidParameter {
                family: "Bernoulli",
                name: "p",
                value: p,
            })
        }
    }

    fn check_support(&self, x: f64) -> Result<(), EstimatorError> {
        if x == 0.0 || x == 1.0 {
            Ok(())
        } else {
            Err(EstimatorError::UndefinedDensity {
                family: "Bernoulli",
                value: x,
            })
        }
    }
}

impl Family for Bernoulli {
    fn name(&self) -> &'static str {
        "Bernoulli"
    }

    fn param_count(&self) -> usize {
        1
    }

    fn sample(&self, params: &[f64], rng: &mut ChaCha8Rng) -> Result<f64, EstimatorError> {
        let p = params[0];
        self.check_p(p)?;
        Ok(if rng.gen::<f64>() < p { 1.0 } else { 0.0 })
    }

    fn log_prob(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        let p = params[0];
        self.check_p(p)?;
        self.check_support(x)?;
        Ok(if x == 1.0 { p.ln() } else { (1.0 - p).ln() })
    }

    fn score(&self, params: &[f64], x: f64) -> Result<Vec<f64>, EstimatorError> {
        let p = params[0];
        self.check_p(p)?;
        self.check_support(x)?;
        Ok(vec![if x == 1.0 { 1.0 / p } else { -1.0 / (1.0 - p) }])
    }

    fn log_prob_dx(&self, _params: &[f64], _x: f64) -> Result<f64, EstimatorError> {
        Err(EstimatorError::NotDifferentiable {
            family: self.name(),
        })
    }
}

// ── Poisson [rate] — discrete, score-function only ──────────────────

/// Poisson(λ) over {0, 1, 2, ...}, params = [λ].
#[derive(Debug, Clone, Copy)]
pub struct Poisson;

impl Poisson {
    fn check_support(&self, x: f64) -> Result<(), EstimatorError> {
        if x >= 0.0 && x.fract() == 0.0 {
            Ok(())
        } else {
            Err(EstimatorError::UndefinedDensity {
                family: "Poisson",
                value: x,
            })
        }
    }
}

impl Family for Poisson {
    fn name(&self) -> &'static str {
        "Poisson"
    }

    fn param_count(&self) -> usize {
        1
    }

    fn sample(&self, params: &[f64], rng: &mut ChaCha8Rng) -> Result<f64, EstimatorError> {
        let rate = params[0];
        check_positive(self.name(), "rate", rate)?;
        let dist = rand_distr::Poisson::new(rate).map_err(|_| EstimatorError::InvalidParameter {
            family: self.name(),
            name: "rate",
            value: rate,
        })?;
        Ok(dist.sample(rng))
    }

    fn log_prob(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        let rate = params[0];
        check_positive(self.name(), "rate", rate)?;
        self.check_support(x)?;
        Ok(x * rate.ln() - rate - ln_gamma(x + 1.0))
    }

    fn score(&self, params: &[f64], x: f64) -> Result<Vec<f64>, EstimatorError> {
        let rate = params[0];
        check_positive(self.name(), "rate", rate)?;
        self.check_support(x)?;
        Ok(vec![x / rate - 1.0])
    }

    fn log_prob_dx(&self, _params: &[f64], _x: f64) -> Result<f64, EstimatorError> {
        Err(EstimatorError::NotDifferentiable {
            family: self.name(),
        })
    }
}

// ── Gamma [shape, rate] — continuous, score-function only ───────────

/// Gamma(α, β) with rate parameterization, params = [α, β].
///
/// No single differentiable base-noise transform covers all shapes, so the
/// family is score-function only; the shape score needs the digamma
/// function.
#[derive(Debug, Clone, Copy)]
pub struct Gamma;

impl Gamma {
    fn check_params(&self, params: &[f64]) -> Result<(), EstimatorError> {
        check_positive("Gamma", "shape", params[0])?;
        check_positive("Gamma", "rate", params[1])
    }
}

impl Family for Gamma {
    fn name(&self) -> &'static str {
        "Gamma"
    }

    fn param_count(&self) -> usize {
        2
    }

    fn sample(&self, params: &[f64], rng: &mut ChaCha8Rng) -> Result<f64, EstimatorError> {
        self.check_params(params)?;
        let dist = rand_distr::Gamma::new(params[0], 1.0 / params[1]).map_err(|_| {
            EstimatorError::InvalidParameter {
                family: self.name(),
                name: "shape",
                value: params[0],
            }
        })?;
        Ok(dist.sample(rng))
    }

    fn log_prob(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        self.check_params(params)?;
        if x <= 0.0 {
            return Err(EstimatorError::UndefinedDensity {
                family: self.name(),
                value: x,
            });
        }
        let (shape, rate) = (params[0], params[1]);
        Ok(shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x)
    }

    fn score(&self, params: &[f64], x: f64) -> Result<Vec<f64>, EstimatorError> {
        self.check_params(params)?;
        if x <= 0.0 {
            return Err(EstimatorError::UndefinedDensity {
                family: self.name(),
                value: x,
            });
        }
        let (shape, rate) = (params[0], params[1]);
        Ok(vec![
            rate.ln() - digamma(shape) + x.ln(),
            shape / rate - x,
        ])
    }

    fn log_prob_dx(&self, params: &[f64], x: f64) -> Result<f64, EstimatorError> {
        self.check_params(params)?;
        if x <= 0.0 {
            return Err(EstimatorError::UndefinedDensity {
                family: self.name(),
                value: x,
            });
        }
        Ok((params[0] - 1.0) / x - params[1])
    }
}
