use crate::autodiff::grad;
use crate::distributions::Family;
use crate::error::EstimatorError;
use crate::graph::Graph;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// How to estimate ∇φ E_q[cost(z, φ)].
///
/// The two estimators are mutually exclusive: `Auto` picks the pathwise
/// form exactly when the family admits a differentiable reparameterization
/// and falls back to the score-function form otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Pathwise,
    ScoreFunction,
    Auto,
}

/// Configuration for the averaging estimator.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    pub num_draws: usize,
    pub seed: u64,
    /// Number of threads. 0 means use Rayon's default (all cores).
    pub num_threads: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            num_draws: 1000,
            seed: 42,
            num_threads: 0,
        }
    }
}

/// Monte Carlo gradient estimate averaged over independent draws.
#[derive(Debug, Clone)]
pub struct GradEstimate {
    /// Per-component mean of the per-draw estimates.
    pub grad: Vec<f64>,
    /// Per-component Monte Carlo standard error (std / √n).
    pub std_err: Vec<f64>,
    pub num_draws: usize,
}

/// Resolve `Auto` against the family's reparameterizability.
pub fn resolve(strategy: Strategy, family: &dyn Family) -> Strategy {
    match strategy {
        Strategy::Auto => {
            if family.reparam().is_some() {
                Strategy::Pathwise
            } else {
                Strategy::ScoreFunction
            }
        }
        other => other,
    }
}

/// One pathwise (reparameterization) draw of ∇φ E_q[cost(z, φ)].
///
/// Draws base noise ε, pushes it through z = T(ε, φ), and differentiates
/// the composed cost:
///
///   g_k = ∂cost/∂φ_k |_z  +  ∂cost/∂z · ∂T/∂φ_k
pub fn pathwise_draw(
    cost: &Graph,
    family: &dyn Family,
    params: &[f64],
    rng: &mut ChaCha8Rng,
) -> Result<Vec<f64>, EstimatorError> {
    let rp = family
        .reparam()
        .ok_or(EstimatorError::NotReparameterizable {
            family: family.name(),
        })?;

    let eps = rp.sample_noise(rng);
    let z = rp.transform(params, eps);
    let dz = rp.transform_grad(params, eps);

    let res = grad(cost, params, &[z]);
    Ok(res
        .wrt_params
        .iter()
        .zip(dz.iter())
        .map(|(direct, path)| direct + res.wrt_inputs[0] * path)
        .collect())
}

/// One score-function (likelihood-ratio) draw of ∇φ E_q[cost(z, φ)].
///
/// Uses ∇φ q = q · ∇φ log q to turn the gradient into an expectation under
/// q itself:
///
///   g_k = ∇φ_k log q(z|φ) · (cost(z, φ) − b)  +  ∂cost/∂φ_k |_z
///
/// The baseline `b` is free: E[∇φ log q] = 0, so subtracting it changes
/// only the variance. Pass 0.0 for the plain estimator.
pub fn score_function_draw(
    cost: &Graph,
    family: &dyn Family,
    params: &[f64],
    baseline: f64,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<f64>, EstimatorError> {
    let z = family.sample(params, rng)?;
    let s = family.score(params, z)?;
    let res = grad(cost, params, &[z]);
    let centered = res.value - baseline;
    Ok(s
        .iter()
        .zip(res.wrt_params.iter())
        .map(|(score_k, direct)| score_k * centered + direct)
        .collect())
}

/// All per-draw estimates, one row per independent draw.
///
/// Draws run in parallel; each gets a deterministic RNG seeded from
/// `config.seed + draw_index`, so results are reproducible regardless of
/// thread scheduling.
pub fn estimate_draws(
    cost: &Graph,
    family: &dyn Family,
    params: &[f64],
    strategy: Strategy,
    config: &EstimatorConfig,
) -> Result<Vec<Vec<f64>>, EstimatorError> {
    if config.num_draws == 0 {
        return Err(EstimatorError::NoDraws);
    }
    if config.num_threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build_global()
            .ok();
    }

    let strategy = resolve(strategy, family);
    if strategy == Strategy::Pathwise && family.reparam().is_none() {
        return Err(EstimatorError::NotReparameterizable {
            family: family.name(),
        });
    }

    (0..config.num_draws)
        .into_par_iter()
        .map(|i| {
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed + i as u64);
            match strategy {
                Strategy::Pathwise => pathwise_draw(cost, family, params, &mut rng),
                Strategy::ScoreFunction => {
                    score_function_draw(cost, family, params, 0.0, &mut rng)
                }
                Strategy::Auto => unreachable!("resolved above"),
            }
        })
        .collect()
}

/// Unbiased Monte Carlo estimate of ∇φ E_q[cost(z, φ)], averaged over
/// `config.num_draws` independent draws.
pub fn estimate(
    cost: &Graph,
    family: &dyn Family,
    params: &[f64],
    strategy: Strategy,
    config: &EstimatorConfig,
) -> Result<GradEstimate, EstimatorError> {
    let draws = estimate_draws(cost, family, params, strategy, config)?;
    let n = draws.len();
    let dim = params.len();

    let mut mean = vec![0.0; dim];
    for row in &draws {
        for (m, v) in mean.iter_mut().zip(row.iter()) {
            *m += v;
        }
    }
    for m in &mut mean {
        *m /= n as f64;
    }

    let mut std_err = vec![0.0; dim];
    if n > 1 {
        for row in &draws {
            for ((se, v), m) in std_err.iter_mut().zip(row.iter()).zip(mean.iter()) {
                let d = v - m;
                *se += d * d;
            }
        }
        for se in &mut std_err {
            *se = (*se / (n - 1) as f64 / n as f64).sqrt();
        }
    }

    Ok(GradEstimate {
        grad: mean,
        std_err,
        num_draws: n,
    })
}

/// Exponential moving average of observed cost values, used as a
/// score-function baseline.
#[derive(Debug, Clone)]
pub struct DecayingAvgBaseline {
    beta: f64,
    avg: f64,
    initialized: bool,
}

impl DecayingAvgBaseline {
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            avg: 0.0,
            initialized: false,
        }
    }

    pub fn value(&self) -> f64 {
        self.avg
    }

    pub fn update(&mut self, observed: f64) {
        if self.initialized {
            self.avg = self.beta * self.avg + (1.0 - self.beta) * observed;
        } else {
            self.avg = observed;
            self.initialized = true;
        }
    }
}
