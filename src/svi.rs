use crate::distributions::Family;
use crate::elbo::elbo_grad_draw;
use crate::error::EstimatorError;
use crate::estimator::{resolve, DecayingAvgBaseline, Strategy};
use crate::graph::Graph;
use crate::progress::{spawn_progress_thread, ProgressState};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Adam optimizer, stepping in the ascent direction (the ELBO is
/// maximized, not minimized).
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
}

impl Adam {
    pub fn new(learning_rate: f64, dim: usize) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: vec![0.0; dim],
            v: vec![0.0; dim],
            t: 0,
        }
    }

    /// One moment-corrected ascent step along `grad`.
    pub fn ascent_step(&mut self, params: &mut [f64], grad: &[f64]) {
        self.t += 1;
        let b1_corr = 1.0 - self.beta1.powi(self.t as i32);
        let b2_corr = 1.0 - self.beta2.powi(self.t as i32);

        for i in 0..params.len() {
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * grad[i];
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * grad[i] * grad[i];
            let m_hat = self.m[i] / b1_corr;
            let v_hat = self.v[i] / b2_corr;
            params[i] += self.learning_rate * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Configuration for the SVI driver.
#[derive(Debug, Clone)]
pub struct SviConfig {
    pub num_steps: usize,
    /// Independent draws averaged per gradient step.
    pub num_particles: usize,
    pub learning_rate: f64,
    pub strategy: Strategy,
    pub seed: u64,
    pub show_progress: bool,
}

impl Default for SviConfig {
    fn default() -> Self {
        Self {
            num_steps: 1000,
            num_particles: 1,
            learning_rate: 0.01,
            strategy: Strategy::Auto,
            seed: 42,
            show_progress: false,
        }
    }
}

/// Result of an SVI fit.
#[derive(Debug, Clone)]
pub struct SviResult {
    /// Final variational parameters φ.
    pub params: Vec<f64>,
    /// Per-step single-estimate ELBO trace.
    pub elbo_trace: Vec<f64>,
}

/// Maximize the ELBO for a fixed model graph.
pub fn fit(
    model: &Graph,
    guide: &dyn Family,
    init: Vec<f64>,
    config: &SviConfig,
) -> Result<SviResult, EstimatorError> {
    fit_with(|_, _| model.clone(), guide, init, config)
}

/// Maximize the ELBO with a per-step model builder.
///
/// `model_fn(step, rng)` rebuilds the objective each step; this is the
/// subsampling hook — a builder can draw a fresh minibatch, attach its
/// likelihood terms with `add_scaled_term`, and still yield unbiased ELBO
/// gradients in expectation.
pub fn fit_with<F>(
    mut model_fn: F,
    guide: &dyn Family,
    init: Vec<f64>,
    config: &SviConfig,
) -> Result<SviResult, EstimatorError>
where
    F: FnMut(usize, &mut ChaCha8Rng) -> Graph,
{
    if config.num_particles == 0 {
        return Err(EstimatorError::NoDraws);
    }

    let strategy = resolve(config.strategy, guide);
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut params = init;
    let mut adam = Adam::new(config.learning_rate, params.len());
    let mut baseline = DecayingAvgBaseline::new(0.9);

    let progress = if config.show_progress {
        let state = Arc::new(ProgressState::new(config.num_steps));
        let handle = spawn_progress_thread(Arc::clone(&state));
        Some((state, handle))
    } else {
        None
    };

    let mut elbo_trace = Vec::with_capacity(config.num_steps);

    for step in 0..config.num_steps {
        let model = model_fn(step, &mut rng);

        let b = if strategy == Strategy::ScoreFunction {
            baseline.value()
        } else {
            0.0
        };

        let mut grad_sum = vec![0.0; params.len()];
        let mut elbo_sum = 0.0;
        for _ in 0..config.num_particles {
            let (elbo, g) = elbo_grad_draw(&model, guide, &params, strategy, b, &mut rng)?;
            elbo_sum += elbo;
            for (acc, v) in grad_sum.iter_mut().zip(g.iter()) {
                *acc += v;
            }
        }
        let n = config.num_particles as f64;
        let elbo = elbo_sum / n;
        for g in &mut grad_sum {
            *g /= n;
        }

        if strategy == Strategy::ScoreFunction {
            baseline.update(elbo);
        }

        adam.ascent_step(&mut params, &grad_sum);
        elbo_trace.push(elbo);

        if let Some((state, _)) = &progress {
            state.step(elbo);
        }
    }

    if let Some((state, handle)) = progress {
        state.finish();
        handle.join().ok();
    }

    Ok(SviResult { params, elbo_trace })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::LogScaleNormal;
    use crate::elbo::{minibatch_scale, subsample_indices};

    #[test]
    fn test_adam_maximizes_quadratic() {
        // f(x) = -(x - 3)^2, gradient -2(x - 3).
        let mut adam = Adam::new(0.1, 1);
        let mut params = vec![0.0];
        for _ in 0..500 {
            let g = -2.0 * (params[0] - 3.0);
            adam.ascent_step(&mut params, &[g]);
        }
        assert!((params[0] - 3.0).abs() < 0.05, "x = {}", params[0]);
    }

    /// z ~ N(0, 1), one observation 3.0 with unit noise.
    /// Posterior: N(1.5, 1/2).
    fn conjugate_model() -> Graph {
        let mut g = Graph::new();
        let z = g.add_input("z");
        let zero = g.add_constant(0.0);
        let one = g.add_constant(1.0);
        let prior = g.normal_logp(z, zero, one);
        g.add_term(prior);
        let x = g.add_constant(3.0);
        let lik = g.normal_logp(x, z, one);
        g.add_term(lik);
        g
    }

    #[test]
    fn test_pathwise_svi_recovers_conjugate_posterior() {
        let model = conjugate_model();
        let config = SviConfig {
            num_steps: 4000,
            num_particles: 5,
            learning_rate: 0.03,
            strategy: Strategy::Pathwise,
            ..Default::default()
        };
        let result = fit(&model, &LogScaleNormal, vec![0.0, 0.0], &config).unwrap();

        let mu = result.params[0];
        let sigma = result.params[1].exp();
        assert!((mu - 1.5).abs() < 0.15, "posterior mean: got {}", mu);
        assert!(
            (sigma - 0.5f64.sqrt()).abs() < 0.15,
            "posterior std: got {}",
            sigma
        );
    }

    #[test]
    fn test_score_function_svi_recovers_posterior_mean() {
        let model = conjugate_model();
        let config = SviConfig {
            num_steps: 6000,
            num_particles: 10,
            learning_rate: 0.02,
            strategy: Strategy::ScoreFunction,
            ..Default::default()
        };
        let result = fit(&model, &LogScaleNormal, vec![0.0, 0.0], &config).unwrap();
        assert!(
            (result.params[0] - 1.5).abs() < 0.3,
            "posterior mean: got {}",
            result.params[0]
        );
    }

    #[test]
    fn test_elbo_trace_improves() {
        let model = conjugate_model();
        let config = SviConfig {
            num_steps: 1500,
            num_particles: 5,
            learning_rate: 0.03,
            ..Default::default()
        };
        let result = fit(&model, &LogScaleNormal, vec![-2.0, 1.0], &config).unwrap();

        let head: f64 = result.elbo_trace[..100].iter().sum::<f64>() / 100.0;
        let tail: f64 =
            result.elbo_trace[result.elbo_trace.len() - 100..].iter().sum::<f64>() / 100.0;
        assert!(tail > head, "elbo did not improve: {} -> {}", head, tail);
    }

    #[test]
    fn test_minibatch_svi_matches_full_data_fit() {
        // Eight observations with unit noise under a N(0, 1) prior:
        // posterior mean = 8 ybar / 9, posterior var = 1/9.
        let data = [2.1, 2.9, 3.4, 2.7, 3.1, 2.5, 3.8, 2.2];
        let ybar: f64 = data.iter().sum::<f64>() / data.len() as f64;
        let post_mean = 8.0 * ybar / 9.0;

        let config = SviConfig {
            num_steps: 5000,
            num_particles: 2,
            learning_rate: 0.03,
            strategy: Strategy::Pathwise,
            ..Default::default()
        };

        let batch = 4;
        let result = fit_with(
            |_, rng| {
                let mut g = Graph::new();
                let z = g.add_input("z");
                let zero = g.add_constant(0.0);
                let one = g.add_constant(1.0);
                let prior = g.normal_logp(z, zero, one);
                g.add_term(prior);

                let scale = minibatch_scale(data.len(), batch);
                for i in subsample_indices(data.len(), batch, rng) {
                    let obs = g.add_constant(data[i]);
                    let lik = g.normal_logp(obs, z, one);
                    g.add_scaled_term(lik, scale);
                }
                g
            },
            &LogScaleNormal,
            vec![0.0, 0.0],
            &config,
        )
        .unwrap();

        let mu = result.params[0];
        let sigma = result.params[1].exp();
        assert!(
            (mu - post_mean).abs() < 0.2,
            "posterior mean: got {}, want {}",
            mu,
            post_mean
        );
        assert!((sigma - 1.0 / 3.0).abs() < 0.15, "posterior std: got {}", sigma);
    }

    #[test]
    fn test_progress_reporting_completes() {
        let model = conjugate_model();
        let config = SviConfig {
            num_steps: 50,
            num_particles: 1,
            show_progress: true,
            ..Default::default()
        };
        let result = fit(&model, &LogScaleNormal, vec![0.0, 0.0], &config).unwrap();
        assert_eq!(result.elbo_trace.len(), 50);
    }

    #[test]
    fn test_zero_particles_rejected() {
        let model = conjugate_model();
        let config = SviConfig {
            num_particles: 0,
            ..Default::default()
        };
        assert!(matches!(
            fit(&model, &LogScaleNormal, vec![0.0, 0.0], &config),
            Err(EstimatorError::NoDraws)
        ));
    }
}
