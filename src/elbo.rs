use crate::autodiff::grad;
use crate::distributions::Family;
use crate::error::EstimatorError;
use crate::estimator::{resolve, Strategy};
use crate::graph::Graph;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Monte Carlo estimate of the evidence lower bound
///
///   ELBO(φ) = E_{z ~ q(·|φ)} [ log p(x, z) − log q(z|φ) ]
///
/// for a model log-joint expressed as a `Graph` over a single latent input
/// and a guide family with parameters φ.
pub fn elbo_value(
    model: &Graph,
    guide: &dyn Family,
    params: &[f64],
    num_draws: usize,
    rng: &mut ChaCha8Rng,
) -> Result<f64, EstimatorError> {
    if num_draws == 0 {
        return Err(EstimatorError::NoDraws);
    }
    let mut sum = 0.0;
    for _ in 0..num_draws {
        let z = guide.sample(params, rng)?;
        let logp = crate::autodiff::eval(model, params, &[z]);
        let logq = guide.log_prob(params, z)?;
        sum += logp - logq;
    }
    Ok(sum / num_draws as f64)
}

/// One unbiased draw of (ELBO sample, ∇φ ELBO).
///
/// Pathwise (guide reparameterized as z = T(ε, φ)):
///
///   g_k = (∂logp/∂z − ∂logq/∂z) · ∂T/∂φ_k + ∂logp/∂φ_k − score_k
///
/// which is the total derivative of logp(x, T(ε,φ)) − logq(T(ε,φ)|φ).
///
/// Score-function:
///
///   g_k = score_k · (logp − logq − b) + ∂logp/∂φ_k
///
/// where the −score_k entropy-gradient term has been dropped against the
/// identity E[score] = 0, and `b` is the variance-reduction baseline.
pub fn elbo_grad_draw(
    model: &Graph,
    guide: &dyn Family,
    params: &[f64],
    strategy: Strategy,
    baseline: f64,
    rng: &mut ChaCha8Rng,
) -> Result<(f64, Vec<f64>), EstimatorError> {
    match resolve(strategy, guide) {
        Strategy::Pathwise => {
            let rp = guide
                .reparam()
                .ok_or(EstimatorError::NotReparameterizable {
                    family: guide.name(),
                })?;
            let eps = rp.sample_noise(rng);
            let z = rp.transform(params, eps);
            let dz = rp.transform_grad(params, eps);

            let gm = grad(model, params, &[z]);
            let logq = guide.log_prob(params, z)?;
            let dlogq_dz = guide.log_prob_dx(params, z)?;
            let score = guide.score(params, z)?;

            let g = gm
                .wrt_params
                .iter()
                .zip(dz.iter())
                .zip(score.iter())
                .map(|((direct, path), score_k)| {
                    direct + (gm.wrt_inputs[0] - dlogq_dz) * path - score_k
                })
                .collect();
            Ok((gm.value - logq, g))
        }
        Strategy::ScoreFunction => {
            let z = guide.sample(params, rng)?;
            let gm = grad(model, params, &[z]);
            let logq = guide.log_prob(params, z)?;
            let score = guide.score(params, z)?;
            let elbo = gm.value - logq;

            let g = score
                .iter()
                .zip(gm.wrt_params.iter())
                .map(|(score_k, direct)| score_k * (elbo - baseline) + direct)
                .collect();
            Ok((elbo, g))
        }
        Strategy::Auto => unreachable!("resolved above"),
    }
}

/// Uniform subsample of `batch` distinct indices from 0..n, for minibatch
/// likelihood terms.
pub fn subsample_indices(n: usize, batch: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    assert!(batch > 0 && batch <= n, "batch must be in 1..={}", n);
    // Partial Fisher-Yates over an index table.
    let mut pool: Vec<usize> = (0..n).collect();
    for i in 0..batch {
        let j = i + rng.gen_range(0..n - i);
        pool.swap(i, j);
    }
    pool.truncate(batch);
    pool
}

/// Scale factor for minibatch likelihood terms: summing `batch` scaled
/// terms has the same expectation as the full sum over `n` data points.
pub fn minibatch_scale(n: usize, batch: usize) -> f64 {
    n as f64 / batch as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::LogScaleNormal;
    use rand::SeedableRng;

    /// z ~ N(0, 1), one observation x = 3.0 with unit noise.
    /// Closed-form posterior: N(1.5, 1/2).
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

    /// Analytic ∇ ELBO for the conjugate model under a [mu, rho] guide:
    /// ELBO = −mu²/2 − (3−mu)²/2 − e^{2rho} + rho + const.
    fn analytic_elbo_grad(mu: f64, rho: f64) -> [f64; 2] {
        [3.0 - 2.0 * mu, 1.0 - 2.0 * (2.0 * rho).exp()]
    }

    #[test]
    fn test_pathwise_elbo_grad_matches_analytic() {
        let model = conjugate_model();
        let params = [1.0, -0.2];
        let expected = analytic_elbo_grad(params[0], params[1]);

        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let n = 50_000;
        let mut sum = [0.0f64; 2];
        for _ in 0..n {
            let (_, g) = elbo_grad_draw(
                &model,
                &LogScaleNormal,
                &params,
                Strategy::Pathwise,
                0.0,
                &mut rng,
            )
            .unwrap();
            sum[0] += g[0];
            sum[1] += g[1];
        }
        for k in 0..2 {
            let mean = sum[k] / n as f64;
            assert!(
                (mean - expected[k]).abs() < 0.05,
                "component {}: mc={}, analytic={}",
                k,
                mean,
                expected[k]
            );
        }
    }

    #[test]
    fn test_score_function_elbo_grad_matches_analytic() {
        let model = conjugate_model();
        let params = [1.0, -0.2];
        let expected = analytic_elbo_grad(params[0], params[1]);

        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let n = 400_000;
        // A rough baseline near the current ELBO keeps the variance sane.
        let baseline = elbo_value(&model, &LogScaleNormal, &params, 2_000, &mut rng).unwrap();
        let mut sum = [0.0f64; 2];
        for _ in 0..n {
            let (_, g) = elbo_grad_draw(
                &model,
                &LogScaleNormal,
                &params,
                Strategy::ScoreFunction,
                baseline,
                &mut rng,
            )
            .unwrap();
            sum[0] += g[0];
            sum[1] += g[1];
        }
        for k in 0..2 {
            let mean = sum[k] / n as f64;
            assert!(
                (mean - expected[k]).abs() < 0.1,
                "component {}: mc={}, analytic={}",
                k,
                mean,
                expected[k]
            );
        }
    }

    #[test]
    fn test_elbo_at_true_posterior_equals_log_evidence() {
        // With q equal to the exact posterior the KL term vanishes and the
        // ELBO is log p(x) = log N(3; 0, sqrt(2)).
        let model = conjugate_model();
        let params = [1.5, 0.5f64.sqrt().ln()];
        let log_evidence =
            -0.5 * (std::f64::consts::TAU * 2.0).ln() - 9.0 / 4.0;

        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let elbo = elbo_value(&model, &LogScaleNormal, &params, 100_000, &mut rng).unwrap();
        assert!(
            (elbo - log_evidence).abs() < 0.02,
            "elbo={}, log evidence={}",
            elbo,
            log_evidence
        );
    }

    #[test]
    fn test_subsample_indices_distinct_and_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..100 {
            let idx = subsample_indices(10, 4, &mut rng);
            assert_eq!(idx.len(), 4);
            let mut sorted = idx.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), 4, "indices not distinct: {:?}", idx);
            assert!(idx.iter().all(|&i| i < 10));
        }
    }

    #[test]
    fn test_scaled_minibatch_objective_unbiased() {
        // At a fixed latent, the average of the scale-corrected minibatch
        // log-joint over random subsamples equals the full-data log-joint.
        let data = [2.1, 2.9, 3.4, 2.7, 3.1, 2.5, 3.8, 2.2];
        let z_val = 0.7;

        let build = |indices: Option<&[usize]>| -> Graph {
            let mut g = Graph::new();
            let z = g.add_input("z");
            let zero = g.add_constant(0.0);
            let one = g.add_constant(1.0);
            let prior = g.normal_logp(z, zero, one);
            g.add_term(prior);
            match indices {
                None => {
                    for &y in &data {
                        let obs = g.add_constant(y);
                        let lik = g.normal_logp(obs, z, one);
                        g.add_term(lik);
                    }
                }
                Some(idx) => {
                    let scale = minibatch_scale(data.len(), idx.len());
                    for &i in idx {
                        let obs = g.add_constant(data[i]);
                        let lik = g.normal_logp(obs, z, one);
                        g.add_scaled_term(lik, scale);
                    }
                }
            }
            g
        };

        let full = crate::autodiff::eval(&build(None), &[], &[z_val]);

        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let n = 100_000;
        let mut sum = 0.0;
        for _ in 0..n {
            let idx = subsample_indices(data.len(), 2, &mut rng);
            sum += crate::autodiff::eval(&build(Some(&idx)), &[], &[z_val]);
        }
        let mean = sum / n as f64;
        assert!(
            (mean - full).abs() < 0.1,
            "minibatch mean={}, full={}",
            mean,
            full
        );
    }
}
