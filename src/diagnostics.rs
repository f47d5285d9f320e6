//! Monte Carlo diagnostics for gradient estimates: per-component mean,
//! spread, Monte Carlo standard error, and a law-of-large-numbers check
//! on the 1/n variance scaling.

/// Per-component diagnostic summary.
#[derive(Debug, Clone)]
pub struct ComponentDiagnostics {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    /// Monte Carlo standard error of the mean: std / √n.
    pub mcse: f64,
}

/// Full diagnostic report for a set of per-draw gradient estimates.
#[derive(Debug, Clone)]
pub struct DiagnosticsReport {
    pub components: Vec<ComponentDiagnostics>,
    pub num_draws: usize,
}

impl DiagnosticsReport {
    /// Render the diagnostics as a formatted table string.
    pub fn to_table(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!("{} independent draws", self.num_draws));
        lines.push(String::new());
        lines.push(format!(
            "{:<12} {:>12} {:>12} {:>12}",
            "Component", "mean", "std", "mcse"
        ));
        lines.push("─".repeat(52));

        for c in &self.components {
            lines.push(format!(
                "{:<12} {:>12.5} {:>12.5} {:>12.6}",
                c.name, c.mean, c.std, c.mcse
            ));
        }

        lines.push("─".repeat(52));

        let any_noisy = self
            .components
            .iter()
            .any(|c| c.mean.abs() > 1e-12 && c.mcse / c.mean.abs() > 0.1);
        if any_noisy {
            lines.push(
                "⚠  Some components have relative MCSE > 10% — increase draws or switch to a lower-variance estimator.".to_string(),
            );
        }

        lines.join("\n")
    }
}

/// Summarize a draw matrix (one row per independent draw, one column per
/// parameter component).
pub fn summarize(draws: &[Vec<f64>], names: &[String]) -> DiagnosticsReport {
    let n = draws.len();
    let dim = names.len();
    let mut components = Vec::with_capacity(dim);

    for k in 0..dim {
        let column: Vec<f64> = draws.iter().map(|row| row[k]).collect();
        let mean = mean(&column);
        let std = std_dev(&column, mean);
        let mcse = if n > 0 { std / (n as f64).sqrt() } else { f64::NAN };
        components.push(ComponentDiagnostics {
            name: names[k].clone(),
            mean,
            std,
            mcse,
        });
    }

    DiagnosticsReport {
        components,
        num_draws: n,
    }
}

/// Law-of-large-numbers check on a stream of per-draw values.
///
/// Groups the values into non-overlapping batches of size `batch` and
/// `2 * batch` and returns the ratio of the batch-mean variances. For
/// independent draws the variance of a mean scales as 1/n, so the ratio
/// is ≈ 0.5; a ratio far above that indicates correlated or heavy-tailed
/// draws.
pub fn variance_halving_ratio(values: &[f64], batch: usize) -> f64 {
    let small = batch_mean_variance(values, batch);
    let large = batch_mean_variance(values, 2 * batch);
    large / small
}

fn batch_mean_variance(values: &[f64], batch: usize) -> f64 {
    let means: Vec<f64> = values
        .chunks_exact(batch)
        .map(|chunk| mean(chunk))
        .collect();
    let m = mean(&means);
    std_dev(&means, m).powi(2)
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

fn std_dev(data: &[f64], mean: f64) -> f64 {
    if data.len() < 2 {
        return f64::NAN;
    }
    let sum_sq: f64 = data.iter().map(|&x| (x - mean).powi(2)).sum();
    (sum_sq / (data.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, StandardNormal};

    #[test]
    fn test_summarize_known_values() {
        let draws = vec![vec![1.0, 10.0], vec![3.0, 10.0], vec![5.0, 10.0]];
        let names = vec!["mu".to_string(), "rho".to_string()];
        let report = summarize(&draws, &names);

        assert_eq!(report.num_draws, 3);
        assert!((report.components[0].mean - 3.0).abs() < 1e-12);
        assert!((report.components[0].std - 2.0).abs() < 1e-12);
        assert!((report.components[0].mcse - 2.0 / 3.0f64.sqrt()).abs() < 1e-12);
        assert!((report.components[1].std - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_table_renders_all_components() {
        let draws = vec![vec![1.0, 2.0], vec![1.5, 2.5]];
        let names = vec!["mu".to_string(), "rho".to_string()];
        let table = summarize(&draws, &names).to_table();
        assert!(table.contains("mu"));
        assert!(table.contains("rho"));
        assert!(table.contains("2 independent draws"));
    }

    #[test]
    fn test_variance_halves_for_independent_draws() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let values: Vec<f64> = (0..200_000)
            .map(|_| {
                let eps: f64 = StandardNormal.sample(&mut rng);
                1.0 + eps
            })
            .collect();
        let ratio = variance_halving_ratio(&values, 100);
        assert!(
            (ratio - 0.5).abs() < 0.15,
            "expected ratio near 0.5, got {}",
            ratio
        );
    }
}
