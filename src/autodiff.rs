use crate::graph::{Graph, Op};

/// Gradient of a graph objective from one reverse pass.
#[derive(Debug, Clone)]
pub struct GradResult {
    /// Objective value (scale-weighted sum of terms).
    pub value: f64,
    /// Gradient with respect to the parameter vector φ.
    pub wrt_params: Vec<f64>,
    /// Gradient with respect to the input vector (sampled values).
    pub wrt_inputs: Vec<f64>,
}

/// Forward-evaluate every node in the graph and return the per-node values.
pub fn forward(graph: &Graph, params: &[f64], inputs: &[f64]) -> Vec<f64> {
    let mut values: Vec<f64> = Vec::with_capacity(graph.nodes.len());

    for node in &graph.nodes {
        let val = match &node.op {
            Op::Param(idx) => params[*idx],
            Op::Input(idx) => inputs[*idx],
            Op::Constant(c) => *c,
            Op::Add(a, b) => values[a.0] + values[b.0],
            Op::Sub(a, b) => values[a.0] - values[b.0],
            Op::Mul(a, b) => values[a.0] * values[b.0],
            Op::Div(a, b) => values[a.0] / values[b.0],
            Op::Neg(a) => -values[a.0],
            Op::Exp(a) => values[a.0].exp(),
            Op::Ln(a) => values[a.0].ln(),
            Op::Square(a) => {
                let v = values[a.0];
                v * v
            }
            Op::NormalLogP { x, mu, sigma } => {
                normal_logp_scalar(values[x.0], values[mu.0], values[sigma.0])
            }
        };
        values.push(val);
    }

    values
}

/// Evaluate the objective: the scale-weighted sum of the graph's terms.
pub fn eval(graph: &Graph, params: &[f64], inputs: &[f64]) -> f64 {
    let values = forward(graph, params, inputs);
    graph
        .terms
        .iter()
        .map(|&(id, scale)| scale * values[id.0])
        .sum()
}

/// Reverse-mode autodiff: objective value plus gradients with respect to
/// both the parameter vector and the input vector.
///
/// Gradient vectors are sized by the caller's slices, not by the graph's
/// slot counts, so a cost that ignores some parameters still yields a full
/// (zero-padded) gradient.
pub fn grad(graph: &Graph, params: &[f64], inputs: &[f64]) -> GradResult {
    let values = forward(graph, params, inputs);
    let n = graph.nodes.len();

    let value: f64 = graph
        .terms
        .iter()
        .map(|&(id, scale)| scale * values[id.0])
        .sum();

    let mut adj = vec![0.0f64; n];

    // Seed: d(objective)/d(term) = scale
    for &(id, scale) in &graph.terms {
        adj[id.0] += scale;
    }

    // Reverse pass
    for node in graph.nodes.iter().rev() {
        let idx = node.id.0;
        let a = adj[idx];

        match &node.op {
            Op::Param(_) | Op::Input(_) | Op::Constant(_) => {}

            Op::Add(x, y) => {
                adj[x.0] += a;
                adj[y.0] += a;
            }
            Op::Sub(x, y) => {
                adj[x.0] += a;
                adj[y.0] -= a;
            }
            Op::Mul(x, y) => {
                let vx = values[x.0];
                let vy = values[y.0];
                adj[x.0] += a * vy;
                adj[y.0] += a * vx;
            }
            Op::Div(x, y) => {
                let vx = values[x.0];
                let vy = values[y.0];
                adj[x.0] += a / vy;
                adj[y.0] -= a * vx / (vy * vy);
            }
            Op::Neg(x) => {
                adj[x.0] -= a;
            }
            Op::Exp(x) => {
                adj[x.0] += a * values[x.0].exp();
            }
            Op::Ln(x) => {
                adj[x.0] += a / values[x.0];
            }
            Op::Square(x) => {
                adj[x.0] += a * 2.0 * values[x.0];
            }
            Op::NormalLogP { x, mu, sigma } => {
                let xv = values[x.0];
                let mv = values[mu.0];
                let sv = values[sigma.0];
                let diff = xv - mv;
                let s2 = sv * sv;
                // d logp / d x = -(x - mu) / sigma^2
                adj[x.0] += a * (-diff / s2);
                // d logp / d mu = (x - mu) / sigma^2
                adj[mu.0] += a * (diff / s2);
                // d logp / d sigma = (x - mu)^2 / sigma^3 - 1/sigma
                adj[sigma.0] += a * (diff * diff / (s2 * sv) - 1.0 / sv);
            }
        }
    }

    // Extract leaf gradients
    let mut wrt_params = vec![0.0; params.len()];
    let mut wrt_inputs = vec![0.0; inputs.len()];
    for node in &graph.nodes {
        match node.op {
            Op::Param(pidx) => wrt_params[pidx] += adj[node.id.0],
            Op::Input(iidx) => wrt_inputs[iidx] += adj[node.id.0],
            _ => {}
        }
    }

    GradResult {
        value,
        wrt_params,
        wrt_inputs,
    }
}

fn normal_logp_scalar(x: f64, mu: f64, sigma: f64) -> f64 {
    let diff = x - mu;
    -0.5 * (diff * diff) / (sigma * sigma)
        - sigma.ln()
        - 0.5 * std::f64::consts::TAU.ln()
}
