pub mod autodiff;
pub mod diagnostics;
pub mod distributions;
pub mod elbo;
pub mod error;
pub mod estimator;
pub mod graph;
pub mod progress;
pub mod svi;

// Future: multi-site guides over a vector of latent inputs, reusing the
// same graph and estimator infrastructure.
//
// Future: Rao-Blackwellized per-site score terms once multi-site guides
// exist, so each site only sees the cost terms downstream of it.
