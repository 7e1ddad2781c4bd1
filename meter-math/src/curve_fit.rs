//! Nonlinear least-squares curve fitting (Levenberg–Marquardt)
//!
//! Fits the parameters of a scalar model `y = f(x; p)` to paired samples.
//! The Jacobian is approximated with forward differences, so any closure
//! can serve as the model.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Errors that can occur during curve fitting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurveFitError {
    #[error("length mismatch: {xs} x values, {ys} y values")]
    LengthMismatch { xs: usize, ys: usize },

    #[error("insufficient data: {got} samples for {params} parameters")]
    InsufficientData { got: usize, params: usize },

    #[error("normal equations are singular")]
    Singular,

    #[error("model produced a non-finite value")]
    NonFinite,
}

/// Stopping parameters
#[derive(Debug, Clone)]
pub struct CurveFitConfig {
    pub max_iterations: usize,
    /// Relative decrease in the residual sum of squares treated as convergence
    pub f_tolerance: f64,
    /// Relative parameter step treated as convergence
    pub x_tolerance: f64,
    /// Starting damping factor
    pub initial_lambda: f64,
}

impl Default for CurveFitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            f_tolerance: 1e-12,
            x_tolerance: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

/// Fitted parameters
#[derive(Debug, Clone)]
pub struct CurveFit {
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`
    pub residual_sum_squares: f64,
    pub iterations: usize,
}

impl CurveFit {
    /// Root-mean-square residual over `n` samples
    pub fn rms(&self, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        (self.residual_sum_squares / n as f64).sqrt()
    }
}

const MAX_LAMBDA: f64 = 1e16;

/// Fit `model` to `(xs, ys)` starting from `p0`
///
/// # Arguments
/// * `model` - `f(x, params)`
/// * `xs`, `ys` - Samples, equal length and at least as many as parameters
/// * `p0` - Initial parameter guess
///
/// # Returns
/// * `Ok(CurveFit)` - Best parameters found
/// * `Err(CurveFitError)` - Invalid input, or the model is not finite at `p0`
pub fn curve_fit<F>(
    model: F,
    xs: &[f64],
    ys: &[f64],
    p0: &[f64],
    config: &CurveFitConfig,
) -> Result<CurveFit, CurveFitError>
where
    F: Fn(f64, &[f64]) -> f64,
{
    if xs.len() != ys.len() {
        return Err(CurveFitError::LengthMismatch {
            xs: xs.len(),
            ys: ys.len(),
        });
    }
    if xs.len() < p0.len() || p0.is_empty() {
        return Err(CurveFitError::InsufficientData {
            got: xs.len(),
            params: p0.len(),
        });
    }

    let residuals = |p: &[f64]| -> DVector<f64> {
        DVector::from_iterator(
            xs.len(),
            xs.iter().zip(ys).map(|(&x, &y)| y - model(x, p)),
        )
    };

    let mut params = p0.to_vec();
    let mut r = residuals(&params);
    if r.iter().any(|v| !v.is_finite()) {
        return Err(CurveFitError::NonFinite);
    }
    let mut cost = r.norm_squared();
    let mut lambda = config.initial_lambda;
    let mut iterations = 0;

    while iterations < config.max_iterations && cost > 0.0 {
        iterations += 1;

        let jac = jacobian(&model, xs, &params);
        let jtj = jac.transpose() * &jac;
        let jtr = jac.transpose() * &r;

        let mut improved = false;
        let mut converged = false;

        while lambda <= MAX_LAMBDA {
            let mut damped = jtj.clone();
            for i in 0..params.len() {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }

            let step = match damped.lu().solve(&jtr) {
                Some(step) => step,
                None => {
                    lambda *= 10.0;
                    continue;
                }
            };

            let candidate: Vec<f64> = params.iter().zip(step.iter()).map(|(p, s)| p + s).collect();
            let candidate_r = residuals(&candidate);
            let candidate_cost = candidate_r.norm_squared();

            if candidate_cost.is_finite() && candidate_cost < cost {
                let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                converged = (cost - candidate_cost) <= config.f_tolerance * cost
                    || step.norm() <= config.x_tolerance * (param_norm + config.x_tolerance);

                params = candidate;
                r = candidate_r;
                cost = candidate_cost;
                lambda = (lambda / 10.0).max(1e-12);
                improved = true;
                break;
            }
            lambda *= 10.0;
        }

        if !improved {
            if iterations == 1 && jtj.iter().all(|v| *v == 0.0) {
                return Err(CurveFitError::Singular);
            }
            // Local minimum: no damping level reduces the cost
            break;
        }
        if converged {
            break;
        }
    }

    log::debug!("curve_fit: {iterations} iterations, rss={cost:.3e}, params={params:?}");

    Ok(CurveFit {
        params,
        residual_sum_squares: cost,
        iterations,
    })
}

/// Forward-difference Jacobian of the model output with respect to parameters
fn jacobian<F>(model: &F, xs: &[f64], params: &[f64]) -> DMatrix<f64>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let eps = f64::EPSILON.sqrt();
    let mut jac = DMatrix::zeros(xs.len(), params.len());
    let mut shifted = params.to_vec();

    for j in 0..params.len() {
        let h = eps * params[j].abs().max(1.0);
        shifted[j] = params[j] + h;
        for (i, &x) in xs.iter().enumerate() {
            jac[(i, j)] = (model(x, &shifted) - model(x, params)) / h;
        }
        shifted[j] = params[j];
    }
    jac
}
