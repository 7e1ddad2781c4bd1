//! Derivative-free simplex minimisation (Nelder–Mead)
//!
//! Standard reflection/expansion/contraction/shrink scheme. The initial
//! simplex perturbs each coordinate of the start point by a relative step,
//! falling back to a small absolute step for coordinates that are zero.

/// Stopping and simplex parameters
#[derive(Debug, Clone)]
pub struct NelderMeadConfig {
    /// Iteration cap; `None` means `200 * dimension`
    pub max_iterations: Option<usize>,
    /// Simplex vertices must lie within this distance of the best vertex
    pub x_tolerance: f64,
    /// Vertex values must lie within this distance of the best value
    pub f_tolerance: f64,
    /// Relative perturbation for non-zero start coordinates
    pub relative_step: f64,
    /// Absolute perturbation for start coordinates equal to zero
    pub zero_step: f64,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            x_tolerance: 1e-4,
            f_tolerance: 1e-4,
            relative_step: 0.05,
            zero_step: 0.00025,
        }
    }
}

/// Outcome of a minimisation
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best point found
    pub x: Vec<f64>,
    /// Objective value at `x`
    pub value: f64,
    pub iterations: usize,
    /// False when the iteration cap was hit before both tolerances were met
    pub converged: bool,
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimise `f` starting from `x0`
///
/// Always returns the best vertex seen; callers that care about
/// convergence inspect [`Minimum::converged`].
pub fn minimize<F>(f: F, x0: &[f64], config: &NelderMeadConfig) -> Minimum
where
    F: Fn(&[f64]) -> f64,
{
    let n = x0.len();
    if n == 0 {
        return Minimum {
            x: Vec::new(),
            value: f(x0),
            iterations: 0,
            converged: true,
        };
    }

    let max_iterations = config.max_iterations.unwrap_or(200 * n);

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for k in 0..n {
        let mut vertex = x0.to_vec();
        if vertex[k] != 0.0 {
            vertex[k] *= 1.0 + config.relative_step;
        } else {
            vertex[k] = config.zero_step;
        }
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| f(v)).collect();
    sort_simplex(&mut simplex, &mut values);

    let mut iterations = 0;
    let mut converged = false;

    while iterations < max_iterations {
        if within_tolerance(&simplex, &values, config) {
            converged = true;
            break;
        }
        iterations += 1;

        let worst = simplex[n].clone();
        let worst_value = values[n];

        let mut centroid = vec![0.0; n];
        for vertex in &simplex[..n] {
            for (c, v) in centroid.iter_mut().zip(vertex) {
                *c += v / n as f64;
            }
        }

        let toward = |t: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&worst)
                .map(|(c, w)| c + t * (c - w))
                .collect()
        };

        let reflected = toward(REFLECT);
        let reflected_value = f(&reflected);

        let mut shrink = false;
        if reflected_value < values[0] {
            let expanded = toward(REFLECT * EXPAND);
            let expanded_value = f(&expanded);
            if expanded_value < reflected_value {
                simplex[n] = expanded;
                values[n] = expanded_value;
            } else {
                simplex[n] = reflected;
                values[n] = reflected_value;
            }
        } else if reflected_value < values[n - 1] {
            simplex[n] = reflected;
            values[n] = reflected_value;
        } else if reflected_value < worst_value {
            let outside = toward(CONTRACT * REFLECT);
            let outside_value = f(&outside);
            if outside_value <= reflected_value {
                simplex[n] = outside;
                values[n] = outside_value;
            } else {
                shrink = true;
            }
        } else {
            let inside = toward(-CONTRACT);
            let inside_value = f(&inside);
            if inside_value < worst_value {
                simplex[n] = inside;
                values[n] = inside_value;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = simplex[0].clone();
            for j in 1..=n {
                for (x, b) in simplex[j].iter_mut().zip(&best) {
                    *x = b + SHRINK * (*x - b);
                }
                values[j] = f(&simplex[j]);
            }
        }

        sort_simplex(&mut simplex, &mut values);
    }

    if !converged {
        converged = within_tolerance(&simplex, &values, config);
    }

    Minimum {
        x: simplex.swap_remove(0),
        value: values[0],
        iterations,
        converged,
    }
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

fn within_tolerance(simplex: &[Vec<f64>], values: &[f64], config: &NelderMeadConfig) -> bool {
    let best = &simplex[0];
    let x_spread = simplex[1..]
        .iter()
        .flat_map(|v| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
        .fold(0.0, f64::max);
    let f_spread = values[1..]
        .iter()
        .map(|v| (v - values[0]).abs())
        .fold(0.0, f64::max);
    x_spread <= config.x_tolerance && f_spread <= config.f_tolerance
}
