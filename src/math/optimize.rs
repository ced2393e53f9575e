//! Box-constrained quasi-Newton minimization.
//!
//! A projected L-BFGS method for smooth objectives over box constraints:
//!
//! - gradients by central finite differences (the objective is a simulation,
//!   no analytic derivatives exist)
//! - limited-memory two-loop recursion for the quasi-Newton direction
//! - gradient projection at active bounds, with a steepest-descent fallback
//!   when the quasi-Newton direction is not a descent direction
//! - backtracking (Armijo) line search on the projected iterate
//!
//! `lower == upper` pins a coordinate: it is excluded from differentiation and
//! never moves, which is how the fitter freezes known plate-level parameters
//! and empty-culture growth rates.
//!
//! Failed objective evaluations are expected to surface as `+inf` values (the
//! fitter maps integration failures that way); the line search simply rejects
//! such trial points and the finite-difference stencil treats them as flat.

use std::collections::VecDeque;

use crate::error::PlateError;

/// Optimizer configuration.
#[derive(Debug, Clone)]
pub struct OptimOptions {
    /// Outer-iteration budget; `None` runs until convergence.
    pub max_iterations: Option<usize>,
    /// Objective-evaluation budget (gradient stencils included); `None` is
    /// unbounded.
    pub max_evaluations: Option<usize>,
    /// Fractional objective-reduction tolerance: stop once
    /// `(f_prev - f_new) <= tolerance * max(|f_prev|, |f_new|, 1)`.
    pub tolerance: f64,
    /// Relative finite-difference step.
    pub grad_step: f64,
    /// Number of curvature pairs kept by the two-loop recursion.
    pub memory: usize,
}

impl Default for OptimOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_evaluations: None,
            tolerance: 1e-10,
            grad_step: 1e-6,
            memory: 8,
        }
    }
}

/// Best point found by [`minimize_bounded`].
#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub objective: f64,
    pub converged: bool,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Infinity norm of the projected gradient below which the point is treated
/// as stationary.
const PG_TOL: f64 = 1e-10;

/// Armijo sufficient-decrease constant.
const ARMIJO_C1: f64 = 1e-4;

/// Maximum number of step halvings per line search.
const MAX_BACKTRACKS: usize = 40;

/// Minimize `f` over the box `[lower, upper]` starting from `x0`.
///
/// Non-convergence within the supplied budgets is not an error: the best
/// point found is returned with `converged = false`. Errors are reserved for
/// malformed inputs (shape or bound violations), raised before any
/// evaluation.
pub fn minimize_bounded<F>(
    mut f: F,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    opts: &OptimOptions,
) -> Result<Minimum, PlateError>
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    if lower.len() != n || upper.len() != n {
        return Err(PlateError::shape(format!(
            "Optimizer shapes differ: x0 {}, lower {}, upper {}.",
            n,
            lower.len(),
            upper.len()
        )));
    }
    for i in 0..n {
        if !lower[i].is_finite() || upper[i].is_nan() || lower[i] > upper[i] {
            return Err(PlateError::invalid(format!(
                "Optimizer bound {i} is invalid: ({}, {}).",
                lower[i], upper[i]
            )));
        }
    }

    let project = |x: &mut [f64]| {
        for i in 0..n {
            x[i] = x[i].max(lower[i]).min(upper[i]);
        }
    };
    let free: Vec<bool> = (0..n).map(|i| lower[i] < upper[i]).collect();

    let mut evaluations = 0usize;
    let eval_budget = opts.max_evaluations.unwrap_or(usize::MAX);

    let mut x = x0.to_vec();
    project(&mut x);

    let mut fx = f(&x);
    evaluations += 1;

    // Nothing to optimize, or an unusable starting point.
    if free.iter().all(|&fr| !fr) || !fx.is_finite() {
        return Ok(Minimum {
            converged: fx.is_finite(),
            x,
            objective: fx,
            iterations: 0,
            evaluations,
        });
    }

    let mut grad = vec![0.0; n];
    let mut pairs: VecDeque<(Vec<f64>, Vec<f64>, f64)> = VecDeque::new();
    let mut iterations = 0usize;
    let mut converged = false;

    finite_diff_gradient(
        &mut f,
        &x,
        lower,
        upper,
        &free,
        opts.grad_step,
        &mut grad,
        &mut evaluations,
    );

    loop {
        if let Some(cap) = opts.max_iterations {
            if iterations >= cap {
                break;
            }
        }
        if evaluations >= eval_budget {
            break;
        }

        // Stationarity on the projected gradient.
        let pg_norm = (0..n)
            .map(|i| {
                let stepped = (x[i] - grad[i]).max(lower[i]).min(upper[i]);
                (stepped - x[i]).abs()
            })
            .fold(0.0_f64, f64::max);
        if pg_norm <= PG_TOL {
            converged = true;
            break;
        }

        // Quasi-Newton direction, projected at active bounds; fall back to
        // steepest descent when the recursion does not yield descent.
        let mut dir = two_loop_direction(&grad, &pairs, &free);
        mask_active(&mut dir, &x, lower, upper);
        let slope: f64 = dir.iter().zip(grad.iter()).map(|(d, g)| d * g).sum();
        if !(slope < 0.0) {
            for i in 0..n {
                dir[i] = if free[i] { -grad[i] } else { 0.0 };
            }
            mask_active(&mut dir, &x, lower, upper);
        }

        // Backtracking line search on the projected iterate.
        let mut alpha = 1.0;
        let mut x_trial = vec![0.0; n];
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            if evaluations >= eval_budget {
                break;
            }
            for i in 0..n {
                x_trial[i] = x[i] + alpha * dir[i];
            }
            project(&mut x_trial);

            let predicted: f64 = x_trial
                .iter()
                .zip(x.iter())
                .zip(grad.iter())
                .map(|((xt, xi), g)| (xt - xi) * g)
                .sum();
            if predicted >= 0.0 {
                // The projected step does not move downhill at this scale;
                // a shorter step may once the projection relaxes.
                alpha *= 0.5;
                continue;
            }

            let f_trial = f(&x_trial);
            evaluations += 1;
            if f_trial.is_finite() && f_trial <= fx + ARMIJO_C1 * predicted {
                accepted = Some(f_trial);
                break;
            }
            alpha *= 0.5;
        }

        let Some(f_new) = accepted else {
            // No acceptable step along any scale: the point is numerically
            // stationary if the projected gradient is already tiny.
            converged = pg_norm <= 1e-6;
            break;
        };

        iterations += 1;

        let s: Vec<f64> = x_trial.iter().zip(x.iter()).map(|(a, b)| a - b).collect();
        let f_prev = fx;
        x.copy_from_slice(&x_trial);
        fx = f_new;

        let mut grad_new = vec![0.0; n];
        finite_diff_gradient(
            &mut f,
            &x,
            lower,
            upper,
            &free,
            opts.grad_step,
            &mut grad_new,
            &mut evaluations,
        );

        let yv: Vec<f64> = grad_new.iter().zip(grad.iter()).map(|(a, b)| a - b).collect();
        let sy: f64 = s.iter().zip(yv.iter()).map(|(a, b)| a * b).sum();
        if sy > 1e-12 {
            if pairs.len() == opts.memory {
                pairs.pop_front();
            }
            pairs.push_back((s, yv, 1.0 / sy));
        }
        grad = grad_new;

        let reduction = f_prev - fx;
        if reduction <= opts.tolerance * f_prev.abs().max(fx.abs()).max(1.0) {
            converged = true;
            break;
        }
    }

    Ok(Minimum {
        x,
        objective: fx,
        converged,
        iterations,
        evaluations,
    })
}

/// Central finite-difference gradient over the free coordinates, with the
/// stencil clipped into the box. Non-finite differences (a failed evaluation
/// on one side) are treated as flat.
#[allow(clippy::too_many_arguments)]
fn finite_diff_gradient<F>(
    f: &mut F,
    x: &[f64],
    lower: &[f64],
    upper: &[f64],
    free: &[bool],
    rel_step: f64,
    grad: &mut [f64],
    evaluations: &mut usize,
) where
    F: FnMut(&[f64]) -> f64,
{
    let mut probe = x.to_vec();
    for i in 0..x.len() {
        if !free[i] {
            grad[i] = 0.0;
            continue;
        }
        let h = rel_step * x[i].abs().max(1.0);
        let xp = (x[i] + h).min(upper[i]);
        let xm = (x[i] - h).max(lower[i]);
        let denom = xp - xm;
        if denom <= 0.0 {
            grad[i] = 0.0;
            continue;
        }

        probe[i] = xp;
        let fp = f(&probe);
        probe[i] = xm;
        let fm = f(&probe);
        probe[i] = x[i];
        *evaluations += 2;

        let g = (fp - fm) / denom;
        grad[i] = if g.is_finite() { g } else { 0.0 };
    }
}

/// Two-loop L-BFGS recursion restricted to free coordinates.
fn two_loop_direction(
    grad: &[f64],
    pairs: &VecDeque<(Vec<f64>, Vec<f64>, f64)>,
    free: &[bool],
) -> Vec<f64> {
    let n = grad.len();
    let mut q: Vec<f64> = (0..n).map(|i| if free[i] { grad[i] } else { 0.0 }).collect();

    if pairs.is_empty() {
        return q.iter().map(|g| -g).collect();
    }

    let mut alphas = Vec::with_capacity(pairs.len());
    for (s, yv, rho) in pairs.iter().rev() {
        let alpha = rho * dot(s, &q);
        for i in 0..n {
            q[i] -= alpha * yv[i];
        }
        alphas.push(alpha);
    }

    // Initial Hessian scaling from the most recent pair.
    let (s_last, y_last, _) = pairs.back().expect("pairs not empty");
    let gamma = dot(s_last, y_last) / dot(y_last, y_last).max(1e-300);
    for qi in q.iter_mut() {
        *qi *= gamma;
    }

    for ((s, yv, rho), alpha) in pairs.iter().zip(alphas.iter().rev()) {
        let beta = rho * dot(yv, &q);
        for i in 0..n {
            q[i] += s[i] * (alpha - beta);
        }
    }

    for i in 0..n {
        if !free[i] {
            q[i] = 0.0;
        }
    }
    q.iter().map(|v| -v).collect()
}

/// Zero direction components that push against an active bound.
fn mask_active(dir: &mut [f64], x: &[f64], lower: &[f64], upper: &[f64]) {
    for i in 0..dir.len() {
        let at_lower = x[i] <= lower[i] && dir[i] < 0.0;
        let at_upper = x[i] >= upper[i] && dir[i] > 0.0;
        if at_lower || at_upper {
            dir[i] = 0.0;
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
