//! Plate-level parameter estimation.
//!
//! The objective is the sum of squared residuals between the cell block of
//! the simulated trajectory and the plate's measured cell amounts, evaluated
//! at the plate's own observation times. SSE is used uniformly throughout the
//! crate; RMSE is derived for reporting only.
//!
//! Two details matter for optimizer health:
//!
//! - The initial cell amount is typically orders of magnitude smaller than
//!   every other parameter (1e-6 vs 1.0), which wrecks finite-difference
//!   gradient scaling. The fitter multiplies that single parameter (and its
//!   bounds) by `amount_rescale_factor` before optimizing and divides it back
//!   out of the estimate afterwards; callers never see the scaled value.
//! - Growth-rate bounds at every empty-culture index are forced to `(0, 0)`
//!   regardless of what the caller supplied, so empty sites can never acquire
//!   spurious growth.
//!
//! A failed integration during an objective evaluation is treated as an
//! infinite objective for that trial point, not as a fatal error; optimizer
//! non-convergence returns the best point found with `success = false`.

use std::time::Instant;

use crate::domain::{Bounds, FitDiagnostics, FitResult, ParamVector, Plate};
use crate::error::PlateError;
use crate::math::{OptimOptions, minimize_bounded};
use crate::models::ModelKind;
use crate::sim::solve;

/// Fitting options that affect how a plate is calibrated.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Outer optimizer iteration budget; `None` runs until convergence.
    pub max_iterations: Option<usize>,
    /// Objective-evaluation budget (finite-difference stencils included).
    pub max_function_evals: Option<usize>,
    /// Fractional objective-reduction convergence tolerance.
    pub convergence_tolerance: f64,
    /// Rescaling factor applied to the initial-cell-amount parameter.
    pub amount_rescale_factor: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_function_evals: None,
            convergence_tolerance: 1e-10,
            amount_rescale_factor: 10_000.0,
        }
    }
}

/// Fit `model` to the plate's measurements.
///
/// `param_guess` and `bounds` use the flat parameter order (plate-level
/// block, then one growth rate per culture). Shape mismatches fail before any
/// simulation runs. The returned [`FitResult`] records the pinned guess and
/// bounds actually used, for audit and repeatability.
pub fn fit(
    plate: &Plate,
    model: ModelKind,
    param_guess: &ParamVector,
    bounds: &Bounds,
    opts: &FitOptions,
) -> Result<FitResult, PlateError> {
    let n = plate.no_cultures();
    param_guess.check_shape(model, n, "Fit guess")?;
    if bounds.len() != param_guess.len() {
        return Err(PlateError::shape(format!(
            "Bounds length {} != parameter length {} for model {}.",
            bounds.len(),
            param_guess.len(),
            model.display_name()
        )));
    }
    if !(opts.amount_rescale_factor.is_finite() && opts.amount_rescale_factor > 0.0) {
        return Err(PlateError::invalid(format!(
            "amount_rescale_factor must be positive, got {}.",
            opts.amount_rescale_factor
        )));
    }

    // Pin empty cultures to zero growth before anything else.
    let n_plate = model.plate_param_names().len();
    let mut guess = param_guess.clone();
    let mut pinned_bounds = bounds.clone();
    for &i in plate.empties() {
        guess.per_culture[i] = 0.0;
        pinned_bounds.fix(n_plate + i, 0.0);
    }

    // Rescale the initial cell amount into the optimizer's working units.
    let c0 = model.c0_index();
    let factor = opts.amount_rescale_factor;
    let mut x0 = guess.flatten();
    x0[c0] *= factor;
    let mut work_bounds = pinned_bounds.clone();
    work_bounds.scale(c0, factor);

    let times = plate.times();
    let measurements = plate.measurements();
    let objective = |x: &[f64]| -> f64 {
        let mut flat = x.to_vec();
        flat[c0] /= factor;
        let params = match ParamVector::from_flat(model, n, &flat) {
            Ok(p) => p,
            Err(_) => return f64::INFINITY,
        };
        match solve(model, plate, &params, times) {
            Ok(solution) => sse(&solution, measurements, n),
            // A bad trial point (usually an integration failure at an extreme
            // parameter combination) must not abort the whole fit.
            Err(_) => f64::INFINITY,
        }
    };

    let optim_opts = OptimOptions {
        max_iterations: opts.max_iterations,
        max_evaluations: opts.max_function_evals,
        tolerance: opts.convergence_tolerance,
        ..OptimOptions::default()
    };

    let started = Instant::now();
    let minimum = minimize_bounded(
        objective,
        &x0,
        &work_bounds.lower(),
        &work_bounds.upper(),
        &optim_opts,
    )?;
    let elapsed_secs = started.elapsed().as_secs_f64();

    let mut estimate_flat = minimum.x;
    estimate_flat[c0] /= factor;
    let estimate = ParamVector::from_flat(model, n, &estimate_flat)?;

    Ok(FitResult {
        model,
        estimate,
        objective: minimum.objective,
        success: minimum.converged,
        diagnostics: FitDiagnostics {
            converged: minimum.converged,
            iterations: minimum.iterations,
            evaluations: minimum.evaluations,
            elapsed_secs,
        },
        guess,
        bounds: pinned_bounds,
    })
}

/// Sum of squared residuals between the simulated cell block and the
/// time-major measured cell amounts.
fn sse(solution: &[Vec<f64>], measurements: &[f64], no_cultures: usize) -> f64 {
    let mut acc = 0.0;
    for (t, row) in solution.iter().enumerate() {
        let observed = &measurements[t * no_cultures..(t + 1) * no_cultures];
        for i in 0..no_cultures {
            let r = row[i] - observed[i];
            acc += r * r;
        }
    }
    acc
}

/// Root-mean-square error corresponding to an SSE over `n` residuals.
pub fn rmse(sse: f64, n: usize) -> f64 {
    if n == 0 { 0.0 } else { (sse / n as f64).sqrt() }
}
