//! Simulation engine: parameter vector in, trajectory out.
//!
//! `solve` tiles plate-level initial amounts across all cultures (zeroing the
//! initial cell amount at empty-culture indices), drives the adaptive
//! Dormand–Prince integrator over the model's rate function at
//! atol = rtol = 1e-8, and clamps the returned trajectory element-wise to be
//! non-negative. The clamp is a documented modeling decision: the integrator
//! may produce transient negative excursions of biologically non-negative
//! amounts.
//!
//! Output layout: one row per requested time; within a row, species-major
//! blocks (`cells`, then `nutrient`, ...), each `no_cultures` long. The cell
//! block of row `t` therefore aligns with `plate.measurements_at(t)`.

pub mod sample;

use crate::domain::{ParamVector, Plate};
use crate::error::PlateError;
use crate::math::{OdeOptions, rk45};
use crate::models::{ModelKind, RateContext, RateWork};

/// Simulate `model` on `plate` at the given parameter vector, sampling at
/// `times`.
///
/// Deterministic given identical inputs. Integration failures are surfaced
/// as recoverable errors carrying the furthest time reached; callers may
/// retry with looser tolerances via [`solve_with_options`].
pub fn solve(
    model: ModelKind,
    plate: &Plate,
    params: &ParamVector,
    times: &[f64],
) -> Result<Vec<Vec<f64>>, PlateError> {
    solve_with_options(model, plate, params, times, &OdeOptions::default())
}

/// [`solve`] with explicit integrator tolerances.
pub fn solve_with_options(
    model: ModelKind,
    plate: &Plate,
    params: &ParamVector,
    times: &[f64],
    opts: &OdeOptions,
) -> Result<Vec<Vec<f64>>, PlateError> {
    params.check_shape(model, plate.no_cultures(), "Simulation parameters")?;

    let ctx = RateContext {
        model,
        params,
        topology: plate.topology(),
    };
    let mut work = RateWork::new(model, plate.no_cultures());
    let y0 = model.initial_state(plate, params);

    let mut solution = rk45(
        |t, y, dy| ctx.derivatives(t, y, dy, &mut work),
        &y0,
        times,
        opts,
    )?;

    // Post-hoc non-negativity: amounts cannot be negative.
    for row in &mut solution {
        for v in row.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
        }
    }

    Ok(solution)
}

/// The cell-amount block of one solution row.
pub fn cell_block<'a>(row: &'a [f64], plate: &Plate) -> &'a [f64] {
    &row[..plate.no_cultures()]
}

/// Simulated cell amounts at the final requested time, one per culture.
pub fn final_cell_amounts(solution: &[Vec<f64>], plate: &Plate) -> Vec<f64> {
    solution
        .last()
        .map(|row| cell_block(row, plate).to_vec())
        .unwrap_or_default()
}
