//! Heuristic initial-guess pipeline.
//!
//! A fit over hundreds of coupled parameters goes nowhere from an arbitrary
//! starting point. The guesser builds a starting vector and matching bounds
//! in three stages:
//!
//! 1. closed-form initial amounts from the final measurements ([`amounts`])
//! 2. parallel per-culture growth-rate quick fits ([`quick_fit`])
//! 3. diffusion-constant regression against final-amount variance
//!    ([`diffusion`])
//!
//! Occupied cultures whose quick fit collapsed to zero are re-seeded with the
//! plate-average rate; if even the average is zero the guess is flagged as
//! degenerate so callers can widen bounds or inspect the data.

pub mod amounts;
pub mod diffusion;
pub mod quick_fit;

pub use amounts::{AmountGuess, NutrientGuess, closed_form_amounts};
pub use diffusion::regress_diffusion;
pub use quick_fit::{QuickFit, average_rate, quick_fit_all};

use rand::rngs::StdRng;

use crate::domain::{Bounds, ParamVector, Plate};
use crate::error::PlateError;
use crate::models::ModelKind;

/// Which single-culture model stage 2 fits in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickFitModel {
    /// Plain logistic-style growth, no neighbour interaction.
    Independent,
    /// Growth flanked by a fixed slow and fast imaginary neighbour, letting
    /// the isolated series account for nutrient exchange it cannot see.
    ImaginaryNeighbour,
}

/// Tuning knobs for the guess pipeline.
#[derive(Debug, Clone)]
pub struct GuessConfig {
    /// Initial cell amount as a fraction of the mean final measurement.
    pub cell_ratio: f64,
    /// Edge-to-internal culture area ratio (boundary-corrected model only).
    pub area_ratio: f64,
    /// `(start, stop, count)` trial diffusion constants for stage 3.
    pub diffusion_sweep: (f64, f64, usize),
    /// Upper bound on the guessed diffusion constant.
    pub kn_max: f64,
    /// Multiplicative half-width of the amount bounds around the guess.
    pub amount_uncertainty: f64,
    /// Single-culture model used by the stage-2 quick fits.
    pub quick_fit_model: QuickFitModel,
    /// Jittered restarts per culture in stage 2 (at least 1).
    pub quick_fit_attempts: usize,
    /// Fixed (slow, fast) imaginary-neighbour growth rates.
    pub imaginary_rates: (f64, f64),
    /// Fixed diffusion constant of the imaginary-neighbour quick model.
    pub imaginary_kn: f64,
}

impl Default for GuessConfig {
    fn default() -> Self {
        Self {
            cell_ratio: 1e-4,
            area_ratio: 1.5,
            diffusion_sweep: (0.0, 1.0, 5),
            kn_max: 10.0,
            amount_uncertainty: 2.0,
            quick_fit_model: QuickFitModel::Independent,
            quick_fit_attempts: 3,
            imaginary_rates: (0.2, 5.0),
            imaginary_kn: 0.1,
        }
    }
}

impl GuessConfig {
    fn validate(&self) -> Result<(), PlateError> {
        if !(self.cell_ratio.is_finite() && self.cell_ratio > 0.0) {
            return Err(PlateError::invalid(format!(
                "cell_ratio must be positive, got {}.",
                self.cell_ratio
            )));
        }
        if !(self.area_ratio.is_finite() && self.area_ratio > 0.0) {
            return Err(PlateError::invalid(format!(
                "area_ratio must be positive, got {}.",
                self.area_ratio
            )));
        }
        if !(self.amount_uncertainty.is_finite() && self.amount_uncertainty > 1.0) {
            return Err(PlateError::invalid(format!(
                "amount_uncertainty must exceed 1, got {}.",
                self.amount_uncertainty
            )));
        }
        if !(self.kn_max.is_finite() && self.kn_max > 0.0) {
            return Err(PlateError::invalid(format!(
                "kn_max must be positive, got {}.",
                self.kn_max
            )));
        }
        Ok(())
    }
}

/// A complete starting point for [`crate::fit::fit`].
#[derive(Debug, Clone)]
pub struct Guess {
    pub model: ModelKind,
    pub params: ParamVector,
    pub bounds: Bounds,
    /// Stage-2 per-culture results, kept for inspection.
    pub quick_fits: Vec<QuickFit>,
    /// True when no culture produced a usable growth rate and the guess fell
    /// back to a (possibly zero) plate average.
    pub degenerate_average: bool,
}

/// Run the full three-stage pipeline for `model` on `plate`.
///
/// The imaginary-neighbour model is a stage-2 vehicle, not a fit target;
/// asking to guess for it is an input error. Deterministic given the RNG
/// state.
pub fn guess(
    plate: &Plate,
    model: ModelKind,
    cfg: &GuessConfig,
    rng: &mut StdRng,
) -> Result<Guess, PlateError> {
    if model == ModelKind::ImaginaryNeighbour {
        return Err(PlateError::invalid(
            "The imaginary-neighbour model is only used for quick fits; guess for a plate model.",
        ));
    }
    cfg.validate()?;

    let staged = closed_form_amounts(plate, model, cfg)?;
    let quick_fits = quick_fit_all(plate, &staged, cfg, rng)?;
    let (avg, degenerate_average) = average_rate(&quick_fits, plate);

    // Re-seed occupied cultures whose isolated fit found nothing.
    let rates: Vec<f64> = quick_fits
        .iter()
        .map(|f| {
            if plate.is_empty_culture(f.culture) {
                0.0
            } else if f.rate > 0.0 && f.rate.is_finite() {
                f.rate
            } else {
                avg
            }
        })
        .collect();

    let kn = if model.kn_index().is_some() {
        regress_diffusion(plate, model, &staged, &rates, cfg)?
    } else {
        0.0
    };

    let params = diffusion::assemble_params(model, &staged, kn, &rates);
    let bounds = guess_bounds(plate, model, &params, cfg)?;

    Ok(Guess {
        model,
        params,
        bounds,
        quick_fits,
        degenerate_average,
    })
}

/// Box constraints around a guessed vector: amounts within a multiplicative
/// window, the diffusion constant in `[0, kn_max]`, growth rates free above
/// zero and pinned at empties.
fn guess_bounds(
    plate: &Plate,
    model: ModelKind,
    params: &ParamVector,
    cfg: &GuessConfig,
) -> Result<Bounds, PlateError> {
    let u = cfg.amount_uncertainty;
    let kn_index = model.kn_index();

    let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(params.len());
    for (i, &v) in params.plate_level.iter().enumerate() {
        if Some(i) == kn_index {
            pairs.push((0.0, cfg.kn_max));
        } else {
            pairs.push((v / u, v * u));
        }
    }
    for i in 0..params.per_culture.len() {
        if plate.is_empty_culture(i) {
            pairs.push((0.0, 0.0));
        } else {
            pairs.push((0.0, f64::INFINITY));
        }
    }
    Bounds::from_pairs(pairs)
}
