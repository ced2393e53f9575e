//! Stage 3: diffusion-constant regression.
//!
//! Diffusion homogenizes the plate: the stronger it is, the smaller the
//! spread of final cell amounts across cultures. The stage sweeps a small
//! set of trial diffusion constants, simulates the plate at each with the
//! stage-1 amounts and stage-2 rates, and linearly regresses the variance of
//! the simulated final cell amounts against the trial constant. Inverting
//! that line at the measured variance gives the guess, clamped into
//! `[0, kn_max]`.

use crate::domain::{ParamVector, Plate};
use crate::error::PlateError;
use crate::guess::GuessConfig;
use crate::guess::amounts::{AmountGuess, NutrientGuess};
use crate::math::fit_line;
use crate::models::ModelKind;
use crate::sim::{final_cell_amounts, solve};

/// Guess the diffusion constant by variance regression.
///
/// `rates` is one growth rate per culture (stage-2 output). Trial points
/// whose simulation fails are skipped; the regression needs at least two
/// surviving points.
pub fn regress_diffusion(
    plate: &Plate,
    model: ModelKind,
    amounts: &AmountGuess,
    rates: &[f64],
    cfg: &GuessConfig,
) -> Result<f64, PlateError> {
    if model.kn_index().is_none() {
        return Err(PlateError::invalid(format!(
            "Model {} has no diffusion constant to guess.",
            model.display_name()
        )));
    }
    let (start, stop, count) = cfg.diffusion_sweep;
    if !(start.is_finite() && stop.is_finite() && start >= 0.0 && stop > start && count >= 2) {
        return Err(PlateError::invalid(format!(
            "Diffusion sweep ({start}, {stop}, {count}) is not a valid range."
        )));
    }

    let last = plate.times().len() - 1;
    let measured_var = occupied_variance(plate.measurements_at(last), plate);

    let mut trial_kns = Vec::with_capacity(count);
    let mut trial_vars = Vec::with_capacity(count);
    for i in 0..count {
        let kn = start + (stop - start) * i as f64 / (count - 1) as f64;
        let params = assemble_params(model, amounts, kn, rates);
        match solve(model, plate, &params, plate.times()) {
            Ok(solution) => {
                let finals = final_cell_amounts(&solution, plate);
                trial_kns.push(kn);
                trial_vars.push(occupied_variance(&finals, plate));
            }
            // Extreme trial constants can defeat the integrator; drop the
            // point rather than abort the sweep.
            Err(e) if e.is_integration_failure() => {}
            Err(e) => return Err(e),
        }
    }
    if trial_kns.len() < 2 {
        return Err(PlateError::degenerate(
            "Diffusion sweep left fewer than two usable trial points.",
        ));
    }

    let (intercept, slope) = fit_line(&trial_kns, &trial_vars)?;
    if slope.abs() < 1e-12 {
        // Variance does not respond to diffusion here (uniform rates, single
        // culture): the constant is unidentifiable, fall back to zero.
        return Ok(0.0);
    }
    Ok(((measured_var - intercept) / slope).clamp(0.0, cfg.kn_max))
}

/// Assemble a full parameter vector for `model` from staged guesses.
pub(crate) fn assemble_params(
    model: ModelKind,
    amounts: &AmountGuess,
    kn: f64,
    rates: &[f64],
) -> ParamVector {
    let plate_level = match (model, &amounts.nutrient) {
        (ModelKind::Independent, _) => vec![amounts.c_0, amounts.internal_nutrient()],
        (ModelKind::CompetitionBc, NutrientGuess::Split { internal, edge }) => {
            vec![amounts.c_0, *internal, *edge, kn]
        }
        // A uniform stage-1 guess for the boundary-corrected model means the
        // caller skipped the split; treat both regions alike.
        (ModelKind::CompetitionBc, NutrientGuess::Uniform(n)) => {
            vec![amounts.c_0, *n, *n, kn]
        }
        _ => vec![amounts.c_0, amounts.internal_nutrient(), kn],
    };
    ParamVector::new(plate_level, rates.to_vec())
}

/// Variance of `values` over occupied cultures.
fn occupied_variance(values: &[f64], plate: &Plate) -> f64 {
    let occupied: Vec<f64> = values
        .iter()
        .enumerate()
        .filter(|(i, _)| !plate.is_empty_culture(*i))
        .map(|(_, &v)| v)
        .collect();
    if occupied.len() < 2 {
        return 0.0;
    }
    let mean = occupied.iter().sum::<f64>() / occupied.len() as f64;
    occupied.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / occupied.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::sample::simulate_plate;

    fn times() -> Vec<f64> {
        (0..=40).map(|i| i as f64 * 0.5).collect()
    }

    fn staged_amounts() -> AmountGuess {
        AmountGuess {
            c_0: 0.01,
            nutrient: NutrientGuess::Uniform(1.0),
        }
    }

    #[test]
    fn recovers_a_moderate_diffusion_constant() {
        let rates = vec![0.6, 1.4, 1.0, 0.8, 1.2, 0.7, 1.3, 0.9, 1.1];
        let truth = ParamVector::new(vec![0.01, 1.0, 0.2], rates.clone());
        let plate =
            simulate_plate(ModelKind::Competition, 3, 3, &times(), &truth, vec![]).unwrap();

        let cfg = GuessConfig {
            diffusion_sweep: (0.0, 0.5, 5),
            ..GuessConfig::default()
        };
        let kn =
            regress_diffusion(&plate, ModelKind::Competition, &staged_amounts(), &rates, &cfg)
                .unwrap();
        assert!(kn > 0.0 && kn < 0.5, "kn = {kn}");
        assert!((kn - 0.2).abs() < 0.15, "kn = {kn}");
    }

    #[test]
    fn uniform_rates_make_the_constant_unidentifiable() {
        let rates = vec![1.0; 4];
        let truth = ParamVector::new(vec![0.01, 1.0, 0.3], rates.clone());
        let plate =
            simulate_plate(ModelKind::Competition, 2, 2, &times(), &truth, vec![]).unwrap();

        let kn = regress_diffusion(
            &plate,
            ModelKind::Competition,
            &staged_amounts(),
            &rates,
            &GuessConfig::default(),
        )
        .unwrap();
        assert_eq!(kn, 0.0);
    }

    #[test]
    fn rejects_models_without_diffusion() {
        let rates = vec![1.0; 4];
        let truth = ParamVector::new(vec![0.01, 1.0], rates.clone());
        let plate =
            simulate_plate(ModelKind::Independent, 2, 2, &times(), &truth, vec![]).unwrap();

        let err = regress_diffusion(
            &plate,
            ModelKind::Independent,
            &staged_amounts(),
            &rates,
            &GuessConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_a_bad_sweep_range() {
        let rates = vec![1.0; 4];
        let truth = ParamVector::new(vec![0.01, 1.0, 0.1], rates.clone());
        let plate =
            simulate_plate(ModelKind::Competition, 2, 2, &times(), &truth, vec![]).unwrap();

        let cfg = GuessConfig {
            diffusion_sweep: (0.5, 0.5, 5),
            ..GuessConfig::default()
        };
        let err =
            regress_diffusion(&plate, ModelKind::Competition, &staged_amounts(), &rates, &cfg)
                .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn variance_is_computed_over_occupied_cultures_only() {
        let topo = crate::topology::GridTopology::build(2, 2).unwrap();
        let plate = crate::domain::Plate::new(
            topo,
            vec![0.0, 1.0],
            vec![0.0; 8],
            vec![3],
        )
        .unwrap();
        // Culture 3 would dominate the variance if it were included.
        let v = occupied_variance(&[1.0, 1.0, 1.0, 100.0], &plate);
        assert_eq!(v, 0.0);
    }
}
