//! Stage 1: closed-form amount guesses from final measurements.
//!
//! Under the mass-balance approximation "all nutrient ends up as cells", the
//! initial nutrient amount per culture is roughly the mean final measured
//! cell amount, and the initial cell amount is a small caller-supplied
//! fraction of it. For the boundary-corrected model the nutrient total is
//! split between internal and edge cultures using the caller's edge/internal
//! area ratio and the relation `total = n_internal * N_i + n_edge * N_e`
//! with `N_e = N_i * area_ratio`.

use crate::domain::Plate;
use crate::error::PlateError;
use crate::guess::GuessConfig;
use crate::models::ModelKind;

/// Closed-form initial-amount estimates.
#[derive(Debug, Clone, PartialEq)]
pub struct AmountGuess {
    /// Initial cell amount per culture.
    pub c_0: f64,
    /// Initial nutrient amount(s) per culture.
    pub nutrient: NutrientGuess,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NutrientGuess {
    /// One shared initial nutrient amount (Independent / Competition).
    Uniform(f64),
    /// Separate internal and edge amounts (boundary-corrected model).
    Split { internal: f64, edge: f64 },
}

impl AmountGuess {
    /// The nutrient amount of an internal culture (or the shared amount).
    pub fn internal_nutrient(&self) -> f64 {
        match self.nutrient {
            NutrientGuess::Uniform(n) => n,
            NutrientGuess::Split { internal, .. } => internal,
        }
    }
}

/// Compute stage-1 amount guesses for `model` from the plate's final
/// measurements.
///
/// Fails as degenerate when every culture is empty (there is no biological
/// signal to guess from).
pub fn closed_form_amounts(
    plate: &Plate,
    model: ModelKind,
    cfg: &GuessConfig,
) -> Result<AmountGuess, PlateError> {
    let n = plate.no_cultures();
    let last = plate.times().len() - 1;
    let final_cells = plate.measurements_at(last);

    let occupied: Vec<usize> = (0..n).filter(|&i| !plate.is_empty_culture(i)).collect();
    if occupied.is_empty() {
        return Err(PlateError::degenerate(
            "Amount guess stage: every culture on the plate is empty.",
        ));
    }

    let mean_final =
        occupied.iter().map(|&i| final_cells[i]).sum::<f64>() / occupied.len() as f64;
    let c_0 = mean_final * cfg.cell_ratio;

    let nutrient = match model {
        ModelKind::CompetitionBc => {
            // Scale the occupied-culture mean up to a whole-plate total, then
            // split it between internal and edge cultures.
            let total = mean_final * n as f64;
            let n_internal = plate.topology().internal_indices().len() as f64;
            let n_edge = plate.topology().edge_indices().len() as f64;
            let internal = total / (n_internal + n_edge * cfg.area_ratio);
            NutrientGuess::Split {
                internal,
                edge: internal * cfg.area_ratio,
            }
        }
        _ => NutrientGuess::Uniform(mean_final),
    };

    Ok(AmountGuess { c_0, nutrient })
}
