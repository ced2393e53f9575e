//! Stage 2: per-culture growth-rate quick fits.
//!
//! Every culture's measured time series is re-fit in isolation on a 1x1
//! plate with the stage-1 amounts pinned, leaving only that culture's growth
//! rate free. Diffusion cannot be expressed on a single culture; callers who
//! want the isolated series to "feel" its neighbours use the
//! imaginary-neighbour quick model instead of the independent one.
//!
//! The cultures are fit in parallel. The caller's RNG is split into one seed
//! per culture up front, so results are reproducible regardless of how rayon
//! schedules the work.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use rayon::prelude::*;

use crate::domain::{Bounds, ParamVector, Plate};
use crate::error::PlateError;
use crate::fit::{FitOptions, fit};
use crate::guess::amounts::AmountGuess;
use crate::guess::{GuessConfig, QuickFitModel};
use crate::math::fit_line;
use crate::models::ModelKind;
use crate::topology::GridTopology;

/// Outcome of one culture's isolated growth-rate fit.
#[derive(Debug, Clone, PartialEq)]
pub struct QuickFit {
    pub culture: usize,
    /// Estimated growth rate (exactly zero for empty cultures).
    pub rate: f64,
    /// SSE of the best quick fit.
    pub objective: f64,
}

/// Quick-fit every culture on the plate, in parallel.
///
/// Empty cultures are skipped and reported with a zero rate. Each occupied
/// culture gets `cfg.quick_fit_attempts` starts: the first from the measured
/// log-slope, the rest jittered log-normally; the best SSE wins.
pub fn quick_fit_all(
    plate: &Plate,
    amounts: &AmountGuess,
    cfg: &GuessConfig,
    rng: &mut StdRng,
) -> Result<Vec<QuickFit>, PlateError> {
    let n = plate.no_cultures();
    let seeds: Vec<u64> = (0..n).map(|_| rng.r#gen()).collect();

    (0..n)
        .into_par_iter()
        .map(|i| {
            if plate.is_empty_culture(i) {
                return Ok(QuickFit {
                    culture: i,
                    rate: 0.0,
                    objective: 0.0,
                });
            }
            fit_one_culture(plate, i, amounts, cfg, seeds[i])
        })
        .collect()
}

/// Mean of the positive quick-fit rates over occupied cultures.
///
/// When no occupied culture produced a positive rate the plain mean over
/// occupied cultures is returned instead and the result is flagged as
/// degenerate.
pub fn average_rate(fits: &[QuickFit], plate: &Plate) -> (f64, bool) {
    let occupied: Vec<&QuickFit> = fits
        .iter()
        .filter(|f| !plate.is_empty_culture(f.culture))
        .collect();
    if occupied.is_empty() {
        return (0.0, true);
    }

    let positive: Vec<f64> = occupied
        .iter()
        .filter(|f| f.rate > 0.0 && f.rate.is_finite())
        .map(|f| f.rate)
        .collect();
    if positive.is_empty() {
        let mean = occupied.iter().map(|f| f.rate).sum::<f64>() / occupied.len() as f64;
        return (mean, true);
    }
    (positive.iter().sum::<f64>() / positive.len() as f64, false)
}

fn fit_one_culture(
    plate: &Plate,
    culture: usize,
    amounts: &AmountGuess,
    cfg: &GuessConfig,
    seed: u64,
) -> Result<QuickFit, PlateError> {
    let series = plate.culture_series(culture);
    let mini = Plate::new(
        GridTopology::build(1, 1)?,
        plate.times().to_vec(),
        series.clone(),
        vec![],
    )?;

    let n_0 = amounts.internal_nutrient();
    let b_0 = initial_rate(plate.times(), &series, n_0);

    let (model, plate_level) = match cfg.quick_fit_model {
        QuickFitModel::Independent => {
            (ModelKind::Independent, vec![amounts.c_0, n_0])
        }
        QuickFitModel::ImaginaryNeighbour => (
            ModelKind::ImaginaryNeighbour,
            vec![
                amounts.c_0,
                n_0,
                cfg.imaginary_kn,
                cfg.imaginary_rates.0,
                cfg.imaginary_rates.1,
            ],
        ),
    };

    // Everything pinned except the single growth rate.
    let mut pairs: Vec<(f64, f64)> = plate_level.iter().map(|&v| (v, v)).collect();
    pairs.push((0.0, f64::INFINITY));
    let bounds = Bounds::from_pairs(pairs)?;

    let opts = FitOptions {
        max_iterations: Some(100),
        ..FitOptions::default()
    };
    let jitter = LogNormal::new(0.0, 0.5)
        .map_err(|e| PlateError::invalid(format!("Jitter distribution error: {e}")))?;
    let mut attempt_rng = StdRng::seed_from_u64(seed);

    let mut best: Option<QuickFit> = None;
    for attempt in 0..cfg.quick_fit_attempts.max(1) {
        let b_try = if attempt == 0 {
            b_0
        } else {
            b_0 * jitter.sample(&mut attempt_rng)
        };
        let guess = ParamVector::new(plate_level.clone(), vec![b_try]);
        let result = fit(&mini, model, &guess, &bounds, &opts)?;

        let candidate = QuickFit {
            culture,
            rate: result.estimate.per_culture[0],
            objective: result.objective,
        };
        let better = best
            .as_ref()
            .map(|b| candidate.objective < b.objective)
            .unwrap_or(true);
        if better {
            best = Some(candidate);
        }
    }

    // quick_fit_attempts >= 1, so best is always populated.
    best.ok_or_else(|| PlateError::degenerate("Quick fit produced no candidate."))
}

/// Seed the rate from the early exponential phase: for small times
/// `C(t) ~ C_0 * exp(b * N_0 * t)`, so the log-slope of the measured series
/// divided by the nutrient amount approximates `b`.
fn initial_rate(times: &[f64], series: &[f64], n_0: f64) -> f64 {
    let points: (Vec<f64>, Vec<f64>) = times
        .iter()
        .zip(series.iter())
        .filter(|&(_, &v)| v > 0.0)
        .map(|(&t, &v)| (t, v.ln()))
        .unzip();

    let slope = match fit_line(&points.0, &points.1) {
        Ok((_, slope)) => slope,
        Err(_) => return 1.0,
    };
    if n_0 > 0.0 && slope.is_finite() {
        (slope / n_0).clamp(1e-3, 1e3)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guess::amounts::NutrientGuess;
    use crate::sim::sample::simulate_plate;

    fn times() -> Vec<f64> {
        (0..=50).map(|i| i as f64 * 0.5).collect()
    }

    fn independent_plate(rates: Vec<f64>, empties: Vec<usize>) -> Plate {
        let params = ParamVector::new(vec![0.01, 1.0], rates);
        simulate_plate(ModelKind::Independent, 1, 2, &times(), &params, empties).unwrap()
    }

    fn stage1() -> AmountGuess {
        AmountGuess {
            c_0: 0.01,
            nutrient: NutrientGuess::Uniform(1.0),
        }
    }

    #[test]
    fn recovers_independent_rates_from_noiseless_series() {
        let plate = independent_plate(vec![1.5, 0.8], vec![]);
        let mut rng = StdRng::seed_from_u64(11);
        let fits = quick_fit_all(&plate, &stage1(), &GuessConfig::default(), &mut rng).unwrap();

        assert_eq!(fits.len(), 2);
        for (fit, truth) in fits.iter().zip([1.5, 0.8]) {
            let rel = (fit.rate - truth).abs() / truth;
            assert!(rel < 0.05, "culture {}: {} vs {truth}", fit.culture, fit.rate);
        }
    }

    #[test]
    fn empty_cultures_are_reported_with_zero_rate() {
        let plate = independent_plate(vec![1.2, 0.0], vec![1]);
        let mut rng = StdRng::seed_from_u64(3);
        let fits = quick_fit_all(&plate, &stage1(), &GuessConfig::default(), &mut rng).unwrap();
        assert_eq!(fits[1], QuickFit { culture: 1, rate: 0.0, objective: 0.0 });
        assert!(fits[0].rate > 0.0);
    }

    #[test]
    fn results_are_reproducible_for_a_fixed_seed() {
        let plate = independent_plate(vec![1.1, 0.7], vec![]);
        let run = || {
            let mut rng = StdRng::seed_from_u64(42);
            quick_fit_all(&plate, &stage1(), &GuessConfig::default(), &mut rng).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn initial_rate_tracks_the_log_slope() {
        let ts: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        // C(t) = 0.01 * exp(1.2 t) with N_0 = 1: expect b ~ 1.2.
        let series: Vec<f64> = ts.iter().map(|&t| 0.01 * (1.2 * t).exp()).collect();
        let b = initial_rate(&ts, &series, 1.0);
        assert!((b - 1.2).abs() < 1e-9, "b = {b}");
    }

    #[test]
    fn initial_rate_falls_back_on_flat_series() {
        let ts = [0.0, 1.0, 2.0];
        // All-zero series leaves no usable points.
        assert_eq!(initial_rate(&ts, &[0.0, 0.0, 0.0], 1.0), 1.0);
        // A constant series clamps at the floor.
        assert_eq!(initial_rate(&ts, &[0.5, 0.5, 0.5], 1.0), 1e-3);
    }

    #[test]
    fn average_rate_ignores_empties_and_flags_degeneracy() {
        let plate = independent_plate(vec![1.0, 0.0], vec![1]);
        let fits = vec![
            QuickFit { culture: 0, rate: 2.0, objective: 0.1 },
            QuickFit { culture: 1, rate: 0.0, objective: 0.0 },
        ];
        assert_eq!(average_rate(&fits, &plate), (2.0, false));

        let flat = vec![
            QuickFit { culture: 0, rate: 0.0, objective: 0.1 },
            QuickFit { culture: 1, rate: 0.0, objective: 0.0 },
        ];
        assert_eq!(average_rate(&flat, &plate), (0.0, true));
    }
}
