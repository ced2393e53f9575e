//! Synthetic plate generation.
//!
//! Fits are validated end to end against plates whose true parameters are
//! known: simulate a plate from a chosen parameter vector, optionally corrupt
//! the cell measurements with Gaussian noise, and hand the result to the
//! guesser/fitter. The RNG is threaded explicitly so every noisy dataset is
//! reproducible from its seed.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::domain::{ParamVector, Plate};
use crate::error::PlateError;
use crate::models::ModelKind;
use crate::sim::{cell_block, solve};
use crate::topology::GridTopology;

/// Simulate a plate of the given shape from a true parameter vector.
///
/// The returned plate's "measurements" are the noiseless simulated cell
/// amounts at `times`, time-major, with `empties` carried through.
pub fn simulate_plate(
    model: ModelKind,
    rows: usize,
    cols: usize,
    times: &[f64],
    params: &ParamVector,
    empties: Vec<usize>,
) -> Result<Plate, PlateError> {
    let topology = GridTopology::build(rows, cols)?;
    let n = topology.no_cultures();
    let shell = Plate::new(
        topology.clone(),
        times.to_vec(),
        vec![0.0; times.len() * n],
        empties.clone(),
    )?;

    let solution = solve(model, &shell, params, times)?;
    let mut measurements = Vec::with_capacity(times.len() * n);
    for row in &solution {
        measurements.extend_from_slice(cell_block(row, &shell));
    }

    Plate::new(topology, times.to_vec(), measurements, empties)
}

/// Add zero-mean Gaussian noise of standard deviation `sigma` to every
/// measurement, clamping at zero (a measured colony size cannot be
/// negative).
pub fn add_noise(measurements: &mut [f64], sigma: f64, rng: &mut StdRng) -> Result<(), PlateError> {
    if !(sigma.is_finite() && sigma >= 0.0) {
        return Err(PlateError::invalid(format!(
            "Noise sigma must be finite and non-negative, got {sigma}."
        )));
    }
    if sigma == 0.0 {
        return Ok(());
    }
    let normal = Normal::new(0.0, sigma)
        .map_err(|e| PlateError::invalid(format!("Noise distribution error: {e}")))?;
    for v in measurements.iter_mut() {
        *v = (*v + normal.sample(rng)).max(0.0);
    }
    Ok(())
}

/// [`simulate_plate`] followed by [`add_noise`] on the measurements.
pub fn noisy_plate(
    model: ModelKind,
    rows: usize,
    cols: usize,
    times: &[f64],
    params: &ParamVector,
    empties: Vec<usize>,
    sigma: f64,
    rng: &mut StdRng,
) -> Result<Plate, PlateError> {
    let clean = simulate_plate(model, rows, cols, times, params, empties)?;
    let mut measurements = clean.measurements().to_vec();
    add_noise(&mut measurements, sigma, rng)?;
    Plate::new(
        clean.topology().clone(),
        clean.times().to_vec(),
        measurements,
        clean.empties().to_vec(),
    )
}

/// Draw uniform per-culture growth rates in `[lo, hi)`, zeroed at empties.
/// Convenience for randomized experiments; deterministic given the RNG.
pub fn random_growth_rates(
    no_cultures: usize,
    lo: f64,
    hi: f64,
    empties: &[usize],
    rng: &mut StdRng,
) -> Vec<f64> {
    (0..no_cultures)
        .map(|i| {
            if empties.contains(&i) {
                0.0
            } else {
                rng.gen_range(lo..hi)
            }
        })
        .collect()
}
