//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during simulation and fitting
//! - exported to JSON by external persistence/plotting collaborators
//! - reloaded later for comparisons across fit runs
//!
//! Parameter vectors are structured (`plate_level` + `per_culture`) rather
//! than flat arrays sliced by convention; the flat optimizer-facing layout
//! exists only at the fitter boundary.

use serde::{Deserialize, Serialize};

use crate::error::PlateError;
use crate::models::ModelKind;
use crate::topology::GridTopology;

/// A full parameter set for one model on one plate: the plate-level block
/// (initial amounts, diffusion constant, ...) followed by one growth rate per
/// culture in row-major plate order.
///
/// The same shape is used for "true" (simulation), "guessed" and "estimated"
/// vectors; provenance is tracked by the record that holds them, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamVector {
    pub plate_level: Vec<f64>,
    pub per_culture: Vec<f64>,
}

impl ParamVector {
    pub fn new(plate_level: Vec<f64>, per_culture: Vec<f64>) -> Self {
        Self {
            plate_level,
            per_culture,
        }
    }

    /// Total length of the flat layout.
    pub fn len(&self) -> usize {
        self.plate_level.len() + self.per_culture.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat layout: plate-level block first, then per-culture growth rates.
    pub fn flatten(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.plate_level);
        out.extend_from_slice(&self.per_culture);
        out
    }

    /// Rebuild the structured form from a flat vector.
    ///
    /// Fails with a shape mismatch if `flat` does not match the model's
    /// plate-level parameter count plus `no_cultures`.
    pub fn from_flat(
        model: ModelKind,
        no_cultures: usize,
        flat: &[f64],
    ) -> Result<Self, PlateError> {
        let n_plate = model.plate_param_names().len();
        let expected = n_plate + no_cultures;
        if flat.len() != expected {
            return Err(PlateError::shape(format!(
                "Flat parameter vector for {} has length {}, expected {} ({} plate-level + {} cultures).",
                model.display_name(),
                flat.len(),
                expected,
                n_plate,
                no_cultures
            )));
        }
        Ok(Self {
            plate_level: flat[..n_plate].to_vec(),
            per_culture: flat[n_plate..].to_vec(),
        })
    }

    /// Check this vector's shape against a model/plate pair.
    pub fn check_shape(
        &self,
        model: ModelKind,
        no_cultures: usize,
        what: &str,
    ) -> Result<(), PlateError> {
        let n_plate = model.plate_param_names().len();
        if self.plate_level.len() != n_plate || self.per_culture.len() != no_cultures {
            return Err(PlateError::shape(format!(
                "{what}: plate-level {} (expected {}), per-culture {} (expected {}) for model {}.",
                self.plate_level.len(),
                n_plate,
                self.per_culture.len(),
                no_cultures,
                model.display_name()
            )));
        }
        Ok(())
    }
}

/// Per-parameter box constraints, in the flat parameter order.
///
/// `lower == upper` pins a parameter (known diffusion constant, zero growth
/// rate for an empty culture). Infinite uppers are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pairs: Vec<(f64, f64)>,
}

impl Bounds {
    /// Build from `(lower, upper)` pairs. Each pair must satisfy
    /// `lower <= upper` with a finite lower bound.
    pub fn from_pairs(pairs: Vec<(f64, f64)>) -> Result<Self, PlateError> {
        for (idx, &(lo, hi)) in pairs.iter().enumerate() {
            if !lo.is_finite() || hi.is_nan() || lo > hi {
                return Err(PlateError::invalid(format!(
                    "Bound {idx} is invalid: ({lo}, {hi})."
                )));
            }
        }
        Ok(Self { pairs })
    }

    /// Fully pinned bounds: `lower == upper == value` everywhere. Used by
    /// exact-recovery round trips.
    pub fn pinned(values: &[f64]) -> Self {
        Self {
            pairs: values.iter().map(|&v| (v, v)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pair(&self, i: usize) -> (f64, f64) {
        self.pairs[i]
    }

    pub fn pairs(&self) -> &[(f64, f64)] {
        &self.pairs
    }

    pub fn lower(&self) -> Vec<f64> {
        self.pairs.iter().map(|p| p.0).collect()
    }

    pub fn upper(&self) -> Vec<f64> {
        self.pairs.iter().map(|p| p.1).collect()
    }

    pub fn is_fixed(&self, i: usize) -> bool {
        self.pairs[i].0 == self.pairs[i].1
    }

    /// Pin parameter `i` to a single value.
    pub fn fix(&mut self, i: usize, value: f64) {
        self.pairs[i] = (value, value);
    }

    /// Scale both ends of bound `i` by `factor`.
    pub fn scale(&mut self, i: usize, factor: f64) {
        let (lo, hi) = self.pairs[i];
        self.pairs[i] = (lo * factor, hi * factor);
    }

    /// Clamp `x` into bound `i`.
    pub fn clamp(&self, i: usize, x: f64) -> f64 {
        let (lo, hi) = self.pairs[i];
        x.max(lo).min(hi)
    }
}

/// One plate of observations: topology, shared observation times, measured
/// cell amounts and the set of empty (uninoculated) culture positions.
///
/// Measurements are stored time-major: `measurements[t * no_cultures + i]`,
/// matching the row layout produced by the simulation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plate {
    topology: GridTopology,
    times: Vec<f64>,
    measurements: Vec<f64>,
    empties: Vec<usize>,
    /// Most recent estimation result, attached by the caller after a fit.
    pub estimate: Option<FitResult>,
}

impl Plate {
    pub fn new(
        topology: GridTopology,
        times: Vec<f64>,
        measurements: Vec<f64>,
        mut empties: Vec<usize>,
    ) -> Result<Self, PlateError> {
        if times.len() < 2 {
            return Err(PlateError::invalid(
                "A plate needs at least two observation times.",
            ));
        }
        if times.windows(2).any(|w| !(w[1] > w[0])) || times.iter().any(|t| !t.is_finite()) {
            return Err(PlateError::invalid(
                "Observation times must be finite and strictly increasing.",
            ));
        }
        let n = topology.no_cultures();
        if measurements.len() != times.len() * n {
            return Err(PlateError::shape(format!(
                "Measurement length {} != no_times * no_cultures = {} * {}.",
                measurements.len(),
                times.len(),
                n
            )));
        }
        empties.sort_unstable();
        empties.dedup();
        if empties.iter().any(|&i| i >= n) {
            return Err(PlateError::invalid(format!(
                "Empty-culture index out of range for {n} cultures."
            )));
        }
        Ok(Self {
            topology,
            times,
            measurements,
            empties,
            estimate: None,
        })
    }

    pub fn topology(&self) -> &GridTopology {
        &self.topology
    }

    pub fn no_cultures(&self) -> usize {
        self.topology.no_cultures()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Full time-major measured cell-amount sequence.
    pub fn measurements(&self) -> &[f64] {
        &self.measurements
    }

    /// Measured cell amounts at time index `t` (one entry per culture).
    pub fn measurements_at(&self, t: usize) -> &[f64] {
        let n = self.no_cultures();
        &self.measurements[t * n..(t + 1) * n]
    }

    /// One culture's full measured time series.
    pub fn culture_series(&self, i: usize) -> Vec<f64> {
        let n = self.no_cultures();
        self.measurements.iter().skip(i).step_by(n).copied().collect()
    }

    pub fn empties(&self) -> &[usize] {
        &self.empties
    }

    pub fn is_empty_culture(&self, i: usize) -> bool {
        self.empties.binary_search(&i).is_ok()
    }

    /// Attach the latest estimation result. The plate is otherwise immutable;
    /// topology and measurements are never re-derived.
    pub fn attach_estimate(&mut self, result: FitResult) {
        self.estimate = Some(result);
    }
}

/// Convergence/effort diagnostics for one optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub converged: bool,
    pub iterations: usize,
    pub evaluations: usize,
    pub elapsed_secs: f64,
}

/// Outcome of one fit: the estimate plus everything needed to audit or repeat
/// the run (objective, diagnostics, and the exact guess/bounds used).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelKind,
    pub estimate: ParamVector,
    /// Final sum-of-squares objective.
    pub objective: f64,
    pub success: bool,
    pub diagnostics: FitDiagnostics,
    /// The guess the optimizer started from (after empty-culture pinning,
    /// before any internal rescaling).
    pub guess: ParamVector,
    /// The bounds actually enforced (after empty-culture pinning).
    pub bounds: Bounds,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate_3x3() -> Plate {
        let topo = GridTopology::build(3, 3).unwrap();
        let times = vec![0.0, 1.0, 2.0];
        let measurements = vec![0.1; 3 * 9];
        Plate::new(topo, times, measurements, vec![4]).unwrap()
    }

    #[test]
    fn param_vector_flat_round_trip() {
        let pv = ParamVector::new(vec![0.1, 1.0, 0.05], vec![1.0, 2.0, 3.0, 4.0]);
        let flat = pv.flatten();
        assert_eq!(flat.len(), 7);
        let back = ParamVector::from_flat(ModelKind::Competition, 4, &flat).unwrap();
        assert_eq!(back, pv);
    }

    #[test]
    fn from_flat_rejects_wrong_length() {
        let err = ParamVector::from_flat(ModelKind::Competition, 4, &[1.0; 6]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ShapeMismatch);
    }

    #[test]
    fn bounds_reject_inverted_pair() {
        assert!(Bounds::from_pairs(vec![(1.0, 0.5)]).is_err());
    }

    #[test]
    fn bounds_allow_infinite_upper() {
        let b = Bounds::from_pairs(vec![(0.0, f64::INFINITY)]).unwrap();
        assert!(!b.is_fixed(0));
        assert_eq!(b.clamp(0, -3.0), 0.0);
        assert_eq!(b.clamp(0, 1e12), 1e12);
    }

    #[test]
    fn plate_rejects_unsorted_times() {
        let topo = GridTopology::build(1, 2).unwrap();
        let err = Plate::new(topo, vec![0.0, 0.0], vec![0.0; 4], vec![]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn plate_rejects_measurement_shape_mismatch() {
        let topo = GridTopology::build(2, 2).unwrap();
        let err = Plate::new(topo, vec![0.0, 1.0], vec![0.0; 7], vec![]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ShapeMismatch);
    }

    #[test]
    fn culture_series_is_column_of_time_major_layout() {
        let topo = GridTopology::build(1, 2).unwrap();
        let measurements = vec![10.0, 20.0, 11.0, 21.0, 12.0, 22.0];
        let plate = Plate::new(topo, vec![0.0, 1.0, 2.0], measurements, vec![]).unwrap();
        assert_eq!(plate.culture_series(0), vec![10.0, 11.0, 12.0]);
        assert_eq!(plate.culture_series(1), vec![20.0, 21.0, 22.0]);
        assert_eq!(plate.measurements_at(1), &[11.0, 21.0]);
    }

    #[test]
    fn empties_are_sorted_and_deduped() {
        let topo = GridTopology::build(3, 3).unwrap();
        let plate = Plate::new(
            topo,
            vec![0.0, 1.0],
            vec![0.0; 18],
            vec![7, 2, 7],
        )
        .unwrap();
        assert_eq!(plate.empties(), &[2, 7]);
        assert!(plate.is_empty_culture(7));
        assert!(!plate.is_empty_culture(3));
    }

    #[test]
    fn plate_round_trips_through_json() {
        let plate = plate_3x3();
        let json = serde_json::to_string(&plate).unwrap();
        let back: Plate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.times(), plate.times());
        assert_eq!(back.measurements(), plate.measurements());
        assert_eq!(back.empties(), plate.empties());
        assert_eq!(back.no_cultures(), 9);
    }

    #[test]
    fn plate_attaches_estimate() {
        let mut plate = plate_3x3();
        assert!(plate.estimate.is_none());
        let pv = ParamVector::new(vec![0.1, 1.0, 0.0], vec![1.0; 9]);
        let result = FitResult {
            model: ModelKind::Competition,
            estimate: pv.clone(),
            objective: 0.0,
            success: true,
            diagnostics: FitDiagnostics {
                converged: true,
                iterations: 0,
                evaluations: 1,
                elapsed_secs: 0.0,
            },
            guess: pv.clone(),
            bounds: Bounds::pinned(&pv.flatten()),
        };
        plate.attach_estimate(result);
        assert!(plate.estimate.is_some());
    }
}
