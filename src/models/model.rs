//! Growth-diffusion model variants.
//!
//! Each variant of [`ModelKind`] describes one growth-law family:
//!
//! - an ordered list of named plate-level parameters
//! - an ordered list of species tracked per culture
//! - a derivative function over an immutable [`RateContext`]
//!
//! State layout is species-major: all cell amounts first, then all nutrient
//! amounts, then any further species, each block `no_cultures` long in
//! row-major plate order. The derivative routine clamps a *copy* of the
//! incoming state to be non-negative before computing rates (an adaptive
//! integrator may probe slightly negative states); the caller's buffer is
//! never mutated.
//!
//! The reaction term is mass-action consumption, `b_i * C_i * N_i`, and
//! nutrient diffuses down local concentration gradients between lattice
//! neighbours at plate-level rate `kn`.

use serde::{Deserialize, Serialize};

use crate::domain::{ParamVector, Plate};
use crate::topology::GridTopology;

/// Growth-law family. Selected once per fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Each culture grows on its own nutrient pool; no diffusion.
    Independent,
    /// Shared nutrient dynamics with lattice diffusion at rate `kn`.
    Competition,
    /// Competition with separate initial nutrient for edge vs internal
    /// cultures; edge-culture terms are scaled by `N_I_0 / N_E_0`.
    CompetitionBc,
    /// A single real culture flanked by two synthetic neighbour compartments
    /// growing at fixed slow/fast rates. Used only for per-culture quick
    /// guessing; each culture couples to its own imaginary pair, never to
    /// other cultures.
    ImaginaryNeighbour,
}

impl ModelKind {
    /// Human-readable label for diagnostics.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Independent => "independent",
            ModelKind::Competition => "competition",
            ModelKind::CompetitionBc => "competition-bc",
            ModelKind::ImaginaryNeighbour => "imaginary-neighbour",
        }
    }

    /// Ordered plate-level parameter names.
    pub fn plate_param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::Independent => &["C_0", "N_0"],
            ModelKind::Competition => &["C_0", "N_0", "kn"],
            ModelKind::CompetitionBc => &["C_0", "N_I_0", "N_E_0", "kn"],
            ModelKind::ImaginaryNeighbour => &["C_0", "N_0", "kn", "b_minus", "b_plus"],
        }
    }

    /// Ordered per-culture species names (block order of the state vector).
    pub fn species(self) -> &'static [&'static str] {
        match self {
            ModelKind::Independent | ModelKind::Competition | ModelKind::CompetitionBc => {
                &["C", "N"]
            }
            ModelKind::ImaginaryNeighbour => {
                &["C", "N", "C_minus", "N_minus", "C_plus", "N_plus"]
            }
        }
    }

    pub fn no_species(self) -> usize {
        self.species().len()
    }

    /// Flat parameter count for a plate with `no_cultures` cultures.
    pub fn param_count(self, no_cultures: usize) -> usize {
        self.plate_param_names().len() + no_cultures
    }

    /// Index of the initial-cell-amount parameter in the plate-level block.
    /// It is the parameter the fitter rescales against ill-conditioning.
    pub fn c0_index(self) -> usize {
        0
    }

    /// Index of the diffusion constant in the plate-level block, if the
    /// variant has one.
    pub fn kn_index(self) -> Option<usize> {
        match self {
            ModelKind::Independent => None,
            ModelKind::Competition => Some(2),
            ModelKind::CompetitionBc => Some(3),
            ModelKind::ImaginaryNeighbour => Some(2),
        }
    }

    /// State vector length for a plate with `no_cultures` cultures.
    pub fn state_len(self, no_cultures: usize) -> usize {
        self.no_species() * no_cultures
    }

    /// Build the species-major initial state for a plate.
    ///
    /// Plate-level initial amounts are tiled across all cultures; the initial
    /// cell amount is zeroed at every empty-culture index. For the
    /// boundary-corrected variant, internal cultures start at `N_I_0` and
    /// edge cultures at `N_E_0`.
    pub fn initial_state(self, plate: &Plate, params: &ParamVector) -> Vec<f64> {
        let n = plate.no_cultures();
        let p = &params.plate_level;
        let mut state = vec![0.0; self.state_len(n)];

        // Cell block.
        for i in 0..n {
            state[i] = if plate.is_empty_culture(i) { 0.0 } else { p[0] };
        }

        // Nutrient block.
        match self {
            ModelKind::CompetitionBc => {
                for i in 0..n {
                    state[n + i] = if plate.topology().is_edge(i) { p[2] } else { p[1] };
                }
            }
            _ => {
                for i in 0..n {
                    state[n + i] = p[1];
                }
            }
        }

        // Imaginary neighbour compartments start from the same amounts as the
        // real culture.
        if self == ModelKind::ImaginaryNeighbour {
            for i in 0..n {
                state[2 * n + i] = p[0]; // C_minus
                state[3 * n + i] = p[1]; // N_minus
                state[4 * n + i] = p[0]; // C_plus
                state[5 * n + i] = p[1]; // N_plus
            }
        }

        state
    }
}

/// Immutable inputs of the rate function: the model variant, one parameter
/// vector and the plate topology. Nothing here is mutated during a solve.
#[derive(Debug, Clone, Copy)]
pub struct RateContext<'a> {
    pub model: ModelKind,
    pub params: &'a ParamVector,
    pub topology: &'a GridTopology,
}

/// Reusable scratch buffers for derivative evaluation, so the integrator's
/// inner loop does not allocate.
#[derive(Debug, Clone)]
pub struct RateWork {
    clamped: Vec<f64>,
    flux: Vec<f64>,
}

impl RateWork {
    pub fn new(model: ModelKind, no_cultures: usize) -> Self {
        Self {
            clamped: vec![0.0; model.state_len(no_cultures)],
            flux: vec![0.0; no_cultures],
        }
    }
}

impl RateContext<'_> {
    /// Evaluate the state derivative at `(state, _t)` into `deriv`.
    ///
    /// All model families are autonomous, so the time argument is unused but
    /// kept for the integrator contract. Negative entries of `state` are
    /// treated as zero (clamped into `work.clamped`; `state` itself is left
    /// untouched). For non-negative finite inputs the result is finite.
    ///
    /// # Panics
    /// Panics if `state`/`deriv` length differs from
    /// `model.state_len(no_cultures)`.
    pub fn derivatives(&self, _t: f64, state: &[f64], deriv: &mut [f64], work: &mut RateWork) {
        let n = self.topology.no_cultures();
        assert_eq!(state.len(), self.model.state_len(n));
        assert_eq!(deriv.len(), state.len());

        work.clamped.clear();
        work.clamped.extend(state.iter().map(|&v| v.max(0.0)));
        let s = &work.clamped;
        let p = &self.params.plate_level;
        let rates = &self.params.per_culture;

        match self.model {
            ModelKind::Independent => {
                for i in 0..n {
                    let reaction = rates[i] * s[i] * s[n + i];
                    deriv[i] = reaction;
                    deriv[n + i] = -reaction;
                }
            }
            ModelKind::Competition => {
                let kn = p[2];
                self.topology.net_flux(&s[n..2 * n], &mut work.flux);
                for i in 0..n {
                    let reaction = rates[i] * s[i] * s[n + i];
                    deriv[i] = reaction;
                    deriv[n + i] = -reaction - kn * work.flux[i];
                }
            }
            ModelKind::CompetitionBc => {
                let (n_i0, n_e0, kn) = (p[1], p[2], p[3]);
                // Edge cultures sit over more unclaimed agar; their terms are
                // scaled by the internal-to-edge initial-nutrient ratio. A
                // non-positive edge amount degrades to no correction rather
                // than a NaN.
                let edge_scale = if n_e0 > 0.0 { n_i0 / n_e0 } else { 1.0 };
                self.topology.net_flux(&s[n..2 * n], &mut work.flux);
                for i in 0..n {
                    let scale = if self.topology.is_edge(i) { edge_scale } else { 1.0 };
                    let reaction = scale * rates[i] * s[i] * s[n + i];
                    deriv[i] = reaction;
                    deriv[n + i] = -reaction - scale * kn * work.flux[i];
                }
            }
            ModelKind::ImaginaryNeighbour => {
                let (kn, b_minus, b_plus) = (p[2], p[3], p[4]);
                for i in 0..n {
                    let (c, nu) = (s[i], s[n + i]);
                    let (cm, nm) = (s[2 * n + i], s[3 * n + i]);
                    let (cp, np) = (s[4 * n + i], s[5 * n + i]);

                    let reaction = rates[i] * c * nu;
                    let reaction_m = b_minus * cm * nm;
                    let reaction_p = b_plus * cp * np;

                    deriv[i] = reaction;
                    deriv[n + i] = -reaction - kn * ((nu - nm) + (nu - np));
                    deriv[2 * n + i] = reaction_m;
                    deriv[3 * n + i] = -reaction_m - kn * (nm - nu);
                    deriv[4 * n + i] = reaction_p;
                    deriv[5 * n + i] = -reaction_p - kn * (np - nu);
                }
            }
        }
    }
}
