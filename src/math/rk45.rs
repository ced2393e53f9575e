//! Adaptive Dormand–Prince 5(4) integrator.
//!
//! A classic explicit embedded Runge–Kutta pair with:
//!
//! - proportional step-size control on the embedded 4th-order error estimate
//! - FSAL (first-same-as-last) stage reuse
//! - exact landing on every requested output time
//!
//! The growth-diffusion systems integrated here are non-stiff over the
//! parameter ranges the fitter explores, so an explicit pair is the right
//! tool; stiff excursions show up as a step-size collapse and surface as an
//! [`IntegrationFailure`](crate::error::ErrorKind::IntegrationFailure)
//! carrying the furthest time reached.

use crate::error::PlateError;

/// Configuration for the adaptive integrator.
#[derive(Debug, Clone)]
pub struct OdeOptions {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Initial step size; `0.0` picks a span-based default.
    pub h0: f64,
    /// Smallest step size before the solve is declared failed.
    pub h_min: f64,
    /// Budget of attempted steps across the whole solve.
    pub max_steps: usize,
}

impl Default for OdeOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-8,
            h0: 0.0,
            h_min: 1e-14,
            max_steps: 100_000,
        }
    }
}

// Dormand–Prince coefficients.
const A2: [f64; 1] = [1.0 / 5.0];
const A3: [f64; 2] = [3.0 / 40.0, 9.0 / 40.0];
const A4: [f64; 3] = [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0];
const A5: [f64; 4] = [
    19372.0 / 6561.0,
    -25360.0 / 2187.0,
    64448.0 / 6561.0,
    -212.0 / 729.0,
];
const A6: [f64; 5] = [
    9017.0 / 3168.0,
    -355.0 / 33.0,
    46732.0 / 5247.0,
    49.0 / 176.0,
    -5103.0 / 18656.0,
];
const B: [f64; 6] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
];
const C: [f64; 6] = [1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
// b - b_hat: weights of the embedded error estimate (7 stages, FSAL).
const E: [f64; 7] = [
    35.0 / 384.0 - 5179.0 / 57600.0,
    0.0,
    500.0 / 1113.0 - 7571.0 / 16695.0,
    125.0 / 192.0 - 393.0 / 640.0,
    -2187.0 / 6784.0 + 92097.0 / 339200.0,
    11.0 / 84.0 - 187.0 / 2100.0,
    -1.0 / 40.0,
];

/// Integrate `dy/dt = rhs(t, y)` from `times[0]`, sampling the solution at
/// every entry of `times`.
///
/// Returns one state row per requested time (the first row is `y0`). `times`
/// must be strictly increasing. On step-size collapse or step-budget
/// exhaustion the error carries the furthest time reached.
pub fn rk45<F>(
    mut rhs: F,
    y0: &[f64],
    times: &[f64],
    opts: &OdeOptions,
) -> Result<Vec<Vec<f64>>, PlateError>
where
    F: FnMut(f64, &[f64], &mut [f64]),
{
    if times.is_empty() {
        return Err(PlateError::invalid("No output times requested."));
    }
    if times.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(PlateError::invalid(
            "Output times must be strictly increasing.",
        ));
    }

    let n = y0.len();
    let span = times[times.len() - 1] - times[0];
    let mut h = if opts.h0 > 0.0 { opts.h0 } else { (span / 100.0).max(opts.h_min) };

    let mut t = times[0];
    let mut y = y0.to_vec();
    let mut out = Vec::with_capacity(times.len());
    out.push(y.clone());

    let mut k = vec![vec![0.0; n]; 7];
    let mut y_stage = vec![0.0; n];
    let mut y_new = vec![0.0; n];

    // FSAL: k[0] always holds rhs(t, y).
    rhs(t, &y, &mut k[0]);

    let mut steps = 0usize;

    for &target in &times[1..] {
        while t < target {
            if steps >= opts.max_steps {
                return Err(PlateError::integration(
                    t,
                    format!("Integrator exceeded {} steps at t = {t:.6e}.", opts.max_steps),
                ));
            }
            steps += 1;

            let h_step = h.min(target - t);

            // Stages 2..6.
            let a_rows: [&[f64]; 5] = [&A2, &A3, &A4, &A5, &A6];
            for (stage, a) in a_rows.iter().enumerate() {
                for i in 0..n {
                    let mut acc = 0.0;
                    for (j, &aj) in a.iter().enumerate() {
                        acc += aj * k[j][i];
                    }
                    y_stage[i] = y[i] + h_step * acc;
                }
                rhs(t + C[stage] * h_step, &y_stage, &mut k[stage + 1]);
            }

            // 5th-order solution; its derivative is stage 7 (FSAL).
            for i in 0..n {
                let mut acc = 0.0;
                for (j, &bj) in B.iter().enumerate() {
                    acc += bj * k[j][i];
                }
                y_new[i] = y[i] + h_step * acc;
            }
            rhs(t + h_step, &y_new, &mut k[6]);

            // Scaled RMS error of the embedded 4th-order estimate.
            let mut err_sq = 0.0;
            for i in 0..n {
                let mut e = 0.0;
                for (j, &ej) in E.iter().enumerate() {
                    e += ej * k[j][i];
                }
                e *= h_step;
                let scale = opts.atol + opts.rtol * y[i].abs().max(y_new[i].abs());
                let r = e / scale;
                err_sq += r * r;
            }
            let err = (err_sq / n as f64).sqrt();

            // Step-size update (bounded growth/shrink around the optimal
            // 5th-order exponent). A non-finite error forces a hard shrink.
            let factor = if err.is_finite() {
                if err == 0.0 { 5.0 } else { (0.9 * err.powf(-0.2)).clamp(0.2, 5.0) }
            } else {
                0.2
            };

            let accepted = err.is_finite() && err <= 1.0;
            if !accepted {
                // Rejected step: retry from the same point with smaller h.
                if h_step <= opts.h_min {
                    return Err(PlateError::integration(
                        t,
                        format!("Step size collapsed below {:e} at t = {t:.6e}.", opts.h_min),
                    ));
                }
                h = (h_step * factor).max(opts.h_min);
                continue;
            }

            t += h_step;
            std::mem::swap(&mut y, &mut y_new);
            k.swap(0, 6);
            h = (h_step * factor).max(opts.h_min);
        }
        out.push(y.clone());
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_decay_matches_analytic_solution() {
        let times: Vec<f64> = (0..=10).map(|i| i as f64 * 0.5).collect();
        let sol = rk45(
            |_t, y, dy| dy[0] = -y[0],
            &[1.0],
            &times,
            &OdeOptions::default(),
        )
        .unwrap();
        for (row, &t) in sol.iter().zip(times.iter()) {
            assert!((row[0] - (-t).exp()).abs() < 1e-6, "t={t}: {}", row[0]);
        }
    }

    #[test]
    fn harmonic_oscillator_conserves_energy() {
        let times = vec![0.0, std::f64::consts::TAU];
        let sol = rk45(
            |_t, y, dy| {
                dy[0] = y[1];
                dy[1] = -y[0];
            },
            &[1.0, 0.0],
            &times,
            &OdeOptions::default(),
        )
        .unwrap();
        let last = &sol[1];
        assert!((last[0] - 1.0).abs() < 1e-6);
        assert!(last[1].abs() < 1e-6);
    }

    #[test]
    fn first_row_is_initial_state() {
        let sol = rk45(
            |_t, _y, dy| dy[0] = 1.0,
            &[0.25],
            &[0.0, 1.0],
            &OdeOptions::default(),
        )
        .unwrap();
        assert_eq!(sol[0], vec![0.25]);
        assert!((sol[1][0] - 1.25).abs() < 1e-9);
    }

    #[test]
    fn rejects_unsorted_times() {
        let err = rk45(
            |_t, y, dy| dy[0] = -y[0],
            &[1.0],
            &[0.0, 1.0, 1.0],
            &OdeOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn step_budget_exhaustion_reports_reached_time() {
        let opts = OdeOptions {
            max_steps: 5,
            ..OdeOptions::default()
        };
        let err = rk45(
            |t, y, dy| dy[0] = y[0] * t.cos() * 50.0,
            &[1.0],
            &[0.0, 100.0],
            &opts,
        )
        .unwrap_err();
        match err.kind() {
            crate::error::ErrorKind::IntegrationFailure { reached } => {
                assert!(reached < 100.0);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn solve_is_deterministic() {
        let times: Vec<f64> = (0..=20).map(|i| i as f64 * 0.25).collect();
        let run = || {
            rk45(
                |_t, y, dy| {
                    dy[0] = y[0] * (1.0 - y[0]);
                },
                &[0.01],
                &times,
                &OdeOptions::default(),
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }
}
