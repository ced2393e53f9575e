//! Least squares solver.
//!
//! The guesser's diffusion-constant stage repeatedly solves tiny linear
//! regression problems (variance of simulated final cell amounts against a
//! trial diffusion constant). SVD is used so tall systems solve robustly even
//! when the sweep produces nearly collinear columns.

use nalgebra::{DMatrix, DVector};

use crate::error::PlateError;

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if the strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Fit `y = intercept + slope * x` by ordinary least squares.
///
/// Fails if fewer than two distinct `x` values are supplied (the line is not
/// identified) or the solve is too ill-conditioned.
pub fn fit_line(x: &[f64], y: &[f64]) -> Result<(f64, f64), PlateError> {
    if x.len() != y.len() {
        return Err(PlateError::shape(format!(
            "Line fit input lengths differ: {} vs {}.",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 || x.iter().all(|&v| v == x[0]) {
        return Err(PlateError::degenerate(
            "Line fit needs at least two distinct x values.",
        ));
    }

    let n = x.len();
    let mut design = DMatrix::zeros(n, 2);
    for i in 0..n {
        design[(i, 0)] = 1.0;
        design[(i, 1)] = x[i];
    }
    let rhs = DVector::from_column_slice(y);

    let beta = solve_least_squares(&design, &rhs)
        .ok_or_else(|| PlateError::degenerate("Line fit is too ill-conditioned."))?;
    Ok((beta[0], beta[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn fit_line_recovers_exact_line() {
        let x = [0.0, 0.5, 1.0, 1.5];
        let y: Vec<f64> = x.iter().map(|&v| 0.25 - 1.5 * v).collect();
        let (intercept, slope) = fit_line(&x, &y).unwrap();
        assert!((intercept - 0.25).abs() < 1e-10);
        assert!((slope + 1.5).abs() < 1e-10);
    }

    #[test]
    fn fit_line_rejects_constant_x() {
        let err = fit_line(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Degenerate);
    }
}
