//! Small dense linear solves.

use gf_core::Real;
use nalgebra::{DMatrix, DVector};

use crate::error::{SolverError, SolverResult};

/// Solve a 2x2 system by Cramer's rule.
///
/// Machine current injections and similar coupled pairs solve through
/// here rather than paying for a general factorization.
pub fn solve2x2(
    a11: Real,
    a12: Real,
    a21: Real,
    a22: Real,
    b1: Real,
    b2: Real,
) -> SolverResult<(Real, Real)> {
    let det = a11 * a22 - a12 * a21;
    let scale = (a11 * a22).abs().max((a12 * a21).abs());
    if !det.is_finite() || det.abs() <= 4.0 * Real::EPSILON * scale || det == 0.0 {
        return Err(SolverError::singular("2x2 determinant vanishes"));
    }
    Ok(((b1 * a22 - b2 * a12) / det, (a11 * b2 - a21 * b1) / det))
}

/// Solve `J dx = rhs` through an LU factorization.
pub fn lu_solve(jac: &DMatrix<Real>, rhs: &DVector<Real>) -> SolverResult<DVector<Real>> {
    jac.clone()
        .lu()
        .solve(rhs)
        .ok_or_else(|| SolverError::singular("LU solve failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cramer_solves_a_well_posed_pair() {
        // x + 2y = 5, 3x - y = 1 -> x = 1, y = 2
        let (x, y) = solve2x2(1.0, 2.0, 3.0, -1.0, 5.0, 1.0).unwrap();
        assert!((x - 1.0).abs() < 1e-12);
        assert!((y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_pairs_are_rejected() {
        assert!(solve2x2(1.0, 2.0, 2.0, 4.0, 1.0, 1.0).is_err());
        assert!(solve2x2(0.0, 0.0, 0.0, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn lu_matches_cramer() {
        let jac = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, -1.0]);
        let rhs = DVector::from_row_slice(&[5.0, 1.0]);
        let dx = lu_solve(&jac, &rhs).unwrap();
        assert!((dx[0] - 1.0).abs() < 1e-12);
        assert!((dx[1] - 2.0).abs() < 1e-12);
    }
}
