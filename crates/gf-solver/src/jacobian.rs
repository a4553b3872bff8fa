//! Jacobian assembly and finite-difference verification.

use gf_core::Real;
use gf_dae::{DynamicModel, SolverMode, StateData};
use nalgebra::{DMatrix, DVector};

use crate::error::SolverResult;

/// Collect a model's analytic Jacobian into a dense matrix.
///
/// Rows and columns are global state indices for `mode`; `input_locs`
/// carries the global column of each model input.
pub fn assemble_jacobian(
    model: &dyn DynamicModel,
    inputs: &[Real],
    sd: &StateData<'_>,
    input_locs: &[usize],
    n: usize,
    mode: SolverMode,
) -> DMatrix<Real> {
    let mut jac = DMatrix::zeros(n, n);
    model.jacobian_elements(inputs, sd, input_locs, &mut jac, mode);
    jac
}

/// Evaluate the model residual into a dense vector.
pub fn residual_vector(
    model: &dyn DynamicModel,
    inputs: &[Real],
    sd: &StateData<'_>,
    n: usize,
    mode: SolverMode,
) -> DVector<Real> {
    let mut resid = vec![0.0; n];
    model.residual(inputs, sd, &mut resid, mode);
    DVector::from_vec(resid)
}

/// Compute a Jacobian by central finite differences of an arbitrary
/// residual closure (more accurate than one-sided at twice the cost).
pub fn central_difference_jacobian<F>(
    x: &DVector<Real>,
    f: F,
    epsilon: Real,
) -> SolverResult<DMatrix<Real>>
where
    F: Fn(&DVector<Real>) -> SolverResult<DVector<Real>>,
{
    let n = x.len();
    let f_x = f(x)?;
    let m = f_x.len();

    let mut jac = DMatrix::zeros(m, n);

    for j in 0..n {
        let dx = epsilon * x[j].abs().max(1.0);

        let mut x_plus = x.clone();
        x_plus[j] += dx;
        let f_plus = f(&x_plus)?;

        let mut x_minus = x.clone();
        x_minus[j] -= dx;
        let f_minus = f(&x_minus)?;

        let df = (f_plus - f_minus) / (2.0 * dx);

        for i in 0..m {
            jac[(i, j)] = df[i];
        }
    }

    Ok(jac)
}

/// Central finite-difference Jacobian of a model's DAE residual.
///
/// Matches the analytic convention: perturbing state `j` also perturbs
/// its derivative by `cj * dx`, so differential rows compare against
/// `df/dx - cj` on the diagonal.
#[allow(clippy::too_many_arguments)]
pub fn central_difference_model_jacobian(
    model: &dyn DynamicModel,
    inputs: &[Real],
    time: Real,
    state: &[Real],
    dstate_dt: &[Real],
    cj: Real,
    mode: SolverMode,
    epsilon: Real,
) -> DMatrix<Real> {
    let n = state.len();
    let mut jac = DMatrix::zeros(n, n);
    let mut xs = state.to_vec();
    let mut dxs = dstate_dt.to_vec();
    let mut r_plus = vec![0.0; n];
    let mut r_minus = vec![0.0; n];

    for j in 0..n {
        let dx = epsilon * state[j].abs().max(1.0);

        xs[j] = state[j] + dx;
        dxs[j] = dstate_dt[j] + cj * dx;
        r_plus.fill(0.0);
        model.residual(inputs, &StateData::new(time, &xs, &dxs, cj), &mut r_plus, mode);

        xs[j] = state[j] - dx;
        dxs[j] = dstate_dt[j] - cj * dx;
        r_minus.fill(0.0);
        model.residual(inputs, &StateData::new(time, &xs, &dxs, cj), &mut r_minus, mode);

        xs[j] = state[j];
        dxs[j] = dstate_dt[j];

        for i in 0..n {
            jac[(i, j)] = (r_plus[i] - r_minus[i]) / (2.0 * dx);
        }
    }

    jac
}
