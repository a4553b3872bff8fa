//! gf-solver: integrator-facing glue for dynamic grid models.
//!
//! Contains:
//! - layout (system sizing, offset assignment, state vector ownership)
//! - jacobian (dense analytic assembly and finite-difference checks)
//! - algebra (2x2 Cramer solve and dense LU)
//! - driver (fixed-step explicit stepping with root checks)
//! - error (layout / singularity / driver failures)
//!
//! The solver proper (variable-order implicit integration) lives outside
//! this workspace; these pieces are what any such integrator needs to
//! host a [`gf_dae::DynamicModel`] tree.

pub mod algebra;
pub mod driver;
pub mod error;
pub mod jacobian;
pub mod layout;

#[cfg(test)]
pub(crate) mod testing;

pub use algebra::{lu_solve, solve2x2};
pub use driver::{DriveOptions, DriveRecord, run_stepper};
pub use error::{SolverError, SolverResult};
pub use jacobian::{
    assemble_jacobian, central_difference_jacobian, central_difference_model_jacobian,
    residual_vector,
};
pub use layout::SystemLayout;
