//! gf-dae: the solver-facing contract for dynamic grid models.
//!
//! Contains:
//! - mode (solver-mode tags: local / algebraic / differential / DAE)
//! - offsets (state counting and per-mode offset tables)
//! - state (borrowed view of the solver's current guess)
//! - matrix (Jacobian assembly sinks: dense and triplet)
//! - change (discrete-event change codes and check levels)
//! - model (the DynamicModel trait every sub-model implements)
//! - error (shared error types for initialization and structure)

pub mod change;
pub mod error;
pub mod matrix;
pub mod mode;
pub mod model;
pub mod offsets;
pub mod state;

pub use change::{ChangeCode, CheckLevel};
pub use error::{DaeError, DaeResult};
pub use matrix::{ColumnRemap, MatrixSink, Triplets, REMAP_COLUMN};
pub use mode::SolverMode;
pub use model::DynamicModel;
pub use offsets::{OffsetBase, OffsetTable, SolverOffsets, StateSizes, NO_LOCATION};
pub use state::StateData;
