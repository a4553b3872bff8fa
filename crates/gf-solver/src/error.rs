//! Error types for layout and linear algebra.

use gf_dae::DaeError;
use thiserror::Error;

/// Errors from system assembly and the step driver.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("layout error: {what}")]
    Layout { what: String },

    #[error("singular system: {what}")]
    Singular { what: String },

    #[error("driver error: {what}")]
    Driver { what: String },

    #[error(transparent)]
    Model(#[from] DaeError),
}

pub type SolverResult<T> = Result<T, SolverError>;

impl SolverError {
    pub fn layout(what: impl Into<String>) -> Self {
        Self::Layout { what: what.into() }
    }

    pub fn singular(what: impl Into<String>) -> Self {
        Self::Singular { what: what.into() }
    }

    pub fn driver(what: impl Into<String>) -> Self {
        Self::Driver { what: what.into() }
    }
}
