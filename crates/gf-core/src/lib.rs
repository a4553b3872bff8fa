//! gf-core: stable foundation for gridflow.
//!
//! Contains:
//! - numeric (Real + tolerances + float helpers + time resolution limits)
//! - param (string-keyed runtime parameter surface)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod param;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult, ParamError, ParamResult};
pub use numeric::*;
pub use param::Parameterized;
