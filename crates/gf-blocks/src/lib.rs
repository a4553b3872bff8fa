//! gf-blocks: composable transfer-function elements for dynamic models.
//!
//! A [`Block`] is a single-input single-output element (gain, lag,
//! integrator, washout, lead-lag, PID, deadband) that plugs into the
//! solver through the `DynamicModel` trait. Blocks carry their own
//! optional output and ramp limiters, expose limit engagement and
//! deadband crossings as root functions, and know how to initialize
//! themselves from either a known input or a desired output.
//!
//! Contains:
//! - kind (the closed set of block shapes and their configuration)
//! - block (the Block itself: structure, initialization, parameters)
//! - ops (residual, derivative, algebraic update, Jacobian)
//! - roots (limiter and deadband event functions)
//! - step (self-contained explicit stepping for decoupled execution)
//! - limits (value and ramp limiter state machines)
//! - deadband (the deadband response and its transition logic)
//! - sequence (a cascade of blocks acting as one model)
//! - factory (text descriptions like `"2*delay(0.05)"` to blocks)

pub mod error;
pub mod factory;
pub mod kind;
pub mod limits;
pub mod sequence;

mod block;
mod deadband;
mod ops;
mod roots;
mod step;

pub use block::Block;
pub use error::{BlockError, BlockResult};
pub use factory::make_block;
pub use kind::{BlockConfig, BlockKind, DeadbandConfig, OutputLimits, RampLimits};
pub use limits::{Activation, RampLimiter, ValueLimiter, default_reset_level};
pub use sequence::BlockSequence;
