//! gf-devices: synchronous machine, exciter, and governor models.
//!
//! The models here are the rotating-equipment counterparts to the
//! transfer-function elements in `gf-blocks`: each implements
//! `DynamicModel` end to end (structure, initialization, residuals,
//! Jacobian entries, limit roots, decoupled stepping) and a
//! [`DynamicGenerator`] composes one machine with an optional exciter
//! and governor behind a single two-input, two-output terminal.
//!
//! Contains:
//! - machine (classical and fourth-order synchronous machines)
//! - exciter (basic regulator and IEEE type 1 excitation)
//! - governor (droop chain, IEEE simple, and TGOV1 turbine governors)
//! - generator (the composed device and its base conversion)
//! - factory (model names to instances)
//! - io (terminal input slots shared across the family)

pub mod error;
pub mod factory;
pub mod io;

mod exciter;
mod generator;
mod governor;
mod machine;

pub use error::{DeviceError, DeviceResult};
pub use exciter::{Exciter, ExciterKind};
pub use factory::{make_exciter, make_governor, make_machine};
pub use generator::DynamicGenerator;
pub use governor::{Governor, GovernorKind};
pub use machine::{BASE_FREQUENCY, Machine, MachineKind};
