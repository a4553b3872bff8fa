//! Model names to device instances.
//!
//! Case studies reference their dynamic models by short names. Lookup is
//! case-insensitive and ignores surrounding whitespace; anything it does
//! not recognize comes back as [`DeviceError::UnknownModel`] naming the
//! family searched.

use crate::error::{DeviceError, DeviceResult};
use crate::exciter::Exciter;
use crate::governor::Governor;
use crate::machine::Machine;

pub fn make_machine(name: &str) -> DeviceResult<Machine> {
    match name.trim().to_ascii_lowercase().as_str() {
        "classical" | "classic" => Ok(Machine::classical()),
        "fourth" | "fourthorder" | "four" | "4" => Ok(Machine::fourth_order()),
        _ => Err(DeviceError::unknown_model("machine", name)),
    }
}

pub fn make_exciter(name: &str) -> DeviceResult<Exciter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "basic" => Ok(Exciter::basic()),
        "type1" | "ieeetype1" | "1" => Ok(Exciter::ieee_type1()),
        _ => Err(DeviceError::unknown_model("exciter", name)),
    }
}

pub fn make_governor(name: &str) -> DeviceResult<Governor> {
    match name.trim().to_ascii_lowercase().as_str() {
        "basic" | "droop" => Ok(Governor::droop()),
        "ieeesimple" | "simple" => Ok(Governor::ieee_simple()),
        "tgov1" => Ok(Governor::tgov1()),
        _ => Err(DeviceError::unknown_model("governor", name)),
    }
}
