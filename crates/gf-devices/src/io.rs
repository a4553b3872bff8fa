//! Input slot conventions and shared state access for the device models.
//!
//! A composed generator hands each sub-model a fixed input slice; the
//! constants here name the slots so the wiring code and the models agree.
//! State reads go through a [`LocalView`], which prefers the solver's
//! vectors and falls back to the locally cached values whenever the mode
//! does not carry that partition (the same convention blocks follow).

use gf_core::{NO_LOCATION, Real};
use gf_dae::{OffsetTable, SolverMode, StateData};

/// Machine input slots: terminal voltage magnitude, terminal angle, field
/// voltage, mechanical power.
pub const VOLTAGE_IN: usize = 0;
pub const ANGLE_IN: usize = 1;
pub const FIELD_IN: usize = 2;
pub const MECH_IN: usize = 3;

/// Exciter input slots.
pub const EXCITER_VOLTAGE_IN: usize = 0;
pub const EXCITER_VSET_IN: usize = 1;

/// Governor input slots: per-unit speed and the power setpoint.
pub const GOVERNOR_OMEGA_IN: usize = 0;
pub const GOVERNOR_PSET_IN: usize = 1;

/// Partition-aware state reads over one model's span.
pub(crate) struct LocalView<'a> {
    pub offsets: &'a OffsetTable,
    pub state: &'a [Real],
    pub dstate: &'a [Real],
    /// How many of the locally cached states are algebraic.
    pub local_alg: usize,
}

impl LocalView<'_> {
    pub fn alg(&self, sd: &StateData<'_>, mode: SolverMode, idx: usize) -> Real {
        if !sd.is_empty() && mode.has_algebraic() {
            let a0 = self.offsets.alg_offset(mode);
            if a0 != NO_LOCATION {
                return sd.state[a0 + idx];
            }
        }
        self.state[idx]
    }

    pub fn diff(&self, sd: &StateData<'_>, mode: SolverMode, idx: usize) -> Real {
        if !sd.is_empty() && mode.has_differential() {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                return sd.state[d0 + idx];
            }
        }
        self.state[self.local_alg + idx]
    }

    pub fn rate(&self, sd: &StateData<'_>, mode: SolverMode, idx: usize) -> Real {
        if !sd.is_empty() && mode.has_differential() {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                return sd.dstate_dt[d0 + idx];
            }
        }
        self.dstate[self.local_alg + idx]
    }
}
