//! Synchronous machine models in the rotor dq frame.
//!
//! Two shapes share one struct: the classical second-order model (constant
//! internal voltage behind `Xd`) and the fourth-order model with transient
//! EMF states on both axes. States sit `[Id, Iq | delta, omega, ...]`:
//! stator currents are algebraic, rotor quantities differential. The
//! terminal interface uses `vd = -V sin(delta - theta)`,
//! `vq = V cos(delta - theta)`, speed in per unit of synchronous, and all
//! electrical parameters in machine-base per unit.

use std::f64::consts::FRAC_PI_2;

use gf_core::{NO_LOCATION, ParamError, ParamResult, Parameterized, Real};
use gf_dae::{
    ChangeCode, CheckLevel, DaeError, DaeResult, DynamicModel, MatrixSink, OffsetBase, OffsetTable,
    SolverMode, StateData, StateSizes,
};
use nalgebra::Complex;
use tracing::warn;

use crate::io::{ANGLE_IN, FIELD_IN, LocalView, MECH_IN, VOLTAGE_IN};

/// Synchronous frequency of a 60 Hz system, rad/s.
pub const BASE_FREQUENCY: Real = 120.0 * std::f64::consts::PI;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineKind {
    /// Rotor angle and speed behind the synchronous reactance.
    Classical,
    /// Adds the transient EMFs `E'd` and `E'q`.
    FourthOrder,
}

#[derive(Clone, Debug)]
pub struct Machine {
    name: String,
    kind: MachineKind,
    rs: Real,
    xd: Real,
    xq: Real,
    xdp: Real,
    xqp: Real,
    tdop: Real,
    tqop: Real,
    h: Real,
    d: Real,
    /// Classical-model speed feedback folded into the internal voltage.
    kw: Real,
    base_freq: Real,
    offsets: OffsetTable,
    /// Local cache, `[Id, Iq, delta, omega, ...]`.
    state: Vec<Real>,
    dstate: Vec<Real>,
    prev_time: Real,
}

impl Machine {
    pub fn new(kind: MachineKind) -> Self {
        Self {
            name: match kind {
                MachineKind::Classical => "classical".to_string(),
                MachineKind::FourthOrder => "fourth_order".to_string(),
            },
            kind,
            rs: 0.0,
            xd: match kind {
                MachineKind::Classical => 0.85,
                MachineKind::FourthOrder => 1.05,
            },
            xq: 0.85,
            xdp: 0.35,
            xqp: 0.35,
            tdop: 8.0,
            tqop: 1.0,
            h: 5.0,
            d: 0.04,
            kw: 0.0,
            base_freq: BASE_FREQUENCY,
            offsets: OffsetTable::new(),
            state: Vec::new(),
            dstate: Vec::new(),
            prev_time: 0.0,
        }
    }

    pub fn classical() -> Self {
        Self::new(MachineKind::Classical)
    }

    pub fn fourth_order() -> Self {
        Self::new(MachineKind::FourthOrder)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(&self) -> MachineKind {
        self.kind
    }

    /// Per-unit rotor speed.
    pub fn frequency(&self, sd: &StateData<'_>, mode: SolverMode) -> Real {
        self.view().diff(sd, mode, 1)
    }

    pub fn frequency_location(&self, mode: SolverMode) -> usize {
        let d0 = self.offsets.diff_offset(mode);
        if d0 == NO_LOCATION { NO_LOCATION } else { d0 + 1 }
    }

    /// Rotor angle, radians.
    pub fn angle(&self, sd: &StateData<'_>, mode: SolverMode) -> Real {
        self.view().diff(sd, mode, 0)
    }

    pub fn angle_location(&self, mode: SolverMode) -> usize {
        self.offsets.diff_offset(mode)
    }

    fn view(&self) -> LocalView<'_> {
        LocalView {
            offsets: &self.offsets,
            state: &self.state,
            dstate: &self.dstate,
            local_alg: 2,
        }
    }

    fn dq_voltages(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode) -> (Real, Real) {
        let v = inputs.get(VOLTAGE_IN).copied().unwrap_or(0.0);
        let theta = inputs.get(ANGLE_IN).copied().unwrap_or(0.0);
        let delta = self.view().diff(sd, mode, 0);
        (-v * (delta - theta).sin(), v * (delta - theta).cos())
    }

    /// Terminal power in generation convention, `(P, Q)` machine-base pu.
    pub fn terminal_power(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode) -> (Real, Real) {
        let view = self.view();
        let (vd, vq) = self.dq_voltages(inputs, sd, mode);
        let id = view.alg(sd, mode, 0);
        let iq = view.alg(sd, mode, 1);
        (vd * id + vq * iq, vd * iq - vq * id)
    }

    fn local_sizes(&self) -> StateSizes {
        match self.kind {
            MachineKind::Classical => StateSizes {
                alg: 2,
                diff: 2,
                jac: 18,
                ..StateSizes::default()
            },
            MachineKind::FourthOrder => StateSizes {
                alg: 2,
                diff: 4,
                jac: 25,
                ..StateSizes::default()
            },
        }
    }

    fn build_structure(&mut self) -> DaeResult<()> {
        if !(self.h > 0.0) {
            return Err(DaeError::structure("machine inertia constant must be positive"));
        }
        if !(self.base_freq > 0.0) {
            return Err(DaeError::structure("machine base frequency must be positive"));
        }
        if self.kind == MachineKind::FourthOrder && (self.tdop <= 0.0 || self.tqop <= 0.0) {
            return Err(DaeError::structure(
                "open-circuit time constants must be positive",
            ));
        }
        let sizes = self.local_sizes();
        self.offsets.unload();
        self.offsets.set_sizes(SolverMode::local(), sizes, sizes);
        self.offsets
            .assign(SolverMode::local(), OffsetBase::for_system(&sizes));
        self.state.clear();
        self.state.resize(sizes.total(), 0.0);
        self.state[3] = 1.0;
        self.dstate.clear();
        self.dstate.resize(sizes.total(), 0.0);
        Ok(())
    }

    /// Steady rotor position and currents for a desired terminal injection,
    /// then the field voltage and mechanical power that hold it.
    fn init_from_desired(
        &mut self,
        inputs: &[Real],
        desired: &[Real],
        field_set: &mut Vec<Real>,
    ) -> DaeResult<()> {
        let v = inputs.get(VOLTAGE_IN).copied().unwrap_or(0.0);
        let theta = inputs.get(ANGLE_IN).copied().unwrap_or(0.0);
        if !(v > 0.0) {
            return Err(DaeError::init(
                &self.name,
                "terminal voltage must be positive to initialize",
            ));
        }
        let p = desired[0];
        let q = desired.get(1).copied().unwrap_or(0.0);

        let vv = Complex::from_polar(v, theta);
        // outward current for the requested generation
        let ii = Complex::new(p, -q) / vv.conj();
        let xa = match self.kind {
            MachineKind::Classical => self.xd,
            MachineKind::FourthOrder => self.xq,
        };
        let delta = (vv + Complex::new(self.rs, xa) * ii).arg();
        // rotate the current into the rotor frame
        let idq = ii * Complex::from_polar(1.0, -(delta - FRAC_PI_2));
        let id = -idq.re;
        let iq = idq.im;
        let vd = -v * (delta - theta).sin();
        let vq = v * (delta - theta).cos();

        self.state[0] = id;
        self.state[1] = iq;
        self.state[2] = delta;
        self.state[3] = 1.0;
        self.dstate.iter_mut().for_each(|r| *r = 0.0);

        let (ef, pm) = match self.kind {
            MachineKind::Classical => {
                let ef = vq + self.rs * iq - self.xd * id;
                (ef, ef * iq)
            }
            MachineKind::FourthOrder => {
                let edp = vd + self.rs * id + self.xqp * iq;
                let eqp = vq + self.rs * iq - self.xdp * id;
                self.state[4] = edp;
                self.state[5] = eqp;
                let pm = edp * id + eqp * iq + (self.xdp - self.xqp) * id * iq;
                (eqp - (self.xd - self.xdp) * id, pm)
            }
        };
        field_set.resize(self.input_count(), 0.0);
        field_set[VOLTAGE_IN] = v;
        field_set[ANGLE_IN] = theta;
        field_set[FIELD_IN] = ef;
        field_set[MECH_IN] = pm;
        Ok(())
    }

    fn rotor_rates(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        mode: SolverMode,
    ) -> (Real, Real, Real, Real) {
        let view = self.view();
        let id = view.alg(sd, mode, 0);
        let iq = view.alg(sd, mode, 1);
        let omega = view.diff(sd, mode, 1);
        let ef = inputs.get(FIELD_IN).copied().unwrap_or(0.0);
        let pm = inputs.get(MECH_IN).copied().unwrap_or(0.0);

        let ddelta = self.base_freq * (omega - 1.0);
        match self.kind {
            MachineKind::Classical => {
                let pe = (ef + self.kw * (omega - 1.0)) * iq;
                let domega = 0.5 * (pm - pe - self.d * (omega - 1.0)) / self.h;
                (ddelta, domega, 0.0, 0.0)
            }
            MachineKind::FourthOrder => {
                let edp = view.diff(sd, mode, 2);
                let eqp = view.diff(sd, mode, 3);
                let pe = edp * id + eqp * iq + (self.xdp - self.xqp) * id * iq;
                let domega = 0.5 * (pm - pe - self.d * (omega - 1.0)) / self.h;
                let dedp = (-edp - (self.xq - self.xqp) * iq) / self.tqop;
                let deqp = (-eqp + (self.xd - self.xdp) * id + ef) / self.tdop;
                (ddelta, domega, dedp, deqp)
            }
        }
    }

    /// Stator currents satisfying the algebraic equations at the present
    /// rotor state, `None` when the impedance matrix is singular.
    fn solve_currents(&self, vd: Real, vq: Real, internal_d: Real, internal_q: Real) -> Option<(Real, Real)> {
        let (b, c) = match self.kind {
            MachineKind::Classical => (self.xd, -self.xd),
            MachineKind::FourthOrder => (self.xqp, -self.xdp),
        };
        let det = self.rs * self.rs - b * c;
        if det.abs() < 1e-12 {
            return None;
        }
        let r0 = internal_d - vd;
        let r1 = internal_q - vq;
        Some((
            (r0 * self.rs - b * r1) / det,
            (self.rs * r1 - r0 * c) / det,
        ))
    }
}

impl Parameterized for Machine {
    fn set_param(&mut self, name: &str, value: Real) -> ParamResult {
        match name {
            "r" | "rs" => {
                self.rs = value;
                Ok(())
            }
            "x" | "xd" => {
                self.xd = value;
                Ok(())
            }
            "h" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.h = value;
                Ok(())
            }
            "m" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.h = value / 2.0;
                Ok(())
            }
            "d" | "damping" => {
                self.d = value;
                Ok(())
            }
            "basefreq" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.base_freq = 2.0 * std::f64::consts::PI * value;
                Ok(())
            }
            "kw" if self.kind == MachineKind::Classical => {
                self.kw = value;
                Ok(())
            }
            "xq" if self.kind == MachineKind::FourthOrder => {
                self.xq = value;
                Ok(())
            }
            "xdp" if self.kind == MachineKind::FourthOrder => {
                self.xdp = value;
                Ok(())
            }
            "xqp" if self.kind == MachineKind::FourthOrder => {
                self.xqp = value;
                Ok(())
            }
            "tdop" | "td0p" if self.kind == MachineKind::FourthOrder => {
                self.tdop = value;
                Ok(())
            }
            "tqop" | "tq0p" if self.kind == MachineKind::FourthOrder => {
                self.tqop = value;
                Ok(())
            }
            "top" | "t0p" if self.kind == MachineKind::FourthOrder => {
                self.tdop = value;
                self.tqop = value;
                Ok(())
            }
            _ => Err(ParamError::unknown(name)),
        }
    }

    fn param(&self, name: &str) -> Option<Real> {
        match name {
            "r" | "rs" => Some(self.rs),
            "x" | "xd" => Some(self.xd),
            "xq" => Some(self.xq),
            "xdp" => Some(self.xdp),
            "xqp" => Some(self.xqp),
            "tdop" => Some(self.tdop),
            "tqop" => Some(self.tqop),
            "h" => Some(self.h),
            "m" => Some(2.0 * self.h),
            "d" | "damping" => Some(self.d),
            "kw" => Some(self.kw),
            "basefreq" => Some(self.base_freq / (2.0 * std::f64::consts::PI)),
            _ => None,
        }
    }
}

impl DynamicModel for Machine {
    fn name(&self) -> &str {
        &self.name
    }

    fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    fn offsets_mut(&mut self) -> &mut OffsetTable {
        &mut self.offsets
    }

    fn input_count(&self) -> usize {
        4
    }

    fn output_count(&self) -> usize {
        2
    }

    fn initialize_structure(&mut self) -> DaeResult<()> {
        self.build_structure()
    }

    fn initialize_states(
        &mut self,
        inputs: &[Real],
        desired: &[Real],
        field_set: &mut Vec<Real>,
    ) -> DaeResult<()> {
        if !self.offsets.sizes_loaded(SolverMode::local()) {
            self.build_structure()?;
        }
        if desired.is_empty() {
            return Err(DaeError::init(
                &self.name,
                "initialization requires a desired power output",
            ));
        }
        self.init_from_desired(inputs, desired, field_set)
    }

    fn load_sizes(&mut self, mode: SolverMode) {
        if self.offsets.sizes_loaded(mode) {
            return;
        }
        let local = self.offsets.local_sizes(SolverMode::local()).masked(mode);
        self.offsets.set_sizes(mode, local, local);
    }

    fn set_offsets(&mut self, base: OffsetBase, mode: SolverMode) -> OffsetBase {
        self.load_sizes(mode);
        self.offsets.assign(mode, base);
        let mut next = base;
        next.advance(&self.offsets.total(mode));
        next
    }

    fn guess_state(
        &self,
        _time: Real,
        state: &mut [Real],
        dstate_dt: &mut [Real],
        mode: SolverMode,
    ) {
        let sizes = self.offsets.local_sizes(mode);
        if mode.has_algebraic() {
            let a0 = self.offsets.alg_offset(mode);
            if a0 != NO_LOCATION {
                state[a0..a0 + sizes.alg].copy_from_slice(&self.state[..sizes.alg]);
            }
        }
        if mode.has_differential() {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                state[d0..d0 + sizes.diff].copy_from_slice(&self.state[2..2 + sizes.diff]);
                dstate_dt[d0..d0 + sizes.diff].copy_from_slice(&self.dstate[2..2 + sizes.diff]);
            }
        }
    }

    fn set_state(&mut self, time: Real, state: &[Real], dstate_dt: &[Real], mode: SolverMode) {
        let sizes = self.offsets.local_sizes(mode);
        if mode.has_algebraic() {
            let a0 = self.offsets.alg_offset(mode);
            if a0 != NO_LOCATION {
                self.state[..sizes.alg].copy_from_slice(&state[a0..a0 + sizes.alg]);
            }
        }
        if mode.has_differential() {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                self.state[2..2 + sizes.diff].copy_from_slice(&state[d0..d0 + sizes.diff]);
                self.dstate[2..2 + sizes.diff].copy_from_slice(&dstate_dt[d0..d0 + sizes.diff]);
            }
        }
        self.prev_time = time;
    }

    fn residual(&self, inputs: &[Real], sd: &StateData<'_>, resid: &mut [Real], mode: SolverMode) {
        let view = self.view();
        let (vd, vq) = self.dq_voltages(inputs, sd, mode);
        let id = view.alg(sd, mode, 0);
        let iq = view.alg(sd, mode, 1);
        let omega = view.diff(sd, mode, 1);
        let ef = inputs.get(FIELD_IN).copied().unwrap_or(0.0);

        if mode.has_algebraic() {
            let a0 = self.offsets.alg_offset(mode);
            if a0 != NO_LOCATION {
                match self.kind {
                    MachineKind::Classical => {
                        let ie = ef + self.kw * (omega - 1.0);
                        resid[a0] = vd + self.rs * id + self.xd * iq;
                        resid[a0 + 1] = vq + self.rs * iq - self.xd * id - ie;
                    }
                    MachineKind::FourthOrder => {
                        let edp = view.diff(sd, mode, 2);
                        let eqp = view.diff(sd, mode, 3);
                        resid[a0] = vd + self.rs * id + self.xqp * iq - edp;
                        resid[a0 + 1] = vq + self.rs * iq - self.xdp * id - eqp;
                    }
                }
            }
        }
        if mode.has_differential() {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                let (ddelta, domega, dedp, deqp) = self.rotor_rates(inputs, sd, mode);
                resid[d0] = ddelta - view.rate(sd, mode, 0);
                resid[d0 + 1] = domega - view.rate(sd, mode, 1);
                if self.kind == MachineKind::FourthOrder {
                    resid[d0 + 2] = dedp - view.rate(sd, mode, 2);
                    resid[d0 + 3] = deqp - view.rate(sd, mode, 3);
                }
            }
        }
    }

    fn derivative(&self, inputs: &[Real], sd: &StateData<'_>, deriv: &mut [Real], mode: SolverMode) {
        if !mode.has_differential() {
            return;
        }
        let d0 = self.offsets.diff_offset(mode);
        if d0 == NO_LOCATION {
            return;
        }
        let (ddelta, domega, dedp, deqp) = self.rotor_rates(inputs, sd, mode);
        deriv[d0] = ddelta;
        deriv[d0 + 1] = domega;
        if self.kind == MachineKind::FourthOrder {
            deriv[d0 + 2] = dedp;
            deriv[d0 + 3] = deqp;
        }
    }

    fn algebraic_update(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        update: &mut [Real],
        mode: SolverMode,
        _alpha: Real,
    ) {
        if !mode.has_algebraic() {
            return;
        }
        let a0 = self.offsets.alg_offset(mode);
        if a0 == NO_LOCATION {
            return;
        }
        let view = self.view();
        let (vd, vq) = self.dq_voltages(inputs, sd, mode);
        let omega = view.diff(sd, mode, 1);
        let ef = inputs.get(FIELD_IN).copied().unwrap_or(0.0);
        let (internal_d, internal_q) = match self.kind {
            MachineKind::Classical => (0.0, ef + self.kw * (omega - 1.0)),
            MachineKind::FourthOrder => (view.diff(sd, mode, 2), view.diff(sd, mode, 3)),
        };
        match self.solve_currents(vd, vq, internal_d, internal_q) {
            Some((id, iq)) => {
                update[a0] = id;
                update[a0 + 1] = iq;
            }
            None => {
                warn!(machine = %self.name, "singular stator impedance, keeping previous currents");
                update[a0] = self.state[0];
                update[a0 + 1] = self.state[1];
            }
        }
    }

    fn jacobian_elements(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        input_locs: &[usize],
        sink: &mut dyn MatrixSink,
        mode: SolverMode,
    ) {
        let view = self.view();
        let v = inputs.get(VOLTAGE_IN).copied().unwrap_or(0.0);
        let (vd, vq) = self.dq_voltages(inputs, sd, mode);
        let id = view.alg(sd, mode, 0);
        let iq = view.alg(sd, mode, 1);
        let omega = view.diff(sd, mode, 1);
        let ef = inputs.get(FIELD_IN).copied().unwrap_or(0.0);

        let vloc = input_locs.get(VOLTAGE_IN).copied().unwrap_or(NO_LOCATION);
        let thloc = input_locs.get(ANGLE_IN).copied().unwrap_or(NO_LOCATION);
        let efloc = input_locs.get(FIELD_IN).copied().unwrap_or(NO_LOCATION);
        let pmloc = input_locs.get(MECH_IN).copied().unwrap_or(NO_LOCATION);

        let a0 = if mode.has_algebraic() {
            self.offsets.alg_offset(mode)
        } else {
            NO_LOCATION
        };
        let d0 = if mode.has_differential() {
            self.offsets.diff_offset(mode)
        } else {
            NO_LOCATION
        };

        if a0 != NO_LOCATION {
            let (xr, xl) = match self.kind {
                MachineKind::Classical => (self.xd, self.xd),
                MachineKind::FourthOrder => (self.xqp, self.xdp),
            };
            sink.assign(a0, a0, self.rs);
            sink.assign(a0, a0 + 1, xr);
            sink.assign(a0 + 1, a0, -xl);
            sink.assign(a0 + 1, a0 + 1, self.rs);
            sink.assign_check_col(a0, thloc, vq);
            sink.assign_check_col(a0 + 1, thloc, -vd);
            if v > 0.0 {
                sink.assign_check_col(a0, vloc, vd / v);
                sink.assign_check_col(a0 + 1, vloc, vq / v);
            } else {
                warn!(machine = %self.name, "zero terminal voltage, dropping voltage sensitivities");
            }
            if d0 != NO_LOCATION {
                sink.assign(a0, d0, -vq);
                sink.assign(a0 + 1, d0, vd);
            }
            match self.kind {
                MachineKind::Classical => {
                    sink.assign_check_col(a0 + 1, efloc, -1.0);
                    if d0 != NO_LOCATION && self.kw != 0.0 {
                        sink.assign(a0 + 1, d0 + 1, -self.kw);
                    }
                }
                MachineKind::FourthOrder => {
                    if d0 != NO_LOCATION {
                        sink.assign(a0, d0 + 2, -1.0);
                        sink.assign(a0 + 1, d0 + 3, -1.0);
                    }
                }
            }
        }

        if d0 != NO_LOCATION {
            sink.assign(d0, d0, -sd.cj);
            sink.assign(d0, d0 + 1, self.base_freq);
            let kval = -0.5 / self.h;
            match self.kind {
                MachineKind::Classical => {
                    let ie = ef + self.kw * (omega - 1.0);
                    if a0 != NO_LOCATION {
                        sink.assign(d0 + 1, a0 + 1, kval * ie);
                    }
                    sink.assign(d0 + 1, d0 + 1, kval * (self.d + self.kw * iq) - sd.cj);
                    sink.assign_check_col(d0 + 1, pmloc, -kval);
                    sink.assign_check_col(d0 + 1, efloc, kval * iq);
                }
                MachineKind::FourthOrder => {
                    let edp = view.diff(sd, mode, 2);
                    let eqp = view.diff(sd, mode, 3);
                    if a0 != NO_LOCATION {
                        sink.assign(d0 + 1, a0, kval * (edp + (self.xdp - self.xqp) * iq));
                        sink.assign(d0 + 1, a0 + 1, kval * (eqp + (self.xdp - self.xqp) * id));
                        sink.assign(d0 + 2, a0 + 1, -(self.xq - self.xqp) / self.tqop);
                        sink.assign(d0 + 3, a0, (self.xd - self.xdp) / self.tdop);
                    }
                    sink.assign(d0 + 1, d0 + 1, kval * self.d - sd.cj);
                    sink.assign(d0 + 1, d0 + 2, kval * id);
                    sink.assign(d0 + 1, d0 + 3, kval * iq);
                    sink.assign_check_col(d0 + 1, pmloc, -kval);
                    sink.assign(d0 + 2, d0 + 2, -1.0 / self.tqop - sd.cj);
                    sink.assign(d0 + 3, d0 + 3, -1.0 / self.tdop - sd.cj);
                    sink.assign_check_col(d0 + 3, efloc, 1.0 / self.tdop);
                }
            }
        }
    }

    fn root_test(&self, _inputs: &[Real], _sd: &StateData<'_>, _roots: &mut [Real], _mode: SolverMode) {}

    fn root_trigger(&mut self, _time: Real, _inputs: &[Real], _root_mask: &[bool], _mode: SolverMode) {}

    fn root_check(
        &mut self,
        _inputs: &[Real],
        _sd: &StateData<'_>,
        _level: CheckLevel,
        _mode: SolverMode,
    ) -> ChangeCode {
        ChangeCode::NoChange
    }

    fn timestep(&mut self, time: Real, inputs: &[Real], _mode: SolverMode) -> Real {
        let dt = time - self.prev_time;
        if dt > 0.0 {
            let sd = StateData::empty(time);
            let local = SolverMode::local();
            let n = self.state.len();
            let mut deriv = vec![0.0; n];
            self.derivative(inputs, &sd, &mut deriv, local);
            for i in 2..n {
                self.state[i] += dt * deriv[i];
                self.dstate[i] = deriv[i];
            }
            let mut update = vec![0.0; n];
            self.algebraic_update(inputs, &sd, &mut update, local, 1.0);
            self.state[0] = update[0];
            self.state[1] = update[1];
        }
        self.prev_time = time;
        let sd = StateData::empty(time);
        self.output(inputs, &sd, SolverMode::local(), 0)
    }

    fn output(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, num: usize) -> Real {
        let (p, q) = self.terminal_power(inputs, sd, mode);
        match num {
            0 => p,
            1 => q,
            _ => 0.0,
        }
    }

    fn output_location(&self, _mode: SolverMode, _num: usize) -> usize {
        NO_LOCATION
    }

    fn state_index(&self, field: &str, mode: SolverMode) -> usize {
        let alg_at = |i: usize| {
            let a0 = self.offsets.alg_offset(mode);
            if mode.has_algebraic() && a0 != NO_LOCATION {
                a0 + i
            } else {
                NO_LOCATION
            }
        };
        let diff_at = |i: usize| {
            let d0 = self.offsets.diff_offset(mode);
            if mode.has_differential() && d0 != NO_LOCATION {
                d0 + i
            } else {
                NO_LOCATION
            }
        };
        match field {
            "id" => alg_at(0),
            "iq" => alg_at(1),
            "delta" | "angle" => diff_at(0),
            "freq" | "omega" | "speed" => diff_at(1),
            "edp" if self.kind == MachineKind::FourthOrder => diff_at(2),
            "eqp" if self.kind == MachineKind::FourthOrder => diff_at(3),
            _ => NO_LOCATION,
        }
    }

    fn local_state_names(&self) -> Vec<String> {
        let mut names = vec![
            "id".to_string(),
            "iq".to_string(),
            "delta".to_string(),
            "freq".to_string(),
        ];
        if self.kind == MachineKind::FourthOrder {
            names.push("edp".to_string());
            names.push("eqp".to_string());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: SolverMode = SolverMode::local();

    fn residual_norm(m: &Machine, inputs: &[Real]) -> Real {
        let sd = StateData::empty(0.0);
        let mut resid = vec![0.0; m.state.len()];
        m.residual(inputs, &sd, &mut resid, LOCAL);
        resid.iter().fold(0.0, |acc: Real, r| acc.max(r.abs()))
    }

    #[test]
    fn classical_init_balances_the_residual() {
        let mut m = Machine::classical();
        let mut req = Vec::new();
        m.initialize_states(&[1.0, 0.0], &[0.5, 0.1], &mut req).unwrap();
        assert_eq!(req.len(), 4);
        // no stator losses, so mechanical power equals the request
        assert!((req[MECH_IN] - 0.5).abs() < 1e-9);
        assert!(residual_norm(&m, &req) < 1e-9);

        let sd = StateData::empty(0.0);
        let (p, q) = m.terminal_power(&req, &sd, LOCAL);
        assert!((p - 0.5).abs() < 1e-9);
        assert!((q - 0.1).abs() < 1e-9);
    }

    #[test]
    fn fourth_order_init_balances_the_residual() {
        let mut m = Machine::fourth_order();
        m.set_param("xq", 0.85).unwrap();
        m.set_param("rs", 0.005).unwrap();
        let mut req = Vec::new();
        m.initialize_states(&[1.02, 0.1], &[0.8, 0.25], &mut req).unwrap();
        assert!(residual_norm(&m, &req) < 1e-9);

        let sd = StateData::empty(0.0);
        let (p, q) = m.terminal_power(&req, &sd, LOCAL);
        assert!((p - 0.8).abs() < 1e-9);
        assert!((q - 0.25).abs() < 1e-9);
    }

    #[test]
    fn algebraic_update_recovers_the_init_currents() {
        let mut m = Machine::fourth_order();
        let mut req = Vec::new();
        m.initialize_states(&[1.0, 0.0], &[0.6, 0.2], &mut req).unwrap();
        let (id, iq) = (m.state[0], m.state[1]);

        let sd = StateData::empty(0.0);
        let mut update = vec![0.0; m.state.len()];
        m.algebraic_update(&req, &sd, &mut update, LOCAL, 1.0);
        assert!((update[0] - id).abs() < 1e-9);
        assert!((update[1] - iq).abs() < 1e-9);
    }

    #[test]
    fn init_requires_a_power_target() {
        let mut m = Machine::classical();
        let mut req = Vec::new();
        let err = m.initialize_states(&[1.0, 0.0], &[], &mut req).unwrap_err();
        assert!(format!("{err}").contains("desired power"));
    }

    #[test]
    fn parameter_aliases_and_gating() {
        let mut m = Machine::classical();
        m.set_param("m", 8.0).unwrap();
        assert_eq!(m.param("h"), Some(4.0));
        m.set_param("kw", 1.5).unwrap();
        // transient constants belong to the fourth-order model
        assert!(m.set_param("tdop", 6.0).unwrap_err().is_unhandled());

        let mut f = Machine::fourth_order();
        f.set_param("top", 5.0).unwrap();
        assert_eq!(f.param("tdop"), Some(5.0));
        assert_eq!(f.param("tqop"), Some(5.0));
        assert!(f.set_param("kw", 1.0).unwrap_err().is_unhandled());
        assert!(f.set_param("h", -1.0).is_err());
    }

    #[test]
    fn state_lookup_follows_the_partition() {
        let mut m = Machine::classical();
        let mut req = Vec::new();
        m.initialize_states(&[1.0, 0.0], &[0.4, 0.0], &mut req).unwrap();
        let mode = SolverMode::dae(1);
        m.load_sizes(mode);
        let total = m.offsets().total(mode);
        m.set_offsets(OffsetBase::for_system(&total), mode);

        assert_eq!(m.state_index("id", mode), 0);
        assert_eq!(m.state_index("freq", mode), 3);
        assert_eq!(m.frequency_location(mode), 3);

        let alg = SolverMode::algebraic_only(2);
        m.load_sizes(alg);
        let total = m.offsets().total(alg);
        m.set_offsets(OffsetBase::for_system(&total), alg);
        assert_eq!(m.state_index("freq", alg), NO_LOCATION);
        assert_eq!(m.frequency_location(alg), NO_LOCATION);
    }
}
