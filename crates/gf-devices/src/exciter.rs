//! Excitation system models producing the machine field voltage.
//!
//! Both shapes regulate the terminal voltage toward a setpoint plus a bias
//! absorbed at initialization. The regulator output carries hard limits
//! `[Vrmin, Vrmax]`; while a limit holds, the pinned state's equation
//! collapses to a zero rate and a root watches for release. States are all
//! differential: `[Ef]` for the basic regulator, `[Ef, Vr, Rf]` for the
//! IEEE type 1 model with exciter saturation and rate feedback.

use gf_core::{NO_LOCATION, ParamError, ParamResult, Parameterized, ROOT_TOLERANCE, Real};
use gf_dae::{
    ChangeCode, CheckLevel, DaeError, DaeResult, DynamicModel, MatrixSink, OffsetBase, OffsetTable,
    SolverMode, StateData, StateSizes,
};
use tracing::{debug, warn};

use crate::io::{EXCITER_VOLTAGE_IN, EXCITER_VSET_IN, LocalView};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExciterKind {
    /// First-order regulator driving the field directly.
    Basic,
    /// IEEE type 1: regulator, exciter with saturation, rate feedback.
    Ieee1,
}

#[derive(Clone, Debug)]
pub struct Exciter {
    name: String,
    kind: ExciterKind,
    ka: Real,
    ta: Real,
    ke: Real,
    te: Real,
    kf: Real,
    tf: Real,
    aex: Real,
    bex: Real,
    vrmax: Real,
    vrmin: Real,
    /// Setpoint used when no reference input is wired.
    vref: Real,
    /// Offset absorbing the initial regulation error.
    vbias: Real,
    limited: bool,
    triggered_high: bool,
    offsets: OffsetTable,
    state: Vec<Real>,
    dstate: Vec<Real>,
    prev_time: Real,
}

impl Exciter {
    pub fn new(kind: ExciterKind) -> Self {
        let (ka, ta) = match kind {
            ExciterKind::Basic => (10.0, 0.004),
            ExciterKind::Ieee1 => (20.0, 0.04),
        };
        Self {
            name: match kind {
                ExciterKind::Basic => "basic".to_string(),
                ExciterKind::Ieee1 => "ieee_type1".to_string(),
            },
            kind,
            ka,
            ta,
            ke: 1.0,
            te: 1.0,
            kf: 0.03,
            tf: 1.0,
            aex: 0.0,
            bex: 0.0,
            vrmax: 6.0,
            vrmin: -5.1,
            vref: 1.0,
            vbias: 0.0,
            limited: false,
            triggered_high: false,
            offsets: OffsetTable::new(),
            state: Vec::new(),
            dstate: Vec::new(),
            prev_time: 0.0,
        }
    }

    pub fn basic() -> Self {
        Self::new(ExciterKind::Basic)
    }

    pub fn ieee_type1() -> Self {
        Self::new(ExciterKind::Ieee1)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(&self) -> ExciterKind {
        self.kind
    }

    pub fn has_limits(&self) -> bool {
        self.vrmax.is_finite() || self.vrmin.is_finite()
    }

    fn view(&self) -> LocalView<'_> {
        LocalView {
            offsets: &self.offsets,
            state: &self.state,
            dstate: &self.dstate,
            local_alg: 0,
        }
    }

    fn diff_count(&self) -> usize {
        match self.kind {
            ExciterKind::Basic => 1,
            ExciterKind::Ieee1 => 3,
        }
    }

    /// Local index of the state the regulator limits pin.
    fn limit_index(&self) -> usize {
        match self.kind {
            ExciterKind::Basic => 0,
            ExciterKind::Ieee1 => 1,
        }
    }

    fn limit_root_active(&self, mode: SolverMode) -> bool {
        self.has_limits() && mode.has_differential()
    }

    fn local_sizes(&self) -> StateSizes {
        let roots = usize::from(self.has_limits());
        match self.kind {
            ExciterKind::Basic => StateSizes {
                diff: 1,
                diff_roots: roots,
                jac: 4,
                ..StateSizes::default()
            },
            ExciterKind::Ieee1 => StateSizes {
                diff: 3,
                diff_roots: roots,
                jac: 12,
                ..StateSizes::default()
            },
        }
    }

    fn build_structure(&mut self) -> DaeResult<()> {
        if !(self.ta > 0.0) {
            return Err(DaeError::structure("regulator time constant must be positive"));
        }
        if self.kind == ExciterKind::Ieee1 && (self.te <= 0.0 || self.tf <= 0.0) {
            return Err(DaeError::structure(
                "exciter and feedback time constants must be positive",
            ));
        }
        let sizes = self.local_sizes();
        self.offsets.unload();
        self.offsets.set_sizes(SolverMode::local(), sizes, sizes);
        self.offsets
            .assign(SolverMode::local(), OffsetBase::for_system(&sizes));
        self.state.clear();
        self.state.resize(sizes.total(), 0.0);
        self.dstate.clear();
        self.dstate.resize(sizes.total(), 0.0);
        Ok(())
    }

    fn saturation(&self, ef: Real) -> Real {
        self.aex * (self.bex * ef).exp()
    }

    fn regulation_error(&self, inputs: &[Real]) -> Real {
        let v = inputs.get(EXCITER_VOLTAGE_IN).copied().unwrap_or(0.0);
        let vset = inputs.get(EXCITER_VSET_IN).copied().unwrap_or(self.vref);
        vset + self.vbias - v
    }

    /// Rates with the limiter ignored, local ordering.
    fn free_rates(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode) -> [Real; 3] {
        let view = self.view();
        let err = self.regulation_error(inputs);
        let ef = view.diff(sd, mode, 0);
        match self.kind {
            ExciterKind::Basic => [(-ef + self.ka * err) / self.ta, 0.0, 0.0],
            ExciterKind::Ieee1 => {
                let vr = view.diff(sd, mode, 1);
                let rf = view.diff(sd, mode, 2);
                [
                    (-(self.ke + self.saturation(ef)) * ef + vr) / self.te,
                    (-vr + self.ka * rf - ef * self.ka * self.kf / self.tf + self.ka * err)
                        / self.ta,
                    (-rf + ef * self.kf / self.tf) / self.tf,
                ]
            }
        }
    }

    /// Sign of the pinned state's free pull, used to decide release.
    fn release_test(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode) -> Real {
        match self.kind {
            ExciterKind::Basic => self.regulation_error(inputs),
            ExciterKind::Ieee1 => {
                let view = self.view();
                let ef = view.diff(sd, mode, 0);
                let vr = view.diff(sd, mode, 1);
                let rf = view.diff(sd, mode, 2);
                rf - ef * self.kf / self.tf + self.regulation_error(inputs) - vr / self.ka
            }
        }
    }

    /// Recompute cached rates after a limiter release.
    fn refresh_rates(&mut self, time: Real, inputs: &[Real]) {
        let sd = StateData::empty(time);
        let rates = self.free_rates(inputs, &sd, SolverMode::local());
        let n = self.diff_count();
        self.dstate[..n].copy_from_slice(&rates[..n]);
    }

    fn engage(&mut self, high: bool) {
        let idx = self.limit_index();
        self.state[idx] = if high { self.vrmax } else { self.vrmin };
        self.dstate[idx] = 0.0;
        self.limited = true;
        self.triggered_high = high;
        warn!(
            exciter = %self.name,
            limit = if high { self.vrmax } else { self.vrmin },
            "regulator limit engaged"
        );
    }
}

impl Parameterized for Exciter {
    fn set_param(&mut self, name: &str, value: Real) -> ParamResult {
        match name {
            "vref" => {
                self.vref = value;
                Ok(())
            }
            "vbias" => {
                self.vbias = value;
                Ok(())
            }
            "ka" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.ka = value;
                Ok(())
            }
            "ta" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.ta = value;
                Ok(())
            }
            "vrmax" | "urmax" => {
                let had = self.has_limits();
                self.vrmax = value;
                if self.has_limits() != had {
                    self.offsets.unload();
                }
                Ok(())
            }
            "vrmin" | "urmin" => {
                let had = self.has_limits();
                self.vrmin = value;
                if self.has_limits() != had {
                    self.offsets.unload();
                }
                Ok(())
            }
            "ke" if self.kind == ExciterKind::Ieee1 => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.ke = value;
                Ok(())
            }
            "te" if self.kind == ExciterKind::Ieee1 => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.te = value;
                Ok(())
            }
            "kf" if self.kind == ExciterKind::Ieee1 => {
                self.kf = value;
                Ok(())
            }
            "tf" if self.kind == ExciterKind::Ieee1 => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.tf = value;
                Ok(())
            }
            "aex" if self.kind == ExciterKind::Ieee1 => {
                self.aex = value;
                Ok(())
            }
            "bex" if self.kind == ExciterKind::Ieee1 => {
                self.bex = value;
                Ok(())
            }
            _ => Err(ParamError::unknown(name)),
        }
    }

    fn param(&self, name: &str) -> Option<Real> {
        match name {
            "vref" => Some(self.vref),
            "vbias" => Some(self.vbias),
            "ka" => Some(self.ka),
            "ta" => Some(self.ta),
            "ke" => Some(self.ke),
            "te" => Some(self.te),
            "kf" => Some(self.kf),
            "tf" => Some(self.tf),
            "aex" => Some(self.aex),
            "bex" => Some(self.bex),
            "vrmax" => Some(self.vrmax),
            "vrmin" => Some(self.vrmin),
            _ => None,
        }
    }
}

impl DynamicModel for Exciter {
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
        let v = inputs.get(EXCITER_VOLTAGE_IN).copied().unwrap_or(0.0);
        let vset = inputs.get(EXCITER_VSET_IN).copied().unwrap_or(self.vref);
        self.limited = false;
        self.triggered_high = false;
        self.dstate.iter_mut().for_each(|r| *r = 0.0);

        if let Some(&ef) = desired.first() {
            // hold the requested field by folding the error into the bias
            let vr = match self.kind {
                ExciterKind::Basic => {
                    self.state[0] = ef;
                    ef
                }
                ExciterKind::Ieee1 => {
                    let vr = (self.ke + self.saturation(ef)) * ef;
                    self.state[0] = ef;
                    self.state[1] = vr;
                    self.state[2] = ef * self.kf / self.tf;
                    vr
                }
            };
            if vr > self.vrmax || vr < self.vrmin {
                warn!(
                    exciter = %self.name,
                    vr,
                    "initial regulator output sits outside its limits"
                );
            }
            self.vbias = v + vr / self.ka - vset;
            field_set.resize(self.input_count(), 0.0);
            field_set[EXCITER_VOLTAGE_IN] = v;
            field_set[EXCITER_VSET_IN] = vset;
        } else {
            // steady field for the present terminal conditions
            let err = vset + self.vbias - v;
            let ef = match self.kind {
                ExciterKind::Basic => {
                    let ef = self.ka * err;
                    self.state[0] = ef;
                    ef
                }
                ExciterKind::Ieee1 => {
                    let ef = self.ka * err / self.ke;
                    self.state[0] = ef;
                    self.state[1] = (self.ke + self.saturation(ef)) * ef;
                    self.state[2] = ef * self.kf / self.tf;
                    ef
                }
            };
            field_set.resize(self.output_count(), 0.0);
            field_set[0] = ef;
        }
        Ok(())
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
        if !mode.has_differential() {
            return;
        }
        let d0 = self.offsets.diff_offset(mode);
        if d0 == NO_LOCATION {
            return;
        }
        let n = self.offsets.local_sizes(mode).diff;
        state[d0..d0 + n].copy_from_slice(&self.state[..n]);
        dstate_dt[d0..d0 + n].copy_from_slice(&self.dstate[..n]);
    }

    fn set_state(&mut self, time: Real, state: &[Real], dstate_dt: &[Real], mode: SolverMode) {
        if mode.has_differential() {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                let n = self.offsets.local_sizes(mode).diff;
                self.state[..n].copy_from_slice(&state[d0..d0 + n]);
                self.dstate[..n].copy_from_slice(&dstate_dt[d0..d0 + n]);
            }
        }
        self.prev_time = time;
    }

    fn residual(&self, inputs: &[Real], sd: &StateData<'_>, resid: &mut [Real], mode: SolverMode) {
        if !mode.has_differential() {
            return;
        }
        let d0 = self.offsets.diff_offset(mode);
        if d0 == NO_LOCATION {
            return;
        }
        let view = self.view();
        let rates = self.free_rates(inputs, sd, mode);
        for i in 0..self.diff_count() {
            resid[d0 + i] = rates[i] - view.rate(sd, mode, i);
        }
        if self.limited {
            let idx = self.limit_index();
            resid[d0 + idx] = -view.rate(sd, mode, idx);
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
        let rates = self.free_rates(inputs, sd, mode);
        for i in 0..self.diff_count() {
            deriv[d0 + i] = rates[i];
        }
        if self.limited {
            deriv[d0 + self.limit_index()] = 0.0;
        }
    }

    fn algebraic_update(
        &self,
        _inputs: &[Real],
        _sd: &StateData<'_>,
        _update: &mut [Real],
        _mode: SolverMode,
        _alpha: Real,
    ) {
    }

    fn jacobian_elements(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        input_locs: &[usize],
        sink: &mut dyn MatrixSink,
        mode: SolverMode,
    ) {
        if !mode.has_differential() {
            return;
        }
        let d0 = self.offsets.diff_offset(mode);
        if d0 == NO_LOCATION {
            return;
        }
        let vloc = input_locs
            .get(EXCITER_VOLTAGE_IN)
            .copied()
            .unwrap_or(NO_LOCATION);
        let vsloc = input_locs
            .get(EXCITER_VSET_IN)
            .copied()
            .unwrap_or(NO_LOCATION);
        match self.kind {
            ExciterKind::Basic => {
                if self.limited {
                    sink.assign(d0, d0, -sd.cj);
                } else {
                    sink.assign(d0, d0, -1.0 / self.ta - sd.cj);
                    sink.assign_check_col(d0, vloc, -self.ka / self.ta);
                    sink.assign_check_col(d0, vsloc, self.ka / self.ta);
                }
            }
            ExciterKind::Ieee1 => {
                let ef = self.view().diff(sd, mode, 0);
                let sat_slope = self.aex * (self.bex * ef).exp() * (1.0 + self.bex * ef);
                sink.assign(d0, d0, -(self.ke + sat_slope) / self.te - sd.cj);
                sink.assign(d0, d0 + 1, 1.0 / self.te);
                if self.limited {
                    sink.assign(d0 + 1, d0 + 1, -sd.cj);
                } else {
                    sink.assign(d0 + 1, d0, -self.ka * self.kf / (self.tf * self.ta));
                    sink.assign(d0 + 1, d0 + 1, -1.0 / self.ta - sd.cj);
                    sink.assign(d0 + 1, d0 + 2, self.ka / self.ta);
                    sink.assign_check_col(d0 + 1, vloc, -self.ka / self.ta);
                    sink.assign_check_col(d0 + 1, vsloc, self.ka / self.ta);
                }
                sink.assign(d0 + 2, d0, self.kf / (self.tf * self.tf));
                sink.assign(d0 + 2, d0 + 2, -1.0 / self.tf - sd.cj);
            }
        }
    }

    fn root_test(&self, inputs: &[Real], sd: &StateData<'_>, roots: &mut [Real], mode: SolverMode) {
        if !self.limit_root_active(mode) {
            return;
        }
        let r0 = self.offsets.root_offset(mode);
        if r0 == NO_LOCATION {
            return;
        }
        if self.limited {
            let bias = match self.kind {
                ExciterKind::Basic => 0.0,
                ExciterKind::Ieee1 => {
                    0.001 * self.view().diff(sd, mode, 1) / (self.ka * self.ta)
                }
            };
            roots[r0] = self.release_test(inputs, sd, mode) + bias;
        } else {
            let x = self.view().diff(sd, mode, self.limit_index());
            roots[r0] = (self.vrmax - x).min(x - self.vrmin) + ROOT_TOLERANCE;
        }
    }

    fn root_trigger(&mut self, time: Real, inputs: &[Real], root_mask: &[bool], mode: SolverMode) {
        if !self.limit_root_active(mode) {
            return;
        }
        let r0 = self.offsets.root_offset(mode);
        if r0 == NO_LOCATION || !root_mask.get(r0).copied().unwrap_or(false) {
            return;
        }
        if self.limited {
            debug!(exciter = %self.name, "regulator limit released");
            self.limited = false;
            self.triggered_high = false;
            self.refresh_rates(time, inputs);
        } else {
            let high = self.state[self.limit_index()] >= self.vrmax;
            self.engage(high);
        }
    }

    fn root_check(
        &mut self,
        inputs: &[Real],
        sd: &StateData<'_>,
        _level: CheckLevel,
        mode: SolverMode,
    ) -> ChangeCode {
        if !self.limit_root_active(mode) {
            return ChangeCode::NoChange;
        }
        if self.limited {
            let test = self.release_test(inputs, sd, mode);
            let guard = match self.kind {
                ExciterKind::Basic => 0.0,
                ExciterKind::Ieee1 => {
                    -0.001 * self.view().diff(sd, mode, 1) / (self.ka * self.ta)
                }
            };
            let release = if self.triggered_high {
                test < guard
            } else {
                test > guard
            };
            if release {
                debug!(exciter = %self.name, "regulator limit released");
                self.limited = false;
                self.triggered_high = false;
                self.refresh_rates(sd.time, inputs);
                return ChangeCode::JacobianChange;
            }
        } else {
            let x = self.view().diff(sd, mode, self.limit_index());
            if x > self.vrmax + ROOT_TOLERANCE {
                self.engage(true);
                return ChangeCode::JacobianChange;
            }
            if x < self.vrmin - ROOT_TOLERANCE {
                self.engage(false);
                return ChangeCode::JacobianChange;
            }
        }
        ChangeCode::NoChange
    }

    fn timestep(&mut self, time: Real, inputs: &[Real], _mode: SolverMode) -> Real {
        let dt = time - self.prev_time;
        if dt > 0.0 {
            let sd = StateData::empty(time);
            let rates = self.free_rates(inputs, &sd, SolverMode::local());
            for i in 0..self.diff_count() {
                self.state[i] += dt * rates[i];
                self.dstate[i] = rates[i];
            }
            let idx = self.limit_index();
            if self.state[idx] >= self.vrmax {
                self.state[idx] = self.vrmax;
                self.dstate[idx] = 0.0;
                self.limited = true;
                self.triggered_high = true;
            } else if self.state[idx] <= self.vrmin {
                self.state[idx] = self.vrmin;
                self.dstate[idx] = 0.0;
                self.limited = true;
                self.triggered_high = false;
            } else {
                self.limited = false;
                self.triggered_high = false;
            }
        }
        self.prev_time = time;
        self.state[0]
    }

    fn output(&self, _inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, _num: usize) -> Real {
        self.view().diff(sd, mode, 0)
    }

    fn output_location(&self, mode: SolverMode, _num: usize) -> usize {
        self.offsets.diff_offset(mode)
    }

    fn state_index(&self, field: &str, mode: SolverMode) -> usize {
        let d0 = self.offsets.diff_offset(mode);
        if d0 == NO_LOCATION {
            return NO_LOCATION;
        }
        match field {
            "ef" => d0,
            "vr" if self.kind == ExciterKind::Ieee1 => d0 + 1,
            "rf" if self.kind == ExciterKind::Ieee1 => d0 + 2,
            _ => NO_LOCATION,
        }
    }

    fn local_state_names(&self) -> Vec<String> {
        match self.kind {
            ExciterKind::Basic => vec!["ef".to_string()],
            ExciterKind::Ieee1 => {
                vec!["ef".to_string(), "vr".to_string(), "rf".to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: SolverMode = SolverMode::local();

    fn residual_norm(e: &Exciter, inputs: &[Real]) -> Real {
        let sd = StateData::empty(0.0);
        let mut resid = vec![0.0; e.state.len()];
        e.residual(inputs, &sd, &mut resid, LOCAL);
        resid.iter().fold(0.0, |acc: Real, r| acc.max(r.abs()))
    }

    #[test]
    fn basic_init_absorbs_the_error_into_the_bias() {
        let mut e = Exciter::basic();
        let mut req = Vec::new();
        e.initialize_states(&[1.03, 1.0], &[1.8], &mut req).unwrap();
        assert_eq!(req, vec![1.03, 1.0]);
        assert!((e.vbias - 0.21).abs() < 1e-12);
        assert!(residual_norm(&e, &[1.03, 1.0]) < 1e-9);
        let sd = StateData::empty(0.0);
        assert!((e.output(&[1.03, 1.0], &sd, LOCAL, 0) - 1.8).abs() < 1e-12);
    }

    #[test]
    fn ieee_type1_init_is_steady_with_saturation() {
        let mut e = Exciter::ieee_type1();
        e.set_param("aex", 0.03).unwrap();
        e.set_param("bex", 1.0).unwrap();
        let mut req = Vec::new();
        e.initialize_states(&[1.0, 1.0], &[1.5], &mut req).unwrap();
        assert!(residual_norm(&e, &[1.0, 1.0]) < 1e-9);
        // regulator output covers saturation plus the self-excitation term
        assert!((e.state[1] - (1.0 + 0.03 * 1.5f64.exp()) * 1.5).abs() < 1e-12);
    }

    #[test]
    fn init_without_a_target_settles_at_the_present_error() {
        let mut e = Exciter::basic();
        e.set_param("vbias", 0.05).unwrap();
        let mut out = Vec::new();
        e.initialize_states(&[1.0, 1.0], &[], &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.5).abs() < 1e-12);
        assert!(residual_norm(&e, &[1.0, 1.0]) < 1e-9);
    }

    #[test]
    fn limit_engages_once_and_releases_on_sign_change() {
        let mut e = Exciter::basic();
        let mut req = Vec::new();
        e.initialize_states(&[1.0, 1.0], &[1.0], &mut req).unwrap();

        e.state[0] = 6.5;
        let sd = StateData::empty(0.0);
        let code = e.root_check(&[1.0, 1.0], &sd, CheckLevel::FullCheck, LOCAL);
        assert_eq!(code, ChangeCode::JacobianChange);
        assert!(e.limited);
        assert_eq!(e.state[0], 6.0);
        assert_eq!(
            e.root_check(&[1.0, 1.0], &sd, CheckLevel::FullCheck, LOCAL),
            ChangeCode::NoChange
        );

        // raising the terminal voltage flips the error sign and frees it
        let code = e.root_check(&[2.5, 1.0], &sd, CheckLevel::FullCheck, LOCAL);
        assert_eq!(code, ChangeCode::JacobianChange);
        assert!(!e.limited);
        let rates = e.free_rates(&[2.5, 1.0], &sd, LOCAL);
        assert!((e.dstate[0] - rates[0]).abs() < 1e-12);
    }

    #[test]
    fn pinned_row_collapses_to_a_zero_rate() {
        let mut e = Exciter::ieee_type1();
        let mut req = Vec::new();
        e.initialize_states(&[1.0, 1.0], &[2.0], &mut req).unwrap();
        e.limited = true;
        e.triggered_high = true;
        e.state[1] = e.vrmax;

        let state = e.state.clone();
        let dstate = vec![0.3; 3];
        let sd = StateData::new(0.0, &state, &dstate, 2.0);
        let mut resid = vec![0.0; 3];
        e.residual(&[1.0, 1.0], &sd, &mut resid, LOCAL);
        assert!((resid[1] + 0.3).abs() < 1e-12);
    }

    #[test]
    fn removing_both_limits_drops_the_root() {
        let mut e = Exciter::basic();
        e.initialize_structure().unwrap();
        assert_eq!(e.offsets().local_sizes(LOCAL).roots(), 1);

        e.set_param("vrmax", f64::INFINITY).unwrap();
        // one side still finite, structure stands
        assert!(e.offsets().sizes_loaded(LOCAL));
        e.set_param("vrmin", f64::NEG_INFINITY).unwrap();
        assert!(!e.offsets().sizes_loaded(LOCAL));
        e.initialize_structure().unwrap();
        assert_eq!(e.offsets().local_sizes(LOCAL).roots(), 0);
    }

    #[test]
    fn kind_gated_parameters() {
        let mut e = Exciter::basic();
        assert!(e.set_param("ke", 2.0).unwrap_err().is_unhandled());
        assert!(e.set_param("ta", -0.1).is_err());
        e.set_param("urmax", 4.0).unwrap();
        assert_eq!(e.param("vrmax"), Some(4.0));
    }
}
