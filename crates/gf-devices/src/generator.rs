//! A dynamic generator: machine, exciter, and governor wired as one
//! sub-model.
//!
//! The generator owns the wiring and the base conversion. Terminal inputs
//! are the bus voltage and angle; outputs are real and reactive power in
//! system base. Internally the machine runs in its own base: setpoints
//! scale by `system_base / machine_base` on the way in and outputs scale
//! back on the way out. The exciter sees `[V, Vset]`, the governor sees
//! `[omega, Pref]`, and their outputs feed the machine's field and
//! mechanical slots, with the couplings resolved to state columns for
//! Jacobian assembly.

use gf_core::{NO_LOCATION, ParamError, ParamResult, Parameterized, Real};
use gf_dae::{
    ChangeCode, CheckLevel, DaeError, DaeResult, DynamicModel, MatrixSink, OffsetBase,
    OffsetTable, SolverMode, StateData, StateSizes,
};
use tracing::warn;

use crate::exciter::Exciter;
use crate::governor::Governor;
use crate::io::{
    ANGLE_IN, EXCITER_VSET_IN, FIELD_IN, GOVERNOR_PSET_IN, MECH_IN, VOLTAGE_IN,
};
use crate::machine::Machine;

#[derive(Clone, Debug)]
pub struct DynamicGenerator {
    name: String,
    machine: Machine,
    exciter: Option<Exciter>,
    governor: Option<Governor>,
    /// Power setpoint, system base.
    pset: Real,
    vset: Real,
    pmax: Real,
    pmin: Real,
    machine_base: Real,
    system_base: Real,
    /// Field voltage applied when no exciter is attached.
    field_voltage: Real,
    offsets: OffsetTable,
    prev_time: Real,
}

impl DynamicGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            machine: Machine::classical(),
            exciter: None,
            governor: None,
            pset: 0.0,
            vset: 1.0,
            pmax: Real::INFINITY,
            pmin: Real::NEG_INFINITY,
            machine_base: 100.0,
            system_base: 100.0,
            field_voltage: 1.0,
            offsets: OffsetTable::new(),
            prev_time: 0.0,
        }
    }

    pub fn with_machine(mut self, machine: Machine) -> Self {
        self.machine = machine;
        self
    }

    pub fn with_exciter(mut self, exciter: Exciter) -> Self {
        self.exciter = Some(exciter);
        self
    }

    pub fn with_governor(mut self, governor: Governor) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn exciter(&self) -> Option<&Exciter> {
        self.exciter.as_ref()
    }

    pub fn exciter_mut(&mut self) -> Option<&mut Exciter> {
        self.exciter.as_mut()
    }

    pub fn governor(&self) -> Option<&Governor> {
        self.governor.as_ref()
    }

    pub fn governor_mut(&mut self) -> Option<&mut Governor> {
        self.governor.as_mut()
    }

    /// Swapping a sub-model invalidates the composed layout.
    pub fn set_machine(&mut self, machine: Machine) -> ChangeCode {
        self.machine = machine;
        self.offsets.unload();
        ChangeCode::StateCountChange
    }

    pub fn set_exciter(&mut self, exciter: Exciter) -> ChangeCode {
        self.exciter = Some(exciter);
        self.offsets.unload();
        ChangeCode::StateCountChange
    }

    pub fn set_governor(&mut self, governor: Governor) -> ChangeCode {
        self.governor = Some(governor);
        self.offsets.unload();
        ChangeCode::StateCountChange
    }

    /// System-base to machine-base conversion factor.
    fn to_machine(&self) -> Real {
        self.system_base / self.machine_base
    }

    fn clamped_pref(&self) -> Real {
        self.pset.min(self.pmax).max(self.pmin) * self.to_machine()
    }

    /// Inputs for each sub-model at the present state:
    /// `(machine, exciter, governor)`.
    fn sub_inputs(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        mode: SolverMode,
    ) -> ([Real; 4], [Real; 2], [Real; 2]) {
        let v = inputs.get(VOLTAGE_IN).copied().unwrap_or(0.0);
        let theta = inputs.get(ANGLE_IN).copied().unwrap_or(0.0);
        let exciter_in = [v, self.vset];
        let pref = self.clamped_pref();
        let governor_in = [self.machine.frequency(sd, mode), pref];
        let ef = self
            .exciter
            .as_ref()
            .map_or(self.field_voltage, |e| e.output(&exciter_in, sd, mode, 0));
        let pm = self
            .governor
            .as_ref()
            .map_or(pref, |g| g.output(&governor_in, sd, mode, 0));
        ([v, theta, ef, pm], exciter_in, governor_in)
    }

    /// State columns behind each sub-model input, for Jacobian assembly.
    fn sub_locs(
        &self,
        input_locs: &[usize],
        mode: SolverMode,
    ) -> ([usize; 4], [usize; 2], [usize; 2]) {
        let vloc = input_locs.get(VOLTAGE_IN).copied().unwrap_or(NO_LOCATION);
        let thloc = input_locs.get(ANGLE_IN).copied().unwrap_or(NO_LOCATION);
        let efloc = self
            .exciter
            .as_ref()
            .map_or(NO_LOCATION, |e| e.output_location(mode, 0));
        let pmloc = self
            .governor
            .as_ref()
            .map_or(NO_LOCATION, |g| g.output_location(mode, 0));
        (
            [vloc, thloc, efloc, pmloc],
            [vloc, NO_LOCATION],
            [self.machine.frequency_location(mode), NO_LOCATION],
        )
    }

    /// A structural change inside a sub-model obsoletes the composed
    /// layout; forget it so the next pass rebuilds everything.
    fn absorb_structure(&mut self) {
        let local = SolverMode::local();
        let stale = !self.machine.offsets().sizes_loaded(local)
            || self
                .exciter
                .as_ref()
                .is_some_and(|e| !e.offsets().sizes_loaded(local))
            || self
                .governor
                .as_ref()
                .is_some_and(|g| !g.offsets().sizes_loaded(local));
        if stale && self.offsets.sizes_loaded(local) {
            self.offsets.unload();
        }
    }

    fn cascade_param(&mut self, name: &str, value: Real) -> ParamResult {
        match self.machine.set_param(name, value) {
            Err(e) if e.is_unhandled() => {}
            other => return other,
        }
        if let Some(ex) = &mut self.exciter {
            match ex.set_param(name, value) {
                Err(e) if e.is_unhandled() => {}
                other => return other,
            }
        }
        if let Some(gov) = &mut self.governor {
            match gov.set_param(name, value) {
                Err(e) if e.is_unhandled() => {}
                other => return other,
            }
        }
        Err(ParamError::unknown(name))
    }
}

impl Parameterized for DynamicGenerator {
    fn set_param(&mut self, name: &str, value: Real) -> ParamResult {
        match name {
            "p" | "pset" => {
                self.pset = value;
                Ok(())
            }
            "vset" => {
                self.vset = value;
                Ok(())
            }
            "pmax" => {
                self.pmax = value;
                Ok(())
            }
            "pmin" => {
                self.pmin = value;
                Ok(())
            }
            "mbase" | "base" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.machine_base = value;
                Ok(())
            }
            "systembase" | "basepower" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.system_base = value;
                Ok(())
            }
            _ => {
                let result = self.cascade_param(name, value);
                self.absorb_structure();
                result
            }
        }
    }

    fn set_flag(&mut self, name: &str, value: bool) -> ParamResult {
        match self.machine.set_flag(name, value) {
            Err(e) if e.is_unhandled() => {}
            other => return other,
        }
        if let Some(ex) = &mut self.exciter {
            match ex.set_flag(name, value) {
                Err(e) if e.is_unhandled() => {}
                other => return other,
            }
        }
        if let Some(gov) = &mut self.governor {
            match gov.set_flag(name, value) {
                Err(e) if e.is_unhandled() => {}
                other => return other,
            }
        }
        Err(ParamError::unknown_flag(name))
    }

    fn param(&self, name: &str) -> Option<Real> {
        match name {
            "p" | "pset" => Some(self.pset),
            "vset" => Some(self.vset),
            "pmax" => Some(self.pmax),
            "pmin" => Some(self.pmin),
            "mbase" | "base" => Some(self.machine_base),
            "systembase" | "basepower" => Some(self.system_base),
            _ => {
                self.machine
                    .param(name)
                    .or_else(|| self.exciter.as_ref().and_then(|e| e.param(name)))
                    .or_else(|| self.governor.as_ref().and_then(|g| g.param(name)))
            }
        }
    }
}

impl DynamicModel for DynamicGenerator {
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

    fn output_count(&self) -> usize {
        2
    }

    fn initialize_structure(&mut self) -> DaeResult<()> {
        self.machine.initialize_structure()?;
        if let Some(e) = &mut self.exciter {
            e.initialize_structure()?;
        }
        if let Some(g) = &mut self.governor {
            g.initialize_structure()?;
        }
        let local = SolverMode::local();
        let mut total = StateSizes::default();
        total.add(&self.machine.offsets().total(local));
        if let Some(e) = &self.exciter {
            total.add(&e.offsets().total(local));
        }
        if let Some(g) = &self.governor {
            total.add(&g.offsets().total(local));
        }
        self.offsets.unload();
        self.offsets.set_sizes(local, StateSizes::default(), total);
        let mut cursor = OffsetBase::for_system(&total);
        self.offsets.assign(local, cursor);
        let mut members: Vec<&mut dyn DynamicModel> = vec![&mut self.machine];
        if let Some(e) = &mut self.exciter {
            members.push(e);
        }
        if let Some(g) = &mut self.governor {
            members.push(g);
        }
        for m in members {
            cursor = m.set_offsets(cursor, local);
        }
        Ok(())
    }

    fn initialize_states(
        &mut self,
        inputs: &[Real],
        desired: &[Real],
        field_set: &mut Vec<Real>,
    ) -> DaeResult<()> {
        if !self.offsets.sizes_loaded(SolverMode::local()) {
            self.initialize_structure()?;
        }
        if desired.is_empty() {
            return Err(DaeError::init(
                &self.name,
                "initialization requires a terminal power target",
            ));
        }
        let v = inputs.get(VOLTAGE_IN).copied().unwrap_or(1.0);
        let theta = inputs.get(ANGLE_IN).copied().unwrap_or(0.0);
        let p = desired[0];
        let q = desired.get(1).copied().unwrap_or(0.0);
        if p.abs() * self.system_base > 1.2 * self.machine_base {
            warn!(
                generator = %self.name,
                power = p,
                "terminal power request exceeds the machine rating"
            );
        }
        let scale = self.to_machine();
        let mut req = Vec::new();
        self.machine
            .initialize_states(&[v, theta, 0.0, 0.0], &[p * scale, q * scale], &mut req)?;
        let ef = req[FIELD_IN];
        let pm = req[MECH_IN];
        self.field_voltage = ef;
        self.pset = pm / scale;
        if let Some(e) = &mut self.exciter {
            let mut xreq = Vec::new();
            e.initialize_states(&[v, self.vset], &[ef], &mut xreq)?;
            self.vset = xreq[EXCITER_VSET_IN];
        }
        if let Some(g) = &mut self.governor {
            let mut greq = Vec::new();
            g.initialize_states(&[1.0, pm], &[pm], &mut greq)?;
            self.pset = greq[GOVERNOR_PSET_IN] / scale;
        }
        field_set.resize(self.output_count(), 0.0);
        field_set[0] = p;
        field_set[1] = q;
        Ok(())
    }

    fn load_sizes(&mut self, mode: SolverMode) {
        if self.offsets.sizes_loaded(mode) {
            return;
        }
        let mut total = StateSizes::default();
        self.machine.load_sizes(mode);
        total.add(&self.machine.offsets().total(mode));
        if let Some(e) = &mut self.exciter {
            e.load_sizes(mode);
            total.add(&e.offsets().total(mode));
        }
        if let Some(g) = &mut self.governor {
            g.load_sizes(mode);
            total.add(&g.offsets().total(mode));
        }
        self.offsets.set_sizes(mode, StateSizes::default(), total);
    }

    fn set_offsets(&mut self, base: OffsetBase, mode: SolverMode) -> OffsetBase {
        self.load_sizes(mode);
        self.offsets.assign(mode, base);
        let mut cursor = base;
        let mut members: Vec<&mut dyn DynamicModel> = vec![&mut self.machine];
        if let Some(e) = &mut self.exciter {
            members.push(e);
        }
        if let Some(g) = &mut self.governor {
            members.push(g);
        }
        for m in members {
            cursor = m.set_offsets(cursor, mode);
        }
        cursor
    }

    fn guess_state(
        &self,
        time: Real,
        state: &mut [Real],
        dstate_dt: &mut [Real],
        mode: SolverMode,
    ) {
        self.machine.guess_state(time, state, dstate_dt, mode);
        if let Some(e) = &self.exciter {
            e.guess_state(time, state, dstate_dt, mode);
        }
        if let Some(g) = &self.governor {
            g.guess_state(time, state, dstate_dt, mode);
        }
    }

    fn set_state(&mut self, time: Real, state: &[Real], dstate_dt: &[Real], mode: SolverMode) {
        self.machine.set_state(time, state, dstate_dt, mode);
        if let Some(e) = &mut self.exciter {
            e.set_state(time, state, dstate_dt, mode);
        }
        if let Some(g) = &mut self.governor {
            g.set_state(time, state, dstate_dt, mode);
        }
        self.prev_time = time;
    }

    fn residual(&self, inputs: &[Real], sd: &StateData<'_>, resid: &mut [Real], mode: SolverMode) {
        let (machine_in, exciter_in, governor_in) = self.sub_inputs(inputs, sd, mode);
        self.machine.residual(&machine_in, sd, resid, mode);
        if let Some(e) = &self.exciter {
            e.residual(&exciter_in, sd, resid, mode);
        }
        if let Some(g) = &self.governor {
            g.residual(&governor_in, sd, resid, mode);
        }
    }

    fn derivative(&self, inputs: &[Real], sd: &StateData<'_>, deriv: &mut [Real], mode: SolverMode) {
        let (machine_in, exciter_in, governor_in) = self.sub_inputs(inputs, sd, mode);
        self.machine.derivative(&machine_in, sd, deriv, mode);
        if let Some(e) = &self.exciter {
            e.derivative(&exciter_in, sd, deriv, mode);
        }
        if let Some(g) = &self.governor {
            g.derivative(&governor_in, sd, deriv, mode);
        }
    }

    fn algebraic_update(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        update: &mut [Real],
        mode: SolverMode,
        alpha: Real,
    ) {
        let (machine_in, exciter_in, governor_in) = self.sub_inputs(inputs, sd, mode);
        self.machine
            .algebraic_update(&machine_in, sd, update, mode, alpha);
        if let Some(e) = &self.exciter {
            e.algebraic_update(&exciter_in, sd, update, mode, alpha);
        }
        if let Some(g) = &self.governor {
            g.algebraic_update(&governor_in, sd, update, mode, alpha);
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
        let (machine_in, exciter_in, governor_in) = self.sub_inputs(inputs, sd, mode);
        let (machine_locs, exciter_locs, governor_locs) = self.sub_locs(input_locs, mode);
        self.machine
            .jacobian_elements(&machine_in, sd, &machine_locs, sink, mode);
        if let Some(e) = &self.exciter {
            e.jacobian_elements(&exciter_in, sd, &exciter_locs, sink, mode);
        }
        if let Some(g) = &self.governor {
            g.jacobian_elements(&governor_in, sd, &governor_locs, sink, mode);
        }
    }

    fn root_test(&self, inputs: &[Real], sd: &StateData<'_>, roots: &mut [Real], mode: SolverMode) {
        let (machine_in, exciter_in, governor_in) = self.sub_inputs(inputs, sd, mode);
        self.machine.root_test(&machine_in, sd, roots, mode);
        if let Some(e) = &self.exciter {
            e.root_test(&exciter_in, sd, roots, mode);
        }
        if let Some(g) = &self.governor {
            g.root_test(&governor_in, sd, roots, mode);
        }
    }

    fn root_trigger(&mut self, time: Real, inputs: &[Real], root_mask: &[bool], mode: SolverMode) {
        let sd = StateData::empty(time);
        let (machine_in, exciter_in, governor_in) = self.sub_inputs(inputs, &sd, mode);
        self.machine.root_trigger(time, &machine_in, root_mask, mode);
        if let Some(e) = &mut self.exciter {
            e.root_trigger(time, &exciter_in, root_mask, mode);
        }
        if let Some(g) = &mut self.governor {
            g.root_trigger(time, &governor_in, root_mask, mode);
        }
    }

    fn root_check(
        &mut self,
        inputs: &[Real],
        sd: &StateData<'_>,
        level: CheckLevel,
        mode: SolverMode,
    ) -> ChangeCode {
        let (machine_in, exciter_in, governor_in) = self.sub_inputs(inputs, sd, mode);
        let mut code = self.machine.root_check(&machine_in, sd, level, mode);
        if let Some(e) = &mut self.exciter {
            code = code.max(e.root_check(&exciter_in, sd, level, mode));
        }
        if let Some(g) = &mut self.governor {
            code = code.max(g.root_check(&governor_in, sd, level, mode));
        }
        code
    }

    fn timestep(&mut self, time: Real, inputs: &[Real], mode: SolverMode) -> Real {
        let v = inputs.get(VOLTAGE_IN).copied().unwrap_or(0.0);
        let theta = inputs.get(ANGLE_IN).copied().unwrap_or(0.0);
        let pref = self.clamped_pref();
        let sd = StateData::empty(time);
        let omega = self.machine.frequency(&sd, SolverMode::local());
        let pm = match &mut self.governor {
            Some(g) => g.timestep(time, &[omega, pref], mode),
            None => pref,
        };
        let ef = match &mut self.exciter {
            Some(e) => e.timestep(time, &[v, self.vset], mode),
            None => self.field_voltage,
        };
        let p = self.machine.timestep(time, &[v, theta, ef, pm], mode);
        self.prev_time = time;
        p / self.to_machine()
    }

    fn output(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, num: usize) -> Real {
        let (machine_in, _, _) = self.sub_inputs(inputs, sd, mode);
        self.machine.output(&machine_in, sd, mode, num) / self.to_machine()
    }

    fn output_location(&self, _mode: SolverMode, _num: usize) -> usize {
        NO_LOCATION
    }

    fn state_index(&self, field: &str, mode: SolverMode) -> usize {
        let idx = self.machine.state_index(field, mode);
        if idx != NO_LOCATION {
            return idx;
        }
        if let Some(e) = &self.exciter {
            let idx = e.state_index(field, mode);
            if idx != NO_LOCATION {
                return idx;
            }
        }
        if let Some(g) = &self.governor {
            let idx = g.state_index(field, mode);
            if idx != NO_LOCATION {
                return idx;
            }
        }
        NO_LOCATION
    }

    fn local_state_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut members: Vec<&dyn DynamicModel> = vec![&self.machine];
        if let Some(e) = &self.exciter {
            members.push(e);
        }
        if let Some(g) = &self.governor {
            members.push(g);
        }
        for m in members {
            for n in m.local_state_names() {
                names.push(format!("{}.{}", m.name(), n));
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exciter::ExciterKind;

    const LOCAL: SolverMode = SolverMode::local();

    fn full_generator() -> DynamicGenerator {
        DynamicGenerator::new("gen1")
            .with_machine(Machine::classical())
            .with_exciter(Exciter::basic())
            .with_governor(Governor::droop())
    }

    #[test]
    fn composed_init_wires_the_couplings() {
        let mut r#gen = full_generator();
        let mut out = Vec::new();
        r#gen.initialize_states(&[1.0, 0.0], &[0.5, 0.1], &mut out)
            .unwrap();
        assert_eq!(out, vec![0.5, 0.1]);
        // lossless machine, so the setpoint equals the terminal request
        assert!((r#gen.pset - 0.5).abs() < 1e-9);
        assert!((r#gen.vset - 1.0).abs() < 1e-12);

        let n = r#gen.offsets().total(LOCAL).total();
        let sd = StateData::empty(0.0);
        let mut resid = vec![0.0; n];
        r#gen.residual(&[1.0, 0.0], &sd, &mut resid, LOCAL);
        let worst = resid.iter().fold(0.0, |acc: Real, r| acc.max(r.abs()));
        assert!(worst < 1e-9, "composed steady state drifts: {worst}");

        assert!((r#gen.output(&[1.0, 0.0], &sd, LOCAL, 0) - 0.5).abs() < 1e-9);
        assert!((r#gen.output(&[1.0, 0.0], &sd, LOCAL, 1) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn base_conversion_scales_the_terminal_power() {
        let mut r#gen = DynamicGenerator::new("small").with_machine(Machine::classical());
        r#gen.set_param("mbase", 50.0).unwrap();
        let mut out = Vec::new();
        r#gen.initialize_states(&[1.0, 0.0], &[0.3, 0.05], &mut out)
            .unwrap();
        // the machine carries 0.6 pu on its own base
        assert!((r#gen.machine().param("h").unwrap() - 5.0).abs() < 1e-12);
        let sd = StateData::empty(0.0);
        assert!((r#gen.output(&[1.0, 0.0], &sd, LOCAL, 0) - 0.3).abs() < 1e-9);
        assert!((r#gen.output(&[1.0, 0.0], &sd, LOCAL, 1) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn parameters_cascade_to_the_owning_sub_model() {
        let mut r#gen = full_generator();
        r#gen.set_param("xd", 0.9).unwrap();
        assert_eq!(r#gen.machine().param("xd"), Some(0.9));
        r#gen.set_param("ka", 25.0).unwrap();
        assert_eq!(r#gen.exciter().unwrap().param("ka"), Some(25.0));
        assert!(r#gen.set_param("nosuch", 1.0).unwrap_err().is_unhandled());
        // own keys shadow the cascade
        r#gen.set_param("pset", 0.4).unwrap();
        assert_eq!(r#gen.param("pset"), Some(0.4));
    }

    #[test]
    fn sub_model_structure_changes_invalidate_the_layout() {
        let mut r#gen = full_generator();
        r#gen.initialize_structure().unwrap();
        assert!(r#gen.offsets().sizes_loaded(LOCAL));
        // a governor time constant rebuilds the droop chain
        r#gen.set_param("t3", 0.2).unwrap();
        assert!(!r#gen.offsets().sizes_loaded(LOCAL));
    }

    #[test]
    fn swapping_a_sub_model_reports_a_state_count_change() {
        let mut r#gen = full_generator();
        r#gen.initialize_structure().unwrap();
        let code = r#gen.set_exciter(Exciter::ieee_type1());
        assert_eq!(code, ChangeCode::StateCountChange);
        assert!(!r#gen.offsets().sizes_loaded(LOCAL));
        assert_eq!(r#gen.exciter().unwrap().kind(), ExciterKind::Ieee1);
    }

    #[test]
    fn state_lookup_spans_the_members() {
        let mut r#gen = full_generator();
        r#gen.initialize_structure().unwrap();
        let freq = r#gen.state_index("freq", LOCAL);
        let ef = r#gen.state_index("ef", LOCAL);
        assert_ne!(freq, NO_LOCATION);
        assert_ne!(ef, NO_LOCATION);
        assert_ne!(freq, ef);
        let names = r#gen.local_state_names();
        assert!(names.iter().any(|n| n.starts_with("classical.")));
        assert!(names.iter().any(|n| n.starts_with("basic.")));
    }

    #[test]
    fn init_requires_a_power_target() {
        let mut r#gen = full_generator();
        let mut out = Vec::new();
        let err = r#gen
            .initialize_states(&[1.0, 0.0], &[], &mut out)
            .unwrap_err();
        assert!(format!("{err}").contains("power target"));
    }
}
