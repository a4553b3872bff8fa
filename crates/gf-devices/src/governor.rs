//! Turbine-governor models producing mechanical power from the rotor
//! speed and a power setpoint.
//!
//! Three shapes share one struct. The droop governor is a chain of
//! transfer blocks: a lead-lag speed filter, an optional deadband with the
//! droop gain folded in, and a limited throttle lag; its states, roots,
//! and Jacobian spans are the members' concatenated the way a block
//! cascade lays them out. The IEEE simple and TGOV1 governors carry their
//! small state sets directly, with hard throttle limits pinning one state
//! while engaged.

use gf_core::{MIN_TIME_RESOLUTION, NO_LOCATION, ParamError, ParamResult, Parameterized,
    ROOT_TOLERANCE, Real};
use gf_blocks::{Block, BlockConfig, BlockKind, DeadbandConfig};
use gf_dae::{
    ChangeCode, CheckLevel, ColumnRemap, DaeError, DaeResult, DynamicModel, MatrixSink,
    OffsetBase, OffsetTable, REMAP_COLUMN, SolverMode, StateData, StateSizes,
};
use tracing::{debug, warn};

use crate::io::{GOVERNOR_OMEGA_IN, GOVERNOR_PSET_IN, LocalView};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GovernorKind {
    /// Block-chain droop: speed filter, deadband, limited throttle.
    Droop,
    /// IEEE simplified governor, two differential states.
    IeeeSimple,
    /// TGOV1 steam turbine-governor with turbine damping.
    Tgov1,
}

#[derive(Clone, Debug)]
struct DroopChain {
    filter: Block,
    deadband: Block,
    throttle: Block,
}

#[derive(Clone, Debug)]
pub struct Governor {
    name: String,
    kind: GovernorKind,
    /// Droop gain, the inverse of the regulation constant.
    k: Real,
    t1: Real,
    t2: Real,
    t3: Real,
    /// Turbine damping (TGOV1).
    dt: Real,
    pmax: Real,
    pmin: Real,
    pset: Real,
    /// Deadband edges on the filtered speed deviation; the band exists
    /// only while `db_low < db_high`.
    db_high: Real,
    db_low: Real,
    chain: Option<DroopChain>,
    limited: bool,
    limit_high: bool,
    offsets: OffsetTable,
    state: Vec<Real>,
    dstate: Vec<Real>,
    prev_time: Real,
}

impl Governor {
    fn base(kind: GovernorKind, name: &str, t1: Real, t2: Real, t3: Real) -> Self {
        Self {
            name: name.to_string(),
            kind,
            k: 16.667,
            t1,
            t2,
            t3,
            dt: 0.0,
            pmax: Real::INFINITY,
            pmin: Real::NEG_INFINITY,
            pset: 0.0,
            db_high: 0.0,
            db_low: 0.0,
            chain: None,
            limited: false,
            limit_high: false,
            offsets: OffsetTable::new(),
            state: Vec::new(),
            dstate: Vec::new(),
            prev_time: 0.0,
        }
    }

    pub fn droop() -> Self {
        Self::base(GovernorKind::Droop, "droop", 0.1, 0.0, 0.05)
    }

    pub fn ieee_simple() -> Self {
        Self::base(GovernorKind::IeeeSimple, "ieee_simple", 0.1, 0.15, 0.05)
    }

    pub fn tgov1() -> Self {
        let mut g = Self::base(GovernorKind::Tgov1, "tgov1", 0.5, 1.0, 1.0);
        g.dt = 0.0;
        g
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(&self) -> GovernorKind {
        self.kind
    }

    pub fn has_limits(&self) -> bool {
        self.pmax.is_finite() || self.pmin.is_finite()
    }

    pub fn has_deadband(&self) -> bool {
        self.db_low < self.db_high
    }

    fn view(&self) -> LocalView<'_> {
        LocalView {
            offsets: &self.offsets,
            state: &self.state,
            dstate: &self.dstate,
            local_alg: match self.kind {
                GovernorKind::Tgov1 => 1,
                _ => 0,
            },
        }
    }

    fn omega(&self, inputs: &[Real]) -> Real {
        inputs.get(GOVERNOR_OMEGA_IN).copied().unwrap_or(1.0)
    }

    fn setpoint(&self, inputs: &[Real]) -> Real {
        inputs.get(GOVERNOR_PSET_IN).copied().unwrap_or(self.pset)
    }

    fn limit_root_active(&self, mode: SolverMode) -> bool {
        self.has_limits() && mode.has_differential()
    }

    /// Local cache slot of the state the throttle limits pin.
    fn limit_cache_index(&self) -> usize {
        match self.kind {
            GovernorKind::IeeeSimple => 0,
            GovernorKind::Tgov1 => 2,
            GovernorKind::Droop => 0,
        }
    }

    fn limit_value(&self, sd: &StateData<'_>, mode: SolverMode) -> Real {
        match self.kind {
            GovernorKind::IeeeSimple => self.view().diff(sd, mode, 0),
            GovernorKind::Tgov1 => self.view().diff(sd, mode, 1),
            GovernorKind::Droop => 0.0,
        }
    }

    /// Free rate of the pinned state, sign decides limiter release.
    fn free_pull(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode) -> Real {
        let view = self.view();
        let omega = self.omega(inputs);
        let pset = self.setpoint(inputs);
        match self.kind {
            GovernorKind::IeeeSimple => {
                let pm = view.diff(sd, mode, 0);
                let x = view.diff(sd, mode, 1);
                (pset - pm - self.k * x - self.k * self.t2 * (omega - 1.0) / self.t1) / self.t3
            }
            GovernorKind::Tgov1 => {
                let v2 = view.diff(sd, mode, 1);
                (pset - self.k * (omega - 1.0) - v2) / self.t1
            }
            GovernorKind::Droop => 0.0,
        }
    }

    fn local_sizes(&self) -> StateSizes {
        let roots = usize::from(self.has_limits());
        match self.kind {
            GovernorKind::IeeeSimple => StateSizes {
                diff: 2,
                diff_roots: roots,
                jac: 8,
                ..StateSizes::default()
            },
            GovernorKind::Tgov1 => StateSizes {
                alg: 1,
                diff: 2,
                diff_roots: roots,
                jac: 12,
                ..StateSizes::default()
            },
            GovernorKind::Droop => StateSizes::default(),
        }
    }

    fn build_chain(&self) -> DaeResult<DroopChain> {
        let filter = Block::new(
            BlockConfig::new(BlockKind::lead_lag(self.t1, self.t2))
                .named("filter")
                .with_bias(-1.0),
        )
        .map_err(|e| DaeError::structure(e.to_string()))?;

        let band = if self.has_deadband() {
            let mut db = DeadbandConfig::symmetric(1.0);
            db.high = self.db_high;
            db.low = self.db_low;
            BlockKind::Deadband(db)
        } else {
            BlockKind::Gain
        };
        let deadband = Block::new(BlockConfig::new(band).named("droop").with_gain(-self.k))
            .map_err(|e| DaeError::structure(e.to_string()))?;

        let mut throttle = BlockConfig::new(BlockKind::delay(self.t3)).named("throttle");
        if self.has_limits() {
            throttle = throttle.with_limits(self.pmin, self.pmax);
        }
        let throttle =
            Block::new(throttle).map_err(|e| DaeError::structure(e.to_string()))?;

        Ok(DroopChain {
            filter,
            deadband,
            throttle,
        })
    }

    fn build_structure(&mut self) -> DaeResult<()> {
        match self.kind {
            GovernorKind::Droop => {
                let mut chain = self.build_chain()?;
                for b in [&mut chain.filter, &mut chain.deadband, &mut chain.throttle] {
                    b.initialize_structure()?;
                }
                let mut total = StateSizes::default();
                for b in [&chain.filter, &chain.deadband, &chain.throttle] {
                    total.add(&b.offsets().local_sizes(SolverMode::local()));
                }
                self.offsets.unload();
                self.offsets
                    .set_sizes(SolverMode::local(), StateSizes::default(), total);
                let mut cursor = OffsetBase::for_system(&total);
                self.offsets.assign(SolverMode::local(), cursor);
                for b in [&mut chain.filter, &mut chain.deadband, &mut chain.throttle] {
                    cursor = b.set_offsets(cursor, SolverMode::local());
                }
                self.chain = Some(chain);
                self.state.clear();
                self.dstate.clear();
            }
            GovernorKind::IeeeSimple | GovernorKind::Tgov1 => {
                if !(self.t1 > 0.0) || !(self.t3 > 0.0) {
                    return Err(DaeError::structure(
                        "governor time constants must be positive",
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
            }
        }
        Ok(())
    }

    /// Drop whatever structure a parameter change invalidated.
    fn structure_event(&mut self, had_limits: bool) {
        match self.kind {
            GovernorKind::Droop => {
                self.chain = None;
                self.offsets.unload();
            }
            _ => {
                if self.has_limits() != had_limits {
                    self.offsets.unload();
                }
            }
        }
    }

    fn refresh_rates(&mut self, time: Real, inputs: &[Real]) {
        let sd = StateData::empty(time);
        let mut deriv = vec![0.0; self.state.len()];
        self.derivative(inputs, &sd, &mut deriv, SolverMode::local());
        self.dstate.copy_from_slice(&deriv);
    }

    fn engage(&mut self, high: bool) {
        let idx = self.limit_cache_index();
        self.state[idx] = if high { self.pmax } else { self.pmin };
        self.dstate[idx] = 0.0;
        self.limited = true;
        self.limit_high = high;
        warn!(
            governor = %self.name,
            limit = if high { self.pmax } else { self.pmin },
            "throttle limit engaged"
        );
    }

    fn release(&mut self, time: Real, inputs: &[Real]) {
        debug!(governor = %self.name, "throttle limit released");
        self.limited = false;
        self.limit_high = false;
        self.refresh_rates(time, inputs);
    }

    fn clamp_after_step(&mut self, idx: usize) {
        if self.state[idx] >= self.pmax {
            self.state[idx] = self.pmax;
            self.dstate[idx] = 0.0;
            self.limited = true;
            self.limit_high = true;
        } else if self.state[idx] <= self.pmin {
            self.state[idx] = self.pmin;
            self.dstate[idx] = 0.0;
            self.limited = true;
            self.limit_high = false;
        } else {
            self.limited = false;
            self.limit_high = false;
        }
    }
}

impl Parameterized for Governor {
    fn set_param(&mut self, name: &str, value: Real) -> ParamResult {
        match name {
            "k" | "gain" => {
                self.k = value;
                if let Some(ch) = &mut self.chain {
                    ch.deadband.set_param("gain", -value)?;
                }
                Ok(())
            }
            "r" => {
                if value == 0.0 {
                    return Err(ParamError::invalid(name, "regulation must be nonzero"));
                }
                self.k = 1.0 / value;
                if let Some(ch) = &mut self.chain {
                    ch.deadband.set_param("gain", -self.k)?;
                }
                Ok(())
            }
            "t1" => {
                let floor = match self.kind {
                    GovernorKind::Droop => MIN_TIME_RESOLUTION,
                    _ => 0.0,
                };
                if value < floor || value == 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.t1 = value;
                self.structure_event(self.has_limits());
                Ok(())
            }
            "t2" => {
                if value < 0.0 {
                    return Err(ParamError::invalid(name, "must be nonnegative"));
                }
                self.t2 = value;
                self.structure_event(self.has_limits());
                Ok(())
            }
            "t3" => {
                let ok = match self.kind {
                    GovernorKind::Droop => value >= 0.0,
                    _ => value > 0.0,
                };
                if !ok {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.t3 = value;
                self.structure_event(self.has_limits());
                Ok(())
            }
            "dt" | "damping" if self.kind == GovernorKind::Tgov1 => {
                self.dt = value;
                Ok(())
            }
            "pmax" => {
                let had = self.has_limits();
                self.pmax = value;
                self.structure_event(had);
                Ok(())
            }
            "pmin" => {
                let had = self.has_limits();
                self.pmin = value;
                self.structure_event(had);
                Ok(())
            }
            "pset" | "p" => {
                self.pset = value;
                Ok(())
            }
            "deadband" | "db" if self.kind == GovernorKind::Droop => {
                if value < 0.0 {
                    return Err(ParamError::invalid(name, "band must be nonnegative"));
                }
                self.db_high = value;
                self.db_low = -value;
                self.structure_event(self.has_limits());
                Ok(())
            }
            _ => Err(ParamError::unknown(name)),
        }
    }

    fn param(&self, name: &str) -> Option<Real> {
        match name {
            "k" | "gain" => Some(self.k),
            "r" => (self.k != 0.0).then(|| 1.0 / self.k),
            "t1" => Some(self.t1),
            "t2" => Some(self.t2),
            "t3" => Some(self.t3),
            "dt" | "damping" => Some(self.dt),
            "pmax" => Some(self.pmax),
            "pmin" => Some(self.pmin),
            "pset" | "p" => Some(self.pset),
            "deadband" | "db" => Some((self.db_high - self.db_low) / 2.0),
            _ => None,
        }
    }
}

impl DynamicModel for Governor {
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
        let omega = self.omega(inputs);
        self.limited = false;
        self.limit_high = false;
        self.dstate.iter_mut().for_each(|r| *r = 0.0);

        if let Some(&p) = desired.first() {
            if p > self.pmax || p < self.pmin {
                warn!(
                    governor = %self.name,
                    power = p,
                    "requested mechanical power sits outside the throttle limits"
                );
            }
            match self.kind {
                GovernorKind::Droop => {
                    let Some(ch) = &mut self.chain else {
                        return Err(DaeError::init(&self.name, "droop chain is not built"));
                    };
                    let mut carry = Vec::new();
                    ch.filter.initialize_states(&[omega], &[], &mut carry)?;
                    let w = carry.first().copied().unwrap_or(0.0);
                    ch.deadband.initialize_states(&[w], &[], &mut carry)?;
                    let y = carry.first().copied().unwrap_or(0.0);
                    ch.throttle.initialize_states(&[], &[p], &mut carry)?;
                    let want = carry.first().copied().unwrap_or(p);
                    self.pset = want - y;
                }
                GovernorKind::IeeeSimple => {
                    let x = (1.0 - self.t2 / self.t1) * (omega - 1.0);
                    self.state[0] = p;
                    self.state[1] = x;
                    self.pset = p + self.k * (omega - 1.0);
                }
                GovernorKind::Tgov1 => {
                    let v1 = p + self.dt * (omega - 1.0);
                    self.state[0] = p;
                    self.state[1] = v1;
                    self.state[2] = v1;
                    self.pset = v1 + self.k * (omega - 1.0);
                }
            }
            field_set.resize(self.input_count(), 0.0);
            field_set[GOVERNOR_OMEGA_IN] = omega;
            field_set[GOVERNOR_PSET_IN] = self.pset;
        } else {
            let pset = self.setpoint(inputs);
            let pm = match self.kind {
                GovernorKind::Droop => {
                    let Some(ch) = &mut self.chain else {
                        return Err(DaeError::init(&self.name, "droop chain is not built"));
                    };
                    let mut carry = Vec::new();
                    ch.filter.initialize_states(&[omega], &[], &mut carry)?;
                    let w = carry.first().copied().unwrap_or(0.0);
                    ch.deadband.initialize_states(&[w], &[], &mut carry)?;
                    let y = carry.first().copied().unwrap_or(0.0);
                    ch.throttle
                        .initialize_states(&[y + pset], &[], &mut carry)?;
                    carry.first().copied().unwrap_or(pset)
                }
                GovernorKind::IeeeSimple => {
                    let x = (1.0 - self.t2 / self.t1) * (omega - 1.0);
                    let pm = pset - self.k * (omega - 1.0);
                    self.state[0] = pm;
                    self.state[1] = x;
                    pm
                }
                GovernorKind::Tgov1 => {
                    let v2 = pset - self.k * (omega - 1.0);
                    let pm = v2 - self.dt * (omega - 1.0);
                    self.state[0] = pm;
                    self.state[1] = v2;
                    self.state[2] = v2;
                    pm
                }
            };
            field_set.resize(self.output_count(), 0.0);
            field_set[0] = pm;
        }
        Ok(())
    }

    fn load_sizes(&mut self, mode: SolverMode) {
        if self.offsets.sizes_loaded(mode) {
            return;
        }
        match self.kind {
            GovernorKind::Droop => {
                let mut total = StateSizes::default();
                if let Some(ch) = &mut self.chain {
                    for b in [&mut ch.filter, &mut ch.deadband, &mut ch.throttle] {
                        b.load_sizes(mode);
                        total.add(&b.offsets().total(mode));
                    }
                }
                self.offsets.set_sizes(mode, StateSizes::default(), total);
            }
            _ => {
                let local = self.offsets.local_sizes(SolverMode::local()).masked(mode);
                self.offsets.set_sizes(mode, local, local);
            }
        }
    }

    fn set_offsets(&mut self, base: OffsetBase, mode: SolverMode) -> OffsetBase {
        self.load_sizes(mode);
        self.offsets.assign(mode, base);
        match self.kind {
            GovernorKind::Droop => {
                let mut cursor = base;
                if let Some(ch) = &mut self.chain {
                    for b in [&mut ch.filter, &mut ch.deadband, &mut ch.throttle] {
                        cursor = b.set_offsets(cursor, mode);
                    }
                }
                cursor
            }
            _ => {
                let mut next = base;
                next.advance(&self.offsets.total(mode));
                next
            }
        }
    }

    fn guess_state(
        &self,
        time: Real,
        state: &mut [Real],
        dstate_dt: &mut [Real],
        mode: SolverMode,
    ) {
        match self.kind {
            GovernorKind::Droop => {
                if let Some(ch) = &self.chain {
                    for b in [&ch.filter, &ch.deadband, &ch.throttle] {
                        b.guess_state(time, state, dstate_dt, mode);
                    }
                }
            }
            _ => {
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
                        let la = self.view().local_alg;
                        state[d0..d0 + sizes.diff]
                            .copy_from_slice(&self.state[la..la + sizes.diff]);
                        dstate_dt[d0..d0 + sizes.diff]
                            .copy_from_slice(&self.dstate[la..la + sizes.diff]);
                    }
                }
            }
        }
    }

    fn set_state(&mut self, time: Real, state: &[Real], dstate_dt: &[Real], mode: SolverMode) {
        match self.kind {
            GovernorKind::Droop => {
                if let Some(ch) = &mut self.chain {
                    for b in [&mut ch.filter, &mut ch.deadband, &mut ch.throttle] {
                        b.set_state(time, state, dstate_dt, mode);
                    }
                }
            }
            _ => {
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
                        let la = self.view().local_alg;
                        self.state[la..la + sizes.diff]
                            .copy_from_slice(&state[d0..d0 + sizes.diff]);
                        self.dstate[la..la + sizes.diff]
                            .copy_from_slice(&dstate_dt[d0..d0 + sizes.diff]);
                    }
                }
            }
        }
        self.prev_time = time;
    }

    fn residual(&self, inputs: &[Real], sd: &StateData<'_>, resid: &mut [Real], mode: SolverMode) {
        let view = self.view();
        let omega = self.omega(inputs);
        let pset = self.setpoint(inputs);
        match self.kind {
            GovernorKind::Droop => {
                if let Some(ch) = &self.chain {
                    let w = ch.filter.output(&[omega], sd, mode, 0);
                    let y = ch.deadband.output(&[w], sd, mode, 0);
                    ch.filter.residual(&[omega], sd, resid, mode);
                    ch.deadband.residual(&[w], sd, resid, mode);
                    ch.throttle.residual(&[y + pset], sd, resid, mode);
                }
            }
            GovernorKind::IeeeSimple => {
                if !mode.has_differential() {
                    return;
                }
                let d0 = self.offsets.diff_offset(mode);
                if d0 == NO_LOCATION {
                    return;
                }
                let x = view.diff(sd, mode, 1);
                let dpm = if self.limited {
                    0.0
                } else {
                    self.free_pull(inputs, sd, mode)
                };
                let dx = (-x + (1.0 - self.t2 / self.t1) * (omega - 1.0)) / self.t1;
                resid[d0] = dpm - view.rate(sd, mode, 0);
                resid[d0 + 1] = dx - view.rate(sd, mode, 1);
            }
            GovernorKind::Tgov1 => {
                let v1 = view.diff(sd, mode, 0);
                let v2 = view.diff(sd, mode, 1);
                if mode.has_algebraic() {
                    let a0 = self.offsets.alg_offset(mode);
                    if a0 != NO_LOCATION {
                        let pm = view.alg(sd, mode, 0);
                        resid[a0] = v1 - self.dt * (omega - 1.0) - pm;
                    }
                }
                if mode.has_differential() {
                    let d0 = self.offsets.diff_offset(mode);
                    if d0 != NO_LOCATION {
                        let dv2 = if self.limited {
                            0.0
                        } else {
                            (pset - self.k * (omega - 1.0) - v2) / self.t1
                        };
                        let dv1 = (v2 - v1 - self.t2 * dv2) / self.t3;
                        resid[d0] = dv1 - view.rate(sd, mode, 0);
                        resid[d0 + 1] = dv2 - view.rate(sd, mode, 1);
                    }
                }
            }
        }
    }

    fn derivative(&self, inputs: &[Real], sd: &StateData<'_>, deriv: &mut [Real], mode: SolverMode) {
        let view = self.view();
        let omega = self.omega(inputs);
        let pset = self.setpoint(inputs);
        match self.kind {
            GovernorKind::Droop => {
                if let Some(ch) = &self.chain {
                    let w = ch.filter.output(&[omega], sd, mode, 0);
                    let y = ch.deadband.output(&[w], sd, mode, 0);
                    ch.filter.derivative(&[omega], sd, deriv, mode);
                    ch.deadband.derivative(&[w], sd, deriv, mode);
                    ch.throttle.derivative(&[y + pset], sd, deriv, mode);
                }
            }
            GovernorKind::IeeeSimple => {
                if !mode.has_differential() {
                    return;
                }
                let d0 = self.offsets.diff_offset(mode);
                if d0 == NO_LOCATION {
                    return;
                }
                let x = view.diff(sd, mode, 1);
                deriv[d0] = if self.limited {
                    0.0
                } else {
                    self.free_pull(inputs, sd, mode)
                };
                deriv[d0 + 1] = (-x + (1.0 - self.t2 / self.t1) * (omega - 1.0)) / self.t1;
            }
            GovernorKind::Tgov1 => {
                if !mode.has_differential() {
                    return;
                }
                let d0 = self.offsets.diff_offset(mode);
                if d0 == NO_LOCATION {
                    return;
                }
                let v1 = view.diff(sd, mode, 0);
                let v2 = view.diff(sd, mode, 1);
                let dv2 = if self.limited {
                    0.0
                } else {
                    (pset - self.k * (omega - 1.0) - v2) / self.t1
                };
                deriv[d0] = (v2 - v1 - self.t2 * dv2) / self.t3;
                deriv[d0 + 1] = dv2;
            }
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
        let omega = self.omega(inputs);
        match self.kind {
            GovernorKind::Droop => {
                if let Some(ch) = &self.chain {
                    let pset = self.setpoint(inputs);
                    let w = ch.filter.output(&[omega], sd, mode, 0);
                    let y = ch.deadband.output(&[w], sd, mode, 0);
                    ch.filter.algebraic_update(&[omega], sd, update, mode, alpha);
                    ch.deadband.algebraic_update(&[w], sd, update, mode, alpha);
                    ch.throttle
                        .algebraic_update(&[y + pset], sd, update, mode, alpha);
                }
            }
            GovernorKind::IeeeSimple => {}
            GovernorKind::Tgov1 => {
                if !mode.has_algebraic() {
                    return;
                }
                let a0 = self.offsets.alg_offset(mode);
                if a0 == NO_LOCATION {
                    return;
                }
                let v1 = self.view().diff(sd, mode, 0);
                update[a0] = v1 - self.dt * (omega - 1.0);
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
        let omega_col = input_locs
            .get(GOVERNOR_OMEGA_IN)
            .copied()
            .unwrap_or(NO_LOCATION);
        let pset_col = input_locs
            .get(GOVERNOR_PSET_IN)
            .copied()
            .unwrap_or(NO_LOCATION);
        match self.kind {
            GovernorKind::Droop => {
                let Some(ch) = &self.chain else { return };
                let omega = self.omega(inputs);
                let pset = self.setpoint(inputs);
                let w = ch.filter.output(&[omega], sd, mode, 0);
                let y = ch.deadband.output(&[w], sd, mode, 0);
                ch.filter
                    .jacobian_elements(&[omega], sd, &[omega_col], sink, mode);
                let filter_col = ch.filter.output_location(mode, 0);
                ch.deadband
                    .jacobian_elements(&[w], sd, &[filter_col], sink, mode);
                // the throttle sees the deadband output plus the setpoint,
                // so its one input column fans out to both
                let deadband_col = ch.deadband.output_location(mode, 0);
                let targets = if deadband_col != NO_LOCATION {
                    [(deadband_col, 1.0), (pset_col, 1.0)]
                } else {
                    [(filter_col, ch.deadband.gain()), (pset_col, 1.0)]
                };
                let mut remap = ColumnRemap::new(&mut *sink, &targets);
                ch.throttle
                    .jacobian_elements(&[y + pset], sd, &[REMAP_COLUMN], &mut remap, mode);
            }
            GovernorKind::IeeeSimple => {
                if !mode.has_differential() {
                    return;
                }
                let d0 = self.offsets.diff_offset(mode);
                if d0 == NO_LOCATION {
                    return;
                }
                if self.limited {
                    sink.assign(d0, d0, -sd.cj);
                } else {
                    sink.assign(d0, d0, -1.0 / self.t3 - sd.cj);
                    sink.assign(d0, d0 + 1, -self.k / self.t3);
                    sink.assign_check_col(d0, pset_col, 1.0 / self.t3);
                    sink.assign_check_col(
                        d0,
                        omega_col,
                        -self.k * self.t2 / (self.t1 * self.t3),
                    );
                }
                sink.assign(d0 + 1, d0 + 1, -1.0 / self.t1 - sd.cj);
                sink.assign_check_col(
                    d0 + 1,
                    omega_col,
                    (1.0 - self.t2 / self.t1) / self.t1,
                );
            }
            GovernorKind::Tgov1 => {
                let a0 = self.offsets.alg_offset(mode);
                let d0 = self.offsets.diff_offset(mode);
                if mode.has_algebraic() && a0 != NO_LOCATION {
                    sink.assign(a0, a0, -1.0);
                    if d0 != NO_LOCATION {
                        sink.assign(a0, d0, 1.0);
                    }
                    sink.assign_check_col(a0, omega_col, -self.dt);
                }
                if mode.has_differential() && d0 != NO_LOCATION {
                    if self.limited {
                        sink.assign(d0 + 1, d0 + 1, -sd.cj);
                        sink.assign(d0, d0, -1.0 / self.t3 - sd.cj);
                        sink.assign(d0, d0 + 1, 1.0 / self.t3);
                    } else {
                        sink.assign(d0 + 1, d0 + 1, -1.0 / self.t1 - sd.cj);
                        sink.assign_check_col(d0 + 1, pset_col, 1.0 / self.t1);
                        sink.assign_check_col(d0 + 1, omega_col, -self.k / self.t1);
                        sink.assign(d0, d0, -1.0 / self.t3 - sd.cj);
                        sink.assign(d0, d0 + 1, (1.0 + self.t2 / self.t1) / self.t3);
                        sink.assign_check_col(
                            d0,
                            pset_col,
                            -self.t2 / (self.t1 * self.t3),
                        );
                        sink.assign_check_col(
                            d0,
                            omega_col,
                            self.k * self.t2 / (self.t1 * self.t3),
                        );
                    }
                }
            }
        }
    }

    fn root_test(&self, inputs: &[Real], sd: &StateData<'_>, roots: &mut [Real], mode: SolverMode) {
        match self.kind {
            GovernorKind::Droop => {
                if let Some(ch) = &self.chain {
                    let omega = self.omega(inputs);
                    let pset = self.setpoint(inputs);
                    let w = ch.filter.output(&[omega], sd, mode, 0);
                    let y = ch.deadband.output(&[w], sd, mode, 0);
                    ch.filter.root_test(&[omega], sd, roots, mode);
                    ch.deadband.root_test(&[w], sd, roots, mode);
                    ch.throttle.root_test(&[y + pset], sd, roots, mode);
                }
            }
            _ => {
                if !self.limit_root_active(mode) {
                    return;
                }
                let r0 = self.offsets.root_offset(mode);
                if r0 == NO_LOCATION {
                    return;
                }
                roots[r0] = if self.limited {
                    self.free_pull(inputs, sd, mode)
                } else {
                    let x = self.limit_value(sd, mode);
                    (self.pmax - x).min(x - self.pmin)
                };
            }
        }
    }

    fn root_trigger(&mut self, time: Real, inputs: &[Real], root_mask: &[bool], mode: SolverMode) {
        match self.kind {
            GovernorKind::Droop => {
                let sd = StateData::empty(time);
                let omega = self.omega(inputs);
                let pset = self.setpoint(inputs);
                if let Some(ch) = &mut self.chain {
                    ch.filter.root_trigger(time, &[omega], root_mask, mode);
                    let w = ch.filter.output(&[omega], &sd, mode, 0);
                    ch.deadband.root_trigger(time, &[w], root_mask, mode);
                    let y = ch.deadband.output(&[w], &sd, mode, 0);
                    ch.throttle
                        .root_trigger(time, &[y + pset], root_mask, mode);
                }
            }
            _ => {
                if !self.limit_root_active(mode) {
                    return;
                }
                let r0 = self.offsets.root_offset(mode);
                if r0 == NO_LOCATION || !root_mask.get(r0).copied().unwrap_or(false) {
                    return;
                }
                if self.limited {
                    self.release(time, inputs);
                } else {
                    let high = self.state[self.limit_cache_index()] >= self.pmax;
                    self.engage(high);
                }
            }
        }
    }

    fn root_check(
        &mut self,
        inputs: &[Real],
        sd: &StateData<'_>,
        level: CheckLevel,
        mode: SolverMode,
    ) -> ChangeCode {
        match self.kind {
            GovernorKind::Droop => {
                let mut code = ChangeCode::NoChange;
                let omega = self.omega(inputs);
                let pset = self.setpoint(inputs);
                if let Some(ch) = &mut self.chain {
                    code = code.max(ch.filter.root_check(&[omega], sd, level, mode));
                    let w = ch.filter.output(&[omega], sd, mode, 0);
                    code = code.max(ch.deadband.root_check(&[w], sd, level, mode));
                    let y = ch.deadband.output(&[w], sd, mode, 0);
                    code = code.max(ch.throttle.root_check(&[y + pset], sd, level, mode));
                }
                code
            }
            _ => {
                if !self.limit_root_active(mode) {
                    return ChangeCode::NoChange;
                }
                if self.limited {
                    let pull = self.free_pull(inputs, sd, mode);
                    let frees = if self.limit_high { pull < 0.0 } else { pull > 0.0 };
                    if frees {
                        self.release(sd.time, inputs);
                        return ChangeCode::JacobianChange;
                    }
                } else {
                    let x = self.limit_value(sd, mode);
                    if x > self.pmax + ROOT_TOLERANCE {
                        self.engage(true);
                        return ChangeCode::JacobianChange;
                    }
                    if x < self.pmin - ROOT_TOLERANCE {
                        self.engage(false);
                        return ChangeCode::JacobianChange;
                    }
                }
                ChangeCode::NoChange
            }
        }
    }

    fn timestep(&mut self, time: Real, inputs: &[Real], mode: SolverMode) -> Real {
        let omega = self.omega(inputs);
        let pset = self.setpoint(inputs);
        let dt = time - self.prev_time;
        let pm = match self.kind {
            GovernorKind::Droop => {
                if let Some(ch) = &mut self.chain {
                    let w = ch.filter.timestep(time, &[omega], mode);
                    let y = ch.deadband.timestep(time, &[w], mode);
                    ch.throttle.timestep(time, &[y + pset], mode)
                } else {
                    pset
                }
            }
            GovernorKind::IeeeSimple => {
                if dt > 0.0 {
                    let sd = StateData::empty(time);
                    let dpm = self.free_pull(inputs, &sd, SolverMode::local());
                    let x = self.state[1];
                    let dx = (-x + (1.0 - self.t2 / self.t1) * (omega - 1.0)) / self.t1;
                    self.state[0] += dt * dpm;
                    self.state[1] += dt * dx;
                    self.dstate[0] = dpm;
                    self.dstate[1] = dx;
                    self.clamp_after_step(0);
                }
                self.state[0]
            }
            GovernorKind::Tgov1 => {
                if dt > 0.0 {
                    let sd = StateData::empty(time);
                    let mut dv2 = self.free_pull(inputs, &sd, SolverMode::local());
                    // while pinned, an outward pull keeps the valve still
                    if self.limited
                        && ((self.limit_high && dv2 > 0.0) || (!self.limit_high && dv2 < 0.0))
                    {
                        dv2 = 0.0;
                    }
                    let v1 = self.state[1];
                    let v2 = self.state[2];
                    let dv1 = (v2 - v1 - self.t2 * dv2) / self.t3;
                    self.state[1] += dt * dv1;
                    self.state[2] += dt * dv2;
                    self.dstate[1] = dv1;
                    self.dstate[2] = dv2;
                    self.clamp_after_step(2);
                }
                self.state[0] = self.state[1] - self.dt * (omega - 1.0);
                self.state[0]
            }
        };
        self.prev_time = time;
        pm
    }

    fn output(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, _num: usize) -> Real {
        match self.kind {
            GovernorKind::Droop => {
                if let Some(ch) = &self.chain {
                    let omega = self.omega(inputs);
                    let pset = self.setpoint(inputs);
                    let w = ch.filter.output(&[omega], sd, mode, 0);
                    let y = ch.deadband.output(&[w], sd, mode, 0);
                    ch.throttle.output(&[y + pset], sd, mode, 0)
                } else {
                    self.pset
                }
            }
            GovernorKind::IeeeSimple => self.view().diff(sd, mode, 0),
            GovernorKind::Tgov1 => self.view().alg(sd, mode, 0),
        }
    }

    fn output_location(&self, mode: SolverMode, num: usize) -> usize {
        match self.kind {
            GovernorKind::Droop => self
                .chain
                .as_ref()
                .map_or(NO_LOCATION, |ch| ch.throttle.output_location(mode, num)),
            GovernorKind::IeeeSimple => self.offsets.diff_offset(mode),
            GovernorKind::Tgov1 => self.offsets.alg_offset(mode),
        }
    }

    fn state_index(&self, field: &str, mode: SolverMode) -> usize {
        match self.kind {
            GovernorKind::Droop => {
                let Some(ch) = &self.chain else {
                    return NO_LOCATION;
                };
                match field {
                    "pm" => ch.throttle.output_location(mode, 0),
                    "w" => ch.filter.output_location(mode, 0),
                    "dbo" => ch.deadband.output_location(mode, 0),
                    _ => {
                        for b in [&ch.filter, &ch.deadband, &ch.throttle] {
                            let idx = b.state_index(field, mode);
                            if idx != NO_LOCATION {
                                return idx;
                            }
                        }
                        NO_LOCATION
                    }
                }
            }
            GovernorKind::IeeeSimple => {
                let d0 = self.offsets.diff_offset(mode);
                if d0 == NO_LOCATION {
                    return NO_LOCATION;
                }
                match field {
                    "pm" => d0,
                    "x" => d0 + 1,
                    _ => NO_LOCATION,
                }
            }
            GovernorKind::Tgov1 => match field {
                "pm" => self.offsets.alg_offset(mode),
                "v1" => self.offsets.diff_offset(mode),
                "v2" => {
                    let d0 = self.offsets.diff_offset(mode);
                    if d0 == NO_LOCATION { NO_LOCATION } else { d0 + 1 }
                }
                _ => NO_LOCATION,
            },
        }
    }

    fn local_state_names(&self) -> Vec<String> {
        match self.kind {
            GovernorKind::Droop => {
                let mut names = Vec::new();
                if let Some(ch) = &self.chain {
                    for b in [&ch.filter, &ch.deadband, &ch.throttle] {
                        for n in b.local_state_names() {
                            names.push(format!("{}.{}", b.name(), n));
                        }
                    }
                }
                names
            }
            GovernorKind::IeeeSimple => vec!["pm".to_string(), "x".to_string()],
            GovernorKind::Tgov1 => {
                vec!["pm".to_string(), "v1".to_string(), "v2".to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: SolverMode = SolverMode::local();

    fn residual_norm(g: &Governor, inputs: &[Real]) -> Real {
        let n = g.offsets().total(LOCAL).total();
        let sd = StateData::empty(0.0);
        let mut resid = vec![0.0; n];
        g.residual(inputs, &sd, &mut resid, LOCAL);
        resid.iter().fold(0.0, |acc: Real, r| acc.max(r.abs()))
    }

    #[test]
    fn droop_init_holds_the_setpoint_at_synchronous_speed() {
        let mut g = Governor::droop();
        let mut req = Vec::new();
        g.initialize_states(&[1.0, 0.0], &[0.7], &mut req).unwrap();
        assert!((req[GOVERNOR_PSET_IN] - 0.7).abs() < 1e-9);
        assert!(residual_norm(&g, &[1.0, req[GOVERNOR_PSET_IN]]) < 1e-9);
        let sd = StateData::empty(0.0);
        let pm = g.output(&[1.0, 0.7], &sd, LOCAL, 0);
        assert!((pm - 0.7).abs() < 1e-9);
    }

    #[test]
    fn droop_responds_to_a_frequency_drop() {
        let mut g = Governor::droop();
        let mut req = Vec::new();
        g.initialize_states(&[1.0, 0.0], &[0.5], &mut req).unwrap();
        let mut pm = 0.5;
        for n in 1..=2000 {
            pm = g.timestep(n as Real * 0.001, &[0.99, 0.5], LOCAL);
        }
        // 1% underspeed picks up k * 0.01 of output
        assert!((pm - (0.5 + 16.667 * 0.01)).abs() < 1e-3);
    }

    #[test]
    fn droop_deadband_swallows_small_deviations() {
        let mut g = Governor::droop();
        g.set_param("deadband", 0.002).unwrap();
        let mut req = Vec::new();
        g.initialize_states(&[1.0, 0.0], &[0.5], &mut req).unwrap();
        assert!(g.has_deadband());

        let mut pm = 0.5;
        for n in 1..=2000 {
            pm = g.timestep(n as Real * 0.001, &[1.001, 0.5], LOCAL);
        }
        // deviation settles inside the band, output stays put
        assert!((pm - 0.5).abs() < 1e-6);

        for n in 2001..=4000 {
            pm = g.timestep(n as Real * 0.001, &[1.01, 0.5], LOCAL);
        }
        // beyond the band the full deviation passes through
        assert!((pm - (0.5 - 16.667 * 0.01)).abs() < 1e-3);
    }

    #[test]
    fn ieee_simple_init_balances_and_respects_limits() {
        let mut g = Governor::ieee_simple();
        g.set_param("pmax", 0.9).unwrap();
        let mut req = Vec::new();
        g.initialize_states(&[1.0, 0.0], &[0.6], &mut req).unwrap();
        assert!((req[GOVERNOR_PSET_IN] - 0.6).abs() < 1e-12);
        assert!(residual_norm(&g, &[1.0, 0.6]) < 1e-9);
        assert_eq!(g.offsets().local_sizes(LOCAL).roots(), 1);

        // a setpoint above the ceiling drives the throttle into the limit
        let sd = StateData::empty(0.0);
        g.state[0] = 0.95;
        let code = g.root_check(&[1.0, 1.2], &sd, CheckLevel::FullCheck, LOCAL);
        assert_eq!(code, ChangeCode::JacobianChange);
        assert!(g.limited);
        assert_eq!(g.state[0], 0.9);
        assert_eq!(
            g.root_check(&[1.0, 1.2], &sd, CheckLevel::FullCheck, LOCAL),
            ChangeCode::NoChange
        );

        // dropping the setpoint below the ceiling pulls the throttle free
        let code = g.root_check(&[1.0, 0.2], &sd, CheckLevel::FullCheck, LOCAL);
        assert_eq!(code, ChangeCode::JacobianChange);
        assert!(!g.limited);
    }

    #[test]
    fn tgov1_init_is_steady_and_the_power_row_tracks_damping() {
        let mut g = Governor::tgov1();
        g.set_param("damping", 0.5).unwrap();
        let mut req = Vec::new();
        g.initialize_states(&[1.0, 0.0], &[0.6], &mut req).unwrap();
        assert!(residual_norm(&g, &[1.0, 0.6]) < 1e-9);

        // at 1% underspeed the damping term adds to the output row
        let sd = StateData::empty(0.0);
        let n = g.offsets().total(LOCAL).total();
        let mut update = vec![0.0; n];
        g.algebraic_update(&[0.99, 0.6], &sd, &mut update, LOCAL, 1.0);
        assert!((update[0] - (0.6 + 0.5 * 0.01)).abs() < 1e-12);
    }

    #[test]
    fn structural_parameters_drop_the_droop_chain() {
        let mut g = Governor::droop();
        g.initialize_structure().unwrap();
        assert!(g.chain.is_some());
        g.set_param("t3", 0.1).unwrap();
        assert!(g.chain.is_none());
        assert!(!g.offsets().sizes_loaded(LOCAL));

        g.initialize_structure().unwrap();
        g.set_param("pmax", 1.1).unwrap();
        assert!(g.chain.is_none());
    }

    #[test]
    fn regulation_is_the_inverse_gain() {
        let mut g = Governor::tgov1();
        g.set_param("r", 0.04).unwrap();
        assert!((g.param("k").unwrap() - 25.0).abs() < 1e-12);
        assert!(g.set_param("r", 0.0).is_err());
        assert!(g.set_param("deadband", 0.01).unwrap_err().is_unhandled());
        assert!(g.set_param("dt", 1.0).is_ok());
        assert!(
            Governor::droop()
                .set_param("dt", 1.0)
                .unwrap_err()
                .is_unhandled()
        );
    }

    #[test]
    fn droop_state_names_carry_member_prefixes() {
        let mut g = Governor::droop();
        g.initialize_structure().unwrap();
        let names = g.local_state_names();
        assert!(names.iter().any(|n| n.starts_with("filter.")));
        assert!(names.iter().any(|n| n.starts_with("throttle.")));
    }
}
