//! A single transfer-function element viewed as a DAE sub-model.
//!
//! Every block maps one input `u` to one output through gain `K`, bias,
//! and the dynamics picked by its [`BlockKind`], with optional output and
//! ramp limiters layered on top. The states a block owns sit in its
//! partition as `[limited output?, ramp-limited output?, raw states...]`,
//! so the output is always the first state of the output partition and
//! local caches hold `[algebraic..., differential...]` in that order.

use gf_core::{
    MIN_TIME_RESOLUTION, NO_LOCATION, ParamError, ParamResult, Parameterized, Real,
};
use gf_dae::{
    ChangeCode, CheckLevel, DaeError, DaeResult, DynamicModel, MatrixSink, OffsetBase, OffsetTable,
    SolverMode, StateData, StateSizes,
};
use tracing::warn;

use crate::deadband::Deadband;
use crate::error::{BlockError, BlockResult};
use crate::kind::{BlockConfig, BlockKind, OutputLimits, RampLimits};
use crate::limits::{RampLimiter, ValueLimiter, default_reset_level};

#[derive(Clone, Debug)]
pub struct Block {
    pub(crate) name: String,
    pub(crate) kind: BlockKind,
    pub(crate) k: Real,
    pub(crate) bias: Real,
    pub(crate) limits: Option<OutputLimits>,
    pub(crate) ramp_limits: Option<RampLimits>,
    pub(crate) differential_input: bool,
    force_simplified: bool,
    /// Resolved at `initialize_structure`; a delay whose constant is below
    /// the time resolution degenerates to an algebraic gain.
    pub(crate) simplified: bool,
    pub(crate) value_limiter: Option<ValueLimiter>,
    pub(crate) ramp_limiter: Option<RampLimiter>,
    pub(crate) deadband: Option<Deadband>,
    pub(crate) limiter_alg: usize,
    pub(crate) limiter_diff: usize,
    pub(crate) initialized: bool,
    pub(crate) offsets: OffsetTable,
    /// Local cache, `[algebraic..., differential...]`.
    pub(crate) state: Vec<Real>,
    pub(crate) dstate: Vec<Real>,
    pub(crate) prev_time: Real,
    /// Last biased input `u + bias` seen by init or timestep.
    pub(crate) prev_input: Real,
}

impl Block {
    pub fn new(config: BlockConfig) -> BlockResult<Self> {
        config.kind.validate()?;
        if !config.gain.is_finite() {
            return Err(BlockError::config("gain must be finite"));
        }
        if !config.bias.is_finite() {
            return Err(BlockError::config("bias must be finite"));
        }
        if let Some(lim) = &config.limits {
            if !(lim.max > lim.min) {
                return Err(BlockError::config("output limits need max > min"));
            }
        }
        if let Some(lim) = &config.ramp_limits {
            if !(lim.max > lim.min) {
                return Err(BlockError::config("ramp limits need max > min"));
            }
        }
        if config.differential_input && !matches!(config.kind, BlockKind::Deadband(_)) {
            return Err(BlockError::config(
                "only a deadband block accepts a differential input",
            ));
        }
        Ok(Self {
            name: config.name,
            kind: config.kind,
            k: config.gain,
            bias: config.bias,
            limits: config.limits,
            ramp_limits: config.ramp_limits,
            differential_input: config.differential_input,
            force_simplified: false,
            simplified: false,
            value_limiter: None,
            ramp_limiter: None,
            deadband: None,
            limiter_alg: 0,
            limiter_diff: 0,
            initialized: false,
            offsets: OffsetTable::new(),
            state: Vec::new(),
            dstate: Vec::new(),
            prev_time: 0.0,
            prev_input: 0.0,
        })
    }

    pub fn from_kind(kind: BlockKind) -> BlockResult<Self> {
        Self::new(BlockConfig::new(kind))
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn gain(&self) -> Real {
        self.k
    }

    pub fn is_simplified(&self) -> bool {
        self.simplified
    }

    /// True when the output lives in the differential partition.
    pub(crate) fn diff_output(&self) -> bool {
        if matches!(self.kind, BlockKind::Deadband(_)) {
            self.differential_input
        } else {
            self.kind.differential_output(self.simplified)
        }
    }

    /// Raw (pre-limiter) state counts, `(algebraic, differential)`.
    pub(crate) fn raw_sizes(&self) -> (usize, usize) {
        match &self.kind {
            BlockKind::Gain => (0, 0),
            BlockKind::Delay { .. } if self.simplified => (1, 0),
            BlockKind::Delay { .. } | BlockKind::Integral { .. } => (0, 1),
            BlockKind::Derivative { .. } | BlockKind::LeadLag { .. } => (1, 1),
            BlockKind::FilteredDerivative { .. } => (0, 2),
            BlockKind::Pid { d, .. } => (1, if *d != 0.0 { 2 } else { 1 }),
            BlockKind::Deadband(_) if self.differential_input => (0, 1),
            BlockKind::Deadband(_) => (1, 0),
        }
    }

    pub(crate) fn local_alg(&self) -> usize {
        self.limiter_alg + self.raw_sizes().0
    }

    /// Local index of raw algebraic state `i`.
    pub(crate) fn raw_alg_index(&self, i: usize) -> usize {
        self.limiter_alg + i
    }

    /// Local index of raw differential state `i`.
    pub(crate) fn raw_diff_index(&self, i: usize) -> usize {
        self.local_alg() + self.limiter_diff + i
    }

    pub(crate) fn biased_input(&self, inputs: &[Real]) -> Real {
        inputs.first().map_or(self.prev_input, |u| u + self.bias)
    }

    pub(crate) fn rate_input(&self, inputs: &[Real]) -> Real {
        inputs.get(1).copied().unwrap_or(0.0)
    }

    fn jac_estimate(&self) -> usize {
        let base = match &self.kind {
            BlockKind::Gain => 0,
            BlockKind::Delay { .. } | BlockKind::Integral { .. } | BlockKind::Deadband(_) => 2,
            BlockKind::Derivative { .. } | BlockKind::FilteredDerivative { .. } => 5,
            BlockKind::LeadLag { .. } => 6,
            BlockKind::Pid { d, .. } => {
                if *d != 0.0 {
                    9
                } else {
                    6
                }
            }
        };
        base + 2 * usize::from(self.value_limiter.is_some())
            + 2 * usize::from(self.ramp_limiter.is_some())
    }

    fn local_state_sizes(&self) -> StateSizes {
        let (raw_alg, raw_diff) = self.raw_sizes();
        let diff_out = self.diff_output();
        let mut alg_roots = 0;
        let mut diff_roots = 0;
        if self.ramp_limiter.is_some() {
            diff_roots += 1;
        }
        if self.value_limiter.is_some() {
            if diff_out {
                diff_roots += 1;
            } else {
                alg_roots += 1;
            }
        }
        if self.deadband.is_some() {
            if self.differential_input {
                diff_roots += 1;
            } else {
                alg_roots += 1;
            }
        }
        StateSizes {
            alg: self.limiter_alg + raw_alg,
            diff: self.limiter_diff + raw_diff,
            alg_roots,
            diff_roots,
            jac: self.jac_estimate(),
        }
    }

    fn build_structure(&mut self) -> DaeResult<()> {
        self.kind
            .validate()
            .map_err(|e| DaeError::structure(e.to_string()))?;
        self.simplified = match self.kind {
            BlockKind::Delay { t1 } => {
                let tiny = t1 <= MIN_TIME_RESOLUTION;
                if tiny && !self.force_simplified {
                    warn!(
                        block = %self.name,
                        t1,
                        "delay constant below the time resolution, using the algebraic form"
                    );
                }
                tiny || self.force_simplified
            }
            _ => false,
        };
        self.deadband = match &self.kind {
            BlockKind::Deadband(cfg) => Some(Deadband::from_config(cfg)),
            _ => None,
        };
        self.value_limiter = self.limits.as_ref().map(|lim| {
            let reset = lim
                .reset_level
                .unwrap_or_else(|| default_reset_level(lim.min, lim.max));
            ValueLimiter::new(lim.min, lim.max, reset)
        });
        self.ramp_limiter = self
            .ramp_limits
            .as_ref()
            .map(|lim| RampLimiter::new(lim.min, lim.max, default_reset_level(lim.min, lim.max)));

        let diff_out = self.diff_output();
        if self.ramp_limiter.is_some() && !diff_out {
            return Err(DaeError::structure(
                "ramp limits apply only to blocks with a differential output",
            ));
        }
        self.limiter_alg = usize::from(self.value_limiter.is_some() && !diff_out);
        self.limiter_diff = usize::from(self.value_limiter.is_some() && diff_out)
            + usize::from(self.ramp_limiter.is_some());

        let sizes = self.local_state_sizes();
        self.offsets.unload();
        self.offsets.set_sizes(SolverMode::local(), sizes, sizes);
        self.offsets
            .assign(SolverMode::local(), OffsetBase::for_system(&sizes));
        self.state.clear();
        self.state.resize(sizes.total(), 0.0);
        self.dstate.clear();
        self.dstate.resize(sizes.total(), 0.0);
        self.initialized = false;
        Ok(())
    }

    fn init_from_input(&mut self, inputs: &[Real], field_set: &mut Vec<Real>) -> DaeResult<()> {
        let input = inputs.first().copied().unwrap_or(0.0) + self.bias;
        let rate = self.rate_input(inputs);
        let k = self.k;
        let a0 = self.raw_alg_index(0);
        let d0 = self.raw_diff_index(0);
        let d1 = self.raw_diff_index(1);

        let raw_out = match self.kind.clone() {
            BlockKind::Gain => k * input,
            BlockKind::Delay { .. } if self.simplified => {
                self.state[a0] = k * input;
                self.state[a0]
            }
            BlockKind::Delay { .. } => {
                self.state[d0] = k * input;
                self.state[d0]
            }
            BlockKind::Integral { iv } => {
                self.state[d0] = iv;
                self.dstate[d0] = k * input;
                iv
            }
            BlockKind::Derivative { .. } => {
                self.state[a0] = 0.0;
                self.state[d0] = input;
                0.0
            }
            BlockKind::FilteredDerivative { .. } => {
                self.state[d0] = 0.0;
                self.state[d1] = input;
                0.0
            }
            BlockKind::LeadLag { t1, t2 } => {
                self.state[a0] = k * input;
                self.state[d0] = k * (1.0 - t2 / t1) * input;
                self.state[a0]
            }
            BlockKind::Pid { p, d, .. } => {
                self.state[a0] = k * p * input;
                self.state[d0] = 0.0;
                // the integrator keeps moving unless the error is zero
                self.dstate[d0] = input;
                if d != 0.0 {
                    self.state[d1] = input;
                }
                self.state[a0]
            }
            BlockKind::Deadband(_) => {
                let mut y = k * input;
                if let Some(db) = self.deadband.as_mut() {
                    db.init_from_input(input);
                    y = k * db.compute_value(input);
                }
                if self.differential_input {
                    self.state[d0] = y;
                    if let Some(db) = self.deadband.as_ref() {
                        self.dstate[d0] = k * db.dout_din(input) * rate;
                    }
                } else {
                    self.state[a0] = y;
                }
                y
            }
        };

        let limited = self.settle_limiters(raw_out);
        self.prev_input = input;
        self.initialized = true;
        field_set.resize(self.output_count(), 0.0);
        field_set[0] = limited;
        Ok(())
    }

    fn init_from_desired(
        &mut self,
        inputs: &[Real],
        desired: &[Real],
        field_set: &mut Vec<Real>,
    ) -> DaeResult<()> {
        let k = self.k;
        let mut target = desired[0];
        if let Some(vl) = self.value_limiter.as_ref() {
            let clamped = vl.clamp_output(target);
            if clamped != target {
                warn!(block = %self.name, target, clamped, "desired output outside limits");
                target = clamped;
            }
        }
        let a0 = self.raw_alg_index(0);
        let d0 = self.raw_diff_index(0);
        let d1 = self.raw_diff_index(1);

        // biased input u + bias that holds the target
        let input = match self.kind.clone() {
            BlockKind::Gain => div_gain(&self.name, target, k)?,
            BlockKind::Delay { .. } if self.simplified => {
                self.state[a0] = target;
                div_gain(&self.name, target, k)?
            }
            BlockKind::Delay { .. } => {
                self.state[d0] = target;
                div_gain(&self.name, target, k)?
            }
            BlockKind::Integral { .. } => {
                self.state[d0] = target;
                0.0
            }
            BlockKind::Derivative { .. } => {
                if target.abs() > 1e-6 {
                    return Err(DaeError::init(
                        &self.name,
                        "a derivative block only holds zero output at steady state",
                    ));
                }
                let input = inputs.first().copied().unwrap_or(0.0) + self.bias;
                self.state[a0] = 0.0;
                self.state[d0] = input;
                input
            }
            BlockKind::FilteredDerivative { .. } => {
                if target.abs() > 1e-6 {
                    return Err(DaeError::init(
                        &self.name,
                        "a derivative block only holds zero output at steady state",
                    ));
                }
                let input = inputs.first().copied().unwrap_or(0.0) + self.bias;
                self.state[d0] = 0.0;
                self.state[d1] = input;
                input
            }
            BlockKind::LeadLag { t1, t2 } => {
                self.state[a0] = target;
                self.state[d0] = (1.0 - t2 / t1) * target;
                div_gain(&self.name, target, k)?
            }
            BlockKind::Pid { p, i, d, .. } => {
                self.state[a0] = target;
                if i != 0.0 {
                    self.state[d0] = div_gain(&self.name, target, k * i)?;
                    if d != 0.0 {
                        self.state[d1] = 0.0;
                    }
                    0.0
                } else {
                    let e = div_gain(&self.name, target, k * p)?;
                    self.state[d0] = 0.0;
                    self.dstate[d0] = e;
                    if d != 0.0 {
                        self.state[d1] = e;
                    }
                    e
                }
            }
            BlockKind::Deadband(_) => {
                let pre = div_gain(&self.name, target, k)?;
                let input = match self.deadband.as_mut() {
                    Some(db) => db.init_from_output(pre),
                    None => pre,
                };
                if self.differential_input {
                    self.state[d0] = target;
                } else {
                    self.state[a0] = target;
                }
                input
            }
        };

        self.settle_limiters(target);
        self.prev_input = input;
        self.initialized = true;
        field_set.resize(self.input_count(), 0.0);
        field_set[0] = input - self.bias;
        if self.differential_input {
            field_set[1] = 0.0;
        }
        Ok(())
    }

    /// Engage the limiters against a settled raw output and fill their
    /// state slots; returns the value the limited output slot holds.
    fn settle_limiters(&mut self, raw_out: Real) -> Real {
        let mut limited = raw_out;
        if let Some(vl) = self.value_limiter.as_mut() {
            if vl.limit_check(limited) < 0.0 {
                vl.change_activation(limited);
            }
            limited = vl.output(limited);
        }
        if self.state.is_empty() {
            return limited;
        }
        let diff_out = self.diff_output();
        if self.ramp_limiter.is_some() {
            let slot = self.local_alg() + usize::from(self.value_limiter.is_some() && diff_out);
            self.state[slot] = raw_out;
        }
        if self.value_limiter.is_some() {
            let slot = if diff_out { self.local_alg() } else { 0 };
            self.state[slot] = limited;
        }
        limited
    }

    fn ensure_limits(&mut self) -> &mut OutputLimits {
        if self.limits.is_none() {
            self.offsets.unload();
        }
        self.limits.get_or_insert_with(|| OutputLimits {
            max: Real::INFINITY,
            min: Real::NEG_INFINITY,
            reset_level: None,
        })
    }

    fn ensure_ramp_limits(&mut self) -> &mut RampLimits {
        if self.ramp_limits.is_none() {
            self.offsets.unload();
        }
        self.ramp_limits.get_or_insert_with(|| RampLimits {
            max: Real::INFINITY,
            min: Real::NEG_INFINITY,
        })
    }

    fn set_kind_param(&mut self, name: &str, value: Real) -> ParamResult {
        match &mut self.kind {
            BlockKind::Gain => Err(ParamError::unknown(name)),
            BlockKind::Delay { t1 } => match name {
                "t1" | "t" => {
                    if !value.is_finite() || value < 0.0 {
                        return Err(ParamError::invalid(name, "must be finite and nonnegative"));
                    }
                    *t1 = value;
                    Ok(())
                }
                _ => Err(ParamError::unknown(name)),
            },
            BlockKind::Integral { iv } => match name {
                "iv" | "initial" => {
                    *iv = value;
                    Ok(())
                }
                _ => Err(ParamError::unknown(name)),
            },
            BlockKind::Derivative { t1 } => match name {
                "t1" | "t" => {
                    *t1 = value;
                    Ok(())
                }
                _ => Err(ParamError::unknown(name)),
            },
            BlockKind::FilteredDerivative { t1, t2 } => match name {
                "t1" | "t" => {
                    *t1 = value;
                    Ok(())
                }
                "t2" => {
                    *t2 = value;
                    Ok(())
                }
                _ => Err(ParamError::unknown(name)),
            },
            BlockKind::LeadLag { t1, t2 } => match name {
                "t1" | "t" => {
                    *t1 = value;
                    Ok(())
                }
                "t2" => {
                    *t2 = value;
                    Ok(())
                }
                _ => Err(ParamError::unknown(name)),
            },
            BlockKind::Pid { p, i, d, t1 } => match name {
                "p" | "proportional" => {
                    *p = value;
                    Ok(())
                }
                "i" | "integral" => {
                    *i = value;
                    Ok(())
                }
                "d" | "derivative" => {
                    *d = value;
                    Ok(())
                }
                "t1" | "t" => {
                    *t1 = value;
                    Ok(())
                }
                _ => Err(ParamError::unknown(name)),
            },
            BlockKind::Deadband(db) => match name {
                "level" | "dblevel" | "deadbandlevel" => {
                    db.level = value;
                    Ok(())
                }
                "deadband" | "db" => {
                    if value <= 0.0 {
                        return Err(ParamError::invalid(name, "band must be positive"));
                    }
                    db.high = db.level + value;
                    db.low = db.level - value;
                    Ok(())
                }
                "deadbandhigh" | "dbhigh" | "high" => {
                    db.high = if value > db.level { value } else { db.level + value };
                    Ok(())
                }
                "deadbandlow" | "dblow" | "low" => {
                    db.low = if value < db.level { value } else { db.level - value };
                    Ok(())
                }
                "rampband" | "ramp" => {
                    if value < 0.0 {
                        return Err(ParamError::invalid(name, "must be nonnegative"));
                    }
                    db.ramp_up = value;
                    db.ramp_down = value;
                    Ok(())
                }
                "rampupband" | "rampup" => {
                    db.ramp_up = value;
                    Ok(())
                }
                "rampdownband" | "rampdown" => {
                    db.ramp_down = value;
                    Ok(())
                }
                "resetlevel" | "reset" => {
                    db.reset_high = Some(db.high - value);
                    db.reset_low = Some(db.low + value);
                    Ok(())
                }
                "resethigh" => {
                    db.reset_high = Some(value);
                    Ok(())
                }
                "resetlow" => {
                    db.reset_low = Some(value);
                    Ok(())
                }
                "tolerance" | "tol" => {
                    if value <= 0.0 {
                        return Err(ParamError::invalid(name, "must be positive"));
                    }
                    db.tolerance = value;
                    Ok(())
                }
                _ => Err(ParamError::unknown(name)),
            },
        }
    }

    fn set_base_param(&mut self, name: &str, value: Real) -> ParamResult {
        match name {
            "k" | "gain" => {
                if !value.is_finite() {
                    return Err(ParamError::invalid(name, "must be finite"));
                }
                self.k = value;
                Ok(())
            }
            "bias" | "b" => {
                if !value.is_finite() {
                    return Err(ParamError::invalid(name, "must be finite"));
                }
                self.bias = value;
                Ok(())
            }
            "omax" | "max" => {
                self.ensure_limits().max = value;
                Ok(())
            }
            "omin" | "min" => {
                self.ensure_limits().min = value;
                Ok(())
            }
            "limit" => {
                let lim = self.ensure_limits();
                lim.max = value.abs();
                lim.min = -value.abs();
                Ok(())
            }
            "resetlevel" | "reset" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.ensure_limits().reset_level = Some(value);
                Ok(())
            }
            "rampmax" => {
                self.ensure_ramp_limits().max = value;
                Ok(())
            }
            "rampmin" => {
                self.ensure_ramp_limits().min = value;
                Ok(())
            }
            "ramplimit" => {
                let lim = self.ensure_ramp_limits();
                lim.max = value.abs();
                lim.min = -value.abs();
                Ok(())
            }
            _ => Err(ParamError::unknown(name)),
        }
    }
}

fn div_gain(name: &str, value: Real, k: Real) -> DaeResult<Real> {
    if k == 0.0 {
        return Err(DaeError::init(
            name,
            "zero gain cannot be inverted for a desired output",
        ));
    }
    Ok(value / k)
}

impl Parameterized for Block {
    fn set_param(&mut self, name: &str, value: Real) -> ParamResult {
        match self.set_kind_param(name, value) {
            Err(e) if e.is_unhandled() => self.set_base_param(name, value),
            other => other,
        }
    }

    fn set_flag(&mut self, name: &str, value: bool) -> ParamResult {
        match name {
            "simplified" => {
                self.force_simplified = value;
                self.offsets.unload();
                Ok(())
            }
            "differential_input" => {
                if matches!(self.kind, BlockKind::Deadband(_)) {
                    self.differential_input = value;
                    self.offsets.unload();
                    Ok(())
                } else {
                    Err(ParamError::invalid(
                        name,
                        "only a deadband block accepts a differential input",
                    ))
                }
            }
            "shifted" | "unshifted" => {
                if let BlockKind::Deadband(db) = &mut self.kind {
                    db.shifted = (name == "shifted") == value;
                    if let Some(rt) = self.deadband.as_mut() {
                        rt.set_shifted(db.shifted);
                    }
                    Ok(())
                } else {
                    Err(ParamError::invalid(name, "only a deadband block shifts"))
                }
            }
            "no_down_deadband" => {
                if let BlockKind::Deadband(db) = &mut self.kind {
                    if value {
                        db.reset_high = Some(db.level);
                        db.reset_low = Some(db.level);
                        if let Some(rt) = self.deadband.as_mut() {
                            rt.suppress_down_deadband();
                        }
                    }
                    Ok(())
                } else {
                    Err(ParamError::invalid(name, "only a deadband block resets"))
                }
            }
            _ => Err(ParamError::unknown_flag(name)),
        }
    }

    fn param(&self, name: &str) -> Option<Real> {
        match name {
            "k" | "gain" => Some(self.k),
            "bias" | "b" => Some(self.bias),
            "omax" | "max" => self.limits.as_ref().map(|l| l.max),
            "omin" | "min" => self.limits.as_ref().map(|l| l.min),
            "t1" | "t" => match &self.kind {
                BlockKind::Delay { t1 }
                | BlockKind::Derivative { t1 }
                | BlockKind::FilteredDerivative { t1, .. }
                | BlockKind::LeadLag { t1, .. }
                | BlockKind::Pid { t1, .. } => Some(*t1),
                _ => None,
            },
            "t2" => match &self.kind {
                BlockKind::FilteredDerivative { t2, .. } | BlockKind::LeadLag { t2, .. } => {
                    Some(*t2)
                }
                _ => None,
            },
            "p" => match &self.kind {
                BlockKind::Pid { p, .. } => Some(*p),
                _ => None,
            },
            "i" => match &self.kind {
                BlockKind::Pid { i, .. } => Some(*i),
                _ => None,
            },
            "d" => match &self.kind {
                BlockKind::Pid { d, .. } => Some(*d),
                _ => None,
            },
            "iv" => match &self.kind {
                BlockKind::Integral { iv } => Some(*iv),
                _ => None,
            },
            "high" => match &self.kind {
                BlockKind::Deadband(db) => Some(db.high),
                _ => None,
            },
            "low" => match &self.kind {
                BlockKind::Deadband(db) => Some(db.low),
                _ => None,
            },
            "level" => match &self.kind {
                BlockKind::Deadband(db) => Some(db.level),
                _ => None,
            },
            _ => None,
        }
    }
}

impl DynamicModel for Block {
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
        if self.differential_input { 2 } else { 1 }
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
            self.init_from_input(inputs, field_set)
        } else {
            self.init_from_desired(inputs, desired, field_set)
        }
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
                let la = self.local_alg();
                state[d0..d0 + sizes.diff].copy_from_slice(&self.state[la..la + sizes.diff]);
                dstate_dt[d0..d0 + sizes.diff]
                    .copy_from_slice(&self.dstate[la..la + sizes.diff]);
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
                let la = self.local_alg();
                self.state[la..la + sizes.diff].copy_from_slice(&state[d0..d0 + sizes.diff]);
                self.dstate[la..la + sizes.diff]
                    .copy_from_slice(&dstate_dt[d0..d0 + sizes.diff]);
            }
        }
        self.prev_time = time;
    }

    fn residual(&self, inputs: &[Real], sd: &StateData<'_>, resid: &mut [Real], mode: SolverMode) {
        self.eval_residual(inputs, sd, resid, mode);
    }

    fn derivative(&self, inputs: &[Real], sd: &StateData<'_>, deriv: &mut [Real], mode: SolverMode) {
        self.eval_derivative(inputs, sd, deriv, mode);
    }

    fn algebraic_update(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        update: &mut [Real],
        mode: SolverMode,
        alpha: Real,
    ) {
        self.eval_algebraic(inputs, sd, update, mode, alpha);
    }

    fn jacobian_elements(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        input_locs: &[usize],
        sink: &mut dyn MatrixSink,
        mode: SolverMode,
    ) {
        self.eval_jacobian(inputs, sd, input_locs, sink, mode);
    }

    fn root_test(&self, inputs: &[Real], sd: &StateData<'_>, roots: &mut [Real], mode: SolverMode) {
        self.eval_roots(inputs, sd, roots, mode);
    }

    fn root_trigger(&mut self, time: Real, inputs: &[Real], root_mask: &[bool], mode: SolverMode) {
        self.apply_root_trigger(time, inputs, root_mask, mode);
    }

    fn root_check(
        &mut self,
        inputs: &[Real],
        sd: &StateData<'_>,
        level: CheckLevel,
        mode: SolverMode,
    ) -> ChangeCode {
        self.apply_root_check(inputs, sd, level, mode)
    }

    fn timestep(&mut self, time: Real, inputs: &[Real], mode: SolverMode) -> Real {
        self.step_to(time, inputs, mode)
    }

    fn output(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, _num: usize) -> Real {
        if self.state.is_empty() {
            return self.k * self.biased_input(inputs);
        }
        if self.diff_output() {
            self.diff_state(sd, mode, 0)
        } else {
            self.alg_state(sd, mode, 0)
        }
    }

    fn output_location(&self, mode: SolverMode, _num: usize) -> usize {
        if self.state.is_empty() {
            return NO_LOCATION;
        }
        if self.diff_output() {
            self.offsets.diff_offset(mode)
        } else {
            self.offsets.alg_offset(mode)
        }
    }

    fn state_index(&self, field: &str, mode: SolverMode) -> usize {
        // everything addressable besides the output is differential
        let diff_idx = match field {
            "output" | "out" => return self.output_location(mode, 0),
            "m1" | "internal" => match &self.kind {
                BlockKind::LeadLag { .. } => Some(self.limiter_diff),
                _ => None,
            },
            "filter" => match &self.kind {
                BlockKind::Derivative { .. } => Some(self.limiter_diff),
                BlockKind::FilteredDerivative { .. } => Some(self.limiter_diff + 1),
                _ => None,
            },
            "integral" => match &self.kind {
                BlockKind::Pid { .. } => Some(self.limiter_diff),
                _ => None,
            },
            _ => None,
        };
        match (diff_idx, self.offsets.diff_offset(mode)) {
            (Some(idx), d0) if d0 != NO_LOCATION => d0 + idx,
            _ => NO_LOCATION,
        }
    }

    fn local_state_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.state.len());
        let diff_out = self.diff_output();
        if self.value_limiter.is_some() && !diff_out {
            names.push("limited_output".to_string());
        }
        // raw algebraic states
        match &self.kind {
            BlockKind::Delay { .. } if self.simplified => names.push("output".to_string()),
            BlockKind::Derivative { .. } | BlockKind::LeadLag { .. } | BlockKind::Pid { .. } => {
                names.push("output".to_string());
            }
            BlockKind::Deadband(_) if !self.differential_input => {
                names.push("output".to_string());
            }
            _ => {}
        }
        if diff_out {
            if self.value_limiter.is_some() {
                names.push("limited_output".to_string());
            }
            if self.ramp_limiter.is_some() {
                names.push("ramp_limited_output".to_string());
            }
        }
        // raw differential states
        match &self.kind {
            BlockKind::Delay { .. } if self.simplified => {}
            BlockKind::Delay { .. } | BlockKind::Integral { .. } => {
                names.push("output".to_string());
            }
            BlockKind::Derivative { .. } => names.push("filter".to_string()),
            BlockKind::FilteredDerivative { .. } => {
                names.push("output".to_string());
                names.push("filter".to_string());
            }
            BlockKind::LeadLag { .. } => names.push("intermediate".to_string()),
            BlockKind::Pid { d, .. } => {
                names.push("integral".to_string());
                if *d != 0.0 {
                    names.push("filter".to_string());
                }
            }
            BlockKind::Deadband(_) if self.differential_input => {
                names.push("output".to_string());
            }
            _ => {}
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::DeadbandConfig;

    fn layout(kind: BlockKind) -> (usize, usize) {
        let mut b = Block::from_kind(kind).unwrap();
        b.initialize_structure().unwrap();
        let s = b.offsets.local_sizes(SolverMode::local());
        (s.alg, s.diff)
    }

    #[test]
    fn state_counts_per_kind() {
        assert_eq!(layout(BlockKind::Gain), (0, 0));
        assert_eq!(layout(BlockKind::delay(0.5)), (0, 1));
        assert_eq!(layout(BlockKind::Integral { iv: 0.0 }), (0, 1));
        assert_eq!(layout(BlockKind::Derivative { t1: 0.1 }), (1, 1));
        assert_eq!(layout(BlockKind::FilteredDerivative { t1: 0.1, t2: 0.2 }), (0, 2));
        assert_eq!(layout(BlockKind::lead_lag(0.5, 0.1)), (1, 1));
        assert_eq!(layout(BlockKind::pid(1.0, 0.5, 0.1)), (1, 2));
        assert_eq!(layout(BlockKind::pid(1.0, 0.5, 0.0)), (1, 1));
        assert_eq!(layout(BlockKind::Deadband(DeadbandConfig::symmetric(0.1))), (1, 0));
    }

    #[test]
    fn tiny_delay_collapses_to_algebraic() {
        let mut b = Block::from_kind(BlockKind::delay(1e-9)).unwrap();
        b.initialize_structure().unwrap();
        assert!(b.is_simplified());
        let s = b.offsets.local_sizes(SolverMode::local());
        assert_eq!((s.alg, s.diff), (1, 0));
        assert!(!b.diff_output());
    }

    #[test]
    fn limits_add_a_state_and_a_root() {
        let cfg = BlockConfig::new(BlockKind::delay(0.5)).with_limits(-1.0, 1.0);
        let mut b = Block::new(cfg).unwrap();
        b.initialize_structure().unwrap();
        let s = b.offsets.local_sizes(SolverMode::local());
        assert_eq!((s.alg, s.diff), (0, 2));
        assert_eq!((s.alg_roots, s.diff_roots), (0, 1));
        // limited output is the first differential state
        assert_eq!(b.raw_diff_index(0), 1);
    }

    #[test]
    fn ramp_limits_need_a_differential_output() {
        let cfg = BlockConfig::new(BlockKind::Gain).with_ramp_limits(-1.0, 1.0);
        let mut b = Block::new(cfg).unwrap();
        assert!(b.initialize_structure().is_err());
    }

    #[test]
    fn init_from_input_reaches_steady_state() {
        let cfg = BlockConfig::new(BlockKind::delay(0.5)).with_gain(2.0).with_bias(0.25);
        let mut b = Block::new(cfg).unwrap();
        let mut out = Vec::new();
        b.initialize_states(&[0.75], &[], &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0] - 2.0).abs() < 1e-12);
        // derivative of the internal state is zero at the fixed point
        assert_eq!(b.dstate[0], 0.0);
    }

    #[test]
    fn init_from_desired_reports_the_required_input() {
        let cfg = BlockConfig::new(BlockKind::lead_lag(0.5, 0.1)).with_gain(4.0);
        let mut b = Block::new(cfg).unwrap();
        let mut req = Vec::new();
        b.initialize_states(&[], &[2.0], &mut req).unwrap();
        assert!((req[0] - 0.5).abs() < 1e-12);
        // feeding that input forward reproduces the desired output
        let mut out = Vec::new();
        let mut fwd = Block::new(
            BlockConfig::new(BlockKind::lead_lag(0.5, 0.1)).with_gain(4.0),
        )
        .unwrap();
        fwd.initialize_states(&req, &[], &mut out).unwrap();
        assert!((out[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn desired_output_beyond_limits_is_clamped() {
        let cfg = BlockConfig::new(BlockKind::delay(0.5)).with_limits(-1.0, 1.0);
        let mut b = Block::new(cfg).unwrap();
        let mut req = Vec::new();
        b.initialize_states(&[], &[5.0], &mut req).unwrap();
        let sd = StateData::empty(0.0);
        let y = b.output(&[], &sd, SolverMode::local(), 0);
        assert!((y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn derivative_block_rejects_nonzero_desired_output() {
        let mut b = Block::from_kind(BlockKind::Derivative { t1: 0.1 }).unwrap();
        let mut req = Vec::new();
        assert!(b.initialize_states(&[], &[1.0], &mut req).is_err());
        assert!(b.initialize_states(&[3.0], &[0.0], &mut req).is_ok());
    }

    #[test]
    fn parameter_chain_falls_through_to_base_keys() {
        let mut b = Block::from_kind(BlockKind::delay(0.5)).unwrap();
        b.set_param("t1", 0.8).unwrap();
        b.set_param("gain", 3.0).unwrap();
        assert_eq!(b.param("t1"), Some(0.8));
        assert_eq!(b.param("k"), Some(3.0));
        let err = b.set_param("nosuch", 1.0).unwrap_err();
        assert!(err.is_unhandled());
    }

    #[test]
    fn guess_and_set_state_round_trip_by_partition() {
        let mut b = Block::from_kind(BlockKind::lead_lag(0.5, 0.1)).unwrap();
        let mut out = Vec::new();
        b.initialize_states(&[1.0], &[], &mut out).unwrap();
        let mode = SolverMode::dae(1);
        b.load_sizes(mode);
        b.set_offsets(OffsetBase { alg: 0, diff: 1, root: 0 }, mode);

        let mut state = vec![0.0; 2];
        let mut dstate = vec![0.0; 2];
        b.guess_state(0.0, &mut state, &mut dstate, mode);
        assert!((state[0] - 1.0).abs() < 1e-12);
        assert!((state[1] - 0.8).abs() < 1e-12);

        state[0] = 0.5;
        state[1] = 0.4;
        b.set_state(1.0, &state, &dstate, mode);
        assert!((b.state[0] - 0.5).abs() < 1e-12);
        assert!((b.state[1] - 0.4).abs() < 1e-12);
    }
}
