//! Root (event) handling for [`Block`]: limiter engagement and deadband
//! stage changes.
//!
//! A block's roots appear in a fixed order inside its root span: ramp
//! limiter, then value limiter, then deadband, each present only when the
//! owning partition is active in the mode. `root_test` is pure; the
//! discrete flips happen in `root_trigger` (solver-located crossings) and
//! `root_check` (limit sweeps between iterations).

use gf_core::{NO_LOCATION, Real};
use gf_dae::{ChangeCode, CheckLevel, SolverMode, StateData};

use crate::block::Block;

impl Block {
    fn value_root_active(&self, mode: SolverMode) -> bool {
        self.value_limiter.is_some()
            && if self.diff_output() {
                mode.has_differential()
            } else {
                mode.has_algebraic()
            }
    }

    fn deadband_root_active(&self, mode: SolverMode) -> bool {
        self.deadband.is_some()
            && if self.differential_input {
                mode.has_differential()
            } else {
                mode.has_algebraic()
            }
    }

    /// Raw (pre-limiter) output value the value limiter watches.
    fn limiter_test_value(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode) -> Real {
        let (raw_alg, _) = self.raw_sizes();
        if self.diff_output() {
            self.diff_state(sd, mode, self.limiter_diff)
        } else if raw_alg > 0 {
            self.alg_state(sd, mode, self.limiter_alg)
        } else {
            self.k * self.biased_input(inputs)
        }
    }

    /// Same test value, from the local caches only.
    fn local_limit_test(&self, input: Real) -> Real {
        let (raw_alg, _) = self.raw_sizes();
        if self.diff_output() {
            self.state[self.local_alg() + self.limiter_diff]
        } else if raw_alg > 0 {
            self.state[self.limiter_alg]
        } else {
            self.k * input
        }
    }

    pub(crate) fn eval_roots(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        roots: &mut [Real],
        mode: SolverMode,
    ) {
        let r0 = self.offsets.root_offset(mode);
        if r0 == NO_LOCATION {
            return;
        }
        let mut idx = r0;
        if let Some(rl) = &self.ramp_limiter {
            if mode.has_differential() {
                let rate = self.diff_dstate(sd, mode, self.limiter_diff);
                roots[idx] = rl.limit_check(rate);
                idx += 1;
            }
        }
        if self.value_root_active(mode) {
            if let Some(vl) = &self.value_limiter {
                roots[idx] = vl.limit_check(self.limiter_test_value(inputs, sd, mode));
                idx += 1;
            }
        }
        if self.deadband_root_active(mode) {
            if let Some(db) = &self.deadband {
                roots[idx] = db.root(self.biased_input(inputs));
            }
        }
    }

    pub(crate) fn apply_root_trigger(
        &mut self,
        _time: Real,
        inputs: &[Real],
        root_mask: &[bool],
        mode: SolverMode,
    ) {
        let r0 = self.offsets.root_offset(mode);
        if r0 == NO_LOCATION {
            return;
        }
        let input = self.biased_input(inputs);
        let mut idx = r0;
        if self.ramp_limiter.is_some() && mode.has_differential() {
            if root_mask.get(idx).copied().unwrap_or(false) {
                let rate = self.dstate[self.local_alg() + self.limiter_diff];
                if let Some(rl) = self.ramp_limiter.as_mut() {
                    rl.change_activation(rate);
                }
            }
            idx += 1;
        }
        if self.value_root_active(mode) {
            if root_mask.get(idx).copied().unwrap_or(false) {
                let test = self.local_limit_test(input);
                let mut limited = None;
                if let Some(vl) = self.value_limiter.as_mut() {
                    vl.change_activation(test);
                    limited = Some(vl.output(test));
                }
                if let Some(v) = limited {
                    let slot = if self.diff_output() { self.local_alg() } else { 0 };
                    self.state[slot] = v;
                }
            }
            idx += 1;
        }
        if self.deadband_root_active(mode) && root_mask.get(idx).copied().unwrap_or(false) {
            let mut value = None;
            if let Some(db) = self.deadband.as_mut() {
                db.trigger(input);
                value = Some(self.k * db.compute_value(input));
            }
            if let Some(y) = value {
                let slot = if self.differential_input {
                    self.raw_diff_index(0)
                } else {
                    self.raw_alg_index(0)
                };
                self.state[slot] = y;
            }
        }
    }

    pub(crate) fn apply_root_check(
        &mut self,
        inputs: &[Real],
        sd: &StateData<'_>,
        _level: CheckLevel,
        mode: SolverMode,
    ) -> ChangeCode {
        let mut code = ChangeCode::NoChange;
        let input = self.biased_input(inputs);

        if self.ramp_limiter.is_some() && mode.has_differential() {
            let rate = self.diff_dstate(sd, mode, self.limiter_diff);
            if let Some(rl) = self.ramp_limiter.as_mut() {
                if rl.limit_check(rate) < 0.0 {
                    rl.change_activation(rate);
                    code = code.max(ChangeCode::NonStateChange);
                }
            }
        }
        if self.value_root_active(mode) {
            let test = self.limiter_test_value(inputs, sd, mode);
            if let Some(vl) = self.value_limiter.as_mut() {
                if vl.limit_check(test) < 0.0 {
                    vl.change_activation(test);
                    code = code.max(ChangeCode::NonStateChange);
                }
            }
        }
        if self.deadband_root_active(mode) {
            if let Some(db) = self.deadband.as_mut() {
                code = code.max(db.check(input));
            }
        }
        code
    }
}
