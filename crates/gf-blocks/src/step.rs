//! Explicit time stepping for [`Block`], used when a block runs outside
//! an implicit solve.
//!
//! First-order lags advance by substeps of a twentieth of the time
//! constant with the input interpolated linearly across the step; a step
//! longer than five time constants jumps straight to the settled value.
//! Integrators use the trapezoid rule on the input.

use gf_core::Real;
use gf_dae::SolverMode;

use crate::block::Block;
use crate::kind::BlockKind;

/// Advance `x' = (gain * u - x) / t1` from `u_from` to `u_to` over `dt`.
fn track_first_order(x0: Real, t1: Real, gain: Real, u_from: Real, u_to: Real, dt: Real) -> Real {
    if dt >= 5.0 * t1 {
        return gain * u_to;
    }
    let tstep = 0.05 * t1;
    let slope = (u_to - u_from) / dt;
    let mut x = x0;
    let mut u_prev = u_from;
    let mut elapsed = 0.0;
    while elapsed + tstep < dt {
        let u_next = u_prev + slope * tstep;
        x += ((u_prev + u_next) * 0.5 * gain - x) / t1 * tstep;
        elapsed += tstep;
        u_prev = u_next;
    }
    let rem = dt - elapsed;
    x + ((u_prev + u_to) * 0.5 * gain - x) / t1 * rem
}

impl Block {
    fn local_output(&self, input: Real) -> Real {
        if self.state.is_empty() {
            self.k * input
        } else {
            self.state[0]
        }
    }

    /// Apply the ramp and value limiters to a freshly stepped raw output,
    /// updating their slots, and return the value the block presents.
    fn settle_step_limiters(&mut self, raw_out: Real, dt: Real) -> Real {
        if self.ramp_limiter.is_none() && self.value_limiter.is_none() {
            return raw_out;
        }
        let mut val = raw_out;
        if self.ramp_limiter.is_some() {
            let slot =
                self.local_alg() + usize::from(self.value_limiter.is_some() && self.diff_output());
            let prev = self.state[slot];
            let rate = (val - prev) / dt;
            let mut clamped = rate;
            if let Some(rl) = self.ramp_limiter.as_mut() {
                if rl.limit_check(rate) < 0.0 {
                    rl.change_activation(rate);
                }
                clamped = rl.clamp_ramp(rate);
            }
            val = prev + clamped * dt;
            self.state[slot] = val;
        }
        if self.value_limiter.is_some() {
            let mut limited = val;
            if let Some(vl) = self.value_limiter.as_mut() {
                if vl.limit_check(val) < 0.0 {
                    vl.change_activation(val);
                }
                limited = vl.output(val);
            }
            let slot = if self.diff_output() { self.local_alg() } else { 0 };
            self.state[slot] = limited;
            val = limited;
        }
        val
    }

    pub(crate) fn step_to(&mut self, time: Real, inputs: &[Real], _mode: SolverMode) -> Real {
        let input = self.biased_input(inputs);
        let dt = time - self.prev_time;
        if dt <= 0.0 {
            self.prev_input = input;
            return self.local_output(input);
        }
        let k = self.k;
        let prev = self.prev_input;

        let raw_out = match self.kind {
            BlockKind::Gain => k * input,
            BlockKind::Delay { .. } if self.simplified => {
                let i = self.raw_alg_index(0);
                self.state[i] = k * input;
                self.state[i]
            }
            BlockKind::Delay { t1 } => {
                let i = self.raw_diff_index(0);
                let x = track_first_order(self.state[i], t1, k, prev, input, dt);
                self.state[i] = x;
                self.dstate[i] = (k * input - x) / t1;
                x
            }
            BlockKind::Integral { .. } => {
                let i = self.raw_diff_index(0);
                self.state[i] += k * (prev + input) * 0.5 * dt;
                self.dstate[i] = k * input;
                self.state[i]
            }
            BlockKind::Derivative { t1 } => {
                let xf = self.raw_diff_index(0);
                let x = track_first_order(self.state[xf], t1, 1.0, prev, input, dt);
                self.state[xf] = x;
                self.dstate[xf] = (input - x) / t1;
                let y = k * (input - x) / t1;
                let i = self.raw_alg_index(0);
                self.state[i] = y;
                y
            }
            BlockKind::FilteredDerivative { t1, t2 } => {
                let i2 = self.raw_diff_index(0);
                let i1 = self.raw_diff_index(1);
                let mut x1 = self.state[i1];
                let mut x2 = self.state[i2];
                if dt >= 5.0 * t1.max(t2) {
                    x1 = input;
                    x2 = 0.0;
                } else {
                    let tstep = 0.05 * t1.min(t2);
                    let slope = (input - prev) / dt;
                    let mut u_prev = prev;
                    let mut elapsed = 0.0;
                    while elapsed < dt {
                        let h = tstep.min(dt - elapsed);
                        let u_next = u_prev + slope * h;
                        let um = (u_prev + u_next) * 0.5;
                        let dx1 = (um - x1) / t1;
                        x2 += (k * dx1 - x2) / t2 * h;
                        x1 += dx1 * h;
                        elapsed += h;
                        u_prev = u_next;
                    }
                }
                self.state[i1] = x1;
                self.state[i2] = x2;
                self.dstate[i1] = (input - x1) / t1;
                self.dstate[i2] = (k * (input - x1) / t1 - x2) / t2;
                x2
            }
            BlockKind::LeadLag { t1, t2 } => {
                let ix = self.raw_diff_index(0);
                let x = track_first_order(self.state[ix], t1, k * (1.0 - t2 / t1), prev, input, dt);
                self.state[ix] = x;
                let y = x + k * (t2 / t1) * input;
                let i = self.raw_alg_index(0);
                self.state[i] = y;
                self.dstate[ix] = (k * input - y) / t1;
                y
            }
            BlockKind::Pid { p, i, d, t1 } => {
                let xi = self.raw_diff_index(0);
                self.state[xi] += (prev + input) * 0.5 * dt;
                self.dstate[xi] = input;
                let mut v = p * input + i * self.state[xi];
                if d != 0.0 {
                    let xd_idx = self.raw_diff_index(1);
                    let xd = track_first_order(self.state[xd_idx], t1, 1.0, prev, input, dt);
                    self.state[xd_idx] = xd;
                    self.dstate[xd_idx] = (input - xd) / t1;
                    v += d * (input - xd) / t1;
                }
                let y = k * v;
                let i = self.raw_alg_index(0);
                self.state[i] = y;
                y
            }
            BlockKind::Deadband(_) => {
                let mut y = k * input;
                let mut slope = 1.0;
                if let Some(db) = self.deadband.as_mut() {
                    db.check(input);
                    y = k * db.compute_value(input);
                    slope = db.dout_din(input);
                }
                if self.differential_input {
                    let i = self.raw_diff_index(0);
                    self.state[i] = y;
                    self.dstate[i] = k * slope * (input - prev) / dt;
                } else {
                    let i = self.raw_alg_index(0);
                    self.state[i] = y;
                }
                y
            }
        };

        let out = self.settle_step_limiters(raw_out, dt);
        self.prev_input = input;
        self.prev_time = time;
        out
    }
}
