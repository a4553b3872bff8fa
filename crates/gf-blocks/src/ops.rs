//! Solve-path evaluation for [`Block`]: residuals, derivatives,
//! algebraic updates, and analytic Jacobian entries.
//!
//! Every algebraic row is written `update - x` and every differential row
//! `f(x) - dx/dt`, so diagonals carry `-1` and `-1/T - cj` style terms.
//! State reads go through the partition helpers, which fall back to the
//! locally cached values whenever the mode does not carry that partition.

use gf_core::{NO_LOCATION, Real};
use gf_dae::{MatrixSink, SolverMode, StateData};

use crate::block::Block;
use crate::kind::BlockKind;

impl Block {
    /// Algebraic state `idx` (partition-local), from the solver vector when
    /// available, else from the local cache.
    pub(crate) fn alg_state(&self, sd: &StateData<'_>, mode: SolverMode, idx: usize) -> Real {
        if !sd.is_empty() && mode.has_algebraic() {
            let a0 = self.offsets.alg_offset(mode);
            if a0 != NO_LOCATION {
                return sd.state[a0 + idx];
            }
        }
        self.state[idx]
    }

    pub(crate) fn diff_state(&self, sd: &StateData<'_>, mode: SolverMode, idx: usize) -> Real {
        if !sd.is_empty() && mode.has_differential() {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                return sd.state[d0 + idx];
            }
        }
        self.state[self.local_alg() + idx]
    }

    pub(crate) fn diff_dstate(&self, sd: &StateData<'_>, mode: SolverMode, idx: usize) -> Real {
        if !sd.is_empty() && mode.has_differential() {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                return sd.dstate_dt[d0 + idx];
            }
        }
        self.dstate[self.local_alg() + idx]
    }

    /// Output seen by a downstream block, given this block's raw input.
    pub(crate) fn block_output(&self, sd: &StateData<'_>, mode: SolverMode, input: Real) -> Real {
        if self.state.is_empty() {
            return self.k * (input + self.bias);
        }
        if self.diff_output() {
            self.diff_state(sd, mode, 0)
        } else {
            self.alg_state(sd, mode, 0)
        }
    }

    /// Rate of change of the output, zero for algebraic outputs.
    pub(crate) fn block_dout_dt(&self, sd: &StateData<'_>, mode: SolverMode) -> Real {
        if self.diff_output() {
            self.diff_dstate(sd, mode, 0)
        } else {
            0.0
        }
    }

    /// Values the algebraic states should settle to, partition-local order.
    fn alg_updates(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, out: &mut [Real]) {
        let input = self.biased_input(inputs);
        let k = self.k;
        let raw = match &self.kind {
            BlockKind::Gain => k * input,
            BlockKind::Delay { .. } if self.simplified => k * input,
            BlockKind::Derivative { t1 } => {
                let x = self.diff_state(sd, mode, 0);
                k * (input - x) / t1
            }
            BlockKind::LeadLag { t1, t2 } => {
                let x = self.diff_state(sd, mode, 0);
                x + k * (t2 / t1) * input
            }
            BlockKind::Pid { p, i, d, t1 } => {
                let xi = self.diff_state(sd, mode, 0);
                let mut v = p * input + i * xi;
                if *d != 0.0 {
                    let xd = self.diff_state(sd, mode, 1);
                    v += d * (input - xd) / t1;
                }
                k * v
            }
            BlockKind::Deadband(_) if !self.differential_input => match &self.deadband {
                Some(db) => k * db.compute_value(input),
                None => k * input,
            },
            // differential-output kinds own no algebraic rows
            _ => return,
        };
        let (raw_alg, _) = self.raw_sizes();
        if raw_alg > 0 {
            out[self.limiter_alg] = raw;
        }
        if self.limiter_alg > 0 {
            if let Some(vl) = &self.value_limiter {
                // limit the settled state, not the freshly computed value;
                // a direct gain has no state to read back
                let test = if raw_alg > 0 {
                    self.alg_state(sd, mode, self.limiter_alg)
                } else {
                    raw
                };
                out[0] = vl.output(test);
            }
        }
    }

    /// Time derivatives of the differential states, partition-local order.
    fn diff_derivs(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, out: &mut [Real]) {
        let input = self.biased_input(inputs);
        let k = self.k;
        let ld = self.limiter_diff;
        match &self.kind {
            BlockKind::Delay { t1 } if !self.simplified => {
                let x = self.diff_state(sd, mode, ld);
                out[ld] = (k * input - x) / t1;
            }
            BlockKind::Integral { .. } => out[ld] = k * input,
            BlockKind::FilteredDerivative { t1, t2 } => {
                let x2 = self.diff_state(sd, mode, ld);
                let x1 = self.diff_state(sd, mode, ld + 1);
                out[ld] = (k * (input - x1) / t1 - x2) / t2;
                out[ld + 1] = (input - x1) / t1;
            }
            BlockKind::LeadLag { t1, .. } => {
                let y = self.alg_state(sd, mode, self.limiter_alg);
                out[0] = (k * input - y) / t1;
            }
            BlockKind::Derivative { t1 } => {
                let x = self.diff_state(sd, mode, 0);
                out[0] = (input - x) / t1;
            }
            BlockKind::Pid { d, t1, .. } => {
                out[0] = input;
                if *d != 0.0 {
                    let xd = self.diff_state(sd, mode, 1);
                    out[1] = (input - xd) / t1;
                }
            }
            BlockKind::Deadband(_) if self.differential_input => {
                if let Some(db) = &self.deadband {
                    out[ld] = k * db.dout_din(input) * self.rate_input(inputs);
                }
            }
            _ => {}
        }
        if self.diff_output() {
            let vl_on_diff = self.value_limiter.is_some();
            if let Some(rl) = &self.ramp_limiter {
                let slot = usize::from(vl_on_diff);
                out[slot] = rl.output(self.diff_dstate(sd, mode, slot + 1));
            }
            if let Some(vl) = &self.value_limiter {
                out[0] = vl.deriv(self.diff_dstate(sd, mode, 1));
            }
        }
    }

    pub(crate) fn eval_residual(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        resid: &mut [Real],
        mode: SolverMode,
    ) {
        let sizes = self.offsets.local_sizes(mode);
        if mode.has_algebraic() && sizes.alg > 0 {
            let a0 = self.offsets.alg_offset(mode);
            if a0 != NO_LOCATION {
                let mut vals = [0.0; 2];
                self.alg_updates(inputs, sd, mode, &mut vals);
                for i in 0..sizes.alg {
                    resid[a0 + i] = vals[i] - sd.state[a0 + i];
                }
            }
        }
        if mode.has_differential() && sizes.diff > 0 {
            let d0 = self.offsets.diff_offset(mode);
            if d0 != NO_LOCATION {
                let mut vals = [0.0; 4];
                self.diff_derivs(inputs, sd, mode, &mut vals);
                for i in 0..sizes.diff {
                    resid[d0 + i] = vals[i] - sd.dstate_dt[d0 + i];
                }
            }
        }
    }

    pub(crate) fn eval_derivative(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        deriv: &mut [Real],
        mode: SolverMode,
    ) {
        let sizes = self.offsets.local_sizes(mode);
        if !mode.has_differential() || sizes.diff == 0 {
            return;
        }
        let d0 = self.offsets.diff_offset(mode);
        if d0 == NO_LOCATION {
            return;
        }
        let mut vals = [0.0; 4];
        self.diff_derivs(inputs, sd, mode, &mut vals);
        deriv[d0..d0 + sizes.diff].copy_from_slice(&vals[..sizes.diff]);
    }

    pub(crate) fn eval_algebraic(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        update: &mut [Real],
        mode: SolverMode,
        alpha: Real,
    ) {
        let sizes = self.offsets.local_sizes(mode);
        if !mode.has_algebraic() || sizes.alg == 0 {
            return;
        }
        let a0 = self.offsets.alg_offset(mode);
        if a0 == NO_LOCATION {
            return;
        }
        let mut vals = [0.0; 2];
        self.alg_updates(inputs, sd, mode, &mut vals);
        let relax = !sd.is_empty() && alpha > 0.0 && alpha < 1.0;
        for i in 0..sizes.alg {
            update[a0 + i] = if relax {
                let old = sd.state[a0 + i];
                old + alpha * (vals[i] - old)
            } else {
                vals[i]
            };
        }
    }

    pub(crate) fn eval_jacobian(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        input_locs: &[usize],
        sink: &mut dyn MatrixSink,
        mode: SolverMode,
    ) {
        let input = self.biased_input(inputs);
        let k = self.k;
        let cj = sd.cj;
        let u_col = input_locs.first().copied().unwrap_or(NO_LOCATION);

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
        let has_alg = a0 != NO_LOCATION;
        let has_diff = d0 != NO_LOCATION;
        // raw-state row bases past the limiter slots
        let a = a0.wrapping_add(self.limiter_alg);
        let dd = d0.wrapping_add(self.limiter_diff);

        match &self.kind {
            BlockKind::Gain => {}
            BlockKind::Delay { .. } if self.simplified => {
                if has_alg {
                    sink.assign(a, a, -1.0);
                    sink.assign_check_col(a, u_col, k);
                }
            }
            BlockKind::Delay { t1 } => {
                if has_diff {
                    sink.assign(dd, dd, -1.0 / t1 - cj);
                    sink.assign_check_col(dd, u_col, k / t1);
                }
            }
            BlockKind::Integral { .. } => {
                if has_diff {
                    sink.assign(dd, dd, -cj);
                    sink.assign_check_col(dd, u_col, k);
                }
            }
            BlockKind::FilteredDerivative { t1, t2 } => {
                if has_diff {
                    sink.assign(dd, dd, -1.0 / t2 - cj);
                    sink.assign(dd, dd + 1, -k / (t1 * t2));
                    sink.assign_check_col(dd, u_col, k / (t1 * t2));
                    sink.assign(dd + 1, dd + 1, -1.0 / t1 - cj);
                    sink.assign_check_col(dd + 1, u_col, 1.0 / t1);
                }
            }
            BlockKind::LeadLag { t1, t2 } => {
                if has_alg {
                    sink.assign(a, a, -1.0);
                    sink.assign_check_col(a, u_col, k * t2 / t1);
                    if has_diff {
                        sink.assign(a, dd, 1.0);
                    }
                }
                if has_diff {
                    sink.assign(dd, dd, -cj);
                    sink.assign_check_col(dd, u_col, k / t1);
                    if has_alg {
                        sink.assign(dd, a, -1.0 / t1);
                    }
                }
            }
            BlockKind::Derivative { t1 } => {
                if has_alg {
                    sink.assign(a, a, -1.0);
                    sink.assign_check_col(a, u_col, k / t1);
                    if has_diff {
                        sink.assign(a, dd, -k / t1);
                    }
                }
                if has_diff {
                    sink.assign(dd, dd, -1.0 / t1 - cj);
                    sink.assign_check_col(dd, u_col, 1.0 / t1);
                }
            }
            BlockKind::Pid { p, i, d, t1 } => {
                if has_alg {
                    sink.assign(a, a, -1.0);
                    let mut du = *p;
                    if *d != 0.0 {
                        du += d / t1;
                    }
                    sink.assign_check_col(a, u_col, k * du);
                    if has_diff {
                        sink.assign(a, dd, k * i);
                        if *d != 0.0 {
                            sink.assign(a, dd + 1, -k * d / t1);
                        }
                    }
                }
                if has_diff {
                    sink.assign(dd, dd, -cj);
                    sink.assign_check_col(dd, u_col, 1.0);
                    if *d != 0.0 {
                        sink.assign(dd + 1, dd + 1, -1.0 / t1 - cj);
                        sink.assign_check_col(dd + 1, u_col, 1.0 / t1);
                    }
                }
            }
            BlockKind::Deadband(_) => {
                let slope = match &self.deadband {
                    Some(db) => db.dout_din(input),
                    None => 1.0,
                };
                if self.differential_input {
                    if has_diff {
                        sink.assign(dd, dd, -cj);
                        // du/dt tracks u through the integrator scaling
                        sink.assign_check_col(dd, u_col, k * slope * cj);
                    }
                } else if has_alg {
                    sink.assign(a, a, -1.0);
                    sink.assign_check_col(a, u_col, k * slope);
                }
            }
        }

        // limiter rows
        if self.limiter_alg > 0 && has_alg {
            if let Some(vl) = &self.value_limiter {
                sink.assign(a0, a0, -1.0);
                if self.raw_sizes().0 > 0 {
                    sink.assign(a0, a0 + 1, vl.dout_din());
                } else {
                    sink.assign_check_col(a0, u_col, k * vl.dout_din());
                }
            }
        }
        if self.diff_output() && has_diff {
            let vl_on_diff = self.value_limiter.is_some();
            if let Some(rl) = &self.ramp_limiter {
                let r = d0 + usize::from(vl_on_diff);
                sink.assign(r, r, -cj);
                sink.assign(r, r + 1, cj * rl.dout_din());
            }
            if let Some(vl) = &self.value_limiter {
                sink.assign(d0, d0, -cj);
                sink.assign(d0, d0 + 1, cj * vl.dout_din());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{BlockConfig, DeadbandConfig};
    use gf_dae::{DynamicModel, OffsetBase, Triplets};

    fn ready(mut b: Block, input: Real) -> Block {
        let mut out = Vec::new();
        b.initialize_states(&[input], &[], &mut out).unwrap();
        let mode = SolverMode::dae(1);
        b.load_sizes(mode);
        let total = b.offsets().total(mode);
        b.set_offsets(OffsetBase::for_system(&total), mode);
        b
    }

    fn residual_norm(b: &Block, input: Real, mode: SolverMode) -> Real {
        let n = b.offsets().state_count(mode);
        let mut state = vec![0.0; n];
        let mut dstate = vec![0.0; n];
        b.guess_state(0.0, &mut state, &mut dstate, mode);
        let sd = StateData::new(0.0, &state, &dstate, 1.0);
        let mut resid = vec![0.0; n];
        b.residual(&[input], &sd, &mut resid, mode);
        resid.iter().map(|r| r.abs()).fold(0.0, Real::max)
    }

    #[test]
    fn initialized_blocks_sit_on_the_residual_zero() {
        let mode = SolverMode::dae(1);
        for kind in [
            BlockKind::delay(0.5),
            BlockKind::lead_lag(0.5, 0.1),
            BlockKind::Derivative { t1: 0.2 },
            BlockKind::FilteredDerivative { t1: 0.2, t2: 0.1 },
            BlockKind::Deadband(DeadbandConfig::symmetric(0.1)),
        ] {
            let b = ready(
                Block::new(BlockConfig::new(kind).with_gain(2.0)).unwrap(),
                0.7,
            );
            assert!(residual_norm(&b, 0.7, mode) < 1e-12);
        }
    }

    #[test]
    fn algebraic_update_settles_a_simplified_delay() {
        let mut b = Block::new(BlockConfig::new(BlockKind::delay(0.0)).with_gain(3.0)).unwrap();
        let mut out = Vec::new();
        b.initialize_states(&[1.0], &[], &mut out).unwrap();
        let mode = SolverMode::algebraic_only(1);
        b.load_sizes(mode);
        let total = b.offsets().total(mode);
        b.set_offsets(OffsetBase::for_system(&total), mode);

        let state = [0.0];
        let dstate = [0.0];
        let sd = StateData::new(0.0, &state, &dstate, 1.0);
        let mut update = [0.0];
        b.algebraic_update(&[2.0], &sd, &mut update, mode, 1.0);
        assert!((update[0] - 6.0).abs() < 1e-12);

        // half relaxation moves half way from the current value
        b.algebraic_update(&[2.0], &sd, &mut update, mode, 0.5);
        assert!((update[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn delay_jacobian_matches_the_hand_formula() {
        let b = ready(
            Block::new(BlockConfig::new(BlockKind::delay(0.5)).with_gain(2.0)).unwrap(),
            1.0,
        );
        let mode = SolverMode::dae(1);
        let state = [2.0];
        let dstate = [0.0];
        let sd = StateData::new(0.0, &state, &dstate, 3.0);
        let mut trips = Triplets::new();
        b.jacobian_elements(&[1.0], &sd, &[NO_LOCATION], &mut trips, mode);
        let got: Vec<_> = trips.iter().copied().collect();
        assert_eq!(got.len(), 1);
        let (row, col, val) = got[0];
        assert_eq!((row, col), (0, 0));
        assert!((val - (-1.0 / 0.5 - 3.0)).abs() < 1e-12);
    }

    #[test]
    fn lead_lag_jacobian_skips_cross_terms_in_partial_modes() {
        let b = ready(
            Block::new(BlockConfig::new(BlockKind::lead_lag(0.5, 0.1)).with_gain(2.0)).unwrap(),
            1.0,
        );
        let mut with_input = Triplets::new();
        let state = [2.0, 1.6];
        let dstate = [0.0, 0.0];
        let sd = StateData::new(0.0, &state, &dstate, 1.0);
        b.jacobian_elements(&[1.0], &sd, &[5], &mut with_input, SolverMode::dae(1));
        // y row: diag, input, x column; x row: diag, input, y column
        assert_eq!(with_input.len(), 6);

        let mut alg = b.clone();
        let mode = SolverMode::algebraic_only(2);
        alg.load_sizes(mode);
        let total = alg.offsets().total(mode);
        alg.set_offsets(OffsetBase::for_system(&total), mode);
        let state = [2.0];
        let sd = StateData::new(0.0, &state, &[], 1.0);
        let mut trips = Triplets::new();
        alg.jacobian_elements(&[1.0], &sd, &[NO_LOCATION], &mut trips, mode);
        for &(row, col, _) in trips.iter() {
            assert_eq!(row, 0);
            assert_eq!(col, 0);
        }
    }
}
