//! Test fixture models.

use gf_core::{NO_LOCATION, ParamError, ParamResult, Parameterized, Real};
use gf_dae::{
    ChangeCode, CheckLevel, DaeResult, DynamicModel, MatrixSink, OffsetBase, OffsetTable,
    SolverMode, StateData, StateSizes,
};

/// First-order lag `K u / (1 + T1 s)` with one differential state; the
/// smallest honest model the layout, Jacobian, and driver paths can
/// exercise without reaching outside this crate.
pub(crate) struct TestLag {
    t1: Real,
    k: Real,
    x: Real,
    dx: Real,
    prev_time: Real,
    offsets: OffsetTable,
}

impl TestLag {
    pub(crate) fn new(t1: Real, k: Real) -> Self {
        Self {
            t1,
            k,
            x: 0.0,
            dx: 0.0,
            prev_time: 0.0,
            offsets: OffsetTable::new(),
        }
    }

    /// Settle at the steady state for input `u`.
    pub(crate) fn prime(&mut self, u: Real) {
        self.x = self.k * u;
        self.dx = 0.0;
    }
}

impl Parameterized for TestLag {
    fn set_param(&mut self, name: &str, value: Real) -> ParamResult {
        match name {
            "t1" => {
                self.t1 = value;
                Ok(())
            }
            "k" | "gain" => {
                self.k = value;
                Ok(())
            }
            _ => Err(ParamError::unknown(name)),
        }
    }
}

impl DynamicModel for TestLag {
    fn name(&self) -> &str {
        "test_lag"
    }

    fn offsets(&self) -> &OffsetTable {
        &self.offsets
    }

    fn offsets_mut(&mut self) -> &mut OffsetTable {
        &mut self.offsets
    }

    fn input_count(&self) -> usize {
        1
    }

    fn initialize_structure(&mut self) -> DaeResult<()> {
        let sizes = StateSizes {
            diff: 1,
            jac: 2,
            ..StateSizes::default()
        };
        self.offsets.unload();
        self.offsets.set_sizes(SolverMode::local(), sizes, sizes);
        Ok(())
    }

    fn initialize_states(
        &mut self,
        inputs: &[Real],
        desired: &[Real],
        field_set: &mut Vec<Real>,
    ) -> DaeResult<()> {
        field_set.resize(1, 0.0);
        if let Some(&want) = desired.first() {
            self.x = want;
            field_set[0] = want / self.k;
        } else {
            self.prime(inputs.first().copied().unwrap_or(0.0));
            field_set[0] = self.x;
        }
        self.dx = 0.0;
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
        let d = self.offsets.diff_offset(mode);
        if d != NO_LOCATION {
            state[d] = self.x;
            dstate_dt[d] = self.dx;
        }
    }

    fn set_state(&mut self, time: Real, state: &[Real], dstate_dt: &[Real], mode: SolverMode) {
        let d = self.offsets.diff_offset(mode);
        if d != NO_LOCATION {
            self.x = state[d];
            self.dx = dstate_dt[d];
        }
        self.prev_time = time;
    }

    fn residual(&self, inputs: &[Real], sd: &StateData<'_>, resid: &mut [Real], mode: SolverMode) {
        let d = self.offsets.diff_offset(mode);
        if d == NO_LOCATION || sd.is_empty() {
            return;
        }
        let u = inputs.first().copied().unwrap_or(0.0);
        resid[d] = (self.k * u - sd.state[d]) / self.t1 - sd.dstate_dt[d];
    }

    fn derivative(&self, inputs: &[Real], sd: &StateData<'_>, deriv: &mut [Real], mode: SolverMode) {
        let d = self.offsets.diff_offset(mode);
        if d == NO_LOCATION {
            return;
        }
        let u = inputs.first().copied().unwrap_or(0.0);
        let x = if sd.is_empty() { self.x } else { sd.state[d] };
        deriv[d] = (self.k * u - x) / self.t1;
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
        _inputs: &[Real],
        sd: &StateData<'_>,
        input_locs: &[usize],
        sink: &mut dyn MatrixSink,
        mode: SolverMode,
    ) {
        let d = self.offsets.diff_offset(mode);
        if d == NO_LOCATION {
            return;
        }
        sink.assign(d, d, -1.0 / self.t1 - sd.cj);
        let u_col = input_locs.first().copied().unwrap_or(NO_LOCATION);
        sink.assign_check_col(d, u_col, self.k / self.t1);
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
            let u = inputs.first().copied().unwrap_or(0.0);
            self.dx = (self.k * u - self.x) / self.t1;
            self.x += self.dx * dt;
        }
        self.prev_time = time;
        self.x
    }

    fn output(&self, _inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, _num: usize) -> Real {
        let d = self.offsets.diff_offset(mode);
        if d == NO_LOCATION || sd.is_empty() {
            self.x
        } else {
            sd.state[d]
        }
    }

    fn output_location(&self, mode: SolverMode, _num: usize) -> usize {
        self.offsets.diff_offset(mode)
    }

    fn local_state_names(&self) -> Vec<String> {
        vec!["x".to_string()]
    }
}
