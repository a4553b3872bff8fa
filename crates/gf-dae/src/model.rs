//! The DynamicModel trait: what an implicit DAE solver needs from a model.

use gf_core::{Parameterized, Real};

use crate::{
    ChangeCode, CheckLevel, DaeResult, MatrixSink, OffsetBase, OffsetTable, SolverMode, StateData,
};

/// A dynamic sub-model (a transfer-function block, a machine, an exciter,
/// a governor, or a composite of those) seen from the solver side.
///
/// Lifecycle: `initialize_structure` decides state counts and discrete
/// configuration, `initialize_states` computes consistent initial values
/// from terminal inputs and desired steady outputs, then for every solver
/// mode `load_sizes` and `set_offsets` place the model's states in the
/// global vectors before `guess_state` seeds them.
///
/// Solve-path calls (`residual`, `derivative`, `algebraic_update`,
/// `jacobian_elements`, `root_test`, `output`) take `&self` and must not
/// mutate anything observable: the solver calls them at trial states in
/// any order and expects identical answers for identical arguments. Only
/// `root_trigger`, `root_check`, `timestep`, and `set_state` mutate.
///
/// Jacobian convention: a differential state's own row carries `-cj` on
/// its diagonal (the residual is written `f(x) - dx/dt`), an algebraic
/// row carries `-1`.
pub trait DynamicModel: Parameterized {
    fn name(&self) -> &str;

    fn offsets(&self) -> &OffsetTable;

    fn offsets_mut(&mut self) -> &mut OffsetTable;

    fn input_count(&self) -> usize;

    fn output_count(&self) -> usize {
        1
    }

    /// Decide state counts and discrete configuration. Re-runnable after
    /// a structural parameter change once offsets were unloaded.
    fn initialize_structure(&mut self) -> DaeResult<()>;

    /// Compute consistent initial states.
    ///
    /// With `desired` empty the model initializes from `inputs` and writes
    /// its resulting outputs into `field_set`; with `desired` given the
    /// model works backwards and writes the inputs it requires to hold
    /// those outputs (resizing `field_set` as needed).
    fn initialize_states(
        &mut self,
        inputs: &[Real],
        desired: &[Real],
        field_set: &mut Vec<Real>,
    ) -> DaeResult<()>;

    /// Fill in this model's counts for `mode`. Idempotent until the offset
    /// table is unloaded.
    fn load_sizes(&mut self, mode: SolverMode);

    /// Assign global offsets for `mode` starting at `base`; returns the
    /// cursor advanced past everything this model and its sub-models
    /// claimed.
    fn set_offsets(&mut self, base: OffsetBase, mode: SolverMode) -> OffsetBase;

    /// Write locally cached states into the global vectors.
    fn guess_state(&self, time: Real, state: &mut [Real], dstate_dt: &mut [Real], mode: SolverMode);

    /// Accept solver-approved values back into the local caches.
    fn set_state(&mut self, time: Real, state: &[Real], dstate_dt: &[Real], mode: SolverMode);

    /// DAE residual for every state this model owns in `mode`.
    fn residual(&self, inputs: &[Real], sd: &StateData<'_>, resid: &mut [Real], mode: SolverMode);

    /// Time derivatives of the differential states.
    fn derivative(&self, inputs: &[Real], sd: &StateData<'_>, deriv: &mut [Real], mode: SolverMode);

    /// Updated values for the algebraic states, under-relaxed by `alpha`
    /// where a model supports it.
    fn algebraic_update(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        update: &mut [Real],
        mode: SolverMode,
        alpha: Real,
    );

    /// Emit all partial derivatives for this model's rows. `input_locs`
    /// gives the global column of each input, [`crate::NO_LOCATION`] for
    /// inputs outside the state vector.
    fn jacobian_elements(
        &self,
        inputs: &[Real],
        sd: &StateData<'_>,
        input_locs: &[usize],
        sink: &mut dyn MatrixSink,
        mode: SolverMode,
    );

    /// Write root (event) function values; each crosses zero when its
    /// discrete condition should flip.
    fn root_test(&self, inputs: &[Real], sd: &StateData<'_>, roots: &mut [Real], mode: SolverMode);

    /// Take the discrete transitions for the roots flagged in `root_mask`
    /// (indexed globally). Exactly one transition per flagged root.
    fn root_trigger(&mut self, time: Real, inputs: &[Real], root_mask: &[bool], mode: SolverMode);

    /// Cheap limit recheck between Newton iterations; repeats internally
    /// until stable and reports the most disruptive change it made.
    fn root_check(
        &mut self,
        inputs: &[Real],
        sd: &StateData<'_>,
        level: CheckLevel,
        mode: SolverMode,
    ) -> ChangeCode;

    /// Advance local states explicitly to `time` and return the output.
    fn timestep(&mut self, time: Real, inputs: &[Real], mode: SolverMode) -> Real;

    fn output(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, num: usize) -> Real;

    fn outputs(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode) -> Vec<Real> {
        (0..self.output_count())
            .map(|num| self.output(inputs, sd, mode, num))
            .collect()
    }

    /// Global state index of output `num`, [`crate::NO_LOCATION`] when the
    /// output is not a state in `mode`.
    fn output_location(&self, mode: SolverMode, num: usize) -> usize;

    /// Global state index of a named internal quantity ("pm", "freq", ...),
    /// [`crate::NO_LOCATION`] when unknown or not a state in `mode`.
    fn state_index(&self, field: &str, mode: SolverMode) -> usize {
        let _ = (field, mode);
        gf_core::NO_LOCATION
    }

    /// Human-readable names of the locally owned states, in local order.
    fn local_state_names(&self) -> Vec<String>;
}
