//! Global system layout: sizing, offset assignment, state allocation.

use gf_core::Real;
use gf_dae::{DynamicModel, OffsetBase, SolverMode, StateData, StateSizes};
use tracing::debug;

use crate::error::{SolverError, SolverResult};

/// Owns the global state vectors for one solver mode and keeps them in
/// step with a model tree.
///
/// Building a layout walks the tree once: structure initialization if it
/// has not happened, size loading for the mode, offset assignment from a
/// zero cursor, then a `guess_state` pull into freshly allocated vectors.
/// After a structural change (`StateCountChange`) the layout is stale and
/// must be rebuilt.
pub struct SystemLayout {
    mode: SolverMode,
    sizes: StateSizes,
    pub state: Vec<Real>,
    pub dstate_dt: Vec<Real>,
}

impl SystemLayout {
    pub fn build(
        model: &mut dyn DynamicModel,
        time: Real,
        mode: SolverMode,
    ) -> SolverResult<Self> {
        if !model.offsets().sizes_loaded(SolverMode::local()) {
            model.initialize_structure()?;
        }
        model.load_sizes(mode);
        let sizes = model.offsets().total(mode);

        let mut expected = OffsetBase::for_system(&sizes);
        let consumed = model.set_offsets(OffsetBase::for_system(&sizes), mode);
        expected.advance(&sizes);
        if consumed != expected {
            return Err(SolverError::layout(format!(
                "model '{}' claimed offsets through {:?} but reported sizes ending at {:?}",
                model.name(),
                consumed,
                expected
            )));
        }

        let n = sizes.total();
        debug!(
            model = model.name(),
            mode = mode.index,
            states = n,
            roots = sizes.roots(),
            "system layout built"
        );
        let mut layout = Self {
            mode,
            sizes,
            state: vec![0.0; n],
            dstate_dt: vec![0.0; n],
        };
        layout.pull(model, time);
        Ok(layout)
    }

    pub fn mode(&self) -> SolverMode {
        self.mode
    }

    pub fn sizes(&self) -> &StateSizes {
        &self.sizes
    }

    pub fn state_count(&self) -> usize {
        self.sizes.total()
    }

    pub fn root_count(&self) -> usize {
        self.sizes.roots()
    }

    /// Refresh the vectors from the model's local caches.
    pub fn pull(&mut self, model: &dyn DynamicModel, time: Real) {
        model.guess_state(time, &mut self.state, &mut self.dstate_dt, self.mode);
    }

    /// Push solver-approved values back into the model.
    pub fn push(&self, model: &mut dyn DynamicModel, time: Real) {
        model.set_state(time, &self.state, &self.dstate_dt, self.mode);
    }

    /// Borrow the vectors as a solver guess at `time` with weight `cj`.
    pub fn state_data(&self, time: Real, cj: Real) -> StateData<'_> {
        StateData::new(time, &self.state, &self.dstate_dt, cj)
    }
}
