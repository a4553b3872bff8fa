//! A cascade of blocks acting as one sub-model.
//!
//! Blocks are chained in declared order: each block's input is the output
//! of the one before it, and the sequence exposes the last block's output.
//! State, root, and Jacobian spans are the concatenation of the members'
//! spans, laid out by walking the offset cursor through the members. For
//! Jacobian assembly the input column of each member is resolved by
//! walking back over stateless members, accumulating their gains into a
//! chain-rule factor.

use gf_core::{NO_LOCATION, ParamError, ParamResult, Parameterized, Real};
use gf_dae::{
    ChangeCode, CheckLevel, ColumnRemap, DaeResult, DynamicModel, MatrixSink, OffsetBase,
    OffsetTable, REMAP_COLUMN, SolverMode, StateData, StateSizes,
};

use crate::block::Block;
use crate::kind::BlockKind;

#[derive(Clone, Debug)]
pub struct BlockSequence {
    name: String,
    blocks: Vec<Block>,
    offsets: OffsetTable,
    sample_time: Real,
    prev_time: Real,
}

impl BlockSequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            offsets: OffsetTable::new(),
            sample_time: Real::INFINITY,
            prev_time: 0.0,
        }
    }

    pub fn with_blocks(name: impl Into<String>, blocks: Vec<Block>) -> Self {
        let mut seq = Self::new(name);
        seq.blocks = blocks;
        seq
    }

    pub fn push(&mut self, block: Block) {
        self.offsets.unload();
        self.blocks.push(block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, idx: usize) -> Option<&Block> {
        self.blocks.get(idx)
    }

    pub fn block_mut(&mut self, idx: usize) -> Option<&mut Block> {
        self.blocks.get_mut(idx)
    }

    /// Column and chain-rule factor for member `i`'s input: the nearest
    /// stateful predecessor's output column, or the external input column,
    /// scaled by the gains of the stateless members walked over.
    fn input_col_chain(&self, i: usize, external: usize, mode: SolverMode) -> (usize, Real) {
        let mut factor = 1.0;
        let mut j = i;
        while j > 0 {
            let prev = &self.blocks[j - 1];
            let loc = prev.output_location(mode, 0);
            if loc != NO_LOCATION {
                return (loc, factor);
            }
            factor *= prev.gain();
            j -= 1;
        }
        (external, factor)
    }

    fn step_once(&mut self, time: Real, inputs: &[Real], mode: SolverMode) -> Real {
        let sd = StateData::empty(time);
        let mut u = inputs.first().copied().unwrap_or(0.0);
        let mut du = inputs.get(1).copied().unwrap_or(0.0);
        for b in &mut self.blocks {
            let y = b.timestep(time, &[u, du], mode);
            du = b.block_dout_dt(&sd, mode);
            u = y;
        }
        self.prev_time = time;
        u
    }
}

impl Parameterized for BlockSequence {
    fn set_param(&mut self, name: &str, value: Real) -> ParamResult {
        match name {
            "sampletime" | "sample_time" => {
                if value <= 0.0 {
                    return Err(ParamError::invalid(name, "must be positive"));
                }
                self.sample_time = value;
                Ok(())
            }
            _ => {
                for b in &mut self.blocks {
                    match b.set_param(name, value) {
                        Err(e) if e.is_unhandled() => continue,
                        other => return other,
                    }
                }
                Err(ParamError::unknown(name))
            }
        }
    }

    fn set_flag(&mut self, name: &str, value: bool) -> ParamResult {
        for b in &mut self.blocks {
            match b.set_flag(name, value) {
                Err(e) if e.is_unhandled() => continue,
                other => return other,
            }
        }
        Err(ParamError::unknown_flag(name))
    }
}

impl DynamicModel for BlockSequence {
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
        self.blocks.first().map_or(1, Block::input_count)
    }

    fn initialize_structure(&mut self) -> DaeResult<()> {
        for b in &mut self.blocks {
            b.initialize_structure()?;
        }
        // a deadband fed by a differential output watches the input rate
        for i in 1..self.blocks.len() {
            let feed_rate = self.blocks[i - 1].diff_output();
            let b = &mut self.blocks[i];
            if feed_rate
                && matches!(b.kind(), BlockKind::Deadband(_))
                && !b.differential_input
            {
                b.set_flag("differential_input", true)?;
                b.initialize_structure()?;
            }
        }
        let mut total = StateSizes::default();
        for b in &self.blocks {
            total.add(&b.offsets().local_sizes(SolverMode::local()));
        }
        self.offsets.unload();
        self.offsets
            .set_sizes(SolverMode::local(), StateSizes::default(), total);
        // members share one local span, so re-deal their local offsets
        let mut cursor = OffsetBase::for_system(&total);
        self.offsets.assign(SolverMode::local(), cursor);
        for b in &mut self.blocks {
            cursor = b.set_offsets(cursor, SolverMode::local());
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
            let mut u = inputs.first().copied().unwrap_or(0.0);
            let mut carry = Vec::new();
            for b in &mut self.blocks {
                b.initialize_states(&[u], &[], &mut carry)?;
                u = carry.first().copied().unwrap_or(u);
            }
            field_set.resize(1, 0.0);
            field_set[0] = u;
        } else {
            let mut want = desired[0];
            let mut carry = Vec::new();
            for b in self.blocks.iter_mut().rev() {
                b.initialize_states(&[], &[want], &mut carry)?;
                want = carry.first().copied().unwrap_or(want);
            }
            field_set.resize(1, 0.0);
            field_set[0] = want;
        }
        Ok(())
    }

    fn load_sizes(&mut self, mode: SolverMode) {
        if self.offsets.sizes_loaded(mode) {
            return;
        }
        let mut total = StateSizes::default();
        for b in &mut self.blocks {
            b.load_sizes(mode);
            total.add(&b.offsets().total(mode));
        }
        self.offsets.set_sizes(mode, StateSizes::default(), total);
    }

    fn set_offsets(&mut self, base: OffsetBase, mode: SolverMode) -> OffsetBase {
        self.load_sizes(mode);
        self.offsets.assign(mode, base);
        let mut cursor = base;
        for b in &mut self.blocks {
            cursor = b.set_offsets(cursor, mode);
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
        for b in &self.blocks {
            b.guess_state(time, state, dstate_dt, mode);
        }
    }

    fn set_state(&mut self, time: Real, state: &[Real], dstate_dt: &[Real], mode: SolverMode) {
        for b in &mut self.blocks {
            b.set_state(time, state, dstate_dt, mode);
        }
        self.prev_time = time;
    }

    fn residual(&self, inputs: &[Real], sd: &StateData<'_>, resid: &mut [Real], mode: SolverMode) {
        let mut u = inputs.first().copied().unwrap_or(0.0);
        let mut du = inputs.get(1).copied().unwrap_or(0.0);
        for b in &self.blocks {
            b.residual(&[u, du], sd, resid, mode);
            let y = b.block_output(sd, mode, u);
            du = b.block_dout_dt(sd, mode);
            u = y;
        }
    }

    fn derivative(&self, inputs: &[Real], sd: &StateData<'_>, deriv: &mut [Real], mode: SolverMode) {
        let mut u = inputs.first().copied().unwrap_or(0.0);
        let mut du = inputs.get(1).copied().unwrap_or(0.0);
        for b in &self.blocks {
            b.derivative(&[u, du], sd, deriv, mode);
            let y = b.block_output(sd, mode, u);
            du = b.block_dout_dt(sd, mode);
            u = y;
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
        let mut u = inputs.first().copied().unwrap_or(0.0);
        let mut du = inputs.get(1).copied().unwrap_or(0.0);
        for b in &self.blocks {
            b.algebraic_update(&[u, du], sd, update, mode, alpha);
            let y = b.block_output(sd, mode, u);
            du = b.block_dout_dt(sd, mode);
            u = y;
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
        let external = input_locs.first().copied().unwrap_or(NO_LOCATION);
        let mut u = inputs.first().copied().unwrap_or(0.0);
        let mut du = inputs.get(1).copied().unwrap_or(0.0);
        for (i, b) in self.blocks.iter().enumerate() {
            let (col, factor) = self.input_col_chain(i, external, mode);
            if factor == 1.0 {
                b.jacobian_elements(&[u, du], sd, &[col], sink, mode);
            } else {
                let targets = [(col, factor)];
                let mut remap = ColumnRemap::new(&mut *sink, &targets);
                b.jacobian_elements(&[u, du], sd, &[REMAP_COLUMN], &mut remap, mode);
            }
            let y = b.block_output(sd, mode, u);
            du = b.block_dout_dt(sd, mode);
            u = y;
        }
    }

    fn root_test(&self, inputs: &[Real], sd: &StateData<'_>, roots: &mut [Real], mode: SolverMode) {
        let mut u = inputs.first().copied().unwrap_or(0.0);
        let mut du = inputs.get(1).copied().unwrap_or(0.0);
        for b in &self.blocks {
            b.root_test(&[u, du], sd, roots, mode);
            let y = b.block_output(sd, mode, u);
            du = b.block_dout_dt(sd, mode);
            u = y;
        }
    }

    fn root_trigger(&mut self, time: Real, inputs: &[Real], root_mask: &[bool], mode: SolverMode) {
        let sd = StateData::empty(time);
        let mut u = inputs.first().copied().unwrap_or(0.0);
        let mut du = inputs.get(1).copied().unwrap_or(0.0);
        for b in &mut self.blocks {
            b.root_trigger(time, &[u, du], root_mask, mode);
            let y = b.block_output(&sd, mode, u);
            du = b.block_dout_dt(&sd, mode);
            u = y;
        }
    }

    fn root_check(
        &mut self,
        inputs: &[Real],
        sd: &StateData<'_>,
        level: CheckLevel,
        mode: SolverMode,
    ) -> ChangeCode {
        let mut code = ChangeCode::NoChange;
        let mut u = inputs.first().copied().unwrap_or(0.0);
        let mut du = inputs.get(1).copied().unwrap_or(0.0);
        for b in &mut self.blocks {
            code = code.max(b.root_check(&[u, du], sd, level, mode));
            let y = b.block_output(sd, mode, u);
            du = b.block_dout_dt(sd, mode);
            u = y;
        }
        code
    }

    fn timestep(&mut self, time: Real, inputs: &[Real], mode: SolverMode) -> Real {
        if self.sample_time.is_finite() {
            let mut ct = self.prev_time + self.sample_time;
            while ct < time {
                self.step_once(ct, inputs, mode);
                ct += self.sample_time;
            }
        }
        self.step_once(time, inputs, mode)
    }

    fn output(&self, inputs: &[Real], sd: &StateData<'_>, mode: SolverMode, _num: usize) -> Real {
        let mut u = inputs.first().copied().unwrap_or(0.0);
        for b in &self.blocks {
            u = b.block_output(sd, mode, u);
        }
        u
    }

    fn output_location(&self, mode: SolverMode, num: usize) -> usize {
        self.blocks
            .last()
            .map_or(NO_LOCATION, |b| b.output_location(mode, num))
    }

    fn state_index(&self, field: &str, mode: SolverMode) -> usize {
        for b in &self.blocks {
            let idx = b.state_index(field, mode);
            if idx != NO_LOCATION {
                return idx;
            }
        }
        NO_LOCATION
    }

    fn local_state_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for b in &self.blocks {
            for n in b.local_state_names() {
                names.push(format!("{}.{}", b.name(), n));
            }
        }
        names
    }
}
