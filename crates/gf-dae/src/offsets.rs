//! State counting and per-mode offset bookkeeping.
//!
//! Every model owns an [`OffsetTable`] with one slot per solver mode.
//! `load_sizes` fills in the slot's counts (masked to the mode's active
//! partitions), `set_offsets` assigns global indices through an
//! [`OffsetBase`] cursor, and the accessors answer [`NO_LOCATION`] for
//! anything inactive or not yet assigned.

use crate::SolverMode;

pub use gf_core::NO_LOCATION;

/// State, root, and Jacobian-entry counts for one model, alone (`local`)
/// or including its sub-models (`total`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateSizes {
    pub alg: usize,
    pub diff: usize,
    pub alg_roots: usize,
    pub diff_roots: usize,
    pub jac: usize,
}

impl StateSizes {
    pub fn total(&self) -> usize {
        self.alg + self.diff
    }

    pub fn roots(&self) -> usize {
        self.alg_roots + self.diff_roots
    }

    pub fn add(&mut self, other: &StateSizes) {
        self.alg += other.alg;
        self.diff += other.diff;
        self.alg_roots += other.alg_roots;
        self.diff_roots += other.diff_roots;
        self.jac += other.jac;
    }

    /// Zero the partitions `mode` does not solve. The Jacobian count is an
    /// allocation bound and stays unmasked.
    pub fn masked(mut self, mode: SolverMode) -> StateSizes {
        if !mode.has_algebraic() {
            self.alg = 0;
            self.alg_roots = 0;
        }
        if !mode.has_differential() {
            self.diff = 0;
            self.diff_roots = 0;
        }
        self
    }
}

/// One mode slot of an [`OffsetTable`].
#[derive(Clone, Copy, Debug)]
pub struct SolverOffsets {
    pub alg_offset: usize,
    pub diff_offset: usize,
    pub root_offset: usize,
    /// Counts owned directly by the model.
    pub local: StateSizes,
    /// Counts including all sub-models.
    pub total: StateSizes,
    pub sizes_loaded: bool,
    pub offsets_loaded: bool,
}

impl Default for SolverOffsets {
    fn default() -> Self {
        Self {
            alg_offset: NO_LOCATION,
            diff_offset: NO_LOCATION,
            root_offset: NO_LOCATION,
            local: StateSizes::default(),
            total: StateSizes::default(),
            sizes_loaded: false,
            offsets_loaded: false,
        }
    }
}

impl SolverOffsets {
    pub fn unload(&mut self) {
        *self = Self::default();
    }
}

/// Cursor for assigning global offsets across a model tree.
///
/// The global state layout per mode is the algebraic partition followed by
/// the differential partition; roots count in their own vector. A parent
/// claims its own slots first, then advances the cursor through each child
/// in declared order, so the local-to-global translation lives here and
/// nowhere else.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OffsetBase {
    pub alg: usize,
    pub diff: usize,
    pub root: usize,
}

impl OffsetBase {
    /// Starting cursor for a system whose mode-masked totals are `sizes`.
    pub fn for_system(sizes: &StateSizes) -> Self {
        Self {
            alg: 0,
            diff: sizes.alg,
            root: 0,
        }
    }

    pub fn advance(&mut self, sizes: &StateSizes) {
        self.alg += sizes.alg;
        self.diff += sizes.diff;
        self.root += sizes.roots();
    }
}

/// Per-mode offset slots for one model, indexed by [`SolverMode::index`].
#[derive(Clone, Debug)]
pub struct OffsetTable {
    slots: Vec<SolverOffsets>,
}

impl Default for OffsetTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OffsetTable {
    pub fn new() -> Self {
        Self {
            slots: vec![SolverOffsets::default()],
        }
    }

    fn slot(&self, mode: SolverMode) -> Option<&SolverOffsets> {
        self.slots.get(mode.index)
    }

    pub fn slot_mut(&mut self, mode: SolverMode) -> &mut SolverOffsets {
        if mode.index >= self.slots.len() {
            self.slots.resize_with(mode.index + 1, SolverOffsets::default);
        }
        &mut self.slots[mode.index]
    }

    pub fn local(&self) -> &SolverOffsets {
        &self.slots[0]
    }

    pub fn local_mut(&mut self) -> &mut SolverOffsets {
        &mut self.slots[0]
    }

    pub fn sizes_loaded(&self, mode: SolverMode) -> bool {
        self.slot(mode).is_some_and(|s| s.sizes_loaded)
    }

    pub fn offsets_loaded(&self, mode: SolverMode) -> bool {
        self.slot(mode).is_some_and(|s| s.offsets_loaded)
    }

    /// Counts for this model alone in `mode`, zero if sizes are unloaded.
    pub fn local_sizes(&self, mode: SolverMode) -> StateSizes {
        match self.slot(mode) {
            Some(s) if s.sizes_loaded => s.local,
            _ => StateSizes::default(),
        }
    }

    /// Counts including sub-models in `mode`, zero if sizes are unloaded.
    pub fn total(&self, mode: SolverMode) -> StateSizes {
        match self.slot(mode) {
            Some(s) if s.sizes_loaded => s.total,
            _ => StateSizes::default(),
        }
    }

    pub fn state_count(&self, mode: SolverMode) -> usize {
        self.total(mode).total()
    }

    pub fn root_count(&self, mode: SolverMode) -> usize {
        self.total(mode).roots()
    }

    pub fn alg_offset(&self, mode: SolverMode) -> usize {
        match self.slot(mode) {
            Some(s) if s.offsets_loaded && mode.has_algebraic() => s.alg_offset,
            _ => NO_LOCATION,
        }
    }

    pub fn diff_offset(&self, mode: SolverMode) -> usize {
        match self.slot(mode) {
            Some(s) if s.offsets_loaded && mode.has_differential() => s.diff_offset,
            _ => NO_LOCATION,
        }
    }

    pub fn root_offset(&self, mode: SolverMode) -> usize {
        match self.slot(mode) {
            Some(s) if s.offsets_loaded => s.root_offset,
            _ => NO_LOCATION,
        }
    }

    /// Record mode-masked counts for `mode`.
    pub fn set_sizes(&mut self, mode: SolverMode, local: StateSizes, total: StateSizes) {
        let slot = self.slot_mut(mode);
        slot.local = local;
        slot.total = total;
        slot.sizes_loaded = true;
    }

    /// Assign this model's global offsets for `mode` from the cursor.
    pub fn assign(&mut self, mode: SolverMode, base: OffsetBase) {
        let slot = self.slot_mut(mode);
        slot.alg_offset = base.alg;
        slot.diff_offset = base.diff;
        slot.root_offset = base.root;
        slot.offsets_loaded = true;
    }

    /// Forget every slot. Required after any structural change; the next
    /// `load_sizes`/`set_offsets` pass rebuilds the table.
    pub fn unload(&mut self) {
        for s in &mut self.slots {
            s.unload();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes(alg: usize, diff: usize, alg_roots: usize, diff_roots: usize) -> StateSizes {
        StateSizes {
            alg,
            diff,
            alg_roots,
            diff_roots,
            jac: 0,
        }
    }

    #[test]
    fn masking_follows_the_mode_partitions() {
        let s = sizes(2, 3, 1, 1);
        let alg = s.masked(SolverMode::algebraic_only(1));
        assert_eq!((alg.alg, alg.diff, alg.alg_roots, alg.diff_roots), (2, 0, 1, 0));
        let diff = s.masked(SolverMode::differential_only(2));
        assert_eq!((diff.alg, diff.diff, diff.alg_roots, diff.diff_roots), (0, 3, 0, 1));
        let dae = s.masked(SolverMode::dae(3));
        assert_eq!(dae, s);
    }

    #[test]
    fn accessors_answer_no_location_until_assigned() {
        let mode = SolverMode::dae(1);
        let mut table = OffsetTable::new();
        assert_eq!(table.alg_offset(mode), NO_LOCATION);
        assert_eq!(table.diff_offset(mode), NO_LOCATION);
        assert_eq!(table.root_offset(mode), NO_LOCATION);

        let s = sizes(1, 2, 0, 1);
        table.set_sizes(mode, s, s);
        assert_eq!(table.alg_offset(mode), NO_LOCATION);

        table.assign(mode, OffsetBase { alg: 4, diff: 7, root: 2 });
        assert_eq!(table.alg_offset(mode), 4);
        assert_eq!(table.diff_offset(mode), 7);
        assert_eq!(table.root_offset(mode), 2);
    }

    #[test]
    fn inactive_partition_is_masked_at_the_accessor() {
        let mode = SolverMode::algebraic_only(1);
        let mut table = OffsetTable::new();
        let s = sizes(2, 0, 0, 0);
        table.set_sizes(mode, s, s);
        table.assign(mode, OffsetBase { alg: 0, diff: 2, root: 0 });
        assert_eq!(table.alg_offset(mode), 0);
        assert_eq!(table.diff_offset(mode), NO_LOCATION);
    }

    #[test]
    fn accessors_are_stable_across_repeated_calls() {
        let mode = SolverMode::dae(1);
        let mut table = OffsetTable::new();
        let s = sizes(1, 1, 1, 0);
        table.set_sizes(mode, s, s);
        table.assign(mode, OffsetBase { alg: 3, diff: 5, root: 1 });
        let first = (table.alg_offset(mode), table.diff_offset(mode), table.root_offset(mode));
        let second = (table.alg_offset(mode), table.diff_offset(mode), table.root_offset(mode));
        assert_eq!(first, second);
    }

    #[test]
    fn unload_forgets_everything() {
        let mode = SolverMode::dae(1);
        let mut table = OffsetTable::new();
        let s = sizes(1, 1, 0, 0);
        table.set_sizes(mode, s, s);
        table.assign(mode, OffsetBase::for_system(&s));
        table.unload();
        assert!(!table.sizes_loaded(mode));
        assert_eq!(table.alg_offset(mode), NO_LOCATION);
        assert_eq!(table.state_count(mode), 0);
    }

    #[test]
    fn cursor_walks_both_partitions() {
        let total = sizes(3, 4, 1, 1);
        let mut base = OffsetBase::for_system(&total);
        assert_eq!(base, OffsetBase { alg: 0, diff: 3, root: 0 });
        base.advance(&sizes(2, 1, 1, 0));
        assert_eq!(base, OffsetBase { alg: 2, diff: 4, root: 1 });
        base.advance(&sizes(1, 3, 0, 1));
        assert_eq!(base, OffsetBase { alg: 3, diff: 7, root: 2 });
    }
}
