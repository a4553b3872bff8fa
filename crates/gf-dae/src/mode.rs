//! Solver-mode tags for partitioned DAE evaluation.

/// Identifies which state partitions a solver works with and which slot of
/// each model's offset table belongs to it.
///
/// Index 0 is reserved for the local mode every model carries for its own
/// cached states; outer solvers use indices 1 and up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SolverMode {
    pub index: usize,
    pub algebraic: bool,
    pub differential: bool,
    pub local: bool,
}

impl SolverMode {
    pub const fn local() -> Self {
        Self {
            index: 0,
            algebraic: true,
            differential: true,
            local: true,
        }
    }

    pub const fn dae(index: usize) -> Self {
        Self {
            index,
            algebraic: true,
            differential: true,
            local: false,
        }
    }

    pub const fn algebraic_only(index: usize) -> Self {
        Self {
            index,
            algebraic: true,
            differential: false,
            local: false,
        }
    }

    pub const fn differential_only(index: usize) -> Self {
        Self {
            index,
            algebraic: false,
            differential: true,
            local: false,
        }
    }

    pub fn has_algebraic(&self) -> bool {
        self.algebraic
    }

    pub fn has_differential(&self) -> bool {
        self.differential
    }

    pub fn is_algebraic_only(&self) -> bool {
        self.algebraic && !self.differential
    }

    pub fn is_differential_only(&self) -> bool {
        self.differential && !self.algebraic
    }

    pub fn is_local(&self) -> bool {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_queries() {
        let dae = SolverMode::dae(1);
        assert!(dae.has_algebraic() && dae.has_differential());
        assert!(!dae.is_algebraic_only() && !dae.is_differential_only());

        let alg = SolverMode::algebraic_only(2);
        assert!(alg.is_algebraic_only());
        assert!(!alg.has_differential());

        let diff = SolverMode::differential_only(3);
        assert!(diff.is_differential_only());
        assert!(!diff.has_algebraic());
    }

    #[test]
    fn local_mode_is_slot_zero() {
        let local = SolverMode::local();
        assert_eq!(local.index, 0);
        assert!(local.is_local());
        assert!(!SolverMode::dae(1).is_local());
    }
}
