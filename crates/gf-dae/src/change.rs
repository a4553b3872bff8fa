//! Change codes reported by discrete-event checks.

/// What a `root_check` (or sub-model substitution) changed, ordered from
/// least to most disruptive so parents can combine children with `max`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeCode {
    #[default]
    NoChange,
    /// Internal bookkeeping moved; no state value changed.
    NonStateChange,
    /// State or parameter values changed; residuals must be refreshed.
    ParameterChange,
    /// The Jacobian sparsity or values changed structurally.
    JacobianChange,
    /// State counts changed; offsets must be reloaded before the next solve.
    StateCountChange,
}

/// How aggressive a mid-solve limit recheck may be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckLevel {
    /// Only release limits that can disengage without a discontinuity.
    ReversibleOnly,
    /// Engage and release anything whose condition holds.
    FullCheck,
}
