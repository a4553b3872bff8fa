//! Borrowed view of the solver's current guess.

use gf_core::Real;

/// Snapshot handed to every solve-path call: the proposed state vector,
/// its time derivative, the solve time, and the Newton scaling factor
/// `cj` that multiplies the diagonal of differential Jacobian rows.
///
/// An empty view (no state slices) tells a model to answer from its own
/// locally cached states instead.
#[derive(Clone, Copy, Debug)]
pub struct StateData<'a> {
    pub time: Real,
    pub state: &'a [Real],
    pub dstate_dt: &'a [Real],
    pub cj: Real,
    pub seq_id: u64,
}

impl<'a> StateData<'a> {
    pub fn new(time: Real, state: &'a [Real], dstate_dt: &'a [Real], cj: Real) -> Self {
        Self {
            time,
            state,
            dstate_dt,
            cj,
            seq_id: 0,
        }
    }

    pub fn with_seq(mut self, seq_id: u64) -> Self {
        self.seq_id = seq_id;
        self
    }

    pub fn empty(time: Real) -> StateData<'static> {
        StateData {
            time,
            state: &[],
            dstate_dt: &[],
            cj: 1.0,
            seq_id: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_views_report_empty() {
        assert!(StateData::empty(0.0).is_empty());
        let x = [1.0, 2.0];
        let dx = [0.0, 0.0];
        assert!(!StateData::new(0.0, &x, &dx, 1.0).is_empty());
    }

    #[test]
    fn seq_id_rides_along() {
        let x = [1.0];
        let dx = [0.0];
        let sd = StateData::new(2.0, &x, &dx, 0.5).with_seq(7);
        assert_eq!(sd.seq_id, 7);
        assert_eq!(sd.cj, 0.5);
    }
}
