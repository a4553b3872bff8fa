//! Fixed-step explicit driver.
//!
//! Runs a model in decoupled step mode: every step calls `timestep` (the
//! model integrates its own states) and then `root_check` so limiters and
//! deadbands can flip between steps. Structural changes are reported back
//! to the caller rather than handled here; a `StateCountChange` means any
//! [`crate::SystemLayout`] built for the model is stale.

use gf_core::Real;
use gf_dae::{ChangeCode, CheckLevel, DynamicModel, SolverMode, StateData};
use tracing::{debug, trace};

use crate::error::{SolverError, SolverResult};

/// Options for a stepping run.
#[derive(Clone, Debug)]
pub struct DriveOptions {
    /// Start time (seconds)
    pub t_start: Real,
    /// Final time (seconds)
    pub t_end: Real,
    /// Fixed time step (seconds)
    pub dt: Real,
    /// Safety limit on step count
    pub max_steps: usize,
    /// Record every N-th step
    pub record_every: usize,
}

impl Default for DriveOptions {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_end: 1.0,
            dt: 1e-2,
            max_steps: 1_000_000,
            record_every: 1,
        }
    }
}

/// Record of a stepping run.
#[derive(Clone, Debug)]
pub struct DriveRecord {
    /// Time points (seconds)
    pub t: Vec<Real>,
    /// Model output at each recorded point
    pub y: Vec<Real>,
    /// Most disruptive change any root check reported
    pub worst_change: ChangeCode,
}

impl DriveRecord {
    pub fn last_output(&self) -> Real {
        self.y.last().copied().unwrap_or(0.0)
    }

    /// Recorded output nearest to `time`.
    pub fn output_at(&self, time: Real) -> Real {
        let mut best = 0;
        let mut dist = Real::INFINITY;
        for (i, &t) in self.t.iter().enumerate() {
            if (t - time).abs() < dist {
                dist = (t - time).abs();
                best = i;
            }
        }
        self.y.get(best).copied().unwrap_or(0.0)
    }
}

/// Step `model` from `t_start` to `t_end`, pulling inputs from `input_fn`
/// at every step time.
pub fn run_stepper<F>(
    model: &mut dyn DynamicModel,
    opts: &DriveOptions,
    mode: SolverMode,
    input_fn: F,
) -> SolverResult<DriveRecord>
where
    F: Fn(Real, &mut [Real]),
{
    if opts.dt <= 0.0 {
        return Err(SolverError::driver("dt must be positive"));
    }
    if opts.t_end < opts.t_start {
        return Err(SolverError::driver("t_end must be at or after t_start"));
    }
    if opts.max_steps == 0 || opts.record_every == 0 {
        return Err(SolverError::driver("max_steps and record_every must be positive"));
    }

    let mut inputs = vec![0.0; model.input_count().max(1)];
    let mut t = opts.t_start;
    input_fn(t, &mut inputs);

    let sd0 = StateData::empty(t);
    let mut t_record = vec![t];
    let mut y_record = vec![model.output(&inputs, &sd0, mode, 0)];
    let mut worst = ChangeCode::NoChange;

    let mut step = 0;
    while t < opts.t_end - 1e-12 && step < opts.max_steps {
        let next = (t + opts.dt).min(opts.t_end);
        input_fn(next, &mut inputs);
        let y = model.timestep(next, &inputs, mode);

        let sd = StateData::empty(next);
        let code = model.root_check(&inputs, &sd, CheckLevel::ReversibleOnly, mode);
        if code > ChangeCode::NoChange {
            debug!(time = next, ?code, "root check flipped a condition");
            worst = worst.max(code);
        }

        t = next;
        step += 1;
        trace!(time = t, output = y, "step");

        if step % opts.record_every == 0 {
            t_record.push(t);
            y_record.push(y);
        }
    }

    // Always record the final point
    if step % opts.record_every != 0 {
        let sd = StateData::empty(t);
        t_record.push(t);
        y_record.push(model.output(&inputs, &sd, mode, 0));
    }

    Ok(DriveRecord {
        t: t_record,
        y: y_record,
        worst_change: worst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestLag;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    #[test]
    fn stepper_tracks_a_first_order_response() {
        init_tracing();
        let mut lag = TestLag::new(0.5, 1.0);
        lag.prime(0.0);
        let opts = DriveOptions {
            t_end: 2.5,
            dt: 1e-2,
            ..DriveOptions::default()
        };
        let rec = run_stepper(&mut lag, &opts, SolverMode::local(), |_, u| u[0] = 1.0).unwrap();
        assert!((rec.output_at(0.5) - 0.632).abs() < 0.01);
        assert!((rec.last_output() - 0.993).abs() < 0.005);
        assert_eq!(rec.worst_change, ChangeCode::NoChange);
    }

    #[test]
    fn bad_options_are_rejected() {
        let mut lag = TestLag::new(0.5, 1.0);
        let opts = DriveOptions {
            dt: 0.0,
            ..DriveOptions::default()
        };
        assert!(run_stepper(&mut lag, &opts, SolverMode::local(), |_, _| {}).is_err());
    }

    #[test]
    fn decimation_still_records_the_final_point() {
        let mut lag = TestLag::new(0.5, 1.0);
        lag.prime(1.0);
        let opts = DriveOptions {
            t_end: 0.55,
            dt: 0.1,
            record_every: 4,
            ..DriveOptions::default()
        };
        let rec = run_stepper(&mut lag, &opts, SolverMode::local(), |_, u| u[0] = 1.0).unwrap();
        assert!((rec.t.last().copied().unwrap() - 0.55).abs() < 1e-9);
    }
}
