//! Deadband tracking, release hysteresis, and event idempotence.

use gf_blocks::{Block, BlockConfig, BlockKind, DeadbandConfig};
use gf_core::Real;
use gf_dae::{ChangeCode, CheckLevel, DynamicModel, SolverMode, StateData};
use gf_solver::{DriveOptions, run_stepper};

/// 0 -> 0.2 -> -0.2 -> 0 over four seconds.
fn ramp(t: Real) -> Real {
    if t <= 1.0 {
        0.2 * t
    } else if t <= 3.0 {
        0.2 - 0.2 * (t - 1.0)
    } else {
        -0.2 + 0.2 * (t - 3.0)
    }
}

fn db_block(shifted: bool) -> Block {
    let mut cfg = DeadbandConfig::symmetric(0.1);
    cfg.shifted = shifted;
    let mut b = Block::new(BlockConfig::new(BlockKind::Deadband(cfg))).unwrap();
    let mut out = Vec::new();
    b.initialize_states(&[0.0], &[], &mut out).unwrap();
    b
}

#[test]
fn deadband_tracks_and_releases_with_hysteresis() {
    let mut b = db_block(false);
    let opts = DriveOptions {
        t_end: 4.0,
        dt: 1e-2,
        ..DriveOptions::default()
    };
    let rec = run_stepper(&mut b, &opts, SolverMode::local(), |t, u| u[0] = ramp(t)).unwrap();

    // quiet inside the band
    assert!(rec.output_at(0.25).abs() < 1e-12);
    // tracking the input beyond +0.1, up and back down to the reset
    assert!((rec.output_at(0.75) - 0.15).abs() < 0.02);
    assert!((rec.output_at(1.25) - 0.15).abs() < 0.02);
    // released just inside the band, quiet through zero
    assert!(rec.output_at(1.8).abs() < 1e-12);
    assert!(rec.output_at(2.3).abs() < 1e-12);
    // same story on the low side
    assert!((rec.output_at(2.75) + 0.15).abs() < 0.02);
    assert!(rec.output_at(4.0).abs() < 1e-12);
}

#[test]
fn shifted_deadband_stays_continuous_at_the_edge() {
    let mut b = db_block(true);
    let opts = DriveOptions {
        t_end: 1.0,
        dt: 1e-2,
        ..DriveOptions::default()
    };
    let rec = run_stepper(&mut b, &opts, SolverMode::local(), |t, u| u[0] = ramp(t)).unwrap();
    assert!(rec.output_at(0.3).abs() < 1e-12);
    // outside, the output is the input shifted down by the band edge
    assert!((rec.output_at(0.75) - 0.05).abs() < 0.02);
    assert!((rec.last_output() - 0.1).abs() < 0.02);
}

#[test]
fn root_checks_are_idempotent_after_a_crossing() {
    let mut b = db_block(false);
    let mode = SolverMode::local();
    let sd = StateData::empty(0.0);

    let code = b.root_check(&[0.25], &sd, CheckLevel::ReversibleOnly, mode);
    assert_eq!(code, ChangeCode::ParameterChange);
    let code = b.root_check(&[0.25], &sd, CheckLevel::ReversibleOnly, mode);
    assert_eq!(code, ChangeCode::NoChange);

    // back inside the reset threshold and the same pattern repeats
    let code = b.root_check(&[0.05], &sd, CheckLevel::ReversibleOnly, mode);
    assert_eq!(code, ChangeCode::ParameterChange);
    assert_eq!(
        b.root_check(&[0.05], &sd, CheckLevel::ReversibleOnly, mode),
        ChangeCode::NoChange
    );
}

#[test]
fn trigger_takes_exactly_one_transition() {
    let mut b = db_block(false);
    let mode = SolverMode::local();
    let sd = StateData::empty(0.0);
    let mut roots = vec![0.0];

    b.root_test(&[0.05], &sd, &mut roots, mode);
    let inside = roots[0];
    b.root_test(&[0.15], &sd, &mut roots, mode);
    let outside = roots[0];
    assert!(
        inside > 0.0 && outside < 0.0,
        "crossing the band edge flips the root sign"
    );

    b.root_trigger(0.0, &[0.15], &[true], mode);
    b.root_test(&[0.15], &sd, &mut roots, mode);
    assert!(roots[0] > 0.0, "the trigger clears the crossing");
    assert!((b.output(&[0.15], &sd, mode, 0) - 0.15).abs() < 1e-9);
}
