//! Composed generators initialized from a terminal power flow must sit
//! still: every residual row is zero across full and partitioned solver
//! modes, and the terminal outputs reproduce the requested power.

use gf_core::Real;
use gf_dae::{DynamicModel, SolverMode};
use gf_devices::{DynamicGenerator, Exciter, Governor, Machine};
use gf_solver::{SystemLayout, residual_vector};

const TOL: Real = 1e-9;

fn compositions() -> Vec<DynamicGenerator> {
    vec![
        DynamicGenerator::new("bare").with_machine(Machine::classical()),
        DynamicGenerator::new("regulated")
            .with_machine(Machine::fourth_order())
            .with_exciter(Exciter::ieee_type1()),
        DynamicGenerator::new("full")
            .with_machine(Machine::classical())
            .with_exciter(Exciter::basic())
            .with_governor(Governor::droop()),
        DynamicGenerator::new("thermal")
            .with_machine(Machine::fourth_order())
            .with_exciter(Exciter::basic())
            .with_governor(Governor::tgov1()),
    ]
}

#[test]
fn initialized_generators_are_steady_in_every_mode() {
    for mut r#gen in compositions() {
        let mut out = Vec::new();
        r#gen.initialize_states(&[1.01, 0.05], &[0.6, 0.12], &mut out)
            .unwrap();
        assert_eq!(out, vec![0.6, 0.12]);
        for mode in [
            SolverMode::dae(1),
            SolverMode::algebraic_only(2),
            SolverMode::differential_only(3),
        ] {
            let layout = SystemLayout::build(&mut r#gen, 0.0, mode).unwrap();
            if layout.state_count() == 0 {
                continue;
            }
            let sd = layout.state_data(0.0, 1.0);
            let resid = residual_vector(&r#gen, &[1.01, 0.05], &sd, layout.state_count(), mode);
            assert!(
                resid.amax() < TOL,
                "{} drifts by {} in mode {}",
                r#gen.name(),
                resid.amax(),
                mode.index,
            );
        }
    }
}

#[test]
fn outputs_reproduce_the_power_flow_request() {
    let mut r#gen = DynamicGenerator::new("full")
        .with_machine(Machine::classical())
        .with_exciter(Exciter::basic())
        .with_governor(Governor::droop());
    let mut out = Vec::new();
    r#gen.initialize_states(&[1.0, 0.0], &[0.45, 0.08], &mut out)
        .unwrap();
    let mode = SolverMode::dae(1);
    let mut layout = SystemLayout::build(&mut r#gen, 0.0, mode).unwrap();
    let sd = layout.state_data(0.0, 1.0);
    assert!((r#gen.output(&[1.0, 0.0], &sd, mode, 0) - 0.45).abs() < TOL);
    assert!((r#gen.output(&[1.0, 0.0], &sd, mode, 1) - 0.08).abs() < TOL);

    // a push/pull round trip through the model caches is lossless
    let before = layout.state.clone();
    layout.push(&mut r#gen, 0.0);
    layout.pull(&r#gen, 0.0);
    assert_eq!(layout.state, before);
}

#[test]
fn layout_counts_follow_the_composition() {
    let mut r#gen = DynamicGenerator::new("full")
        .with_machine(Machine::classical())
        .with_exciter(Exciter::basic())
        .with_governor(Governor::droop());
    let mut out = Vec::new();
    r#gen.initialize_states(&[1.0, 0.0], &[0.5, 0.1], &mut out)
        .unwrap();

    // machine 2+2, exciter 0+1, droop chain 1+2
    let full = SystemLayout::build(&mut r#gen, 0.0, SolverMode::dae(1)).unwrap();
    assert_eq!(full.state_count(), 8);
    assert_eq!(full.root_count(), 1);

    let alg = SystemLayout::build(&mut r#gen, 0.0, SolverMode::algebraic_only(2)).unwrap();
    assert_eq!(alg.state_count(), 3);
    assert_eq!(alg.root_count(), 0);

    let diff = SystemLayout::build(&mut r#gen, 0.0, SolverMode::differential_only(3)).unwrap();
    assert_eq!(diff.state_count(), 5);
    assert_eq!(diff.root_count(), 1);
}

#[test]
fn decoupled_stepping_holds_the_operating_point() {
    let mut r#gen = DynamicGenerator::new("thermal")
        .with_machine(Machine::classical())
        .with_exciter(Exciter::basic())
        .with_governor(Governor::tgov1());
    let mut out = Vec::new();
    r#gen.initialize_states(&[1.0, 0.0], &[0.5, 0.1], &mut out)
        .unwrap();
    let mut p = 0.0;
    let mut t = 0.0;
    for _ in 0..200 {
        t += 0.005;
        p = r#gen.timestep(t, &[1.0, 0.0], SolverMode::local());
    }
    assert!((p - 0.5).abs() < TOL, "steady point walked away to {p}");
}

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn power_flow_initialization_is_steady_everywhere(
            v in 0.9_f64..1.1,
            theta in -0.5_f64..0.5,
            p in 0.05_f64..0.9,
            q in -0.3_f64..0.4,
            pick in 0usize..2,
        ) {
            let machine = if pick == 0 {
                Machine::classical()
            } else {
                Machine::fourth_order()
            };
            let mut r#gen = DynamicGenerator::new("any")
                .with_machine(machine)
                .with_exciter(Exciter::basic())
                .with_governor(Governor::tgov1());
            let mut out = Vec::new();
            r#gen.initialize_states(&[v, theta], &[p, q], &mut out).unwrap();
            let mode = SolverMode::dae(1);
            let layout = SystemLayout::build(&mut r#gen, 0.0, mode).unwrap();
            let sd = layout.state_data(0.0, 1.0);
            let resid = residual_vector(&r#gen, &[v, theta], &sd, layout.state_count(), mode);
            prop_assert!(resid.amax() < 1e-8);
            prop_assert!((r#gen.output(&[v, theta], &sd, mode, 0) - p).abs() < 1e-8);
            prop_assert!((r#gen.output(&[v, theta], &sd, mode, 1) - q).abs() < 1e-8);
        }
    }
}
