//! Analytic device Jacobians checked against central finite differences
//! of the same residuals, standalone and composed, across solver modes.

use gf_core::{Parameterized, Real};
use gf_dae::{ChangeCode, CheckLevel, DynamicModel, SolverMode};
use gf_devices::{DynamicGenerator, Exciter, Governor, Machine};
use gf_solver::{SystemLayout, assemble_jacobian, central_difference_model_jacobian};

const CJ: Real = 37.0;
const EPS: Real = 1e-6;
const TOL: Real = 1e-5;

fn modes() -> [SolverMode; 3] {
    [
        SolverMode::dae(1),
        SolverMode::algebraic_only(2),
        SolverMode::differential_only(3),
    ]
}

fn compare(model: &dyn DynamicModel, inputs: &[Real], layout: &SystemLayout) -> Real {
    let mode = layout.mode();
    let n = layout.state_count();
    let sd = layout.state_data(0.0, CJ);
    let analytic = assemble_jacobian(model, inputs, &sd, &[], n, mode);
    let numeric = central_difference_model_jacobian(
        model,
        inputs,
        0.0,
        &layout.state,
        &layout.dstate_dt,
        CJ,
        mode,
        EPS,
    );
    (analytic - numeric).amax()
}

#[test]
fn machine_jacobians_match_finite_differences() {
    let mut damped = Machine::classical();
    damped.set_param("kw", 2.0).unwrap();
    let mut lossy = Machine::fourth_order();
    lossy.set_param("rs", 0.005).unwrap();
    for mut m in [Machine::classical(), damped, Machine::fourth_order(), lossy] {
        let mut req = Vec::new();
        m.initialize_states(&[1.02, 0.1, 0.0, 0.0], &[0.8, 0.25], &mut req)
            .unwrap();
        for mode in modes() {
            let layout = SystemLayout::build(&mut m, 0.0, mode).unwrap();
            let gap = compare(&m, &req, &layout);
            assert!(
                gap <= TOL,
                "{} differs from finite differences by {gap} in mode {}",
                m.name(),
                mode.index,
            );
        }
    }
}

#[test]
fn exciter_jacobians_match_finite_differences() {
    let mut saturated = Exciter::ieee_type1();
    saturated.set_param("aex", 0.03).unwrap();
    saturated.set_param("bex", 1.0).unwrap();
    for mut e in [Exciter::basic(), Exciter::ieee_type1(), saturated] {
        let mut req = Vec::new();
        e.initialize_states(&[1.0, 1.05], &[1.6], &mut req).unwrap();
        for mode in modes() {
            let layout = SystemLayout::build(&mut e, 0.0, mode).unwrap();
            if layout.state_count() == 0 {
                continue;
            }
            let gap = compare(&e, &[1.0, 1.05], &layout);
            assert!(
                gap <= TOL,
                "{} differs from finite differences by {gap} in mode {}",
                e.name(),
                mode.index,
            );
        }
    }
}

#[test]
fn pinned_regulator_jacobian_is_the_bare_derivative_weight() {
    let mode = SolverMode::dae(1);
    let mut e = Exciter::basic();
    let mut req = Vec::new();
    e.initialize_states(&[1.0, 1.05], &[1.6], &mut req).unwrap();
    let mut layout = SystemLayout::build(&mut e, 0.0, mode).unwrap();

    layout.state[0] = 7.0;
    layout.push(&mut e, 0.0);
    let sd = layout.state_data(0.0, CJ);
    let code = e.root_check(&[1.0, 1.05], &sd, CheckLevel::FullCheck, mode);
    assert_eq!(code, ChangeCode::JacobianChange);
    layout.pull(&e, 0.0);
    layout.dstate_dt[0] = 0.0;

    let sd = layout.state_data(0.0, CJ);
    let pinned = assemble_jacobian(&e, &[1.0, 1.05], &sd, &[], 1, mode);
    assert!((pinned[(0, 0)] + CJ).abs() < 1e-12);
    assert!(compare(&e, &[1.0, 1.05], &layout) <= TOL);
}

#[test]
fn governor_jacobians_match_finite_differences() {
    let mut banded = Governor::droop();
    banded.set_param("deadband", 0.002).unwrap();
    for mut g in [
        Governor::droop(),
        banded,
        Governor::ieee_simple(),
        Governor::tgov1(),
    ] {
        let mut req = Vec::new();
        g.initialize_states(&[1.0, 0.0], &[0.55], &mut req).unwrap();
        for mode in modes() {
            let layout = SystemLayout::build(&mut g, 0.0, mode).unwrap();
            if layout.state_count() == 0 {
                continue;
            }
            let gap = compare(&g, &req, &layout);
            assert!(
                gap <= TOL,
                "{} differs from finite differences by {gap} in mode {}",
                g.name(),
                mode.index,
            );
        }
    }
}

#[test]
fn composed_generator_jacobian_matches_finite_differences() {
    let mut r#gen = DynamicGenerator::new("plant")
        .with_machine(Machine::classical())
        .with_exciter(Exciter::basic())
        .with_governor(Governor::tgov1());
    let mut out = Vec::new();
    r#gen.initialize_states(&[1.0, 0.0], &[0.5, 0.1], &mut out)
        .unwrap();
    for mode in modes() {
        let layout = SystemLayout::build(&mut r#gen, 0.0, mode).unwrap();
        if layout.state_count() == 0 {
            continue;
        }
        if mode.has_algebraic() && mode.has_differential() {
            // machine 2+2, exciter 0+1, tgov1 1+2
            assert_eq!(layout.state_count(), 8);
        }
        let gap = compare(&r#gen, &[1.0, 0.0], &layout);
        assert!(
            gap <= TOL,
            "composed generator differs from finite differences by {gap} in mode {}",
            mode.index,
        );
    }
}
