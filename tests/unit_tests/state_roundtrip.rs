use crate::unit_tests::helpers::run_graph;
use feval::assembly::{build_mechanics_graph, fields};
use feval::params::Parameters;
use feval::state::StateStore;
use feval::testing::QuadFixture;

fn j2_params() -> Parameters {
    Parameters::new()
        .with("Material Model", "J2")
        .with("Elastic Modulus", 1.0)
        .with("Poissons Ratio", 0.3)
        .with("Yield Strength", 0.01)
        .with("Hardening Modulus", 0.05)
        .with("Saturation Modulus", 0.002)
        .with("Saturation Exponent", 5.0)
}

#[test]
fn first_step_initializes_identity_and_scalar_state() {
    let fixture = QuadFixture::unit_square(2);
    let mut state = StateStore::new();
    let mut registry = build_mechanics_graph::<f64>(&j2_params(), &mut state).unwrap();
    registry.setup(&fixture.dims).unwrap();
    state.prepare_block("block", &fixture.dims);

    let host = fixture.host();
    let (workset, _) = run_graph(&registry, &host, &mut state, false);

    let fp_old = workset.field(registry.field_handle("Fp_old").unwrap());
    let eqps_old = workset.field(registry.field_handle("eqps_old").unwrap());
    for q in 0..fixture.dims.quad_points {
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_eq!(fp_old[(0, q, i, j)], expected);
            }
        }
        assert_eq!(eqps_old[(0, q)], 0.0);
    }
}

#[test]
fn saved_state_survives_the_advance_byte_for_byte() {
    let mut fixture = QuadFixture::unit_square(2);
    fixture.set_solution_from(|x, y| vec![0.05 * y + 0.01 * x, -0.02 * x]);

    let mut state = StateStore::new();
    let mut registry = build_mechanics_graph::<f64>(&j2_params(), &mut state).unwrap();
    registry.setup(&fixture.dims).unwrap();
    state.prepare_block("block", &fixture.dims);

    assert_eq!(state.output_variables(), vec![fields::FP, fields::EQPS]);
    assert!(state.saved("block", fields::EQPS).is_none());

    // Step one: plastic loading updates and saves the state.
    let host = fixture.host();
    let (workset, _) = run_graph(&registry, &host, &mut state, false);
    let eqps = workset.field(registry.field_handle(fields::EQPS).unwrap());
    assert!(eqps[(0, 0)] > 0.0);

    let saved: Vec<f64> = state
        .saved("block", fields::EQPS)
        .expect("Save ran on the value pass")
        .as_slice()
        .to_vec();
    let saved_fp: Vec<f64> = state
        .saved("block", fields::FP)
        .unwrap()
        .as_slice()
        .to_vec();

    state.advance();

    // Step two: the load node must expose exactly the bytes that were saved.
    let (workset, _) = run_graph(&registry, &host, &mut state, false);
    let eqps_old = workset.field(registry.field_handle("eqps_old").unwrap());
    let fp_old = workset.field(registry.field_handle("Fp_old").unwrap());
    for (q, expected) in saved.iter().enumerate() {
        assert_eq!(eqps_old[(0, q)].to_bits(), expected.to_bits());
    }
    for (k, expected) in saved_fp.iter().enumerate() {
        assert_eq!(fp_old.as_slice()[k].to_bits(), expected.to_bits());
    }
}

#[test]
fn derivative_pass_skips_state_saves() {
    use feval::scalar::Dual;

    let mut fixture = QuadFixture::unit_square(2);
    fixture.set_solution_from(|x, y| vec![0.05 * y, 0.01 * x]);

    let mut state = StateStore::new();
    let mut registry = build_mechanics_graph::<Dual<8>>(&j2_params(), &mut state).unwrap();
    registry.setup(&fixture.dims).unwrap();
    state.prepare_block("block", &fixture.dims);

    let order = registry.execution_order();
    assert!(order.iter().all(|name| !name.starts_with("Save ")));

    let host = fixture.host();
    let _ = run_graph(&registry, &host, &mut state, true);
    assert!(state.saved("block", fields::EQPS).is_none());
    assert!(state.saved("block", fields::FP).is_none());
}

#[test]
fn value_pass_runs_state_saves() {
    let fixture = QuadFixture::unit_square(2);
    let mut state = StateStore::new();
    let mut registry = build_mechanics_graph::<f64>(&j2_params(), &mut state).unwrap();
    registry.setup(&fixture.dims).unwrap();

    let order = registry.execution_order();
    assert!(order.contains(&"Save Fp"));
    assert!(order.contains(&"Save eqps"));
}
