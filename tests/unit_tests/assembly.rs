use feval::assembly::{fields, BlockAssembler, GlobalSystem};
use feval::params::Parameters;
use feval::state::StateStore;
use feval::testing::QuadFixture;

fn elastic_params() -> Parameters {
    Parameters::new()
        .with("Material Model", "Linear Elastic")
        .with("Elastic Modulus", 1.0)
        .with("Poissons Ratio", 0.25)
        .with("Output Strain", true)
}

/// Global node indices strictly inside an `nx × ny` uniform grid.
fn interior_nodes(nx: usize, ny: usize) -> Vec<usize> {
    let mut nodes = Vec::new();
    for j in 1..ny {
        for i in 1..nx {
            nodes.push(j * (nx + 1) + i);
        }
    }
    nodes
}

#[test]
fn linear_patch_is_in_equilibrium_at_interior_nodes() {
    let (nx, ny) = (3, 3);
    let mut fixture = QuadFixture::uniform(nx, ny, 2);
    // A linear displacement field produces constant stress, so interior
    // nodes carry no residual and the total must vanish by symmetry of the
    // weighting functions.
    fixture.set_solution_from(|x, y| vec![0.02 * x + 0.01 * y, -0.015 * x + 0.03 * y]);

    let mut state = StateStore::new();
    let assembler =
        BlockAssembler::<f64>::mechanics("block", &elastic_params(), &fixture.dims, &mut state)
            .unwrap();
    let mut global = GlobalSystem::residual_only(fixture.num_global_nodes * 2);
    assembler
        .assemble(&fixture.host(), &mut state, &mut global)
        .unwrap();

    for node in interior_nodes(nx, ny) {
        for comp in 0..2 {
            assert!(
                global.residual[2 * node + comp].abs() < 1e-14,
                "Interior node {} component {} not in equilibrium",
                node,
                comp
            );
        }
    }
    for comp in 0..2 {
        let total: f64 = (0..fixture.num_global_nodes)
            .map(|n| global.residual[2 * n + comp])
            .sum();
        assert!(total.abs() < 1e-13);
    }
}

#[test]
fn transient_inertia_adds_the_weighted_acceleration() {
    let params = elastic_params()
        .with("Transient", true)
        .with("Density", 2.5);
    let mut fixture = QuadFixture::uniform(2, 2, 2);
    fixture.set_solution_from(|x, y| vec![0.01 * x, 0.01 * y]);
    fixture.set_rate_from(|_, _| vec![0.3, -0.7]);

    let mut state = StateStore::new();
    let num_dofs = fixture.num_global_nodes * 2;

    let run = |params: &Parameters, fixture: &QuadFixture, state: &mut StateStore| {
        let assembler =
            BlockAssembler::<f64>::mechanics("block", params, &fixture.dims, state).unwrap();
        let mut global = GlobalSystem::residual_only(num_dofs);
        assembler
            .assemble(&fixture.host(), state, &mut global)
            .unwrap();
        global.residual
    };

    let with_inertia = run(&params, &fixture, &mut state);
    let without = run(&elastic_params(), &fixture, &mut StateStore::new());

    // Summing ρ a · wBF over all nodes integrates ρ a over the unit square.
    for (comp, accel) in [0.3, -0.7].iter().enumerate() {
        let total: f64 = (0..fixture.num_global_nodes)
            .map(|n| with_inertia[2 * n + comp] - without[2 * n + comp])
            .sum();
        assert!((total - 2.5 * accel).abs() < 1e-13);
    }
}

#[test]
fn pressure_flux_balances_at_interior_nodes() {
    let (nx, ny) = (3, 3);
    let params = Parameters::new()
        .with("Permeability", 2.0)
        .with("Biot Modulus", 4.0);
    let mut fixture = QuadFixture::uniform(nx, ny, 1);
    fixture.set_solution_from(|x, y| vec![2.0 * x + 3.0 * y - 1.0]);
    fixture.set_rate_from(|_, _| vec![0.0]);

    let assembler = BlockAssembler::<f64>::pressure("block", &params, &fixture.dims).unwrap();
    let mut state = StateStore::new();
    let mut global = GlobalSystem::residual_only(fixture.num_global_nodes);
    assembler
        .assemble(&fixture.host(), &mut state, &mut global)
        .unwrap();

    // Constant Darcy flux: interior nodes balance exactly, and the total
    // vanishes because the weighting gradients sum to zero per cell.
    for node in interior_nodes(nx, ny) {
        assert!(global.residual[node].abs() < 1e-14);
    }
    let total: f64 = global.residual.iter().sum();
    assert!(total.abs() < 1e-13);
}

#[test]
fn pressure_storage_term_integrates_the_rate() {
    let params = Parameters::new()
        .with("Permeability", 2.0)
        .with("Biot Modulus", 4.0);
    let mut fixture = QuadFixture::uniform(2, 2, 1);
    fixture.set_solution_from(|_, _| vec![0.0]);
    fixture.set_rate_from(|_, _| vec![0.5]);

    let assembler = BlockAssembler::<f64>::pressure("block", &params, &fixture.dims).unwrap();
    let mut state = StateStore::new();
    let mut global = GlobalSystem::residual_only(fixture.num_global_nodes);
    assembler
        .assemble(&fixture.host(), &mut state, &mut global)
        .unwrap();

    // Σ_n R(n) = ∫ ṗ / M over the unit square = 0.5 / 4.
    let total: f64 = global.residual.iter().sum();
    assert!((total - 0.125).abs() < 1e-14);
}

#[test]
fn mechanics_execution_order_follows_the_data_flow() {
    let fixture = QuadFixture::unit_square(2);
    let mut state = StateStore::new();
    let assembler =
        BlockAssembler::<f64>::mechanics("block", &elastic_params(), &fixture.dims, &mut state)
            .unwrap();

    let order = assembler.registry().execution_order();
    let position = |name: &str| {
        order
            .iter()
            .position(|n| *n == name)
            .unwrap_or_else(|| panic!("'{}' missing from {:?}", name, order))
    };

    assert!(position("Gather Displacement") < position("Interpolate Displacement Gradient"));
    assert!(position("Interpolate Displacement Gradient") < position("Kinematics F"));
    assert!(position("Kinematics F") < position("Constitutive Model Stress"));
    assert!(position("Constitutive Model Stress") < position("Residual Momentum Residual"));
    assert!(position("Residual Momentum Residual") < position("Scatter Momentum Residual"));
    // Strain was required by "Output Strain" and must be evaluated somewhere.
    position("Strain");
}

#[test]
fn strain_field_is_exposed_for_output() {
    use crate::unit_tests::helpers::run_graph;
    use feval::assembly::build_mechanics_graph;

    let mut fixture = QuadFixture::unit_square(2);
    fixture.set_solution_from(|x, y| vec![0.01 * x, 0.02 * y]);

    let mut state = StateStore::new();
    let mut registry = build_mechanics_graph::<f64>(&elastic_params(), &mut state).unwrap();
    registry.setup(&fixture.dims).unwrap();

    let host = fixture.host();
    let (workset, _) = run_graph(&registry, &host, &mut state, false);
    let strain = workset.field(registry.field_handle(fields::STRAIN).unwrap());
    for q in 0..fixture.dims.quad_points {
        assert!((strain[(0, q, 0, 0)] - 0.01).abs() < 1e-14);
        assert!((strain[(0, q, 1, 1)] - 0.02).abs() < 1e-14);
        assert!(strain[(0, q, 0, 1)].abs() < 1e-15);
    }
}
