use crate::unit_tests::helpers::run_graph;
use feval::assembly::{build_stabilization_graph, fields};
use feval::evaluator::EvaluationError;
use feval::field::FieldSpec;
use feval::graph::EvaluatorRegistry;
use feval::kernels::{
    DofGradInterpolation, GatherSolution, InfinitesimalStrain, Kinematics, StabilizationError,
    StabilizationTau, TAU_RADICAND_FLOOR,
};
use feval::layout::FieldLayout;
use feval::params::{ParameterError, Parameters};
use feval::state::StateStore;
use feval::testing::QuadFixture;
use feval::workset::ExternalSource;
use proptest::prelude::*;

fn strain_registry(fixture: &QuadFixture) -> EvaluatorRegistry<f64> {
    let mut registry = EvaluatorRegistry::new();
    registry
        .declare_external(
            FieldSpec::new(fields::GRAD_BF, FieldLayout::node_qp_vector()),
            ExternalSource::BasisGradients,
        )
        .unwrap();
    registry
        .register_evaluator(Box::new(GatherSolution::vector(fields::DISPLACEMENT)))
        .unwrap();
    registry
        .register_evaluator(Box::new(DofGradInterpolation::vector(
            fields::DISPLACEMENT,
            fields::GRAD_BF,
            fields::DISPLACEMENT_GRADIENT,
        )))
        .unwrap();
    registry
        .register_evaluator(Box::new(InfinitesimalStrain::new(
            fields::DISPLACEMENT_GRADIENT,
            fields::STRAIN,
        )))
        .unwrap();
    registry.require_field(fields::STRAIN);
    registry.setup(&fixture.dims).unwrap();
    registry
}

#[test]
fn strain_of_linear_displacement_field_is_exact() {
    let mut fixture = QuadFixture::uniform(2, 2, 2);
    // u = (0.3 x + 0.1 y, -0.2 x + 0.4 y), so grad u is constant and
    // eps = [[0.3, -0.05], [-0.05, 0.4]].
    fixture.set_solution_from(|x, y| vec![0.3 * x + 0.1 * y, -0.2 * x + 0.4 * y]);
    let registry = strain_registry(&fixture);

    let host = fixture.host();
    let mut state = StateStore::new();
    let (workset, _) = run_graph(&registry, &host, &mut state, false);

    let strain = workset.field(registry.field_handle(fields::STRAIN).unwrap());
    let expected = [[0.3, -0.05], [-0.05, 0.4]];
    for c in 0..fixture.dims.cells {
        for q in 0..fixture.dims.quad_points {
            for i in 0..2 {
                for j in 0..2 {
                    assert!(
                        (strain[(c, q, i, j)] - expected[i][j]).abs() < 1e-14,
                        "strain({}, {}, {}, {})",
                        c,
                        q,
                        i,
                        j
                    );
                }
            }
        }
    }
}

proptest! {
    #[test]
    fn strain_is_bitwise_symmetric_for_any_displacements(
        values in prop::collection::vec(-1.0..1.0f64, 8)
    ) {
        let mut fixture = QuadFixture::unit_square(2);
        // Map arbitrary nodal displacements through the full gather →
        // gradient → strain chain.
        let index = std::cell::Cell::new(0);
        fixture.set_solution_from(|_, _| {
            let i = index.get();
            index.set(i + 2);
            vec![values[i % 8], values[(i + 1) % 8]]
        });
        let registry = strain_registry(&fixture);

        let host = fixture.host();
        let mut state = StateStore::new();
        let (workset, _) = run_graph(&registry, &host, &mut state, false);

        let strain = workset.field(registry.field_handle(fields::STRAIN).unwrap());
        for q in 0..fixture.dims.quad_points {
            for i in 0..2 {
                for j in 0..2 {
                    let a = strain[(0, q, i, j)];
                    let b = strain[(0, q, j, i)];
                    prop_assert_eq!(a.to_bits(), b.to_bits());
                }
            }
        }
    }
}

fn tau_params() -> Parameters {
    Parameters::new()
        .with("Stabilization Type", "Shakib-Hughes")
        .with("Viscosity", 1.0)
        .with("Density", 1.0)
}

/// Runs the stabilization graph with every quadrature point carrying the
/// given metric tensor and a uniform nodal velocity.
fn evaluate_tau(params: &Parameters, velocity: [f64; 2], metric: [f64; 4]) -> f64 {
    let mut fixture = QuadFixture::unit_square(2);
    fixture.set_solution_from(|_, _| velocity.to_vec());
    fixture.contravariant_metric = (0..fixture.dims.quad_points)
        .flat_map(|_| metric)
        .collect();

    let mut registry = build_stabilization_graph::<f64>(params).unwrap();
    registry.setup(&fixture.dims).unwrap();

    let host = fixture.host();
    let mut state = StateStore::new();
    let (workset, _) = run_graph(&registry, &host, &mut state, false);
    let tau = workset.field(registry.field_handle(fields::TAU).unwrap());
    let value = tau[(0, 0)];
    // The interpolated velocity is uniform, so every point agrees up to the
    // rounding of the basis-function sums.
    for q in 1..fixture.dims.quad_points {
        assert!((tau[(0, q)] - value).abs() <= 1e-14 * value.abs());
    }
    value
}

#[test]
fn shakib_hughes_reference_values() {
    // Unit velocity against a metric with unit Frobenius norm:
    // radicand = 1 + 12, so Tau = 1/sqrt(13).
    let tau = evaluate_tau(&tau_params(), [1.0, 0.0], [1.0, 0.0, 0.0, 0.0]);
    assert!((tau - 1.0 / 13.0_f64.sqrt()).abs() < 1e-14);

    // Zero velocity leaves only the viscous term: Tau = 1/sqrt(12).
    let tau = evaluate_tau(&tau_params(), [0.0, 0.0], [1.0, 0.0, 0.0, 0.0]);
    assert!((tau - 1.0 / 12.0_f64.sqrt()).abs() < 1e-14);
}

#[test]
fn shakib_hughes_identity_metric() {
    // For Gc = I in 2d the Frobenius norm is sqrt(2).
    let tau = evaluate_tau(&tau_params(), [1.0, 0.0], [1.0, 0.0, 0.0, 1.0]);
    let expected = 1.0 / (1.0 + 12.0 * 2.0_f64.sqrt()).sqrt();
    assert!((tau - expected).abs() < 1e-14);
}

#[test]
fn degenerate_velocity_and_viscosity_clamp_to_a_finite_tau() {
    let params = Parameters::new()
        .with("Stabilization Type", "Shakib-Hughes")
        .with("Viscosity", 0.0)
        .with("Density", 1.0);
    let tau = evaluate_tau(&params, [0.0, 0.0], [0.0; 4]);
    assert!(tau.is_finite());
    assert_eq!(tau, 1.0 / TAU_RADICAND_FLOOR.sqrt());
}

#[test]
fn unimplemented_stabilization_law_fails_at_construction() {
    let params = Parameters::new()
        .with("Stabilization Type", "Tsunami")
        .with("Viscosity", 1.0)
        .with("Density", 1.0);
    let err = StabilizationTau::from_parameters(&params, "V", "Gc", "Tau").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StabilizationError>(),
        Some(StabilizationError::UnsupportedStabilizationType { selector }) if selector == "Tsunami"
    ));
}

#[test]
fn unknown_stabilization_selector_is_rejected() {
    let params = Parameters::new()
        .with("Stabilization Type", "Upwind")
        .with("Viscosity", 1.0)
        .with("Density", 1.0);
    let err = StabilizationTau::from_parameters(&params, "V", "Gc", "Tau").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StabilizationError>(),
        Some(StabilizationError::UnknownStabilizationType { selector }) if selector == "Upwind"
    ));
}

#[test]
fn missing_stabilization_parameter_names_the_key() {
    let params = Parameters::new().with("Stabilization Type", "Shakib-Hughes");
    let err = StabilizationTau::from_parameters(&params, "V", "Gc", "Tau").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ParameterError>(),
        Some(ParameterError::Missing { key }) if key == "Viscosity"
    ));
}

#[test]
fn inverted_cells_abort_kinematics() {
    let mut fixture = QuadFixture::unit_square(2);
    // u = (-2x, 0) gives F = diag(-1, 1), det F = -1.
    fixture.set_solution_from(|x, _| vec![-2.0 * x, 0.0]);

    let mut registry = EvaluatorRegistry::<f64>::new();
    registry
        .declare_external(
            FieldSpec::new(fields::GRAD_BF, FieldLayout::node_qp_vector()),
            ExternalSource::BasisGradients,
        )
        .unwrap();
    registry
        .register_evaluator(Box::new(GatherSolution::vector(fields::DISPLACEMENT)))
        .unwrap();
    registry
        .register_evaluator(Box::new(DofGradInterpolation::vector(
            fields::DISPLACEMENT,
            fields::GRAD_BF,
            fields::DISPLACEMENT_GRADIENT,
        )))
        .unwrap();
    registry
        .register_evaluator(Box::new(Kinematics::new(
            fields::DISPLACEMENT_GRADIENT,
            fields::DEF_GRAD,
            fields::DET_DEF_GRAD,
        )))
        .unwrap();
    registry.require_field(fields::DET_DEF_GRAD);
    registry.setup(&fixture.dims).unwrap();

    let host = fixture.host();
    let workset = registry.create_workset(&host).unwrap();
    let mut state = StateStore::new();
    let mut global = feval::assembly::GlobalSystem::residual_only(8);
    let mut ctx = feval::evaluator::EvalContext {
        state: &mut state,
        global: &mut global,
        block: "block",
    };
    let err = registry.evaluate_workset(&workset, &mut ctx).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EvaluationError>(),
        Some(EvaluationError::SingularDeformationGradient { .. })
    ));
}
