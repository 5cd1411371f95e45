use feval::evaluator::EvaluationError;
use feval::material::{
    ElasticConstants, HardeningLaw, J2Parameters, J2Plasticity, LinearElastic, MaterialInput,
    MaterialState, ThermalExpansion,
};
use feval::scalar::{Dual, Scalar};
use feval::tensor::Tensor2;
use matrixcompare::assert_scalar_eq;
use proptest::prelude::*;

fn j2_params() -> J2Parameters {
    J2Parameters {
        elastic_modulus: 200.0e3,
        poissons_ratio: 0.3,
        yield_strength: 250.0,
        hardening_modulus: 1000.0,
        saturation_modulus: 100.0,
        saturation_exponent: 10.0,
    }
}

fn input_from_def_grad<T: Scalar>(def_grad: Tensor2<T>) -> MaterialInput<T> {
    MaterialInput {
        det: def_grad.determinant(),
        def_grad,
        temperature: None,
    }
}

#[test]
fn hardening_vanishes_at_zero_plastic_strain() {
    let law = HardeningLaw {
        modulus: 1000.0,
        saturation_modulus: 173.0,
        saturation_exponent: 42.0,
    };
    assert_eq!(law.evaluate(0.0), 0.0);

    // And the slope there is the linear plus saturation modulus rate.
    let slope = law.slope(0.0);
    assert!((slope - (1000.0 + 173.0 * 42.0)).abs() < 1e-12);
}

#[test]
fn j2_elastic_step_passes_state_through_unchanged() {
    let model = J2Plasticity::new(j2_params());
    // A strain well inside the yield surface.
    let eps = 1e-4;
    let def_grad = Tensor2::from_fn(2, |i, j| match (i, j) {
        (0, 0) => 1.0 + eps,
        (1, 1) => 1.0 - 0.5 * eps,
        _ => 0.3 * eps,
    });
    let old = MaterialState {
        fp: Tensor2::identity(2),
        eqps: 0.01,
    };

    let output = model
        .compute_point(0, 0, &input_from_def_grad(def_grad), &old)
        .unwrap();

    assert!(output.yield_value < 0.0);
    assert_eq!(output.state.fp, old.fp);
    assert_eq!(output.state.eqps.to_bits(), old.eqps.to_bits());
}

proptest! {
    #[test]
    fn j2_is_idempotent_inside_the_yield_surface(
        e00 in -1e-4..1e-4f64,
        e11 in -1e-4..1e-4f64,
        e01 in -1e-4..1e-4f64,
        eqps_old in 0.0..0.05f64,
    ) {
        let model = J2Plasticity::new(j2_params());
        let def_grad = Tensor2::from_fn(2, |i, j| match (i, j) {
            (0, 0) => 1.0 + e00,
            (1, 1) => 1.0 + e11,
            _ => e01,
        });
        let old = MaterialState { fp: Tensor2::identity(2), eqps: eqps_old };
        let output = model
            .compute_point(0, 0, &input_from_def_grad(def_grad), &old)
            .unwrap();

        prop_assume!(output.yield_value <= 0.0);
        prop_assert_eq!(output.state.fp, old.fp);
        prop_assert_eq!(output.state.eqps.to_bits(), old.eqps.to_bits());
    }
}

#[test]
fn j2_plastic_step_returns_to_the_updated_yield_surface() {
    let model = J2Plasticity::new(j2_params());
    let gamma = 0.01;
    let def_grad = Tensor2::from_fn(2, |i, j| match (i, j) {
        (0, 1) => gamma,
        (i, j) if i == j => 1.0,
        _ => 0.0,
    });
    let old = MaterialState {
        fp: Tensor2::identity(2),
        eqps: 0.0,
    };

    let input = input_from_def_grad(def_grad);
    let output = model.compute_point(0, 0, &input, &old).unwrap();

    assert!(output.yield_value > 0.0);
    assert!(output.state.eqps > 0.0);

    // After the radial return, |dev(σ) J| sits on the updated yield surface.
    let dev = output.stress.deviator().scaled(input.det);
    let radius = (2.0_f64 / 3.0).sqrt()
        * (j2_params().yield_strength + model.hardening_law().evaluate(output.state.eqps));
    assert_scalar_eq!(dev.norm(), radius, comp = abs, tol = 1e-5);

    // Plastic flow is volume preserving.
    assert_scalar_eq!(output.state.fp.determinant(), 1.0, comp = abs, tol = 1e-10);
}

#[test]
fn j2_softening_without_admissible_root_reports_divergence() {
    // A strongly negative hardening modulus makes the consistency equation
    // rootless for positive plastic increments.
    let mut params = j2_params();
    params.hardening_modulus = -1.0e12;
    params.saturation_modulus = 0.0;
    let model = J2Plasticity::new(params);

    let def_grad = Tensor2::from_fn(2, |i, j| match (i, j) {
        (0, 1) => 0.01,
        (i, j) if i == j => 1.0,
        _ => 0.0,
    });
    let old = MaterialState {
        fp: Tensor2::identity(2),
        eqps: 0.0,
    };

    let err = model
        .compute_point(3, 1, &input_from_def_grad(def_grad), &old)
        .unwrap_err();
    assert!(matches!(
        err,
        EvaluationError::ReturnMappingDiverged { cell: 3, point: 1, .. }
    ));
}

#[test]
fn j2_rejects_singular_plastic_history() {
    let model = J2Plasticity::new(j2_params());
    let old = MaterialState {
        fp: Tensor2::zero(2),
        eqps: 0.0,
    };
    let err = model
        .compute_point(0, 2, &input_from_def_grad(Tensor2::identity(2)), &old)
        .unwrap_err();
    assert!(matches!(
        err,
        EvaluationError::SingularPlasticDeformation { cell: 0, point: 2 }
    ));
}

#[test]
fn linear_elastic_uniaxial_strain_oracle() {
    let constants = ElasticConstants {
        young: 100.0,
        poisson: 0.25,
    };
    let model = LinearElastic::new(constants);
    let e = 0.01;
    let def_grad = Tensor2::from_fn(2, |i, j| match (i, j) {
        (0, 0) => 1.0 + e,
        (1, 1) => 1.0,
        _ => 0.0,
    });

    let output = model.compute_point(
        &input_from_def_grad(def_grad),
        &MaterialState::virgin(2),
    );

    let mu = constants.shear_modulus();
    let lambda = constants.lame_lambda();
    assert_scalar_eq!(output.stress[(0, 0)], (2.0 * mu + lambda) * e, comp = abs, tol = 1e-12);
    assert_scalar_eq!(output.stress[(1, 1)], lambda * e, comp = abs, tol = 1e-12);
    assert_scalar_eq!(output.stress[(0, 1)], 0.0, comp = abs, tol = 1e-15);
}

#[test]
fn thermal_expansion_shifts_the_stress_diagonal() {
    let constants = ElasticConstants {
        young: 100.0,
        poisson: 0.25,
    };
    let thermal = ThermalExpansion {
        coefficient: 1e-3,
        ref_temperature: 20.0,
    };
    let model = LinearElastic::new(constants).with_thermal(thermal);

    let mut input = input_from_def_grad(Tensor2::identity(2));
    input.temperature = Some(30.0);
    let output = model.compute_point(&input, &MaterialState::virgin(2));

    let shift = 3.0 * thermal.coefficient * constants.bulk_modulus() * 10.0;
    assert_scalar_eq!(output.stress[(0, 0)], -shift, comp = abs, tol = 1e-12);
    assert_scalar_eq!(output.stress[(1, 1)], -shift, comp = abs, tol = 1e-12);
    assert_scalar_eq!(output.stress[(0, 1)], 0.0, comp = abs, tol = 1e-15);
}

#[test]
fn j2_dual_derivatives_match_finite_differences() {
    let model = J2Plasticity::new(j2_params());
    // Deep in the plastic regime so the derivative path runs through the
    // return-mapping iteration.
    let base = [[1.0, 0.01], [0.002, 0.998]];
    let old_fp = Tensor2::identity(2);
    let eqps_old = 0.001;

    // Dual evaluation with one seed per deformation-gradient entry.
    let def_grad = Tensor2::from_fn(2, |i, j| Dual::<4>::seeded(base[i][j], 2 * i + j));
    let old = MaterialState {
        fp: Tensor2::from_fn(2, |i, j| Dual::constant(old_fp[(i, j)])),
        eqps: Dual::constant(eqps_old),
    };
    let output = model
        .compute_point(0, 0, &input_from_def_grad(def_grad), &old)
        .unwrap();

    // Finite-difference reference for dσ00/dF_k. The step is chosen well
    // above the return-map tolerance so iteration truncation does not
    // pollute the difference quotient.
    let h = 1e-5;
    let evaluate = |f: [[f64; 2]; 2]| {
        let def_grad = Tensor2::from_fn(2, |i, j| f[i][j]);
        let old = MaterialState {
            fp: old_fp,
            eqps: eqps_old,
        };
        model
            .compute_point(0, 0, &input_from_def_grad(def_grad), &old)
            .unwrap()
            .stress[(0, 0)]
    };

    for k in 0..4 {
        let (i, j) = (k / 2, k % 2);
        let mut plus = base;
        let mut minus = base;
        plus[i][j] += h;
        minus[i][j] -= h;
        let fd = (evaluate(plus) - evaluate(minus)) / (2.0 * h);
        let ad = output.stress[(0, 0)].derivative(k);
        assert!(
            (ad - fd).abs() <= 1e-5 * fd.abs().max(1.0),
            "dσ00/dF{}{}: ad = {}, fd = {}",
            i,
            j,
            ad,
            fd
        );
    }
}
