use crate::evaluator::EvaluationError;
use crate::material::{MaterialInput, MaterialOutput, MaterialState, ThermalExpansion};
use crate::params::Parameters;
use crate::tensor::Tensor2;
use feval_traits::Scalar;
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Maximum iterations of the local return-mapping Newton loop.
const MAX_RETURN_ITERATIONS: usize = 30;

/// Absolute convergence tolerance of the return map, scaled by the shear
/// modulus so the criterion is independent of the stress units.
const RETURN_TOLERANCE: f64 = 1e-11;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct J2Parameters {
    pub elastic_modulus: f64,
    pub poissons_ratio: f64,
    pub yield_strength: f64,
    pub hardening_modulus: f64,
    pub saturation_modulus: f64,
    pub saturation_exponent: f64,
}

/// The isotropic hardening law of the J2 model:
///
/// `hardening(α) = K α + sat_mod (1 − exp(−sat_exp α))`.
///
/// Exposed so tests can construct the exact oracle the model uses.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HardeningLaw {
    pub modulus: f64,
    pub saturation_modulus: f64,
    pub saturation_exponent: f64,
}

impl HardeningLaw {
    pub fn evaluate<T: Scalar>(&self, eqps: T) -> T {
        let linear = T::from_f64(self.modulus) * eqps;
        let saturation = T::from_f64(self.saturation_modulus)
            * (T::one() - (-T::from_f64(self.saturation_exponent) * eqps).exp());
        linear + saturation
    }

    /// Derivative with respect to the equivalent plastic strain.
    pub fn slope<T: Scalar>(&self, eqps: T) -> T {
        T::from_f64(self.modulus)
            + T::from_f64(self.saturation_modulus * self.saturation_exponent)
                * (-T::from_f64(self.saturation_exponent) * eqps).exp()
    }
}

/// Finite-strain J2 plasticity with isotropic saturation hardening.
///
/// The elastic predictor forms the volume-preserving elastic left
/// Cauchy–Green trial `be = J^(−2/3) F Cp⁻¹ Fᵀ` from the previous plastic
/// deformation `Fp`, takes the deviatoric trial stress `s = μ dev(be)` and
/// checks the Mises yield function
///
/// `f = |s| − √(2/3) (σ_Y + hardening(α))`.
///
/// Inside the yield surface the state passes through unchanged. Outside, a
/// scalar Newton iteration returns the stress radially to the updated yield
/// surface, and `Fp` is advanced through the exponential map of the plastic
/// flow increment. Non-convergence of the iteration aborts the workset
/// evaluation; the non-converged iterate is never used.
#[derive(Clone, Debug, PartialEq)]
pub struct J2Plasticity {
    params: J2Parameters,
    thermal: Option<ThermalExpansion>,
}

impl J2Plasticity {
    pub fn new(params: J2Parameters) -> Self {
        Self {
            params,
            thermal: None,
        }
    }

    pub fn with_thermal(mut self, thermal: ThermalExpansion) -> Self {
        self.thermal = Some(thermal);
        self
    }

    /// Reads the elastic pair, `"Yield Strength"`, `"Hardening Modulus"`,
    /// `"Saturation Modulus"` and `"Saturation Exponent"` (plus the optional
    /// thermal-expansion pair) from the block parameters.
    pub fn from_parameters(params: &Parameters) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let read = J2Parameters {
            elastic_modulus: params.get_real("Elastic Modulus")?,
            poissons_ratio: params.get_real("Poissons Ratio")?,
            yield_strength: params.get_real("Yield Strength")?,
            hardening_modulus: params.get_real("Hardening Modulus")?,
            saturation_modulus: params.get_real_or("Saturation Modulus", 0.0)?,
            saturation_exponent: params.get_real_or("Saturation Exponent", 0.0)?,
        };
        Ok(Self {
            params: read,
            thermal: ThermalExpansion::from_parameters(params)?,
        })
    }

    pub fn parameters(&self) -> &J2Parameters {
        &self.params
    }

    pub fn hardening_law(&self) -> HardeningLaw {
        HardeningLaw {
            modulus: self.params.hardening_modulus,
            saturation_modulus: self.params.saturation_modulus,
            saturation_exponent: self.params.saturation_exponent,
        }
    }

    fn shear_modulus(&self) -> f64 {
        0.5 * self.params.elastic_modulus / (1.0 + self.params.poissons_ratio)
    }

    fn bulk_modulus(&self) -> f64 {
        self.params.elastic_modulus / (3.0 * (1.0 - 2.0 * self.params.poissons_ratio))
    }

    pub fn compute_point<T: Scalar>(
        &self,
        cell: usize,
        point: usize,
        input: &MaterialInput<T>,
        old: &MaterialState<T>,
    ) -> Result<MaterialOutput<T>, EvaluationError> {
        let dim = input.def_grad.dim();
        let mu = self.shear_modulus();
        let kappa = self.bulk_modulus();
        let hardening = self.hardening_law();
        let sq23 = T::from_f64((2.0_f64 / 3.0).sqrt());
        let yield_strength = T::from_f64(self.params.yield_strength);

        // Volume-preserving elastic trial state.
        let f = &input.def_grad;
        let det = input.det;
        let jm23 = (det.ln() * T::from_f64(-2.0 / 3.0)).exp();
        let fp_inv = old
            .fp
            .try_inverse()
            .ok_or(EvaluationError::SingularPlasticDeformation { cell, point })?;
        let cp_inv = fp_inv.dot(&fp_inv.transpose());
        let be = f.dot(&cp_inv).dot(&f.transpose()).scaled(jm23);

        let s_trial = be.deviator().scaled(T::from_f64(mu));
        let mubar = be.trace() * T::from_f64(mu / dim as f64);
        let smag = s_trial.norm();
        let yield_value = smag - sq23 * (yield_strength + hardening.evaluate(old.eqps));

        let (s, fp_new, eqps_new) = if yield_value.value() > 0.0 {
            // Radial return: scalar Newton on the consistency condition.
            let two = T::from_f64(2.0);
            let two_thirds = T::from_f64(2.0 / 3.0);
            let tolerance = RETURN_TOLERANCE * mu.max(1.0);

            let mut dgam = T::zero();
            let mut alpha = old.eqps;
            let mut residual = yield_value;
            let mut converged = false;
            for _ in 0..MAX_RETURN_ITERATIONS {
                let slope = -(two * mubar) - two_thirds * hardening.slope(alpha);
                dgam -= residual / slope;
                alpha = old.eqps + sq23 * dgam;
                residual =
                    smag - two * mubar * dgam - sq23 * (yield_strength + hardening.evaluate(alpha));
                if residual.value().abs() < tolerance {
                    converged = true;
                    break;
                }
            }
            if !converged {
                return Err(EvaluationError::ReturnMappingDiverged {
                    cell,
                    point,
                    iterations: MAX_RETURN_ITERATIONS,
                    residual: residual.value(),
                });
            }

            let normal = s_trial.scaled(T::one() / smag);
            let s = s_trial - normal.scaled(two * mubar * dgam);
            let fp_new = normal.scaled(dgam).exp().dot(&old.fp);
            (s, fp_new, alpha)
        } else {
            (s_trial, old.fp, old.eqps)
        };

        // Cauchy stress: deviatoric part plus the volumetric response.
        let pressure = T::from_f64(0.5 * kappa) * (det - T::one() / det);
        let mut stress = s.scaled(T::one() / det);
        for i in 0..dim {
            stress[(i, i)] += pressure;
        }

        if let (Some(thermal), Some(temperature)) = (&self.thermal, input.temperature) {
            let shift = T::from_f64(3.0 * thermal.coefficient * kappa)
                * (temperature - T::from_f64(thermal.ref_temperature));
            for i in 0..dim {
                stress[(i, i)] -= shift;
            }
        }

        Ok(MaterialOutput {
            stress,
            state: MaterialState {
                fp: fp_new,
                eqps: eqps_new,
            },
            yield_value,
        })
    }
}
