use crate::material::{MaterialInput, MaterialOutput, MaterialState, ThermalExpansion};
use crate::params::Parameters;
use crate::tensor::Tensor2;
use feval_traits::Scalar;
use serde::{Deserialize, Serialize};
use std::error::Error;

/// Engineering elastic constants.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElasticConstants {
    pub young: f64,
    pub poisson: f64,
}

impl ElasticConstants {
    pub fn shear_modulus(&self) -> f64 {
        0.5 * self.young / (1.0 + self.poisson)
    }

    pub fn lame_lambda(&self) -> f64 {
        self.young * self.poisson / ((1.0 + self.poisson) * (1.0 - 2.0 * self.poisson))
    }

    pub fn bulk_modulus(&self) -> f64 {
        self.young / (3.0 * (1.0 - 2.0 * self.poisson))
    }
}

/// The linear elastic material model.
///
/// With the infinitesimal strain `ε(F) = ½(F + Fᵀ) − I` and Lamé parameters
/// μ, λ, the stress is
///
/// `σ = 2 μ ε + λ tr(ε) I`.
///
/// The model carries no internal state; the previous-step state passes
/// through untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearElastic {
    constants: ElasticConstants,
    thermal: Option<ThermalExpansion>,
}

impl LinearElastic {
    pub fn new(constants: ElasticConstants) -> Self {
        Self {
            constants,
            thermal: None,
        }
    }

    pub fn with_thermal(mut self, thermal: ThermalExpansion) -> Self {
        self.thermal = Some(thermal);
        self
    }

    /// Reads `"Elastic Modulus"` and `"Poissons Ratio"` (plus the optional
    /// thermal-expansion pair) from the block parameters.
    pub fn from_parameters(params: &Parameters) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let constants = ElasticConstants {
            young: params.get_real("Elastic Modulus")?,
            poisson: params.get_real("Poissons Ratio")?,
        };
        Ok(Self {
            constants,
            thermal: ThermalExpansion::from_parameters(params)?,
        })
    }

    pub fn constants(&self) -> &ElasticConstants {
        &self.constants
    }

    pub fn compute_point<T: Scalar>(
        &self,
        input: &MaterialInput<T>,
        old: &MaterialState<T>,
    ) -> MaterialOutput<T> {
        let dim = input.def_grad.dim();
        let mu = T::from_f64(self.constants.shear_modulus());
        let lambda = T::from_f64(self.constants.lame_lambda());

        let strain = input.def_grad.symmetric_part() - Tensor2::identity(dim);
        let two = T::from_f64(2.0);
        let mut stress = strain.scaled(two * mu);
        let trace_term = lambda * strain.trace();
        for i in 0..dim {
            stress[(i, i)] += trace_term;
        }

        if let (Some(thermal), Some(temperature)) = (&self.thermal, input.temperature) {
            let kappa = T::from_f64(self.constants.bulk_modulus());
            let shift = T::from_f64(3.0 * thermal.coefficient)
                * kappa
                * (temperature - T::from_f64(thermal.ref_temperature));
            for i in 0..dim {
                stress[(i, i)] -= shift;
            }
        }

        MaterialOutput {
            stress,
            state: old.clone(),
            yield_value: T::zero(),
        }
    }
}
