use super::{normalized_weights, Opdf, OpdfFactory};
use crate::error::{invalid, Error, Result};
use rand::Rng;
use rand_distr::StandardNormal;
#[cfg(feature = "serde-1")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// A univariate normal distribution over real observations
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-1", serde(try_from = "GaussianParams"))]
pub struct OpdfGaussian {
    mean: f64,
    variance: f64,
}

impl OpdfGaussian {
    pub fn new(mean: f64, variance: f64) -> Result<Self> {
        if !mean.is_finite() {
            return invalid(format!("the mean must be finite, not {}", mean));
        }
        if !(variance > 0.0) || !variance.is_finite() {
            return invalid(format!(
                "the variance must be finite and strictly positive, not {}",
                variance
            ));
        }
        Ok(Self { mean, variance })
    }

    /// The standard normal distribution
    pub fn standard() -> Self {
        Self {
            mean: 0.0,
            variance: 1.0,
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }
}

impl Opdf for OpdfGaussian {
    type Observation = f64;

    fn probability(&self, observation: &f64) -> f64 {
        let diff = observation - self.mean;
        (-diff * diff / (2.0 * self.variance)).exp() / (2.0 * PI * self.variance).sqrt()
    }

    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mean + self.variance.sqrt() * z
    }

    fn fit(&mut self, observations: &[&f64], weights: &[f64]) -> Result<()> {
        let weights = normalized_weights(observations.len(), weights)?;
        let mean: f64 = observations
            .iter()
            .zip(&weights)
            .map(|(&&x, w)| w * x)
            .sum();
        let variance: f64 = observations
            .iter()
            .zip(&weights)
            .map(|(&&x, w)| w * (x - mean).powi(2))
            .sum();
        if !(variance > 0.0) {
            return Err(Error::NotPositiveDefinite);
        }
        self.mean = mean;
        self.variance = variance;
        Ok(())
    }
}

impl fmt::Display for OpdfGaussian {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Gaussian distribution --- Mean: {:.4} Variance {:.4}",
            self.mean, self.variance
        )
    }
}

/// Builds Gaussian opdfs with the same initial mean and variance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OpdfGaussianFactory {
    prototype: (f64, f64),
}

impl OpdfGaussianFactory {
    pub fn new(mean: f64, variance: f64) -> Result<Self> {
        OpdfGaussian::new(mean, variance)?;
        Ok(Self {
            prototype: (mean, variance),
        })
    }
}

impl Default for OpdfGaussianFactory {
    fn default() -> Self {
        Self {
            prototype: (0.0, 1.0),
        }
    }
}

impl OpdfFactory<OpdfGaussian> for OpdfGaussianFactory {
    fn generate(&self) -> OpdfGaussian {
        let (mean, variance) = self.prototype;
        OpdfGaussian { mean, variance }
    }
}

#[cfg(feature = "serde-1")]
#[derive(Deserialize)]
struct GaussianParams {
    mean: f64,
    variance: f64,
}

#[cfg(feature = "serde-1")]
impl std::convert::TryFrom<GaussianParams> for OpdfGaussian {
    type Error = Error;

    fn try_from(params: GaussianParams) -> Result<Self> {
        Self::new(params.mean, params.variance)
    }
}
