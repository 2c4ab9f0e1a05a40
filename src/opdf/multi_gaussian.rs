use super::{normalized_weights, Opdf, OpdfFactory};
use crate::error::{invalid, Result};
use crate::linalg::Cholesky;
use itertools::Itertools;
use ndarray::prelude::*;
use rand::Rng;
use rand_distr::StandardNormal;
#[cfg(feature = "serde-1")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// A multivariate normal distribution over real vectors.
///
/// The Cholesky factor, inverse and log-determinant of the covariance are cached, so every
/// `OpdfMultiGaussian` holds a positive-definite covariance.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-1", serde(try_from = "MultiGaussianParams"))]
#[cfg_attr(feature = "serde-1", serde(into = "MultiGaussianParams"))]
pub struct OpdfMultiGaussian {
    mean: Array1<f64>,
    covariance: Array2<f64>,
    cholesky: Cholesky,
    covariance_inv: Array2<f64>,
    ln_det: f64,
}

impl OpdfMultiGaussian {
    /// Fails with `NotPositiveDefinite` if `covariance` is not positive definite.
    pub fn new(mean: Array1<f64>, covariance: Array2<f64>) -> Result<Self> {
        if mean.is_empty() {
            return invalid("a multivariate Gaussian needs at least one dimension");
        }
        if covariance.shape() != [mean.len(), mean.len()] {
            return invalid(format!(
                "covariance of shape {:?} does not match a mean of dimension {}",
                covariance.shape(),
                mean.len()
            ));
        }
        let cholesky = Cholesky::decompose(&covariance)?;
        let covariance_inv = cholesky.inverse();
        let ln_det = cholesky.ln_determinant();
        Ok(Self {
            mean,
            covariance,
            cholesky,
            covariance_inv,
            ln_det,
        })
    }

    /// Zero mean and identity covariance
    pub fn standard(dimension: usize) -> Result<Self> {
        Self::new(Array1::zeros(dimension), Array2::eye(dimension))
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> ArrayView1<f64> {
        self.mean.view()
    }

    pub fn covariance(&self) -> ArrayView2<f64> {
        self.covariance.view()
    }
}

impl Opdf for OpdfMultiGaussian {
    type Observation = Array1<f64>;

    /// Observations of the wrong dimension have density 0.
    fn probability(&self, observation: &Array1<f64>) -> f64 {
        if observation.len() != self.dimension() {
            return 0.0;
        }
        let diff = observation - &self.mean;
        let mahalanobis = diff.dot(&self.covariance_inv.dot(&diff));
        let d = self.dimension() as f64;
        (-0.5 * (mahalanobis + self.ln_det + d * (2.0 * PI).ln())).exp()
    }

    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let z: Array1<f64> = (0..self.dimension())
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        &self.mean + &self.cholesky.factor().dot(&z)
    }

    fn fit(&mut self, observations: &[&Array1<f64>], weights: &[f64]) -> Result<()> {
        let weights = normalized_weights(observations.len(), weights)?;
        let d = self.dimension();
        if let Some(bad) = observations.iter().find(|o| o.len() != d) {
            return invalid(format!(
                "observation of dimension {} cannot be fit by a Gaussian of dimension {}",
                bad.len(),
                d
            ));
        }

        let mut mean = Array1::zeros(d);
        for (&observation, &weight) in observations.iter().zip(&weights) {
            mean.scaled_add(weight, observation);
        }

        let mut covariance = Array2::zeros((d, d));
        for (&observation, &weight) in observations.iter().zip(&weights) {
            let diff = (observation - &mean).insert_axis(Axis(1));
            covariance.scaled_add(weight, &diff.dot(&diff.t()));
        }

        *self = Self::new(mean, covariance)?;
        Ok(())
    }
}

impl fmt::Display for OpdfMultiGaussian {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Multi-variate Gaussian distribution --- Mean: [ {} ]",
            self.mean.iter().map(|m| format!("{:.4}", m)).join(" ")
        )
    }
}

/// Builds standard multivariate Gaussians of a fixed dimension
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpdfMultiGaussianFactory {
    dimension: usize,
}

impl OpdfMultiGaussianFactory {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return invalid("the dimension must be strictly positive");
        }
        Ok(Self { dimension })
    }
}

impl OpdfFactory<OpdfMultiGaussian> for OpdfMultiGaussianFactory {
    fn generate(&self) -> OpdfMultiGaussian {
        let cholesky = Cholesky::identity(self.dimension);
        OpdfMultiGaussian {
            mean: Array1::zeros(self.dimension),
            covariance: Array2::eye(self.dimension),
            cholesky,
            covariance_inv: Array2::eye(self.dimension),
            ln_det: 0.0,
        }
    }
}

#[cfg(feature = "serde-1")]
#[derive(Serialize, Deserialize)]
struct MultiGaussianParams {
    mean: Array1<f64>,
    covariance: Array2<f64>,
}

#[cfg(feature = "serde-1")]
impl std::convert::TryFrom<MultiGaussianParams> for OpdfMultiGaussian {
    type Error = crate::error::Error;

    fn try_from(params: MultiGaussianParams) -> Result<Self> {
        Self::new(params.mean, params.covariance)
    }
}

#[cfg(feature = "serde-1")]
impl From<OpdfMultiGaussian> for MultiGaussianParams {
    fn from(opdf: OpdfMultiGaussian) -> Self {
        Self {
            mean: opdf.mean,
            covariance: opdf.covariance,
        }
    }
}
