//! Observation probability distribution functions (opdfs), a.k.a. emission models.
//!
//! Each hidden state of a model owns one opdf, which gives the probability (or density) of an
//! observation while in that state. Models and calculators only ever talk to the [`Opdf`] trait,
//! so any distribution implementing it can be plugged in.
use crate::error::Result;
use rand::Rng;
use std::fmt;

mod discrete;
mod gaussian;
mod mixture;
mod multi_gaussian;

pub use self::discrete::{OpdfDiscrete, OpdfDiscreteFactory};
pub use self::gaussian::{OpdfGaussian, OpdfGaussianFactory};
pub use self::mixture::OpdfMixture;
pub use self::multi_gaussian::{OpdfMultiGaussian, OpdfMultiGaussianFactory};

pub trait Opdf: Clone + fmt::Debug + fmt::Display {
    type Observation;

    /// The probability mass (discrete opdfs) or density (continuous opdfs) of `observation`.
    /// Never negative; may exceed 1 for densities.
    fn probability(&self, observation: &Self::Observation) -> f64;

    /// Draw a random observation from this distribution.
    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Observation;

    /// Replace the parameters of this distribution with the weighted maximum likelihood
    /// estimate for `observations`. `weights[i]` is the weight of `observations[i]`; weights
    /// need not sum to 1.
    ///
    /// On failure the distribution is left unchanged.
    fn fit(&mut self, observations: &[&Self::Observation], weights: &[f64]) -> Result<()>;

    /// Fit with every observation weighted equally.
    fn fit_uniform(&mut self, observations: &[&Self::Observation]) -> Result<()> {
        let weights = vec![1.0; observations.len()];
        self.fit(observations, &weights)
    }
}

/// Builds fresh opdfs that share the same hyperparameters (alphabet size, dimension, ...).
pub trait OpdfFactory<D: Opdf> {
    fn generate(&self) -> D;
}

impl<D, F> OpdfFactory<D> for F
where
    D: Opdf,
    F: Fn() -> D,
{
    fn generate(&self) -> D {
        self()
    }
}

/// Normalize weights for fitting, rejecting negative or all-zero weights.
pub(crate) fn normalized_weights(n_observations: usize, weights: &[f64]) -> Result<Vec<f64>> {
    use crate::error::{invalid, Error};

    if weights.len() != n_observations {
        return invalid(format!(
            "got {} weights for {} observations",
            weights.len(),
            n_observations
        ));
    }
    if weights.iter().any(|w| !(*w >= 0.0) || !w.is_finite()) {
        return invalid("weights must be finite and non-negative");
    }
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return Err(Error::ZeroWeight);
    }
    Ok(weights.iter().map(|w| w / sum).collect())
}
