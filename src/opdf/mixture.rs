use super::{normalized_weights, Opdf};
use crate::error::{invalid, Error, Result};
use crate::ndarray_utils::check_distribution;
use crate::sampler::WeightedChoiceFloat;
use ndarray::prelude::*;
use rand::distributions::Distribution;
use rand::Rng;
#[cfg(feature = "serde-1")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A weighted combination of opdfs over the same observation type:
///
/// $$p(o) = \sum_k w_k p_k(o)$$
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-1",
    serde(
        try_from = "MixtureParams<D>",
        bound(deserialize = "D: Opdf + Deserialize<'de>")
    )
)]
pub struct OpdfMixture<D> {
    weights: Array1<f64>,
    components: Vec<D>,
}

impl<D: Opdf> OpdfMixture<D> {
    pub fn new(weights: Array1<f64>, components: Vec<D>) -> Result<Self> {
        if components.is_empty() {
            return invalid("a mixture needs at least one component");
        }
        if weights.len() != components.len() {
            return invalid(format!(
                "got {} weights for {} components",
                weights.len(),
                components.len()
            ));
        }
        check_distribution(&weights, "mixture weights")?;
        Ok(Self {
            weights,
            components,
        })
    }

    /// Weight every component equally
    pub fn uniform(components: Vec<D>) -> Result<Self> {
        let n = components.len().max(1);
        Self::new(Array1::from_elem(components.len(), 1.0 / n as f64), components)
    }

    pub fn weights(&self) -> ArrayView1<f64> {
        self.weights.view()
    }

    pub fn components(&self) -> &[D] {
        &self.components
    }
}

impl<D: Opdf> Opdf for OpdfMixture<D> {
    type Observation = D::Observation;

    fn probability(&self, observation: &D::Observation) -> f64 {
        self.weights
            .iter()
            .zip(&self.components)
            .map(|(w, component)| w * component.probability(observation))
            .sum()
    }

    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> D::Observation {
        let k = WeightedChoiceFloat::from_pmf(self.weights.iter().copied()).sample(rng);
        self.components[k].generate(rng)
    }

    /// A single EM step: split each observation's weight among the components in proportion to
    /// their responsibility for it, then refit every component with its share.
    ///
    /// A component with no responsibility at all keeps its parameters and gets weight 0.
    /// Observations that no component can produce are left out of the fit.
    fn fit(&mut self, observations: &[&D::Observation], weights: &[f64]) -> Result<()> {
        let weights = normalized_weights(observations.len(), weights)?;
        let n_components = self.components.len();

        // responsibilities[(t, k)] is observation t's weight assigned to component k
        let mut responsibilities = Array2::zeros((observations.len(), n_components));
        for (t, observation) in observations.iter().enumerate() {
            let mut row = responsibilities.row_mut(t);
            for (k, component) in self.components.iter().enumerate() {
                row[k] = self.weights[k] * component.probability(observation);
            }
            let sum: f64 = row.sum();
            // An unexplained observation keeps a zero row and drops out of `total`
            if sum > 0.0 {
                row *= weights[t] / sum;
            }
        }

        let total: f64 = responsibilities.sum();
        if total <= 0.0 {
            return Err(Error::ZeroWeight);
        }

        let mut components = self.components.clone();
        let mut mixture_weights = Array1::zeros(n_components);
        for (k, component) in components.iter_mut().enumerate() {
            let column = responsibilities.column(k);
            let mass: f64 = column.sum();
            mixture_weights[k] = mass / total;
            if mass > 0.0 {
                component.fit(observations, &column.to_vec())?;
            }
        }

        self.weights = mixture_weights;
        self.components = components;
        Ok(())
    }
}

impl<D: Opdf> fmt::Display for OpdfMixture<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Mixture distribution ---")?;
        for (w, component) in self.weights.iter().zip(&self.components) {
            write!(f, " [{:.4}: {}]", w, component)?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde-1")]
#[derive(Deserialize)]
struct MixtureParams<D> {
    weights: Array1<f64>,
    components: Vec<D>,
}

#[cfg(feature = "serde-1")]
impl<D: Opdf> std::convert::TryFrom<MixtureParams<D>> for OpdfMixture<D> {
    type Error = Error;

    fn try_from(params: MixtureParams<D>) -> Result<Self> {
        Self::new(params.weights, params.components)
    }
}
