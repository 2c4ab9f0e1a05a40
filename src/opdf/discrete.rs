use super::{normalized_weights, Opdf, OpdfFactory};
use crate::error::{invalid, Result};
use crate::ndarray_utils::{check_distribution, uniform};
use crate::sampler::WeightedChoiceFloat;
use itertools::Itertools;
use ndarray::prelude::*;
use rand::distributions::Distribution;
use rand::Rng;
#[cfg(feature = "serde-1")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A categorical distribution over the symbols $[0, K)$.
///
/// Observations outside of $[0, K)$ have probability 0, which lets states with smaller
/// alphabets coexist in one model.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-1", serde(try_from = "DiscreteParams"))]
pub struct OpdfDiscrete {
    probabilities: Array1<f64>,
}

impl OpdfDiscrete {
    /// A uniform distribution over `n_symbols` symbols.
    pub fn new(n_symbols: usize) -> Result<Self> {
        if n_symbols == 0 {
            return invalid("a discrete opdf needs at least one symbol");
        }
        Ok(Self {
            probabilities: uniform(n_symbols),
        })
    }

    pub fn from_probabilities(probabilities: Array1<f64>) -> Result<Self> {
        if probabilities.is_empty() {
            return invalid("a discrete opdf needs at least one symbol");
        }
        check_distribution(&probabilities, "discrete opdf probabilities")?;
        Ok(Self { probabilities })
    }

    /// $K$, the number of symbols
    pub fn n_symbols(&self) -> usize {
        self.probabilities.len()
    }

    pub fn probabilities(&self) -> ArrayView1<f64> {
        self.probabilities.view()
    }
}

impl Opdf for OpdfDiscrete {
    type Observation = usize;

    fn probability(&self, observation: &usize) -> f64 {
        self.probabilities.get(*observation).copied().unwrap_or(0.0)
    }

    fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        WeightedChoiceFloat::from_pmf(self.probabilities.iter().copied()).sample(rng)
    }

    fn fit(&mut self, observations: &[&usize], weights: &[f64]) -> Result<()> {
        let weights = normalized_weights(observations.len(), weights)?;
        let mut probabilities = Array1::zeros(self.n_symbols());
        for (&&observation, weight) in observations.iter().zip(weights) {
            // Symbols outside the alphabet are fine as long as this state never emitted them
            if weight == 0.0 {
                continue;
            }
            if observation >= self.n_symbols() {
                return invalid(format!(
                    "observation {} is out of range for {} symbols",
                    observation,
                    self.n_symbols()
                ));
            }
            probabilities[observation] += weight;
        }
        self.probabilities = probabilities;
        Ok(())
    }
}

impl fmt::Display for OpdfDiscrete {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Discrete distribution --- {}",
            self.probabilities.iter().map(|p| format!("{:.4}", p)).join(" ")
        )
    }
}

/// Builds uniform discrete opdfs over a fixed alphabet
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpdfDiscreteFactory {
    n_symbols: usize,
}

impl OpdfDiscreteFactory {
    pub fn new(n_symbols: usize) -> Result<Self> {
        if n_symbols == 0 {
            return invalid("the number of symbols must be strictly positive");
        }
        Ok(Self { n_symbols })
    }
}

impl OpdfFactory<OpdfDiscrete> for OpdfDiscreteFactory {
    fn generate(&self) -> OpdfDiscrete {
        OpdfDiscrete {
            probabilities: uniform(self.n_symbols),
        }
    }
}

#[cfg(feature = "serde-1")]
#[derive(Deserialize)]
struct DiscreteParams {
    probabilities: Array1<f64>,
}

#[cfg(feature = "serde-1")]
impl std::convert::TryFrom<DiscreteParams> for OpdfDiscrete {
    type Error = crate::error::Error;

    fn try_from(params: DiscreteParams) -> Result<Self> {
        Self::from_probabilities(params.probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use spectral::prelude::*;

    #[test]
    fn uniform_by_default() {
        let opdf = OpdfDiscrete::new(4).unwrap();
        assert_that(&opdf.probability(&2)).is_close_to(0.25, 1e-12);
    }

    #[test]
    fn out_of_range_is_impossible() {
        let opdf = OpdfDiscrete::new(6).unwrap();
        assert_eq!(0.0, opdf.probability(&7));
    }

    #[test]
    fn fit_weighted_frequencies() {
        let mut opdf = OpdfDiscrete::new(3).unwrap();
        opdf.fit(&[&0, &1, &1, &2], &[1.0, 1.0, 1.0, 2.0]).unwrap();
        assert_eq!(array![0.2, 0.4, 0.4], opdf.probabilities());
    }

    #[test]
    fn fit_zero_weight_leaves_opdf_untouched() {
        let mut opdf = OpdfDiscrete::new(2).unwrap();
        let result = opdf.fit(&[&0, &1], &[0.0, 0.0]);
        assert!(matches!(result, Err(Error::ZeroWeight)));
        assert_eq!(OpdfDiscrete::new(2).unwrap(), opdf);
    }

    #[test]
    fn new_rejects_empty_alphabet() {
        assert!(matches!(
            OpdfDiscrete::new(0),
            Err(Error::InvalidConstruction(_))
        ));
    }

    #[test]
    fn fit_ignores_unweighted_symbols_outside_alphabet() {
        let mut opdf = OpdfDiscrete::new(2).unwrap();
        opdf.fit(&[&0, &7, &1, &9], &[1.0, 0.0, 3.0, 0.0]).unwrap();
        assert_eq!(array![0.25, 0.75], opdf.probabilities());
    }

    #[test]
    fn fit_rejects_weighted_symbols_outside_alphabet() {
        let mut opdf = OpdfDiscrete::new(2).unwrap();
        let result = opdf.fit(&[&0, &7], &[1.0, 0.5]);
        assert!(matches!(result, Err(Error::InvalidConstruction(_))));
        assert_eq!(OpdfDiscrete::new(2).unwrap(), opdf);
    }

    #[test]
    fn generate_follows_probabilities() {
        let opdf = OpdfDiscrete::from_probabilities(array![0.0, 1.0, 0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(1337);
        for _ in 0..10 {
            assert_eq!(1, opdf.generate(&mut rng));
        }
    }

    #[test]
    fn factory_rejects_empty_alphabet() {
        assert!(OpdfDiscreteFactory::new(0).is_err());
        assert_eq!(5, OpdfDiscreteFactory::new(5).unwrap().generate().n_symbols());
    }

    #[cfg(feature = "serde-1")]
    #[test]
    fn serde_validates_probabilities() {
        let opdf = OpdfDiscrete::from_probabilities(array![0.25, 0.75]).unwrap();
        let json = serde_json::to_string(&opdf).unwrap();
        assert_eq!(opdf, serde_json::from_str::<OpdfDiscrete>(&json).unwrap());

        let bad = serde_json::json!({"probabilities": {"v": 1, "dim": [2], "data": [0.7, 0.7]}});
        assert!(serde_json::from_value::<OpdfDiscrete>(bad).is_err());
    }
}
