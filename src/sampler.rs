//! Random sampling: categorical choices and sequences of states and observations from an `Hmm`.
use crate::hmm::Hmm;
use crate::opdf::Opdf;
use rand::prelude::*;

/// Sample from a [categorical distribution](https://en.wikipedia.org/wiki/Categorical_distribution)
/// where the weight for each category is a float.
#[derive(Clone, Debug)]
pub struct WeightedChoiceFloat {
    cmf: Vec<f64>,
}

impl WeightedChoiceFloat {
    pub fn from_pmf<I>(pmf: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let cmf = pmf
            .into_iter()
            .scan(0.0, |state, x| {
                *state += x;
                Some(*state)
            })
            .collect();
        Self { cmf }
    }
}

impl Distribution<usize> for WeightedChoiceFloat {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let total = self.cmf.last().copied().unwrap_or(0.0);
        let sampled_uniform = rng.gen::<f64>() * total;
        self.cmf
            .iter()
            .position(|&x| sampled_uniform < x)
            // Rounding can leave the uniform draw just above the last cumulative value
            .unwrap_or_else(|| self.cmf.len().saturating_sub(1))
    }
}

/// The item yielded by `HMMSampleIter`
#[derive(Clone, Debug, PartialEq)]
pub struct HMMSample<O> {
    pub state: usize,
    pub observation: O,
}

/// An iterator that returns random samples from an HMM
pub struct HMMSampleIter<'a, D, R: Rng + ?Sized + 'a> {
    hmm: &'a Hmm<D>,
    a_weighted_choices: Vec<WeightedChoiceFloat>,
    pi_weighted_choice: WeightedChoiceFloat,
    rng: &'a mut R,
    current_state: Option<usize>,
}

impl<'a, D: Opdf, R: Rng + ?Sized> HMMSampleIter<'a, D, R> {
    pub(crate) fn new(hmm: &'a Hmm<D>, rng: &'a mut R) -> Self {
        let a_weighted_choices = hmm
            .a()
            .rows()
            .into_iter()
            .map(|row| WeightedChoiceFloat::from_pmf(row.iter().copied()))
            .collect();
        let pi_weighted_choice = WeightedChoiceFloat::from_pmf(hmm.pi().iter().copied());
        Self {
            hmm,
            a_weighted_choices,
            pi_weighted_choice,
            rng,
            current_state: None,
        }
    }
}

impl<'a, D: Opdf, R: Rng + ?Sized> Iterator for HMMSampleIter<'a, D, R> {
    type Item = HMMSample<D::Observation>;

    fn next(&mut self) -> Option<Self::Item> {
        let state = if let Some(current_state) = self.current_state {
            self.a_weighted_choices[current_state].sample(self.rng)
        } else {
            self.pi_weighted_choice.sample(self.rng)
        };
        self.current_state = Some(state);
        Some(HMMSample {
            state,
            observation: self.hmm.opdf(state).generate(self.rng),
        })
    }
}

/// Create a fast RNG with reproducible outputs that isn't necessarily cryptographically strong.
#[cfg(test)]
pub(crate) fn new_rng() -> StdRng {
    StdRng::seed_from_u64(1337)
}

#[cfg(test)]
mod tests_weighted_choice_float {
    use super::*;

    #[test]
    fn unit() {
        let wcf = WeightedChoiceFloat::from_pmf(vec![1.0]);
        assert_eq!(0, wcf.sample(&mut new_rng()))
    }

    #[test]
    fn first() {
        let wcf = WeightedChoiceFloat::from_pmf(vec![1.0, 0.0]);
        assert_eq!(0, wcf.sample(&mut new_rng()))
    }

    #[test]
    fn last() {
        let wcf = WeightedChoiceFloat::from_pmf(vec![0.0, 1.0]);
        assert_eq!(1, wcf.sample(&mut new_rng()))
    }

    #[test]
    fn middle() {
        let wcf = WeightedChoiceFloat::from_pmf(vec![0.0, 1.0, 0.0]);
        assert_eq!(1, wcf.sample(&mut new_rng()))
    }

    #[test]
    fn unnormalized_weights() {
        let wcf = WeightedChoiceFloat::from_pmf(vec![0.0, 0.0, 3.0]);
        assert_eq!(2, wcf.sample(&mut new_rng()))
    }
}
