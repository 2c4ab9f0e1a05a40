//! The Viterbi algorithm, computed in log space.
//!
//! $$δ_j(0) = \ln π_j + \ln b_j(y_0)$$
//!
//! $$δ_j(t) = \max_i \left(δ_i(t-1) + \ln a_{ij}\right) + \ln b_j(y_t)$$
//!
//! $ψ_j(t)$ records the maximizing $i$. Impossible events have log-probability $-∞$, which
//! survives `max` and `+` without producing NaN.
use crate::error::{Error, Result};
use crate::model::Model;
use crate::ndarray_utils::Array1Float;
use ndarray::prelude::*;

/// The most likely state sequence for one observation sequence
#[derive(Clone, Debug, PartialEq)]
pub struct Viterbi {
    states: Vec<usize>,
    ln_probability: f64,
}

impl Viterbi {
    /// Fails with:
    /// - `EmptySequence` if there are no observations
    /// - `ZeroLikelihood` if every state path is impossible
    pub fn new<M: Model>(model: &M, observations: &[M::Observation]) -> Result<Self> {
        if observations.is_empty() {
            return Err(Error::EmptySequence);
        }
        model.check_sequence(observations)?;

        let t_len = observations.len();
        let n = model.n_states();

        // delta[(t, j)] is the log-probability of the best path that ends in state j at time t
        let mut delta = Array2::from_elem((t_len, n), f64::NEG_INFINITY);
        // psi[(t, j)] is the state at t - 1 on that path. Row 0 is unused.
        let mut psi = Array2::<usize>::zeros((t_len, n));

        for j in 0..n {
            delta[(0, j)] = model.initial(j).ln() + model.emission(j, &observations[0]).ln();
        }
        check_possible(&delta, 0)?;

        for t in 1..t_len {
            let observation = &observations[t];
            for j in 0..n {
                let (best_i, best) = (0..n)
                    .map(|i| delta[(t - 1, i)] + model.transition(i, j, observation).ln())
                    .collect::<Array1<f64>>()
                    .maxf()
                    .unwrap_or((0, f64::NEG_INFINITY));
                delta[(t, j)] = best + model.emission(j, observation).ln();
                psi[(t, j)] = best_i;
            }
            check_possible(&delta, t)?;
        }

        let (mut i, ln_probability) = delta
            .row(t_len - 1)
            .maxf()
            .unwrap_or((0, f64::NEG_INFINITY));
        let mut states = vec![0; t_len];
        states[t_len - 1] = i;
        for t in (1..t_len).rev() {
            i = psi[(t, i)];
            states[t - 1] = i;
        }

        Ok(Self {
            states,
            ln_probability,
        })
    }

    /// The most likely state at each time step
    pub fn state_sequence(&self) -> &[usize] {
        &self.states
    }

    pub fn into_state_sequence(self) -> Vec<usize> {
        self.states
    }

    /// The joint log-probability of the observations and the returned state sequence
    pub fn ln_probability(&self) -> f64 {
        self.ln_probability
    }
}

fn check_possible(delta: &Array2<f64>, t: usize) -> Result<()> {
    if delta.row(t).iter().all(|&d| d == f64::NEG_INFINITY) {
        Err(Error::ZeroLikelihood { time: t })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward_backward::ForwardBackward;
    use crate::hmm::Hmm;
    use crate::opdf::OpdfDiscrete;
    use crate::sampler::{new_rng, HMMSample};
    use counter::Counter;
    use lazy_static::lazy_static;
    use rand::Rng;
    use spectral::prelude::*;
    use std::iter::repeat_with;

    lazy_static! {
        static ref HMM_FANCY: Hmm<OpdfDiscrete> = {
            let opdfs = vec![
                OpdfDiscrete::from_probabilities(array![1.0, 0.0]).unwrap(),
                OpdfDiscrete::from_probabilities(array![0.5, 0.5]).unwrap(),
                OpdfDiscrete::from_probabilities(array![0.0, 1.0]).unwrap(),
            ];
            Hmm::new(
                array![0.5, 0.0, 0.5],
                array![[0.25, 0.25, 0.5], [0.5, 0.25, 0.25], [0.25, 0.5, 0.25]],
                opdfs,
            )
            .unwrap()
        };
    }

    /// Sample a sequence from this HMM that produces the given sequence of observations. This will
    /// only work well for few observations.
    fn sample_matching<R: Rng>(
        hmm: &Hmm<OpdfDiscrete>,
        observations: &[usize],
        rng: &mut R,
    ) -> Vec<usize> {
        for _ in 0..10000 {
            let samples: Vec<HMMSample<usize>> = hmm.sampler(rng).take(observations.len()).collect();
            let matches = observations
                .iter()
                .zip(&samples)
                .all(|(&observation, sample)| observation == sample.observation);
            if matches {
                return samples.into_iter().map(|sample| sample.state).collect();
            }
        }
        panic!("That was an unlikely sequence of observations")
    }

    /// Calculate an approximation of most likely sequence by sampling.
    fn most_likely_sequence_sampled(
        hmm: &Hmm<OpdfDiscrete>,
        observations: &[usize],
        n_iterations: usize,
    ) -> Vec<usize> {
        let mut rng = new_rng();
        let (sequence, count) = repeat_with(|| sample_matching(hmm, observations, &mut rng))
            .take(n_iterations)
            .collect::<Counter<_>>()
            .most_common()
            .remove(0);
        assert_that(&count).is_greater_than(0);
        sequence
    }

    #[test]
    fn test_viterbi_empty() {
        assert!(matches!(
            Viterbi::new(&*HMM_FANCY, &[]),
            Err(Error::EmptySequence)
        ));
    }

    #[test]
    fn test_viterbi_0() {
        let viterbi = Viterbi::new(&*HMM_FANCY, &[0]).unwrap();
        assert_eq!(&[0], viterbi.state_sequence());
        assert_that(&viterbi.ln_probability()).is_close_to(0.5f64.ln(), 1e-12);
    }

    #[test]
    fn test_viterbi_1() {
        let viterbi = Viterbi::new(&*HMM_FANCY, &[1]).unwrap();
        assert_eq!(&[2], viterbi.state_sequence());
    }

    #[test]
    fn test_viterbi_0_1() {
        let ys = [0, 1];
        assert_eq!(
            Viterbi::new(&*HMM_FANCY, &ys).unwrap().into_state_sequence(),
            most_likely_sequence_sampled(&HMM_FANCY, &ys, 1000)
        );
    }

    #[test]
    fn test_viterbi() {
        let ys = [0, 1, 0, 1];
        assert_eq!(
            Viterbi::new(&*HMM_FANCY, &ys).unwrap().into_state_sequence(),
            most_likely_sequence_sampled(&HMM_FANCY, &ys, 10000)
        );
    }

    #[test]
    fn ties_go_to_the_lowest_state() {
        let hmm = Hmm::new(
            array![0.5, 0.5],
            array![[0.5, 0.5], [0.5, 0.5]],
            vec![OpdfDiscrete::new(2).unwrap(), OpdfDiscrete::new(2).unwrap()],
        )
        .unwrap();
        let viterbi = Viterbi::new(&hmm, &[0, 1, 1]).unwrap();
        assert_eq!(&[0, 0, 0], viterbi.state_sequence());
    }

    #[test]
    fn never_more_likely_than_forward_backward() {
        for ys in &[vec![0], vec![0, 1], vec![1, 1, 0, 1], vec![0, 0, 0, 1, 1, 0]] {
            let viterbi = Viterbi::new(&*HMM_FANCY, ys).unwrap();
            let fb = ForwardBackward::new(&*HMM_FANCY, ys).unwrap();
            assert_that(&viterbi.ln_probability()).is_less_than_or_equal_to(fb.ln_probability());
            assert_that(&viterbi.ln_probability()).is_close_to(
                HMM_FANCY
                    .ln_probability_given_states(ys, viterbi.state_sequence())
                    .unwrap(),
                1e-12,
            );
        }
    }

    #[test]
    fn impossible_sequence() {
        assert!(matches!(
            Viterbi::new(&*HMM_FANCY, &[0, 7]),
            Err(Error::ZeroLikelihood { time: 1 })
        ));
    }
}
