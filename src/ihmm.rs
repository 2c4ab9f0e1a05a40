//! Input-conditioned HMMs, where the transition taken at each step also depends on an exogenous
//! input symbol.
//!
//! $$a_{ikj} = P(X_t=j, K_t=k | X_{t-1}=i)$$
//!
//! Each source state distributes its probability mass jointly over inputs and destinations, so
//! $\sum_k \sum_j a_{ikj} = 1$ and the marginal $a_{ij} = \sum_k a_{ikj}$ is a stochastic matrix.
//! The input of an observation selects the slice used to reach it.
use crate::error::{invalid, Error, Result};
use crate::forward_backward::{self, ForwardBackward};
use crate::hmm::{fmt_states, ln_probability_given_states, predict};
use crate::model::Model;
use crate::ndarray_utils::{check_distribution, uniform};
use crate::opdf::{Opdf, OpdfFactory};
use crate::viterbi::Viterbi;
use ndarray::prelude::*;
#[cfg(feature = "serde-1")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// An observation paired with the input symbol that was active when it was emitted
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(Serialize, Deserialize))]
pub struct InputObservation<O> {
    pub input: usize,
    pub value: O,
}

impl<O> InputObservation<O> {
    pub fn new(input: usize, value: O) -> Self {
        Self { input, value }
    }
}

/// An HMM whose transitions are indexed `[from][input][to]`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-1",
    serde(
        try_from = "IhmmParams<D>",
        bound(deserialize = "D: Opdf + Deserialize<'de>")
    )
)]
pub struct Ihmm<D> {
    pi: Array1<f64>,
    a: Array3<f64>,
    opdfs: Vec<D>,
}

impl<D: Opdf> Ihmm<D> {
    /// Create a new IHMM with the given parameters.
    ///
    /// `a` must be $N × K × N$ and, for each source state, sum to 1 over inputs and destinations.
    pub fn new(pi: Array1<f64>, a: Array3<f64>, opdfs: Vec<D>) -> Result<Self> {
        let n = opdfs.len();
        if n == 0 {
            return invalid("the number of states must be strictly positive");
        }
        let (n_from, n_symbols, n_to) = a.dim();
        if n_symbols == 0 {
            return invalid("the number of input symbols must be strictly positive");
        }
        if pi.len() != n {
            return invalid(format!("π must be of length {}, not {}", n, pi.len()));
        }
        if n_from != n || n_to != n {
            return invalid(format!(
                "A must be {} × K × {}, not {:?}",
                n,
                n,
                a.shape()
            ));
        }

        check_distribution(&pi, "π")?;
        for (i, slab) in a.outer_iter().enumerate() {
            check_distribution(&slab, &format!("transitions out of state {}", i))?;
        }

        Ok(Self { pi, a, opdfs })
    }

    /// Equal initial probabilities and $a_{ikj} = 1 / (N K)$
    pub fn uniform<F: OpdfFactory<D>>(
        n_symbols: usize,
        n_states: usize,
        factory: &F,
    ) -> Result<Self> {
        if n_symbols == 0 {
            return invalid("the number of input symbols must be strictly positive");
        }
        if n_states == 0 {
            return invalid("the number of states must be strictly positive");
        }
        Ok(Self {
            pi: uniform(n_states),
            a: Array3::from_elem(
                (n_states, n_symbols, n_states),
                1.0 / (n_states * n_symbols) as f64,
            ),
            opdfs: (0..n_states).map(|_| factory.generate()).collect(),
        })
    }

    pub fn n_states(&self) -> usize {
        self.opdfs.len()
    }

    /// $K$, the number of input symbols
    pub fn n_symbols(&self) -> usize {
        self.a.len_of(Axis(1))
    }

    pub fn pi(&self) -> ArrayView1<f64> {
        self.pi.view()
    }

    /// The full $N × K × N$ transition tensor
    pub fn a(&self) -> ArrayView3<f64> {
        self.a.view()
    }

    /// $a_{ikj}$
    pub fn a_ikj(&self, i: usize, k: usize, j: usize) -> f64 {
        self.a[(i, k, j)]
    }

    /// $a_{ij} = \sum_k a_{ikj}$
    pub fn a_ij(&self, i: usize, j: usize) -> f64 {
        self.a.slice(s![i, .., j]).sum()
    }

    /// The marginal $N × N$ transition matrix. It is computed on every call.
    pub fn transition_matrix(&self) -> Array2<f64> {
        self.a.sum_axis(Axis(1))
    }

    pub fn opdf(&self, state: usize) -> &D {
        &self.opdfs[state]
    }

    pub fn opdfs(&self) -> &[D] {
        &self.opdfs
    }

    pub fn set_opdf(&mut self, state: usize, opdf: D) {
        self.opdfs[state] = opdf;
    }

    pub fn probability(&self, ys: &[InputObservation<D::Observation>]) -> Result<f64> {
        Ok(self.ln_probability(ys)?.exp())
    }

    pub fn ln_probability(&self, ys: &[InputObservation<D::Observation>]) -> Result<f64> {
        forward_backward::ln_probability(self, ys)
    }

    pub fn most_likely_state_sequence(
        &self,
        ys: &[InputObservation<D::Observation>],
    ) -> Result<Vec<usize>> {
        Ok(Viterbi::new(self, ys)?.into_state_sequence())
    }

    pub fn smooth(&self, ys: &[InputObservation<D::Observation>]) -> Result<Array2<f64>> {
        Ok(ForwardBackward::new(self, ys)?.gamma())
    }

    /// The state distribution after `n_time_steps` transitions of the marginal matrix
    pub fn predict(&self, p_states: Array1<f64>, n_time_steps: usize) -> Result<Array1<f64>> {
        predict(&self.transition_matrix(), p_states, n_time_steps)
    }

    pub fn probability_given_states(
        &self,
        ys: &[InputObservation<D::Observation>],
        xs: &[usize],
    ) -> Result<f64> {
        Ok(self.ln_probability_given_states(ys, xs)?.exp())
    }

    pub fn ln_probability_given_states(
        &self,
        ys: &[InputObservation<D::Observation>],
        xs: &[usize],
    ) -> Result<f64> {
        ln_probability_given_states(self, ys, xs)
    }
}

impl<D: Opdf> Model for Ihmm<D> {
    type Observation = InputObservation<D::Observation>;

    fn n_states(&self) -> usize {
        self.opdfs.len()
    }

    fn initial(&self, i: usize) -> f64 {
        self.pi[i]
    }

    fn transition(&self, i: usize, j: usize, next: &Self::Observation) -> f64 {
        self.a[(i, next.input, j)]
    }

    fn emission(&self, i: usize, observation: &Self::Observation) -> f64 {
        self.opdfs[i].probability(&observation.value)
    }

    fn check_sequence(&self, observations: &[Self::Observation]) -> Result<()> {
        let n_symbols = self.n_symbols();
        match observations.iter().find(|o| o.input >= n_symbols) {
            Some(o) => Err(Error::InputOutOfRange {
                input: o.input,
                n_symbols,
            }),
            None => Ok(()),
        }
    }
}

impl<D: Opdf> fmt::Display for Ihmm<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_states(f, &self.pi, &self.transition_matrix(), &self.opdfs)
    }
}

#[cfg(feature = "serde-1")]
#[derive(Deserialize)]
struct IhmmParams<D> {
    pi: Array1<f64>,
    a: Array3<f64>,
    opdfs: Vec<D>,
}

#[cfg(feature = "serde-1")]
impl<D: Opdf> std::convert::TryFrom<IhmmParams<D>> for Ihmm<D> {
    type Error = crate::error::Error;

    fn try_from(params: IhmmParams<D>) -> Result<Self> {
        Self::new(params.pi, params.a, params.opdfs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opdf::{OpdfDiscrete, OpdfDiscreteFactory};
    use itertools::Itertools;
    use lazy_static::lazy_static;
    use spectral::prelude::*;

    lazy_static! {
        /// Input 0 keeps the current state, input 1 switches it. State 0 emits 0, state 1 emits 1.
        static ref IHMM_SWITCH: Ihmm<OpdfDiscrete> = Ihmm::new(
            array![1.0, 0.0],
            array![[[0.5, 0.0], [0.0, 0.5]], [[0.0, 0.5], [0.5, 0.0]]],
            vec![
                OpdfDiscrete::from_probabilities(array![1.0, 0.0]).unwrap(),
                OpdfDiscrete::from_probabilities(array![0.0, 1.0]).unwrap(),
            ],
        )
        .unwrap();
    }

    fn seq(pairs: &[(usize, usize)]) -> Vec<InputObservation<usize>> {
        pairs
            .iter()
            .map(|&(input, value)| InputObservation::new(input, value))
            .collect()
    }

    #[test]
    fn uniform_rejects_zero_counts() {
        let factory = OpdfDiscreteFactory::new(2).unwrap();
        assert!(matches!(
            Ihmm::<OpdfDiscrete>::uniform(0, 3, &factory),
            Err(Error::InvalidConstruction(_))
        ));
        assert!(matches!(
            Ihmm::<OpdfDiscrete>::uniform(3, 0, &factory),
            Err(Error::InvalidConstruction(_))
        ));
    }

    #[test]
    fn uniform_marginal_is_stochastic() {
        let ihmm: Ihmm<OpdfDiscrete> =
            Ihmm::uniform(4, 3, &OpdfDiscreteFactory::new(2).unwrap()).unwrap();
        assert_eq!(4, ihmm.n_symbols());
        assert_eq!(3, ihmm.n_states());
        assert_that(&ihmm.a_ikj(2, 3, 1)).is_close_to(1.0 / 12.0, 1e-15);
        for row in ihmm.transition_matrix().rows() {
            assert_that(&row.sum()).is_close_to(1.0, 1e-12);
        }
        assert_that(&ihmm.a_ij(0, 2)).is_close_to(1.0 / 3.0, 1e-12);
    }

    #[test]
    fn new_rejects_unnormalized_slabs() {
        let result = Ihmm::new(
            array![1.0, 0.0],
            array![[[0.5, 0.5], [0.5, 0.5]], [[0.25, 0.25], [0.25, 0.25]]],
            vec![OpdfDiscrete::new(2).unwrap(), OpdfDiscrete::new(2).unwrap()],
        );
        assert!(matches!(result, Err(Error::InvalidConstruction(_))));
    }

    #[test]
    fn inputs_select_the_transition() {
        let ys = seq(&[(0, 0), (1, 1), (0, 1), (1, 0)]);
        assert_eq!(
            vec![0, 1, 1, 0],
            IHMM_SWITCH.most_likely_state_sequence(&ys).unwrap()
        );
        assert_that(&IHMM_SWITCH.probability(&ys).unwrap()).is_close_to(0.125, 1e-12);
        assert_that(
            &IHMM_SWITCH
                .ln_probability_given_states(&ys, &[0, 1, 1, 0])
                .unwrap(),
        )
        .is_close_to(3.0 * 0.5f64.ln(), 1e-12);
    }

    #[test]
    fn wrong_input_is_impossible() {
        // Input 0 keeps state 0, which cannot emit 1
        let ys = seq(&[(0, 0), (0, 1)]);
        assert!(matches!(
            IHMM_SWITCH.ln_probability(&ys),
            Err(Error::ZeroLikelihood { time: 1 })
        ));
    }

    #[test]
    fn input_out_of_range() {
        let ys = seq(&[(0, 0), (2, 1)]);
        assert!(matches!(
            IHMM_SWITCH.ln_probability(&ys),
            Err(Error::InputOutOfRange {
                input: 2,
                n_symbols: 2
            })
        ));
        assert!(IHMM_SWITCH.most_likely_state_sequence(&ys).is_err());
    }

    #[test]
    fn matches_brute_force() {
        let ihmm = Ihmm::new(
            array![0.3, 0.7],
            array![[[0.1, 0.2], [0.3, 0.4]], [[0.25, 0.25], [0.4, 0.1]]],
            vec![
                OpdfDiscrete::from_probabilities(array![0.6, 0.4]).unwrap(),
                OpdfDiscrete::from_probabilities(array![0.2, 0.8]).unwrap(),
            ],
        )
        .unwrap();
        let ys = seq(&[(1, 0), (0, 1), (1, 1), (0, 0)]);
        let brute_force: f64 = (0..ys.len())
            .map(|_| 0..2)
            .multi_cartesian_product()
            .map(|xs| ihmm.probability_given_states(&ys, &xs).unwrap())
            .sum();
        assert_that(&ihmm.probability(&ys).unwrap()).is_close_to(brute_force, 1e-12);
    }

    #[test]
    fn predict_uses_the_marginal() {
        // Both inputs together move all the mass out of each state half of the time
        assert_eq!(
            array![0.5, 0.5],
            IHMM_SWITCH.predict(array![1.0, 0.0], 1).unwrap()
        );
    }

    #[test]
    fn display_uses_the_marginal() {
        let text = IHMM_SWITCH.to_string();
        assert!(text.starts_with("HMM with 2 state(s)\n"));
        assert!(text.contains(" Aij: 0.5000 0.5000\n"));
    }

    #[test]
    fn clones_are_independent() {
        let mut copy = IHMM_SWITCH.clone();
        copy.set_opdf(0, OpdfDiscrete::new(2).unwrap());
        assert_ne!(*IHMM_SWITCH, copy);
        assert_eq!(1.0, IHMM_SWITCH.opdf(0).probability(&0));
    }

    #[cfg(feature = "serde-1")]
    #[test]
    fn serde_round_trip_and_validation() {
        let json = serde_json::to_string(&*IHMM_SWITCH).unwrap();
        let ihmm: Ihmm<OpdfDiscrete> = serde_json::from_str(&json).unwrap();
        assert_eq!(*IHMM_SWITCH, ihmm);

        // Slab 0 no longer sums to 1
        let mut value = serde_json::to_value(&*IHMM_SWITCH).unwrap();
        value["a"]["data"][0] = serde_json::json!(0.9);
        assert!(serde_json::from_value::<Ihmm<OpdfDiscrete>>(value).is_err());
    }
}
