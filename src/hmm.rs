use crate::error::{invalid, Result};
use crate::forward_backward::{self, ForwardBackward};
use crate::model::Model;
use crate::ndarray_utils::{check_distribution, uniform};
use crate::opdf::{Opdf, OpdfFactory};
use crate::sampler::HMMSampleIter;
use crate::viterbi::Viterbi;
use itertools::Itertools;
use ndarray::prelude::*;
use rand::Rng;
#[cfg(feature = "serde-1")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// This struct represents an HMM, including values for each parameter.
///
/// # Math
///
/// The HMM is used to predict a sequence of observations:
///
/// $$Y=(Y_0=y_0, Y_1=y_1, \ldots, Y_{T-1}=y_{T-1})$$
///
/// It accomplishes this with latent variables for hidden state $X=(X_0, \ldots, X_{T-1})$ where each
/// $x_t \in [0, N)$.
///
/// An HMM has three parameters:
/// * $π$, the $N$-length initial state distribution: $π_i=P(X_0=i)$
/// * $A$, the $N × N$ state transition matrix: $a_{ij}=P(X_t=j|X_{t-1}=i)$
/// * $B$, one observation distribution (an [`Opdf`]) per state: $b_i(y)=P(Y_t=y|X_t=i)$
///
/// The parameters are private so that they always describe valid distributions; learners
/// produce new models instead of editing them in place.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-1",
    serde(
        try_from = "HmmParams<D>",
        bound(deserialize = "D: Opdf + Deserialize<'de>")
    )
)]
pub struct Hmm<D> {
    pi: Array1<f64>,
    a: Array2<f64>,
    opdfs: Vec<D>,
}

impl<D: Opdf> Hmm<D> {
    /// Create a new HMM with the given parameters.
    ///
    /// Fails if any of:
    /// - Dimensions are invalid
    /// - Probability distributions are invalid
    pub fn new(pi: Array1<f64>, a: Array2<f64>, opdfs: Vec<D>) -> Result<Self> {
        let n = opdfs.len();
        if n == 0 {
            return invalid("the number of states must be strictly positive");
        }
        if pi.len() != n {
            return invalid(format!("π must be of length {}, not {}", n, pi.len()));
        }
        if a.dim() != (n, n) {
            return invalid(format!("A must be {} × {}, not {:?}", n, n, a.shape()));
        }

        check_distribution(&pi, "π")?;
        for (i, row) in a.rows().into_iter().enumerate() {
            check_distribution(&row, &format!("row {} of A", i))?;
        }

        Ok(Self { pi, a, opdfs })
    }

    /// An HMM where every state is equally likely to start and to follow any other state. Each
    /// state gets its own opdf from `factory`.
    pub fn uniform<F: OpdfFactory<D>>(n_states: usize, factory: &F) -> Result<Self> {
        if n_states == 0 {
            return invalid("the number of states must be strictly positive");
        }
        Ok(Self {
            pi: uniform(n_states),
            a: Array2::from_elem((n_states, n_states), 1.0 / n_states as f64),
            opdfs: (0..n_states).map(|_| factory.generate()).collect(),
        })
    }

    /// $N$, the number of states in this HMM
    pub fn n_states(&self) -> usize {
        self.opdfs.len()
    }

    /// $π$
    pub fn pi(&self) -> ArrayView1<f64> {
        self.pi.view()
    }

    /// $A$
    pub fn a(&self) -> ArrayView2<f64> {
        self.a.view()
    }

    /// The opdf of `state`. Panics if `state` is out of bounds.
    pub fn opdf(&self, state: usize) -> &D {
        &self.opdfs[state]
    }

    pub fn opdfs(&self) -> &[D] {
        &self.opdfs
    }

    /// Replace the opdf of `state`. Panics if `state` is out of bounds.
    pub fn set_opdf(&mut self, state: usize, opdf: D) {
        self.opdfs[state] = opdf;
    }

    pub fn sampler<'a, R: Rng + ?Sized>(&'a self, rng: &'a mut R) -> HMMSampleIter<'a, D, R> {
        HMMSampleIter::new(self, rng)
    }

    /// $P(Y|θ)$, computed with the scaled forward algorithm. This underflows to 0 for long
    /// sequences, so prefer `ln_probability`.
    pub fn probability(&self, ys: &[D::Observation]) -> Result<f64> {
        Ok(self.ln_probability(ys)?.exp())
    }

    /// $\ln P(Y|θ)$, computed with the scaled forward algorithm
    pub fn ln_probability(&self, ys: &[D::Observation]) -> Result<f64> {
        forward_backward::ln_probability(self, ys)
    }

    /// This is the Viterbi algorithm. Given a sequence of observations, return the most likely
    /// sequence of states.
    pub fn most_likely_state_sequence(&self, ys: &[D::Observation]) -> Result<Vec<usize>> {
        Ok(Viterbi::new(self, ys)?.into_state_sequence())
    }

    /// Given a sequence of observations, compute the probability of being in any given state at
    /// each point in time.
    ///
    /// Return a $T × N$ matrix where element (t, k) is the probability that we are in state k at
    /// time t.
    ///
    /// This is the forward-backward algorithm.
    pub fn smooth(&self, ys: &[D::Observation]) -> Result<Array2<f64>> {
        Ok(ForwardBackward::new(self, ys)?.gamma())
    }

    /// Given a distribution over states, calculate the probable distribution of states at a time in
    /// the future.
    ///
    /// Fails if `p_states` is not a probability distribution over this HMM's states.
    pub fn predict(&self, p_states: Array1<f64>, n_time_steps: usize) -> Result<Array1<f64>> {
        predict(&self.a, p_states, n_time_steps)
    }

    /// Return the probability of a sequence of observations together with a sequence of states.
    pub fn probability_given_states(&self, ys: &[D::Observation], xs: &[usize]) -> Result<f64> {
        Ok(self.ln_probability_given_states(ys, xs)?.exp())
    }

    /// Return the log likelihood of a sequence of states and observations. This is not a typical
    /// use case, because often the vector of hidden states is not available.
    ///
    /// Fails if the number of states and observations differ or a state is out of bounds.
    pub fn ln_probability_given_states(&self, ys: &[D::Observation], xs: &[usize]) -> Result<f64> {
        ln_probability_given_states(self, ys, xs)
    }
}

impl<D: Opdf> Model for Hmm<D> {
    type Observation = D::Observation;

    fn n_states(&self) -> usize {
        self.opdfs.len()
    }

    fn initial(&self, i: usize) -> f64 {
        self.pi[i]
    }

    fn transition(&self, i: usize, j: usize, _next: &D::Observation) -> f64 {
        self.a[(i, j)]
    }

    fn emission(&self, i: usize, observation: &D::Observation) -> f64 {
        self.opdfs[i].probability(observation)
    }
}

pub(crate) fn predict(
    a: &Array2<f64>,
    mut p_states: Array1<f64>,
    n_time_steps: usize,
) -> Result<Array1<f64>> {
    if p_states.len() != a.nrows() {
        return invalid(format!(
            "p_states must be of length {}, not {}",
            a.nrows(),
            p_states.len()
        ));
    }
    check_distribution(&p_states, "p_states")?;
    for _ in 0..n_time_steps {
        p_states = p_states.dot(a)
    }
    Ok(p_states)
}

pub(crate) fn ln_probability_given_states<M: Model>(
    model: &M,
    ys: &[M::Observation],
    xs: &[usize],
) -> Result<f64> {
    if xs.len() != ys.len() {
        return invalid(format!(
            "got {} states for {} observations",
            xs.len(),
            ys.len()
        ));
    }
    if let Some(x) = xs.iter().find(|&&x| x >= model.n_states()) {
        return invalid(format!("state {} is out of bounds", x));
    }

    // This special case is required b/c we treat the first time step specially
    if xs.is_empty() {
        return Ok(0.0);
    }
    model.check_sequence(ys)?;

    // When looping, we skip the initial observation
    let initial_state_log_prob = model.initial(xs[0]).ln();
    let initial_observation_log_prob = model.emission(xs[0], &ys[0]).ln();
    let the_rest: f64 = xs
        .iter()
        .zip(ys)
        .tuple_windows()
        .map(|((&state0, _observation0), (&state1, observation1))| {
            let transition_log_prob = model.transition(state0, state1, observation1).ln();
            let observation_log_prob = model.emission(state1, observation1).ln();
            transition_log_prob + observation_log_prob
        })
        .sum();

    Ok(initial_state_log_prob + initial_observation_log_prob + the_rest)
}

/// Write one block per state, after the header line.
pub(crate) fn fmt_states<D: fmt::Display>(
    f: &mut fmt::Formatter,
    pi: &Array1<f64>,
    a: &Array2<f64>,
    opdfs: &[D],
) -> fmt::Result {
    writeln!(f, "HMM with {} state(s)", opdfs.len())?;
    for (i, opdf) in opdfs.iter().enumerate() {
        writeln!(f)?;
        writeln!(f, "State {}", i)?;
        writeln!(f, " Pi: {}", pi[i])?;
        writeln!(
            f,
            " Aij: {}",
            a.row(i).iter().map(|a_ij| format!("{:.4}", a_ij)).join(" ")
        )?;
        writeln!(f, " Opdf: {}", opdf)?;
    }
    Ok(())
}

impl<D: Opdf> fmt::Display for Hmm<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_states(f, &self.pi, &self.a, &self.opdfs)
    }
}

/// `true` if π and every row of `a` sum to 1 within `tolerance`.
#[cfg(feature = "serde-1")]
#[derive(Deserialize)]
struct HmmParams<D> {
    pi: Array1<f64>,
    a: Array2<f64>,
    opdfs: Vec<D>,
}

#[cfg(feature = "serde-1")]
impl<D: Opdf> std::convert::TryFrom<HmmParams<D>> for Hmm<D> {
    type Error = crate::error::Error;

    fn try_from(params: HmmParams<D>) -> Result<Self> {
        Self::new(params.pi, params.a, params.opdfs)
    }
}

#[cfg(test)]
pub(crate) fn is_stochastic(pi: ArrayView1<f64>, a: ArrayView2<f64>, tolerance: f64) -> bool {
    (pi.sum() - 1.0).abs() <= tolerance
        && a.rows().into_iter().all(|row| (row.sum() - 1.0).abs() <= tolerance)
}
