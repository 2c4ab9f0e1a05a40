//! Baum-Welch, the expectation-maximization algorithm for HMMs.
//!
//! Each iteration runs forward-backward over every training sequence and re-estimates
//!
//! $$π_i = \frac{1}{S} \sum_s γ^s_i(0)$$
//!
//! $$a_{ij} = \frac{\sum_s \sum_{t<T_s-1} ξ^s_{ij}(t)}{\sum_s \sum_{t<T_s-1} γ^s_i(t)}$$
//!
//! and refits the opdf of every state $i$ to all observations, weighting $y^s_t$ by $γ^s_i(t)$.
//! The log-likelihood of the training data never decreases from one iteration to the next, up
//! to rounding.
use crate::error::{Error, Result};
use crate::forward_backward::{ForwardBackward, Posteriors};
use crate::hmm::Hmm;
use crate::ihmm::{Ihmm, InputObservation};
use crate::model::Model;
use crate::ndarray_utils::{Array1FloatMut, Array2FloatMut};
use crate::opdf::Opdf;
use ndarray::prelude::*;
use tracing::{debug, info, warn};

/// Decreases in log-likelihood smaller than this are rounding noise.
const REGRESSION_NOISE: f64 = 1e-7;

/// A model whose parameters can be re-estimated from forward-backward posteriors
pub trait Reestimate: Model + Clone + Sized {
    /// Build the next model from the posteriors of `sequences` under `self`.
    ///
    /// `posteriors[s]` must have been computed from `sequences[s]`.
    fn reestimate(
        &self,
        sequences: &[&[Self::Observation]],
        posteriors: &[Posteriors],
    ) -> Result<Self>;
}

impl<D: Opdf> Reestimate for Hmm<D> {
    fn reestimate(
        &self,
        sequences: &[&[D::Observation]],
        posteriors: &[Posteriors],
    ) -> Result<Self> {
        let n = self.n_states();
        let mut a = Array2::zeros((n, n));
        for p in posteriors {
            a += &p.xi.sum_axis(Axis(0));
        }
        // Row i of the summed ξ adds up to the γ denominator of state i
        a.nip_rows();

        let observations: Vec<&D::Observation> =
            sequences.iter().flat_map(|sequence| sequence.iter()).collect();
        let opdfs = refit_opdfs(self.opdfs(), &observations, posteriors)?;

        Hmm::new(initial_distribution(n, posteriors), a, opdfs)
    }
}

impl<D: Opdf> Reestimate for Ihmm<D> {
    fn reestimate(
        &self,
        sequences: &[&[InputObservation<D::Observation>]],
        posteriors: &[Posteriors],
    ) -> Result<Self> {
        let (n, k) = (self.n_states(), self.n_symbols());
        let mut a = Array3::zeros((n, k, n));
        for (sequence, p) in sequences.iter().zip(posteriors) {
            for (t, xi_t) in p.xi.outer_iter().enumerate() {
                // The input of the destination step selects the slice
                let input = sequence[t + 1].input;
                let mut slice = a.slice_mut(s![.., input, ..]);
                slice += &xi_t;
            }
        }
        for mut slab in a.outer_iter_mut() {
            let sum = slab.sum();
            if sum > 0.0 {
                slab /= sum;
            } else {
                slab.fill(1.0 / (n * k) as f64);
            }
        }

        let observations: Vec<&D::Observation> = sequences
            .iter()
            .flat_map(|sequence| sequence.iter().map(|o| &o.value))
            .collect();
        let opdfs = refit_opdfs(self.opdfs(), &observations, posteriors)?;

        Ihmm::new(initial_distribution(n, posteriors), a, opdfs)
    }
}

/// The mean of the first row of γ over all sequences
fn initial_distribution(n_states: usize, posteriors: &[Posteriors]) -> Array1<f64> {
    let mut pi = Array1::zeros(n_states);
    for p in posteriors {
        pi += &p.gamma.row(0);
    }
    pi.nip();
    pi
}

/// Refit a copy of every opdf, weighting the concatenated observations by γ.
///
/// A state that no observation is attributed to fails with `ZeroWeight`.
fn refit_opdfs<D: Opdf>(
    opdfs: &[D],
    observations: &[&D::Observation],
    posteriors: &[Posteriors],
) -> Result<Vec<D>> {
    opdfs
        .iter()
        .enumerate()
        .map(|(state, opdf)| {
            let weights: Vec<f64> = posteriors
                .iter()
                .flat_map(|p| p.gamma.column(state).to_vec())
                .collect();
            let mut opdf = opdf.clone();
            opdf.fit(observations, &weights)
                .map_err(|source| Error::Refit {
                    state,
                    source: Box::new(source),
                })?;
            Ok(opdf)
        })
        .collect()
}

/// Why `BaumWelchLearner::learn` stopped
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Termination {
    /// The log-likelihood changed by less than one of the tolerances.
    Converged,
    /// `max_iterations` re-estimations were performed first.
    IterationCap,
}

/// Passed to the observer of `BaumWelchLearner::learn_with` once per evaluated model
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationReport {
    /// The number of re-estimations that produced the model
    pub iteration: usize,
    /// The log-likelihood of the training sequences under the model
    pub ln_probability: f64,
    /// The change from the previous model, if there was one
    pub improvement: Option<f64>,
}

/// The outcome of `BaumWelchLearner::learn`
#[derive(Clone, Debug)]
pub struct Learned<M> {
    pub model: M,
    pub termination: Termination,
    /// The number of re-estimations that produced `model`
    pub iterations: usize,
    /// The log-likelihood of the training sequences under `model`
    pub ln_probability: f64,
    /// The log-likelihood after each re-estimation, starting with the initial model
    pub history: Vec<f64>,
}

/// Trains models with the Baum-Welch algorithm.
///
/// ```
/// use hmmm_em::{BaumWelchLearner, Hmm, OpdfDiscreteFactory, Termination};
///
/// let hmm = Hmm::uniform(1, &OpdfDiscreteFactory::new(2).unwrap()).unwrap();
/// let learned = BaumWelchLearner::new()
///     .max_iterations(10)
///     .learn(&hmm, &[vec![0, 0, 1]])
///     .unwrap();
/// assert_eq!(Termination::Converged, learned.termination);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BaumWelchLearner {
    max_iterations: usize,
    absolute_tolerance: f64,
    relative_tolerance: f64,
}

impl Default for BaumWelchLearner {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            absolute_tolerance: 1e-6,
            relative_tolerance: 1e-9,
        }
    }
}

impl BaumWelchLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The maximum number of re-estimations performed by `learn`
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Stop once the log-likelihood changes by at most this much.
    pub fn absolute_tolerance(mut self, absolute_tolerance: f64) -> Self {
        self.absolute_tolerance = absolute_tolerance;
        self
    }

    /// Stop once the log-likelihood changes by at most this fraction of its magnitude.
    pub fn relative_tolerance(mut self, relative_tolerance: f64) -> Self {
        self.relative_tolerance = relative_tolerance;
        self
    }

    /// Perform a single re-estimation of `model`.
    pub fn iterate<M, S>(&self, model: &M, sequences: &[S]) -> Result<M>
    where
        M: Reestimate,
        S: AsRef<[M::Observation]>,
    {
        expectation(model, sequences)?.reestimate(model)
    }

    /// Re-estimate `model` until convergence or the iteration cap.
    pub fn learn<M, S>(&self, model: &M, sequences: &[S]) -> Result<Learned<M>>
    where
        M: Reestimate,
        S: AsRef<[M::Observation]>,
    {
        self.learn_with(model, sequences, |_| {})
    }

    /// Like `learn`, calling `observer` after each model is evaluated.
    pub fn learn_with<M, S, F>(
        &self,
        model: &M,
        sequences: &[S],
        mut observer: F,
    ) -> Result<Learned<M>>
    where
        M: Reestimate,
        S: AsRef<[M::Observation]>,
        F: FnMut(&IterationReport),
    {
        let mut current = model.clone();
        let mut history: Vec<f64> = Vec::new();

        loop {
            let iteration = history.len();
            let expectation = expectation(&current, sequences)?;
            let ln_probability = expectation.ln_probability;
            let improvement = history.last().map(|previous| ln_probability - previous);
            history.push(ln_probability);

            let report = IterationReport {
                iteration,
                ln_probability,
                improvement,
            };
            debug!(iteration, ln_probability, "Baum-Welch iteration");
            observer(&report);

            let termination = match improvement {
                Some(delta) => {
                    if delta < -REGRESSION_NOISE {
                        warn!(iteration, delta, "Baum-Welch log-likelihood decreased");
                    }
                    if self.has_converged(delta, ln_probability) {
                        Some(Termination::Converged)
                    } else {
                        None
                    }
                }
                None => None,
            };
            let termination = termination.or_else(|| {
                if iteration >= self.max_iterations {
                    Some(Termination::IterationCap)
                } else {
                    None
                }
            });

            if let Some(termination) = termination {
                info!(
                    ?termination,
                    iterations = iteration,
                    ln_probability,
                    "Baum-Welch finished"
                );
                return Ok(Learned {
                    model: current,
                    termination,
                    iterations: iteration,
                    ln_probability,
                    history,
                });
            }
            current = expectation.reestimate(&current)?;
        }
    }

    fn has_converged(&self, delta: f64, ln_probability: f64) -> bool {
        let delta = delta.abs();
        delta <= self.absolute_tolerance || delta <= self.relative_tolerance * ln_probability.abs()
    }
}

/// The posteriors of every training sequence under one model
struct Expectation<'a, O> {
    sequences: Vec<&'a [O]>,
    posteriors: Vec<Posteriors>,
    ln_probability: f64,
}

impl<'a, O> Expectation<'a, O> {
    fn reestimate<M: Reestimate<Observation = O>>(&self, model: &M) -> Result<M> {
        model.reestimate(&self.sequences, &self.posteriors)
    }
}

/// Run forward-backward for `model` over each of `sequences`.
fn expectation<'a, M, S>(
    model: &M,
    sequences: &'a [S],
) -> Result<Expectation<'a, M::Observation>>
where
    M: Model,
    S: AsRef<[M::Observation]>,
{
    if sequences.is_empty() {
        return Err(Error::EmptySequence);
    }
    let sequences: Vec<&[M::Observation]> = sequences.iter().map(AsRef::as_ref).collect();
    let posteriors = sequences
        .iter()
        .map(|sequence| -> Result<Posteriors> {
            Ok(ForwardBackward::new(model, sequence)?.posteriors())
        })
        .collect::<Result<Vec<_>>>()?;
    let ln_probability = posteriors.iter().map(|p| p.ln_probability).sum();
    Ok(Expectation {
        sequences,
        posteriors,
        ln_probability,
    })
}
