use crate::error::Result;

/// The view of a hidden Markov model that the inference algorithms need.
///
/// Both the plain [`Hmm`](crate::Hmm) and the input-conditioned [`Ihmm`](crate::Ihmm)
/// implement this, so forward-backward and Viterbi are written once for both.
pub trait Model {
    type Observation;

    /// $N$, the number of hidden states
    fn n_states(&self) -> usize;

    /// $π_i$
    fn initial(&self, i: usize) -> f64;

    /// The probability of moving from state `i` to state `j` on the step that emits `next`.
    ///
    /// Input-conditioned models read the active input symbol from `next`; others ignore it.
    fn transition(&self, i: usize, j: usize, next: &Self::Observation) -> f64;

    /// $b_i(o)$, the probability of emitting `observation` from state `i`
    fn emission(&self, i: usize, observation: &Self::Observation) -> f64;

    /// Reject sequences the model cannot index into at all.
    fn check_sequence(&self, _observations: &[Self::Observation]) -> Result<()> {
        Ok(())
    }
}
