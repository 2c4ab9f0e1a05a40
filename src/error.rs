//! Error types shared by every model, calculator and learner in this crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A model or distribution was built with bad counts, dimensions or probabilities.
    #[error("invalid construction: {0}")]
    InvalidConstruction(String),

    #[error("the observation sequence is empty")]
    EmptySequence,

    /// No state can account for the observation at `time`, so the sequence has probability 0.
    #[error("the observation sequence is impossible under this model (time step {time})")]
    ZeroLikelihood { time: usize },

    #[error("matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("cannot fit a distribution to observations with zero total weight")]
    ZeroWeight,

    #[error("requested {requested} clusters but the input has only {distinct} distinct observations")]
    DegenerateClustering { requested: usize, distinct: usize },

    #[error("input symbol {input} is out of range for a model with {n_symbols} input symbols")]
    InputOutOfRange { input: usize, n_symbols: usize },

    /// An emission model refit failed while re-estimating a model.
    #[error("refitting the emission model of state {state} failed: {source}")]
    Refit {
        state: usize,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(Error::InvalidConstruction(message.into()))
}
