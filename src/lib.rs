#![cfg_attr(feature = "benchmark", feature(test))]
//! This library contains a Rust implementation of time-invariant Hidden Markov models with
//! pluggable observation distributions. It includes maximum likelihood estimation via the
//! Baum-Welch expectation-maximization algorithm, initialization via k-means, likelihood
//! evaluation via the scaled forward-backward algorithm and hidden state inference via the Viterbi
//! algorithm.
//!
//! See [`Hmm`](struct.Hmm.html) for detailed documentation on how to work with this library.
//! Models whose transitions also depend on an input symbol are represented by
//! [`Ihmm`](struct.Ihmm.html).
//!
//! Below, a two-state HMM decodes a sequence and is then trained on it:
//!
//! ```
//! use hmmm_em::{BaumWelchLearner, Hmm, OpdfDiscrete};
//! use ndarray::array;
//!
//! let hmm = Hmm::new(
//!     array![0.5, 0.5],
//!     array![[0.9, 0.1], [0.1, 0.9]],
//!     vec![
//!         OpdfDiscrete::from_probabilities(array![0.9, 0.1])?,
//!         OpdfDiscrete::from_probabilities(array![0.1, 0.9])?,
//!     ],
//! )?;
//! let ys = [0, 0, 1, 1, 1];
//! assert_eq!(vec![0, 0, 1, 1, 1], hmm.most_likely_state_sequence(&ys)?);
//!
//! let learned = BaumWelchLearner::new().learn(&hmm, &[ys])?;
//! assert!(learned.ln_probability > hmm.ln_probability(&ys)?);
//! # Ok::<(), hmmm_em::Error>(())
//! ```
//!
//! ## Numerics
//!
//! Forward-backward normalizes every time step and keeps the normalization constants, and Viterbi
//! works with log-probabilities, so both handle sequences of any length without underflow. A
//! sequence that the model cannot produce at all is reported as
//! [`Error::ZeroLikelihood`](enum.Error.html#variant.ZeroLikelihood) rather than as a very small
//! probability.
//!
//! ## Logging
//!
//! The learners emit [`tracing`](https://docs.rs/tracing) events. Install a subscriber to see them.
//!
//! ## Building
//!
//! There is a small amount of benchmarking functionality gated by the `benchmark` feature, and
//! serialization of models gated by the `serde-1` feature.
//!
//! ## Notes
//!
//! Sections 17.3 and 17.4 of *Machine Learning a Probabilistic Perspective* by Kevin Murphy, 2012
//! were invaluable as a reference, as was section 13.2 of *Pattern Recognition and Machine
//! Learning* by Christopher Bishop, 2016. Rabiner's 1989 tutorial covers the scaling used here.
//!
//! I have attempted to make the math notation readable both as rendered HTML and from the source
//! code. The notation is strongly inspired by the Wikipedia page on the Baum-Welch algorithm.
#[cfg(feature = "benchmark")]
extern crate test;

pub mod baum_welch;
mod error;
pub mod forward_backward;
mod hmm;
mod ihmm;
pub mod kmeans;
mod linalg;
mod model;
mod ndarray_utils;
pub mod opdf;
mod sampler;
pub mod viterbi;

pub use self::baum_welch::{BaumWelchLearner, IterationReport, Learned, Reestimate, Termination};
pub use self::error::{Error, Result};
pub use self::forward_backward::{ForwardBackward, Posteriors};
pub use self::hmm::Hmm;
pub use self::ihmm::{Ihmm, InputObservation};
pub use self::kmeans::{Clusterable, KMeans, KMeansLearner};
pub use self::linalg::Cholesky;
pub use self::model::Model;
pub use self::opdf::{
    Opdf, OpdfDiscrete, OpdfDiscreteFactory, OpdfFactory, OpdfGaussian, OpdfGaussianFactory,
    OpdfMixture, OpdfMultiGaussian, OpdfMultiGaussianFactory,
};
pub use self::sampler::{HMMSample, HMMSampleIter, WeightedChoiceFloat};
pub use self::viterbi::Viterbi;

#[cfg(feature = "benchmark")]
mod benchmark {
    use crate::*;
    use test::Bencher;

    fn observations() -> Vec<usize> {
        [0, 0, 1].iter().cycle().take(1001).cloned().collect()
    }

    #[bench]
    fn bench_baum_welch(b: &mut Bencher) {
        let observations = observations();
        let factory = OpdfDiscreteFactory::new(2).unwrap();
        let hmm = Hmm::<OpdfDiscrete>::from_kmeans(2, &factory, &[&observations]).unwrap();
        b.iter(|| BaumWelchLearner::new().learn(&hmm, &[&observations]).unwrap());
    }

    #[bench]
    fn bench_viterbi(b: &mut Bencher) {
        let observations = observations();
        let factory = OpdfDiscreteFactory::new(2).unwrap();
        let hmm = Hmm::<OpdfDiscrete>::from_kmeans(2, &factory, &[&observations]).unwrap();
        b.iter(|| hmm.most_likely_state_sequence(&observations).unwrap());
    }
}
