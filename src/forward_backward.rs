//! The scaled forward-backward algorithm.
//!
//! Let $α_i(t) = P(Y_0=y_0, \ldots, Y_t=y_t, X_t=i | θ)$ and
//! $β_i(t) = P(Y_{t+1}=y_{t+1}, \ldots, Y_{T-1}=y_{T-1} | X_t=i, θ)$.
//!
//! Both shrink geometrically with $t$, so each forward step is normalized to sum to 1 and the
//! normalization constant $c_t$ is kept:
//!
//! $$\hat{α}(t) = \frac{\left(\sum_i \hat{α}_i(t-1) a_{ij}\right) b_j(y_t)}{c_t}$$
//!
//! $$\ln P(Y|θ) = \sum_t \ln c_t$$
//!
//! The backward pass divides by the same constants,
//! $\hat{β}_i(t) = \sum_j a_{ij} b_j(y_{t+1}) \hat{β}_j(t+1) / c_{t+1}$, so that
//! $γ_i(t) = \hat{α}_i(t)\hat{β}_i(t)$ directly.
use crate::error::{Error, Result};
use crate::model::Model;
use crate::ndarray_utils::Array1FloatMut;
use ndarray::prelude::*;

/// The posterior quantities that Baum-Welch re-estimation is built from
#[derive(Clone, Debug, PartialEq)]
pub struct Posteriors {
    /// $T × N$: `gamma[(t, i)]` is $P(X_t=i | Y, θ)$
    pub gamma: Array2<f64>,
    /// $(T-1) × N × N$: `xi[(t, i, j)]` is $P(X_t=i, X_{t+1}=j | Y, θ)$
    pub xi: Array3<f64>,
    pub ln_probability: f64,
}

/// The forward and backward tables for one observation sequence.
///
/// The tables borrow the model and the sequence they were computed from and are dropped with
/// this value.
pub struct ForwardBackward<'a, M: Model> {
    model: &'a M,
    observations: &'a [M::Observation],
    emissions: Array2<f64>,
    alpha: Array2<f64>,
    beta: Array2<f64>,
    scaling: Array1<f64>,
}

impl<'a, M: Model> ForwardBackward<'a, M> {
    /// Fails with:
    /// - `EmptySequence` if there are no observations
    /// - `ZeroLikelihood` if the sequence is impossible under the model
    pub fn new(model: &'a M, observations: &'a [M::Observation]) -> Result<Self> {
        let emissions = emission_table(model, observations)?;
        let (alpha, scaling) = forward_pass(model, observations, &emissions)?;
        let beta = backward_pass(model, observations, &emissions, &scaling);
        Ok(Self {
            model,
            observations,
            emissions,
            alpha,
            beta,
            scaling,
        })
    }

    pub fn ln_probability(&self) -> f64 {
        self.scaling.iter().map(|c| c.ln()).sum()
    }

    /// This underflows to 0 for long sequences; prefer `ln_probability`.
    pub fn probability(&self) -> f64 {
        self.ln_probability().exp()
    }

    /// $T × N$ scaled forward probabilities; each row sums to 1
    pub fn alpha(&self) -> ArrayView2<f64> {
        self.alpha.view()
    }

    /// $T × N$ scaled backward probabilities
    pub fn beta(&self) -> ArrayView2<f64> {
        self.beta.view()
    }

    /// The normalization constant $c_t$ of each forward step
    pub fn scaling(&self) -> ArrayView1<f64> {
        self.scaling.view()
    }

    /// $T × N$ posterior state probabilities; each row sums to 1
    pub fn gamma(&self) -> Array2<f64> {
        &self.alpha * &self.beta
    }

    /// $(T-1) × N × N$ posterior transition probabilities
    pub fn xi(&self) -> Array3<f64> {
        let (t_len, n) = self.alpha.dim();
        let mut xi = Array3::zeros((t_len.saturating_sub(1), n, n));
        for t in 0..t_len.saturating_sub(1) {
            let next = &self.observations[t + 1];
            let c_next = self.scaling[t + 1];
            for i in 0..n {
                for j in 0..n {
                    xi[(t, i, j)] = self.alpha[(t, i)]
                        * self.model.transition(i, j, next)
                        * self.emissions[(t + 1, j)]
                        * self.beta[(t + 1, j)]
                        / c_next;
                }
            }
        }
        xi
    }

    pub fn posteriors(&self) -> Posteriors {
        Posteriors {
            gamma: self.gamma(),
            xi: self.xi(),
            ln_probability: self.ln_probability(),
        }
    }
}

/// Run only the forward pass and return $\ln P(Y|θ)$.
pub fn ln_probability<M: Model>(model: &M, observations: &[M::Observation]) -> Result<f64> {
    let emissions = emission_table(model, observations)?;
    let (_alpha, scaling) = forward_pass(model, observations, &emissions)?;
    Ok(scaling.iter().map(|c| c.ln()).sum())
}

/// $T × N$ table of $b_i(y_t)$, after validating the sequence
fn emission_table<M: Model>(model: &M, observations: &[M::Observation]) -> Result<Array2<f64>> {
    if observations.is_empty() {
        return Err(Error::EmptySequence);
    }
    model.check_sequence(observations)?;
    Ok(Array2::from_shape_fn(
        (observations.len(), model.n_states()),
        |(t, i)| model.emission(i, &observations[t]),
    ))
}

fn forward_pass<M: Model>(
    model: &M,
    observations: &[M::Observation],
    emissions: &Array2<f64>,
) -> Result<(Array2<f64>, Array1<f64>)> {
    let (t_len, n) = emissions.dim();
    let mut alpha = Array2::zeros((t_len, n));
    let mut scaling = Array1::zeros(t_len);

    for t in 0..t_len {
        for j in 0..n {
            let predicted: f64 = if t == 0 {
                model.initial(j)
            } else {
                (0..n)
                    .map(|i| alpha[(t - 1, i)] * model.transition(i, j, &observations[t]))
                    .sum()
            };
            alpha[(t, j)] = predicted * emissions[(t, j)];
        }

        let c = alpha.row_mut(t).nip();
        // Also catches NaN
        if !(c > 0.0) {
            return Err(Error::ZeroLikelihood { time: t });
        }
        scaling[t] = c;
    }

    Ok((alpha, scaling))
}

fn backward_pass<M: Model>(
    model: &M,
    observations: &[M::Observation],
    emissions: &Array2<f64>,
    scaling: &Array1<f64>,
) -> Array2<f64> {
    let (t_len, n) = emissions.dim();
    let mut beta = Array2::zeros((t_len, n));
    beta.row_mut(t_len - 1).fill(1.0);

    for t in (0..t_len - 1).rev() {
        let next = &observations[t + 1];
        for i in 0..n {
            let sum: f64 = (0..n)
                .map(|j| model.transition(i, j, next) * emissions[(t + 1, j)] * beta[(t + 1, j)])
                .sum();
            beta[(t, i)] = sum / scaling[t + 1];
        }
    }

    beta
}
