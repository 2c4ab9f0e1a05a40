use crate::error::{invalid, Result};
use itertools::Itertools;
use ndarray::prelude::*;
use ndarray::*;
use num_traits::Float;

/// Probabilities handed to constructors must sum to 1 within this tolerance.
pub const TOLERANCE: f64 = 1e-9;

pub fn uniform(n: usize) -> Array1<f64> {
    Array1::from_elem(n, 1.0 / (n as f64))
}

/// Check that `values` is a probability distribution.
pub fn check_distribution<'a, I>(values: I, label: &str) -> Result<()>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut sum = 0.0;
    for &p in values {
        if !(p >= 0.0) || !p.is_finite() {
            return invalid(format!("{} contains the invalid probability {}", label, p));
        }
        sum += p;
    }
    if (sum - 1.0).abs() > TOLERANCE {
        return invalid(format!("{} must sum to 1, not {}", label, sum));
    }
    Ok(())
}

pub trait ArrayFloat<T: Float> {
    fn l2_distance(&self, rhs: &Self) -> T;
}

pub trait Array1Float<T: Float> {
    /// Along a 1D array, return the maximum float value and its index
    ///
    /// If there are multiple equal maximum values, the one with the lowest index is returned.
    /// Negative infinity is an ordinary value here, so an array of `-inf` yields index 0.
    ///
    /// The behavior of this function is unspecified if the array contains NaNs.
    fn maxf(&self) -> Option<(usize, T)>;
}

pub trait Array1FloatMut {
    /// Divide by the sum, leaving the array untouched if the sum is not positive.
    /// Returns the sum.
    fn nip(&mut self) -> f64;
}

pub trait Array2FloatMut {
    /// Normalize each row; a row whose sum is not positive becomes uniform.
    fn nip_rows(&mut self);
}

impl<D, S> ArrayFloat<f64> for ArrayBase<S, D>
where
    D: Dimension,
    S: Data<Elem = f64>,
{
    fn l2_distance(&self, rhs: &Self) -> f64 {
        self.iter()
            .zip(rhs.iter())
            .map(|(&x, &y)| (y - x).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl<T, S> Array1Float<T> for ArrayBase<S, Ix1>
where
    T: Float,
    S: Data<Elem = T>,
{
    fn maxf(&self) -> Option<(usize, T)> {
        self.iter()
            .enumerate()
            .fold1(|(i0, v0), (i1, v1)| if v1 > v0 { (i1, v1) } else { (i0, v0) })
            .map(|(i, &v)| (i, v))
    }
}

impl<S> Array1FloatMut for ArrayBase<S, Ix1>
where
    S: DataMut<Elem = f64>,
{
    fn nip(&mut self) -> f64 {
        let sum: f64 = self.sum();
        if sum > 0.0 {
            (*self) /= sum;
        }
        sum
    }
}

impl<S> Array2FloatMut for ArrayBase<S, Ix2>
where
    S: DataMut<Elem = f64>,
{
    fn nip_rows(&mut self) {
        let n = self.ncols();
        for mut row in self.rows_mut() {
            let sum: f64 = row.sum();
            if sum > 0.0 {
                row /= sum;
            } else {
                row.fill(1.0 / n as f64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maxf_prefers_lowest_index() {
        assert_eq!(Some((1, 3.0)), array![1.0, 3.0, 3.0].maxf());
        assert_eq!(
            Some((0, f64::NEG_INFINITY)),
            array![f64::NEG_INFINITY, f64::NEG_INFINITY].maxf()
        );
        assert_eq!(None, Array1::<f64>::zeros(0).maxf());
    }

    #[test]
    fn nip_rows_falls_back_to_uniform() {
        let mut a = array![[1.0, 3.0], [0.0, 0.0]];
        a.nip_rows();
        assert_eq!(array![[0.25, 0.75], [0.5, 0.5]], a);
    }

    #[test]
    fn check_distribution_rejects_bad_sums() {
        assert!(check_distribution(&[0.5, 0.5], "π").is_ok());
        assert!(check_distribution(&[0.5, 0.6], "π").is_err());
        assert!(check_distribution(&[1.5, -0.5], "π").is_err());
    }
}
