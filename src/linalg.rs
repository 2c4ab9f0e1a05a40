//! The small amount of dense linear algebra needed by multivariate Gaussian emission models.
//!
//! For a symmetric positive-definite matrix $Σ$, the Cholesky decomposition finds the lower
//! triangular $L$ with $Σ = LL^T$. From it, $\det Σ = \prod_i l_{ii}^2$ and
//! $Σ^{-1} = (L^{-1})^T L^{-1}$.
use crate::error::{invalid, Error, Result};
use ndarray::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub struct Cholesky {
    l: Array2<f64>,
}

impl Cholesky {
    /// Decompose `m`. Only the lower triangle of `m` is read.
    ///
    /// Fails with `NotPositiveDefinite` if a pivot is not strictly positive.
    pub fn decompose(m: &Array2<f64>) -> Result<Self> {
        if !m.is_square() || m.is_empty() {
            return invalid(format!(
                "Cholesky decomposition needs a non-empty square matrix, got {:?}",
                m.shape()
            ));
        }

        let n = m.nrows();
        let mut l = Array2::zeros((n, n));
        for j in 0..n {
            let mut d = 0.0;
            for k in 0..j {
                let s: f64 = (0..k).map(|i| l[(k, i)] * l[(j, i)]).sum();
                let l_jk = (m[(j, k)] - s) / l[(k, k)];
                l[(j, k)] = l_jk;
                d += l_jk * l_jk;
            }
            let d = m[(j, j)] - d;
            // Also catches NaN
            if !(d > 0.0) {
                return Err(Error::NotPositiveDefinite);
            }
            l[(j, j)] = d.sqrt();
        }

        Ok(Self { l })
    }

    /// The decomposition of the `n × n` identity matrix
    pub fn identity(n: usize) -> Self {
        Self { l: Array2::eye(n) }
    }

    /// The lower triangular factor $L$
    pub fn factor(&self) -> &Array2<f64> {
        &self.l
    }

    pub fn determinant(&self) -> f64 {
        let d: f64 = self.l.diag().iter().product();
        d * d
    }

    /// $\ln \det Σ$, which stays finite when the determinant itself would underflow
    pub fn ln_determinant(&self) -> f64 {
        2.0 * self.l.diag().iter().map(|l_ii| l_ii.ln()).sum::<f64>()
    }

    pub fn inverse(&self) -> Array2<f64> {
        let li = self.lower_triangular_inverse();
        li.t().dot(&li)
    }

    /// Forward substitution on the identity. The diagonal is strictly positive by construction.
    fn lower_triangular_inverse(&self) -> Array2<f64> {
        let n = self.l.nrows();
        let mut lti = Array2::zeros((n, n));
        for j in 0..n {
            lti[(j, j)] = 1.0 / self.l[(j, j)];
            for i in j + 1..n {
                let sum: f64 = (j..i).map(|k| self.l[(i, k)] * lti[(k, j)]).sum();
                lti[(i, j)] = -sum / self.l[(i, i)];
            }
        }
        lti
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ndarray_utils::ArrayFloat;
    use spectral::prelude::*;

    #[test]
    fn decompose_identity() {
        let cholesky = Cholesky::decompose(&Array2::eye(3)).unwrap();
        assert_eq!(&Array2::<f64>::eye(3), cholesky.factor());
        assert_that(&cholesky.determinant()).is_close_to(1.0, 1e-12);
    }

    #[test]
    fn decompose_known() {
        let m = array![[4.0, 12.0, -16.0], [12.0, 37.0, -43.0], [-16.0, -43.0, 98.0]];
        let cholesky = Cholesky::decompose(&m).unwrap();
        assert_eq!(
            &array![[2.0, 0.0, 0.0], [6.0, 1.0, 0.0], [-8.0, 5.0, 3.0]],
            cholesky.factor()
        );
        assert_that(&cholesky.determinant()).is_close_to(36.0, 1e-9);
        assert_that(&cholesky.ln_determinant()).is_close_to(36f64.ln(), 1e-9);
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let m = array![[2.0, 1.0], [1.0, 3.0]];
        let inverse = Cholesky::decompose(&m).unwrap().inverse();
        let product = m.dot(&inverse);
        assert_that(&product.l2_distance(&Array2::eye(2))).is_less_than(1e-12);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let m = array![[1.0, 1.0], [1.0, 1.0]];
        match Cholesky::decompose(&m) {
            Err(Error::NotPositiveDefinite) => {}
            other => panic!("expected NotPositiveDefinite, got {:?}", other),
        }
    }

    #[test]
    fn non_square_matrix_is_rejected() {
        let m = Array2::zeros((2, 3));
        assert!(matches!(
            Cholesky::decompose(&m),
            Err(Error::InvalidConstruction(_))
        ));
    }
}
