use nalgebra::{DMatrix, DVector};

/// Singular values below this fraction are treated as zero by the pseudo-inverse.
const PINV_EPSILON: f64 = 1e-12;

/// Least-squares polynomial projector over a fixed abscissa.
///
/// Precomputes the Vandermonde matrix `V` and its pseudo-inverse `P`, so that fitting a new
/// ordinate vector is two matrix products: `coefficients = P·y`, `fitted = V·coefficients`.
/// Both the Savitzky–Golay kernels and the iterative baseline reuse one projector for many
/// fits over the same axis.
#[derive(Debug, Clone)]
pub(crate) struct PolynomialFit {
    degree: usize,
    vandermonde: DMatrix<f64>,
    projector: DMatrix<f64>,
}

impl PolynomialFit {
    /// Returns `None` when no projector can be built (empty abscissa).
    pub fn new(abscissa: &[f64], degree: usize) -> Option<Self> {
        if abscissa.is_empty() {
            return None;
        }
        let vandermonde = DMatrix::from_fn(abscissa.len(), degree + 1, |i, k| {
            abscissa[i].powi(k as i32)
        });
        let projector = vandermonde.clone().pseudo_inverse(PINV_EPSILON).ok()?;
        Some(PolynomialFit {
            degree,
            vandermonde,
            projector,
        })
    }

    pub fn coefficients(&self, values: &DVector<f64>) -> DVector<f64> {
        &self.projector * values
    }

    /// Fitted values at every abscissa point.
    pub fn fit(&self, values: &DVector<f64>) -> DVector<f64> {
        &self.vandermonde * self.coefficients(values)
    }

    /// Weights `w` such that `w·y` is the fitted polynomial evaluated at `t`.
    pub fn evaluation_weights(&self, t: f64) -> Vec<f64> {
        let powers = DVector::from_fn(self.degree + 1, |k, _| t.powi(k as i32));
        (self.projector.transpose() * powers).iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproduces_an_exact_cubic() {
        let x: Vec<f64> = (0..40).map(|i| -1.0 + i as f64 / 19.5).collect();
        let y = DVector::from_iterator(
            x.len(),
            x.iter().map(|t| 0.5 - 2.0 * t + 0.25 * t * t + 1.5 * t * t * t),
        );
        let fit = PolynomialFit::new(&x, 3).unwrap();

        let coefficients = fit.coefficients(&y);
        let expected = [0.5, -2.0, 0.25, 1.5];
        for (c, e) in coefficients.iter().zip(expected) {
            assert!((c - e).abs() < 1e-9, "{c} vs {e}");
        }
        let fitted = fit.fit(&y);
        assert!((fitted - &y).amax() < 1e-9);
    }

    #[test]
    fn evaluation_weights_sum_to_one() {
        // Any polynomial fit reproduces constants, so weights for every t sum to 1.
        let offsets: Vec<f64> = (-5..=5).map(|o| o as f64 / 5.0).collect();
        let fit = PolynomialFit::new(&offsets, 3).unwrap();
        for t in [-1.0, -0.4, 0.0, 0.8] {
            let sum: f64 = fit.evaluation_weights(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn degree_zero_is_a_plain_average() {
        let offsets: Vec<f64> = (-2..=2).map(|o| o as f64).collect();
        let fit = PolynomialFit::new(&offsets, 0).unwrap();
        for w in fit.evaluation_weights(0.0) {
            assert!((w - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn empty_abscissa_has_no_projector() {
        assert!(PolynomialFit::new(&[], 2).is_none());
    }
}
