//! Ordinary least squares with an intercept, no regularisation.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{check_output, check_shape, FitError, ModelError, WaitModel, FEATURE_COUNT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    intercept: f64,
    coefficients: [f64; FEATURE_COUNT],
}

impl LinearModel {
    pub fn new(intercept: f64, coefficients: [f64; FEATURE_COUNT]) -> Self {
        Self { intercept, coefficients }
    }

    pub fn intercept(&self) -> f64 { self.intercept }
    pub fn coefficients(&self) -> &[f64; FEATURE_COUNT] { &self.coefficients }

    /// Solve the normal equations on mean-centred data, then recover the
    /// intercept from the means.
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self, FitError> {
        if x.nrows() != y.len() {
            return Err(FitError::LengthMismatch { rows: x.nrows(), targets: y.len() });
        }
        let (Some(x_mean), Some(y_mean)) = (x.mean_axis(Axis(0)), y.mean()) else {
            return Err(FitError::Empty);
        };
        let xc = &x - &x_mean;
        let yc = &y - y_mean;
        let beta = solve(xc.t().dot(&xc), xc.t().dot(&yc)).ok_or(FitError::Singular)?;

        let mut coefficients = [0.0; FEATURE_COUNT];
        for (c, b) in coefficients.iter_mut().zip(beta.iter()) {
            *c = *b;
        }
        let intercept = y_mean - x_mean.dot(&beta);
        Ok(Self { intercept, coefficients })
    }
}

impl WaitModel for LinearModel {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        check_shape(features)?;
        let value = self.coefficients.iter().zip(features).fold(self.intercept, |acc, (c, f)| acc + c * f);
        check_output(value)
    }
}

/// Gaussian elimination with partial pivoting. `None` when a pivot vanishes
/// relative to the matrix scale.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let tol = scale * 1e-12;

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() <= tol {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn recovers_exact_plane() {
        let x = array![
            [1.0, 30.0, 0.5],
            [2.0, 60.0, 1.0],
            [5.0, 45.0, 7.0],
            [9.0, 120.0, 2.5],
            [3.0, 200.0, 9.0],
            [7.0, 90.0, 4.0],
        ];
        let y: Array1<f64> = x.rows().into_iter().map(|r| 10.0 + 3.0 * r[0] + 2.0 * r[1] - 1.0 * r[2]).collect();
        let m = LinearModel::fit(x.view(), y.view()).unwrap();
        assert!((m.intercept() - 10.0).abs() < 1e-8);
        for (got, want) in m.coefficients().iter().zip([3.0, 2.0, -1.0]) {
            assert!((got - want).abs() < 1e-9, "{got} vs {want}");
        }
        let p = m.predict(&[4.0, 100.0, 1.0]).unwrap();
        assert!((p - (10.0 + 12.0 + 200.0 - 1.0)).abs() < 1e-7);
    }

    #[test]
    fn constant_column_is_singular() {
        let x = array![[1.0, 60.0, 2.0], [2.0, 60.0, 2.0], [3.0, 60.0, 2.0]];
        let y = array![60.0, 120.0, 180.0];
        assert_eq!(LinearModel::fit(x.view(), y.view()), Err(FitError::Singular));
    }

    #[test]
    fn empty_and_mismatched_inputs() {
        let x = Array2::<f64>::zeros((0, 3));
        let y = Array1::<f64>::zeros(0);
        assert_eq!(LinearModel::fit(x.view(), y.view()), Err(FitError::Empty));
        let x = Array2::<f64>::zeros((2, 3));
        assert!(matches!(LinearModel::fit(x.view(), y.view()), Err(FitError::LengthMismatch { .. })));
    }

    #[test]
    fn overflow_is_reported_not_returned() {
        let m = LinearModel::new(0.0, [f64::MAX, f64::MAX, 0.0]);
        assert!(matches!(m.predict(&[10.0, 10.0, 1.0]), Err(ModelError::NonFinite(_))));
    }
}
