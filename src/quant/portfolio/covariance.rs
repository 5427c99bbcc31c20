//! # Covariance Repair
//!
//! $$
//! \tilde\Sigma = V\,\max(\Lambda, 0)\,V^\top,\qquad \tfrac12(\Sigma+\Sigma^\top) = V\Lambda V^\top
//! $$
//!
//! Sampling noise (or a caller-supplied matrix) can leave a covariance
//! estimate slightly indefinite. The repair projects it onto the PSD cone by
//! clamping negative eigenvalues of its symmetric part.

use nalgebra::DMatrix;
use nalgebra::SymmetricEigen;
use ndarray::Array2;
use tracing::warn;

use crate::error::PortfolioError;
use crate::error::Result;

/// Relative eigenvalue tolerance; scaled by the largest absolute entry.
pub const PSD_TOLERANCE: f64 = 1e-12;

/// Output of [`ensure_psd`].
#[derive(Clone, Debug)]
pub struct RepairedCovariance {
  pub matrix: Array2<f64>,
  /// Whether negative eigenvalues had to be clamped.
  pub repaired: bool,
  /// Smallest eigenvalue of the symmetrized input.
  pub min_eigenvalue: f64,
}

fn validate_square(a: &Array2<f64>) -> Result<usize> {
  let (r, c) = a.dim();
  if r != c {
    return Err(PortfolioError::invalid(
      "covariance",
      format!("matrix must be square, got {r}x{c}"),
    ));
  }
  if a.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::invalid("covariance", "matrix contains non-finite entries"));
  }
  Ok(r)
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
  let (r, c) = a.dim();
  DMatrix::from_fn(r, c, |i, j| a[[i, j]])
}

fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
  Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

fn tolerance(a: &Array2<f64>) -> f64 {
  PSD_TOLERANCE * a.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

/// `(A + Aᵀ) / 2`.
pub fn symmetrize(a: &Array2<f64>) -> Array2<f64> {
  (a + &a.t()) * 0.5
}

fn eigen(a: &Array2<f64>) -> SymmetricEigen<f64, nalgebra::Dyn> {
  SymmetricEigen::new(to_dmatrix(&symmetrize(a)))
}

/// Smallest eigenvalue of the symmetric part of `a`.
pub fn min_eigenvalue(a: &Array2<f64>) -> Result<f64> {
  let n = validate_square(a)?;
  if n == 0 {
    return Ok(0.0);
  }
  Ok(eigen(a).eigenvalues.min())
}

/// `Err(NonPsdCovariance)` if the symmetric part of `a` has an eigenvalue below
/// the tolerance.
pub fn check_psd(a: &Array2<f64>) -> Result<()> {
  let min_eigenvalue = min_eigenvalue(a)?;
  if min_eigenvalue < -tolerance(a) {
    return Err(PortfolioError::NonPsdCovariance { min_eigenvalue });
  }
  Ok(())
}

/// Nearest symmetric PSD matrix: symmetrize, eigendecompose, clamp, rebuild.
pub fn nearest_psd(a: &Array2<f64>) -> Result<Array2<f64>> {
  let n = validate_square(a)?;
  if n == 0 {
    return Ok(a.clone());
  }

  let eig = eigen(a);
  let clamped = eig.eigenvalues.map(|l| l.max(0.0));
  let v = &eig.eigenvectors;
  let rebuilt = v * DMatrix::from_diagonal(&clamped) * v.transpose();

  // The product is symmetric only up to rounding.
  Ok(symmetrize(&from_dmatrix(&rebuilt)))
}

/// Return a PSD covariance, repairing it when needed. Never fails on
/// indefiniteness alone; the repair is logged.
pub fn ensure_psd(a: &Array2<f64>) -> Result<RepairedCovariance> {
  match check_psd(a) {
    Ok(()) => Ok(RepairedCovariance {
      matrix: symmetrize(a),
      repaired: false,
      min_eigenvalue: min_eigenvalue(a)?,
    }),
    Err(PortfolioError::NonPsdCovariance { min_eigenvalue }) => {
      warn!(
        min_eigenvalue,
        dim = a.nrows(),
        "covariance matrix is not positive semi-definite, projecting to nearest PSD"
      );
      Ok(RepairedCovariance {
        matrix: nearest_psd(a)?,
        repaired: true,
        min_eigenvalue,
      })
    }
    Err(e) => Err(e),
  }
}

/// Square-root factor `L = V diag(sqrt(max(λ, 0)))` with `L Lᵀ = Σ`. Works for
/// singular matrices, where a Cholesky factorization would not exist.
pub(crate) fn psd_factor(a: &Array2<f64>) -> Result<Array2<f64>> {
  let n = validate_square(a)?;
  if n == 0 {
    return Ok(a.clone());
  }

  let eig = eigen(a);
  let roots = eig.eigenvalues.map(|l| l.max(0.0).sqrt());
  let factor = &eig.eigenvectors * DMatrix::from_diagonal(&roots);
  Ok(from_dmatrix(&factor))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use tracing_test::traced_test;

  use super::*;

  fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    (a - b).iter().fold(0.0_f64, |m, v| m.max(v.abs()))
  }

  #[test]
  fn indefinite_matrix_is_projected() {
    // Eigenvalues 3 and -1, eigenvectors (1, 1) and (1, -1).
    let a = array![[1.0, 2.0], [2.0, 1.0]];
    assert!(matches!(
      check_psd(&a),
      Err(PortfolioError::NonPsdCovariance { min_eigenvalue }) if (min_eigenvalue + 1.0).abs() < 1e-12
    ));

    let fixed = nearest_psd(&a).unwrap();
    let expected = array![[1.5, 1.5], [1.5, 1.5]];
    assert!(max_abs_diff(&fixed, &expected) < 1e-12);
    assert!(check_psd(&fixed).is_ok());
  }

  #[test]
  fn repair_is_symmetric_and_idempotent() {
    let a = array![
      [0.04, 0.05, -0.02],
      [0.03, 0.01, 0.04],
      [-0.02, 0.04, 0.02]
    ];
    let once = nearest_psd(&a).unwrap();
    let twice = nearest_psd(&once).unwrap();

    assert!(max_abs_diff(&once, &once.t().to_owned()) < 1e-15);
    assert!(min_eigenvalue(&once).unwrap() > -1e-12);
    assert!(max_abs_diff(&once, &twice) < 1e-12);
  }

  #[test]
  fn psd_input_is_unchanged() {
    let a = array![[0.0004, 0.0001], [0.0001, 0.0002]];
    let fixed = nearest_psd(&a).unwrap();
    assert!(max_abs_diff(&a, &fixed) < 1e-15);
  }

  #[test]
  #[traced_test]
  fn ensure_psd_logs_repairs() {
    let ok = ensure_psd(&array![[1.0, 0.0], [0.0, 2.0]]).unwrap();
    assert!(!ok.repaired);
    assert_abs_diff_eq!(ok.min_eigenvalue, 1.0, epsilon = 1e-12);

    let fixed = ensure_psd(&array![[1.0, 2.0], [2.0, 1.0]]).unwrap();
    assert!(fixed.repaired);
    assert!(logs_contain("not positive semi-definite"));
  }

  #[test]
  fn factor_reproduces_singular_matrix() {
    let a = array![[1.0, 1.0], [1.0, 1.0]];
    let l = psd_factor(&a).unwrap();
    let back = l.dot(&l.t());
    assert!(max_abs_diff(&a, &back) < 1e-12);
  }

  #[test]
  fn non_square_is_rejected() {
    let a = Array2::<f64>::zeros((2, 3));
    assert!(matches!(
      nearest_psd(&a),
      Err(PortfolioError::InvalidParameter { .. })
    ));
  }
}
