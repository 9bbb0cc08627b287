use faer::linalg::solvers::{self, Ldlt as FaerLdlt, Llt as FaerLlt, Solve as FaerSolve};
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("LDLT factorization failed: {0:?}")]
    Ldlt(solvers::LdltError),
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    Eigen(solvers::EvdError),
}

enum SymmetricFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
}

impl SymmetricFactor {
    fn solve(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        match self {
            SymmetricFactor::Llt(f) => f.solve(rhs),
            SymmetricFactor::Ldlt(f) => f.solve(rhs),
        }
    }
}

/// Factorize a symmetric matrix, trying LLT first and falling back to LDLT
/// when the matrix is indefinite.
fn factorize_symmetric(a: ArrayView2<f64>) -> Result<SymmetricFactor, LinalgError> {
    let m = to_mat(a);
    if let Ok(llt) = FaerLlt::new(m.as_ref(), Side::Lower) {
        return Ok(SymmetricFactor::Llt(llt));
    }
    let ldlt = FaerLdlt::new(m.as_ref(), Side::Lower).map_err(LinalgError::Ldlt)?;
    Ok(SymmetricFactor::Ldlt(ldlt))
}

/// Solve `A x = b` for symmetric `A`.
pub fn solve_symmetric(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Result<Array1<f64>, LinalgError> {
    let sol = factorize_symmetric(a)?.solve(to_col(b).as_ref());
    Ok(Array1::from_shape_fn(b.len(), |i| sol[(i, 0)]))
}

/// Solve `A X = B` for symmetric `A` with a matrix right-hand side.
pub fn solve_symmetric_mat(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
) -> Result<Array2<f64>, LinalgError> {
    let sol = factorize_symmetric(a)?.solve(to_mat(b).as_ref());
    Ok(Array2::from_shape_fn((b.nrows(), b.ncols()), |(i, j)| {
        sol[(i, j)]
    }))
}

/// Symmetric square root of a positive semi-definite matrix via its
/// self-adjoint eigendecomposition. Eigenvalues that round below zero are
/// clamped before the square root.
pub fn symmetric_sqrt(a: ArrayView2<f64>) -> Result<Array2<f64>, LinalgError> {
    let p = a.nrows();
    let m = to_mat(a);
    let eigen = m
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(LinalgError::Eigen)?;
    let s = eigen.S().column_vector().as_mat();
    let u = eigen.U();

    let roots: Vec<f64> = (0..p).map(|k| s[(k, 0)].max(0.0).sqrt()).collect();
    let mut out = Array2::<f64>::zeros((p, p));
    for i in 0..p {
        for j in 0..p {
            let mut acc = 0.0;
            for (k, root) in roots.iter().enumerate() {
                acc += u[(i, k)] * root * u[(j, k)];
            }
            out[[i, j]] = acc;
        }
    }
    Ok(out)
}

fn to_mat(a: ArrayView2<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn to_col(v: ArrayView1<f64>) -> Mat<f64> {
    Mat::from_fn(v.len(), 1, |i, _| v[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn symmetric_solve_recovers_known_solution() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let x_true = array![0.5, -1.5];
        let b = a.dot(&x_true);
        let x = solve_symmetric(a.view(), b.view()).expect("solve");
        assert_abs_diff_eq!(x[0], x_true[0], epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], x_true[1], epsilon = 1e-12);
    }

    #[test]
    fn square_root_squares_back() {
        let v = array![[2.0, 0.5, 0.0], [0.5, 1.0, 0.25], [0.0, 0.25, 1.5]];
        let root = symmetric_sqrt(v.view()).expect("sqrt");
        let back: Array2<f64> = root.dot(&root);
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(back[[i, j]], v[[i, j]], epsilon = 1e-10);
            }
        }
    }
}
