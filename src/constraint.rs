use crate::inference::ElError;
use crate::linalg;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Project `theta` onto the affine set `{θ : L·θ = r}`:
/// `θ − Lᵗ(LLᵗ)⁻¹(Lθ − r)`.
///
/// `lhs` must have full row rank. A rank-deficient constraint makes the
/// Gram system singular, which is rejected as a fatal input error rather
/// than silently producing an undefined projection.
pub fn project(
    theta: ArrayView1<f64>,
    lhs: ArrayView2<f64>,
    rhs: ArrayView1<f64>,
) -> Result<Array1<f64>, ElError> {
    if lhs.ncols() != theta.len() || lhs.nrows() != rhs.len() {
        return Err(ElError::DimensionMismatch(format!(
            "constraint is {}x{} but theta has length {} and rhs length {}",
            lhs.nrows(),
            lhs.ncols(),
            theta.len(),
            rhs.len()
        )));
    }
    if lhs.nrows() == 0 {
        return Err(ElError::InvalidInput(
            "constraint must have at least one row".into(),
        ));
    }

    let gram = lhs.dot(&lhs.t());
    let resid = lhs.dot(&theta) - &rhs;
    let z = linalg::solve_symmetric(gram.view(), resid.view())
        .map_err(|_| ElError::SingularConstraint)?;
    Ok(&theta - &lhs.t().dot(&z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn projection_lands_on_the_constraint_set() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let p = rng.random_range(2..6);
            let k = rng.random_range(1..p);
            let theta = Array1::from_shape_fn(p, |_| rng.random_range(-5.0..5.0));
            let lhs = Array2::from_shape_fn((k, p), |_| rng.random_range(-2.0..2.0));
            let rhs = Array1::from_shape_fn(k, |_| rng.random_range(-1.0..1.0));

            let projected = project(theta.view(), lhs.view(), rhs.view()).expect("project");
            let achieved = lhs.dot(&projected);
            for (a, r) in achieved.iter().zip(rhs.iter()) {
                assert!(
                    (a - r).abs() < 1e-9,
                    "constraint violated after projection: {a} vs {r}"
                );
            }
        }
    }

    #[test]
    fn point_already_on_the_set_is_unchanged() {
        let lhs = array![[1.0, -1.0, 0.0]];
        let rhs = array![0.0];
        let theta = array![2.0, 2.0, 5.0];
        let projected = project(theta.view(), lhs.view(), rhs.view()).expect("project");
        for (a, b) in projected.iter().zip(theta.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn rank_deficient_constraint_is_rejected() {
        let lhs = array![[1.0, -1.0, 0.0], [2.0, -2.0, 0.0]];
        let rhs = array![0.0, 0.0];
        let theta = array![1.0, 2.0, 3.0];
        let err = project(theta.view(), lhs.view(), rhs.view()).unwrap_err();
        assert!(matches!(err, ElError::SingularConstraint));
    }

    #[test]
    fn shape_mismatch_is_fatal() {
        let lhs = array![[1.0, -1.0]];
        let rhs = array![0.0];
        let theta = array![1.0, 2.0, 3.0];
        let err = project(theta.view(), lhs.view(), rhs.view()).unwrap_err();
        assert!(matches!(err, ElError::DimensionMismatch(_)));
    }
}
