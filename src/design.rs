use crate::linalg::{self, LinalgError};
use crate::pseudo_log::PseudoLog;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Estimating-function matrix `G(θ) = X − C ⊙ θ`, with `θ` broadcast across
/// rows. Rows of `G` stay aligned 1:1 with rows of `X` and `C`.
pub fn estimating_matrix(
    theta: ArrayView1<f64>,
    x: ArrayView2<f64>,
    c: ArrayView2<f64>,
) -> Array2<f64> {
    &x - &(&c * &theta)
}

/// Treatment means `colSum(X) / colSum(C)`, the unconstrained minimizer and
/// the default starting point of the constrained solver.
pub fn block_means(x: ArrayView2<f64>, c: ArrayView2<f64>) -> Array1<f64> {
    x.sum_axis(Axis(0)) / c.sum_axis(Axis(0))
}

/// Plug-in covariance estimate `GᵗG / n` evaluated at the treatment means.
pub fn covariance_estimate(x: ArrayView2<f64>, c: ArrayView2<f64>) -> Array2<f64> {
    let means = block_means(x, c);
    let g = estimating_matrix(means.view(), x, c);
    g.t().dot(&g) / x.nrows() as f64
}

/// Center the responses by the incidence-weighted treatment means,
/// `X − C ⊙ (colSum(X)/colSum(C))`. The nonparametric calibrator resamples
/// rows of this matrix so its replicates live under the null.
pub fn center_response(x: ArrayView2<f64>, c: ArrayView2<f64>) -> Array2<f64> {
    let means = block_means(x, c);
    &x - &(&c * &means)
}

/// One pseudo-gradient ascent step for `θ` with the multiplier held fixed:
/// `θ + γ · [colSum(dlog(1 + Gλ) ⊙ C) ⊙ λ]`.
pub fn gradient_step(
    lambda: ArrayView1<f64>,
    theta: ArrayView1<f64>,
    g: ArrayView2<f64>,
    c: ArrayView2<f64>,
    gamma: f64,
) -> Array1<f64> {
    let arg = g.dot(&lambda) + 1.0;
    let dlog = PseudoLog::evaluate(arg.view()).dlog;
    let ngradient = c.t().dot(&dlog) * &lambda;
    &theta + &(ngradient * gamma)
}

/// Linear (implicit-function) approximation of the multiplier after a move
/// from `theta0` to `theta1`, avoiding a full dual re-solve.
///
/// The Jacobian `dλ/dθ` is obtained from the stationarity condition of the
/// dual at `(θ0, λ0)`: a weighted Gram system on the left and the mixed
/// derivative in `θ` on the right.
pub fn approx_lambda(
    g0: ArrayView2<f64>,
    c: ArrayView2<f64>,
    theta0: ArrayView1<f64>,
    theta1: ArrayView1<f64>,
    lambda0: ArrayView1<f64>,
) -> Result<Array1<f64>, LinalgError> {
    let arg = (g0.dot(&lambda0) + 1.0).insert_axis(Axis(1));
    let denom = arg.mapv(|v| v * v);

    // rows of g0 scaled by 1/(1 + g0·λ0)²
    let g_scaled = &g0 / &denom;
    let lhs = g0.t().dot(&g_scaled);

    let i_rhs = Array2::from_diag(&(&c / &arg).sum_axis(Axis(0)));
    let j_rhs = g_scaled.t().dot(&(&c * &lambda0));
    let rhs = j_rhs - i_rhs;

    let jacobian = linalg::solve_symmetric_mat(lhs.view(), rhs.view())?;
    let delta = &theta1 - &theta0;
    Ok(&lambda0 + &jacobian.dot(&delta))
}
