use crate::inference::{test_constrained_from, ElError, DEFAULT_ABSTOL, DEFAULT_MAXIT};
use ndarray::{Array1, ArrayView1, ArrayView2};

const BISECTION_TOL: f64 = 1e-4;

/// Invert the EL deviance of a single contrast into a confidence interval.
///
/// For a candidate value `v`, the oracle is the constrained test of
/// `L·θ = v`; the interval endpoints are where `2·nlogLR` crosses
/// `threshold`. Each side expands a bracket outward from `init` until the
/// threshold is exceeded and then bisects to 1e-4. The two searches share no
/// state, and every oracle call is independent of the previous ones.
pub fn pair_confidence_interval(
    theta0: ArrayView1<f64>,
    x: ArrayView2<f64>,
    c: ArrayView2<f64>,
    lhs: ArrayView2<f64>,
    approx: bool,
    init: f64,
    threshold: f64,
) -> Result<(f64, f64), ElError> {
    if lhs.nrows() != 1 {
        return Err(ElError::DimensionMismatch(format!(
            "interval inversion needs a single contrast row, got {}",
            lhs.nrows()
        )));
    }
    if !init.is_finite() || !threshold.is_finite() || threshold <= 0.0 {
        return Err(ElError::InvalidInput(
            "init must be finite and threshold positive".into(),
        ));
    }

    let deviance = |value: f64| -> Result<f64, ElError> {
        let rhs = Array1::from_elem(1, value);
        let fit = test_constrained_from(
            theta0,
            x,
            c,
            lhs,
            rhs.view(),
            approx,
            DEFAULT_MAXIT,
            DEFAULT_ABSTOL,
        )?;
        Ok(2.0 * fit.nlog_lr)
    };

    // upper endpoint: expand by unit steps, then bisect
    let mut upper_lb = init;
    let upper_size = 1.0;
    let mut upper_ub = init + upper_size;
    while deviance(upper_ub)? <= threshold {
        upper_lb = upper_ub;
        upper_ub += upper_size;
    }
    while upper_ub - upper_lb > BISECTION_TOL {
        let mid = 0.5 * (upper_lb + upper_ub);
        if deviance(mid)? > threshold {
            upper_ub = mid;
        } else {
            upper_lb = mid;
        }
    }

    // lower endpoint: the bracket width mirrors how far the upper search went
    let lower_size = upper_ub - init;
    let mut lower_ub = init;
    let mut lower_lb = init - lower_size;
    while deviance(lower_lb)? <= threshold {
        lower_ub = lower_lb;
        lower_lb -= 0.5 * lower_size;
    }
    while lower_ub - lower_lb > BISECTION_TOL {
        let mid = 0.5 * (lower_lb + lower_ub);
        if deviance(mid)? > threshold {
            lower_lb = mid;
        } else {
            lower_ub = mid;
        }
    }

    Ok((lower_ub, upper_lb))
}
