use crate::design::{center_response, covariance_estimate};
use crate::inference::{test_constrained, ElError};
use crate::linalg;
use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use rayon::ThreadPoolBuilder;

/// All unordered treatment pairs of a `p`-treatment design, 0-based, derived
/// once per calibration.
pub fn all_pairs(p: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::with_capacity(p * (p - 1) / 2);
    for i in 0..p {
        for j in (i + 1)..p {
            pairs.push((i, j));
        }
    }
    pairs
}

/// Type-7 quantile (sorted order statistics with linear interpolation), the
/// convention the calibration cutoffs are defined under.
pub fn quantile(values: &[f64], prob: f64) -> f64 {
    debug_assert!(!values.is_empty());
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let h = (n as f64 - 1.0) * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

#[inline]
fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1 = rng.random::<f64>().max(1e-16);
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Draw `b` rows from N(0, cov) as standard normals times the symmetric
/// square root of the covariance.
fn sample_mvn<R: Rng + ?Sized>(
    cov: ArrayView2<f64>,
    b: usize,
    rng: &mut R,
) -> Result<Array2<f64>, ElError> {
    let p = cov.ncols();
    let mut draws = Array2::<f64>::zeros((b, p));
    for j in 0..p {
        for i in 0..b {
            draws[[i, j]] = sample_standard_normal(rng);
        }
    }
    let root = linalg::symmetric_sqrt(cov)?;
    Ok(draws.dot(&root))
}

fn resample_rows(m: ArrayView2<f64>, index: &[usize]) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((index.len(), m.ncols()));
    for (row, &i) in index.iter().enumerate() {
        out.row_mut(row).assign(&m.row(i));
    }
    out
}

fn validate_calibration(
    x: ArrayView2<f64>,
    c: ArrayView2<f64>,
    b: usize,
    level: f64,
) -> Result<(), ElError> {
    if x.dim() != c.dim() {
        return Err(ElError::DimensionMismatch(format!(
            "response is {}x{} but incidence is {}x{}",
            x.nrows(),
            x.ncols(),
            c.nrows(),
            c.ncols()
        )));
    }
    if x.nrows() == 0 {
        return Err(ElError::InvalidInput(
            "design must have at least one observation".into(),
        ));
    }
    if x.ncols() < 2 {
        return Err(ElError::InvalidInput(
            "pairwise calibration needs at least two treatments".into(),
        ));
    }
    if x.iter().any(|v| !v.is_finite()) || c.iter().any(|v| !v.is_finite()) {
        return Err(ElError::InvalidInput(
            "response and incidence matrices must be finite".into(),
        ));
    }
    if b == 0 {
        return Err(ElError::InvalidInput(
            "number of bootstrap replicates must be positive".into(),
        ));
    }
    if !(0.0..1.0).contains(&level) || level <= 0.0 {
        return Err(ElError::InvalidInput(format!(
            "level must lie in (0, 1), got {level}"
        )));
    }
    Ok(())
}

/// Parametric-bootstrap cutoff for simultaneous pairwise comparisons.
///
/// Replicates are multivariate normal draws under the estimated covariance;
/// each contributes its maximum Wald-type contrast statistic, and the cutoff
/// is the `1 − level` quantile of those maxima. All randomness comes from the
/// injected, caller-seeded generator.
pub fn cutoff_pairwise_parametric<R: Rng + ?Sized>(
    x: ArrayView2<f64>,
    c: ArrayView2<f64>,
    pairs: &[(usize, usize)],
    b: usize,
    level: f64,
    rng: &mut R,
) -> Result<f64, ElError> {
    validate_calibration(x, c, b, level)?;
    let p = x.ncols();
    if pairs.is_empty() {
        return Err(ElError::InvalidInput("pair list must be nonempty".into()));
    }
    if pairs.iter().any(|&(i, j)| i >= p || j >= p || i == j) {
        return Err(ElError::InvalidInput(
            "pair indices must be distinct and within the number of treatments".into(),
        ));
    }

    let v_hat = covariance_estimate(x, c);
    let u_hat = sample_mvn(v_hat.view(), b, rng)?;

    let mut maxima = vec![f64::NEG_INFINITY; b];
    for &(i, j) in pairs {
        let mut r = Array1::<f64>::zeros(p);
        r[i] = 1.0;
        r[j] = -1.0;
        // (R·u)² / (R·V̂·Rᵗ), the Wald statistic of one contrast
        let denom = r.dot(&v_hat.dot(&r));
        let proj = u_hat.dot(&r);
        for (m, &z) in maxima.iter_mut().zip(proj.iter()) {
            *m = m.max(z * z / denom);
        }
    }

    Ok(quantile(&maxima, 1.0 - level))
}

/// Nonparametric-bootstrap cutoff for simultaneous pairwise EL tests.
///
/// Rows of the C-centered response are resampled with replacement; each
/// replicate runs the full constrained EL test on every pairwise null
/// contrast and contributes its maximum deviance. This is the dominant cost
/// (`b` times `p(p−1)/2` solver runs) and fans out over a pool bounded by
/// `threads`.
///
/// The full `n·b` index block is drawn from the injected generator before
/// the parallel phase, and each replicate writes one disjoint output slot,
/// so a fixed seed gives a fixed cutoff regardless of scheduling. Replicate
/// non-convergence is absorbed into the statistic; only structural failures
/// (shape or factorization errors) surface, and even then every replicate
/// runs to completion first.
#[allow(clippy::too_many_arguments)]
pub fn cutoff_pairwise_nonparam<R: Rng + ?Sized>(
    x: ArrayView2<f64>,
    c: ArrayView2<f64>,
    b: usize,
    level: f64,
    approx: bool,
    threads: usize,
    maxit: usize,
    abstol: f64,
    rng: &mut R,
) -> Result<f64, ElError> {
    validate_calibration(x, c, b, level)?;
    if threads == 0 {
        return Err(ElError::InvalidInput(
            "thread count must be positive".into(),
        ));
    }

    let n = x.nrows();
    let p = x.ncols();
    let pairs = all_pairs(p);
    let x_centered = center_response(x, c);

    let index: Vec<usize> = (0..n * b).map(|_| rng.random_range(0..n)).collect();

    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ElError::InvalidInput(format!("could not build thread pool: {e}")))?;

    let replicate_results: Vec<Result<f64, ElError>> = pool.install(|| {
        (0..b)
            .into_par_iter()
            .map(|rep| {
                let rows = &index[rep * n..(rep + 1) * n];
                let x_b = resample_rows(x_centered.view(), rows);
                let c_b = resample_rows(c, rows);

                let mut max_stat = f64::NEG_INFINITY;
                for &(i, j) in &pairs {
                    let mut lhs = Array2::<f64>::zeros((1, p));
                    lhs[[0, i]] = 1.0;
                    lhs[[0, j]] = -1.0;
                    let rhs = Array1::<f64>::zeros(1);
                    let fit = test_constrained(
                        x_b.view(),
                        c_b.view(),
                        lhs.view(),
                        rhs.view(),
                        approx,
                        maxit,
                        abstol,
                    )?;
                    max_stat = max_stat.max(2.0 * fit.nlog_lr);
                }
                Ok(max_stat)
            })
            .collect()
    });

    let mut maxima = Vec::with_capacity(b);
    for result in replicate_results {
        maxima.push(result?);
    }
    Ok(quantile(&maxima, 1.0 - level))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::collections::HashSet;

    #[test]
    fn pair_enumeration_is_complete_and_unique() {
        for p in 2..=10usize {
            let pairs = all_pairs(p);
            assert_eq!(pairs.len(), p * (p - 1) / 2);
            let unique: HashSet<(usize, usize)> = pairs.iter().copied().collect();
            assert_eq!(unique.len(), pairs.len(), "duplicate pair for p={p}");
            for &(i, j) in &pairs {
                assert!(i < j && j < p, "bad pair ({i}, {j}) for p={p}");
            }
        }
    }

    #[test]
    fn quantile_matches_reference_values() {
        // Reference values computed with the type-7 definition.
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(quantile(&xs, 0.25), 1.75, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&xs, 0.5), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&xs, 0.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&xs, 1.0), 4.0, epsilon = 1e-12);

        let unsorted = [3.0, 1.0, 4.0, 1.5, 5.0, 9.0, 2.6];
        assert_abs_diff_eq!(quantile(&unsorted, 0.95), 7.8, epsilon = 1e-9);
    }

    #[test]
    fn quantile_of_single_value_is_that_value() {
        assert_abs_diff_eq!(quantile(&[2.5], 0.9), 2.5, epsilon = 1e-12);
    }
}
