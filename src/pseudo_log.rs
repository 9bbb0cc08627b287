use ndarray::{Array1, ArrayView1};

/// Smoothed logarithm family used by the EL objective.
///
/// Below the knot at `n·x = 1` the log is replaced by the quadratic that
/// matches it in value, slope, and curvature at `1/n`, so the objective stays
/// finite and twice differentiable for any proposed multiplier. Above the
/// knot the plain log is used. All three outputs pick their branch from the
/// same predicate, so they are always mutually consistent.
pub struct PseudoLog {
    /// Sum of the smoothed log over all entries.
    pub sum: f64,
    /// Elementwise first derivative.
    pub dlog: Array1<f64>,
    /// Elementwise square root of the negated second derivative, the row
    /// weight of the Newton least-squares system.
    pub sqrt_neg_d2log: Array1<f64>,
}

impl PseudoLog {
    pub fn evaluate(x: ArrayView1<f64>) -> Self {
        let n = x.len() as f64;
        let a1 = -n.ln() - 1.5;
        let a2 = 2.0 * n;
        let a3 = -0.5 * n * n;

        let mut sum = 0.0;
        let mut dlog = Array1::<f64>::zeros(x.len());
        let mut sqrt_neg_d2log = Array1::<f64>::zeros(x.len());
        for (i, &xi) in x.iter().enumerate() {
            if n * xi < 1.0 {
                sum += a1 + a2 * xi + a3 * xi * xi;
                dlog[i] = a2 + 2.0 * a3 * xi;
                sqrt_neg_d2log[i] = 0.5 * a2;
            } else {
                sum += xi.ln();
                dlog[i] = 1.0 / xi;
                sqrt_neg_d2log[i] = 1.0 / xi;
            }
        }

        PseudoLog {
            sum,
            dlog,
            sqrt_neg_d2log,
        }
    }
}

/// Sum-only evaluation of the smoothed log, for the hot paths that do not
/// need derivatives.
pub fn plog_sum(x: ArrayView1<f64>) -> f64 {
    let n = x.len() as f64;
    let a1 = -n.ln() - 1.5;
    let a2 = 2.0 * n;
    let a3 = -0.5 * n * n;
    x.iter()
        .map(|&xi| {
            if n * xi < 1.0 {
                a1 + a2 * xi + a3 * xi * xi
            } else {
                xi.ln()
            }
        })
        .sum()
}
