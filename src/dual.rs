use crate::inference::ElError;
use crate::linalg;
use crate::pseudo_log::{plog_sum, PseudoLog};
use ndarray::{Array1, ArrayView2, Axis};

/// Inner (dual) solve defaults, used wherever the primal loop re-solves the
/// multiplier for a fresh estimating matrix.
pub const DUAL_MAXIT: usize = 100;
pub const DUAL_ABSTOL: f64 = 1e-8;

/// Result of the dual EL maximization for a fixed estimating matrix.
///
/// `converged = false` is not an error: the last iterate is still a usable
/// (conservative) multiplier, and the primal loop decides what to do with it.
#[derive(Debug, Clone)]
pub struct ElFit {
    /// Negative log-likelihood ratio, the summed smoothed log at the final
    /// multiplier. Zero at `λ = 0`, nonnegative at the optimum.
    pub nlog_lr: f64,
    pub lambda: Array1<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Maximize the dual EL objective `Σ plog(1 + λᵗg_i)` over the multiplier by
/// Newton-Raphson on the normal equations.
///
/// Each step solves `(JᵗJ)·step = Jᵗ(dlog/√(−d2log))` where `J` is the
/// estimating matrix scaled rowwise by `√(−d2log)`, then halves the step
/// until the candidate objective no longer falls below the current one. The
/// halving sense is ascent: the dual is a maximization, in contrast to the
/// primal descent loop in [`crate::inference`].
pub fn solve_dual(g: ArrayView2<f64>, maxit: usize, abstol: f64) -> Result<ElFit, ElError> {
    if g.nrows() == 0 || g.ncols() == 0 {
        return Err(ElError::InvalidInput(
            "estimating matrix must have at least one row and one column".into(),
        ));
    }

    let mut lambda = Array1::<f64>::zeros(g.ncols());
    // objective at λ = 0; every entry of 1 + Gλ is one
    let mut f1 = 0.0;
    let mut iterations = 0usize;
    let mut converged = false;

    while !converged && iterations != maxit {
        let arg = g.dot(&lambda) + 1.0;
        let log_tmp = PseudoLog::evaluate(arg.view());

        let weights = log_tmp.sqrt_neg_d2log.view().insert_axis(Axis(1));
        let j = &g * &weights;
        let jtj = j.t().dot(&j);
        let y = &log_tmp.dlog / &log_tmp.sqrt_neg_d2log;
        let jty = j.t().dot(&y);
        // A degenerate estimating column (for example a constant response
        // under a resampled design) makes the weighted Gram singular. The
        // current iterate is still usable, so stop and report
        // non-convergence instead of aborting.
        let mut step = match linalg::solve_symmetric(jtj.view(), jty.view()) {
            Ok(step) => step,
            Err(_) => break,
        };

        f1 = plog_sum((g.dot(&(&lambda + &step)) + 1.0).view());
        // ascent safeguard: shrink until the proposal stops losing ground
        while f1 < log_tmp.sum {
            step *= 0.5;
            f1 = plog_sum((g.dot(&(&lambda + &step)) + 1.0).view());
        }
        lambda += &step;

        if f1 - log_tmp.sum < abstol {
            converged = true;
        } else {
            iterations += 1;
        }
    }

    Ok(ElFit {
        nlog_lr: f1,
        lambda,
        iterations,
        converged,
    })
}
