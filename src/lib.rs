#![deny(dead_code)]
#![deny(unused_imports)]

pub mod bootstrap;
pub mod confint;
pub mod constraint;
pub mod design;
pub mod dual;
pub mod inference;
pub mod linalg;
pub mod pseudo_log;

pub use bootstrap::{all_pairs, cutoff_pairwise_nonparam, cutoff_pairwise_parametric, quantile};
pub use confint::pair_confidence_interval;
pub use constraint::project;
pub use design::{
    block_means, center_response, covariance_estimate, estimating_matrix, gradient_step,
};
pub use dual::{ElFit, solve_dual};
pub use inference::{Diagnostic, ElError, MinElFit, test_constrained, test_constrained_from};
pub use pseudo_log::{PseudoLog, plog_sum};
