use std::time::{Duration, Instant};

use log::{debug, warn};
use spsolve::Solver;

use crate::ipm::{ipm, DenseQp, IpmOptions};
use crate::matrix::Matrix;
use crate::qpbuild::{QpData, QpSolution, QpStatus};
use crate::traits::{Jacobian, QpSolver};

/// Quadratic Program Solver based on an interior point method.
///
/// Solves the QP subproblems
///
/// ```txt
///       min 1/2 d'*H*d + g'*d
///        d
/// ```
///
/// subject to
///
/// ```txt
///       lower <= [d; A*d] <= upper
/// ```
///
/// with dense linear algebra, factorizing the Newton systems with the
/// sparse solver `S`. The previous solution is not used: the iterates
/// start from the origin projected onto the variable bounds.
pub struct InteriorPointQp<S: Solver<usize, f64>> {
    solver: S,
    pub opt: IpmOptions,
}

impl<S: Solver<usize, f64>> InteriorPointQp<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            opt: IpmOptions::default(),
        }
    }

    pub fn with_options(solver: S, opt: IpmOptions) -> Self {
        Self { solver, opt }
    }
}

impl<S: Solver<usize, f64>> QpSolver for InteriorPointQp<S> {
    fn solve(&self, qp: &QpData, _warm: Option<&QpSolution>) -> QpSolution {
        let n_var = qp.n_var();
        let n_con = qp.n_con();

        if qp.lower.iter().zip(qp.upper).any(|(l, u)| l > u) {
            debug!("QP has inconsistent bounds");
            return QpSolution::failed(QpStatus::Infeasible, n_var, n_con, 0);
        }

        let a = match qp.constraints {
            Jacobian::Dense(a) => a.clone(),
            Jacobian::Sparse(a) => a.to_dense(),
            Jacobian::Unsupported if n_con == 0 => Matrix::zeros(0, n_var),
            Jacobian::Unsupported => {
                warn!("QP constraint matrix unavailable");
                return QpSolution::failed(QpStatus::NumericalError, n_var, n_con, 0);
            }
        };
        let h = qp.hessian.to_dense();

        let x0: Vec<f64> = (0..n_var)
            .map(|i| 0.0_f64.max(qp.lower[i]).min(qp.upper[i]))
            .collect();
        let deadline = if qp.max_time.is_finite() && qp.max_time > 0.0 {
            Some(Instant::now() + Duration::from_secs_f64(qp.max_time))
        } else {
            None
        };

        let dense = DenseQp {
            h: &h,
            c: qp.gradient,
            a: &a,
            l: qp.lower,
            u: qp.upper,
        };
        let result = ipm(&dense, &x0, &self.solver, &self.opt, qp.max_iter, deadline);

        let status = if result.converged {
            QpStatus::Optimal
        } else if result.feascond > self.opt.infeas_tol {
            QpStatus::Infeasible
        } else if result.failed {
            QpStatus::NumericalError
        } else {
            QpStatus::IterationLimit
        };
        debug!(
            "QP {:?} after {} iterations (feascond {:.2e})",
            status, result.iterations, result.feascond
        );

        QpSolution {
            status,
            step: result.x,
            lambda: result.y,
            active: result.active,
            iterations: result.iterations,
            objective: result.f,
        }
    }
}
