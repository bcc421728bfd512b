use anyhow::Result;

use crate::diagnostics::ProgressRecord;
use crate::matrix::{Matrix, SparseMatrix, SymMatrix};
use crate::qpbuild::{QpData, QpSolution};

/// Storage requested for the constraint Jacobian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JacobianKind {
    Dense,
    Sparse,
}

/// Constraint Jacobian of size `n_con` x `n_var`.
#[derive(Clone, Debug, PartialEq)]
pub enum Jacobian {
    Dense(Matrix),
    Sparse(SparseMatrix),
    /// The problem cannot provide the requested kind.
    Unsupported,
}

impl Jacobian {
    /// Computes `J * x`.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        match self {
            Jacobian::Dense(a) => a.mul_vec(x),
            Jacobian::Sparse(a) => a.mul_vec(x),
            Jacobian::Unsupported => Vec::new(),
        }
    }

    /// Computes `J' * y`.
    pub fn mul_vec_t(&self, y: &[f64]) -> Vec<f64> {
        match self {
            Jacobian::Dense(a) => a.mul_vec_t(y),
            Jacobian::Sparse(a) => a.mul_vec_t(y),
            Jacobian::Unsupported => Vec::new(),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Jacobian::Unsupported)
    }
}

/// Derivative information requested from [`Problem::evaluate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// Objective and constraint values only.
    Values,
    /// Values, objective gradient and constraint Jacobian.
    First,
    /// First order plus the Hessian of the Lagrangian for the last block.
    SecondLastBlock,
    /// First order plus all Hessian blocks of the Lagrangian.
    SecondAll,
}

/// Result of a problem evaluation.
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub objective: f64,
    pub constraints: Vec<f64>,
    /// Objective gradient. Empty for value-only evaluations.
    pub gradient: Vec<f64>,
    /// Ignored for value-only evaluations.
    pub jacobian: Jacobian,
    /// Hessian blocks of the Lagrangian, either the last one or all of them.
    pub hessian: Vec<SymMatrix>,
}

impl Evaluation {
    pub fn values(objective: f64, constraints: Vec<f64>) -> Self {
        Self {
            objective,
            constraints,
            gradient: Vec::new(),
            jacobian: Jacobian::Unsupported,
            hessian: Vec::new(),
        }
    }
}

/// Nonlinear program
///
/// ```txt
///     min f(x)   subject to   bl <= [x; c(x)] <= bu
/// ```
///
/// with the variables partitioned into contiguous Hessian blocks.
pub trait Problem {
    fn n_var(&self) -> usize;
    fn n_con(&self) -> usize;

    /// Block boundaries: starts at zero, strictly increasing, ends at `n_var`.
    fn block_idx(&self) -> &[usize];

    /// Lower bounds on the variables followed by the constraints.
    fn lower_bounds(&self) -> &[f64];
    /// Upper bounds on the variables followed by the constraints.
    fn upper_bounds(&self) -> &[f64];

    /// Objective values outside of these bounds are evaluation failures.
    fn objective_bounds(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Sets the starting point and returns the structure of the Jacobian in
    /// the requested storage.
    fn initialize(&self, xi: &mut [f64], lambda: &mut [f64], kind: JacobianKind)
        -> Result<Jacobian>;

    /// Evaluates the problem functions at `xi`. `lambda` holds the bound and
    /// constraint multipliers used for second derivatives.
    fn evaluate(
        &self,
        xi: &[f64],
        lambda: &[f64],
        order: Order,
        kind: JacobianKind,
    ) -> Result<Evaluation>;

    /// Problem-specific heuristic moving `xi` towards feasibility. Returns
    /// `false` if not available.
    fn reduce_constraint_violation(&self, _xi: &mut [f64]) -> Result<bool> {
        Ok(false)
    }

    fn info(&self) -> String {
        String::new()
    }
}

/// Solver for the convex QP subproblems.
pub trait QpSolver {
    fn solve(&self, qp: &QpData, warm: Option<&QpSolution>) -> QpSolution;
}

/// Called on each iteration of the SQP method.
pub trait ProgressMonitor {
    fn update(&self, record: &ProgressRecord);

    /// Called with every solved QP when `debug_level` is positive.
    fn qp(&self, _iteration: usize, _qp: &QpData, _solution: &QpSolution) {}

    /// Called when a run finishes.
    fn finish(&self) {}
}
