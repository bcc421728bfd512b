use log::warn;

use crate::math::ConstraintNorm;

/// Lagrange and Kuhn-Tucker multipliers of a solution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Lambda {
    /// Multipliers on the variable bounds.
    pub bounds: Vec<f64>,
    /// Multipliers on the constraints.
    pub constraints: Vec<f64>,
}

/// How the QP subproblem matrices are passed to the subsolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QpMode {
    /// Dense Hessian and constraint matrix.
    Dense,
    /// Merged sparse Hessian and sparse Jacobian.
    Sparse,
    /// Sparse matrices for a subsolver that factors the KKT system by Schur
    /// complement. The only mode that tolerates indefinite (SR1) Hessians.
    SparseSchur,
}

/// Partition of the variables into Hessian blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockHess {
    /// One dense block over all variables.
    Single,
    /// The blocks defined by the problem.
    Blockwise,
    /// Two blocks: everything before the last problem block, and the last one.
    Hybrid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HessUpdate {
    /// Keep the initial diagonal.
    Constant,
    Sr1,
    /// Damped BFGS.
    Bfgs,
    /// Forward differences of the Lagrangian gradient.
    FiniteDiff,
    /// Blocks supplied by the problem's second-order evaluation
    /// (e.g. a Gauss-Newton approximation).
    GaussNewton,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HessScaling {
    None,
    /// Shanno-Phua scaling `y'y / s'y`.
    Nocedal,
    /// Oren-Luenberger scaling `s'y / s'Bs`.
    OrenLuenberger,
    /// Geometric mean of the two above.
    GeometricMean,
    /// Centered Oren-Luenberger sizing, applied before every update.
    Centered,
}

/// Exact second derivatives requested from the problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecondDerivatives {
    None,
    LastBlock,
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Globalization {
    None,
    FilterLineSearch,
}

/// Outcome of [`crate::SqpMethod::run`] when no fatal error occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Converged,
    IterationLimit,
    RestorationLimit,
}

/// How the last step was obtained, ordered by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StepType {
    /// Full step accepted by the KKT error heuristic.
    KktReduction,
    Normal,
    /// Step computed after a Hessian reset.
    HessianReset,
    /// Problem-specific feasibility heuristic.
    Heuristic,
    Restoration,
}

#[derive(Clone, Debug)]
pub struct Options {
    /// Values smaller than this are regarded as numerically zero.
    pub eps: f64,
    /// Bounds at or beyond this magnitude are regarded as infinite.
    pub inf: f64,
    /// Optimality tolerance.
    pub opt_tol: f64,
    /// Nonlinear feasibility tolerance.
    pub nlinfeas_tol: f64,
    /// Maximum number of SQP iterations used by [`crate::sqp`].
    pub max_it: usize,

    /// Storage of the QP matrices handed to the QP solver.
    pub sparse_qp: QpMode,
    /// Step acceptance strategy.
    pub globalization: Globalization,
    /// Take the full step in the first iteration.
    pub skip_first_globalization: bool,
    /// Enable the feasibility restoration phase.
    pub restore_feas: bool,
    /// Maximum number of restoration phases per run.
    pub max_restoration_calls: usize,
    /// Maximum number of nested SQP iterations in one restoration phase.
    pub max_restoration_it: usize,
    /// Norm measuring the constraint violation.
    pub constraint_norm: ConstraintNorm,
    /// Optional weights for the constraint violation norm, one per bound row.
    pub constraint_weights: Option<Vec<f64>>,

    /// Block structure of the Hessian approximation.
    pub block_hess: BlockHess,
    /// Hessian blocks taken from the problem instead of being approximated.
    pub second_derivatives: SecondDerivatives,
    /// Quasi-Newton update of the Hessian blocks.
    pub hess_update: HessUpdate,
    /// Sizing of the initial Hessian before the first update.
    pub hess_scaling: HessScaling,
    /// Update used when the primary approximation fails (SR1 runs).
    pub fallback_update: HessUpdate,
    /// Sizing of the fallback approximation.
    pub fallback_scaling: HessScaling,
    /// Diagonal of the initial Hessian approximation.
    pub ini_hess_diag: f64,
    /// Use Powell's damping for BFGS updates.
    pub hess_damp: bool,
    /// Damping threshold: `s'y` must be at least this fraction of `s'Bs`.
    pub hess_damp_fac: f64,
    /// Rebuild the approximation from the most recent steps only.
    pub hess_lim_mem: bool,
    /// Number of stored steps. Zero selects the size of the largest block.
    pub hess_memsize: usize,
    /// Consecutive skipped updates after which a block is reset.
    pub max_consec_skipped_updates: usize,

    /// Additional QP solves with a convexified Hessian after a failure.
    pub max_conv_qp: usize,
    /// Use the Gershgorin bound instead of eigenvalues for inertia correction.
    pub gershgorin: bool,
    /// Factor shrinking the previous inertia correction.
    pub kappa_minus: f64,
    /// Growth factor of the inertia correction.
    pub kappa_plus: f64,
    /// Growth factor of the first inertia correction of a block.
    pub kappa_plus_max: f64,
    /// First inertia correction of a block.
    pub delta_h0: f64,

    /// Maximum number of iterations of one QP solve.
    pub max_it_qp: usize,
    /// Time limit of one QP solve in seconds.
    pub max_time_qp: f64,

    /// Maximum number of trial points in one line search.
    pub max_line_search: usize,
    /// Consecutive reduced steps after which the line search counts as failed.
    pub max_consec_reduced_steps: usize,
    /// Maximum number of second-order corrections per line search.
    pub max_soc_iter: usize,

    /// Lower bound of the centered Oren-Luenberger sizing factor.
    pub col_eps: f64,
    /// Weight of the previous step in centered Oren-Luenberger sizing.
    pub col_tau1: f64,
    /// Weight of `s's` in centered Oren-Luenberger sizing.
    pub col_tau2: f64,

    /// Filter margin on the constraint violation.
    pub gamma_theta: f64,
    /// Filter margin on the objective.
    pub gamma_f: f64,
    /// Required reduction of the violation between second-order corrections.
    pub kappa_soc: f64,
    /// Required reduction of the KKT error for the full step heuristic.
    pub kappa_f: f64,
    /// Violation above which trial points are rejected.
    pub theta_max: f64,
    /// Violation below which the switching condition is tested.
    pub theta_min: f64,
    /// Switching condition: `alpha * (-g'd)^s_f > delta * theta^s_theta`.
    pub delta: f64,
    /// Exponent of the violation in the switching condition.
    pub s_theta: f64,
    /// Exponent of the directional derivative in the switching condition.
    pub s_f: f64,
    /// Armijo factor of the sufficient decrease condition.
    pub eta: f64,

    /// Pass every solved QP to the progress monitor if positive.
    pub debug_level: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            eps: 1e-16,
            inf: 1e20,
            opt_tol: 1e-6,
            nlinfeas_tol: 1e-6,
            max_it: 100,

            sparse_qp: QpMode::SparseSchur,
            globalization: Globalization::FilterLineSearch,
            skip_first_globalization: false,
            restore_feas: true,
            max_restoration_calls: 100,
            max_restoration_it: 100,
            constraint_norm: ConstraintNorm::LInf,
            constraint_weights: None,

            block_hess: BlockHess::Blockwise,
            second_derivatives: SecondDerivatives::None,
            hess_update: HessUpdate::Sr1,
            hess_scaling: HessScaling::OrenLuenberger,
            fallback_update: HessUpdate::Bfgs,
            fallback_scaling: HessScaling::Centered,
            ini_hess_diag: 1.0,
            hess_damp: true,
            hess_damp_fac: 0.2,
            hess_lim_mem: true,
            hess_memsize: 20,
            max_consec_skipped_updates: 100,

            max_conv_qp: 1,
            gershgorin: false,
            kappa_minus: 0.333,
            kappa_plus: 8.0,
            kappa_plus_max: 100.0,
            delta_h0: 1e-4,

            max_it_qp: 5000,
            max_time_qp: 10000.0,

            max_line_search: 20,
            max_consec_reduced_steps: 100,
            max_soc_iter: 3,

            col_eps: 0.1,
            col_tau1: 0.5,
            col_tau2: 1e4,

            gamma_theta: 1e-5,
            gamma_f: 1e-5,
            kappa_soc: 0.99,
            kappa_f: 0.999,
            theta_max: 1e7,
            theta_min: 1e-5,
            delta: 1.0,
            s_theta: 1.1,
            s_f: 2.3,
            eta: 1e-4,

            debug_level: 0,
        }
    }
}

impl Options {
    /// Resolves incompatible option combinations. `max_block` is the size of
    /// the largest Hessian block and `n_blocks` the number of blocks.
    pub(crate) fn consistent(mut self, max_block: usize, n_blocks: usize) -> Self {
        if self.second_derivatives == SecondDerivatives::All {
            self.hess_update = HessUpdate::GaussNewton;
            self.block_hess = BlockHess::Blockwise;
        }
        if n_blocks == 1 && self.second_derivatives == SecondDerivatives::LastBlock {
            warn!("exact Hessian for the last block needs more than one block; ignored");
            self.second_derivatives = SecondDerivatives::None;
        }

        if !self.hess_lim_mem {
            self.hess_memsize = 1;
        } else if self.hess_memsize == 0 {
            self.hess_memsize = max_block.max(1);
        }

        if self.sparse_qp != QpMode::SparseSchur && self.hess_update == HessUpdate::Sr1 {
            warn!(
                "SR1 updates need the sparse Schur QP mode, using damped BFGS with {:?} scaling",
                self.fallback_scaling
            );
            self.hess_update = HessUpdate::Bfgs;
            self.hess_scaling = self.fallback_scaling;
        }
        self
    }
}
