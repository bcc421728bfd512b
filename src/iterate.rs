use crate::common::{BlockHess, HessUpdate, Options, StepType};
use crate::filter::Filter;
use crate::hessian::BlockHessian;
use crate::matrix::Matrix;
use crate::qpbuild::QpHessian;
use crate::traits::Jacobian;

/// Ring buffer of the most recent steps `s = x_k+1 - x_k` and Lagrangian
/// gradient differences `y`, one column per iteration.
#[derive(Clone, Debug)]
pub struct StepHistory {
    delta: Matrix,
    gamma: Matrix,
    /// Column written in the current iteration.
    pos: usize,
    /// Most recently committed column.
    newest: usize,
    len: usize,
}

impl StepHistory {
    pub fn new(n_var: usize, memsize: usize) -> Self {
        let m = memsize.max(1);
        Self {
            delta: Matrix::zeros(n_var, m),
            gamma: Matrix::zeros(n_var, m),
            pos: 0,
            newest: 0,
            len: 0,
        }
    }

    pub fn memsize(&self) -> usize {
        self.delta.cols()
    }

    /// Number of committed pairs, never more than the memory size.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Step of the current iteration.
    pub fn delta(&self) -> &[f64] {
        self.delta.col(self.pos)
    }

    pub fn delta_mut(&mut self) -> &mut [f64] {
        self.delta.col_mut(self.pos)
    }

    pub fn gamma(&self) -> &[f64] {
        self.gamma.col(self.pos)
    }

    pub fn gamma_mut(&mut self) -> &mut [f64] {
        self.gamma.col_mut(self.pos)
    }

    /// Marks the current pair as stored, dropping the oldest one if full.
    pub fn commit(&mut self) {
        self.newest = self.pos;
        self.len = (self.len + 1).min(self.memsize());
    }

    /// Moves on to the next column.
    pub fn advance(&mut self) {
        self.pos = (self.pos + 1) % self.memsize();
    }

    /// Columns of the stored pairs, oldest first.
    pub fn window(&self) -> Vec<usize> {
        let m = self.memsize();
        (0..self.len)
            .map(|i| (self.newest + m + 1 - self.len + i) % m)
            .collect()
    }

    /// Rows `start..start + n` of the stored step and gradient difference
    /// in column `col`.
    pub fn pair(&self, col: usize, start: usize, n: usize) -> (&[f64], &[f64]) {
        let m = self.memsize();
        (
            self.delta.view(start, n, 0, m).col(col),
            self.gamma.view(start, n, 0, m).col(col),
        )
    }

    /// Forgets rows `start..start + n` of every stored pair.
    pub fn clear_block(&mut self, start: usize, n: usize) {
        let m = self.memsize();
        self.delta.view_mut(start, n, 0, m).fill(0.0);
        self.gamma.view_mut(start, n, 0, m).fill(0.0);
    }

    pub fn clear(&mut self) {
        self.delta.fill(0.0);
        self.gamma.fill(0.0);
        self.len = 0;
    }
}

/// Hessian block boundaries for the given block structure.
pub(crate) fn hessian_blocks(problem_blocks: &[usize], n_var: usize, mode: BlockHess) -> Vec<usize> {
    let n_blocks = problem_blocks.len().saturating_sub(1);
    match mode {
        BlockHess::Blockwise if n_blocks > 0 => problem_blocks.to_vec(),
        BlockHess::Hybrid if n_blocks > 1 => vec![0, problem_blocks[n_blocks - 1], n_var],
        _ => vec![0, n_var],
    }
}

/// State of one SQP run.
#[derive(Clone, Debug)]
pub struct Iterate {
    pub xi: Vec<f64>,
    /// Multipliers of the bounds followed by the constraints.
    pub lambda: Vec<f64>,
    pub lambda_qp: Vec<f64>,
    pub constr: Vec<f64>,
    pub obj: f64,
    pub grad_obj: Vec<f64>,
    pub grad_lagrange: Vec<f64>,
    pub jacobian: Jacobian,

    pub history: StepHistory,
    pub trial_xi: Vec<f64>,
    pub delta_bl: Vec<f64>,
    pub delta_bu: Vec<f64>,
    /// Jacobian times the last QP step.
    pub a_delta_xi: Vec<f64>,

    pub hessian: BlockHessian,
    /// Hessian handed to the QP solver most recently.
    pub qp_hessian: QpHessian,
    pub filter: Filter,

    pub alpha: f64,
    pub n_socs: usize,
    pub reduced_step_count: usize,
    pub steptype: StepType,

    /// Scaled KKT error.
    pub tol: f64,
    pub c_norm: f64,
    pub c_norm_s: f64,
    pub grad_norm: f64,
    pub lambda_step_norm: f64,
}

impl Iterate {
    pub(crate) fn new(n_var: usize, n_con: usize, block_idx: Vec<usize>, opt: &Options) -> Self {
        let fallback = opt.hess_update == HessUpdate::Sr1;
        let hessian = BlockHessian::new(block_idx, opt.ini_hess_diag, fallback);
        Self {
            xi: vec![0.0; n_var],
            lambda: vec![0.0; n_var + n_con],
            lambda_qp: vec![0.0; n_var + n_con],
            constr: vec![0.0; n_con],
            obj: f64::INFINITY,
            grad_obj: vec![0.0; n_var],
            grad_lagrange: vec![0.0; n_var],
            jacobian: Jacobian::Unsupported,

            history: StepHistory::new(n_var, opt.hess_memsize),
            trial_xi: vec![0.0; n_var],
            delta_bl: vec![0.0; n_var + n_con],
            delta_bu: vec![0.0; n_var + n_con],
            a_delta_xi: vec![0.0; n_con],

            qp_hessian: QpHessian::Dense(Matrix::zeros(n_var, n_var)),
            hessian,
            filter: Filter::new(opt.theta_max, opt.gamma_theta, opt.gamma_f),

            alpha: 1.0,
            n_socs: 0,
            reduced_step_count: 0,
            steptype: StepType::Normal,

            tol: 0.0,
            c_norm: 0.0,
            c_norm_s: 0.0,
            grad_norm: 0.0,
            lambda_step_norm: 0.0,
        }
    }
}
