use crate::matrix::{Matrix, SparseMatrix, SymMatrix};
use crate::traits::Jacobian;

/// Symmetric sparse matrix holding both triangles, with the position of the
/// first entry on or below the diagonal of every column.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseHessian {
    pub mat: SparseMatrix,
    /// `ind_lo[j]` indexes the first entry of column `j` with row `>= j`.
    pub ind_lo: Vec<usize>,
}

/// Quadratic term of a QP subproblem.
#[derive(Clone, Debug, PartialEq)]
pub enum QpHessian {
    Dense(Matrix),
    Sparse(SparseHessian),
}

impl QpHessian {
    pub fn to_dense(&self) -> Matrix {
        match self {
            QpHessian::Dense(h) => h.clone(),
            QpHessian::Sparse(h) => h.mat.to_dense(),
        }
    }
}

/// Convex QP
///
/// ```txt
///     min 1/2 d'*H*d + g'*d   subject to   lower <= [d; A*d] <= upper
/// ```
pub struct QpData<'a> {
    pub hessian: &'a QpHessian,
    pub gradient: &'a [f64],
    /// Constraint matrix `A`, the Jacobian of the nonlinear constraints.
    pub constraints: &'a Jacobian,
    /// Bounds on the step followed by the bounds on `A*d`.
    pub lower: &'a [f64],
    pub upper: &'a [f64],
    pub max_iter: usize,
    /// Wall-clock limit in seconds.
    pub max_time: f64,
}

impl QpData<'_> {
    pub fn n_var(&self) -> usize {
        self.gradient.len()
    }

    pub fn n_con(&self) -> usize {
        self.lower.len() - self.gradient.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QpStatus {
    Optimal,
    Infeasible,
    IterationLimit,
    NumericalError,
}

/// Working-set classification of a bound or constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveSet {
    Inactive,
    Lower,
    Upper,
    Equality,
}

/// Result of a QP solve. Multipliers satisfy `H*d + g = [I; A]' * y`.
#[derive(Clone, Debug)]
pub struct QpSolution {
    pub status: QpStatus,
    pub step: Vec<f64>,
    /// Multipliers of the bounds followed by the constraints.
    pub lambda: Vec<f64>,
    pub active: Vec<ActiveSet>,
    pub iterations: usize,
    pub objective: f64,
}

impl QpSolution {
    pub fn failed(status: QpStatus, n_var: usize, n_con: usize, iterations: usize) -> Self {
        Self {
            status,
            step: vec![0.0; n_var],
            lambda: vec![0.0; n_var + n_con],
            active: vec![ActiveSet::Inactive; n_var + n_con],
            iterations,
            objective: 0.0,
        }
    }
}

/// Block-diagonal dense Hessian of dimension `n_var`.
pub fn dense_hessian(blocks: &[SymMatrix], block_idx: &[usize], n_var: usize) -> Matrix {
    let mut h = Matrix::zeros(n_var, n_var);
    for (blk, &offset) in blocks.iter().zip(block_idx) {
        for j in 0..blk.dim() {
            for i in 0..blk.dim() {
                h[(offset + i, offset + j)] = blk[(i, j)];
            }
        }
    }
    h
}

/// Merges the blocks into one sparse matrix, dropping entries with
/// magnitude not above `eps`.
pub fn sparse_hessian(
    blocks: &[SymMatrix],
    block_idx: &[usize],
    n_var: usize,
    eps: f64,
) -> SparseHessian {
    let mut nz = Vec::new();
    let mut ind_row = Vec::new();
    let mut ind_col = Vec::with_capacity(n_var + 1);
    let mut ind_lo = Vec::with_capacity(n_var);

    for (blk, &offset) in blocks.iter().zip(block_idx) {
        for j in 0..blk.dim() {
            let col = offset + j;
            ind_col.push(nz.len());
            let mut lo = None;
            for i in 0..blk.dim() {
                let v = blk[(i, j)];
                if v.abs() > eps {
                    if lo.is_none() && offset + i >= col {
                        lo = Some(nz.len());
                    }
                    nz.push(v);
                    ind_row.push(offset + i);
                }
            }
            // empty lower part: points to the start of the next column
            ind_lo.push(lo.unwrap_or(nz.len()));
        }
    }
    ind_col.push(nz.len());

    SparseHessian {
        mat: SparseMatrix::from_parts(n_var, n_var, nz, ind_row, ind_col),
        ind_lo,
    }
}

/// Bounds on the QP step: the problem bounds shifted to `xi` and `constr`.
/// With `a_delta_xi` the constraint bounds are corrected by the product of
/// the Jacobian and the last step (second-order correction). Bounds of
/// magnitude `inf` or more stay infinite.
pub fn step_bounds(
    lower: &[f64],
    upper: &[f64],
    xi: &[f64],
    constr: &[f64],
    a_delta_xi: Option<&[f64]>,
    inf: f64,
    delta_bl: &mut [f64],
    delta_bu: &mut [f64],
) {
    let n_var = xi.len();
    let shift = |i: usize| -> f64 {
        if i < n_var {
            xi[i]
        } else {
            constr[i - n_var] - a_delta_xi.map_or(0.0, |ad| ad[i - n_var])
        }
    };
    for i in 0..lower.len() {
        delta_bl[i] = if lower[i] <= -inf {
            f64::NEG_INFINITY
        } else {
            lower[i] - shift(i)
        };
        delta_bu[i] = if upper[i] >= inf {
            f64::INFINITY
        } else {
            upper[i] - shift(i)
        };
    }
}
