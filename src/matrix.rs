use std::ops::{Index, IndexMut};

use anyhow::{bail, Result};
use faer::{Mat, Side};
use log::{error, warn};
use sparsetools::csc::CSC;

/// Dense column-major matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Builds a matrix from a slice of rows.
    pub fn from_rows(a: &[Vec<f64>]) -> Self {
        let rows = a.len();
        let cols = a.first().map_or(0, |r| r.len());
        let mut m = Self::zeros(rows, cols);
        for (i, row) in a.iter().enumerate() {
            for (j, &v) in row.iter().enumerate().take(cols) {
                m[(i, j)] = v;
            }
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    pub fn col(&self, j: usize) -> &[f64] {
        &self.data[j * self.rows..(j + 1) * self.rows]
    }

    pub fn col_mut(&mut self, j: usize) -> &mut [f64] {
        &mut self.data[j * self.rows..(j + 1) * self.rows]
    }

    /// Returns the `nrows` x `ncols` submatrix starting at (`row`, `col`)
    /// as a view into this matrix.
    pub fn view(&self, row: usize, nrows: usize, col: usize, ncols: usize) -> MatrixView<'_> {
        assert!(row + nrows <= self.rows && col + ncols <= self.cols);
        MatrixView {
            data: &self.data[col * self.rows..(col + ncols) * self.rows],
            offset: row,
            ldim: self.rows,
            rows: nrows,
            cols: ncols,
        }
    }

    pub fn view_mut(
        &mut self,
        row: usize,
        nrows: usize,
        col: usize,
        ncols: usize,
    ) -> MatrixViewMut<'_> {
        assert!(row + nrows <= self.rows && col + ncols <= self.cols);
        let ldim = self.rows;
        MatrixViewMut {
            data: &mut self.data[col * ldim..(col + ncols) * ldim],
            offset: row,
            ldim,
            rows: nrows,
            cols: ncols,
        }
    }

    /// Computes `A * x`.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.rows];
        for (j, &xj) in x.iter().enumerate().take(self.cols) {
            if xj != 0.0 {
                for (yi, aij) in y.iter_mut().zip(self.col(j)) {
                    *yi += aij * xj;
                }
            }
        }
        y
    }

    /// Computes `A' * x`.
    pub fn mul_vec_t(&self, x: &[f64]) -> Vec<f64> {
        (0..self.cols)
            .map(|j| self.col(j).iter().zip(x).map(|(a, b)| a * b).sum())
            .collect()
    }

    pub fn transpose(&self) -> Matrix {
        let mut t = Matrix::zeros(self.cols, self.rows);
        for j in 0..self.cols {
            for i in 0..self.rows {
                t[(j, i)] = self[(i, j)];
            }
        }
        t
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[j * self.rows + i]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[j * self.rows + i]
    }
}

/// Read-only window into a column-major buffer.
#[derive(Clone, Copy, Debug)]
pub struct MatrixView<'a> {
    data: &'a [f64],
    offset: usize,
    ldim: usize,
    rows: usize,
    cols: usize,
}

impl<'a> MatrixView<'a> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn col(&self, j: usize) -> &'a [f64] {
        let start = j * self.ldim + self.offset;
        &self.data[start..start + self.rows]
    }
}

impl Index<(usize, usize)> for MatrixView<'_> {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[j * self.ldim + self.offset + i]
    }
}

/// Mutable window into a column-major buffer.
#[derive(Debug)]
pub struct MatrixViewMut<'a> {
    data: &'a mut [f64],
    offset: usize,
    ldim: usize,
    rows: usize,
    cols: usize,
}

impl MatrixViewMut<'_> {
    pub fn col_mut(&mut self, j: usize) -> &mut [f64] {
        let start = j * self.ldim + self.offset;
        &mut self.data[start..start + self.rows]
    }

    pub fn fill(&mut self, value: f64) {
        for j in 0..self.cols {
            self.col_mut(j).iter_mut().for_each(|v| *v = value);
        }
    }
}

/// Symmetric matrix storing the lower triangle packed column by column.
#[derive(Clone, Debug, PartialEq)]
pub struct SymMatrix {
    n: usize,
    data: Vec<f64>,
}

impl SymMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * (n + 1) / 2],
        }
    }

    /// Returns `diag * I`.
    pub fn identity(n: usize, diag: f64) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m[(i, i)] = diag;
        }
        m
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    fn pos(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (j, i) } else { (i, j) };
        i + j * (2 * self.n - j - 1) / 2
    }

    pub fn scale(&mut self, alpha: f64) {
        self.data.iter_mut().for_each(|v| *v *= alpha);
    }

    pub fn add_diagonal(&mut self, delta: f64) {
        for i in 0..self.n {
            self[(i, i)] += delta;
        }
    }

    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        (0..self.n)
            .map(|i| (0..self.n).map(|k| self[(i, k)] * x[k]).sum())
            .collect()
    }

    /// Returns `x' * B * x`.
    pub fn quad_form(&self, x: &[f64]) -> f64 {
        self.mul_vec(x).iter().zip(x).map(|(a, b)| a * b).sum()
    }

    pub fn to_dense(&self) -> Matrix {
        let mut d = Matrix::zeros(self.n, self.n);
        for j in 0..self.n {
            for i in 0..self.n {
                d[(i, j)] = self[(i, j)];
            }
        }
        d
    }

    /// Lower bound on the smallest eigenvalue from Gershgorin's circle theorem.
    pub fn gershgorin_min(&self) -> f64 {
        (0..self.n)
            .map(|i| {
                let radius: f64 = (0..self.n)
                    .filter(|&k| k != i)
                    .map(|k| self[(i, k)].abs())
                    .sum();
                self[(i, i)] - radius
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Eigenvalues in nondecreasing order.
    pub fn eigenvalues(&self) -> Result<Vec<f64>> {
        if self.data.iter().any(|v| !v.is_finite()) {
            bail!("symmetric matrix of dimension {} has non-finite entries", self.n);
        }
        let a = Mat::<f64>::from_fn(self.n, self.n, |i, j| self[(i, j)]);
        let mut ev = a.selfadjoint_eigenvalues(Side::Lower);
        if ev.iter().any(|v| !v.is_finite()) {
            bail!("eigenvalue decomposition of dimension {} failed", self.n);
        }
        ev.sort_by(|a, b| a.total_cmp(b));
        Ok(ev)
    }

    /// Smallest eigenvalue, falling back to the Gershgorin bound if the
    /// eigenvalue computation fails.
    pub fn min_eigenvalue(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        match self.eigenvalues() {
            Ok(ev) => ev.into_iter().fold(f64::INFINITY, f64::min),
            Err(err) => {
                warn!("{}: using Gershgorin estimate", err);
                self.gershgorin_min()
            }
        }
    }
}

impl Index<(usize, usize)> for SymMatrix {
    type Output = f64;

    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[self.pos(i, j)]
    }
}

impl IndexMut<(usize, usize)> for SymMatrix {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        let p = self.pos(i, j);
        &mut self.data[p]
    }
}

/// Sparse matrix in compressed column format.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    /// Nonzero values, column by column.
    pub nz: Vec<f64>,
    /// Row index of each nonzero.
    pub ind_row: Vec<usize>,
    /// Start of each column in `nz`, of length `cols + 1`.
    pub ind_col: Vec<usize>,
}

impl SparseMatrix {
    pub fn new(
        rows: usize,
        cols: usize,
        nz: Vec<f64>,
        ind_row: Vec<usize>,
        ind_col: Vec<usize>,
    ) -> Result<Self> {
        if ind_col.len() != cols + 1 {
            bail!(
                "column pointer length {} must be cols + 1 = {}",
                ind_col.len(),
                cols + 1
            );
        }
        if nz.len() != ind_row.len() || ind_col[cols] != nz.len() {
            bail!(
                "{} values, {} row indices and {} column entries are inconsistent",
                nz.len(),
                ind_row.len(),
                ind_col[cols]
            );
        }
        if ind_col.windows(2).any(|w| w[0] > w[1]) {
            bail!("column pointers must be nondecreasing");
        }
        if ind_row.iter().any(|&i| i >= rows) {
            bail!("row index out of range for {} rows", rows);
        }
        Ok(Self {
            rows,
            cols,
            nz,
            ind_row,
            ind_col,
        })
    }

    pub(crate) fn from_parts(
        rows: usize,
        cols: usize,
        nz: Vec<f64>,
        ind_row: Vec<usize>,
        ind_col: Vec<usize>,
    ) -> Self {
        Self {
            rows,
            cols,
            nz,
            ind_row,
            ind_col,
        }
    }

    /// Keeps the entries of `a` with magnitude above `eps`.
    pub fn from_dense(a: &Matrix, eps: f64) -> Self {
        let mut nz = Vec::new();
        let mut ind_row = Vec::new();
        let mut ind_col = Vec::with_capacity(a.cols() + 1);
        for j in 0..a.cols() {
            ind_col.push(nz.len());
            for (i, &v) in a.col(j).iter().enumerate() {
                if v.abs() > eps {
                    nz.push(v);
                    ind_row.push(i);
                }
            }
        }
        ind_col.push(nz.len());
        Self {
            rows: a.rows(),
            cols: a.cols(),
            nz,
            ind_row,
            ind_col,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.nz.len()
    }

    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.rows];
        if x.len() != self.cols {
            error!("sparse product: {} columns, vector of {}", self.cols, x.len());
            return y;
        }
        for j in 0..self.cols {
            for k in self.ind_col[j]..self.ind_col[j + 1] {
                y[self.ind_row[k]] += self.nz[k] * x[j];
            }
        }
        y
    }

    pub fn mul_vec_t(&self, x: &[f64]) -> Vec<f64> {
        if x.len() != self.rows {
            error!("sparse product: {} rows, vector of {}", self.rows, x.len());
            return vec![0.0; self.cols];
        }
        (0..self.cols)
            .map(|j| {
                (self.ind_col[j]..self.ind_col[j + 1])
                    .map(|k| self.nz[k] * x[self.ind_row[k]])
                    .sum()
            })
            .collect()
    }

    pub fn to_dense(&self) -> Matrix {
        let mut d = Matrix::zeros(self.rows, self.cols);
        for j in 0..self.cols {
            for k in self.ind_col[j]..self.ind_col[j + 1] {
                d[(self.ind_row[k], j)] += self.nz[k];
            }
        }
        d
    }
}

impl From<&CSC<usize, f64>> for SparseMatrix {
    fn from(a: &CSC<usize, f64>) -> Self {
        Self {
            rows: a.rows(),
            cols: a.cols(),
            nz: a.values().to_vec(),
            ind_row: a.rowidx().to_vec(),
            ind_col: a.colptr().to_vec(),
        }
    }
}
