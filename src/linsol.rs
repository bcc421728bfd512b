use anyhow::{format_err, Result};
use sparsetools::csc::CSC;
use spsolve::Solver;

use crate::matrix::Matrix;

/// Solves the square system `a * x = b`, overwriting `b` with `x`.
pub(crate) fn solve<S: Solver<usize, f64>>(solver: &S, a: &Matrix, b: &mut [f64]) -> Result<()> {
    let n = a.rows();
    if n == 0 {
        return Ok(());
    }
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| a[(i, j)]).collect())
        .collect();
    let a_csc = CSC::<usize, f64>::from_dense(&rows);

    solver
        .solve(n, a_csc.rowidx(), a_csc.colptr(), a_csc.values(), b, false)
        .map_err(|err| format_err!("linear solve failed: {}", err))
}
