mod banana;
mod filter;
mod matrix;
mod nonlin3d;
mod parametric;
mod restoration;

use crate::{Jacobian, JacobianKind, Matrix, SparseMatrix};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Debug)
        // .filter_level(log::LevelFilter::Trace)
        .format_module_path(false)
        .format_timestamp(None)
        .format_target(false)
        // .is_test(true)
        .init();
}

/// Jacobian from dense rows in the requested storage.
fn jacobian(rows: &[Vec<f64>], n_var: usize, kind: JacobianKind) -> Jacobian {
    let a = if rows.is_empty() {
        Matrix::zeros(0, n_var)
    } else {
        Matrix::from_rows(rows)
    };
    match kind {
        JacobianKind::Dense => Jacobian::Dense(a),
        JacobianKind::Sparse => Jacobian::Sparse(SparseMatrix::from_dense(&a, 0.0)),
    }
}
