use float_cmp::assert_approx_eq;
use sparsetools::csc::CSC;

use crate::{Matrix, SparseMatrix, SymMatrix};

#[test]
fn column_major_views() {
    let a = Matrix::from_rows(&[
        vec![1.0, 2.0, 3.0],
        vec![4.0, 5.0, 6.0],
        vec![7.0, 8.0, 9.0],
    ]);
    assert_eq!(a.col(1), &[2.0, 5.0, 8.0]);

    let v = a.view(1, 2, 1, 2);
    assert_eq!(v.rows(), 2);
    assert_eq!(v.cols(), 2);
    assert_eq!(v.col(0), &[5.0, 8.0]);
    assert_eq!(v[(1, 1)], 9.0);

    let mut b = a.clone();
    b.view_mut(0, 2, 2, 1).fill(0.0);
    assert_eq!(b.col(2), &[0.0, 0.0, 9.0]);
    assert_eq!(b.col(1), a.col(1));

    assert_eq!(a.mul_vec(&[1.0, 0.0, -1.0]), vec![-2.0, -2.0, -2.0]);
    assert_eq!(a.mul_vec_t(&[1.0, 0.0, -1.0]), vec![-6.0, -6.0, -6.0]);
    assert_eq!(a.transpose()[(0, 2)], 7.0);
}

#[test]
fn symmetric_indexing() {
    let mut b = SymMatrix::zeros(3);
    b[(2, 0)] = 4.0;
    b[(1, 1)] = 2.0;
    assert_eq!(b[(0, 2)], 4.0);
    assert_eq!(b.to_dense()[(0, 2)], 4.0);
    assert_eq!(b.to_dense()[(2, 0)], 4.0);
    assert_eq!(b.mul_vec(&[1.0, 1.0, 1.0]), vec![4.0, 2.0, 4.0]);
    assert_eq!(b.quad_form(&[1.0, 1.0, 1.0]), 10.0);
}

#[test]
fn tridiagonal_eigenvalues() {
    // eigenvalues 2 - sqrt(2), 2, 2 + sqrt(2)
    let mut b = SymMatrix::identity(3, 2.0);
    b[(1, 0)] = -1.0;
    b[(2, 1)] = -1.0;

    let ev = b.eigenvalues().unwrap();
    assert_approx_eq!(f64, ev[0], 2.0 - 2.0_f64.sqrt(), epsilon = 1e-12);
    assert_approx_eq!(f64, ev[1], 2.0, epsilon = 1e-12);
    assert_approx_eq!(f64, ev[2], 2.0 + 2.0_f64.sqrt(), epsilon = 1e-12);
    assert_approx_eq!(f64, b.min_eigenvalue(), 2.0 - 2.0_f64.sqrt(), epsilon = 1e-12);

    // Gershgorin bound: 2 - 2
    assert_approx_eq!(f64, b.gershgorin_min(), 0.0);
    assert!(b.gershgorin_min() <= b.min_eigenvalue());
}

#[test]
fn indefinite_eigenvalue() {
    let mut b = SymMatrix::zeros(2);
    b[(1, 0)] = 1.0;
    assert_approx_eq!(f64, b.min_eigenvalue(), -1.0, epsilon = 1e-12);
    assert_eq!(SymMatrix::zeros(0).min_eigenvalue(), 0.0);
}

#[test]
fn non_finite_eigenvalues_use_gershgorin() {
    let mut b = SymMatrix::identity(2, 3.0);
    b[(1, 0)] = f64::INFINITY;
    assert!(b.eigenvalues().is_err());
    assert_eq!(b.min_eigenvalue(), f64::NEG_INFINITY);
}

#[test]
fn sparse_products() {
    let a = Matrix::from_rows(&[vec![1.0, 0.0, 2.0], vec![0.0, -3.0, 0.0]]);
    let s = SparseMatrix::from_dense(&a, 0.0);
    assert_eq!(s.nnz(), 3);
    assert_eq!(s.ind_col, vec![0, 1, 2, 3]);
    assert_eq!(s.ind_row, vec![0, 1, 0]);
    assert_eq!(s.mul_vec(&[1.0, 1.0, 1.0]), a.mul_vec(&[1.0, 1.0, 1.0]));
    assert_eq!(s.mul_vec_t(&[1.0, 2.0]), a.mul_vec_t(&[1.0, 2.0]));
    assert_eq!(s.to_dense(), a);

    // mismatched vector
    assert_eq!(s.mul_vec(&[1.0]), vec![0.0, 0.0]);
}

#[test]
fn sparse_validation() {
    assert!(SparseMatrix::new(2, 2, vec![1.0], vec![0], vec![0, 1, 1]).is_ok());
    assert!(SparseMatrix::new(2, 2, vec![1.0], vec![2], vec![0, 1, 1]).is_err());
    assert!(SparseMatrix::new(2, 2, vec![1.0], vec![0], vec![0, 1]).is_err());
    assert!(SparseMatrix::new(2, 2, vec![1.0, 2.0], vec![0, 1], vec![0, 2, 1]).is_err());
}

#[test]
fn from_csc() {
    let csc = CSC::<usize, f64>::from_dense(&[vec![1.0, 0.0], vec![2.0, 3.0]]);
    let s = SparseMatrix::from(&csc);
    assert_eq!(
        s.to_dense(),
        Matrix::from_rows(&[vec![1.0, 0.0], vec![2.0, 3.0]])
    );
}
