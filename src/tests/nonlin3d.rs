use anyhow::Result;
use float_cmp::assert_approx_eq;
use std::iter::zip;

use full::Mat;
use spsolve::rlu::RLU;

use super::jacobian;
use crate::{
    sqp, Evaluation, HessUpdate, InteriorPointQp, Jacobian, JacobianKind, Options, Order,
    Problem, QpMode, SecondDerivatives, SymMatrix,
};

/// ```txt
///     min -x0*x1 - x1*x2
///     s.t. x0^2 - x1^2 + x2^2 <= 2
///          x0^2 + x1^2 + x2^2 <= 10
/// ```
pub(super) struct Constrained3DNonlinear {
    block_idx: Vec<usize>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Constrained3DNonlinear {
    pub(super) fn new() -> Self {
        let inf = f64::INFINITY;
        Self {
            block_idx: vec![0, 3],
            lower: vec![-inf; 5],
            upper: vec![inf, inf, inf, 2.0, 10.0],
        }
    }

    fn jacobian(x: &[f64], kind: JacobianKind) -> Jacobian {
        let rows = [
            vec![2.0 * x[0], -2.0 * x[1], 2.0 * x[2]],
            vec![2.0 * x[0], 2.0 * x[1], 2.0 * x[2]],
        ];
        jacobian(&rows, 3, kind)
    }
}

impl Problem for Constrained3DNonlinear {
    fn n_var(&self) -> usize {
        3
    }

    fn n_con(&self) -> usize {
        2
    }

    fn block_idx(&self) -> &[usize] {
        &self.block_idx
    }

    fn lower_bounds(&self) -> &[f64] {
        &self.lower
    }

    fn upper_bounds(&self) -> &[f64] {
        &self.upper
    }

    fn initialize(
        &self,
        xi: &mut [f64],
        lambda: &mut [f64],
        kind: JacobianKind,
    ) -> Result<Jacobian> {
        xi.copy_from_slice(&[1.0, 1.0, 0.0]);
        lambda.fill(0.0);
        Ok(Self::jacobian(xi, kind))
    }

    fn evaluate(
        &self,
        x: &[f64],
        lambda: &[f64],
        order: Order,
        kind: JacobianKind,
    ) -> Result<Evaluation> {
        let f = -x[0] * x[1] - x[1] * x[2];
        let c = Mat::new(2, 3, vec![1.0, -1.0, 1.0, 1.0, 1.0, 1.0])
            .mat_vec(&x.iter().map(|&x| x.powi(2)).collect::<Vec<_>>());
        if order == Order::Values {
            return Ok(Evaluation::values(f, c));
        }

        let mut hessian = vec![];
        if matches!(order, Order::SecondLastBlock | Order::SecondAll) {
            let (mu0, mu1) = (lambda[3], lambda[4]);
            let mut h = SymMatrix::zeros(3);
            h[(1, 0)] = -1.0;
            h[(2, 1)] = -1.0;
            h[(0, 0)] = -2.0 * (mu0 + mu1);
            h[(1, 1)] = -2.0 * (-mu0 + mu1);
            h[(2, 2)] = -2.0 * (mu0 + mu1);
            hessian.push(h);
        }
        Ok(Evaluation {
            objective: f,
            constraints: c,
            gradient: vec![-x[1], -(x[0] + x[2]), -x[1]],
            jacobian: Self::jacobian(x, kind),
            hessian,
        })
    }
}

fn check_solution(opt: Options) {
    let f6 = Constrained3DNonlinear::new();
    let solver = InteriorPointQp::new(RLU::default());
    let (x, f, converged, _iterations, lambda) = sqp(&f6, &solver, opt, None).unwrap();

    assert!(converged);
    assert_approx_eq!(f64, f, -5.0 * f64::sqrt(2.0), epsilon = 1e-6);
    zip(x, [1.58113883, 2.23606798, 1.58113883])
        .for_each(|x| assert_approx_eq!(f64, x.0, x.1, epsilon = 1e-4));
    zip(lambda.constraints, [0.0, -f64::sqrt(2.0) / 2.0])
        .for_each(|x| assert_approx_eq!(f64, x.0, x.1, epsilon = 1e-4));
    lambda
        .bounds
        .iter()
        .for_each(|&l| assert_approx_eq!(f64, l, 0.0, epsilon = 1e-8));
}

#[test]
fn constrained_3d_nonlinear() {
    check_solution(Options {
        max_it: 200,
        ..Default::default()
    });
}

#[test]
fn constrained_3d_dense_bfgs() {
    check_solution(Options {
        sparse_qp: QpMode::Dense,
        hess_update: HessUpdate::Bfgs,
        hess_lim_mem: false,
        max_it: 200,
        ..Default::default()
    });
}

#[test]
fn constrained_3d_sr1_in_dense_mode_uses_bfgs() {
    let f6 = Constrained3DNonlinear::new();
    let solver = InteriorPointQp::new(RLU::default());
    let opt = Options {
        sparse_qp: QpMode::Dense,
        ..Default::default()
    };
    let method = crate::SqpMethod::new(&f6, &solver, opt, None).unwrap();
    assert_eq!(method.opt.hess_update, HessUpdate::Bfgs);
    assert!(!method.vars.hessian.has_fallback());
}

#[test]
fn constrained_3d_exact_hessian() {
    check_solution(Options {
        second_derivatives: SecondDerivatives::All,
        max_it: 200,
        ..Default::default()
    });
}
