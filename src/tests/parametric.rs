use anyhow::Result;
use float_cmp::assert_approx_eq;
use std::iter::zip;

use spsolve::rlu::RLU;

use super::jacobian;
use crate::{
    constraint_norm, sqp, ConstraintNorm, Evaluation, InteriorPointQp, Jacobian, JacobianKind,
    Options, Order, Problem, SecondDerivatives, SymMatrix,
};

/// Parameters `p` appended to the variables and fixed by equalities:
///
/// ```txt
///     min x0^2 + x1^2 + x2^2
///     s.t. 6*x0 + 3*x1 + 2*x2 - p0 = 0
///          p1*x0 + x1 - x2 - 1 = 0
///          p0 = 5,  p1 = 1
///          x >= 0
/// ```
struct ParametricQuadratic {
    block_idx: Vec<usize>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl ParametricQuadratic {
    fn new() -> Self {
        let inf = f64::INFINITY;
        Self {
            block_idx: vec![0, 5],
            lower: vec![0.0, 0.0, 0.0, -inf, -inf, 0.0, 0.0, 5.0, 1.0],
            upper: vec![inf, inf, inf, inf, inf, 0.0, 0.0, 5.0, 1.0],
        }
    }

    fn jacobian(x: &[f64], kind: JacobianKind) -> Jacobian {
        let rows = [
            vec![6.0, 3.0, 2.0, -1.0, 0.0],
            vec![x[4], 1.0, -1.0, 0.0, x[0]],
            vec![0.0, 0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0, 1.0],
        ];
        jacobian(&rows, 5, kind)
    }
}

impl Problem for ParametricQuadratic {
    fn n_var(&self) -> usize {
        5
    }

    fn n_con(&self) -> usize {
        4
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
        xi.copy_from_slice(&[0.15, 0.15, 0.0, 5.0, 1.0]);
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
        let f = x[..3].iter().map(|v| v * v).sum::<f64>();
        let c = vec![
            6.0 * x[0] + 3.0 * x[1] + 2.0 * x[2] - x[3],
            x[4] * x[0] + x[1] - x[2] - 1.0,
            x[3],
            x[4],
        ];
        if order == Order::Values {
            return Ok(Evaluation::values(f, c));
        }

        let mut hessian = vec![];
        if matches!(order, Order::SecondLastBlock | Order::SecondAll) {
            let mut h = SymMatrix::zeros(5);
            (0..3).for_each(|i| h[(i, i)] = 2.0);
            h[(4, 0)] = -lambda[6];
            hessian.push(h);
        }
        Ok(Evaluation {
            objective: f,
            constraints: c,
            gradient: vec![2.0 * x[0], 2.0 * x[1], 2.0 * x[2], 0.0, 0.0],
            jacobian: Self::jacobian(x, kind),
            hessian,
        })
    }
}

fn check_solution(opt: Options) {
    let problem = ParametricQuadratic::new();
    let solver = InteriorPointQp::new(RLU::default());
    let (x, f, converged, _iterations, lambda) = sqp(&problem, &solver, opt, None).unwrap();

    assert!(converged);
    let expected = [31.0 / 49.0, 19.0 / 49.0, 1.0 / 49.0, 5.0, 1.0];
    zip(&x, expected).for_each(|x| assert_approx_eq!(f64, *x.0, x.1, epsilon = 1e-5));
    assert_approx_eq!(f64, f, 1323.0 / 2401.0, epsilon = 1e-6);

    let c = problem
        .evaluate(&x, &[0.0; 9], Order::Values, JacobianKind::Dense)
        .unwrap()
        .constraints;
    let theta = constraint_norm(
        ConstraintNorm::LInf,
        &x,
        &c,
        problem.lower_bounds(),
        problem.upper_bounds(),
        None,
    );
    assert!(theta < 1e-6);

    zip(lambda.constraints, [8.0 / 49.0, 2.0 / 7.0, 8.0 / 49.0, -62.0 / 343.0])
        .for_each(|x| assert_approx_eq!(f64, x.0, x.1, epsilon = 1e-4));
    lambda
        .bounds
        .iter()
        .for_each(|&l| assert_approx_eq!(f64, l, 0.0, epsilon = 1e-6));
}

#[test]
fn parametric_quadratic() {
    check_solution(Options::default());
}

#[test]
fn parametric_quadratic_exact_hessian() {
    check_solution(Options {
        second_derivatives: SecondDerivatives::All,
        ..Default::default()
    });
}
