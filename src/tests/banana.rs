use anyhow::Result;
use float_cmp::assert_approx_eq;
use spsolve::rlu::RLU;

use super::jacobian;
use crate::{
    sqp, CsvMonitor, Evaluation, HessUpdate, InteriorPointQp, Jacobian, JacobianKind, Options,
    Order, Problem,
};

/// 2-dimensional unconstrained optimization of Rosenbrock's "banana" function
/// from MATLAB Optimization Toolbox's `bandem.m`:
///
/// ```txt
///     f(x) = 100(x_2 − x_1^2) 2 + (1 − x_1)^2
/// ```
///
/// https://en.wikipedia.org/wiki/Rosenbrock_function
struct UnconstrainedBananaFunction {
    block_idx: Vec<usize>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl UnconstrainedBananaFunction {
    fn new() -> Self {
        Self {
            block_idx: vec![0, 2],
            lower: vec![f64::NEG_INFINITY; 2],
            upper: vec![f64::INFINITY; 2],
        }
    }
}

impl Problem for UnconstrainedBananaFunction {
    fn n_var(&self) -> usize {
        2
    }

    fn n_con(&self) -> usize {
        0
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
        xi.copy_from_slice(&[-1.9, 2.0]);
        lambda.fill(0.0);
        Ok(jacobian(&[], 2, kind))
    }

    fn evaluate(
        &self,
        x: &[f64],
        _lambda: &[f64],
        order: Order,
        kind: JacobianKind,
    ) -> Result<Evaluation> {
        let a = 100.0;
        let f = a * (x[1] - x[0].powi(2)).powi(2) + (1.0 - x[0]).powi(2);
        if order == Order::Values {
            return Ok(Evaluation::values(f, vec![]));
        }
        let df = vec![
            4.0 * a * (x[0].powi(3) - x[0] * x[1]) + 2.0 * x[0] - 2.0,
            2.0 * a * (x[1] - x[0].powi(2)),
        ];
        Ok(Evaluation {
            objective: f,
            constraints: vec![],
            gradient: df,
            jacobian: jacobian(&[], 2, kind),
            hessian: vec![],
        })
    }
}

#[test]
fn unconstrained_banana() {
    let f2 = UnconstrainedBananaFunction::new();
    let solver = InteriorPointQp::new(RLU::default());
    let opt = Options {
        hess_update: HessUpdate::Bfgs,
        hess_lim_mem: false,
        max_it: 200,
        ..Default::default()
    };
    let (x, f, converged, iterations, lambda) = sqp(&f2, &solver, opt, None).unwrap();

    assert!(converged);
    assert!(iterations < 200);
    assert_approx_eq!(f64, f, 0.0, epsilon = 1e-8);
    x.iter().for_each(|&x| assert_approx_eq!(f64, x, 1.0, epsilon = 1e-4));
    assert!(lambda.constraints.is_empty());
    lambda
        .bounds
        .iter()
        .for_each(|&l| assert_approx_eq!(f64, l, 0.0, epsilon = 1e-12));
}

#[test]
fn banana_limited_memory_sr1() {
    let f2 = UnconstrainedBananaFunction::new();
    let solver = InteriorPointQp::new(RLU::default());
    let opt = Options {
        max_it: 500,
        ..Default::default()
    };
    let monitor = CsvMonitor::new(Vec::<u8>::new());
    let (x, _f, converged, iterations, _lambda) =
        sqp(&f2, &solver, opt, Some(&monitor)).unwrap();

    assert!(converged);
    x.iter().for_each(|&x| assert_approx_eq!(f64, x, 1.0, epsilon = 1e-4));

    // header and one row per iteration, including the starting point
    let csv = String::from_utf8(monitor.into_inner()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert!(lines[0].starts_with("it,qpIt"));
    assert_eq!(lines.len(), iterations + 1);
    assert!(lines[1].starts_with("0,"));
}
