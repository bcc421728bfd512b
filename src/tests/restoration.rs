use anyhow::Result;
use float_cmp::assert_approx_eq;
use std::iter::zip;

use spsolve::rlu::RLU;

use super::jacobian;
use crate::{
    Evaluation, HessUpdate, InteriorPointQp, Jacobian, JacobianKind, Matrix, Options, Order,
    Problem, QpMode, RestorationProblem, SqpMethod, Status, StepType,
};

/// ```txt
///     min (x - 0.5)^2   s.t.   x^2 = 1,   0 <= x <= 2
/// ```
///
/// The linearization at the starting point `0.1` has no solution within
/// the bounds.
struct UnreachableEquality {
    block_idx: Vec<usize>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    heuristic: bool,
}

impl UnreachableEquality {
    fn new(heuristic: bool) -> Self {
        Self {
            block_idx: vec![0, 1],
            lower: vec![0.0, 1.0],
            upper: vec![2.0, 1.0],
            heuristic,
        }
    }
}

impl Problem for UnreachableEquality {
    fn n_var(&self) -> usize {
        1
    }

    fn n_con(&self) -> usize {
        1
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
        xi[0] = 0.1;
        lambda.fill(0.0);
        Ok(jacobian(&[vec![0.2]], 1, kind))
    }

    fn evaluate(
        &self,
        x: &[f64],
        _lambda: &[f64],
        order: Order,
        kind: JacobianKind,
    ) -> Result<Evaluation> {
        let f = (x[0] - 0.5).powi(2);
        let c = vec![x[0].powi(2)];
        if order == Order::Values {
            return Ok(Evaluation::values(f, c));
        }
        Ok(Evaluation {
            objective: f,
            constraints: c,
            gradient: vec![2.0 * (x[0] - 0.5)],
            jacobian: jacobian(&[vec![2.0 * x[0]]], 1, kind),
            hessian: vec![],
        })
    }

    fn reduce_constraint_violation(&self, xi: &mut [f64]) -> Result<bool> {
        if self.heuristic {
            xi[0] = 1.0;
        }
        Ok(self.heuristic)
    }
}

/// Two variables in separate blocks and two constraints:
///
/// ```txt
///     x0^2 + x1^2 = 1
///     x0 - x1 >= 0
/// ```
struct Circle {
    block_idx: Vec<usize>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl Circle {
    fn new() -> Self {
        let inf = f64::INFINITY;
        Self {
            block_idx: vec![0, 1, 2],
            lower: vec![-5.0, -inf, 1.0, 0.0],
            upper: vec![5.0, inf, 1.0, inf],
        }
    }
}

impl Problem for Circle {
    fn n_var(&self) -> usize {
        2
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
        xi.fill(0.0);
        lambda.fill(0.0);
        Ok(jacobian(&[vec![0.0, 0.0], vec![1.0, -1.0]], 2, kind))
    }

    fn evaluate(
        &self,
        x: &[f64],
        _lambda: &[f64],
        order: Order,
        kind: JacobianKind,
    ) -> Result<Evaluation> {
        let f = x[0] + x[1];
        let c = vec![x[0].powi(2) + x[1].powi(2), x[0] - x[1]];
        if order == Order::Values {
            return Ok(Evaluation::values(f, c));
        }
        let rows = [vec![2.0 * x[0], 2.0 * x[1]], vec![1.0, -1.0]];
        Ok(Evaluation {
            objective: f,
            constraints: c,
            gradient: vec![1.0, 1.0],
            jacobian: jacobian(&rows, 2, kind),
            hessian: vec![],
        })
    }
}

#[test]
fn restoration_problem_structure() {
    let circle = Circle::new();
    let rest = RestorationProblem::new(&circle, &[1.0, 2.0]);

    assert_eq!(rest.n_var(), 4);
    assert_eq!(rest.n_con(), 2);
    assert_eq!(rest.block_idx(), &[0, 1, 2, 3, 4]);
    assert_eq!(rest.lower_bounds(), &[-5.0, f64::NEG_INFINITY, -1e20, -1e20, 1.0, 0.0]);
    assert_eq!(rest.upper_bounds(), &[5.0, f64::INFINITY, 1e20, 1e20, 1.0, f64::INFINITY]);
    assert_eq!(rest.objective_bounds(), (0.0, 1e20));

    // c = (5, -1): above the equality, below the inequality
    assert_eq!(rest.initial_slacks(&[5.0, -1.0]), vec![4.0, -1.0]);
    assert_eq!(rest.initial_slacks(&[1.0, 3.0]), vec![0.0, 0.0]);
}

#[test]
fn restoration_starting_point_is_feasible() {
    let circle = Circle::new();
    let rest = RestorationProblem::new(&circle, &[1.0, 2.0]);

    for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
        let mut xi = vec![0.0; 4];
        let mut lambda = vec![1.0; 6];
        let jac = rest.initialize(&mut xi, &mut lambda, kind).unwrap();
        assert_eq!(xi, vec![1.0, 2.0, 4.0, -1.0]);
        assert!(lambda.iter().all(|&l| l == 0.0));
        assert!(jac.is_supported());

        let eval = rest.evaluate(&xi, &lambda, Order::Values, kind).unwrap();
        assert_eq!(eval.constraints, vec![1.0, 0.0]);
    }
}

#[test]
fn restoration_derivatives() {
    let circle = Circle::new();
    let rest = RestorationProblem::new(&circle, &[1.0, 2.0]);
    let xi = [2.0, 2.0, 0.1, 0.0];
    let lambda = [0.0; 6];

    let expected = Matrix::from_rows(&[vec![4.0, 4.0, -1.0, 0.0], vec![1.0, -1.0, 0.0, -1.0]]);
    for kind in [JacobianKind::Dense, JacobianKind::Sparse] {
        let eval = rest.evaluate(&xi, &lambda, Order::SecondAll, kind).unwrap();

        // 1/2 rho s's + 1/2 zeta |D (x - x_ref)|^2 with D = diag(1, 1/2)
        assert_approx_eq!(f64, eval.objective, 5.0 + 0.5e-3, epsilon = 1e-12);
        zip(&eval.gradient, [1e-3, 0.0, 100.0, 0.0])
            .for_each(|x| assert_approx_eq!(f64, *x.0, x.1, epsilon = 1e-12));
        assert!(eval.hessian.is_empty());
        zip(&eval.constraints, [7.9, 0.0])
            .for_each(|x| assert_approx_eq!(f64, *x.0, x.1, epsilon = 1e-12));

        let jac = match eval.jacobian {
            Jacobian::Dense(a) => a,
            Jacobian::Sparse(a) => a.to_dense(),
            Jacobian::Unsupported => panic!("restoration Jacobian unavailable"),
        };
        assert_eq!(jac, expected);
    }
}

#[test]
fn infeasible_qp_triggers_restoration() {
    let problem = UnreachableEquality::new(false);
    let solver = InteriorPointQp::new(RLU::default());
    let mut method = SqpMethod::new(&problem, &solver, Options::default(), None).unwrap();
    method.init().unwrap();

    let status = method.run(100, false).unwrap();

    assert_eq!(status, Status::Converged);
    assert!(method.stats.n_rest_phase_calls >= 1);
    assert_approx_eq!(f64, method.vars.xi[0], 1.0, epsilon = 1e-6);
    // grad f = lambda * dc/dx at x = 1
    assert_approx_eq!(f64, method.lambda().constraints[0], 0.5, epsilon = 1e-4);
}

#[test]
fn restoration_heuristic_is_tried_first() {
    let problem = UnreachableEquality::new(true);
    let solver = InteriorPointQp::new(RLU::default());
    let mut method = SqpMethod::new(&problem, &solver, Options::default(), None).unwrap();
    method.init().unwrap();

    let status = method.run(100, false).unwrap();

    assert_eq!(status, Status::Converged);
    assert!(method.stats.n_rest_heur_calls >= 1);
    assert_eq!(method.stats.n_rest_phase_calls, 0);
    assert_approx_eq!(f64, method.vars.xi[0], 1.0, epsilon = 1e-6);
}

#[test]
fn restoration_disabled() {
    let problem = UnreachableEquality::new(false);
    let solver = InteriorPointQp::new(RLU::default());
    let opt = Options {
        restore_feas: false,
        ..Default::default()
    };
    let mut method = SqpMethod::new(&problem, &solver, opt, None).unwrap();
    method.init().unwrap();

    assert!(method.run(100, false).is_err());
    assert_eq!(method.stats.n_rest_phase_calls, 0);
}

#[test]
fn restoration_call_limit() {
    let problem = UnreachableEquality::new(false);
    let solver = InteriorPointQp::new(RLU::default());
    let opt = Options {
        max_restoration_calls: 0,
        ..Default::default()
    };
    let mut method = SqpMethod::new(&problem, &solver, opt, None).unwrap();
    method.init().unwrap();

    assert_eq!(method.run(100, false).unwrap(), Status::RestorationLimit);
    assert_ne!(method.vars.steptype, StepType::Restoration);
}

fn full_memory_bfgs() -> Options {
    Options {
        sparse_qp: QpMode::Dense,
        hess_update: HessUpdate::Bfgs,
        hess_lim_mem: false,
        ..Default::default()
    }
}

#[test]
fn restoration_step_updates_hessian() {
    let problem = UnreachableEquality::new(false);
    let solver = InteriorPointQp::new(RLU::default());
    let mut method = SqpMethod::new(&problem, &solver, full_memory_bfgs(), None).unwrap();
    method.init().unwrap();
    method.run(1, false).unwrap();

    assert_eq!(method.stats.n_rest_phase_calls, 1);
    let v = &method.vars;
    assert_eq!(v.steptype, StepType::Restoration);

    // the step of the update is the move made by the restoration phase
    assert!((v.xi[0] - 0.1).abs() > 0.1);
    assert_approx_eq!(f64, v.history.delta()[0], v.xi[0] - 0.1, epsilon = 1e-12);
    assert_eq!(v.hessian.skipped_updates(0), Some(0));
    assert_eq!(method.stats.n_total_skipped_updates, 0);
}

#[test]
fn heuristic_step_updates_hessian() {
    let problem = UnreachableEquality::new(true);
    let solver = InteriorPointQp::new(RLU::default());
    let mut method = SqpMethod::new(&problem, &solver, full_memory_bfgs(), None).unwrap();
    method.init().unwrap();
    method.run(1, false).unwrap();

    let v = &method.vars;
    assert_eq!(v.steptype, StepType::Heuristic);
    assert_eq!(v.xi[0], 1.0);
    assert_approx_eq!(f64, v.history.delta()[0], 0.9, epsilon = 1e-12);

    // s = 0.9, y = 2 * 0.9 with zero multipliers
    assert_eq!(v.hessian.skipped_updates(0), Some(0));
    assert_approx_eq!(f64, v.hessian.block(0)[(0, 0)], 2.0, epsilon = 1e-12);
}
