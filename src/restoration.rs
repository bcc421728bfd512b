use anyhow::{bail, Result};
use log::{debug, info, warn};

use crate::common::{Globalization, HessScaling, HessUpdate, Options, SecondDerivatives, Status};
use crate::matrix::{Matrix, SparseMatrix};
use crate::sqp::SqpMethod;
use crate::traits::{Evaluation, Jacobian, JacobianKind, Order, Problem};

const RHO: f64 = 1e3;
const ZETA: f64 = 1e-3;
const OBJ_UP: f64 = 1e20;

/// Minimum-norm problem finding a point acceptable to the filter:
///
/// ```txt
///     min 1/2 rho ||s||^2 + 1/2 zeta ||D (x - x_ref)||^2
///     subject to   bl <= [x; c(x) - s] <= bu
/// ```
///
/// with one slack per constraint of the parent problem and `D` scaling
/// components of `x_ref` larger than one to unit size.
pub struct RestorationProblem<'a> {
    parent: &'a dyn Problem,
    xi_ref: Vec<f64>,
    diag_scale: Vec<f64>,
    rho: f64,
    zeta: f64,
    n_var: usize,
    n_con: usize,
    block_idx: Vec<usize>,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl<'a> RestorationProblem<'a> {
    pub fn new(parent: &'a dyn Problem, xi_ref: &[f64]) -> Self {
        let p_var = parent.n_var();
        let n_con = parent.n_con();
        let n_var = p_var + n_con;

        let mut block_idx = parent.block_idx().to_vec();
        block_idx.extend((1..=n_con).map(|i| p_var + i));

        // parent variables, unbounded slacks, parent constraints
        let (pl, pu) = (parent.lower_bounds(), parent.upper_bounds());
        let mut lower = pl[..p_var].to_vec();
        let mut upper = pu[..p_var].to_vec();
        lower.extend(std::iter::repeat(-OBJ_UP).take(n_con));
        upper.extend(std::iter::repeat(OBJ_UP).take(n_con));
        lower.extend_from_slice(&pl[p_var..]);
        upper.extend_from_slice(&pu[p_var..]);

        let diag_scale = xi_ref
            .iter()
            .map(|x| if x.abs() > 1.0 { 1.0 / x.abs() } else { 1.0 })
            .collect();

        Self {
            parent,
            xi_ref: xi_ref.to_vec(),
            diag_scale,
            rho: RHO,
            zeta: ZETA,
            n_var,
            n_con,
            block_idx,
            lower,
            upper,
        }
    }

    /// Slacks making `constr_ref` feasible: the amount by which each
    /// constraint violates its bounds.
    pub fn initial_slacks(&self, constr_ref: &[f64]) -> Vec<f64> {
        let p_var = self.parent.n_var();
        let (pl, pu) = (self.parent.lower_bounds(), self.parent.upper_bounds());
        constr_ref
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                if c <= pl[p_var + i] {
                    c - pl[p_var + i]
                } else if c > pu[p_var + i] {
                    c - pu[p_var + i]
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn objective(&self, x: &[f64], slack: &[f64]) -> f64 {
        let slack_term: f64 = slack.iter().map(|s| s * s).sum();
        let reg_term: f64 = x
            .iter()
            .zip(&self.xi_ref)
            .zip(&self.diag_scale)
            .map(|((x, r), d)| (d * (x - r)).powi(2))
            .sum();
        0.5 * self.rho * slack_term + 0.5 * self.zeta * reg_term
    }

    fn gradient(&self, x: &[f64], slack: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(&self.xi_ref)
            .zip(&self.diag_scale)
            .map(|((x, r), d)| self.zeta * d * d * (x - r))
            .chain(slack.iter().map(|s| self.rho * s))
            .collect()
    }

    /// Multipliers of the parent variables and constraints.
    fn parent_lambda(&self, lambda: &[f64]) -> Vec<f64> {
        let p_var = self.parent.n_var();
        let mut parent = lambda[..p_var].to_vec();
        parent.extend_from_slice(&lambda[self.n_var..]);
        parent
    }

    /// Appends a `-1` column per slack to the parent Jacobian.
    fn extend_jacobian(&self, jacobian: Jacobian) -> Result<Jacobian> {
        let p_var = self.parent.n_var();
        let m = self.n_con;
        Ok(match jacobian {
            Jacobian::Dense(a) => {
                let mut ext = Matrix::zeros(m, self.n_var);
                for j in 0..p_var {
                    ext.col_mut(j).copy_from_slice(a.col(j));
                }
                for i in 0..m {
                    ext[(i, p_var + i)] = -1.0;
                }
                Jacobian::Dense(ext)
            }
            Jacobian::Sparse(a) => {
                let SparseMatrix {
                    mut nz,
                    mut ind_row,
                    mut ind_col,
                    ..
                } = a;
                for i in 0..m {
                    nz.push(-1.0);
                    ind_row.push(i);
                    ind_col.push(nz.len());
                }
                Jacobian::Sparse(SparseMatrix::new(m, self.n_var, nz, ind_row, ind_col)?)
            }
            Jacobian::Unsupported => Jacobian::Unsupported,
        })
    }
}

impl Problem for RestorationProblem<'_> {
    fn n_var(&self) -> usize {
        self.n_var
    }

    fn n_con(&self) -> usize {
        self.n_con
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

    fn objective_bounds(&self) -> (f64, f64) {
        (0.0, OBJ_UP)
    }

    fn initialize(
        &self,
        xi: &mut [f64],
        lambda: &mut [f64],
        kind: JacobianKind,
    ) -> Result<Jacobian> {
        let p_var = self.parent.n_var();
        let mut parent_lambda = vec![0.0; p_var + self.n_con];
        let (x, slack) = xi.split_at_mut(p_var);
        let jacobian = self.parent.initialize(x, &mut parent_lambda, kind)?;

        // start from the reference point with feasible slacks
        x.copy_from_slice(&self.xi_ref);
        let constr_ref = self
            .parent
            .evaluate(x, &parent_lambda, Order::Values, kind)?
            .constraints;
        slack.copy_from_slice(&self.initial_slacks(&constr_ref));

        lambda.fill(0.0);
        self.extend_jacobian(jacobian)
    }

    fn evaluate(
        &self,
        xi: &[f64],
        lambda: &[f64],
        order: Order,
        kind: JacobianKind,
    ) -> Result<Evaluation> {
        let p_var = self.parent.n_var();
        let (x, slack) = xi.split_at(p_var);
        let order = match order {
            Order::Values => Order::Values,
            _ => Order::First,
        };

        let eval = self
            .parent
            .evaluate(x, &self.parent_lambda(lambda), order, kind)?;
        let constraints = eval
            .constraints
            .iter()
            .zip(slack)
            .map(|(c, s)| c - s)
            .collect();
        let objective = self.objective(x, slack);

        if order == Order::Values {
            return Ok(Evaluation::values(objective, constraints));
        }
        Ok(Evaluation {
            objective,
            constraints,
            gradient: self.gradient(x, slack),
            jacobian: self.extend_jacobian(eval.jacobian)?,
            hessian: Vec::new(),
        })
    }

    fn info(&self) -> String {
        "Minimum 2-norm NLP to find a point acceptable to the filter".to_string()
    }
}

impl SqpMethod<'_> {
    /// Problem-specific heuristic: moves to the point returned by
    /// [`Problem::reduce_constraint_violation`] if it is acceptable to the
    /// filter, dropping the multipliers and the Hessian information.
    pub(crate) fn restoration_heuristic(&mut self) -> bool {
        self.stats.n_rest_heur_calls += 1;

        let mut trial_xi = self.vars.xi.clone();
        match self.problem.reduce_constraint_violation(&mut trial_xi) {
            Ok(true) => {}
            Ok(false) => return false,
            Err(err) => {
                debug!("restoration heuristic failed: {}", err);
                return false;
            }
        }
        let Some(trial) = self.evaluate_values(&trial_xi) else {
            return false;
        };
        if self.vars.filter.is_dominated(trial.c_norm, trial.obj) {
            return false;
        }

        self.vars.lambda.fill(0.0);
        self.move_to(&trial_xi);
        true
    }

    /// Moves to `xi` outside of the line search. The Hessian approximation
    /// starts over and the displacement is the step of the next update.
    fn move_to(&mut self, xi: &[f64]) {
        let step: Vec<f64> = xi.iter().zip(&self.vars.xi).map(|(n, o)| n - o).collect();
        self.reset_hessian();

        let v = &mut self.vars;
        v.history.delta_mut().copy_from_slice(&step);
        v.xi.copy_from_slice(xi);
        v.alpha = 1.0;
        v.n_socs = 0;
        v.reduced_step_count = 0;
    }

    /// Feasibility restoration phase: iterates on the minimum-norm problem
    /// until its variables are acceptable to the filter. Returns `false` if
    /// no such point was found and an error if the restoration problem
    /// converged to an unacceptable point.
    pub(crate) fn restoration_phase(&mut self) -> Result<bool> {
        if !self.opt.restore_feas {
            bail!("feasibility restoration phase is disabled");
        }
        self.stats.n_rest_phase_calls += 1;
        info!("starting feasibility restoration phase");

        let rest = RestorationProblem::new(self.problem, &self.vars.xi);
        let rest_opt = Options {
            globalization: Globalization::FilterLineSearch,
            second_derivatives: SecondDerivatives::None,
            restore_feas: false,
            hess_update: HessUpdate::Bfgs,
            hess_lim_mem: true,
            hess_scaling: HessScaling::OrenLuenberger,
            opt_tol: self.opt.opt_tol,
            nlinfeas_tol: self.opt.nlinfeas_tol,
            sparse_qp: self.opt.sparse_qp,
            constraint_norm: self.opt.constraint_norm,
            eps: self.opt.eps,
            inf: self.opt.inf,
            max_it_qp: self.opt.max_it_qp,
            max_time_qp: self.opt.max_time_qp,
            ..Options::default()
        };
        let mut method = SqpMethod::new(&rest, self.qp_solver, rest_opt, None)?;
        method.init()?;

        let n_var = self.problem.n_var();
        // Some(true): acceptable point, Some(false): locally infeasible
        let mut outcome = None;
        let mut warm_start = false;
        for _ in 0..self.opt.max_restoration_it {
            let status = match method.run(1, warm_start) {
                Ok(status) => status,
                Err(err) => {
                    warn!("restoration iteration failed: {}", err);
                    break;
                }
            };
            warm_start = true;

            let trial_xi = method.vars.xi[..n_var].to_vec();
            if let Some(trial) = self.evaluate_values(&trial_xi) {
                if !self.vars.filter.is_dominated(trial.c_norm, trial.obj) {
                    info!("found a point acceptable to the filter");
                    self.vars.trial_xi = trial_xi;
                    outcome = Some(true);
                    break;
                }
            }
            if status == Status::Converged
                || (method.vars.tol < self.opt.opt_tol
                    && method.vars.c_norm_s < self.opt.nlinfeas_tol)
            {
                outcome = Some(false);
                break;
            }
        }

        match outcome {
            Some(true) => {}
            Some(false) => {
                bail!("restoration phase converged to a point not acceptable to the filter, problem locally infeasible")
            }
            None => {
                warn!("restoration phase found no acceptable point");
                return Ok(false);
            }
        }

        // Restoration multipliers: bounds of the variables and slacks, then
        // the constraints.
        let rest_var = rest.n_var;
        let rest_lambda = &method.vars.lambda;
        let rest_lambda_qp = &method.vars.lambda_qp;
        let index = |k: usize| if k < n_var { k } else { rest_var + k - n_var };

        let v = &mut self.vars;
        v.lambda_step_norm = 0.0;
        for k in 0..v.lambda.len() {
            let step = (rest_lambda[index(k)] - v.lambda[k]).abs();
            v.lambda_step_norm = v.lambda_step_norm.max(step);
            v.lambda[k] = rest_lambda[index(k)];
            v.lambda_qp[k] = rest_lambda_qp[index(k)];
        }

        debug!(
            "restoration phase finished after {} iterations",
            method.stats.it_count
        );
        let trial_xi = self.vars.trial_xi.clone();
        self.move_to(&trial_xi);
        Ok(true)
    }
}
