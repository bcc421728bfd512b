use anyhow::{bail, format_err, Result};
use log::{debug, info, warn};

use crate::common::{
    Globalization, HessUpdate, Lambda, Options, QpMode, SecondDerivatives, Status, StepType,
};
use crate::diagnostics::{ProgressRecord, Stats};
use crate::hessian::HessianSelector;
use crate::iterate::{hessian_blocks, Iterate};
use crate::math::{constraint_norm, norm_inf};
use crate::matrix::{Matrix, SymMatrix};
use crate::qpbuild::{
    dense_hessian, sparse_hessian, step_bounds, QpData, QpHessian, QpSolution, QpStatus,
};
use crate::traits::{Jacobian, JacobianKind, Order, Problem, ProgressMonitor, QpSolver};

/// Relative perturbation of the finite-difference Hessian.
const FD_DELTA: f64 = 1e-4;
const FD_MIN_DELTA: f64 = 1e-6;

/// Objective and constraint values at a trial point.
pub(crate) struct Trial {
    pub obj: f64,
    pub constr: Vec<f64>,
    pub c_norm: f64,
}

/// `grad f - lambda_bounds - J' * lambda_constraints`
pub(crate) fn lagrange_gradient(lambda: &[f64], grad_obj: &[f64], jacobian: &Jacobian) -> Vec<f64> {
    let n_var = grad_obj.len();
    let jt_lambda = jacobian.mul_vec_t(&lambda[n_var..]);
    grad_obj
        .iter()
        .enumerate()
        .map(|(i, g)| g - lambda[i] - jt_lambda.get(i).copied().unwrap_or(0.0))
        .collect()
}

fn other_kind(kind: JacobianKind) -> JacobianKind {
    match kind {
        JacobianKind::Dense => JacobianKind::Sparse,
        JacobianKind::Sparse => JacobianKind::Dense,
    }
}

/// Sequential quadratic programming method with block-structured quasi-Newton
/// Hessians and a filter line search.
pub struct SqpMethod<'a> {
    pub(crate) problem: &'a dyn Problem,
    pub(crate) qp_solver: &'a dyn QpSolver,
    pub(crate) monitor: Option<&'a dyn ProgressMonitor>,
    pub opt: Options,
    pub vars: Iterate,
    pub stats: Stats,
    pub(crate) jacobian_kind: JacobianKind,
    /// Previous QP solution, offered to the QP solver as warm start.
    pub(crate) last_qp: Option<QpSolution>,
}

impl<'a> SqpMethod<'a> {
    pub fn new(
        problem: &'a dyn Problem,
        qp_solver: &'a dyn QpSolver,
        opt: Options,
        monitor: Option<&'a dyn ProgressMonitor>,
    ) -> Result<Self> {
        let n_var = problem.n_var();
        let n_con = problem.n_con();

        let blocks = problem.block_idx();
        if blocks.first() != Some(&0)
            || blocks.last() != Some(&n_var)
            || blocks.windows(2).any(|w| w[1] <= w[0])
        {
            bail!("invalid block partition {:?} of {} variables", blocks, n_var);
        }
        let (lower, upper) = (problem.lower_bounds(), problem.upper_bounds());
        if lower.len() != n_var + n_con || upper.len() != n_var + n_con {
            bail!(
                "bounds have length {}/{}, expected {}",
                lower.len(),
                upper.len(),
                n_var + n_con
            );
        }

        let max_block = |idx: &[usize]| idx.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0);
        let provisional = hessian_blocks(blocks, n_var, opt.block_hess);
        let opt = opt.consistent(max_block(&provisional), provisional.len() - 1);
        let block_idx = hessian_blocks(blocks, n_var, opt.block_hess);

        let jacobian_kind = match opt.sparse_qp {
            QpMode::Dense => JacobianKind::Dense,
            QpMode::Sparse | QpMode::SparseSchur => JacobianKind::Sparse,
        };
        let vars = Iterate::new(n_var, n_con, block_idx, &opt);

        Ok(Self {
            problem,
            qp_solver,
            monitor,
            opt,
            vars,
            stats: Stats::default(),
            jacobian_kind,
            last_qp: None,
        })
    }

    /// Sets the starting point and the Jacobian structure from the problem.
    pub fn init(&mut self) -> Result<()> {
        let v = &mut self.vars;
        let mut jacobian = self
            .problem
            .initialize(&mut v.xi, &mut v.lambda, self.jacobian_kind)?;
        if !jacobian.is_supported() {
            let kind = other_kind(self.jacobian_kind);
            jacobian = self.problem.initialize(&mut v.xi, &mut v.lambda, kind)?;
            if jacobian.is_supported() {
                debug!("problem provides a {:?} Jacobian only", kind);
                self.jacobian_kind = kind;
            } else if self.problem.n_con() > 0 {
                bail!("problem provides no constraint Jacobian");
            } else {
                jacobian = Jacobian::Dense(Matrix::zeros(0, self.problem.n_var()));
            }
        }
        v.jacobian = jacobian;
        self.stats = Stats::default();
        self.last_qp = None;

        let info = self.problem.info();
        if !info.is_empty() {
            info!("{}", info);
        }
        Ok(())
    }

    /// Performs up to `max_it` iterations. With `warm_start` the run
    /// continues from the current iterate.
    pub fn run(&mut self, max_it: usize, warm_start: bool) -> Result<Status> {
        if !warm_start || self.stats.it_count == 0 {
            self.evaluate_derivatives()
                .map_err(|err| format_err!("evaluation at the starting point failed: {}", err))?;

            let converged = self.calc_opt_tol();
            self.progress();
            if converged {
                return Ok(Status::Converged);
            }
            self.stats.it_count += 1;
        }

        for _ in 0..max_it {
            let mut skip_line_search = false;

            self.update_step_bounds(None);
            let qp_status = self.solve_qp_step();
            match qp_status {
                QpStatus::Optimal => {}
                QpStatus::IterationLimit => {
                    warn!("maximum number of QP iterations exceeded, using the QP step");
                }
                QpStatus::NumericalError => {
                    warn!("QP error, solving again with reset Hessian");
                    self.reset_hessian();
                    match self.solve_qp_step() {
                        QpStatus::Optimal | QpStatus::IterationLimit => {
                            self.vars.steptype = StepType::HessianReset;
                        }
                        _ => {
                            skip_line_search = true;
                            if !self.opt.restore_feas {
                                bail!("QP error after Hessian reset");
                            }
                            if !self.restoration_allowed() {
                                return Ok(Status::RestorationLimit);
                            }
                            self.vars.steptype = StepType::Restoration;
                            if !self.restoration_phase()? {
                                bail!("QP error after Hessian reset and restoration failure");
                            }
                        }
                    }
                }
                QpStatus::Infeasible => {
                    skip_line_search = true;
                    let mut restored = false;

                    if self.vars.steptype < StepType::Heuristic {
                        restored = self.restoration_heuristic();
                        if restored {
                            info!("QP infeasible, constraint violation reduced by heuristic");
                            self.vars.steptype = StepType::Heuristic;
                        }
                    }
                    if !restored
                        && self.opt.restore_feas
                        && self.vars.c_norm > 0.01 * self.opt.nlinfeas_tol
                    {
                        if !self.restoration_allowed() {
                            return Ok(Status::RestorationLimit);
                        }
                        self.vars.steptype = StepType::Restoration;
                        restored = self.restoration_phase()?;
                    }
                    if !restored {
                        bail!("QP infeasible, feasibility could not be restored");
                    }
                }
            }

            // Step length
            if skip_line_search {
                // taken by the heuristic or the restoration phase
            } else if self.opt.globalization == Globalization::None
                || (self.opt.skip_first_globalization && self.stats.it_count == 1)
            {
                if !self.full_step() {
                    bail!("objective or constraints could not be evaluated at the new point");
                }
                self.vars.steptype = StepType::Normal;
            } else if !self.filter_line_search()
                || self.vars.reduced_step_count > self.opt.max_consec_reduced_steps
            {
                let mut found = self.kkt_error_reduction();
                if found {
                    self.vars.steptype = StepType::KktReduction;
                }

                let infeasible = self.vars.c_norm > 0.01 * self.opt.nlinfeas_tol;
                if !found && infeasible && self.vars.steptype < StepType::Heuristic {
                    found = self.restoration_heuristic();
                    if found {
                        info!("step length too short, constraint violation reduced by heuristic");
                        self.vars.steptype = StepType::Heuristic;
                    }
                }

                if !found
                    && self.vars.steptype != StepType::HessianReset
                    && self.vars.steptype != StepType::Heuristic
                {
                    warn!("step length too short, computing a new step with reset Hessian");
                    self.vars.steptype = StepType::HessianReset;
                    self.reset_hessian();
                    continue;
                }

                if !found && infeasible && self.opt.restore_feas {
                    if !self.restoration_allowed() {
                        return Ok(Status::RestorationLimit);
                    }
                    warn!("step length too short, starting feasibility restoration phase");
                    self.vars.steptype = StepType::Restoration;
                    found = self.restoration_phase()?;
                }

                if !found {
                    bail!("line search failed");
                }
            } else {
                self.vars.steptype = StepType::Normal;
            }

            // Lagrangian gradient at the old point with the new multipliers.
            let v = &self.vars;
            let old_grad_lagrange = lagrange_gradient(&v.lambda, &v.grad_obj, &v.jacobian);

            self.evaluate_derivatives()?;

            let converged = self.calc_opt_tol();
            self.progress();
            if converged && self.vars.steptype < StepType::Heuristic {
                self.stats.it_count += 1;
                return Ok(Status::Converged);
            }

            let v = &mut self.vars;
            for (g, (new, old)) in v
                .history
                .gamma_mut()
                .iter_mut()
                .zip(v.grad_lagrange.iter().zip(&old_grad_lagrange))
            {
                *g = new - old;
            }
            v.history.commit();

            self.update_hessian()?;

            self.vars.history.advance();
            self.stats.it_count += 1;
        }

        Ok(Status::IterationLimit)
    }

    /// Reports the end of a run to the monitor.
    pub fn finish(&self) {
        info!(
            "{} iterations, {} QP iterations, {} function and {} derivative evaluations",
            self.stats.it_count, self.stats.qp_it_total, self.stats.n_fun_calls, self.stats.n_der_calls
        );
        if let Some(monitor) = self.monitor {
            monitor.finish();
        }
    }

    pub fn lambda(&self) -> Lambda {
        let n_var = self.problem.n_var();
        Lambda {
            bounds: self.vars.lambda[..n_var].to_vec(),
            constraints: self.vars.lambda[n_var..].to_vec(),
        }
    }

    pub(crate) fn constraint_norm(&self, xi: &[f64], constr: &[f64]) -> f64 {
        constraint_norm(
            self.opt.constraint_norm,
            xi,
            constr,
            self.problem.lower_bounds(),
            self.problem.upper_bounds(),
            self.opt.constraint_weights.as_deref(),
        )
    }

    /// Objective and constraint values at `xi`, or `None` if the evaluation
    /// fails or gives values that are out of bounds or NaN.
    pub(crate) fn evaluate_values(&mut self, xi: &[f64]) -> Option<Trial> {
        self.stats.n_fun_calls += 1;
        let eval = match self
            .problem
            .evaluate(xi, &self.vars.lambda, Order::Values, self.jacobian_kind)
        {
            Ok(eval) => eval,
            Err(err) => {
                debug!("evaluation failed: {}", err);
                return None;
            }
        };
        let (obj_lo, obj_up) = self.problem.objective_bounds();
        if eval.objective.is_nan() || eval.objective < obj_lo || eval.objective > obj_up {
            return None;
        }
        let c_norm = self.constraint_norm(xi, &eval.constraints);
        if c_norm.is_nan() {
            return None;
        }
        Some(Trial {
            obj: eval.objective,
            constr: eval.constraints,
            c_norm,
        })
    }

    /// Evaluates values and derivatives at the current iterate.
    pub(crate) fn evaluate_derivatives(&mut self) -> Result<()> {
        let n_var = self.problem.n_var();
        let n_con = self.problem.n_con();
        let order = match self.opt.second_derivatives {
            SecondDerivatives::None => Order::First,
            SecondDerivatives::LastBlock => Order::SecondLastBlock,
            SecondDerivatives::All => Order::SecondAll,
        };

        let v = &self.vars;
        let mut eval = self
            .problem
            .evaluate(&v.xi, &v.lambda, order, self.jacobian_kind)?;
        self.stats.n_der_calls += 1;
        if !eval.jacobian.is_supported() {
            if n_con == 0 {
                eval.jacobian = Jacobian::Dense(Matrix::zeros(0, n_var));
            } else {
                let kind = other_kind(self.jacobian_kind);
                eval = self.problem.evaluate(&v.xi, &v.lambda, order, kind)?;
                self.stats.n_der_calls += 1;
                if !eval.jacobian.is_supported() {
                    bail!("problem provides no constraint Jacobian");
                }
                debug!("switching to {:?} Jacobian", kind);
                self.jacobian_kind = kind;
            }
        }

        let (obj_lo, obj_up) = self.problem.objective_bounds();
        if eval.objective.is_nan() || eval.objective < obj_lo || eval.objective > obj_up {
            bail!(
                "objective {} outside of [{}, {}]",
                eval.objective,
                obj_lo,
                obj_up
            );
        }
        if eval.gradient.len() != n_var || eval.constraints.len() != n_con {
            bail!(
                "evaluation returned {} gradient entries and {} constraints, expected {} and {}",
                eval.gradient.len(),
                eval.constraints.len(),
                n_var,
                n_con
            );
        }

        let n_blocks = self.vars.hessian.n_blocks();
        match order {
            Order::SecondLastBlock => match eval.hessian.pop() {
                Some(h) => self.set_exact_block(n_blocks - 1, h)?,
                None => bail!("problem provided no Hessian for the last block"),
            },
            Order::SecondAll => {
                if eval.hessian.len() != n_blocks {
                    bail!(
                        "problem provided {} Hessian blocks, expected {}",
                        eval.hessian.len(),
                        n_blocks
                    );
                }
                for (b, h) in eval.hessian.drain(..).enumerate() {
                    self.set_exact_block(b, h)?;
                }
            }
            _ => {}
        }

        let v = &mut self.vars;
        v.obj = eval.objective;
        v.constr = eval.constraints;
        v.grad_obj = eval.gradient;
        v.jacobian = eval.jacobian;
        Ok(())
    }

    fn set_exact_block(&mut self, b: usize, h: SymMatrix) -> Result<()> {
        let idx = self.vars.hessian.block_idx();
        let n = idx[b + 1] - idx[b];
        if h.dim() != n {
            bail!("Hessian block {} has dimension {}, expected {}", b, h.dim(), n);
        }
        self.vars.hessian.set_block(b, h);
        Ok(())
    }

    /// Computes the Lagrangian gradient, the scaled KKT error and the
    /// constraint violation. Returns `true` if the iterate is optimal.
    pub(crate) fn calc_opt_tol(&mut self) -> bool {
        let c_norm = self.constraint_norm(&self.vars.xi, &self.vars.constr);
        let v = &mut self.vars;
        v.grad_lagrange = lagrange_gradient(&v.lambda, &v.grad_obj, &v.jacobian);
        v.grad_norm = norm_inf(&v.grad_lagrange);
        v.tol = v.grad_norm / (1.0 + norm_inf(&v.lambda));
        v.c_norm = c_norm;
        v.c_norm_s = c_norm / (1.0 + norm_inf(&v.xi));

        v.tol <= self.opt.opt_tol && v.c_norm_s <= self.opt.nlinfeas_tol
    }

    fn progress(&mut self) {
        let v = &self.vars;
        let delta_h = &v.hessian.delta_h;
        let record = ProgressRecord {
            iteration: self.stats.it_count,
            qp_iterations: self.stats.qp_iterations,
            qp_iterations2: self.stats.qp_iterations2,
            obj: v.obj,
            c_norm_s: v.c_norm_s,
            tol: v.tol,
            grad_norm: v.grad_norm,
            step_norm: norm_inf(v.history.delta()),
            lambda_step_norm: v.lambda_step_norm,
            alpha: v.alpha,
            n_socs: v.n_socs,
            hess_skipped: self.stats.hess_skipped,
            hess_damped: self.stats.hess_damped,
            sizing_factor: self.stats.average_sizing_factor,
            qp_resolve: self.stats.qp_resolve,
            delta_h: delta_h.iter().sum::<f64>() / delta_h.len().max(1) as f64,
            steptype: v.steptype,
            reduced: v.alpha < 1.0,
        };
        if let Some(monitor) = self.monitor {
            monitor.update(&record);
        }

        self.stats.qp_iterations = 0;
        self.stats.qp_iterations2 = 0;
        self.stats.qp_resolve = 0;
        self.stats.rejected_sr1 = 0;
        self.stats.hess_skipped = 0;
        self.stats.hess_damped = 0;
        self.stats.average_sizing_factor = 0.0;
    }

    /// Bounds of the QP subproblem. With `soc` (constraint values at the
    /// rejected trial point) the bounds of the second-order correction.
    pub(crate) fn update_step_bounds(&mut self, soc: Option<&[f64]>) {
        let v = &mut self.vars;
        let (constr, a_delta_xi) = match soc {
            Some(constr) => (constr, Some(v.a_delta_xi.as_slice())),
            None => (v.constr.as_slice(), None),
        };
        step_bounds(
            self.problem.lower_bounds(),
            self.problem.upper_bounds(),
            &v.xi,
            constr,
            a_delta_xi,
            self.opt.inf,
            &mut v.delta_bl,
            &mut v.delta_bu,
        );
    }

    /// Solves the QP for a new step, storing the step and the multipliers.
    fn solve_qp_step(&mut self) -> QpStatus {
        let solution = self.solve_qp(true);
        if matches!(solution.status, QpStatus::Optimal | QpStatus::IterationLimit) {
            let v = &mut self.vars;
            v.history.delta_mut().copy_from_slice(&solution.step);
            v.lambda_qp.copy_from_slice(&solution.lambda);
        }
        solution.status
    }

    fn qp_hessian(&self, blocks: &[SymMatrix]) -> QpHessian {
        let block_idx = self.vars.hessian.block_idx();
        let n_var = self.problem.n_var();
        match self.opt.sparse_qp {
            QpMode::Dense => QpHessian::Dense(dense_hessian(blocks, block_idx, n_var)),
            QpMode::Sparse | QpMode::SparseSchur => {
                QpHessian::Sparse(sparse_hessian(blocks, block_idx, n_var, self.opt.eps))
            }
        }
    }

    /// Solves the QP subproblem with the current bounds.
    ///
    /// With `matrices_changed` the Hessian is rebuilt from the current
    /// approximation. Under a filter line search a QP that cannot be solved
    /// is solved again up to `max_conv_qp` times, first with the BFGS
    /// fallback (if any), then with a stronger inertia correction. Without
    /// `matrices_changed` the previous Hessian is reused.
    pub(crate) fn solve_qp(&mut self, matrices_changed: bool) -> QpSolution {
        let attempts = if matrices_changed && self.opt.globalization == Globalization::FilterLineSearch
        {
            1 + self.opt.max_conv_qp
        } else {
            1
        };

        let mut sel = HessianSelector::Primary;
        let mut l = 0;
        let solution = loop {
            if matrices_changed {
                let retry = if l == 1 && self.vars.hessian.has_fallback() {
                    debug!("QP with SR1 Hessian failed, trying the BFGS fallback");
                    sel = HessianSelector::Fallback;
                    self.stats.rejected_sr1 += 1;
                    if self.opt.hess_lim_mem {
                        self.compute_fallback();
                    }
                    false
                } else {
                    l > 0
                };
                if l > 0 {
                    self.stats.qp_resolve += 1;
                }
                let blocks = self.vars.hessian.convexified(sel, retry, &self.opt);
                self.vars.qp_hessian = self.qp_hessian(&blocks);
            }

            let v = &self.vars;
            let qp = QpData {
                hessian: &v.qp_hessian,
                gradient: &v.grad_obj,
                constraints: &v.jacobian,
                lower: &v.delta_bl,
                upper: &v.delta_bu,
                max_iter: self.opt.max_it_qp,
                max_time: self.opt.max_time_qp,
            };
            let solution = self.qp_solver.solve(&qp, self.last_qp.as_ref());
            if self.opt.debug_level > 0 {
                if let Some(monitor) = self.monitor {
                    monitor.qp(self.stats.it_count, &qp, &solution);
                }
            }

            self.stats.qp_it_total += solution.iterations;
            l += 1;
            if matches!(solution.status, QpStatus::Optimal | QpStatus::Infeasible) || l == attempts
            {
                self.stats.qp_iterations += solution.iterations;
                break solution;
            }
            debug!("QP attempt {} ended with {:?}", l, solution.status);
            self.stats.qp_iterations2 += solution.iterations;
        };

        if matches!(solution.status, QpStatus::Optimal | QpStatus::IterationLimit) {
            self.vars.a_delta_xi = self.vars.jacobian.mul_vec(&solution.step);
        }
        self.last_qp = Some(solution.clone());
        solution
    }

    /// Rebuilds the limited-memory BFGS fallback from the stored pairs.
    fn compute_fallback(&mut self) {
        let n_updated = self.n_updated_blocks();
        let v = &mut self.vars;
        let stats = v.hessian.stats.clone();
        v.hessian.update_limited(
            HessianSelector::Fallback,
            &mut v.history,
            HessUpdate::Bfgs,
            self.opt.fallback_scaling,
            true,
            v.alpha,
            n_updated,
            &self.opt,
        );
        v.hessian.stats = stats;
    }

    /// Number of blocks approximated by updates; an exact last block is not.
    fn n_updated_blocks(&self) -> usize {
        let n_blocks = self.vars.hessian.n_blocks();
        match self.opt.second_derivatives {
            SecondDerivatives::LastBlock => n_blocks - 1,
            _ => n_blocks,
        }
    }

    fn update_hessian(&mut self) -> Result<()> {
        let n_updated = self.n_updated_blocks();
        match self.opt.hess_update {
            HessUpdate::Constant | HessUpdate::GaussNewton => return Ok(()),
            HessUpdate::FiniteDiff => return self.finite_diff_hessian(),
            HessUpdate::Sr1 | HessUpdate::Bfgs if !self.opt.hess_lim_mem => {
                let v = &mut self.vars;
                v.hessian
                    .update_full(&mut v.history, v.alpha, n_updated, &self.opt);
            }
            update => {
                let v = &mut self.vars;
                v.hessian.update_limited(
                    HessianSelector::Primary,
                    &mut v.history,
                    update,
                    self.opt.hess_scaling,
                    self.opt.hess_damp,
                    v.alpha,
                    n_updated,
                    &self.opt,
                );
            }
        }

        let hess = &self.vars.hessian.stats;
        self.stats.hess_skipped = hess.skipped;
        self.stats.hess_damped = hess.damped;
        self.stats.average_sizing_factor = hess.sizing_factor;
        self.stats.n_total_updates = hess.total_updates;
        self.stats.n_total_skipped_updates = hess.total_skipped;
        Ok(())
    }

    /// Hessian blocks from finite differences of the Lagrangian gradient.
    /// Variable `j` of every block is perturbed at once.
    fn finite_diff_hessian(&mut self) -> Result<()> {
        let n_var = self.problem.n_var();
        let lower = self.problem.lower_bounds();
        let upper = self.problem.upper_bounds();
        let idx = self.vars.hessian.block_idx().to_vec();
        let n_blocks = idx.len() - 1;
        let max_block = idx.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0);

        let v = &self.vars;
        let base = lagrange_gradient(&v.lambda, &v.grad_obj, &v.jacobian);
        let mut columns: Vec<Matrix> = idx
            .windows(2)
            .map(|w| Matrix::zeros(w[1] - w[0], w[1] - w[0]))
            .collect();

        for j in 0..max_block {
            let mut pert = vec![0.0; n_var];
            for b in 0..n_blocks {
                let k = idx[b] + j;
                if k >= idx[b + 1] {
                    continue;
                }
                let x = v.xi[k];
                let mut p = (FD_DELTA * x.abs()).max(FD_MIN_DELTA);
                if x + p > upper[k] {
                    p = if x - p >= lower[k] {
                        -p
                    } else if upper[k] - x > x - lower[k] {
                        upper[k] - x
                    } else {
                        lower[k] - x
                    };
                    if p == 0.0 {
                        p = FD_MIN_DELTA;
                    }
                }
                pert[k] = p;
            }

            let xp: Vec<f64> = v.xi.iter().zip(&pert).map(|(x, p)| x + p).collect();
            let eval = self
                .problem
                .evaluate(&xp, &v.lambda, Order::First, self.jacobian_kind)?;
            self.stats.n_der_calls += 1;
            let grad = lagrange_gradient(&v.lambda, &eval.gradient, &eval.jacobian);

            for b in 0..n_blocks {
                let k = idx[b] + j;
                if k >= idx[b + 1] {
                    continue;
                }
                for i in 0..idx[b + 1] - idx[b] {
                    columns[b][(i, j)] = (grad[idx[b] + i] - base[idx[b] + i]) / pert[k];
                }
            }
        }

        let n_updated = self.n_updated_blocks();
        for (b, c) in columns.iter().enumerate().take(n_updated) {
            let n = c.rows();
            let mut h = SymMatrix::zeros(n);
            for j in 0..n {
                for i in j..n {
                    h[(i, j)] = 0.5 * (c[(i, j)] + c[(j, i)]);
                }
            }
            self.vars.hessian.set_block(b, h);
        }
        Ok(())
    }

    /// Resets the approximated blocks to the initial diagonal and forgets
    /// the stored steps.
    pub(crate) fn reset_hessian(&mut self) {
        let v = &mut self.vars;
        if self.opt.second_derivatives == SecondDerivatives::LastBlock {
            for b in 0..v.hessian.n_blocks() - 1 {
                v.hessian.reset_block(b, &mut v.history);
            }
        } else {
            v.hessian.reset(&mut v.history);
        }
    }

    fn restoration_allowed(&self) -> bool {
        if self.stats.n_rest_phase_calls >= self.opt.max_restoration_calls {
            warn!(
                "restoration phase called {} times, stopping",
                self.stats.n_rest_phase_calls
            );
            return false;
        }
        true
    }
}

/// Solves `problem` from the starting point it provides.
///
/// Returns the solution vector `x`, the final objective function value `f`,
/// an exit flag indicating if the solver converged, the number of iterations
/// performed and the multipliers of the bounds and constraints.
pub fn sqp(
    problem: &dyn Problem,
    qp_solver: &dyn QpSolver,
    opt: Options,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<(Vec<f64>, f64, bool, usize, Lambda)> {
    let max_it = opt.max_it;
    let mut method = SqpMethod::new(problem, qp_solver, opt, progress)?;
    method.init()?;
    let status = method.run(max_it, false);
    method.finish();
    let status = status?;

    Ok((
        method.vars.xi.clone(),
        method.vars.obj,
        status == Status::Converged,
        method.stats.it_count,
        method.lambda(),
    ))
}
