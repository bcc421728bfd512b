use log::debug;

use crate::math::{dot, norm_inf};
use crate::qpbuild::QpStatus;
use crate::sqp::{lagrange_gradient, SqpMethod, Trial};

/// Backtracking attempts of the unglobalized step.
const MAX_FULL_STEP_TRIES: usize = 10;

impl SqpMethod<'_> {
    fn set_trial_point(&mut self, alpha: f64, step: &[f64]) {
        let v = &mut self.vars;
        for ((t, x), d) in v.trial_xi.iter_mut().zip(&v.xi).zip(step) {
            *t = x + alpha * d;
        }
    }

    /// Moves to `trial_xi`, the result of `alpha` times the QP step, and
    /// takes the same fraction of the multiplier step.
    pub(crate) fn accept_step(&mut self, alpha: f64, n_socs: usize) {
        let v = &mut self.vars;
        v.alpha = alpha;
        v.n_socs = n_socs;

        for (d, (t, x)) in v
            .history
            .delta_mut()
            .iter_mut()
            .zip(v.trial_xi.iter().zip(&v.xi))
        {
            *d = t - x;
        }
        v.xi.copy_from_slice(&v.trial_xi);

        v.lambda_step_norm = v
            .lambda_qp
            .iter()
            .zip(&v.lambda)
            .map(|(q, l)| (alpha * (q - l)).abs())
            .fold(0.0, f64::max);
        for (l, q) in v.lambda.iter_mut().zip(&v.lambda_qp) {
            *l = (1.0 - alpha) * *l + alpha * q;
        }

        if alpha < 1.0 {
            v.reduced_step_count += 1;
        } else {
            v.reduced_step_count = 0;
        }
    }

    /// Takes the QP step, halving it while the problem cannot be evaluated.
    pub(crate) fn full_step(&mut self) -> bool {
        let step = self.vars.history.delta().to_vec();
        let mut alpha = 1.0;
        for _ in 0..MAX_FULL_STEP_TRIES {
            self.set_trial_point(alpha, &step);
            let trial_xi = self.vars.trial_xi.clone();
            if self.evaluate_values(&trial_xi).is_some() {
                self.accept_step(alpha, 0);
                return true;
            }
            debug!("evaluation failed, reducing step to {}", alpha * 0.5);
            alpha *= 0.5;
        }
        false
    }

    /// Filter line search. Backtracks along the QP step until the trial point
    /// is acceptable to the filter and improves either the constraint
    /// violation or the objective, trying second-order corrections on the
    /// first rejected trial point. Returns `false` if no step was found.
    pub(crate) fn filter_line_search(&mut self) -> bool {
        let step = self.vars.history.delta().to_vec();
        let c_norm = self.vars.c_norm;
        let obj = self.vars.obj;
        let df_delta = dot(&self.vars.grad_obj, &step);
        let (gamma_theta, gamma_f) = (self.opt.gamma_theta, self.opt.gamma_f);

        let mut alpha = 1.0;
        // Some(armijo): step accepted, by the Armijo condition if `armijo`
        let mut accepted = None;
        for k in 0..self.opt.max_line_search {
            self.set_trial_point(alpha, &step);
            let trial_xi = self.vars.trial_xi.clone();
            let Some(trial) = self.evaluate_values(&trial_xi) else {
                alpha *= 0.5;
                continue;
            };

            if self.vars.filter.is_dominated(trial.c_norm, trial.obj) {
                match self.second_order_correction(c_norm, &trial, df_delta, false, k) {
                    Some(armijo) => {
                        accepted = Some(armijo);
                        break;
                    }
                    None => {
                        alpha *= 0.5;
                        continue;
                    }
                }
            }

            // Almost feasible and switching condition: require sufficient
            // decrease of the objective.
            if c_norm <= self.opt.theta_min && self.switching_condition(alpha, df_delta, c_norm) {
                if trial.obj > obj + self.opt.eta * alpha * df_delta {
                    match self.second_order_correction(c_norm, &trial, df_delta, true, k) {
                        Some(armijo) => {
                            accepted = Some(armijo);
                            break;
                        }
                        None => {
                            alpha *= 0.5;
                            continue;
                        }
                    }
                }
                self.accept_step(alpha, 0);
                accepted = Some(true);
                break;
            }

            if trial.c_norm < (1.0 - gamma_theta) * c_norm || trial.obj < obj - gamma_f * c_norm {
                self.accept_step(alpha, 0);
                accepted = Some(false);
                break;
            }
            match self.second_order_correction(c_norm, &trial, df_delta, false, k) {
                Some(armijo) => {
                    accepted = Some(armijo);
                    break;
                }
                None => alpha *= 0.5,
            }
        }

        match accepted {
            Some(armijo) => {
                if !armijo {
                    self.vars.filter.augment(c_norm, obj);
                }
                true
            }
            None => {
                debug!("line search failed after {} trials", self.opt.max_line_search);
                false
            }
        }
    }

    fn switching_condition(&self, alpha: f64, df_delta: f64, c_norm: f64) -> bool {
        df_delta < 0.0
            && alpha * (-df_delta).powf(self.opt.s_f)
                > self.opt.delta * c_norm.powf(self.opt.s_theta)
    }

    /// Second-order correction of the full step `k == 0`, attempted only if
    /// the constraint violation did not decrease. Returns `Some(armijo)` if
    /// a corrected step was accepted.
    fn second_order_correction(
        &mut self,
        c_norm: f64,
        trial: &Trial,
        df_delta: f64,
        switching: bool,
        k: usize,
    ) -> Option<bool> {
        if k > 0 || trial.c_norm < c_norm {
            return None;
        }
        let obj = self.vars.obj;
        let mut c_norm_old = c_norm;
        // constraint values at the last rejected point
        let mut soc_constr = trial.constr.clone();

        for n_socs in 1..=self.opt.max_soc_iter {
            self.update_step_bounds(Some(&soc_constr));
            let solution = self.solve_qp(false);
            if solution.status != QpStatus::Optimal {
                return None;
            }

            let soc_xi: Vec<f64> = self
                .vars
                .xi
                .iter()
                .zip(&solution.step)
                .map(|(x, d)| x + d)
                .collect();
            let soc = self.evaluate_values(&soc_xi)?;
            if self.vars.filter.is_dominated(soc.c_norm, soc.obj) {
                return None;
            }

            let armijo = if c_norm <= self.opt.theta_min && switching {
                soc.obj <= obj + self.opt.eta * df_delta
            } else {
                soc.c_norm < (1.0 - self.opt.gamma_theta) * c_norm
                    || soc.obj < obj - self.opt.gamma_f * c_norm
            };
            if armijo {
                debug!("second-order correction {} accepted", n_socs);
                self.vars.trial_xi = soc_xi;
                self.vars.lambda_qp = solution.lambda;
                self.accept_step(1.0, n_socs);
                return Some(c_norm <= self.opt.theta_min && switching);
            }

            if soc.c_norm > self.opt.kappa_soc * c_norm_old {
                return None;
            }
            c_norm_old = soc.c_norm;
            soc_constr = soc.constr;
        }
        None
    }

    /// Accepts the full step if it reduces the KKT error by the factor
    /// `kappa_f`, measured with the old derivatives and the QP multipliers.
    pub(crate) fn kkt_error_reduction(&mut self) -> bool {
        let step = self.vars.history.delta().to_vec();
        self.set_trial_point(1.0, &step);
        let trial_xi = self.vars.trial_xi.clone();
        let Some(trial) = self.evaluate_values(&trial_xi) else {
            return false;
        };

        let v = &self.vars;
        let grad = lagrange_gradient(&v.lambda_qp, &v.grad_obj, &v.jacobian);
        let trial_tol = norm_inf(&grad) / (1.0 + norm_inf(&v.lambda_qp));

        if trial.c_norm.max(trial_tol) < self.opt.kappa_f * v.c_norm.max(v.tol) {
            debug!("full step reduces the KKT error");
            self.accept_step(1.0, 0);
            true
        } else {
            false
        }
    }
}
