use std::time::Instant;

use log::{debug, trace};
use spsolve::Solver;

use crate::linsol;
use crate::math::{dot, max, norm, norm_inf};
use crate::matrix::Matrix;
use crate::qpbuild::ActiveSet;

/// Options of the interior point QP solver.
#[derive(Clone, Debug)]
pub struct IpmOptions {
    /// Termination tolerance for feasibility condition.
    pub feas_tol: f64,
    /// Termination tolerance for gradient condition.
    pub grad_tol: f64,
    /// Termination tolerance for complementarity condition.
    pub comp_tol: f64,
    /// Termination tolerance for cost condition.
    pub cost_tol: f64,

    /// Constant used in alpha updates.
    pub xi: f64,
    /// Centering parameter.
    pub sigma: f64,
    /// Used to initialize slack variables.
    pub z0: f64,
    /// Exits if either alpha parameter becomes smaller than this value.
    pub alpha_min: f64,
    /// KT multipliers smaller than this value for non-binding constraints are forced to zero.
    pub mu_threshold: f64,
    /// Exits if the 2-norm of the reduced Newton step exceeds this value.
    pub max_step_size: f64,
    /// A failed solve with a feasibility condition above this value is
    /// reported as infeasible.
    pub infeas_tol: f64,
}

impl Default for IpmOptions {
    fn default() -> Self {
        Self {
            feas_tol: 1e-9,
            grad_tol: 1e-9,
            comp_tol: 1e-9,
            cost_tol: 1e-9,

            xi: 0.99995,
            sigma: 0.1,
            z0: 1.0,
            alpha_min: 1e-8,
            mu_threshold: 1e-5,
            max_step_size: 1e10,
            infeas_tol: 1e-4,
        }
    }
}

/// Dense convex QP `min 1/2 x'*H*x + c'*x` subject to `l <= [x; A*x] <= u`.
pub(crate) struct DenseQp<'a> {
    pub h: &'a Matrix,
    pub c: &'a [f64],
    pub a: &'a Matrix,
    pub l: &'a [f64],
    pub u: &'a [f64],
}

pub(crate) struct IpmResult {
    pub x: Vec<f64>,
    pub f: f64,
    pub converged: bool,
    /// Stopped on a numerical failure rather than an iteration or time limit.
    pub failed: bool,
    pub iterations: usize,
    pub feascond: f64,
    /// Multipliers with `H*x + c = [I; A]' * y`.
    pub y: Vec<f64>,
    pub active: Vec<ActiveSet>,
}

/// Rows of `[I; A]`.
struct Rows<'a> {
    a: &'a Matrix,
    nx: usize,
}

impl Rows<'_> {
    /// `[x; A*x]`
    fn mul(&self, x: &[f64]) -> Vec<f64> {
        [x.to_vec(), self.a.mul_vec(x)].concat()
    }

    /// `[I; A]' * v`
    fn mul_t(&self, v: &[f64]) -> Vec<f64> {
        let atv = self.a.mul_vec_t(&v[self.nx..]);
        v[..self.nx].iter().zip(atv).map(|(a, b)| a + b).collect()
    }

    fn entry(&self, r: usize, j: usize) -> f64 {
        if r < self.nx {
            if r == j {
                1.0
            } else {
                0.0
            }
        } else {
            self.a[(r - self.nx, j)]
        }
    }
}

/// Primal-dual interior point method for convex QPs.
///
/// Rows of `[I; A]` with equal bounds become equality constraints, the
/// others one or two inequality constraints. A bound beyond `1e10` is
/// treated as absent.
pub(crate) fn ipm<S: Solver<usize, f64>>(
    qp: &DenseQp,
    x0: &[f64],
    solver: &S,
    opt: &IpmOptions,
    max_it: usize,
    deadline: Option<Instant>,
) -> IpmResult {
    let nx = qp.c.len();
    let nrows = qp.l.len();
    let rows = Rows { a: qp.a, nx };

    // Split rows into equalities and one-sided inequalities.
    let mut ieq = Vec::<usize>::new();
    let mut be = Vec::<f64>::new();
    let mut iq = Vec::<(usize, f64)>::new();
    let mut bi = Vec::<f64>::new();
    for r in 0..nrows {
        let (lr, ur) = (qp.l[r], qp.u[r]);
        if ur.abs() < 1e10 && (ur - lr).abs() <= f64::EPSILON * ur.abs().max(1.0) {
            ieq.push(r);
            be.push(ur);
            continue;
        }
        if ur < 1e10 {
            iq.push((r, 1.0));
            bi.push(ur);
        }
        if lr > -1e10 {
            iq.push((r, -1.0));
            bi.push(-lr);
        }
    }
    let neq = ieq.len();
    let niq = iq.len();

    let evaluate = |x: &[f64]| {
        let hx = qp.h.mul_vec(x);
        let f = 0.5 * dot(x, &hx) + dot(qp.c, x);
        let df: Vec<f64> = hx.iter().zip(qp.c).map(|(a, b)| a + b).collect();
        let ax = rows.mul(x);
        let g: Vec<f64> = ieq.iter().zip(&be).map(|(&r, b)| ax[r] - b).collect();
        let h: Vec<f64> = iq.iter().zip(&bi).map(|(&(r, s), b)| s * ax[r] - b).collect();
        (f, df, g, h)
    };
    let lagrangian_gradient = |df: &[f64], lam: &[f64], mu: &[f64]| {
        let mut coef = vec![0.0; nrows];
        for (&r, &l) in ieq.iter().zip(lam) {
            coef[r] += l;
        }
        for (&(r, s), &m) in iq.iter().zip(mu) {
            coef[r] += s * m;
        }
        let lx: Vec<f64> = df.iter().zip(rows.mul_t(&coef)).map(|(a, b)| a + b).collect();
        lx
    };

    // Evaluate cost f(x0) and constraints g(x0), h(x0)
    let mut x = x0.to_vec();
    let (mut f, mut df, mut g, mut h) = evaluate(&x);

    // Initialize gamma, lam, mu, z.
    let mut gamma = 1.0;
    let mut lam = vec![0.0; neq];
    let mut z: Vec<f64> = h
        .iter()
        .map(|&hk| if hk < -opt.z0 { -hk } else { opt.z0 })
        .collect();
    let mut mu: Vec<f64> = z
        .iter()
        .map(|&zk| if gamma / zk > opt.z0 { gamma / zk } else { opt.z0 })
        .collect();

    // check tolerance
    let mut f0 = f;
    let mut l_x = lagrangian_gradient(&df, &lam, &mu);

    let conditions = |x: &[f64],
                      z: &[f64],
                      g: &[f64],
                      h: &[f64],
                      lam: &[f64],
                      mu: &[f64],
                      l_x: &[f64],
                      f: f64,
                      f0: f64| {
        let feascond = norm_inf(g).max(max(h)) / (1.0 + norm_inf(x).max(norm_inf(z)));
        let gradcond = norm_inf(l_x) / (1.0 + norm_inf(lam).max(norm_inf(mu)));
        let compcond = dot(z, mu) / (1.0 + norm_inf(x));
        let costcond = (f - f0).abs() / (1.0 + f0.abs());
        (feascond, gradcond, compcond, costcond)
    };

    let (mut feascond, gradcond, compcond, costcond) =
        conditions(&x, &z, &g, &h, &lam, &mu, &l_x, f, f0);
    let mut converged = feascond < opt.feas_tol
        && gradcond < opt.grad_tol
        && compcond < opt.comp_tol
        && costcond < opt.cost_tol;
    let mut failed = false;
    let mut iterations = 0;

    // Newton iterations.
    while !converged && iterations < max_it {
        if deadline.map_or(false, |d| Instant::now() > d) {
            debug!("QP time limit reached after {} iterations", iterations);
            break;
        }
        iterations += 1;

        // Row weights mu/z and right-hand side terms (mu*h + gamma)/z.
        let mut w = vec![0.0; nrows];
        let mut v = vec![0.0; nrows];
        for (k, &(r, s)) in iq.iter().enumerate() {
            w[r] += mu[k] / z[k];
            v[r] += s * (mu[k] * h[k] + gamma) / z[k];
        }

        // M = H + [I; A]' * diag(w) * [I; A]
        let mut m_mat = qp.h.clone();
        for i in 0..nx {
            m_mat[(i, i)] += w[i];
        }
        for (ra, &wr) in w[nx..].iter().enumerate() {
            if wr == 0.0 {
                continue;
            }
            for j in 0..nx {
                let arj = qp.a[(ra, j)];
                if arj == 0.0 {
                    continue;
                }
                for i in 0..nx {
                    m_mat[(i, j)] += wr * qp.a[(ra, i)] * arj;
                }
            }
        }
        // N = Lx + [I; A]' * v
        let n: Vec<f64> = l_x.iter().zip(rows.mul_t(&v)).map(|(a, b)| a + b).collect();

        let mut kkt = Matrix::zeros(nx + neq, nx + neq);
        for j in 0..nx {
            for i in 0..nx {
                kkt[(i, j)] = m_mat[(i, j)];
            }
        }
        for (k, &r) in ieq.iter().enumerate() {
            for j in 0..nx {
                let e = rows.entry(r, j);
                kkt[(j, nx + k)] = e;
                kkt[(nx + k, j)] = e;
            }
        }
        let mut dxdlam: Vec<f64> = n.iter().chain(&g).map(|v| -v).collect();
        if let Err(err) = linsol::solve(solver, &kkt, &mut dxdlam) {
            debug!("{}", err);
            failed = true;
            break;
        }
        if dxdlam.iter().any(|v| v.is_nan()) || norm(&dxdlam) > opt.max_step_size {
            failed = true;
            break;
        }
        let dx = &dxdlam[..nx];
        let dlam = &dxdlam[nx..];
        let adx = rows.mul(dx);
        let dz: Vec<f64> = iq
            .iter()
            .enumerate()
            .map(|(k, &(r, s))| -h[k] - z[k] - s * adx[r])
            .collect();
        let dmu: Vec<f64> = (0..niq)
            .map(|k| -mu[k] + (gamma - mu[k] * dz[k]) / z[k])
            .collect();

        // do the update
        let alphap = (0..niq)
            .filter(|&k| dz[k] < 0.0)
            .map(|k| opt.xi * z[k] / -dz[k])
            .fold(1.0, f64::min);
        let alphad = (0..niq)
            .filter(|&k| dmu[k] < 0.0)
            .map(|k| opt.xi * mu[k] / -dmu[k])
            .fold(1.0, f64::min);

        x.iter_mut().zip(dx).for_each(|(xi, d)| *xi += alphap * d);
        z.iter_mut().zip(&dz).for_each(|(zi, d)| *zi += alphap * d);
        lam.iter_mut().zip(dlam).for_each(|(li, d)| *li += alphad * d);
        mu.iter_mut().zip(&dmu).for_each(|(mi, d)| *mi += alphad * d);
        if niq > 0 {
            gamma = opt.sigma * dot(&z, &mu) / (niq as f64);
        }

        // evaluate cost, constraints, derivatives
        (f, df, g, h) = evaluate(&x);
        l_x = lagrangian_gradient(&df, &lam, &mu);

        let (fc, gradcond, compcond, costcond) =
            conditions(&x, &z, &g, &h, &lam, &mu, &l_x, f, f0);
        feascond = fc;
        trace!(
            "{:4} feas {:.2e} grad {:.2e} comp {:.2e} cost {:.2e} gamma {:.2e} alpha {:.2e}/{:.2e}",
            iterations,
            feascond,
            gradcond,
            compcond,
            costcond,
            gamma,
            alphap,
            alphad
        );

        if feascond < opt.feas_tol
            && gradcond < opt.grad_tol
            && compcond < opt.comp_tol
            && costcond < opt.cost_tol
        {
            converged = true;
        } else {
            if x.iter().any(|v| v.is_nan())
                || alphap < opt.alpha_min
                || alphad < opt.alpha_min
                || gamma < f64::EPSILON
                || gamma > 1.0 / f64::EPSILON
            {
                failed = true;
                break;
            }
            f0 = f;
        }
    }

    // zero out multipliers on non-binding constraints
    for (k, mk) in mu.iter_mut().enumerate() {
        if h[k] < -opt.feas_tol && *mk < opt.mu_threshold {
            *mk = 0.0;
        }
    }

    // H*x + c = [I; A]' * y
    let mut y = vec![0.0; nrows];
    let mut active = vec![ActiveSet::Inactive; nrows];
    for (&r, &l) in ieq.iter().zip(&lam) {
        y[r] -= l;
        active[r] = ActiveSet::Equality;
    }
    for (&(r, s), &m) in iq.iter().zip(&mu) {
        y[r] -= s * m;
        if m > opt.mu_threshold {
            active[r] = if s > 0.0 {
                ActiveSet::Upper
            } else {
                ActiveSet::Lower
            };
        }
    }

    IpmResult {
        x,
        f,
        converged,
        failed,
        iterations,
        feascond,
        y,
        active,
    }
}
