use std::cell::{Cell, RefCell};
use std::io::Write;

use log::{error, info};

use crate::common::StepType;
use crate::matrix::Matrix;
use crate::qpbuild::{QpData, QpSolution};
use crate::traits::{Jacobian, ProgressMonitor};

/// Counters accumulated over an SQP run.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub it_count: usize,
    /// QP iterations over the whole run.
    pub qp_it_total: usize,
    /// QP iterations of the accepted QPs in the current iteration.
    pub qp_iterations: usize,
    /// QP iterations of QPs discarded in the current iteration.
    pub qp_iterations2: usize,
    /// QPs re-solved with a corrected Hessian in the current iteration.
    pub qp_resolve: usize,
    /// SR1 Hessians rejected in favour of the fallback.
    pub rejected_sr1: usize,
    pub hess_skipped: usize,
    pub hess_damped: usize,
    pub average_sizing_factor: f64,
    pub n_fun_calls: usize,
    pub n_der_calls: usize,
    pub n_rest_heur_calls: usize,
    pub n_rest_phase_calls: usize,
    pub n_total_updates: usize,
    pub n_total_skipped_updates: usize,
}

/// Snapshot of one SQP iteration.
#[derive(Clone, Debug)]
pub struct ProgressRecord {
    pub iteration: usize,
    pub qp_iterations: usize,
    pub qp_iterations2: usize,
    pub obj: f64,
    /// Scaled constraint violation.
    pub c_norm_s: f64,
    /// Scaled KKT error.
    pub tol: f64,
    pub grad_norm: f64,
    pub step_norm: f64,
    pub lambda_step_norm: f64,
    pub alpha: f64,
    pub n_socs: usize,
    pub hess_skipped: usize,
    pub hess_damped: usize,
    pub sizing_factor: f64,
    pub qp_resolve: usize,
    /// Mean inertia correction over the Hessian blocks.
    pub delta_h: f64,
    pub steptype: StepType,
    pub reduced: bool,
}

const HEADLINE_INTERVAL: usize = 20;

/// Prints the iteration table through `log::info!`.
#[derive(Default)]
pub struct LogMonitor {
    pub color: bool,
}

impl LogMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color() -> Self {
        Self { color: true }
    }

    fn headline() {
        info!(
            "{:>5} {:>6} {:>6} {:>23} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>4} {:>3} {:>3} {:>9} {:>3}",
            "it", "qpIt", "qpIt2", "obj", "feas", "opt", "|lgrd|", "|stp|", "|lstp|", "alpha",
            "SOC", "sk", "da", "sca", "QPr"
        );
    }
}

impl ProgressMonitor for LogMonitor {
    fn update(&self, r: &ProgressRecord) {
        if r.iteration % HEADLINE_INTERVAL == 0 {
            Self::headline();
        }
        if r.iteration == 0 {
            info!(
                "{:>5} {:>6} {:>6} {:>23.16e} {:>9.2e} {:>9.2e}",
                r.iteration, "", "", r.obj, r.c_norm_s, r.tol
            );
            return;
        }
        let alpha = format!("{:>9.2e}", r.alpha);
        let alpha = if self.color && (r.reduced || r.n_socs > 0) {
            format!("\x1b[36m{}\x1b[0m", alpha)
        } else {
            alpha
        };
        info!(
            "{:>5} {:>6} {:>6} {:>23.16e} {:>9.2e} {:>9.2e} {:>9.2e} {:>9.2e} {:>9.2e} {} {:>4} {:>3} {:>3} {:>9.2e} {:>3}",
            r.iteration,
            r.qp_iterations,
            r.qp_iterations2,
            r.obj,
            r.c_norm_s,
            r.tol,
            r.grad_norm,
            r.step_norm,
            r.lambda_step_norm,
            alpha,
            r.n_socs,
            r.hess_skipped,
            r.hess_damped,
            r.sizing_factor,
            r.qp_resolve
        );
    }
}

/// Writes progress as CSV and, optionally, every solved QP as plain text.
/// The writers are owned and closed when the monitor is dropped.
pub struct CsvMonitor<W: Write> {
    progress: RefCell<W>,
    qp_dump: Option<RefCell<W>>,
    header: Cell<bool>,
}

impl<W: Write> CsvMonitor<W> {
    pub fn new(progress: W) -> Self {
        Self {
            progress: RefCell::new(progress),
            qp_dump: None,
            header: Cell::new(false),
        }
    }

    pub fn with_qp_dump(mut self, qp_dump: W) -> Self {
        self.qp_dump = Some(RefCell::new(qp_dump));
        self
    }

    /// Returns the progress writer, dropping the QP dump writer.
    pub fn into_inner(self) -> W {
        self.progress.into_inner()
    }

    fn write_progress(&self, r: &ProgressRecord) -> std::io::Result<()> {
        let mut w = self.progress.borrow_mut();
        if !self.header.replace(true) {
            writeln!(
                w,
                "it,qpIt,qpIt2,obj,feas,opt,gradNorm,stepNorm,lambdaStepNorm,alpha,nSOCs,skipped,damped,sizing,qpResolve,deltaH,steptype"
            )?;
        }
        writeln!(
            w,
            "{},{},{},{:.16e},{:.16e},{:.16e},{:.16e},{:.16e},{:.16e},{:.16e},{},{},{},{:.16e},{},{:.16e},{:?}",
            r.iteration,
            r.qp_iterations,
            r.qp_iterations2,
            r.obj,
            r.c_norm_s,
            r.tol,
            r.grad_norm,
            r.step_norm,
            r.lambda_step_norm,
            r.alpha,
            r.n_socs,
            r.hess_skipped,
            r.hess_damped,
            r.sizing_factor,
            r.qp_resolve,
            r.delta_h,
            r.steptype
        )
    }

    fn write_qp(
        w: &mut W,
        iteration: usize,
        qp: &QpData,
        solution: &QpSolution,
    ) -> std::io::Result<()> {
        writeln!(
            w,
            "QP of iteration {}: nVar {} nCon {} status {:?} iterations {}",
            iteration,
            qp.n_var(),
            qp.n_con(),
            solution.status,
            solution.iterations
        )?;
        writeln!(w, "hessian")?;
        write_matrix(w, &qp.hessian.to_dense())?;
        writeln!(w, "gradient")?;
        write_row(w, qp.gradient)?;
        writeln!(w, "constraints")?;
        match qp.constraints {
            Jacobian::Dense(a) => write_matrix(w, a)?,
            Jacobian::Sparse(a) => write_matrix(w, &a.to_dense())?,
            Jacobian::Unsupported => writeln!(w, "unavailable")?,
        }
        writeln!(w, "lower")?;
        write_row(w, qp.lower)?;
        writeln!(w, "upper")?;
        write_row(w, qp.upper)?;
        writeln!(w, "active")?;
        let active: Vec<String> = solution.active.iter().map(|a| format!("{:?}", a)).collect();
        writeln!(w, "{}", active.join(" "))?;
        writeln!(w)
    }
}

fn write_row<W: Write>(w: &mut W, v: &[f64]) -> std::io::Result<()> {
    let line: Vec<String> = v.iter().map(|x| format!("{:.16e}", x)).collect();
    writeln!(w, "{}", line.join(" "))
}

fn write_matrix<W: Write>(w: &mut W, a: &Matrix) -> std::io::Result<()> {
    for i in 0..a.rows() {
        let row: Vec<f64> = (0..a.cols()).map(|j| a[(i, j)]).collect();
        write_row(w, &row)?;
    }
    Ok(())
}

impl<W: Write> ProgressMonitor for CsvMonitor<W> {
    fn update(&self, record: &ProgressRecord) {
        if let Err(err) = self.write_progress(record) {
            error!("writing progress: {}", err);
        }
    }

    fn qp(&self, iteration: usize, qp: &QpData, solution: &QpSolution) {
        if let Some(dump) = &self.qp_dump {
            if let Err(err) = Self::write_qp(&mut dump.borrow_mut(), iteration, qp, solution) {
                error!("writing QP dump: {}", err);
            }
        }
    }

    fn finish(&self) {
        if let Err(err) = self.progress.borrow_mut().flush() {
            error!("flushing progress: {}", err);
        }
        if let Some(dump) = &self.qp_dump {
            if let Err(err) = dump.borrow_mut().flush() {
                error!("flushing QP dump: {}", err);
            }
        }
    }
}
