use log::{debug, warn};

use crate::common::{HessScaling, HessUpdate, Options};
use crate::iterate::StepHistory;
use crate::math::{dot, norm};
use crate::matrix::SymMatrix;

/// Which of the two tracked approximations is meant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HessianSelector {
    Primary,
    /// BFGS approximation kept alongside SR1.
    Fallback,
}

/// Update counters reported per iteration.
#[derive(Clone, Debug, Default)]
pub struct UpdateStats {
    /// Damped blocks in the last update.
    pub damped: usize,
    /// Skipped blocks in the last update.
    pub skipped: usize,
    /// Sum of the sizing factors of the last update, divided by the number
    /// of blocks when the update completes.
    pub sizing_factor: f64,
    pub total_updates: usize,
    pub total_skipped: usize,
}

/// One set of Hessian blocks and the per-block scalars its updates use.
#[derive(Clone, Debug)]
struct Approximation {
    blocks: Vec<SymMatrix>,
    /// Consecutive skipped updates, `None` before the first update.
    no_update: Vec<Option<usize>>,
    /// `s's` of the current and previous pair.
    delta_norm: Vec<f64>,
    delta_norm_old: Vec<f64>,
    /// `s'y` of the current and previous pair.
    delta_gamma: Vec<f64>,
    delta_gamma_old: Vec<f64>,
}

impl Approximation {
    fn new(block_idx: &[usize], ini: f64) -> Self {
        let n_blocks = block_idx.len() - 1;
        Self {
            blocks: block_idx
                .windows(2)
                .map(|w| SymMatrix::identity(w[1] - w[0], ini))
                .collect(),
            no_update: vec![None; n_blocks],
            delta_norm: vec![1.0; n_blocks],
            delta_norm_old: vec![1.0; n_blocks],
            delta_gamma: vec![0.0; n_blocks],
            delta_gamma_old: vec![0.0; n_blocks],
        }
    }

    fn reset_block(&mut self, b: usize, ini: f64) {
        let n = self.blocks[b].dim();
        self.blocks[b] = SymMatrix::identity(n, ini);
        self.no_update[b] = None;
        self.delta_norm[b] = 1.0;
        self.delta_norm_old[b] = 1.0;
        self.delta_gamma[b] = 0.0;
        self.delta_gamma_old[b] = 0.0;
    }

    fn record_pair(&mut self, b: usize, s: &[f64], y: &[f64]) {
        self.delta_norm_old[b] = self.delta_norm[b];
        self.delta_gamma_old[b] = self.delta_gamma[b];
        self.delta_norm[b] = dot(s, s);
        self.delta_gamma[b] = dot(s, y);
    }

    fn skip(&mut self, b: usize, stats: &mut UpdateStats) {
        self.no_update[b] = Some(self.no_update[b].map_or(1, |c| c + 1));
        stats.skipped += 1;
        stats.total_skipped += 1;
    }

    /// Scales the block before its first update.
    fn size_initial(
        &mut self,
        b: usize,
        s: &[f64],
        y: &[f64],
        scaling: HessScaling,
        opt: &Options,
        stats: &mut UpdateStats,
    ) {
        let my_eps = 1e3 * opt.eps;
        if dot(s, s) <= my_eps {
            return;
        }
        let mut scale = match scaling {
            HessScaling::Nocedal => dot(y, y) / dot(s, y).max(my_eps),
            HessScaling::OrenLuenberger => (dot(s, y) / dot(s, s).max(my_eps)).min(1.0),
            HessScaling::GeometricMean => (dot(y, y) / dot(s, s).max(my_eps)).sqrt(),
            HessScaling::None | HessScaling::Centered => return,
        };
        if scale > 0.0 {
            scale = scale.max(my_eps);
            self.blocks[b].scale(scale);
        } else {
            scale = 1.0;
        }
        stats.sizing_factor += scale;
    }

    /// Centered Oren-Luenberger sizing. Only ever shrinks the block.
    fn size_col(&mut self, b: usize, s: &[f64], opt: &Options, stats: &mut UpdateStats) {
        let my_eps = 1e3 * opt.eps;
        let delta_norm = self.delta_norm[b];
        let delta_norm_old = self.delta_norm_old[b];
        let delta_gamma = self.delta_gamma[b];
        let delta_gamma_old = self.delta_gamma_old[b];
        let delta_b_delta = self.blocks[b].quad_form(s);

        let theta = if self.no_update[b].is_none() {
            1.0
        } else {
            opt.col_tau1.min(opt.col_tau2 * delta_norm)
        };
        let mut scale = 1.0;
        if delta_norm > my_eps && delta_norm_old > my_eps {
            let denom = (1.0 - theta) * delta_gamma_old / delta_norm_old
                + theta * delta_b_delta / delta_norm;
            if denom > opt.eps {
                scale = ((1.0 - theta) * delta_gamma_old / delta_norm_old
                    + theta * delta_gamma / delta_norm)
                    / denom;
            }
        }

        if scale > 0.0 && scale < 1.0 {
            let scale = scale.max(opt.col_eps);
            self.blocks[b].scale(scale);
            stats.sizing_factor += scale;
        } else {
            stats.sizing_factor += 1.0;
        }
    }

    /// Damped BFGS update of block `b`.
    fn bfgs(
        &mut self,
        b: usize,
        s: &[f64],
        y: &[f64],
        alpha: f64,
        damp: bool,
        opt: &Options,
        stats: &mut UpdateStats,
    ) {
        let bs = self.blocks[b].mul_vec(s);
        let h1 = dot(s, &bs);
        let mut h2 = self.delta_gamma[b];
        let mut y2 = y.to_vec();

        // Powell's damping: interpolate between y and B*s so that s'y stays
        // sufficiently positive.
        let mut damped = false;
        if damp && h2 < opt.hess_damp_fac * h1 / alpha && (h1 - h2).abs() > 1e-12 {
            let theta = (1.0 - opt.hess_damp_fac) * h1 / (h1 - h2);
            for (yi, bsi) in y2.iter_mut().zip(&bs) {
                *yi = theta * *yi + (1.0 - theta) * bsi;
            }
            h2 = dot(s, &y2);
            self.delta_gamma[b] = h2;
            damped = true;
        }

        let my_eps = 1e2 * opt.eps;
        if h1.abs() < my_eps || h2.abs() < my_eps {
            self.skip(b, stats);
            return;
        }
        if damped {
            stats.damped += 1;
        }
        let blk = &mut self.blocks[b];
        for j in 0..blk.dim() {
            for i in j..blk.dim() {
                blk[(i, j)] += -bs[i] * bs[j] / h1 + y2[i] * y2[j] / h2;
            }
        }
        self.no_update[b] = Some(0);
    }

    /// Symmetric rank-one update of block `b`.
    fn sr1(&mut self, b: usize, s: &[f64], y: &[f64], opt: &Options, stats: &mut UpdateStats) {
        let bs = self.blocks[b].mul_vec(s);
        let r: Vec<f64> = y.iter().zip(&bs).map(|(yi, bsi)| yi - bsi).collect();
        let h = dot(&r, s);

        let my_eps = 1e2 * opt.eps;
        if h.abs() < SR1_SKIP_TOL * norm(s) * norm(&r) || h.abs() < my_eps {
            self.skip(b, stats);
            return;
        }
        let blk = &mut self.blocks[b];
        for j in 0..blk.dim() {
            for i in j..blk.dim() {
                blk[(i, j)] += r[i] * r[j] / h;
            }
        }
        self.no_update[b] = Some(0);
    }

    fn apply(
        &mut self,
        b: usize,
        s: &[f64],
        y: &[f64],
        alpha: f64,
        update: HessUpdate,
        damp: bool,
        opt: &Options,
        stats: &mut UpdateStats,
    ) {
        match update {
            HessUpdate::Sr1 => self.sr1(b, s, y, opt, stats),
            HessUpdate::Bfgs => self.bfgs(b, s, y, alpha, damp, opt, stats),
            _ => {}
        }
    }
}

/// Relative size of the SR1 denominator below which the update is skipped.
const SR1_SKIP_TOL: f64 = 1e-8;

/// Block-diagonal quasi-Newton approximation of the Hessian of the Lagrangian.
#[derive(Clone, Debug)]
pub struct BlockHessian {
    block_idx: Vec<usize>,
    ini_diag: f64,
    primary: Approximation,
    fallback: Option<Approximation>,
    /// Last inertia correction added to each block.
    pub delta_h: Vec<f64>,
    pub stats: UpdateStats,
}

impl BlockHessian {
    /// Creates `ini_diag * I` blocks for the partition `block_idx`. With
    /// `fallback` a second BFGS approximation is tracked.
    pub fn new(block_idx: Vec<usize>, ini_diag: f64, fallback: bool) -> Self {
        let n_blocks = block_idx.len() - 1;
        Self {
            primary: Approximation::new(&block_idx, ini_diag),
            fallback: fallback.then(|| Approximation::new(&block_idx, ini_diag)),
            block_idx,
            ini_diag,
            delta_h: vec![0.0; n_blocks],
            stats: UpdateStats::default(),
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.block_idx.len() - 1
    }

    pub fn block_idx(&self) -> &[usize] {
        &self.block_idx
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn approx(&self, sel: HessianSelector) -> &Approximation {
        match (sel, &self.fallback) {
            (HessianSelector::Fallback, Some(fb)) => fb,
            _ => &self.primary,
        }
    }

    fn approx_mut(&mut self, sel: HessianSelector) -> &mut Approximation {
        match (sel, &mut self.fallback) {
            (HessianSelector::Fallback, Some(fb)) => fb,
            _ => &mut self.primary,
        }
    }

    pub fn blocks(&self, sel: HessianSelector) -> &[SymMatrix] {
        &self.approx(sel).blocks
    }

    pub fn block(&self, b: usize) -> &SymMatrix {
        &self.primary.blocks[b]
    }

    /// Replaces block `b` of every tracked approximation, e.g. by an exact
    /// Hessian block.
    pub fn set_block(&mut self, b: usize, block: SymMatrix) {
        if let Some(fb) = self.fallback.as_mut() {
            fb.blocks[b] = block.clone();
        }
        self.primary.blocks[b] = block;
    }

    pub fn skipped_updates(&self, b: usize) -> Option<usize> {
        self.primary.no_update[b]
    }

    /// Resets block `b` to the initial diagonal and forgets its history.
    pub fn reset_block(&mut self, b: usize, history: &mut StepHistory) {
        let (start, n) = self.range(b);
        history.clear_block(start, n);
        self.reset_block_matrix(b);
    }

    /// Resets every block and clears the stored steps.
    pub fn reset(&mut self, history: &mut StepHistory) {
        for b in 0..self.n_blocks() {
            self.reset_block_matrix(b);
        }
        history.clear();
    }

    fn reset_block_matrix(&mut self, b: usize) {
        let ini = self.ini_diag;
        self.primary.reset_block(b, ini);
        if let Some(fb) = self.fallback.as_mut() {
            fb.reset_block(b, ini);
        }
    }

    fn range(&self, b: usize) -> (usize, usize) {
        (self.block_idx[b], self.block_idx[b + 1] - self.block_idx[b])
    }

    /// Updates block `b` with the step `s` and gradient difference `y`
    /// restricted to the block's variables. `alpha` is the step length that
    /// produced `s`.
    ///
    /// Applies the configured scaling and update to the primary
    /// approximation and, when tracked, damped BFGS to the fallback. Returns
    /// `true` if the block was reset after too many skipped updates.
    pub fn update(&mut self, b: usize, s: &[f64], y: &[f64], alpha: f64, opt: &Options) -> bool {
        let mut stats = std::mem::take(&mut self.stats);

        let first = self.primary.no_update[b].is_none();
        self.primary.record_pair(b, s, y);
        match opt.hess_scaling {
            HessScaling::Centered => self.primary.size_col(b, s, opt, &mut stats),
            scaling if first => self.primary.size_initial(b, s, y, scaling, opt, &mut stats),
            _ => {}
        }
        self.primary
            .apply(b, s, y, alpha, opt.hess_update, opt.hess_damp, opt, &mut stats);

        if let Some(fb) = self.fallback.as_mut() {
            let first = fb.no_update[b].is_none();
            fb.record_pair(b, s, y);
            match opt.fallback_scaling {
                HessScaling::Centered => fb.size_col(b, s, opt, &mut stats),
                scaling if first => fb.size_initial(b, s, y, scaling, opt, &mut stats),
                _ => {}
            }
            fb.apply(b, s, y, alpha, opt.fallback_update, true, opt, &mut stats);
        }
        stats.total_updates += 1;
        self.stats = stats;

        self.check_skipped(b, opt)
    }

    fn check_skipped(&mut self, b: usize, opt: &Options) -> bool {
        match self.primary.no_update[b] {
            Some(count) if count > opt.max_consec_skipped_updates => {
                warn!(
                    "{} consecutive skipped updates in block {}: reset Hessian",
                    count, b
                );
                self.reset_block_matrix(b);
                true
            }
            _ => false,
        }
    }

    /// Full-memory update of the first `n_updated` blocks with the current
    /// pair of `history`.
    pub fn update_full(
        &mut self,
        history: &mut StepHistory,
        alpha: f64,
        n_updated: usize,
        opt: &Options,
    ) {
        self.stats.damped = 0;
        self.stats.skipped = 0;
        self.stats.sizing_factor = 0.0;

        let mut resets = Vec::new();
        for b in 0..n_updated {
            let (start, n) = self.range(b);
            let s = &history.delta()[start..start + n];
            let y = &history.gamma()[start..start + n];
            if self.update(b, s, y, alpha, opt) {
                resets.push(b);
            }
        }
        for b in resets {
            let (start, n) = self.range(b);
            history.clear_block(start, n);
        }
        if n_updated > 0 {
            self.stats.sizing_factor /= n_updated as f64;
        }
    }

    /// Limited-memory update: every block is rebuilt from the initial
    /// diagonal by replaying the stored pairs, oldest first.
    pub fn update_limited(
        &mut self,
        sel: HessianSelector,
        history: &mut StepHistory,
        update: HessUpdate,
        scaling: HessScaling,
        damp: bool,
        alpha: f64,
        n_updated: usize,
        opt: &Options,
    ) {
        let window = history.window();
        let Some(&newest) = window.last() else {
            return;
        };
        let mut stats = std::mem::take(&mut self.stats);
        stats.damped = 0;
        stats.skipped = 0;
        stats.sizing_factor = 0.0;
        let ini = self.ini_diag;

        let mut resets = Vec::new();
        for b in 0..n_updated {
            let (start, n) = self.range(b);
            let approx = self.approx_mut(sel);
            approx.reset_block(b, ini);

            let (s, y) = history.pair(newest, start, n);
            approx.size_initial(b, s, y, scaling, opt, &mut stats);

            for &col in &window {
                let (s, y) = history.pair(col, start, n);
                let saved = (stats.damped, stats.skipped, stats.sizing_factor);

                approx.record_pair(b, s, y);
                if scaling == HessScaling::Centered {
                    approx.size_col(b, s, opt, &mut stats);
                }
                approx.apply(b, s, y, alpha, update, damp, opt, &mut stats);
                stats.total_updates += 1;

                // statistics of the most recent pair only
                if col != newest {
                    stats.damped = saved.0;
                    stats.skipped = saved.1;
                    if scaling == HessScaling::Centered {
                        stats.sizing_factor = saved.2;
                    }
                }
            }

            if sel == HessianSelector::Primary && self.check_skipped(b, opt) {
                resets.push(b);
            }
        }
        if n_updated > 0 {
            stats.sizing_factor /= n_updated as f64;
        }
        self.stats = stats;

        for b in resets {
            let (start, n) = self.range(b);
            history.clear_block(start, n);
        }
        debug!(
            "limited-memory update with {} pairs: {} damped, {} skipped",
            window.len(),
            self.stats.damped,
            self.stats.skipped
        );
    }

    /// Blocks of the selected approximation with the inertia correction
    /// needed to make each of them positive definite.
    ///
    /// The correction of the previous call seeds the schedule: it starts at
    /// `delta_h0` after an uncorrected block and at `kappa_minus` times the
    /// last correction otherwise, then grows by `kappa_plus_max` (first
    /// correction) or `kappa_plus` until the smallest eigenvalue is positive.
    /// With `retry` every block is corrected further after a failed QP.
    pub fn convexified(&mut self, sel: HessianSelector, retry: bool, opt: &Options) -> Vec<SymMatrix> {
        let mut blocks = self.blocks(sel).to_vec();
        for (b, blk) in blocks.iter_mut().enumerate() {
            let last = self.delta_h[b];
            let growth = if last == 0.0 {
                opt.kappa_plus_max
            } else {
                opt.kappa_plus
            };

            let delta = if retry {
                last.max(opt.delta_h0) * growth
            } else {
                let lambda_min = if opt.gershgorin {
                    blk.gershgorin_min()
                } else {
                    blk.min_eigenvalue()
                };
                if lambda_min >= MIN_CURVATURE {
                    0.0
                } else {
                    let mut delta = if last == 0.0 {
                        opt.delta_h0
                    } else {
                        (opt.kappa_minus * last).max(MIN_CORRECTION)
                    };
                    while lambda_min + delta < MIN_CURVATURE {
                        delta *= growth;
                    }
                    delta
                }
            };

            if delta > 0.0 {
                blk.add_diagonal(delta);
                debug!("inertia correction {:e} for block {}", delta, b);
            }
            self.delta_h[b] = delta;
        }
        blocks
    }
}

/// Smallest eigenvalue accepted without inertia correction.
const MIN_CURVATURE: f64 = 1e-8;
const MIN_CORRECTION: f64 = 1e-20;
