/// Set of (constraint violation, objective) pairs that trial points must not
/// be dominated by. No entry dominates another.
#[derive(Clone, Debug)]
pub struct Filter {
    entries: Vec<(f64, f64)>,
    theta_max: f64,
    gamma_theta: f64,
    gamma_f: f64,
}

impl Filter {
    /// Creates a filter holding `(theta_max, -inf)`, which rejects every
    /// point with a violation near or above `theta_max`.
    pub fn new(theta_max: f64, gamma_theta: f64, gamma_f: f64) -> Self {
        Self {
            entries: vec![(theta_max, f64::NEG_INFINITY)],
            theta_max,
            gamma_theta,
            gamma_f,
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.entries.push((self.theta_max, f64::NEG_INFINITY));
    }

    pub fn entries(&self) -> &[(f64, f64)] {
        &self.entries
    }

    /// Is (`theta`, `f`) in the region forbidden by the filter? A point is
    /// acceptable if it improves on every entry by the margins, either in
    /// violation or in objective.
    pub fn is_dominated(&self, theta: f64, f: f64) -> bool {
        if theta.is_nan() || f.is_nan() {
            return true;
        }
        self.entries.iter().any(|&(theta_e, f_e)| {
            theta >= (1.0 - self.gamma_theta) * theta_e && f >= f_e - self.gamma_f * theta_e
        })
    }

    /// Adds (`theta`, `f`) and removes the entries it dominates.
    pub fn augment(&mut self, theta: f64, f: f64) {
        if self
            .entries
            .iter()
            .any(|&(theta_e, f_e)| theta_e <= theta && f_e <= f)
        {
            return;
        }
        self.entries
            .retain(|&(theta_e, f_e)| !(theta <= theta_e && f <= f_e));
        self.entries.push((theta, f));
    }

    /// Checks that no entry dominates another.
    pub fn is_pareto(&self) -> bool {
        self.entries.iter().enumerate().all(|(i, &(t1, f1))| {
            self.entries
                .iter()
                .enumerate()
                .all(|(j, &(t2, f2))| i == j || !(t1 <= t2 && f1 <= f2))
        })
    }
}
