use log::error;

/// Computes the dot-product of `a` and `b`.
///
/// Vectors of different length are reported and yield zero.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        error!("dot: dimension mismatch ({} != {})", a.len(), b.len());
        return 0.0;
    }
    a.iter()
        .zip(b)
        .map(|(&ai, &bi)| ai * bi)
        .reduce(|x, y| x + y)
        .unwrap_or(0.0)
}

/// Computes the infinity norm: `max(abs(a))`
pub fn norm_inf(a: &[f64]) -> f64 {
    let mut max = 0.0;
    for &ai in a {
        let absvi = ai.abs();
        if absvi > max || absvi.is_nan() {
            max = absvi
        }
    }
    max
}

/// Returns the 2-norm (Euclidean) of `a`.
pub fn norm(a: &[f64]) -> f64 {
    a.iter().map(|&ai| ai * ai).sum::<f64>().sqrt()
}

/// Returns the 1-norm of `a`.
pub fn norm_l1(a: &[f64]) -> f64 {
    a.iter().map(|ai| ai.abs()).sum()
}

/// Returns the maximum value of `a` or negative infinity if empty.
pub fn max(a: &[f64]) -> f64 {
    a.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Norm used to measure constraint violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintNorm {
    L1,
    L2,
    LInf,
}

/// Violation of `xi` against the variable bounds and of `constr` against the
/// constraint bounds. `lower` and `upper` hold the variable bounds followed by
/// the constraint bounds.
///
/// With `weights` (one per bound row) each violation is scaled before it
/// enters the norm. Inconsistent dimensions are reported and yield zero.
pub fn constraint_norm(
    kind: ConstraintNorm,
    xi: &[f64],
    constr: &[f64],
    lower: &[f64],
    upper: &[f64],
    weights: Option<&[f64]>,
) -> f64 {
    let n = xi.len() + constr.len();
    if lower.len() != n || upper.len() != n {
        error!(
            "constraint norm: bounds have length {}/{}, expected {}",
            lower.len(),
            upper.len(),
            n
        );
        return 0.0;
    }
    if let Some(w) = weights {
        if w.len() < n {
            error!("constraint norm: {} weights for {} rows", w.len(), n);
            return 0.0;
        }
    }

    let mut total = 0.0;
    for (i, &v) in xi.iter().chain(constr).enumerate() {
        let w = weights.map_or(1.0, |w| w[i]);
        let vio = if v.is_nan() {
            f64::NAN
        } else if v < lower[i] {
            w * (lower[i] - v)
        } else if v > upper[i] {
            w * (v - upper[i])
        } else {
            0.0
        };
        match kind {
            ConstraintNorm::L1 => total += vio,
            ConstraintNorm::L2 => total += vio * vio,
            ConstraintNorm::LInf => {
                if vio > total || vio.is_nan() {
                    total = vio
                }
            }
        }
    }
    match kind {
        ConstraintNorm::L2 => total.sqrt(),
        _ => total,
    }
}
