use ndarray::Array1;

use crate::store::Sample;

/// Number of samples (newest included) fitted for each strain-rate estimate.
pub const STRAIN_RATE_WINDOW: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

/// Ordinary least-squares line through `(x, y)`.
///
/// Returns `None` with fewer than two points or when every `x` is the same.
pub fn linear_fit(x: &Array1<f64>, y: &Array1<f64>) -> Option<LinearFit> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let x_mean = x.mean()?;
    let y_mean = y.mean()?;
    let dx = x - x_mean;
    let dy = y - y_mean;
    let sxx = dx.dot(&dx);
    if sxx <= 0.0 || !sxx.is_finite() {
        return None;
    }
    let slope = dx.dot(&dy) / sxx;
    Some(LinearFit {
        slope,
        intercept: y_mean - slope * x_mean,
    })
}

/// Strain rate for a new reading at `elapsed` with `true_strain`, given the samples
/// already stored before it.
///
/// Fits elapsed time against true strain over the newest [`STRAIN_RATE_WINDOW`] points
/// (the new reading plus up to nine stored ones). Points with a non-finite channel are left
/// out of the fit; fewer than two usable points give a rate of zero.
pub fn strain_rate(history: &[Sample], elapsed: f32, true_strain: f32) -> f32 {
    if history.is_empty() {
        return 0.0;
    }
    let keep = history.len().saturating_sub(STRAIN_RATE_WINDOW - 1);
    let points: Vec<(f64, f64)> = history[keep..]
        .iter()
        .map(|s| (s.elapsed_time, s.true_strain))
        .chain(std::iter::once((elapsed, true_strain)))
        .filter(|(t, e)| t.is_finite() && e.is_finite())
        .map(|(t, e)| (f64::from(t), f64::from(e)))
        .collect();
    let t: Array1<f64> = points.iter().map(|p| p.0).collect();
    let e: Array1<f64> = points.iter().map(|p| p.1).collect();
    match linear_fit(&t, &e) {
        Some(fit) => {
            log::trace!(
                "strain fit over {} points: slope {:e}, intercept {:e}",
                points.len(),
                fit.slope,
                fit.intercept
            );
            fit.slope as f32
        }
        None => {
            if points.len() >= 2 {
                log::warn!("strain rate window has no spread in elapsed time, reporting 0");
            }
            0.0
        }
    }
}
