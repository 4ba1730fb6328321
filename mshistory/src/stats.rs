//! Trimmed baseline estimation.
//!
//! A baseline is fit in two passes. The first pass estimates the mean $`\mu_1`$ and
//! population standard deviation $`\sigma_1`$ over every available value. Values
//! strictly below $`\mu_1 - \sigma_1`$ are treated as outliers and discarded, and the
//! second pass re-estimates $`\mu_2`$ and $`\sigma_2`$ over what remains. The lower
//! acceptance bound of the parameter is then
//!
//! ```math
//! L = \mu_2 - 2\sigma_2
//! ```
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::record::{ParamPath, Record};

/// The [`Baseline`] of every parameter that could be calibrated, by parameter name
pub type Baselines = BTreeMap<String, Baseline>;

/// The mean and population standard deviation (dividing by $`N`$, not $`N - 1`$).
///
/// Returns `None` for an empty sample or when the result is not finite.
pub fn mean_stdev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let avg = values.iter().sum::<f64>() / n;
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    let stdev = (sum_sq / n).sqrt();
    (avg.is_finite() && stdev.is_finite()).then_some((avg, stdev))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub avg: f64,
    pub stdev: f64,
    pub lower_limit: f64,
}

impl Baseline {
    /// Fit a trimmed baseline to `values`, `None` if there is nothing to fit
    pub fn fit(values: &[f64]) -> Option<Self> {
        let (avg, stdev) = mean_stdev(values)?;
        let trim_below = avg - stdev;
        let kept: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| *v >= trim_below)
            .collect();
        trace!(
            "Trimmed {} of {} values below {trim_below}",
            values.len() - kept.len(),
            values.len()
        );
        let (avg, stdev) = mean_stdev(&kept)?;
        Some(Self {
            avg,
            stdev,
            lower_limit: avg - 2.0 * stdev,
        })
    }

    /// Whether `value` is strictly above the lower acceptance bound
    pub fn accepts(&self, value: f64) -> bool {
        value > self.lower_limit
    }
}

/// Extract the value at `path` from every record. Any extraction failure,
/// including a non-numeric leaf, is a missing value.
pub fn extract_values(records: &[Record], path: &ParamPath) -> Vec<Option<f64>> {
    records
        .iter()
        .map(|rec| rec.number(path).ok().flatten())
        .collect()
}

/// Fit a [`Baseline`] for the parameter at `path` across `records`
pub fn calibrate(records: &[Record], path: &ParamPath) -> Option<Baseline> {
    let values: Vec<f64> = extract_values(records, path).into_iter().flatten().collect();
    Baseline::fit(&values)
}
