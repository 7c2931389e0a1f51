use log::{debug, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::polyfit::PolynomialFit;
use super::validate::RawSpectrum;
use crate::error::{Error, Result, ValidationIssue};

/// Scales a median absolute deviation to a Gaussian standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Configuration for the three conditioning stages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionerConfig {
    /// Savitzky–Golay window in samples (default: 11, bumped to odd, clamped to the input)
    pub smoothing_window: usize,
    /// Savitzky–Golay polynomial order (default: 3, 0 gives a moving average)
    pub smoothing_order: usize,
    /// Degree of the iterative polynomial baseline (default: 3)
    pub baseline_degree: usize,
    /// Upper bound on baseline refit iterations (default: 100)
    pub baseline_max_iterations: usize,
    /// Relative change below which the baseline is considered converged (default: 1e-3)
    pub baseline_tolerance: f64,
    /// Minimum dynamic range after baseline removal, relative to the largest absolute raw
    /// intensity (default: 1e-9)
    pub degenerate_epsilon: f64,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        ConditionerConfig {
            smoothing_window: 11,
            smoothing_order: 3,
            baseline_degree: 3,
            baseline_max_iterations: 100,
            baseline_tolerance: 1e-3,
            degenerate_epsilon: 1e-9,
        }
    }
}

/// A smoothed, baseline-corrected spectrum normalized to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionedSpectrum {
    wavenumbers: Vec<f64>,
    intensities: Vec<f64>,
    noise_ratio: f64,
}

impl ConditionedSpectrum {
    pub fn wavenumbers(&self) -> &[f64] {
        &self.wavenumbers
    }

    /// Normalized intensities; min is exactly 0 and max exactly 1.
    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    /// Robust noise level of the raw trace over its corrected dynamic range.
    ///
    /// Estimated from the median absolute smoothing residual, so isolated peaks that the
    /// smoother flattens do not count as noise. Independent of the acquisition gain.
    pub fn noise_ratio(&self) -> f64 {
        self.noise_ratio
    }

    pub fn len(&self) -> usize {
        self.wavenumbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavenumbers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Conditioner
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct SignalConditioner {
    config: ConditionerConfig,
}

impl SignalConditioner {
    pub fn new(config: ConditionerConfig) -> Self {
        SignalConditioner { config }
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.config
    }

    /// Smooth, subtract the baseline and normalize.
    ///
    /// Every constant is derived from `raw` alone, so two spectra never influence each
    /// other's conditioning. Intensities are first divided by their largest magnitude, which
    /// makes the result and the degenerate check independent of the acquisition gain.
    pub fn condition(&self, raw: &RawSpectrum) -> Result<ConditionedSpectrum> {
        let epsilon = self.config.degenerate_epsilon;
        let scale = max_abs(raw.intensities());
        if !(scale > 0.0) {
            return Err(Error::DegenerateSignal {
                range: 0.0,
                epsilon,
            });
        }
        let values: Vec<f64> = raw.intensities().iter().map(|v| v / scale).collect();

        let smoothed = self.smooth(&values);
        let baseline = self.estimate_baseline(raw.wavenumbers(), &smoothed)?;

        let mut clipped = 0.0_f64;
        let corrected: Vec<f64> = smoothed
            .iter()
            .zip(baseline.iter())
            .map(|(s, b)| {
                let residue = s - b;
                if residue < 0.0 {
                    clipped = clipped.max(-residue);
                    0.0
                } else {
                    residue
                }
            })
            .collect();

        let (min, max) = min_max(&corrected);
        let range = max - min;
        if clipped > range && range > 0.0 {
            warn!("baseline overshoot {clipped:e} exceeds the corrected range {range:e}");
        }
        if !(range >= epsilon) {
            return Err(Error::DegenerateSignal { range, epsilon });
        }

        let mut residuals: Vec<f64> = values
            .iter()
            .zip(&smoothed)
            .map(|(v, s)| (v - s).abs())
            .collect();
        let noise_ratio = MAD_TO_SIGMA * median(&mut residuals) / range;

        let intensities = corrected.iter().map(|v| (v - min) / range).collect();
        debug!(
            "conditioned {} samples: relative range {range:.4e}, clipped residue {clipped:.2e}, noise ratio {noise_ratio:.4}",
            raw.len()
        );

        Ok(ConditionedSpectrum {
            wavenumbers: raw.wavenumbers().to_vec(),
            intensities,
            noise_ratio,
        })
    }

    /// Savitzky–Golay smoothing.
    ///
    /// Edge samples take the value of the polynomial fitted to the first (or last) full window,
    /// evaluated at their offset, so the output has the same length as the input.
    pub fn smooth(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len();
        let window = effective_window(self.config.smoothing_window, n);
        if window < 3 {
            return values.to_vec();
        }
        let half = window / 2;
        let order = self.config.smoothing_order.min(window - 1);

        // Offsets scaled to [-1, 1] keep the Vandermonde matrix well conditioned.
        let offsets: Vec<f64> = (0..window)
            .map(|j| (j as f64 - half as f64) / half as f64)
            .collect();
        let Some(fit) = PolynomialFit::new(&offsets, order) else {
            return values.to_vec();
        };

        let apply = |weights: &[f64], start: usize| -> f64 {
            weights
                .iter()
                .zip(&values[start..start + window])
                .map(|(w, v)| w * v)
                .sum()
        };

        let mut out = vec![0.0; n];
        let center = fit.evaluation_weights(0.0);
        for i in half..n - half {
            out[i] = apply(&center, i - half);
        }
        for i in 0..half {
            let leading = fit.evaluation_weights(offsets[i]);
            out[i] = apply(&leading, 0);
            let trailing = fit.evaluation_weights(offsets[window - 1 - i]);
            out[n - 1 - i] = apply(&trailing, n - window);
        }
        out
    }

    /// Iterative modified-polynomial baseline.
    ///
    /// Fits a polynomial, lowers the working signal to `min(signal, fit)` and refits until
    /// the working signal stops changing, so peaks are progressively excluded from the fit.
    pub fn estimate_baseline(&self, wavenumbers: &[f64], values: &[f64]) -> Result<Vec<f64>> {
        let n = values.len();
        if wavenumbers.len() != n {
            return Err(ValidationIssue::LengthMismatch {
                wavenumbers: wavenumbers.len(),
                intensities: n,
            }
            .into());
        }
        if n < 2 {
            return Err(ValidationIssue::TooFewSamples {
                found: n,
                required: 2,
            }
            .into());
        }
        let first = wavenumbers[0];
        let width = wavenumbers[n - 1] - first;
        if !(width.is_finite() && width != 0.0) {
            return Err(ValidationIssue::DuplicateWavenumber { wavenumber: first }.into());
        }
        let scale = max_abs(values);
        if scale == 0.0 {
            return Ok(vec![0.0; n]);
        }

        let abscissa: Vec<f64> = wavenumbers
            .iter()
            .map(|w| 2.0 * (w - first) / width - 1.0)
            .collect();
        let degree = self.config.baseline_degree.min(n - 1);

        let fit = PolynomialFit::new(&abscissa, degree).ok_or(Error::DegenerateSignal {
            range: 0.0,
            epsilon: self.config.degenerate_epsilon,
        })?;

        // Unit peak magnitude keeps the convergence norms finite at any gain.
        let mut work = DVector::from_iterator(n, values.iter().map(|v| v / scale));
        let mut baseline = fit.fit(&work);
        for iteration in 0..self.config.baseline_max_iterations {
            let lowered = work.zip_map(&baseline, f64::min);
            let norm = work.norm();
            let change = (&lowered - &work).norm();
            work = lowered;
            baseline = fit.fit(&work);
            if norm == 0.0 || change / norm < self.config.baseline_tolerance {
                debug!("baseline converged after {} iterations", iteration + 1);
                break;
            }
        }
        Ok(baseline.iter().map(|b| b * scale).collect())
    }
}

/// Largest usable odd window for `n` samples; even requests are bumped up by one first.
pub fn effective_window(configured: usize, n: usize) -> usize {
    let mut window = if configured % 2 == 0 {
        configured + 1
    } else {
        configured
    };
    if window > n {
        window = if n % 2 == 1 { n } else { n.saturating_sub(1) };
    }
    window
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |m, v| m.max(v.abs()))
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let n = values.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => values[n / 2],
        _ => 0.5 * (values[n / 2 - 1] + values[n / 2]),
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}
