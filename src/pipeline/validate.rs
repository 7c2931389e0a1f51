use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationIssue};

/// Default minimum number of samples a spectrum must carry.
pub const DEFAULT_MIN_SAMPLES: usize = 50;

/// Hard floor on the sample count, whatever the configuration says. Smoothing, the cubic
/// baseline and the slope statistics all need a handful of points to be meaningful.
pub const MIN_SAMPLES_FLOOR: usize = 8;

/// Inclusive wavenumber window the analysis is restricted to.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WavenumberRange {
    pub lower: f64,
    pub upper: f64,
}

impl WavenumberRange {
    pub fn contains(&self, wavenumber: f64) -> bool {
        wavenumber >= self.lower && wavenumber <= self.upper
    }
}

/// Configuration for the spectrum validator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Minimum sample count (default: 50, never below [`MIN_SAMPLES_FLOOR`])
    pub min_samples: usize,
    /// Optional analysis window applied after sorting (default: none)
    pub crop: Option<WavenumberRange>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfig {
            min_samples: DEFAULT_MIN_SAMPLES,
            crop: None,
        }
    }
}

impl ValidatorConfig {
    pub fn required_samples(&self) -> usize {
        self.min_samples.max(MIN_SAMPLES_FLOOR)
    }
}

// ---------------------------------------------------------------------------
// RawSpectrum – a validated, sorted input spectrum
// ---------------------------------------------------------------------------

/// A validated spectrum: finite values, strictly increasing wavenumbers, enough samples.
///
/// Only [`SpectrumValidator`] builds one from caller input, so holding a `RawSpectrum` is
/// proof the checks passed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpectrum {
    wavenumbers: Vec<f64>,
    intensities: Vec<f64>,
}

impl RawSpectrum {
    /// Caller guarantees the invariants (sorted, unique, finite, equal lengths).
    pub(crate) fn from_sorted_unchecked(wavenumbers: Vec<f64>, intensities: Vec<f64>) -> Self {
        debug_assert_eq!(wavenumbers.len(), intensities.len());
        RawSpectrum {
            wavenumbers,
            intensities,
        }
    }

    /// Wavenumber axis, ascending.
    pub fn wavenumbers(&self) -> &[f64] {
        &self.wavenumbers
    }

    /// Intensities paired with [`RawSpectrum::wavenumbers`].
    pub fn intensities(&self) -> &[f64] {
        &self.intensities
    }

    pub fn len(&self) -> usize {
        self.wavenumbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavenumbers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct SpectrumValidator {
    config: ValidatorConfig,
}

impl SpectrumValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        SpectrumValidator { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate a sequence of `(wavenumber, intensity)` pairs.
    pub fn validate(&self, pairs: &[(f64, f64)]) -> Result<RawSpectrum> {
        let (wavenumbers, intensities): (Vec<f64>, Vec<f64>) = pairs.iter().copied().unzip();
        self.validate_owned(wavenumbers, intensities)
    }

    /// Validate separate wavenumber and intensity columns.
    pub fn validate_columns(&self, wavenumbers: &[f64], intensities: &[f64]) -> Result<RawSpectrum> {
        if wavenumbers.len() != intensities.len() {
            return Err(ValidationIssue::LengthMismatch {
                wavenumbers: wavenumbers.len(),
                intensities: intensities.len(),
            }
            .into());
        }
        self.validate_owned(wavenumbers.to_vec(), intensities.to_vec())
    }

    fn validate_owned(&self, wavenumbers: Vec<f64>, intensities: Vec<f64>) -> Result<RawSpectrum> {
        let required = self.config.required_samples();
        check_sample_count(wavenumbers.len(), required)?;

        if let Some(index) = wavenumbers.iter().position(|w| !w.is_finite()) {
            return Err(ValidationIssue::NonFiniteWavenumber { index }.into());
        }
        if let Some(index) = intensities.iter().position(|v| !v.is_finite()) {
            return Err(ValidationIssue::NonFiniteIntensity { index }.into());
        }

        // Stable sort of the pairs by wavenumber; intensities follow their sample.
        let mut order: Vec<usize> = (0..wavenumbers.len()).collect();
        order.sort_by(|&a, &b| wavenumbers[a].total_cmp(&wavenumbers[b]));
        let mut sorted_x: Vec<f64> = order.iter().map(|&i| wavenumbers[i]).collect();
        let mut sorted_y: Vec<f64> = order.iter().map(|&i| intensities[i]).collect();

        if let Some(pair) = sorted_x.windows(2).find(|w| w[0] == w[1]) {
            return Err(ValidationIssue::DuplicateWavenumber {
                wavenumber: pair[0],
            }
            .into());
        }

        if let Some(window) = self.config.crop {
            let (x, y): (Vec<f64>, Vec<f64>) = sorted_x
                .iter()
                .zip(sorted_y.iter())
                .filter(|(w, _)| window.contains(**w))
                .map(|(w, v)| (*w, *v))
                .unzip();
            check_sample_count(x.len(), required)?;
            sorted_x = x;
            sorted_y = y;
        }

        let first = sorted_y[0];
        // An all-zero trace is a blank acquisition; the conditioner reports it as degenerate.
        if first != 0.0 && sorted_y.iter().all(|&v| v == first) {
            return Err(ValidationIssue::FlatSignal { value: first }.into());
        }

        debug!(
            "validated spectrum: {} samples, {:.1}..{:.1} cm-1",
            sorted_x.len(),
            sorted_x[0],
            sorted_x[sorted_x.len() - 1]
        );

        Ok(RawSpectrum::from_sorted_unchecked(sorted_x, sorted_y))
    }
}

fn check_sample_count(found: usize, required: usize) -> Result<()> {
    if found < required {
        return Err(ValidationIssue::TooFewSamples { found, required }.into());
    }
    Ok(())
}
