//! Fixed 47-dimensional descriptor of a conditioned spectrum.
//!
//! Layout:
//! ```text
//!   0..17   global shape statistics
//!  17..37   per band: amplitude, position, fwhm, area   (5 bands x 4)
//!  37..47   band area ratios area_i / (area_i + area_j) (10 pairs)
//! ```
//! Positions, widths and areas are scaled by the band (or axis) width so every feature lives
//! on a comparable, roughly unit scale and no single feature dominates cosine similarity.

use serde::ser::{Serialize, Serializer};

use super::condition::ConditionedSpectrum;

pub const FEATURE_DIM: usize = 47;

/// Peaks counted towards `peak_count` saturate at this many.
pub const MAX_COUNTED_PEAKS: usize = 10;

/// Minimum prominence of a detected peak, as a fraction of the normalized range.
pub const PEAK_PROMINENCE_FRACTION: f64 = 0.02;

/// A wavenumber band `[lower, upper)` in cm-1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub name: &'static str,
    pub lower: f64,
    pub upper: f64,
}

impl Band {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

pub const BANDS: [Band; 5] = [
    Band { name: "skeletal", lower: 600.0, upper: 900.0 },
    Band { name: "ring_breathing", lower: 900.0, upper: 1150.0 },
    Band { name: "amide_iii", lower: 1150.0, upper: 1400.0 },
    Band { name: "ch_deformation", lower: 1400.0, upper: 1500.0 },
    Band { name: "amide_i", lower: 1500.0, upper: 1800.0 },
];

const GLOBAL_FEATURES: usize = 17;
const BAND_FEATURES: usize = 4;
const RATIO_OFFSET: usize = GLOBAL_FEATURES + BAND_FEATURES * BANDS.len();

/// Band pairs for the ratio block, in feature order.
pub const RATIO_PAIRS: [(usize, usize); 10] = [
    (0, 1), (0, 2), (0, 3), (0, 4),
    (1, 2), (1, 3), (1, 4),
    (2, 3), (2, 4),
    (3, 4),
];

pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "mean",
    "std",
    "median",
    "q25",
    "q75",
    "mean_abs_slope",
    "std_abs_slope",
    "sign_change_fraction",
    "area_per_span",
    "mean_square",
    "sparsity",
    "centroid",
    "spread",
    "peak_count",
    "max_prominence",
    "mean_prominence",
    "dominant_position",
    "skeletal.amplitude",
    "skeletal.position",
    "skeletal.fwhm",
    "skeletal.area",
    "ring_breathing.amplitude",
    "ring_breathing.position",
    "ring_breathing.fwhm",
    "ring_breathing.area",
    "amide_iii.amplitude",
    "amide_iii.position",
    "amide_iii.fwhm",
    "amide_iii.area",
    "ch_deformation.amplitude",
    "ch_deformation.position",
    "ch_deformation.fwhm",
    "ch_deformation.area",
    "amide_i.amplitude",
    "amide_i.position",
    "amide_i.fwhm",
    "amide_i.area",
    "ratio.skeletal/ring_breathing",
    "ratio.skeletal/amide_iii",
    "ratio.skeletal/ch_deformation",
    "ratio.skeletal/amide_i",
    "ratio.ring_breathing/amide_iii",
    "ratio.ring_breathing/ch_deformation",
    "ratio.ring_breathing/amide_i",
    "ratio.amide_iii/ch_deformation",
    "ratio.amide_iii/amide_i",
    "ratio.ch_deformation/amide_i",
];

// ---------------------------------------------------------------------------
// FeatureVector
// ---------------------------------------------------------------------------

/// Exactly [`FEATURE_DIM`] values; the array type makes any other length unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: [f64; FEATURE_DIM],
}

impl FeatureVector {
    pub fn from_array(values: [f64; FEATURE_DIM]) -> Self {
        FeatureVector { values }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        FEATURE_DIM
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn dot(&self, other: &FeatureVector) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// `v / (‖v‖ + eps)`.
    pub fn l2_normalized(&self, eps: f64) -> FeatureVector {
        let scale = self.norm() + eps;
        let mut values = self.values;
        for v in &mut values {
            *v /= scale;
        }
        FeatureVector { values }
    }

    /// `(name, value)` pairs in feature order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

impl TryFrom<&[f64]> for FeatureVector {
    /// The offending length.
    type Error = usize;

    fn try_from(values: &[f64]) -> Result<Self, Self::Error> {
        let values: [f64; FEATURE_DIM] = values.try_into().map_err(|_| values.len())?;
        Ok(FeatureVector { values })
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.values.iter())
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// A local maximum and its prominence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub prominence: f64,
}

/// Map a conditioned spectrum to its feature vector. Pure and deterministic.
pub fn extract_features(spectrum: &ConditionedSpectrum) -> FeatureVector {
    let x = spectrum.wavenumbers();
    let y = spectrum.intensities();
    let mut values = [0.0; FEATURE_DIM];

    values[..GLOBAL_FEATURES].copy_from_slice(&global_features(x, y));

    let mut areas = [0.0; BANDS.len()];
    for (b, band) in BANDS.iter().enumerate() {
        let stats = band_features(x, y, band);
        areas[b] = stats[3];
        let offset = GLOBAL_FEATURES + b * BAND_FEATURES;
        values[offset..offset + BAND_FEATURES].copy_from_slice(&stats);
    }

    for (k, &(i, j)) in RATIO_PAIRS.iter().enumerate() {
        let total = areas[i] + areas[j];
        values[RATIO_OFFSET + k] = if total > 0.0 { areas[i] / total } else { 0.5 };
    }

    FeatureVector { values }
}

fn global_features(x: &[f64], y: &[f64]) -> [f64; GLOBAL_FEATURES] {
    let n = y.len();
    let nf = n as f64;
    let span = x[n - 1] - x[0];

    let mean = y.iter().sum::<f64>() / nf;
    let std = population_std(y, mean);

    let mut sorted = y.to_vec();
    sorted.sort_by(f64::total_cmp);
    let median = quantile(&sorted, 0.5);
    let q25 = quantile(&sorted, 0.25);
    let q75 = quantile(&sorted, 0.75);

    let slopes: Vec<f64> = y.windows(2).map(|w| w[1] - w[0]).collect();
    let abs_slopes: Vec<f64> = slopes.iter().map(|d| d.abs()).collect();
    let mean_abs_slope = abs_slopes.iter().sum::<f64>() / abs_slopes.len() as f64;
    let std_abs_slope = population_std(&abs_slopes, mean_abs_slope);
    let signs: Vec<i8> = slopes.iter().map(|&d| sign(d)).collect();
    let sign_changes = signs.windows(2).filter(|w| w[0] != w[1]).count();
    let sign_change_fraction = sign_changes as f64 / (n.saturating_sub(2)).max(1) as f64;

    let area_per_span = trapezoid(x, y) / span;
    let sum_sq: f64 = y.iter().map(|v| v * v).sum();
    let mean_square = sum_sq / nf;
    let l1: f64 = y.iter().map(|v| v.abs()).sum();
    let l2 = sum_sq.sqrt();
    let sparsity = if l2 > 0.0 { l1 / (l2 * nf.sqrt()) } else { 0.0 };

    let weight: f64 = y.iter().sum();
    let (centroid, spread) = if weight > 0.0 {
        let c = x.iter().zip(y).map(|(a, b)| a * b).sum::<f64>() / weight;
        let s = (x.iter().zip(y).map(|(a, b)| (a - c).powi(2) * b).sum::<f64>() / weight).sqrt();
        ((c - x[0]) / span, s / span)
    } else {
        (0.5, 0.0)
    };

    let peaks = find_peaks(y, PEAK_PROMINENCE_FRACTION);
    let peak_count = peaks.len().min(MAX_COUNTED_PEAKS) as f64 / MAX_COUNTED_PEAKS as f64;
    let max_prominence = peaks.iter().map(|p| p.prominence).fold(0.0, f64::max);
    let mean_prominence = if peaks.is_empty() {
        0.0
    } else {
        peaks.iter().map(|p| p.prominence).sum::<f64>() / peaks.len() as f64
    };
    let dominant = first_argmax(y, 0, n);
    let dominant_position = (x[dominant] - x[0]) / span;

    [
        mean,
        std,
        median,
        q25,
        q75,
        mean_abs_slope,
        std_abs_slope,
        sign_change_fraction,
        area_per_span,
        mean_square,
        sparsity,
        centroid,
        spread,
        peak_count,
        max_prominence,
        mean_prominence,
        dominant_position,
    ]
}

/// `[amplitude, position, fwhm, area]` of one band; zeros when fewer than two samples fall in it.
fn band_features(x: &[f64], y: &[f64], band: &Band) -> [f64; BAND_FEATURES] {
    let start = x.partition_point(|&w| w < band.lower);
    let end = x.partition_point(|&w| w < band.upper);
    if end.saturating_sub(start) < 2 {
        return [0.0; BAND_FEATURES];
    }
    let last = end - 1;
    let width = band.width();

    let peak = first_argmax(y, start, end);
    let amplitude = y[peak];
    let position = (x[peak] - band.lower) / width;
    let fwhm = if amplitude > 0.0 {
        full_width_half_max(x, y, start, last, peak) / width
    } else {
        0.0
    };
    let area = trapezoid(&x[start..end], &y[start..end]) / width;

    [amplitude, position, fwhm, area]
}

/// Width at half the peak height, walking outward from `peak` within `first..=last`.
fn full_width_half_max(x: &[f64], y: &[f64], first: usize, last: usize, peak: usize) -> f64 {
    let half = y[peak] / 2.0;

    let mut i = peak;
    while i > first && y[i - 1] > half {
        i -= 1;
    }
    let left = if i > first {
        let t = (half - y[i - 1]) / (y[i] - y[i - 1]);
        x[i - 1] + t * (x[i] - x[i - 1])
    } else {
        x[first]
    };

    let mut j = peak;
    while j < last && y[j + 1] > half {
        j += 1;
    }
    let right = if j < last {
        let t = (y[j] - half) / (y[j] - y[j + 1]);
        x[j] + t * (x[j + 1] - x[j])
    } else {
        x[last]
    };

    right - left
}

/// Local maxima with at least `min_prominence`. Plateaus resolve to their middle sample.
pub fn find_peaks(values: &[f64], min_prominence: f64) -> Vec<Peak> {
    let n = values.len();
    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        if values[i] > values[i - 1] {
            let mut j = i;
            while j + 1 < n && values[j + 1] == values[i] {
                j += 1;
            }
            if j + 1 < n && values[j + 1] < values[i] {
                let index = (i + j) / 2;
                let prominence = prominence(values, index);
                if prominence >= min_prominence {
                    peaks.push(Peak { index, prominence });
                }
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    peaks
}

/// Height above the higher of the two minima reached before a strictly higher sample.
fn prominence(values: &[f64], peak: usize) -> f64 {
    let height = values[peak];
    let left = values[..peak]
        .iter()
        .rev()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    let right = values[peak + 1..]
        .iter()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    height - left.max(right)
}

fn first_argmax(values: &[f64], start: usize, end: usize) -> usize {
    (start + 1..end).fold(start, |best, i| if values[i] > values[best] { i } else { best })
}

fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (ys[0] + ys[1]) * (xs[1] - xs[0]))
        .sum()
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = pos - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::pipeline::condition::SignalConditioner;
    use crate::pipeline::validate::RawSpectrum;

    fn gaussian(x: &[f64], center: f64, sigma: f64, amplitude: f64) -> Vec<f64> {
        x.iter()
            .map(|w| amplitude * (-(w - center).powi(2) / (2.0 * sigma * sigma)).exp())
            .collect()
    }

    fn conditioned(x: Vec<f64>, y: Vec<f64>) -> ConditionedSpectrum {
        SignalConditioner::default()
            .condition(&RawSpectrum::from_sorted_unchecked(x, y))
            .unwrap()
    }

    fn fingerprint_axis() -> Vec<f64> {
        (0..601).map(|i| 600.0 + i as f64 * 2.0).collect()
    }

    #[test]
    fn names_cover_every_position_once() {
        let unique: HashSet<&str> = FEATURE_NAMES.iter().copied().collect();
        assert_eq!(unique.len(), FEATURE_DIM);
        assert_eq!(RATIO_OFFSET + RATIO_PAIRS.len(), FEATURE_DIM);
        for (b, band) in BANDS.iter().enumerate() {
            let offset = GLOBAL_FEATURES + b * BAND_FEATURES;
            assert_eq!(FEATURE_NAMES[offset], format!("{}.amplitude", band.name));
            assert_eq!(FEATURE_NAMES[offset + 3], format!("{}.area", band.name));
        }
        for (k, (i, j)) in RATIO_PAIRS.iter().enumerate() {
            let expected = format!("ratio.{}/{}", BANDS[*i].name, BANDS[*j].name);
            assert_eq!(FEATURE_NAMES[RATIO_OFFSET + k], expected);
        }
    }

    #[test]
    fn extraction_is_deterministic_and_finite() {
        let x = fingerprint_axis();
        let mut y = gaussian(&x, 1004.0, 8.0, 1.0);
        for (v, p) in y.iter_mut().zip(gaussian(&x, 1655.0, 25.0, 0.6)) {
            *v += p + 0.2;
        }
        let spectrum = conditioned(x, y);
        let a = extract_features(&spectrum);
        let b = extract_features(&spectrum);
        assert_eq!(a, b);
        assert_eq!(a.as_slice().len(), FEATURE_DIM);
        assert!(a.is_finite());
    }

    #[test]
    fn band_features_of_a_single_gaussian() {
        let x = fingerprint_axis();
        let y = gaussian(&x, 1000.0, 10.0, 1.0);
        let stats = band_features(&x, &y, &BANDS[1]);

        assert_eq!(stats[0], 1.0);
        assert!((stats[1] - 0.4).abs() < 1e-12);
        let expected_fwhm = 2.0 * (2.0 * 2.0_f64.ln()).sqrt() * 10.0 / 250.0;
        assert!((stats[2] - expected_fwhm).abs() < 0.002, "{}", stats[2]);
        let expected_area = 10.0 * (2.0 * std::f64::consts::PI).sqrt() / 250.0;
        assert!((stats[3] - expected_area).abs() < 1e-3);
    }

    #[test]
    fn uncovered_bands_are_zero_and_ratios_neutral() {
        // Only the ring-breathing band is sampled.
        let x: Vec<f64> = (0..100).map(|i| 950.0 + i as f64).collect();
        let y = gaussian(&x, 1000.0, 6.0, 1.0);
        let features = extract_features(&conditioned(x, y));
        let values = features.as_slice();

        for b in [0, 2, 3, 4] {
            let offset = GLOBAL_FEATURES + b * BAND_FEATURES;
            assert_eq!(&values[offset..offset + BAND_FEATURES], &[0.0; 4]);
        }
        // skeletal vs ring_breathing: all area sits in the second band.
        assert_eq!(values[RATIO_OFFSET], 0.0);
        // amide_iii vs ch_deformation: neither band is covered.
        assert_eq!(values[RATIO_OFFSET + 7], 0.5);
    }

    #[test]
    fn ratios_stay_in_unit_interval() {
        let x = fingerprint_axis();
        let mut y = gaussian(&x, 760.0, 15.0, 0.4);
        for (v, p) in y.iter_mut().zip(gaussian(&x, 1300.0, 20.0, 1.0)) {
            *v += p;
        }
        let features = extract_features(&conditioned(x, y));
        for v in &features.as_slice()[RATIO_OFFSET..] {
            assert!((0.0..=1.0).contains(v));
        }
    }

    #[test]
    fn peak_detection_and_prominence() {
        let values = [0.0, 0.5, 0.2, 0.2, 1.0, 1.0, 1.0, 0.1, 0.11, 0.0];
        let peaks = find_peaks(&values, 0.02);
        assert_eq!(
            peaks,
            vec![
                Peak { index: 1, prominence: 0.3 },
                Peak { index: 5, prominence: 1.0 },
            ]
        );
    }

    #[test]
    fn conversion_checks_length() {
        assert_eq!(FeatureVector::try_from(&[1.0; 46][..]), Err(46));
        let v = FeatureVector::try_from(&[1.0; FEATURE_DIM][..]).unwrap();
        assert!((v.norm() - (FEATURE_DIM as f64).sqrt()).abs() < 1e-12);
        assert!((v.l2_normalized(0.0).norm() - 1.0).abs() < 1e-12);
    }
}
