//! Deterministic synthetic Raman spectra for demos, prototype builds and tests.

use std::collections::BTreeMap;

use crate::data::model::{MetadataValue, SpectralDataset, SpectrumRecord};

/// Minimal deterministic PRNG (xoshiro256**)
#[derive(Clone, Debug)]
pub struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    /// Uniform in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    /// Box-Muller transform for normal distribution
    pub fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

pub fn gaussian(x: f64, center: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - center).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// One Gaussian band: centre (cm⁻¹), standard deviation (cm⁻¹), relative amplitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakShape {
    pub center: f64,
    pub sigma: f64,
    pub amplitude: f64,
}

const fn peak(center: f64, sigma: f64, amplitude: f64) -> PeakShape {
    PeakShape {
        center,
        sigma,
        amplitude,
    }
}

/// A synthetic class with its band signature.
#[derive(Clone, Copy, Debug)]
pub struct ReferenceClass {
    pub label: &'static str,
    pub display_name: &'static str,
    pub peaks: [PeakShape; 4],
}

pub const REFERENCE_CLASSES: [ReferenceClass; 3] = [
    ReferenceClass {
        label: "A",
        display_name: "Protein-rich",
        peaks: [
            peak(1004.0, 8.0, 1.0),
            peak(1450.0, 20.0, 0.6),
            peak(1655.0, 25.0, 0.8),
            peak(750.0, 15.0, 0.3),
        ],
    },
    ReferenceClass {
        label: "B",
        display_name: "Nucleic-acid-rich",
        peaks: [
            peak(850.0, 12.0, 0.7),
            peak(1090.0, 15.0, 1.0),
            peak(1300.0, 20.0, 0.5),
            peak(1600.0, 18.0, 0.4),
        ],
    },
    ReferenceClass {
        label: "C",
        display_name: "Lipid/carotenoid-rich",
        peaks: [
            peak(1250.0, 25.0, 0.9),
            peak(1340.0, 15.0, 0.6),
            peak(1550.0, 20.0, 0.8),
            peak(700.0, 10.0, 0.2),
        ],
    },
];

pub fn reference_class(label: &str) -> Option<&'static ReferenceClass> {
    REFERENCE_CLASSES.iter().find(|c| c.label == label)
}

pub fn display_names() -> BTreeMap<String, String> {
    REFERENCE_CLASSES
        .iter()
        .map(|c| (c.label.to_string(), c.display_name.to_string()))
        .collect()
}

/// Instrument response of one acquisition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Acquisition {
    pub gain: f64,
    /// Quadratic fluorescence background `b0 + b1·t + b2·t²` over the normalized axis `t ∈ [0, 1]`.
    pub background: [f64; 3],
    /// Standard deviation of additive noise, before gain.
    pub noise: f64,
}

impl Default for Acquisition {
    fn default() -> Self {
        Acquisition {
            gain: 1000.0,
            background: [0.3, 0.2, -0.1],
            noise: 0.01,
        }
    }
}

/// Acquisition used for replicate `r` of the reference set: rising gain and background.
pub fn acquisition_for(replicate: usize) -> Acquisition {
    let r = replicate as f64;
    Acquisition {
        gain: 500.0 + 300.0 * r,
        background: [0.2 + 0.1 * r, 0.1 * r, 0.05],
        noise: 0.01,
    }
}

/// 600–1800 cm⁻¹ in 2 cm⁻¹ steps (601 samples).
pub fn fingerprint_axis() -> Vec<f64> {
    (0..601).map(|i| 600.0 + 2.0 * i as f64).collect()
}

/// Simulate one acquisition of the given band signature.
pub fn synthesize(
    wavenumbers: &[f64],
    peaks: &[PeakShape],
    acquisition: &Acquisition,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    let (lo, hi) = match (wavenumbers.first(), wavenumbers.last()) {
        (Some(&lo), Some(&hi)) if hi > lo => (lo, hi),
        (Some(&lo), _) => (lo, lo + 1.0),
        _ => return Vec::new(),
    };
    let [b0, b1, b2] = acquisition.background;
    wavenumbers
        .iter()
        .map(|&wn| {
            let t = (wn - lo) / (hi - lo);
            let signal: f64 = peaks
                .iter()
                .map(|p| gaussian(wn, p.center, p.sigma, p.amplitude))
                .sum();
            let background = b0 + b1 * t + b2 * t * t;
            acquisition.gain * (signal + background + rng.gauss(0.0, acquisition.noise))
        })
        .collect()
}

/// `replicates` acquisitions of every reference class on the fingerprint axis.
///
/// Records come class by class, replicate by replicate, all drawing from one generator
/// seeded with `seed`. Metadata: `label`, `replicate`, `split = "reference"`.
pub fn reference_dataset(seed: u64, replicates: usize) -> SpectralDataset {
    let axis = fingerprint_axis();
    let mut rng = SimpleRng::new(seed);
    let mut records = Vec::with_capacity(REFERENCE_CLASSES.len() * replicates);
    for class in &REFERENCE_CLASSES {
        for r in 0..replicates {
            let intensities = synthesize(&axis, &class.peaks, &acquisition_for(r), &mut rng);
            let metadata = BTreeMap::from([
                ("label".to_string(), MetadataValue::String(class.label.to_string())),
                ("replicate".to_string(), MetadataValue::Integer(r as i64)),
                ("split".to_string(), MetadataValue::String("reference".to_string())),
            ]);
            records.push(SpectrumRecord {
                wavenumbers: axis.clone(),
                intensities,
                metadata,
            });
        }
    }
    SpectralDataset::from_records(records)
}

/// Uniform noise on the fingerprint axis, one draw per sample.
pub fn noise_spectrum(seed: u64) -> Vec<(f64, f64)> {
    let mut rng = SimpleRng::new(seed);
    fingerprint_axis()
        .into_iter()
        .map(|x| (x, rng.next_f64()))
        .collect()
}
