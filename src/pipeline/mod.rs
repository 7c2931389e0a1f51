//! Per-spectrum processing: validation, conditioning and feature extraction.
//!
//! ```text
//!  (wavenumber, intensity) pairs
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ validate  │  finite, sorted, unique, long enough → RawSpectrum
//!   └──────────┘
//!        │
//!        ▼
//!   ┌───────────┐
//!   │ condition  │  Savitzky–Golay → polynomial baseline → min-max → ConditionedSpectrum
//!   └───────────┘
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ features  │  47 closed-form statistics → FeatureVector
//!   └──────────┘
//! ```

pub mod condition;
pub mod features;
pub(crate) mod polyfit;
pub mod validate;
