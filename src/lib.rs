//! Raman spectrum classification by prototype similarity.
//!
//! A raw (wavenumber, intensity) trace is validated, smoothed, baseline-corrected and
//! normalized, reduced to a fixed 47-value feature vector and compared by cosine similarity
//! with one prototype vector per known class. The result carries the best label, every
//! class score and a calibrated confidence.
//!
//! ```no_run
//! use std::sync::Arc;
//! use raman_proto::{Classifier, EngineConfig, PrototypeStore};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = Arc::new(PrototypeStore::load("prototypes.json".as_ref())?);
//! let classifier = Classifier::new(store, &EngineConfig::default());
//! let spectrum = raman_proto::data::loader::load_spectrum_csv("query.csv".as_ref())?;
//! let result = classifier.classify(&spectrum)?;
//! println!("{} ({:.2})", result.label, result.confidence);
//! # Ok(())
//! # }
//! ```

pub mod color;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod prototypes;
pub mod render;
pub mod scoring;
pub mod synthetic;

pub use config::EngineConfig;
pub use engine::{Analysis, ClassificationResult, Classifier, RescoringStage};
pub use error::{Error, ErrorKind, Result, ValidationIssue};
pub use pipeline::features::{FeatureVector, FEATURE_DIM, FEATURE_NAMES};
pub use prototypes::{PrototypeSnapshot, PrototypeStore};
pub use render::PlotConfig;
pub use scoring::{RankedScore, ScoreResult, ScorerConfig};
