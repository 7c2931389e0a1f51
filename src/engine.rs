use std::collections::BTreeMap;
use std::sync::Arc;

use image::ImageResult;
use log::debug;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::pipeline::condition::{ConditionedSpectrum, SignalConditioner};
use crate::pipeline::features::{extract_features, FeatureVector, FEATURE_DIM};
use crate::pipeline::validate::{RawSpectrum, SpectrumValidator};
use crate::prototypes::PrototypeStore;
use crate::render::{render_overlay, PlotConfig};
use crate::scoring::{RankedScore, ScoreResult, SimilarityScorer};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// What the engine hands to its caller for one spectrum.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub top_score: f64,
    pub confidence: f64,
    /// Set when `confidence` is below the configured threshold.
    pub low_confidence: bool,
    pub feature_dim: usize,
    /// Every label with its similarity, best first.
    pub scores: Vec<RankedScore>,
}

impl ClassificationResult {
    pub fn score_map(&self) -> BTreeMap<String, f64> {
        self.scores
            .iter()
            .map(|r| (r.label.clone(), r.score))
            .collect()
    }
}

/// Every intermediate of one classification, for inspection and plotting.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub raw: RawSpectrum,
    pub conditioned: ConditionedSpectrum,
    pub features: FeatureVector,
    pub result: ClassificationResult,
}

impl Analysis {
    /// PNG overlay of the raw and processed traces.
    pub fn render_plot(&self, config: &PlotConfig) -> ImageResult<Vec<u8>> {
        render_overlay(&self.raw, &self.conditioned, config)
    }
}

// ---------------------------------------------------------------------------
// Extension point
// ---------------------------------------------------------------------------

/// A stage that may adjust similarity scores after cosine scoring, e.g. to fuse evidence
/// from another modality. The returned result is re-ranked and its confidence recomputed.
pub trait RescoringStage: Send + Sync {
    fn name(&self) -> &str;

    fn rescore(&self, features: &FeatureVector, scores: ScoreResult) -> Result<ScoreResult>;
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// validate → condition → extract → score → assemble, against a shared prototype store.
///
/// Holds no per-request state, so one instance can serve any number of threads.
#[derive(Clone)]
pub struct Classifier {
    store: Arc<PrototypeStore>,
    validator: SpectrumValidator,
    conditioner: SignalConditioner,
    scorer: SimilarityScorer,
    rescoring: Vec<Arc<dyn RescoringStage>>,
}

impl Classifier {
    pub fn new(store: Arc<PrototypeStore>, config: &EngineConfig) -> Self {
        Classifier {
            store,
            validator: SpectrumValidator::new(config.validator.clone()),
            conditioner: SignalConditioner::new(config.conditioner.clone()),
            scorer: SimilarityScorer::new(config.scorer.clone()),
            rescoring: Vec::new(),
        }
    }

    /// Append a rescoring stage; stages run in insertion order.
    pub fn with_rescoring(mut self, stage: Arc<dyn RescoringStage>) -> Self {
        self.rescoring.push(stage);
        self
    }

    pub fn store(&self) -> &PrototypeStore {
        &self.store
    }

    /// Classify a sequence of (wavenumber, intensity) pairs.
    pub fn classify(&self, pairs: &[(f64, f64)]) -> Result<ClassificationResult> {
        let raw = self.validator.validate(pairs)?;
        Ok(self.run(raw)?.result)
    }

    /// Classify from separate wavenumber and intensity columns.
    pub fn classify_columns(
        &self,
        wavenumbers: &[f64],
        intensities: &[f64],
    ) -> Result<ClassificationResult> {
        let raw = self.validator.validate_columns(wavenumbers, intensities)?;
        Ok(self.run(raw)?.result)
    }

    /// Like [`Classifier::classify`], keeping every intermediate.
    pub fn analyze(&self, pairs: &[(f64, f64)]) -> Result<Analysis> {
        let raw = self.validator.validate(pairs)?;
        self.run(raw)
    }

    fn run(&self, raw: RawSpectrum) -> Result<Analysis> {
        let conditioned = self.conditioner.condition(&raw)?;
        let features = extract_features(&conditioned);

        let noise_ratio = conditioned.noise_ratio();
        let mut scores = self.scorer.score(&features, noise_ratio, &self.store)?;
        for stage in &self.rescoring {
            let adjusted = stage.rescore(&features, scores)?;
            scores = self.scorer.summarize(adjusted.ranked, noise_ratio)?;
            debug!("after rescoring stage '{}': top '{}'", stage.name(), scores.predicted_label);
        }

        let result = self.assemble(scores);
        Ok(Analysis {
            raw,
            conditioned,
            features,
            result,
        })
    }

    fn assemble(&self, scores: ScoreResult) -> ClassificationResult {
        let display_name = self
            .store
            .display_name(&scores.predicted_label)
            .map(str::to_string);
        ClassificationResult {
            low_confidence: self.scorer.is_low_confidence(scores.confidence),
            label: scores.predicted_label,
            display_name,
            top_score: scores.top_score,
            confidence: scores.confidence,
            feature_dim: FEATURE_DIM,
            scores: scores.ranked,
        }
    }
}
