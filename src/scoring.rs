use std::cmp::Reverse;
use std::collections::BTreeMap;

use log::debug;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::features::FeatureVector;
use crate::prototypes::PrototypeStore;

/// Confidence calibration and ranking parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Top score at which the margin-free confidence is one half (default: 0.9)
    pub score_midpoint: f64,
    /// Slope applied to the top score (default: 12)
    pub score_weight: f64,
    /// Slope applied to the top-vs-runner-up margin (default: 25)
    pub margin_weight: f64,
    /// Penalty per unit of the conditioned spectrum's noise ratio (default: 20)
    pub noise_weight: f64,
    /// Scores closer than this are ranked as ties (default: 1e-9)
    pub tie_tolerance: f64,
    /// Confidence below this value flags the result (default: 0.5)
    pub low_confidence_threshold: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        ScorerConfig {
            score_midpoint: 0.9,
            score_weight: 12.0,
            margin_weight: 25.0,
            noise_weight: 20.0,
            tie_tolerance: 1e-9,
            low_confidence_threshold: 0.5,
        }
    }
}

/// One entry of the ranked score list.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedScore {
    pub label: String,
    pub score: f64,
}

/// Similarities of one query against every prototype.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreResult {
    pub predicted_label: String,
    pub top_score: f64,
    /// `None` when the store holds a single prototype.
    pub runner_up_score: Option<f64>,
    pub margin: f64,
    /// Noise ratio of the query the confidence was computed for.
    pub noise_ratio: f64,
    pub confidence: f64,
    /// Every label, best first.
    pub ranked: Vec<RankedScore>,
}

impl ScoreResult {
    pub fn score_map(&self) -> BTreeMap<String, f64> {
        self.ranked
            .iter()
            .map(|r| (r.label.clone(), r.score))
            .collect()
    }
}

/// Cosine similarity clamped to [-1, 1].
pub fn cosine_similarity(query: &FeatureVector, prototype: &FeatureVector) -> Result<f64> {
    let denominator = query.norm() * prototype.norm();
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(Error::UndefinedSimilarity);
    }
    Ok((query.dot(prototype) / denominator).clamp(-1.0, 1.0))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Clone, Debug, Default)]
pub struct SimilarityScorer {
    config: ScorerConfig,
}

impl SimilarityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        SimilarityScorer { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Logistic confidence of a top score, its margin over the runner-up and the query's
    /// noise ratio.
    ///
    /// With non-negative weights it never decreases with the score or the margin and never
    /// increases with the noise ratio.
    pub fn confidence(&self, top_score: f64, margin: f64, noise_ratio: f64) -> f64 {
        let c = &self.config;
        sigmoid(
            c.score_weight * (top_score - c.score_midpoint) + c.margin_weight * margin
                - c.noise_weight * noise_ratio,
        )
    }

    /// Score `query`, whose conditioned spectrum had the given noise ratio, against every
    /// prototype in `store`.
    pub fn score(
        &self,
        query: &FeatureVector,
        noise_ratio: f64,
        store: &PrototypeStore,
    ) -> Result<ScoreResult> {
        if query.norm() == 0.0 {
            return Err(Error::UndefinedSimilarity);
        }
        let ranked = store
            .lookup()
            .iter()
            .map(|(label, prototype)| {
                cosine_similarity(query, &prototype.vector).map(|score| RankedScore {
                    label: label.clone(),
                    score,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.summarize(ranked, noise_ratio)
    }

    /// Recompute the top score, margin and confidence from an arbitrary score list.
    ///
    /// Used after a rescoring stage has adjusted individual scores.
    pub fn summarize(&self, mut ranked: Vec<RankedScore>, noise_ratio: f64) -> Result<ScoreResult> {
        self.rank(&mut ranked);
        let Some(top) = ranked.first() else {
            return Err(Error::UndefinedSimilarity);
        };
        let predicted_label = top.label.clone();
        let top_score = top.score;
        let runner_up_score = ranked.get(1).map(|r| r.score);
        let margin = runner_up_score.map_or(0.0, |r| (top_score - r).max(0.0));
        let confidence = self.confidence(top_score, margin, noise_ratio);
        debug!(
            "top '{predicted_label}' {top_score:.4}, margin {margin:.4}, noise {noise_ratio:.4}, confidence {confidence:.3}"
        );

        Ok(ScoreResult {
            predicted_label,
            top_score,
            runner_up_score,
            margin,
            noise_ratio,
            confidence,
            ranked,
        })
    }

    pub fn is_low_confidence(&self, confidence: f64) -> bool {
        confidence < self.config.low_confidence_threshold
    }

    // Descending by score. A run of scores within the tie tolerance of its best member is a
    // tie and is ordered by label.
    fn rank(&self, ranked: &mut [RankedScore]) {
        let tolerance = self.config.tie_tolerance;
        ranked.sort_by(|a, b| {
            Reverse(OrderedFloat(a.score))
                .cmp(&Reverse(OrderedFloat(b.score)))
                .then_with(|| a.label.cmp(&b.label))
        });
        let mut start = 0;
        while start < ranked.len() {
            let head = ranked[start].score;
            let end = start
                + 1
                + ranked[start + 1..]
                    .iter()
                    .take_while(|r| (head - r.score).abs() <= tolerance)
                    .count();
            ranked[start..end].sort_by(|a, b| a.label.cmp(&b.label));
            start = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::features::FEATURE_DIM;
    use crate::prototypes::PrototypeSnapshot;

    fn unit(index: usize) -> Vec<f64> {
        let mut v = vec![0.0; FEATURE_DIM];
        v[index] = 1.0;
        v
    }

    fn store(entries: &[(&str, Vec<f64>)]) -> PrototypeStore {
        PrototypeStore::from_snapshot(PrototypeSnapshot {
            split: None,
            feature_dim: FEATURE_DIM,
            num_samples: entries.len(),
            labels: Vec::new(),
            prototypes: entries
                .iter()
                .map(|(l, v)| (l.to_string(), v.clone()))
                .collect(),
            display_names: BTreeMap::new(),
        })
        .unwrap()
    }

    fn query(values: Vec<f64>) -> FeatureVector {
        FeatureVector::try_from(values.as_slice()).unwrap()
    }

    #[test]
    fn cosine_is_clamped_and_scale_free() {
        let a = query(unit(0));
        let mut doubled = unit(0);
        doubled[0] = 2.0;
        assert_eq!(cosine_similarity(&a, &query(doubled)).unwrap(), 1.0);
        let mut opposite = unit(0);
        opposite[0] = -3.0;
        assert_eq!(cosine_similarity(&a, &query(opposite)).unwrap(), -1.0);
        assert_eq!(cosine_similarity(&a, &query(unit(1))).unwrap(), 0.0);
    }

    #[test]
    fn zero_query_is_undefined() {
        let store = store(&[("A", unit(0))]);
        let zero = query(vec![0.0; FEATURE_DIM]);
        assert!(matches!(
            SimilarityScorer::default().score(&zero, 0.0, &store),
            Err(Error::UndefinedSimilarity)
        ));
    }

    #[test]
    fn ranks_every_label_best_first() {
        let store = store(&[("A", unit(0)), ("B", unit(1)), ("C", unit(2))]);
        let mut q = vec![0.0; FEATURE_DIM];
        q[1] = 1.0;
        q[2] = 0.5;
        let result = SimilarityScorer::default().score(&query(q), 0.0, &store).unwrap();
        let labels: Vec<_> = result.ranked.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["B", "C", "A"]);
        assert_eq!(result.predicted_label, "B");
        assert_eq!(result.score_map().len(), 3);
        assert!(result.ranked.windows(2).all(|w| w[0].score >= w[1].score));
        assert!((result.margin - (result.top_score - result.ranked[1].score)).abs() < 1e-15);
    }

    #[test]
    fn ties_break_by_label() {
        let store = store(&[("zeta", unit(1)), ("alpha", unit(0))]);
        let mut q = vec![0.0; FEATURE_DIM];
        q[0] = 1.0;
        q[1] = 1.0;
        let result = SimilarityScorer::default().score(&query(q), 0.0, &store).unwrap();
        assert_eq!(result.predicted_label, "alpha");
        assert_eq!(result.margin, 0.0);
    }

    #[test]
    fn single_prototype_has_zero_margin() {
        let store = store(&[("only", unit(0))]);
        let result = SimilarityScorer::default().score(&query(unit(0)), 0.0, &store).unwrap();
        assert_eq!(result.runner_up_score, None);
        assert_eq!(result.margin, 0.0);
        assert_eq!(result.top_score, 1.0);
        let expected = 1.0 / (1.0 + (-12.0_f64 * 0.1).exp());
        assert!((result.confidence - expected).abs() < 1e-12);
    }

    #[test]
    fn confidence_is_monotonic_and_bounded() {
        let scorer = SimilarityScorer::default();
        let mut previous = 0.0;
        for step in 0..=40 {
            let top = -1.0 + step as f64 * 0.05;
            let c = scorer.confidence(top, 0.0, 0.0);
            assert!((0.0..=1.0).contains(&c));
            assert!(c >= previous);
            previous = c;
        }
        assert!(scorer.confidence(0.95, 0.1, 0.0) >= scorer.confidence(0.95, 0.05, 0.0));
        assert!(scorer.confidence(0.95, 0.1, 0.02) >= scorer.confidence(0.95, 0.1, 0.3));
        assert!(scorer.is_low_confidence(scorer.confidence(0.5, 0.0, 0.0)));
        assert!(!scorer.is_low_confidence(scorer.confidence(0.99, 0.1, 0.02)));
    }

    #[test]
    fn summarize_reranks_adjusted_scores() {
        let scorer = SimilarityScorer::default();
        let result = scorer
            .summarize(
                vec![
                    RankedScore { label: "A".into(), score: 0.2 },
                    RankedScore { label: "B".into(), score: 0.9 },
                ],
                0.0,
            )
            .unwrap();
        assert_eq!(result.predicted_label, "B");
        assert!((result.margin - 0.7).abs() < 1e-12);
        assert!(scorer.summarize(Vec::new(), 0.0).is_err());
    }

    #[test]
    fn noisy_queries_lose_confidence_not_rank() {
        let scorer = SimilarityScorer::default();
        let ranked = vec![
            RankedScore { label: "A".into(), score: 0.93 },
            RankedScore { label: "B".into(), score: 0.80 },
        ];
        let clean = scorer.summarize(ranked.clone(), 0.02).unwrap();
        let noisy = scorer.summarize(ranked, 0.25).unwrap();
        assert_eq!(clean.predicted_label, noisy.predicted_label);
        assert_eq!(clean.margin, noisy.margin);
        assert_eq!(noisy.noise_ratio, 0.25);
        assert!(!scorer.is_low_confidence(clean.confidence));
        assert!(scorer.is_low_confidence(noisy.confidence));
    }

    #[test]
    fn scores_straddling_a_rounding_boundary_still_tie() {
        let scorer = SimilarityScorer::default();
        let boundary = 0.5 + 0.5e-9;
        let result = scorer
            .summarize(
                vec![
                    RankedScore { label: "b".into(), score: boundary + 1e-13 },
                    RankedScore { label: "a".into(), score: boundary - 1e-13 },
                    RankedScore { label: "c".into(), score: 0.4 },
                ],
                0.0,
            )
            .unwrap();
        let labels: Vec<_> = result.ranked.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
        assert_eq!(result.predicted_label, "a");
        assert_eq!(result.margin, 0.0);
    }

    #[test]
    fn scores_beyond_the_tolerance_keep_score_order() {
        let scorer = SimilarityScorer::default();
        let result = scorer
            .summarize(
                vec![
                    RankedScore { label: "a".into(), score: 0.5 },
                    RankedScore { label: "b".into(), score: 0.5 + 5e-9 },
                ],
                0.0,
            )
            .unwrap();
        assert_eq!(result.predicted_label, "b");
    }
}
