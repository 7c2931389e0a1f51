use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use rayon::prelude::*;

use super::store::PrototypeSnapshot;
use crate::config::EngineConfig;
use crate::data::filter::{filtered_indices, FilterState};
use crate::data::model::SpectralDataset;
use crate::pipeline::condition::SignalConditioner;
use crate::pipeline::features::{extract_features, FeatureVector, FEATURE_DIM};
use crate::pipeline::validate::SpectrumValidator;

/// Centroids are scaled by `1 / (‖c‖ + ε)`.
pub const CENTROID_EPSILON: f64 = 1e-12;

/// Which records contribute and how they are labelled.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Metadata column holding the class label.
    pub label_column: String,
    /// Row selection, e.g. `split=reference`. Empty keeps every record.
    pub filters: FilterState,
    /// Use at most this many selected records, in dataset order.
    pub max_samples: Option<usize>,
    pub display_names: BTreeMap<String, String>,
}

impl BuildOptions {
    pub fn new(label_column: impl Into<String>) -> Self {
        BuildOptions {
            label_column: label_column.into(),
            filters: FilterState::new(),
            max_samples: None,
            display_names: BTreeMap::new(),
        }
    }
}

/// Compute one L2-normalized mean feature vector per label.
///
/// Records run through the same validate → condition → extract chain as classification,
/// in parallel. Records the chain rejects are skipped with a warning.
pub fn build_prototypes(
    dataset: &SpectralDataset,
    options: &BuildOptions,
    config: &EngineConfig,
) -> Result<PrototypeSnapshot> {
    if !dataset.has_column(&options.label_column) {
        bail!("dataset has no '{}' column", options.label_column);
    }
    let mut selected = filtered_indices(dataset, &options.filters);
    if let Some(max) = options.max_samples {
        selected.truncate(max);
    }
    if selected.is_empty() {
        bail!("no records match the filters");
    }

    let validator = SpectrumValidator::new(config.validator.clone());
    let conditioner = SignalConditioner::new(config.conditioner.clone());

    let extracted: Vec<(String, Option<FeatureVector>)> = selected
        .par_iter()
        .map(|&idx| -> Result<(String, Option<FeatureVector>)> {
            let record = &dataset.records[idx];
            let label = record
                .metadata
                .get(&options.label_column)
                .and_then(|v| v.as_label())
                .ok_or_else(|| {
                    anyhow!("record {idx} has no value in '{}'", options.label_column)
                })?;
            let features = validator
                .validate_columns(&record.wavenumbers, &record.intensities)
                .and_then(|raw| conditioner.condition(&raw))
                .map(|conditioned| extract_features(&conditioned));
            match features {
                Ok(features) => Ok((label, Some(features))),
                Err(e) => {
                    warn!("skipping record {idx} ({label}): {e}");
                    Ok((label, None))
                }
            }
        })
        .collect::<Result<_>>()?;

    let mut sums: BTreeMap<String, ([f64; FEATURE_DIM], usize)> = BTreeMap::new();
    let mut skipped = 0usize;
    for (label, features) in extracted {
        let Some(features) = features else {
            skipped += 1;
            continue;
        };
        let (sum, count) = sums.entry(label).or_insert(([0.0; FEATURE_DIM], 0));
        for (s, v) in sum.iter_mut().zip(features.as_slice()) {
            *s += v;
        }
        *count += 1;
    }
    if sums.is_empty() {
        bail!("none of the {} selected records produced features", selected.len());
    }

    let num_samples: usize = sums.values().map(|(_, count)| count).sum();
    let prototypes: BTreeMap<String, Vec<f64>> = sums
        .into_iter()
        .map(|(label, (sum, count))| {
            let mean = FeatureVector::from_array(sum.map(|s| s / count as f64));
            (label, mean.l2_normalized(CENTROID_EPSILON).as_slice().to_vec())
        })
        .collect();
    let labels: Vec<String> = prototypes.keys().cloned().collect();
    info!(
        "built {} prototypes from {num_samples} spectra ({skipped} skipped): {labels:?}",
        labels.len()
    );

    let split = options
        .filters
        .get("split")
        .filter(|values| values.len() == 1)
        .and_then(|values| values.iter().next())
        .and_then(|v| v.as_label());
    let display_names = options
        .display_names
        .iter()
        .filter(|(label, _)| prototypes.contains_key(*label))
        .map(|(l, n)| (l.clone(), n.clone()))
        .collect();

    Ok(PrototypeSnapshot {
        split,
        feature_dim: FEATURE_DIM,
        num_samples,
        labels,
        prototypes,
        display_names,
    })
}

/// Write a snapshot as pretty-printed JSON.
pub fn write_snapshot(path: &Path, snapshot: &PrototypeSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write prototypes to {}", path.display()))?;
    info!("wrote {} prototypes to {}", snapshot.prototypes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::parse_filters;
    use crate::data::model::{MetadataValue, SpectrumRecord};
    use crate::prototypes::PrototypeStore;
    use crate::synthetic::reference_dataset;

    #[test]
    fn builds_unit_norm_centroids_per_label() {
        let dataset = reference_dataset(7, 3);
        let snapshot =
            build_prototypes(&dataset, &BuildOptions::new("label"), &EngineConfig::default())
                .unwrap();
        assert_eq!(snapshot.labels, vec!["A", "B", "C"]);
        assert_eq!(snapshot.num_samples, 9);
        assert_eq!(snapshot.split.as_deref(), None);
        for vector in snapshot.prototypes.values() {
            let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
        PrototypeStore::from_snapshot(snapshot).unwrap();
    }

    #[test]
    fn filters_and_caps_records() {
        let dataset = reference_dataset(7, 2);
        let mut options = BuildOptions::new("label");
        options.filters = parse_filters(&["split=reference", "label=B"]).unwrap();
        options.display_names = BTreeMap::from([
            ("B".to_string(), "Nucleic acid".to_string()),
            ("Z".to_string(), "unused".to_string()),
        ]);
        let snapshot = build_prototypes(&dataset, &options, &EngineConfig::default()).unwrap();
        assert_eq!(snapshot.labels, vec!["B"]);
        assert_eq!(snapshot.split.as_deref(), Some("reference"));
        assert_eq!(snapshot.display_names.len(), 1);

        options.filters = FilterState::new();
        options.max_samples = Some(1);
        let snapshot = build_prototypes(&dataset, &options, &EngineConfig::default()).unwrap();
        assert_eq!(snapshot.num_samples, 1);
    }

    #[test]
    fn skips_unusable_records() {
        let mut dataset = reference_dataset(7, 1);
        dataset.records.push(SpectrumRecord {
            wavenumbers: vec![1.0, 2.0],
            intensities: vec![1.0, 2.0],
            metadata: BTreeMap::from([("label".into(), MetadataValue::String("A".into()))]),
        });
        let dataset = SpectralDataset::from_records(dataset.records);
        let snapshot =
            build_prototypes(&dataset, &BuildOptions::new("label"), &EngineConfig::default())
                .unwrap();
        assert_eq!(snapshot.num_samples, 3);
    }

    #[test]
    fn fails_without_label_column_or_usable_records() {
        let dataset = reference_dataset(7, 1);
        assert!(
            build_prototypes(&dataset, &BuildOptions::new("species"), &EngineConfig::default())
                .is_err()
        );

        let broken = SpectralDataset::from_records(vec![SpectrumRecord {
            wavenumbers: vec![1.0],
            intensities: vec![1.0],
            metadata: BTreeMap::from([("label".into(), MetadataValue::String("A".into()))]),
        }]);
        assert!(
            build_prototypes(&broken, &BuildOptions::new("label"), &EngineConfig::default())
                .is_err()
        );
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dataset = reference_dataset(3, 1);
        let snapshot =
            build_prototypes(&dataset, &BuildOptions::new("label"), &EngineConfig::default())
                .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prototypes.json");
        write_snapshot(&path, &snapshot).unwrap();
        let store = PrototypeStore::load(&path).unwrap();
        assert_eq!(store.len(), 3);
    }
}
