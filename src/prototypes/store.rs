use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::features::{FeatureVector, FEATURE_DIM};

/// On-disk form of a prototype set, as written by the prototype builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrototypeSnapshot {
    /// Dataset split the centroids were computed from.
    #[serde(default)]
    pub split: Option<String>,
    pub feature_dim: usize,
    /// Number of spectra that contributed.
    #[serde(default)]
    pub num_samples: usize,
    /// Labels in sorted order; when present it must match the keys of `prototypes`.
    #[serde(default)]
    pub labels: Vec<String>,
    pub prototypes: BTreeMap<String, Vec<f64>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub display_names: BTreeMap<String, String>,
}

/// One class signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub label: String,
    pub vector: FeatureVector,
    pub display_name: Option<String>,
}

/// Read-only mapping label → prototype.
///
/// Built once at startup and shared behind an `Arc`; there is no way to mutate it afterwards,
/// so every request is scored against the same prototype set. Replacing the set means
/// loading a new snapshot into a new process.
#[derive(Debug, Clone)]
pub struct PrototypeStore {
    prototypes: BTreeMap<String, Prototype>,
}

impl PrototypeStore {
    /// Load and check a snapshot file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_label_map(path, None)
    }

    /// Load a snapshot and optionally a `{label: display_name}` JSON map whose entries
    /// override the snapshot's own display names.
    pub fn load_with_label_map(path: &Path, label_map: Option<&Path>) -> Result<Self> {
        let mut snapshot: PrototypeSnapshot = read_json(path)?;
        if let Some(map_path) = label_map {
            let names: BTreeMap<String, String> = read_json(map_path)?;
            snapshot.display_names.extend(names);
        }
        let store = Self::from_snapshot(snapshot)?;
        info!(
            "loaded {} prototypes from {}: {:?}",
            store.len(),
            path.display(),
            store.labels().collect::<Vec<_>>()
        );
        Ok(store)
    }

    /// Check a snapshot and turn it into a store.
    pub fn from_snapshot(snapshot: PrototypeSnapshot) -> Result<Self> {
        if snapshot.prototypes.is_empty() {
            return Err(integrity("snapshot contains no prototypes"));
        }
        if snapshot.feature_dim != FEATURE_DIM {
            return Err(integrity(format!(
                "snapshot feature_dim is {} but the extractor produces {FEATURE_DIM}",
                snapshot.feature_dim
            )));
        }
        if !snapshot.labels.is_empty() {
            let mut listed = snapshot.labels.clone();
            listed.sort();
            listed.dedup();
            let keys: Vec<String> = snapshot.prototypes.keys().cloned().collect();
            if listed != keys || listed.len() != snapshot.labels.len() {
                return Err(integrity(format!(
                    "label list {:?} does not match prototype keys {keys:?}",
                    snapshot.labels
                )));
            }
        }

        let mut display_names = snapshot.display_names;
        let mut prototypes = BTreeMap::new();
        for (label, values) in snapshot.prototypes {
            if label.trim().is_empty() {
                return Err(integrity("prototype with an empty label"));
            }
            let vector = FeatureVector::try_from(values.as_slice()).map_err(|len| {
                integrity(format!(
                    "prototype '{label}' has {len} values, expected {FEATURE_DIM}"
                ))
            })?;
            if !vector.is_finite() {
                return Err(integrity(format!(
                    "prototype '{label}' has a non-finite component"
                )));
            }
            if vector.norm() == 0.0 {
                return Err(integrity(format!("prototype '{label}' is the zero vector")));
            }
            let display_name = display_names.remove(&label);
            prototypes.insert(
                label.clone(),
                Prototype {
                    label,
                    vector,
                    display_name,
                },
            );
        }

        Ok(PrototypeStore { prototypes })
    }

    /// The full mapping, in label order. Never empty.
    pub fn lookup(&self) -> &BTreeMap<String, Prototype> {
        &self.prototypes
    }

    pub fn get(&self, label: &str) -> Option<&Prototype> {
        self.prototypes.get(label)
    }

    pub fn display_name(&self, label: &str) -> Option<&str> {
        self.prototypes.get(label)?.display_name.as_deref()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.prototypes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

fn integrity(reason: impl Into<String>) -> Error {
    Error::StartupIntegrity(reason.into())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| integrity(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| integrity(format!("malformed JSON in {}: {e}", path.display())))
}
