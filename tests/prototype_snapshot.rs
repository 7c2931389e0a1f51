use std::sync::Arc;

use raman_proto::data::filter::parse_filters;
use raman_proto::data::loader::{load_dataset, load_spectrum_csv};
use raman_proto::prototypes::{build_prototypes, write_snapshot, BuildOptions};
use raman_proto::synthetic::{noise_spectrum, reference_dataset};
use raman_proto::{Classifier, EngineConfig, ErrorKind, PrototypeSnapshot, PrototypeStore};

fn built_snapshot() -> PrototypeSnapshot {
    let mut options = BuildOptions::new("label");
    options.filters = parse_filters(&["split=reference"]).unwrap();
    build_prototypes(&reference_dataset(7, 3), &options, &EngineConfig::default()).unwrap()
}

#[test]
fn built_snapshot_loads_and_classifies_its_own_references() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prototypes.json");
    write_snapshot(&path, &built_snapshot()).unwrap();

    let store = PrototypeStore::load(&path).unwrap();
    assert_eq!(store.labels().collect::<Vec<_>>(), vec!["A", "B", "C"]);
    let classifier = Classifier::new(Arc::new(store), &EngineConfig::default());

    let dataset = reference_dataset(7, 3);
    for record in &dataset.records {
        let result = classifier
            .classify_columns(&record.wavenumbers, &record.intensities)
            .unwrap();
        let expected = record.metadata["label"].to_string();
        assert_eq!(result.label, expected);
    }
}

#[test]
fn label_map_supplies_display_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prototypes.json");
    let map = dir.path().join("labels.json");
    write_snapshot(&path, &built_snapshot()).unwrap();
    std::fs::write(&map, r#"{"A": "Protein-rich", "C": "Lipid-rich"}"#).unwrap();

    let store = PrototypeStore::load_with_label_map(&path, Some(&map)).unwrap();
    assert_eq!(store.display_name("A"), Some("Protein-rich"));
    assert_eq!(store.display_name("B"), None);
    assert_eq!(store.display_name("C"), Some("Lipid-rich"));
}

#[test]
fn corrupted_snapshots_fail_startup() {
    let dir = tempfile::tempdir().unwrap();

    let mut short = built_snapshot();
    if let Some(vector) = short.prototypes.get_mut("B") {
        vector.pop();
    }
    let path = dir.path().join("short.json");
    std::fs::write(&path, serde_json::to_string(&short).unwrap()).unwrap();
    let err = PrototypeStore::load(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StartupIntegrity);
    assert!(!err.kind().is_per_request());

    let mut wrong_dim = built_snapshot();
    wrong_dim.feature_dim = 48;
    let path = dir.path().join("dim.json");
    std::fs::write(&path, serde_json::to_string(&wrong_dim).unwrap()).unwrap();
    assert_eq!(
        PrototypeStore::load(&path).unwrap_err().kind(),
        ErrorKind::StartupIntegrity
    );

    let path = dir.path().join("empty.json");
    std::fs::write(&path, r#"{"feature_dim": 47, "prototypes": {}}"#).unwrap();
    assert_eq!(
        PrototypeStore::load(&path).unwrap_err().kind(),
        ErrorKind::StartupIntegrity
    );
}

#[test]
fn datasets_and_spectra_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();

    let dataset = reference_dataset(11, 2);
    let rows: Vec<serde_json::Value> = dataset
        .records
        .iter()
        .map(|r| {
            serde_json::json!({
                "x": r.wavenumbers,
                "y": r.intensities,
                "label": r.metadata["label"].to_string(),
                "split": "reference",
            })
        })
        .collect();
    let json_path = dir.path().join("dataset.json");
    std::fs::write(&json_path, serde_json::to_string(&rows).unwrap()).unwrap();
    let loaded = load_dataset(&json_path).unwrap();
    assert_eq!(loaded.len(), 6);
    let snapshot =
        build_prototypes(&loaded, &BuildOptions::new("label"), &EngineConfig::default()).unwrap();
    assert_eq!(snapshot.num_samples, 6);

    let csv_path = dir.path().join("noise.csv");
    let mut text = String::from("Raman_Shift,Intensity\n");
    for (x, y) in noise_spectrum(1000) {
        text.push_str(&format!("{x},{y}\n"));
    }
    std::fs::write(&csv_path, text).unwrap();
    let spectrum = load_spectrum_csv(&csv_path).unwrap();
    assert_eq!(spectrum, noise_spectrum(1000));
}
