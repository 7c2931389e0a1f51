use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ---------------------------------------------------------------------------
// MetadataValue – a single cell in a metadata column
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value (class label, split name, replicate number, ...).
/// Used as a `BTreeMap` / `BTreeSet` key downstream, so it must be `Ord`.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use MetadataValue::*;
        fn rank(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
            }
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// Parse a textual cell (CSV, command line) into the narrowest matching type.
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return MetadataValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return MetadataValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return MetadataValue::Float(f);
        }
        if s == "true" || s == "false" {
            return MetadataValue::Bool(s == "true");
        }
        MetadataValue::String(s.to_string())
    }

    /// Interpret the value as a class label. `Null` has no label.
    pub fn as_label(&self) -> Option<String> {
        match self {
            MetadataValue::Null => None,
            other => Some(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// SpectrumRecord – one row of a labeled dataset
// ---------------------------------------------------------------------------

/// One unvalidated spectrum of a dataset together with its metadata.
#[derive(Debug, Clone)]
pub struct SpectrumRecord {
    /// Wavenumber axis (x).
    pub wavenumbers: Vec<f64>,
    /// Intensity axis (y) – same length as `wavenumbers` in well-formed files.
    pub intensities: Vec<f64>,
    /// Dynamic metadata columns: column_name → value.
    pub metadata: BTreeMap<String, MetadataValue>,
}

// ---------------------------------------------------------------------------
// SpectralDataset – the complete loaded dataset
// ---------------------------------------------------------------------------

/// A loaded dataset with pre-computed column indices.
#[derive(Debug, Clone)]
pub struct SpectralDataset {
    pub records: Vec<SpectrumRecord>,
    /// Sorted metadata column names (excludes x, y).
    pub column_names: Vec<String>,
    /// For each metadata column the sorted set of unique values.
    pub unique_values: BTreeMap<String, BTreeSet<MetadataValue>>,
}

impl SpectralDataset {
    /// Build column indices from the loaded records.
    pub fn from_records(records: Vec<SpectrumRecord>) -> Self {
        let mut column_names_set: BTreeSet<String> = BTreeSet::new();
        let mut unique_values: BTreeMap<String, BTreeSet<MetadataValue>> = BTreeMap::new();

        for record in &records {
            for (col, val) in &record.metadata {
                column_names_set.insert(col.clone());
                unique_values
                    .entry(col.clone())
                    .or_default()
                    .insert(val.clone());
            }
        }
        SpectralDataset {
            records,
            column_names: column_names_set.into_iter().collect(),
            unique_values,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.unique_values.contains_key(column)
    }

    /// Distinct labels found in `column`, sorted.
    pub fn labels(&self, column: &str) -> Vec<String> {
        self.unique_values
            .get(column)
            .map(|vals| vals.iter().filter_map(MetadataValue::as_label).collect())
            .unwrap_or_default()
    }
}
