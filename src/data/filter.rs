use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};

use super::model::{MetadataValue, SpectralDataset};

// ---------------------------------------------------------------------------
// Filter predicate: which unique values are selected per column
// ---------------------------------------------------------------------------

/// Per-column selection state: maps column_name → set of selected values.
/// A column absent from the map is unconstrained.
pub type FilterState = BTreeMap<String, BTreeSet<MetadataValue>>;

/// Initialise a [`FilterState`] with all values selected (i.e., keep everything).
pub fn init_filter_state(dataset: &SpectralDataset) -> FilterState {
    dataset
        .unique_values
        .iter()
        .map(|(col, vals)| (col.clone(), vals.clone()))
        .collect()
}

/// Parse `column=value` expressions into a [`FilterState`]. Repeating a column ORs its values.
pub fn parse_filters<S: AsRef<str>>(expressions: &[S]) -> Result<FilterState> {
    let mut filters = FilterState::new();
    for expr in expressions {
        let expr = expr.as_ref();
        let Some((column, value)) = expr.split_once('=') else {
            bail!("filter '{expr}' is not of the form column=value");
        };
        let column = column.trim();
        if column.is_empty() {
            bail!("filter '{expr}' has an empty column name");
        }
        filters
            .entry(column.to_string())
            .or_default()
            .insert(MetadataValue::parse(value.trim()));
    }
    Ok(filters)
}

/// Return indices of records that pass all active filters.
///
/// A record passes a column filter when:
/// * The column is not present in `filters` → passes (no constraint)
/// * The filter set for that column is empty → nothing selected → fails
/// * The record's value for that column is in the selected set → passes
/// * The record lacks the column → passes only if `Null` is selected
pub fn filtered_indices(dataset: &SpectralDataset, filters: &FilterState) -> Vec<usize> {
    dataset
        .records
        .iter()
        .enumerate()
        .filter(|(_, record)| {
            filters.iter().all(|(col, selected)| {
                if selected.is_empty() {
                    return false;
                }
                if let Some(all_vals) = dataset.unique_values.get(col) {
                    if selected.is_superset(all_vals) && record.metadata.contains_key(col) {
                        return true;
                    }
                }
                match record.metadata.get(col) {
                    Some(val) => selected.contains(val),
                    None => selected.contains(&MetadataValue::Null),
                }
            })
        })
        .map(|(i, _)| i)
        .collect()
}
