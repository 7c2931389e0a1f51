use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeListArray, ListArray, StringArray,
};
use arrow::datatypes::DataType;
use log::info;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{MetadataValue, SpectralDataset, SpectrumRecord};

/// Header names accepted for the wavenumber column of a single-spectrum CSV, by priority.
pub const WAVENUMBER_COLUMNS: [&str; 6] = [
    "wavelength",
    "wavenumber",
    "ramanshift",
    "raman_shift",
    "shift",
    "x",
];

/// Header names accepted for the intensity column of a single-spectrum CSV, by priority.
pub const INTENSITY_COLUMNS: [&str; 3] = ["intensity", "y", "signal"];

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a labeled spectral dataset from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – Parquet file with `x` and `y` list columns (recommended)
/// * `.json`    – `[{ "x": [...], "y": [...], "label": "A", ...meta }, ...]`
/// * `.csv`     – columns `x` and `y` containing semicolon-separated floats
pub fn load_dataset(path: &Path) -> Result<SpectralDataset> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let dataset = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported dataset extension: .{other}"),
    }?;
    info!(
        "loaded {} spectra from {} ({} metadata columns)",
        dataset.len(),
        path.display(),
        dataset.column_names.len()
    );
    Ok(dataset)
}

/// Load one spectrum from a two-column CSV file as `(wavenumber, intensity)` pairs.
pub fn load_spectrum_csv(path: &Path) -> Result<Vec<(f64, f64)>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening spectrum {}", path.display()))?;
    parse_spectrum_csv(file).with_context(|| format!("parsing spectrum {}", path.display()))
}

/// Parse a single-spectrum CSV.
///
/// Column names are matched case-insensitively against [`WAVENUMBER_COLUMNS`] and
/// [`INTENSITY_COLUMNS`]. Rows with an empty cell in either column are skipped; anything
/// else that does not parse as a number is an error.
pub fn parse_spectrum_csv<R: Read>(reader: R) -> Result<Vec<(f64, f64)>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let find = |candidates: &[&str]| {
        candidates
            .iter()
            .find_map(|c| headers.iter().position(|h| h == *c))
    };
    let wavenumber_column = find(&WAVENUMBER_COLUMNS[..]);
    let intensity_column = find(&INTENSITY_COLUMNS[..]);
    let (Some(x_idx), Some(y_idx)) = (wavenumber_column, intensity_column) else {
        bail!(
            "CSV must include wavelength/wavenumber and intensity columns, found: {headers:?}"
        );
    };

    let mut pairs = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let x = record.get(x_idx).unwrap_or("");
        let y = record.get(y_idx).unwrap_or("");
        if x.is_empty() || y.is_empty() {
            continue;
        }
        let x: f64 = x
            .parse()
            .with_context(|| format!("Row {row_no}: '{x}' is not a number"))?;
        let y: f64 = y
            .parse()
            .with_context(|| format!("Row {row_no}: '{y}' is not a number"))?;
        pairs.push((x, y));
    }
    Ok(pairs)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<SpectralDataset> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let rows = root.as_array().context("Expected top-level JSON array")?;

    let mut records = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let obj = row
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let wavenumbers = json_array_to_f64(obj.get("x"), i, "x")?;
        let intensities = json_array_to_f64(obj.get("y"), i, "y")?;

        if wavenumbers.len() != intensities.len() {
            bail!(
                "Row {i}: x has {} values but y has {}",
                wavenumbers.len(),
                intensities.len()
            );
        }

        let metadata = obj
            .iter()
            .filter(|(key, _)| *key != "x" && *key != "y")
            .map(|(key, val)| (key.clone(), json_to_metadata(val)))
            .collect();

        records.push(SpectrumRecord {
            wavenumbers,
            intensities,
            metadata,
        });
    }

    Ok(SpectralDataset::from_records(records))
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names.
/// `x` and `y` columns contain semicolon-separated floats:
///   `"600.0;602.0;604.0"`, `"0.12;0.14;0.11"`
/// All other columns are treated as metadata.
fn load_csv(path: &Path) -> Result<SpectralDataset> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let x_idx = headers
        .iter()
        .position(|h| h == "x")
        .context("CSV missing 'x' column")?;
    let y_idx = headers
        .iter()
        .position(|h| h == "y")
        .context("CSV missing 'y' column")?;

    let mut records = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let wavenumbers = parse_semicolon_floats(record.get(x_idx).unwrap_or(""), row_no, "x")?;
        let intensities = parse_semicolon_floats(record.get(y_idx).unwrap_or(""), row_no, "y")?;

        if wavenumbers.len() != intensities.len() {
            bail!(
                "CSV row {row_no}: x has {} values but y has {}",
                wavenumbers.len(),
                intensities.len()
            );
        }

        let metadata = record
            .iter()
            .enumerate()
            .filter(|(col_idx, _)| *col_idx != x_idx && *col_idx != y_idx)
            .map(|(col_idx, value)| (headers[col_idx].clone(), MetadataValue::parse(value)))
            .collect();

        records.push(SpectrumRecord {
            wavenumbers,
            intensities,
            metadata,
        });
    }

    Ok(SpectralDataset::from_records(records))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file containing spectral data.
///
/// Expected schema:
/// - `x`: List<Float64> or LargeList<Float64> – wavenumber arrays
/// - `y`: List<Float64> or LargeList<Float64> – intensity arrays
/// - Any other columns are treated as metadata (strings, ints, floats, bools)
fn load_parquet(path: &Path) -> Result<SpectralDataset> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut records = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let x_idx = schema
            .index_of("x")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'x' column"))?;
        let y_idx = schema
            .index_of("y")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'y' column"))?;

        let x_col = batch.column(x_idx);
        let y_col = batch.column(y_idx);

        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != x_idx && *i != y_idx)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..batch.num_rows() {
            let wavenumbers = extract_f64_list(x_col, row)
                .with_context(|| format!("Row {row}: failed to read 'x'"))?;
            let intensities = extract_f64_list(y_col, row)
                .with_context(|| format!("Row {row}: failed to read 'y'"))?;

            if wavenumbers.len() != intensities.len() {
                bail!(
                    "Row {row}: x has {} values but y has {}",
                    wavenumbers.len(),
                    intensities.len()
                );
            }

            let metadata: BTreeMap<String, MetadataValue> = meta_cols
                .iter()
                .map(|(col_idx, col_name)| {
                    (col_name.clone(), extract_metadata_value(batch.column(*col_idx), row))
                })
                .collect();

            records.push(SpectrumRecord {
                wavenumbers,
                intensities,
                metadata,
            });
        }
    }

    Ok(SpectralDataset::from_records(records))
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
/// Null list entries become NaN so the validator can point at them.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row),
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr
            .iter()
            .map(|v| v.map_or(f64::NAN, f64::from))
            .collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    match col.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map_or(MetadataValue::Null, |s| MetadataValue::String(s.value(row).to_string())),
        DataType::LargeUtf8 => {
            MetadataValue::String(col.as_string::<i64>().value(row).to_string())
        }
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(i64::from(a.value(row)))),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(f64::from(a.value(row)))),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Bool(a.value(row))),
        other => MetadataValue::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectrum_csv_detects_columns_case_insensitively() {
        let text = "Raman_Shift , Intensity,comment\n600,1.5,a\n602,1.75,b\n,2.0,skip\n604,2.25,c\n";
        let pairs = parse_spectrum_csv(text.as_bytes()).unwrap();
        assert_eq!(pairs, vec![(600.0, 1.5), (602.0, 1.75), (604.0, 2.25)]);
    }

    #[test]
    fn spectrum_csv_prefers_wavenumber_names_by_priority() {
        let text = "x,wavenumber,signal\n1,600,0.5\n2,602,0.6\n";
        let pairs = parse_spectrum_csv(text.as_bytes()).unwrap();
        assert_eq!(pairs, vec![(600.0, 0.5), (602.0, 0.6)]);
    }

    #[test]
    fn spectrum_csv_without_known_columns_fails() {
        let text = "time,value\n1,2\n";
        let err = parse_spectrum_csv(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("wavelength/wavenumber"));
    }

    #[test]
    fn spectrum_csv_rejects_garbage_numbers() {
        let text = "wavenumber,intensity\n600,abc\n";
        assert!(parse_spectrum_csv(text.as_bytes()).is_err());
    }

    #[test]
    fn json_dataset_round_trips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.json");
        std::fs::write(
            &path,
            r#"[{"x": [1.0, 2.0], "y": [3.0, 4.0], "label": "A", "replicate": 2},
                {"x": [1.0, 2.0], "y": [5.0, 6.0], "label": "B", "replicate": 0.5}]"#,
        )
        .unwrap();

        let dataset = load_dataset(&path).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records[1].intensities, vec![5.0, 6.0]);
        assert_eq!(
            dataset.records[0].metadata["replicate"],
            MetadataValue::Integer(2)
        );
        assert_eq!(dataset.labels("label"), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn csv_dataset_splits_semicolon_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.csv");
        std::fs::write(&path, "x,y,label\n\"1;2;3\",\"0.1;0.2;0.3\",C\n").unwrap();

        let dataset = load_dataset(&path).unwrap();
        assert_eq!(dataset.records[0].wavenumbers, vec![1.0, 2.0, 3.0]);
        assert_eq!(
            dataset.records[0].metadata["label"],
            MetadataValue::String("C".into())
        );
    }

    #[test]
    fn parquet_dataset_reads_list_columns_and_metadata() {
        use arrow::array::{Float64Builder, ListBuilder};
        use arrow::datatypes::{Field, Schema};
        use arrow::record_batch::RecordBatch;
        use parquet::arrow::ArrowWriter;

        let list = |rows: &[&[f64]]| {
            let mut builder = ListBuilder::new(Float64Builder::new());
            for row in rows {
                builder.values().append_slice(row);
                builder.append(true);
            }
            builder.finish()
        };
        let item = Arc::new(Field::new("item", DataType::Float64, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::List(item.clone()), false),
            Field::new("y", DataType::List(item), false),
            Field::new("label", DataType::Utf8, false),
            Field::new("replicate", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(list(&[&[600.0, 602.0], &[600.0, 602.0]])),
                Arc::new(list(&[&[1.0, 2.0], &[3.0, 4.0]])),
                Arc::new(StringArray::from(vec!["A", "B"])),
                Arc::new(Int64Array::from(vec![0, 1])),
            ],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.parquet");
        let mut writer =
            ArrowWriter::try_new(std::fs::File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let dataset = load_dataset(&path).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records[1].wavenumbers, vec![600.0, 602.0]);
        assert_eq!(dataset.records[1].intensities, vec![3.0, 4.0]);
        assert_eq!(
            dataset.records[1].metadata["replicate"],
            MetadataValue::Integer(1)
        );
        assert_eq!(dataset.labels("label"), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(load_dataset(Path::new("spectra.xlsx")).is_err());
    }
}
