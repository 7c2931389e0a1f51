use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Builder, Int64Array, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::Parser;
use log::info;
use parquet::arrow::ArrowWriter;

use raman_proto::data::model::MetadataValue;
use raman_proto::synthetic::{
    fingerprint_axis, reference_class, reference_dataset, synthesize, Acquisition, SimpleRng,
};

/// Write a synthetic labelled reference set and one query spectrum.
#[derive(Parser, Debug)]
#[command(name = "generate_sample", about)]
struct Args {
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    /// Acquisitions per class
    #[arg(long, default_value_t = 3)]
    replicates: usize,
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

fn list_array(rows: &[&[f64]]) -> arrow::array::ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        let values = builder.values();
        for &v in *row {
            values.append_value(v);
        }
        builder.append(true);
    }
    builder.finish()
}

fn text(value: Option<&MetadataValue>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    let dataset = reference_dataset(args.seed, args.replicates);
    let records = &dataset.records;

    let x_array = list_array(&records.iter().map(|r| r.wavenumbers.as_slice()).collect::<Vec<_>>());
    let y_array = list_array(&records.iter().map(|r| r.intensities.as_slice()).collect::<Vec<_>>());
    let labels: Vec<String> = records.iter().map(|r| text(r.metadata.get("label"))).collect();
    let splits: Vec<String> = records.iter().map(|r| text(r.metadata.get("split"))).collect();
    let replicates: Vec<i64> = records
        .iter()
        .map(|r| match r.metadata.get("replicate") {
            Some(MetadataValue::Integer(i)) => *i,
            _ => 0,
        })
        .collect();

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("y", DataType::List(item), false),
        Field::new("label", DataType::Utf8, false),
        Field::new("replicate", DataType::Int64, false),
        Field::new("split", DataType::Utf8, false),
    ]));

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(x_array),
            Arc::new(y_array),
            Arc::new(StringArray::from(labels)),
            Arc::new(Int64Array::from(replicates)),
            Arc::new(StringArray::from(splits)),
        ],
    )
    .context("failed to create record batch")?;

    let dataset_path = args.out_dir.join("reference_dataset.parquet");
    let file = std::fs::File::create(&dataset_path)
        .with_context(|| format!("failed to create {}", dataset_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    info!("wrote {} spectra to {}", records.len(), dataset_path.display());

    // A fresh acquisition of class A under a different instrument response.
    let axis = fingerprint_axis();
    let query = Acquisition {
        gain: 1234.0,
        background: [0.5, -0.2, 0.3],
        noise: 0.02,
    };
    let peaks = reference_class("A").map(|c| c.peaks.to_vec()).unwrap_or_default();
    let intensities = synthesize(&axis, &peaks, &query, &mut SimpleRng::new(args.seed + 92));

    let query_path = args.out_dir.join("query_spectrum.csv");
    let mut csv = csv::Writer::from_path(&query_path)
        .with_context(|| format!("failed to create {}", query_path.display()))?;
    csv.write_record(["wavenumber", "intensity"])?;
    for (x, y) in axis.iter().zip(&intensities) {
        csv.write_record([x.to_string(), y.to_string()])?;
    }
    csv.flush()?;

    println!(
        "Wrote {} reference spectra ({} wavenumbers each) to {} and a class A query to {}",
        records.len(),
        axis.len(),
        dataset_path.display(),
        query_path.display()
    );
    Ok(())
}
