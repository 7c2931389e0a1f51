use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::error;
use serde_json::json;

use raman_proto::data::filter::parse_filters;
use raman_proto::data::loader::{load_dataset, load_spectrum_csv};
use raman_proto::pipeline::condition::SignalConditioner;
use raman_proto::pipeline::features::extract_features;
use raman_proto::pipeline::validate::SpectrumValidator;
use raman_proto::prototypes::{build_prototypes, write_snapshot, BuildOptions};
use raman_proto::{Classifier, EngineConfig, PrototypeStore};

/// Classify Raman spectra against class prototypes.
#[derive(Parser, Debug)]
#[command(name = "raman-proto", version, about)]
struct Cli {
    /// TOML configuration file layered over the defaults (RAMAN_* env vars override both)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify one spectrum CSV and print the result as JSON
    Classify {
        /// Prototype snapshot (JSON)
        #[arg(long)]
        prototypes: PathBuf,
        /// Optional {label: display name} JSON map
        #[arg(long)]
        label_map: Option<PathBuf>,
        /// Write a raw-vs-processed overlay PNG here
        #[arg(long)]
        plot: Option<PathBuf>,
        spectrum: PathBuf,
    },
    /// Print the named feature vector of one spectrum CSV
    Features { spectrum: PathBuf },
    /// Build a prototype snapshot from a labelled dataset
    BuildPrototypes {
        /// Dataset file (.parquet, .json or .csv)
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long, default_value = "label")]
        label_column: String,
        /// Row filter of the form COLUMN=VALUE, repeatable
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        max_samples: Option<usize>,
        /// Optional {label: display name} JSON map stored in the snapshot
        #[arg(long)]
        label_map: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Classify {
            prototypes,
            label_map,
            plot,
            spectrum,
        } => {
            let store = PrototypeStore::load_with_label_map(&prototypes, label_map.as_deref())?;
            let classifier = Classifier::new(Arc::new(store), &config);
            let pairs = load_spectrum_csv(&spectrum)?;

            let analysis = match classifier.analyze(&pairs) {
                Ok(analysis) => analysis,
                Err(e) => {
                    let body = json!({ "error": { "kind": e.kind().as_str(), "message": e.to_string() } });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    return Ok(ExitCode::from(2));
                }
            };

            let mut body = serde_json::to_value(&analysis.result)?;
            if let Some(path) = plot {
                let png = analysis
                    .render_plot(&config.plot)
                    .context("failed to render plot")?;
                std::fs::write(&path, png)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                body["plot"] = json!(path.display().to_string());
            }
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Features { spectrum } => {
            let pairs = load_spectrum_csv(&spectrum)?;
            let raw = SpectrumValidator::new(config.validator.clone()).validate(&pairs)?;
            let conditioned = SignalConditioner::new(config.conditioner.clone()).condition(&raw)?;
            let named: serde_json::Map<String, serde_json::Value> = extract_features(&conditioned)
                .named()
                .map(|(name, value)| (name.to_string(), json!(value)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&named)?);
        }
        Command::BuildPrototypes {
            dataset,
            label_column,
            filters,
            max_samples,
            label_map,
            out,
        } => {
            let data = load_dataset(&dataset)?;
            let mut options = BuildOptions::new(label_column);
            options.filters = parse_filters(&filters)?;
            options.max_samples = max_samples;
            if let Some(path) = label_map {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                options.display_names = serde_json::from_str::<BTreeMap<String, String>>(&text)
                    .with_context(|| format!("malformed label map {}", path.display()))?;
            }
            let snapshot = build_prototypes(&data, &options, &config)?;
            write_snapshot(&out, &snapshot)?;
            println!(
                "wrote {} prototypes ({} spectra) to {}",
                snapshot.prototypes.len(),
                snapshot.num_samples,
                out.display()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}
