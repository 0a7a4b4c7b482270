use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, Utc};
use clap::{Parser, Subcommand};
use heater_events::FileEventPublisher;
use heater_learning::{
    Dataset, DatasetLoader, FeatureAnalyzer, HeaterPipeline, LookupTable, PipelineConfig,
    PipelineTelemetry,
};
use heater_logging::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "trn", version, about = "Heater classifier training and export pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the full pipeline for a configuration.
    Run(RunArgs),
    /// Validates a dataset and prints its feature analysis.
    Analyze {
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value_t = 0.6)]
        skew_threshold: f64,
    },
    /// Classifies one reading with an exported lookup table.
    Predict {
        #[arg(long)]
        table: PathBuf,
        #[arg(long)]
        temperature: f64,
        #[arg(long)]
        humidity: f64,
        #[arg(long)]
        light: f64,
    },
    /// Prints the default configuration as TOML.
    Config,
    /// Writes a synthetic readings CSV.
    Generate {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 60_000)]
        rows: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Lists most recent runs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "heater-ml/learning/logs/runs/index.jsonl")]
        manifest: PathBuf,
    },
    /// Shows one run of the manifest.
    Status {
        run_id: String,
        #[arg(long, default_value = "heater-ml/learning/logs/runs/index.jsonl")]
        manifest: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `dataset.path`.
    #[arg(long)]
    data: Option<PathBuf>,
    /// Overrides `export.out_dir`.
    #[arg(long)]
    out_dir: Option<PathBuf>,
    #[arg(long, default_value = "heater-ml/learning/logs")]
    log_dir: PathBuf,
    #[arg(long, default_value = "heater-ml/learning/logs/runs/index.jsonl")]
    manifest: PathBuf,
    #[arg(long)]
    event_log: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct RunManifestEntry {
    run_id: String,
    submitted_at: DateTime<Utc>,
    config: Option<PathBuf>,
    dataset: PathBuf,
    out_dir: PathBuf,
    log_path: PathBuf,
    status: String,
    #[serde(default)]
    selected: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(args),
        Commands::Analyze {
            data,
            skew_threshold,
        } => {
            let loaded = DatasetLoader::new(skew_threshold)
                .load(&data)
                .with_context(|| format!("loading dataset {}", data.display()))?;
            let analysis = FeatureAnalyzer.analyze(&loaded.dataset);
            let output = json!({
                "validation": loaded.summary,
                "analysis": analysis,
                "ranked_by_label_correlation": analysis.ranked_by_label_correlation(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::Predict {
            table,
            temperature,
            humidity,
            light,
        } => {
            let lookup = LookupTable::load(&table)
                .with_context(|| format!("loading lookup table {}", table.display()))?;
            let key = lookup.grid().key(&[temperature, humidity, light]);
            let label = lookup.get(key);
            let output = json!({
                "temperature": temperature,
                "humidity": humidity,
                "light": light,
                "bin": key,
                "heater": label,
                "state": if label == 1 { "ON" } else { "OFF" },
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Commands::Config => {
            print!("{}", PipelineConfig::default().to_toml_string()?);
            Ok(())
        }
        Commands::Generate { out, rows, seed } => {
            anyhow::ensure!(rows > 0, "rows must be positive");
            let dataset = Dataset::synthetic(rows, seed);
            dataset.write_csv(&out)?;
            let balance = dataset.class_balance();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "path": out,
                    "rows": rows,
                    "seed": seed,
                    "off": balance.off,
                    "on": balance.on,
                }))?
            );
            Ok(())
        }
        Commands::List { limit, manifest } => {
            let entries = read_manifest(&manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | {} | {}",
                    entry.run_id,
                    entry.status,
                    entry.submitted_at,
                    entry.selected.as_deref().unwrap_or("-"),
                    entry.out_dir.display()
                );
            }
            Ok(())
        }
        Commands::Status { run_id, manifest } => {
            let entries = read_manifest(&manifest)?;
            if let Some(entry) = entries.into_iter().find(|e| e.run_id == run_id) {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("run {run_id} not found");
            }
            Ok(())
        }
    }
}

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            anyhow::ensure!(path.exists(), "config file {} not found", path.display());
            PipelineConfig::load(path)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(data) = &args.data {
        config.dataset.path.clone_from(data);
    }
    if let Some(out_dir) = &args.out_dir {
        config.export.out_dir.clone_from(out_dir);
    }
    Ok(config)
}

fn handle_run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    anyhow::ensure!(
        config.dataset.path.exists(),
        "dataset {} not found",
        config.dataset.path.display()
    );

    let log_path = compute_log_path(&args.log_dir)?;
    let mut builder = PipelineTelemetry::builder("heater-learning").log_path(&log_path);
    if let Some(path) = &args.event_log {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    let telemetry = builder.build()?;

    let mut entry = RunManifestEntry {
        run_id: telemetry.run_id().to_string(),
        submitted_at: Utc::now(),
        config: args.config.clone(),
        dataset: config.dataset.path.clone(),
        out_dir: config.export.out_dir.clone(),
        log_path: log_path.clone(),
        status: "running".into(),
        selected: None,
    };
    append_manifest(&args.manifest, &entry)?;
    let _ = telemetry.log(
        LogLevel::Info,
        "run.started",
        json!({ "config": entry.config, "dataset": entry.dataset, "out_dir": entry.out_dir }),
    );

    match HeaterPipeline::new(config).run(Some(&telemetry)) {
        Ok(run) => {
            entry.status = "completed".into();
            entry.selected = Some(run.selected.clone());
            update_entry(&args.manifest, &entry)?;
            let export = run.report.export.as_ref();
            let summary = json!({
                "run_id": entry.run_id,
                "selected": run.selected,
                "kind": run.model.kind(),
                "evaluation": run.report.specifications.get(&run.selected).and_then(|s| s.evaluation.as_ref()),
                "strategy": export.map(|e| e.strategy),
                "fallback": export.and_then(|e| e.fallback.as_deref()),
                "report": run.report_paths.json,
                "log_path": entry.log_path,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(err) => {
            entry.status = "failed".into();
            update_entry(&args.manifest, &entry)?;
            let _ = telemetry.log(
                LogLevel::Error,
                "run.failed",
                json!({ "error": format!("{err:#}") }),
            );
            let _ = telemetry.event("pipeline.run.failed", json!({ "error": err.to_string() }));
            Err(err)
        }
    }
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!(
        "run-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn append_manifest(path: &Path, entry: &RunManifestEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Vec<RunManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: RunManifestEntry = serde_json::from_str(&line)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn update_entry(path: &Path, updated: &RunManifestEntry) -> Result<()> {
    let mut entries = read_manifest(path)?;
    let mut changed = false;
    for entry in &mut entries {
        if entry.run_id == updated.run_id {
            entry.clone_from(updated);
            changed = true;
        }
    }
    if !changed {
        return Ok(());
    }
    let mut file = File::create(path)?;
    for entry in entries {
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}
