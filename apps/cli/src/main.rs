use anyhow::{Context, Result};
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use dermascan_inference::{
    AssetLocation, ConditionKind, EngineConfig, HistorySink, LocalHistory, ModelStatus,
    Prediction, ScanEngine, ScanImage, ScanRecord, TOP_K, condition_id,
};
use dotenv::dotenv;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dermascan", version, about = "Classify skin photos with an on-device model")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model directory or base URL, overrides config and DERMASCAN_ASSETS
    #[arg(long, global = true)]
    assets: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the model and report whether it is ready
    WarmUp,
    /// Print the label table with derived ids
    Labels,
    /// Classify one or more images and print the predictions as JSON
    Scan {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Record the top prediction of each successful scan
        #[arg(long)]
        save: bool,
        /// Number of predictions per image, 1 to 3
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..=TOP_K as u64))]
        top_k: Option<usize>,
    },
    /// Print saved scans as JSON
    History,
}

#[derive(Serialize)]
struct PredictionOutput {
    #[serde(flatten)]
    prediction: Prediction,
    kind: ConditionKind,
}

#[derive(Serialize)]
struct ScanOutput {
    image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    predictions: Vec<PredictionOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved: Option<ScanRecord>,
}

#[derive(Serialize)]
struct LabelOutput<'a> {
    index: usize,
    label: &'a str,
    id: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _tracing = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .try_init();

    let cli = Cli::parse();
    let mut config = EngineConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(assets) = &cli.assets {
        config = config.with_assets(AssetLocation::parse(assets));
    }

    match cli.command {
        Command::WarmUp => warm_up(&config).await,
        Command::Labels => labels(&config).await,
        Command::Scan {
            images,
            save,
            top_k,
        } => {
            if let Some(top_k) = top_k {
                config = config.with_top_k(top_k);
            }
            scan(&config, &images, save).await
        }
        Command::History => history(&config).await,
    }
}

async fn warm_up(config: &EngineConfig) -> Result<ExitCode> {
    let engine = ScanEngine::from_config(config)?;
    let result = engine.spawn_warm_up().await?;

    match (result, engine.store().status()) {
        (Ok(()), ModelStatus::Ready) => {
            println!("ready");
            Ok(ExitCode::SUCCESS)
        }
        (Err(e), _) => {
            eprintln!("{}", e.user_message());
            tracing::error!("Warm-up failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
        (Ok(()), status) => {
            eprintln!("Model not ready: {status:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn labels(config: &EngineConfig) -> Result<ExitCode> {
    let engine = ScanEngine::from_config(config)?;
    let handle = engine
        .store()
        .ensure_ready()
        .await
        .context("Failed to load model")?;

    let labels: Vec<_> = handle
        .labels()
        .iter()
        .enumerate()
        .map(|(index, label)| LabelOutput {
            index,
            label,
            id: condition_id(label),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&labels)?);
    Ok(ExitCode::SUCCESS)
}

async fn scan(config: &EngineConfig, images: &[PathBuf], save: bool) -> Result<ExitCode> {
    let engine = ScanEngine::from_config(config)?;
    let sink = save.then(|| LocalHistory::new(&config.history_dir));

    let mut outputs = Vec::with_capacity(images.len());
    let mut failed = false;
    for path in images {
        let output = scan_one(&engine, sink.as_ref(), path).await;
        failed |= output.error.is_some();
        outputs.push(output);
    }

    println!("{}", serde_json::to_string_pretty(&outputs)?);
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn scan_one(engine: &ScanEngine, sink: Option<&LocalHistory>, path: &Path) -> ScanOutput {
    let mut output = ScanOutput {
        image: path.display().to_string(),
        predictions: Vec::new(),
        error: None,
        saved: None,
    };

    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            output.error = Some(format!("Could not read file: {e}"));
            return output;
        }
    };

    let predictions = match engine.perform_scan(bytes.clone()).await {
        Ok(predictions) => predictions,
        Err(e) => {
            tracing::warn!("Scan of {} failed: {}", path.display(), e);
            output.error = Some(e.user_message().to_string());
            return output;
        }
    };

    if let (Some(sink), Some(best)) = (sink, predictions.first()) {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image");
        let image = ScanImage {
            file_name,
            bytes: &bytes,
        };
        match sink.save(&image, best).await {
            Ok(record) => output.saved = Some(record),
            Err(e) => output.error = Some(format!("Failed to save scan: {e}")),
        }
    }

    output.predictions = predictions
        .into_iter()
        .map(|prediction| PredictionOutput {
            kind: prediction.kind(),
            prediction,
        })
        .collect();
    output
}

async fn history(config: &EngineConfig) -> Result<ExitCode> {
    let records = LocalHistory::new(&config.history_dir)
        .load()
        .await
        .with_context(|| format!("Failed to read history in {}", config.history_dir.display()))?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_command() {
        let cli = Cli::parse_from([
            "dermascan",
            "--assets",
            "https://cdn.example.com/model",
            "scan",
            "a.jpg",
            "b.png",
            "--save",
            "--top-k",
            "2",
        ]);
        assert_eq!(cli.assets.as_deref(), Some("https://cdn.example.com/model"));
        match cli.command {
            Command::Scan {
                images,
                save,
                top_k,
            } => {
                assert_eq!(images, [PathBuf::from("a.jpg"), PathBuf::from("b.png")]);
                assert!(save);
                assert_eq!(top_k, Some(2));
            }
            other => panic!("Expected scan, got {other:?}"),
        }
    }

    #[test]
    fn top_k_outside_one_to_three_is_rejected() {
        for value in ["0", "4", "25"] {
            let parsed = Cli::try_parse_from(["dermascan", "scan", "a.jpg", "--top-k", value]);
            assert!(parsed.is_err(), "--top-k {value} should not parse");
        }
    }

    #[test]
    fn scan_requires_an_image() {
        assert!(Cli::try_parse_from(["dermascan", "scan"]).is_err());
    }

    #[test]
    fn prediction_output_is_flat() {
        let output = PredictionOutput {
            prediction: Prediction::new("Vi Shingles", 0.5),
            kind: ConditionKind::Other,
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["condition"], "Vi Shingles");
        assert_eq!(json["id"], "vi_shingles");
        assert_eq!(json["kind"], "other");
    }
}
