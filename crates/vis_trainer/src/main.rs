//! Mesh visibility CLI
//!
//! `train` fits the scaler and classifier on a directory of labelled CSVs,
//! `predict` writes `Predicted_*` files for a directory of new CSVs and
//! `inspect` prints what a pair of artifacts contains.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use meshvis_core::artifacts::read_hash;
use meshvis_core::{load_artifacts, ArtifactPaths, PipelineConfig};
use meshvis_trainer::{ErrorPolicy, Predictor, TrainMode, Trainer};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "meshvis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Per-vertex visibility classifier for mesh observation CSVs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train on every CSV in a directory and overwrite the artifacts
    Train(TrainArgs),
    /// Write predictions for every CSV in a directory
    Predict(PredictArgs),
    /// Show the contents of an artifact directory
    Inspect {
        /// Directory holding scaler.json and model.json
        #[arg(short, long)]
        artifacts: PathBuf,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Directory of labelled CSV files
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for the scaler and model artifacts
    #[arg(short, long, default_value = "artifacts")]
    artifacts: PathBuf,

    /// Continue training the existing model instead of starting over
    #[arg(long)]
    resume: bool,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Seed for weight initialization and shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Directory of CSV files to score
    #[arg(short, long)]
    input: PathBuf,

    /// Directory holding the trained artifacts
    #[arg(short, long, default_value = "artifacts")]
    artifacts: PathBuf,

    /// Stop at the first file that fails
    #[arg(long)]
    fail_fast: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid MESHVIS_* environment override")?;
    Ok(config)
}

fn train(args: TrainArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(seed) = args.seed {
        config.classifier.seed = seed;
    }
    config.validate().context("Invalid configuration")?;

    let mode = if args.resume {
        TrainMode::Resume
    } else {
        TrainMode::Fresh
    };

    info!("Training configuration:");
    info!("  Mode: {:?}", mode);
    info!("  Epochs: {}", config.training.epochs);
    info!("  Batch size: {}", config.training.batch_size);
    info!("  Vertex slots: {}", config.encoder.width);
    info!("  Learning rate: {}", config.classifier.learning_rate);
    info!("  Seed: {}", config.classifier.seed);
    info!("═══════════════════════════════════════════");

    let paths = ArtifactPaths::new(&args.artifacts);
    let report = Trainer::new(config, mode)
        .run(&args.input, &paths)
        .context("Training failed")?;

    for (epoch, loss) in report.history.losses.iter().enumerate() {
        info!("  Epoch {}: loss={:.6}", epoch + 1, loss);
    }
    info!("═══════════════════════════════════════════");
    info!("✓ Training completed successfully");
    info!("  Files: {}", report.files.len());
    info!("  Samples: {} ({} features)", report.samples, report.features);
    info!("  Epochs trained: {}", report.epochs_trained);
    info!("  Scaler: {} ({})", paths.scaler().display(), report.scaler_hash);
    info!("  Model: {} ({})", paths.model().display(), report.model_hash);
    Ok(())
}

fn predict(args: PredictArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let policy = if args.fail_fast {
        ErrorPolicy::FailFast
    } else {
        ErrorPolicy::ContinueOnError
    };

    let predictor = Predictor::load(&ArtifactPaths::new(&args.artifacts), config)
        .context("Failed to load artifacts")?;
    let report = predictor
        .predict_dir(&args.input, policy)
        .context("Prediction failed")?;

    info!("═══════════════════════════════════════════");
    for path in &report.written {
        info!("  Wrote {}", path.display());
    }
    for failure in &report.failed {
        error!("  Failed {}: {}", failure.path.display(), failure.error);
    }
    if !report.is_success() {
        bail!(
            "{} of {} files failed",
            report.failed.len(),
            report.failed.len() + report.written.len()
        );
    }
    info!("✓ Prediction completed: {} files", report.written.len());
    Ok(())
}

fn inspect(artifacts: PathBuf) -> Result<()> {
    let paths = ArtifactPaths::new(&artifacts);
    let (scaler, model) = load_artifacts(&paths).context("Failed to load artifacts")?;

    println!("artifacts: {}", artifacts.display());
    println!("scaler hash: {}", read_hash(&paths.scaler_hash())?);
    println!("model hash: {}", read_hash(&paths.model_hash())?);
    println!("connectivity column: {}", scaler.schema.connectivity_column);
    println!(
        "vertex slots: {} (pad '{}')",
        scaler.schema.width, scaler.schema.pad_value
    );
    println!("passthrough columns: {}", scaler.schema.passthrough.join(", "));
    println!("features: {}", scaler.schema.feature_count());
    println!("samples seen by scaler: {}", scaler.scaler.samples_seen);
    println!("epochs trained: {}", model.classifier.epochs_trained());
    println!(
        "classifier: {}",
        serde_json::to_string(model.classifier.config())?
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Mesh visibility classifier v{}", meshvis_trainer::VERSION);
    info!("═══════════════════════════════════════════");

    match cli.command {
        Command::Train(args) => train(args),
        Command::Predict(args) => predict(args),
        Command::Inspect { artifacts } => inspect(artifacts),
    }
}
