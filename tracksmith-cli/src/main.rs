//! tracksmith CLI: launch a training job and mirror its progress into an
//! MLflow-compatible tracking server.

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use tracksmith_core::probe::TrainerCapabilities;
use tracksmith_core::run::{RunParams, TrainingRun};
use tracksmith_core::supervisor::Supervisor;
use tracksmith_core::tracking::{MlflowSink, TrackingSink};

/// Supervise one training run: relay metrics, checkpoints, and logs.
#[derive(Parser, Debug)]
#[command(name = "tracksmith", version, about, long_about = None)]
struct Cli {
    /// Model architecture to train
    #[arg(long)]
    model: String,

    /// Dataset root handed to the trainer
    #[arg(long)]
    data_dir: PathBuf,

    /// Output root; each run gets a directory beneath it
    #[arg(long)]
    output: PathBuf,

    /// Number of training epochs
    #[arg(long, default_value_t = 10)]
    epochs: u32,

    /// Trainer batch size
    #[arg(long, default_value_t = 64)]
    batch_size: u32,

    /// Square input image size in pixels
    #[arg(long, default_value_t = 64)]
    img_size: u32,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Zip the run directory after training and upload it when small enough
    #[arg(long)]
    bundle: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Logs go to stderr; stdout belongs to the echoed trainer output.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    tracing_subscriber::registry().with(stderr_layer).init();

    let config = tracksmith_core::load_config(cli.config.as_deref())?;

    let params = RunParams {
        model: cli.model,
        data_dir: cli.data_dir,
        output: cli.output,
        epochs: cli.epochs,
        batch_size: cli.batch_size,
        img_size: cli.img_size,
    };
    let run = TrainingRun::prepare(params)?;
    info!(
        run = %run.name,
        tracking = %config.tracking.uri,
        experiment = %config.tracking.experiment,
        "prepared training run"
    );

    let caps = TrainerCapabilities::probe(&config.trainer.python, &config.trainer.script).await;

    let sink = MlflowSink::new(&config.tracking)?;
    let handle = sink.start_run(&run.name, &run.params.to_param_pairs()).await?;

    let mut supervisor = Supervisor::new(Box::new(sink), config.trainer.clone());
    supervisor.bundle = cli.bundle;
    supervisor.supervise(&run, &handle, caps).await?;

    info!(run = %run.name, "run complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from([
            "tracksmith",
            "--model",
            "resnet50",
            "--data-dir",
            "/data/tiny",
            "--output",
            "/out",
        ])
        .unwrap();
        assert_eq!(cli.epochs, 10);
        assert_eq!(cli.batch_size, 64);
        assert_eq!(cli.img_size, 64);
        assert!(!cli.bundle);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_requires_model_data_and_output() {
        assert!(Cli::try_parse_from(["tracksmith"]).is_err());
        assert!(Cli::try_parse_from(["tracksmith", "--model", "resnet50"]).is_err());
        assert!(
            Cli::try_parse_from(["tracksmith", "--model", "r", "--data-dir", "/d"]).is_err()
        );
    }
}
