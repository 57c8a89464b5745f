//! Emit the built-in pipeline manifests for cluster submission.
//!
//! Two variants of the TinyImageNet training pipeline are produced: a base
//! manifest whose step reports its output path downstream, and a test
//! manifest whose step writes into a collected artifact directory and drops
//! a completion marker.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

use tracksmith_core::pipeline;

#[derive(Parser, Debug)]
#[command(name = "tracksmith-pipelines", version, about)]
struct Cli {
    /// Directory the manifest files are written into
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("creating {}", cli.out_dir.display()))?;

    let manifests = [
        ("timm_pipeline_base.yaml", pipeline::base_pipeline()),
        ("timm_pipeline_test.yaml", pipeline::test_pipeline()),
    ];
    for (file_name, manifest) in manifests {
        let path = cli.out_dir.join(file_name);
        manifest.write_yaml(&path)?;
        info!(path = %path.display(), pipeline = %manifest.name, "wrote manifest");
    }

    Ok(())
}
