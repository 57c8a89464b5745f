//! Declarative pipeline manifests.
//!
//! Each manifest wraps the trainer in one container step plus a volume mount,
//! rendered to YAML for submission. Data only: scheduling and execution
//! belong to the orchestrator that consumes the document.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RelayResult;

/// Image the training step runs in.
pub const TRAINER_IMAGE: &str = "localhost:5000/timm-jupyter:cuda12.1";

/// Substituted with the pipeline's dataset root at submission time.
pub const DATA_DIR_PLACEHOLDER: &str = "{{data_dir}}";

/// Substituted with the step's output artifact directory at submission time.
pub const OUTPUT_DIR_PLACEHOLDER: &str = "{{output_dir}}";

/// How the step's output is surfaced to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// The step writes a fixed training directory and reports its path.
    PathReference,
    /// The step trains directly into the output artifact directory.
    ArtifactDirectory,
}

/// One containerized trainer invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStep {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub output_mode: OutputMode,
    /// File dropped into the output directory once training succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_marker: Option<String>,
}

/// Volume carrying the dataset into the step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PvcMount {
    pub pvc_name: String,
    pub mount_path: String,
}

/// A single-step training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineManifest {
    pub name: String,
    pub description: String,
    /// Dataset root inside the container; fills `{{data_dir}}` in step args.
    pub data_dir: String,
    pub mount: PvcMount,
    pub step: ContainerStep,
}

impl PipelineManifest {
    pub fn to_yaml(&self) -> RelayResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn write_yaml(&self, path: &Path) -> RelayResult<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

/// Fixed trainer invocation shared by both built-in pipelines.
///
/// The dataset root is passed both positionally and via `--data-dir`; trainer
/// versions disagree on which one they read.
fn trainer_args(output: &str) -> Vec<String> {
    [
        DATA_DIR_PLACEHOLDER,
        "--data-dir",
        DATA_DIR_PLACEHOLDER,
        "--model",
        "efficientnet_b0",
        "--num-classes",
        "200",
        "--input-size",
        "3",
        "64",
        "64",
        "--epochs",
        "5",
        "-b",
        "64",
        "--crop-pct",
        "1.0",
        "--log-interval",
        "50",
        "--output",
        output,
        "-j",
        "8",
        "--pin-mem",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn tiny_imagenet_manifest(step: ContainerStep) -> PipelineManifest {
    PipelineManifest {
        name: "timm_pipeline_v2_pvc".to_string(),
        description: "Train timm with TinyImageNet using PVC in KFP v2".to_string(),
        data_dir: "/mnt/data".to_string(),
        mount: PvcMount {
            pvc_name: "tinyimagenet-pvc".to_string(),
            mount_path: "/mnt/data".to_string(),
        },
        step,
    }
}

/// Base variant: trains into a fixed directory and reports its path.
pub fn base_pipeline() -> PipelineManifest {
    tiny_imagenet_manifest(ContainerStep {
        name: "train_timm_imagenet_tiny".to_string(),
        image: TRAINER_IMAGE.to_string(),
        command: vec!["python".to_string(), "/workspace/timm/train.py".to_string()],
        args: trainer_args("/tmp/train_output"),
        output_mode: OutputMode::PathReference,
        completion_marker: None,
    })
}

/// Test variant: trains into the output artifact directory and leaves a
/// completion marker behind for downstream steps to gate on.
pub fn test_pipeline() -> PipelineManifest {
    tiny_imagenet_manifest(ContainerStep {
        name: "train_timm_imagenet_tiny".to_string(),
        image: TRAINER_IMAGE.to_string(),
        command: vec!["python".to_string(), "/workspace/timm/train.py".to_string()],
        args: trainer_args(OUTPUT_DIR_PLACEHOLDER),
        output_mode: OutputMode::ArtifactDirectory,
        completion_marker: Some("done.txt".to_string()),
    })
}
