//! Run identity and on-disk layout for one trainer invocation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::RelayResult;

/// Hyperparameters for one trainer invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    /// Model architecture name, forwarded verbatim to the trainer.
    pub model: String,
    /// Dataset root handed to the trainer.
    pub data_dir: PathBuf,
    /// Output root; each run gets a directory beneath it.
    pub output: PathBuf,
    pub epochs: u32,
    pub batch_size: u32,
    pub img_size: u32,
}

impl RunParams {
    pub fn new(model: &str, data_dir: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            model: model.to_string(),
            data_dir: data_dir.into(),
            output: output.into(),
            epochs: 10,
            batch_size: 64,
            img_size: 64,
        }
    }

    /// Key/value form of the full parameter set, as logged to the tracker.
    pub fn to_param_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("model".to_string(), self.model.clone()),
            ("data_dir".to_string(), self.data_dir.display().to_string()),
            ("output".to_string(), self.output.display().to_string()),
            ("epochs".to_string(), self.epochs.to_string()),
            ("batch_size".to_string(), self.batch_size.to_string()),
            ("img_size".to_string(), self.img_size.to_string()),
        ]
    }
}

/// One named run and the paths the trainer is expected to populate.
///
/// The trainer itself creates `run_dir`; the supervisor only guarantees the
/// output root exists before launch.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub name: String,
    pub run_dir: PathBuf,
    pub params: RunParams,
}

impl TrainingRun {
    /// Derive a collision-resistant run name and prepare the output root.
    pub fn prepare(params: RunParams) -> RelayResult<Self> {
        let name = format!("{}_{}", params.model, Utc::now().timestamp());
        Self::with_name(params, name)
    }

    /// Same layout with a caller-chosen name.
    pub fn with_name(params: RunParams, name: String) -> RelayResult<Self> {
        std::fs::create_dir_all(&params.output)?;
        let run_dir = params.output.join(&name);
        Ok(Self {
            name,
            run_dir,
            params,
        })
    }

    /// Per-epoch metrics file appended by the trainer.
    pub fn summary_path(&self) -> PathBuf {
        self.run_dir.join("summary.csv")
    }

    /// Resolved-arguments file written by the trainer at startup.
    pub fn args_path(&self) -> PathBuf {
        self.run_dir.join("args.yaml")
    }

    /// Sibling archive of the run directory, if anything produced one.
    pub fn archive_path(&self) -> PathBuf {
        self.run_dir.with_extension("zip")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_name_is_model_plus_timestamp() {
        let dir = tempfile::TempDir::new().unwrap();
        let params = RunParams::new("resnet50", "/data/tiny", dir.path().join("out"));
        let run = TrainingRun::prepare(params).unwrap();

        let suffix = run
            .name
            .strip_prefix("resnet50_")
            .expect("name should start with the model");
        let ts: i64 = suffix.parse().expect("suffix should be unix seconds");
        assert!(ts > 0);
        assert_eq!(run.run_dir, dir.path().join("out").join(&run.name));
    }

    #[test]
    fn test_prepare_creates_output_root() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("nested").join("out");
        let params = RunParams::new("vit_tiny", "/data", &out);
        let run = TrainingRun::prepare(params).unwrap();

        assert!(out.is_dir());
        // The run directory itself belongs to the trainer.
        assert!(!run.run_dir.exists());
    }

    #[test]
    fn test_derived_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let params = RunParams::new("vit_tiny", "/data", dir.path());
        let run = TrainingRun::with_name(params, "vit_tiny_1700000000".to_string()).unwrap();

        assert_eq!(run.summary_path(), run.run_dir.join("summary.csv"));
        assert_eq!(run.args_path(), run.run_dir.join("args.yaml"));
        assert_eq!(
            run.archive_path(),
            dir.path().join("vit_tiny_1700000000.zip")
        );
    }

    #[test]
    fn test_param_pairs_cover_every_field() {
        let params = RunParams::new("efficientnet_b0", "/mnt/data", "/tmp/out");
        let pairs = params.to_param_pairs();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "model",
                "data_dir",
                "output",
                "epochs",
                "batch_size",
                "img_size"
            ]
        );
        assert!(pairs.iter().any(|(k, v)| k == "epochs" && v == "10"));
        assert!(pairs.iter().any(|(k, v)| k == "batch_size" && v == "64"));
    }
}
