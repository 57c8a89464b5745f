//! Configuration for the tracksmith supervisor.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RelayError, RelayResult};

/// Top-level tracksmith configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracksmithConfig {
    /// Experiment-tracking server settings.
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// External trainer invocation settings.
    #[serde(default)]
    pub trainer: TrainerConfig,
}

/// Experiment-tracking server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Base URI of the tracking server.
    #[serde(default = "default_tracking_uri")]
    pub uri: String,
    /// Experiment name runs are filed under (created on demand).
    #[serde(default = "default_experiment")]
    pub experiment: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            uri: default_tracking_uri(),
            experiment: default_experiment(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_tracking_uri() -> String {
    "http://mlflow:5000".to_string()
}

fn default_experiment() -> String {
    "timm".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// External trainer invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Interpreter used to run the training script.
    #[serde(default = "default_python")]
    pub python: String,
    /// Path to the training script.
    #[serde(default = "default_train_script")]
    pub script: PathBuf,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            script: default_train_script(),
        }
    }
}

fn default_python() -> String {
    "python".to_string()
}

fn default_train_script() -> PathBuf {
    PathBuf::from("/workspace/timm/train.py")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. `MLFLOW_TRACKING_URI` / `MLFLOW_EXPERIMENT_NAME` environment variables
/// 2. Environment variables prefixed with `TRACKSMITH_` (`__` separates sections)
/// 3. Config file (explicit path, or `tracksmith.toml` in the working directory)
/// 4. Built-in defaults
pub fn load_config(config_file: Option<&Path>) -> RelayResult<TracksmithConfig> {
    let mut figment = Figment::from(Serialized::defaults(TracksmithConfig::default()));

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    } else {
        let local = Path::new("tracksmith.toml");
        if local.exists() {
            figment = figment.merge(Toml::file(local));
        }
    }

    // Environment variables (TRACKSMITH_TRACKING__URI, TRACKSMITH_TRAINER__PYTHON, etc.)
    figment = figment.merge(Env::prefixed("TRACKSMITH_").split("__"));

    let mut config: TracksmithConfig = figment
        .extract()
        .map_err(|e| RelayError::config(e.to_string()))?;

    apply_mlflow_env(
        &mut config,
        std::env::var("MLFLOW_TRACKING_URI").ok(),
        std::env::var("MLFLOW_EXPERIMENT_NAME").ok(),
    );

    Ok(config)
}

/// The conventional MLflow environment variables win over every other source.
fn apply_mlflow_env(
    config: &mut TracksmithConfig,
    tracking_uri: Option<String>,
    experiment: Option<String>,
) {
    if let Some(uri) = tracking_uri {
        config.tracking.uri = uri;
    }
    if let Some(name) = experiment {
        config.tracking.experiment = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = TracksmithConfig::default();
        assert_eq!(config.tracking.uri, "http://mlflow:5000");
        assert_eq!(config.tracking.experiment, "timm");
        assert_eq!(config.tracking.timeout_secs, 30);
        assert_eq!(config.trainer.python, "python");
        assert_eq!(
            config.trainer.script,
            PathBuf::from("/workspace/timm/train.py")
        );
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = TracksmithConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TracksmithConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tracking.uri, config.tracking.uri);
        assert_eq!(parsed.trainer.python, config.trainer.python);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tracksmith.toml");
        std::fs::write(
            &path,
            r#"
[tracking]
uri = "http://localhost:5001"

[trainer]
python = "python3"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.trainer.python, "python3");
        // File layer overrides the default, unchanged keys keep theirs.
        assert_eq!(config.trainer.script, default_train_script());
    }

    #[test]
    fn test_mlflow_env_overrides() {
        let mut config = TracksmithConfig::default();
        apply_mlflow_env(
            &mut config,
            Some("http://tracker:5000".to_string()),
            Some("resnet-sweep".to_string()),
        );
        assert_eq!(config.tracking.uri, "http://tracker:5000");
        assert_eq!(config.tracking.experiment, "resnet-sweep");

        apply_mlflow_env(&mut config, None, None);
        assert_eq!(config.tracking.uri, "http://tracker:5000");
    }
}
