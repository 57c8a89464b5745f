//! Experiment-tracking sink.
//!
//! `TrackingSink` is the seam between the relay loop and the tracking server;
//! `MlflowSink` talks to the MLflow REST API via reqwest. Every call takes
//! the `RunHandle` issued by `start_run`, so nothing depends on ambient
//! process state.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::config::TrackingConfig;
use crate::error::{RelayError, RelayResult};

/// Terminal status reported when a run closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Finished => "FINISHED",
            RunOutcome::Failed => "FAILED",
        }
    }
}

/// Server-issued identity of an open run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
    pub experiment_id: String,
}

/// Trait for tracking-server interactions.
#[async_trait]
pub trait TrackingSink: Send + Sync {
    /// Open a run under the configured experiment and log its parameters.
    async fn start_run(&self, name: &str, params: &[(String, String)]) -> RelayResult<RunHandle>;

    /// Forward one epoch's metrics, tagged with the epoch as the step.
    async fn log_metrics(
        &self,
        handle: &RunHandle,
        step: i64,
        metrics: &HashMap<String, f64>,
    ) -> RelayResult<()>;

    /// Upload one file, filed under `label` when given.
    async fn log_artifact(
        &self,
        handle: &RunHandle,
        file: &Path,
        label: Option<&str>,
    ) -> RelayResult<()>;

    /// Close the run with its terminal status.
    async fn end_run(&self, handle: &RunHandle, outcome: RunOutcome) -> RelayResult<()>;
}

/// Destination path of an uploaded file within the run's artifact store.
fn artifact_rel_path(file: &Path, label: Option<&str>) -> RelayResult<String> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            RelayError::artifact(format!("artifact path has no file name: {}", file.display()))
        })?;
    Ok(match label {
        Some(label) => format!("{label}/{name}"),
        None => name.to_string(),
    })
}

/// MLflow REST API sink.
pub struct MlflowSink {
    client: Client,
    base_url: String,
    experiment: String,
}

impl MlflowSink {
    pub fn new(config: &TrackingConfig) -> RelayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.uri.trim_end_matches('/').to_string(),
            experiment: config.experiment.clone(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, path)
    }

    async fn post_json(&self, path: &str, body: &Value) -> RelayResult<Value> {
        let resp = self.client.post(self.api_url(path)).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            tracing::warn!(%status, path, body = %text, "tracking API error");
            return Err(RelayError::tracking(format!(
                "{path} failed: HTTP {status}: {text}"
            )));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn lookup_experiment(&self) -> RelayResult<Option<String>> {
        let resp = self
            .client
            .get(self.api_url("experiments/get-by-name"))
            .query(&[("experiment_name", self.experiment.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let json: Value = resp.json().await?;
        Ok(json
            .pointer("/experiment/experiment_id")
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    /// Resolve the configured experiment's id, creating it when absent.
    async fn ensure_experiment(&self) -> RelayResult<String> {
        if let Some(id) = self.lookup_experiment().await? {
            return Ok(id);
        }

        let created = self
            .post_json("experiments/create", &json!({ "name": self.experiment }))
            .await;
        match created {
            Ok(json) => json
                .get("experiment_id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| RelayError::tracking("experiments/create returned no id")),
            // A concurrent creator may have won the race; look up once more.
            Err(err) => match self.lookup_experiment().await? {
                Some(id) => Ok(id),
                None => Err(err),
            },
        }
    }
}

#[async_trait]
impl TrackingSink for MlflowSink {
    async fn start_run(&self, name: &str, params: &[(String, String)]) -> RelayResult<RunHandle> {
        let experiment_id = self.ensure_experiment().await?;

        let body = json!({
            "experiment_id": experiment_id,
            "run_name": name,
            "start_time": Utc::now().timestamp_millis(),
        });
        let json = self.post_json("runs/create", &body).await?;
        let run_id = json
            .pointer("/run/info/run_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| RelayError::tracking("runs/create returned no run_id"))?
            .to_string();
        let handle = RunHandle {
            run_id,
            experiment_id,
        };

        if !params.is_empty() {
            let entries: Vec<Value> = params
                .iter()
                .map(|(k, v)| json!({ "key": k, "value": v }))
                .collect();
            self.post_json(
                "runs/log-batch",
                &json!({ "run_id": handle.run_id, "params": entries }),
            )
            .await?;
        }

        tracing::info!(run = name, run_id = %handle.run_id, "started tracking run");
        Ok(handle)
    }

    async fn log_metrics(
        &self,
        handle: &RunHandle,
        step: i64,
        metrics: &HashMap<String, f64>,
    ) -> RelayResult<()> {
        let timestamp = Utc::now().timestamp_millis();
        let entries: Vec<Value> = metrics
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v, "timestamp": timestamp, "step": step }))
            .collect();
        self.post_json(
            "runs/log-batch",
            &json!({ "run_id": handle.run_id, "metrics": entries }),
        )
        .await?;
        Ok(())
    }

    async fn log_artifact(
        &self,
        handle: &RunHandle,
        file: &Path,
        label: Option<&str>,
    ) -> RelayResult<()> {
        let rel_path = artifact_rel_path(file, label)?;
        let bytes = tokio::fs::read(file).await?;

        let url = format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}/artifacts/{}",
            self.base_url, handle.experiment_id, handle.run_id, rel_path
        );
        let resp = self.client.put(&url).body(bytes).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, artifact = %rel_path, body = %text, "artifact upload error");
            return Err(RelayError::tracking(format!(
                "artifact upload failed: HTTP {status}: {text}"
            )));
        }

        tracing::info!(artifact = %rel_path, "uploaded artifact");
        Ok(())
    }

    async fn end_run(&self, handle: &RunHandle, outcome: RunOutcome) -> RelayResult<()> {
        let body = json!({
            "run_id": handle.run_id,
            "status": outcome.as_str(),
            "end_time": Utc::now().timestamp_millis(),
        });
        self.post_json("runs/update", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn test_sink(uri: &str) -> MlflowSink {
        MlflowSink::new(&TrackingConfig {
            uri: uri.to_string(),
            experiment: "timm".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_api_url_joins_cleanly() {
        let sink = test_sink("http://mlflow:5000/");
        assert_eq!(
            sink.api_url("runs/create"),
            "http://mlflow:5000/api/2.0/mlflow/runs/create"
        );
    }

    #[test]
    fn test_artifact_rel_path() {
        let file = PathBuf::from("/output/run/checkpoint-3.pth.tar");
        assert_eq!(
            artifact_rel_path(&file, Some("checkpoints")).unwrap(),
            "checkpoints/checkpoint-3.pth.tar"
        );
        assert_eq!(
            artifact_rel_path(&file, None).unwrap(),
            "checkpoint-3.pth.tar"
        );
    }

    #[test]
    fn test_run_outcome_status_strings() {
        assert_eq!(RunOutcome::Finished.as_str(), "FINISHED");
        assert_eq!(RunOutcome::Failed.as_str(), "FAILED");
    }
}
