//! The relay loop: launch the trainer, tail its output, and forward metrics
//! and checkpoints to the tracking sink as they appear.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::artifacts::{self, ARCHIVE_UPLOAD_CAP, CheckpointWatcher};
use crate::config::TrainerConfig;
use crate::error::{RelayError, RelayResult};
use crate::metrics::MetricsRelay;
use crate::probe::TrainerCapabilities;
use crate::run::TrainingRun;
use crate::tracking::{RunHandle, RunOutcome, TrackingSink};

/// Default pause between relay passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Drives one trainer process to completion while relaying its outputs.
pub struct Supervisor {
    sink: Box<dyn TrackingSink>,
    trainer: TrainerConfig,
    /// Pause between relay passes.
    pub poll_interval: Duration,
    /// Largest run archive eligible for upload, in bytes.
    pub archive_cap: u64,
    /// Create the run archive locally after the trainer exits.
    pub bundle: bool,
}

impl Supervisor {
    pub fn new(sink: Box<dyn TrackingSink>, trainer: TrainerConfig) -> Self {
        Self {
            sink,
            trainer,
            poll_interval: DEFAULT_POLL_INTERVAL,
            archive_cap: ARCHIVE_UPLOAD_CAP,
            bundle: false,
        }
    }

    /// Command line handed to the trainer for this run.
    ///
    /// The run name doubles as the trainer's experiment argument, which is
    /// what makes the trainer write into `run_dir`.
    pub fn trainer_command(&self, run: &TrainingRun, caps: TrainerCapabilities) -> Vec<String> {
        let p = &run.params;
        let mut argv = vec![
            self.trainer.python.clone(),
            self.trainer.script.display().to_string(),
            "--model".to_string(),
            p.model.clone(),
            "--data-dir".to_string(),
            p.data_dir.display().to_string(),
            "--output".to_string(),
            p.output.display().to_string(),
            "--experiment".to_string(),
            run.name.clone(),
            "--epochs".to_string(),
            p.epochs.to_string(),
            "--batch-size".to_string(),
            p.batch_size.to_string(),
            "--img-size".to_string(),
            p.img_size.to_string(),
        ];
        argv.extend(caps.extra_args());
        argv
    }

    /// Run the trainer to completion, relaying as it goes.
    ///
    /// The run is closed on the sink with its terminal status before this
    /// returns. A non-zero trainer exit surfaces as `TrainerFailed`, but only
    /// after the final flush has delivered whatever the trainer left behind.
    pub async fn supervise(
        &self,
        run: &TrainingRun,
        handle: &RunHandle,
        caps: TrainerCapabilities,
    ) -> RelayResult<()> {
        let result = self.run_to_completion(run, handle, caps).await;
        match &result {
            Ok(()) => self.sink.end_run(handle, RunOutcome::Finished).await?,
            Err(_) => {
                // The first failure wins; closing the run is best-effort.
                if let Err(close_err) = self.sink.end_run(handle, RunOutcome::Failed).await {
                    warn!(error = %close_err, "failed to close tracking run");
                }
            }
        }
        result
    }

    async fn run_to_completion(
        &self,
        run: &TrainingRun,
        handle: &RunHandle,
        caps: TrainerCapabilities,
    ) -> RelayResult<()> {
        let argv = self.trainer_command(run, caps);
        info!(command = %argv.join(" "), "launching trainer");

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::launch(format!("failed to spawn trainer: {e}")))?;

        // Both pipes feed one channel; the relay tick below never blocks on a
        // quiet trainer.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        spawn_line_reader(child.stdout.take(), tx.clone());
        spawn_line_reader(child.stderr.take(), tx);

        let mut metrics = MetricsRelay::new();
        let mut checkpoints = CheckpointWatcher::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let exit_status = loop {
            ticker.tick().await;
            drain_pending(&mut rx);
            self.poll_and_relay(run, handle, &mut metrics, &mut checkpoints)
                .await?;
            if let Some(status) = child.try_wait()? {
                break status;
            }
        };

        // Reader tasks drop their senders at pipe EOF, so this drain ends.
        while let Some(line) = rx.recv().await {
            println!("[trainer] {line}");
        }
        self.poll_and_relay(run, handle, &mut metrics, &mut checkpoints)
            .await?;

        let summary = run.summary_path();
        if summary.is_file() {
            self.sink.log_artifact(handle, &summary, Some("logs")).await?;
        }
        let args_file = run.args_path();
        if args_file.is_file() {
            self.sink
                .log_artifact(handle, &args_file, Some("logs"))
                .await?;
        }

        if self.bundle && run.run_dir.is_dir() {
            let added = artifacts::bundle_run_dir(&run.run_dir, &run.archive_path())?;
            debug!(files = added, "bundled run directory");
        }
        let archive = run.archive_path();
        if artifacts::within_archive_cap(&archive, self.archive_cap)? {
            self.sink
                .log_artifact(handle, &archive, Some("run_zip"))
                .await?;
        }

        let exit_code = exit_status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!(exit_code, "trainer exited with non-zero status");
            return Err(RelayError::TrainerFailed(exit_code));
        }

        info!(
            epochs = metrics.seen_count(),
            checkpoints = checkpoints.seen_count(),
            "trainer finished"
        );
        Ok(())
    }

    /// One relay pass: new metric rows first, then new checkpoint files.
    ///
    /// Both halves are idempotent, so calling this again after the trainer
    /// exits only delivers what the last in-loop pass missed.
    pub async fn poll_and_relay(
        &self,
        run: &TrainingRun,
        handle: &RunHandle,
        metrics: &mut MetricsRelay,
        checkpoints: &mut CheckpointWatcher,
    ) -> RelayResult<()> {
        let summary = run.summary_path();
        if summary.is_file() {
            for batch in metrics.collect_new(&summary)? {
                self.sink
                    .log_metrics(handle, batch.epoch, &batch.values)
                    .await?;
                info!(epoch = batch.epoch, count = batch.values.len(), "relayed metrics");
            }
        }

        for ckpt in checkpoints.scan_new(&run.run_dir)? {
            self.sink
                .log_artifact(handle, &ckpt, Some("checkpoints"))
                .await?;
        }
        Ok(())
    }
}

fn spawn_line_reader<R>(pipe: Option<R>, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    if let Some(pipe) = pipe {
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }
}

fn drain_pending(rx: &mut mpsc::UnboundedReceiver<String>) {
    while let Ok(line) = rx.try_recv() {
        println!("[trainer] {line}");
    }
}
