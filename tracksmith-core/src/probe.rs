//! Trainer capability detection.
//!
//! Trainer versions differ in which checkpoint-retention flags they accept.
//! One `-h` invocation is captured and searched; a failed probe reports every
//! flag as unsupported and the launch proceeds without them.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Optional trainer flags the supervisor passes only when advertised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainerCapabilities {
    pub checkpoint_hist: bool,
    pub save_every: bool,
    pub no_clean: bool,
}

impl TrainerCapabilities {
    /// Search captured help text for the known optional flags.
    pub fn from_help_text(help: &str) -> Self {
        Self {
            checkpoint_hist: help.contains("--checkpoint-hist"),
            save_every: help.contains("--save-every"),
            no_clean: help.contains("--no-clean"),
        }
    }

    /// Probe by running `{python} {script} -h` with stderr discarded.
    pub async fn probe(python: &str, script: &Path) -> Self {
        let output = Command::new(python)
            .arg(script)
            .arg("-h")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let caps = Self::from_help_text(&String::from_utf8_lossy(&out.stdout));
                tracing::debug!(?caps, "trainer capability probe");
                caps
            }
            _ => {
                tracing::debug!("trainer help probe failed, assuming no optional flags");
                Self::default()
            }
        }
    }

    /// Checkpoint-retention arguments gated on the probe result.
    ///
    /// Retention depth 3 and a save on every epoch keep the checkpoint
    /// directory live for pickup without growing unboundedly.
    pub fn extra_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.checkpoint_hist {
            args.push("--checkpoint-hist".to_string());
            args.push("3".to_string());
        }
        if self.save_every {
            args.push("--save-every".to_string());
            args.push("1".to_string());
        }
        if self.no_clean {
            args.push("--no-clean".to_string());
        }
        args
    }
}
