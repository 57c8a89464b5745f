//! # tracksmith-core: training-run supervision and metrics relay
//!
//! This crate drives an external training program and mirrors its progress
//! into an MLflow-compatible tracking server: per-epoch metrics parsed from
//! the trainer's summary file, checkpoint files as they appear, and the run's
//! log bundle once training ends.
//!
//! The trainer owns the hard work. Everything here is deliberately thin glue
//! around three loops:
//! 1. **Tail** the trainer's stdout/stderr and echo it.
//! 2. **Poll** the run directory on a fixed cadence and relay what is new,
//!    exactly once.
//! 3. **Flush** leftovers and close the tracking run when the trainer exits.

// Foundation
pub mod config;
pub mod error;

// Run model & trainer interface
pub mod probe;
pub mod run;

// Relay engine
pub mod artifacts;
pub mod metrics;
pub mod supervisor;
pub mod tracking;

// Orchestrator manifests
pub mod pipeline;

// Re-exports
pub use config::{TracksmithConfig, load_config};
pub use error::{RelayError, RelayResult};
pub use probe::TrainerCapabilities;
pub use run::{RunParams, TrainingRun};
pub use supervisor::Supervisor;
pub use tracking::{MlflowSink, RunHandle, RunOutcome, TrackingSink};
