//! Incremental relay of per-epoch metrics from the trainer's summary file.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use crate::error::RelayResult;

/// Strict numeric filter applied to metric values before forwarding.
///
/// Anchored full match: integers, decimals, and exponent forms pass; `nan`,
/// `inf`, bare `.5`, and trailing-dot forms do not.
static FLOAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?\d+(\.\d+)?([eE][-+]?\d+)?$").expect("float pattern should be valid")
});

/// Metrics batch for a single epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    pub epoch: i64,
    pub values: HashMap<String, f64>,
}

/// Tracks which epochs have been forwarded and extracts the new ones.
///
/// The summary file is re-read in full on every pass; the seen set alone
/// makes delivery exactly-once.
#[derive(Debug, Default)]
pub struct MetricsRelay {
    seen_epochs: HashSet<i64>,
}

impl MetricsRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen_count(&self) -> usize {
        self.seen_epochs.len()
    }

    /// Parse the summary file and return batches for epochs not yet seen.
    ///
    /// Rows without an integer `epoch` are skipped, as are individual values
    /// that are empty or fail the numeric filter. A row whose values all fail
    /// yields no batch but its epoch still counts as seen.
    pub fn collect_new(&mut self, csv_path: &Path) -> RelayResult<Vec<EpochMetrics>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(csv_path)?;

        let headers = reader.headers()?.clone();
        let Some(epoch_idx) = headers.iter().position(|h| h == "epoch") else {
            return Ok(Vec::new());
        };

        let mut batches = Vec::new();
        for record in reader.records() {
            let Ok(record) = record else { continue };
            let Some(epoch) = record
                .get(epoch_idx)
                .and_then(|v| v.trim().parse::<i64>().ok())
            else {
                continue;
            };
            if !self.seen_epochs.insert(epoch) {
                continue;
            }

            let values: HashMap<String, f64> = headers
                .iter()
                .zip(record.iter())
                .filter(|(k, v)| *k != "epoch" && !v.is_empty() && FLOAT_RE.is_match(v))
                .filter_map(|(k, v)| v.parse::<f64>().ok().map(|f| (k.to_string(), f)))
                .collect();

            if !values.is_empty() {
                batches.push(EpochMetrics { epoch, values });
            }
        }

        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_summary(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("summary.csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_float_filter() {
        for ok in ["0", "1", "-3", "0.5", "12.75", "1e5", "1.5e-3", "-2E+10"] {
            assert!(FLOAT_RE.is_match(ok), "{ok} should pass");
        }
        for bad in ["", "nan", "inf", "1.", ".5", "1e", "--1", "1.2.3", "1 ", "0x1f"] {
            assert!(!FLOAT_RE.is_match(bad), "{bad} should fail");
        }
    }

    #[test]
    fn test_collect_new_batches_per_epoch() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_summary(&dir, "epoch,train_loss,eval_top1\n0,1.5,0.25\n1,1.2,0.5\n");

        let mut relay = MetricsRelay::new();
        let batches = relay.collect_new(&path).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].epoch, 0);
        assert_eq!(batches[0].values["train_loss"], 1.5);
        assert_eq!(batches[0].values["eval_top1"], 0.25);
        assert_eq!(batches[1].epoch, 1);
        assert_eq!(relay.seen_count(), 2);
    }

    #[test]
    fn test_epochs_forwarded_exactly_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_summary(&dir, "epoch,loss\n0,1.5\n");

        let mut relay = MetricsRelay::new();
        assert_eq!(relay.collect_new(&path).unwrap().len(), 1);
        assert!(relay.collect_new(&path).unwrap().is_empty());

        // The trainer appends; only the new row comes back.
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "1,1.2").unwrap();
        let batches = relay.collect_new(&path).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].epoch, 1);
    }

    #[test]
    fn test_rows_without_integer_epoch_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_summary(&dir, "epoch,loss\n,1.0\nabc,2.0\n3.5,2.5\n4,0.9\n");

        let mut relay = MetricsRelay::new();
        let batches = relay.collect_new(&path).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].epoch, 4);
    }

    #[test]
    fn test_non_numeric_values_are_dropped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_summary(&dir, "epoch,loss,lr_note\n0,1.5,warmup\n1,,0.01\n");

        let mut relay = MetricsRelay::new();
        let batches = relay.collect_new(&path).unwrap();

        assert_eq!(batches[0].epoch, 0);
        assert_eq!(batches[0].values.len(), 1);
        assert!(batches[0].values.contains_key("loss"));

        // Empty loss dropped, numeric lr_note kept.
        assert_eq!(batches[1].epoch, 1);
        assert_eq!(batches[1].values.len(), 1);
        assert_eq!(batches[1].values["lr_note"], 0.01);
    }

    #[test]
    fn test_epoch_column_never_forwarded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_summary(&dir, "epoch,loss\n7,0.5\n");

        let mut relay = MetricsRelay::new();
        let batches = relay.collect_new(&path).unwrap();
        assert!(!batches[0].values.contains_key("epoch"));
    }

    #[test]
    fn test_missing_epoch_column_yields_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_summary(&dir, "step,loss\n0,1.5\n");

        let mut relay = MetricsRelay::new();
        assert!(relay.collect_new(&path).unwrap().is_empty());
        assert_eq!(relay.seen_count(), 0);
    }

    #[test]
    fn test_all_invalid_row_still_counts_as_seen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_summary(&dir, "epoch,note\n5,pending\n");

        let mut relay = MetricsRelay::new();
        assert!(relay.collect_new(&path).unwrap().is_empty());

        // Same epoch later with numeric data is not re-delivered.
        write_summary(&dir, "epoch,note\n5,0.25\n");
        assert!(relay.collect_new(&path).unwrap().is_empty());
    }
}
