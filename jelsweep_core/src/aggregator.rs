use crate::trial::{EmbedMode, TrialOutcome, TrialResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-category running totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub trials: usize,
    pub passed: usize,
    /// Measured trials with at least one bit error.
    pub failed: usize,
    /// Trials that never reached comparison because a tool failed.
    pub tool_failures: usize,
    pub bit_errors: u64,
    /// Hamming-clean trials whose recovered buffer was not byte-identical.
    pub exact_mismatches: usize,
}

/// Details that identify the run, carried into the final report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunInfo {
    pub payload_len: usize,
    pub payload_digest: Option<String>,
    pub seed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub results: Vec<TrialResult>,
    pub total_bit_errors: u64,
    pub passed: usize,
    pub failed: usize,
    pub tool_failures: usize,
    /// Covers involved in at least one trial with bit errors.
    pub culprits: BTreeSet<String>,
    pub categories: BTreeMap<EmbedMode, CategorySummary>,
    pub run: RunInfo,
}

impl SweepReport {
    /// True when every trial was measured and came back bit-exact.
    pub fn is_success(&self) -> bool {
        self.total_bit_errors == 0 && self.failed == 0 && self.tool_failures == 0
    }

    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Total bit errors: {}, passed: {}, failed: {}",
            self.total_bit_errors,
            self.passed,
            self.failed + self.tool_failures
        )
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "# Payload: {} bytes{}",
            self.run.payload_len,
            self.run
                .payload_digest
                .as_deref()
                .map(|d| format!(" (md5 {d})"))
                .unwrap_or_default()
        )?;
        for (mode, summary) in &self.categories {
            writeln!(
                f,
                "{:<16} trials: {:>5}  passed: {:>5}  failed: {:>5}  \
                 tool failures: {:>5}  bit errors: {}",
                mode.to_string(),
                summary.trials,
                summary.passed,
                summary.failed,
                summary.tool_failures,
                summary.bit_errors
            )?;
            if mode == &EmbedMode::Seeded {
                writeln!(f, "{:<16} seed: {}", "", self.run.seed)?;
            }
            if summary.exact_mismatches > 0 {
                writeln!(
                    f,
                    "{:<16} exact-match check disagreed on {} Hamming-clean trials",
                    "", summary.exact_mismatches
                )?;
            }
        }
        if self.culprits.is_empty() {
            writeln!(f, "Culprits: none")?;
        } else {
            let list: Vec<&str> = self.culprits.iter().map(String::as_str).collect();
            writeln!(f, "Culprits: {}", list.join(", "))?;
        }
        if self.is_success() {
            writeln!(f, "Success. No errors.")?;
        } else {
            writeln!(
                f,
                "Test failed. Number of bits in error, {}, with {} failed trials.",
                self.total_bit_errors,
                self.failed + self.tool_failures
            )?;
        }
        write!(f, "{}", self.summary_line())
    }
}

/// Collects trial results into a [`SweepReport`].
///
/// Only the thread driving the sweep owns the aggregator; workers hand their
/// results over instead of touching shared counters.
#[derive(Debug, Default)]
pub struct Aggregator {
    results: Vec<TrialResult>,
    total_bit_errors: u64,
    passed: usize,
    failed: usize,
    tool_failures: usize,
    culprits: BTreeSet<String>,
    categories: BTreeMap<EmbedMode, CategorySummary>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn total_bit_errors(&self) -> u64 {
        self.total_bit_errors
    }

    pub fn accumulate(&mut self, result: TrialResult) {
        let category = self.categories.entry(result.trial.mode).or_default();
        category.trials += 1;
        match &result.outcome {
            TrialOutcome::Measured(m) => {
                self.total_bit_errors += m.bit_errors;
                category.bit_errors += m.bit_errors;
                if m.bit_errors == 0 {
                    self.passed += 1;
                    category.passed += 1;
                    if !m.exact_match {
                        category.exact_mismatches += 1;
                    }
                } else {
                    self.failed += 1;
                    category.failed += 1;
                    if self.culprits.insert(result.trial.cover_id.clone()) {
                        warn!(
                            cover = %result.trial.cover_id,
                            quality = result.trial.quality,
                            "new culprit"
                        );
                    }
                }
            }
            TrialOutcome::Failed { .. } => {
                self.tool_failures += 1;
                category.tool_failures += 1;
            }
        }
        self.results.push(result);
    }

    /// Closes the sweep; results come back ordered by trial index.
    pub fn finalize(self, run: RunInfo) -> SweepReport {
        let mut results = self.results;
        results.sort_by_key(|r| r.trial.index);
        SweepReport {
            results,
            total_bit_errors: self.total_bit_errors,
            passed: self.passed,
            failed: self.failed,
            tool_failures: self.tool_failures,
            culprits: self.culprits,
            categories: self.categories,
            run,
        }
    }
}
