use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::corpus::{CaseFailure, KernelKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConformanceReport {
    pub seed: u64,
    pub total_cases: usize,
    pub passed: usize,
    pub failures: usize,
    pub coverage: CoverageSummary,
    pub failed_cases: Vec<FailureRecord>,
}

/// One failing case. `stage` is `staging`, `execution`, `unstaging` or `comparison`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kernel: String,
    pub case_idx: usize,
    pub stage: String,
    pub message: String,
}

impl ConformanceReport {
    pub fn new(total_cases: usize, seed: u64, kinds: &[KernelKind]) -> Self {
        Self {
            seed,
            total_cases,
            passed: 0,
            failures: 0,
            coverage: CoverageSummary::new(kinds.iter().map(|k| k.name().to_string()).collect()),
            failed_cases: Vec::new(),
        }
    }

    pub fn record_pass(&mut self, kind: KernelKind) {
        self.coverage.increment(kind.name());
        self.passed += 1;
    }

    pub fn record_failure(&mut self, kind: KernelKind, case_idx: usize, failure: CaseFailure) {
        self.coverage.increment(kind.name());
        self.failures += 1;
        self.failed_cases.push(FailureRecord {
            kernel: kind.name().to_string(),
            case_idx,
            stage: failure
                .stage
                .map_or("comparison", |stage| stage.as_str())
                .to_string(),
            message: failure.message,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }

    pub fn log_summary(&self) {
        tracing::info!(
            cases = self.total_cases,
            passed = self.passed,
            failures = self.failures,
            "conformance run finished"
        );
        tracing::info!(
            "coverage: {:.1}% ({} / {})",
            self.coverage.percent(),
            self.coverage.covered(),
            self.coverage.expected.len()
        );
        for key in self.coverage.uncovered() {
            tracing::info!(kernel = %key, "kernel not covered");
        }
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, contents)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub expected: Vec<String>,
    pub counts: BTreeMap<String, usize>,
}

impl CoverageSummary {
    pub fn new(expected: Vec<String>) -> Self {
        Self {
            expected,
            counts: BTreeMap::new(),
        }
    }

    pub fn increment(&mut self, key: &str) {
        *self.counts.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn covered(&self) -> usize {
        self.expected.iter().filter(|key| self.count(key) > 0).count()
    }

    pub fn percent(&self) -> f64 {
        if self.expected.is_empty() {
            return 100.0;
        }
        (self.covered() as f64) * 100.0 / (self.expected.len() as f64)
    }

    pub fn uncovered(&self) -> Vec<String> {
        self.expected
            .iter()
            .filter(|key| self.count(key) == 0)
            .cloned()
            .collect()
    }
}
